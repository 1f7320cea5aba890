pub mod collaborators;
pub mod compiler;
pub mod filterjoin;
pub mod relation_graph;
