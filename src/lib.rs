pub mod core;
pub mod error;
pub mod infra;
pub mod models;

pub use crate::core::collaborators::{
    AllRelations, EnabledRelations, FilterScope, FilterStore, JoinSetSource, RelationEnablement,
};
pub use crate::core::compiler::{DashboardOutcome, JoinFilterCompiler, UpdateReport};
pub use crate::error::JoinSetError;
pub use crate::infra::config::JoinSetConfig;
pub use crate::models::filter_state::JoinSetFilter;
pub use crate::models::relation::{Endpoint, NodeKey, Relation, RelationDeclaration};
