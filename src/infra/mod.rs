pub mod config;
pub mod memory_store;
