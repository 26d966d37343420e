pub mod access_policy;
pub mod backend;
pub mod file_registry;
pub mod metadata_store;
