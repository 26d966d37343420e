//! Core data models for the file registry.
//!
//! `FileRecord` maps to the `files` table via `sqlx::FromRow` and serializes
//! as camelCase JSON via `serde`; the listing types describe queries over it.

pub mod file;
pub mod principal;
pub mod query;
