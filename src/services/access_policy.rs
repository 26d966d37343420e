//! Ownership and visibility rules, independent of any storage backend.

use crate::models::{file::FileRecord, principal::Principal};

/// Anyone may read a public file; only the owner may read a private one.
/// `None` is an anonymous caller.
pub fn can_read(principal: Option<&Principal>, record: &FileRecord) -> bool {
    record.is_public || principal.is_some_and(|p| p.id() == record.owner_id)
}

/// Only the owner may change or remove a file. Visibility grants nothing here.
pub fn can_mutate(principal: &Principal, record: &FileRecord) -> bool {
    principal.id() == record.owner_id
}
