//! The authenticated identity performing an operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A resolved principal. The id is trusted verbatim as an owner id.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Principal(Uuid);

impl Principal {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
