use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use std::sync::Arc;

/// Identifier assigned to every participant by the signalling server. Two identifiers are equal
/// when their tokens are equal, so [PeerId] can be used directly as a map key.
#[repr(transparent)]
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(token: &str) -> Self {
        PeerId(Arc::from(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        PeerId::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        PeerId(Arc::from(value))
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", &self.0)
    }
}
