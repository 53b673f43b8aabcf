//! Action identity and descriptors
//!
//! Actions arrive pre-resolved: the pool never looks definitions or
//! credentials up, it only uses them to key and initialize containers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reuse key for cached containers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionIdentity {
    pub namespace: String,
    pub name: String,
    /// Code revision or content hash
    pub revision: String,
}

impl ActionIdentity {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for ActionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.revision)
    }
}

/// A resolved action ready to be placed into a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub identity: ActionIdentity,

    /// Runtime image the action runs on
    pub image: String,

    /// Extra arguments passed to the runtime on creation
    #[serde(default)]
    pub args: Vec<String>,

    /// Entry point inside `code`
    #[serde(default = "default_main")]
    pub main: String,

    /// Action source
    pub code: String,
}

fn default_main() -> String {
    "main".into()
}

impl ActionDescriptor {
    pub fn new(identity: ActionIdentity, image: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            identity,
            image: image.into(),
            args: Vec::new(),
            main: default_main(),
            code: code.into(),
        }
    }
}

/// Credential handed to the action's container
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthKey(String);

impl AuthKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(***)")
    }
}

/// Identifier of a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationId(Uuid);

impl ActivationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
