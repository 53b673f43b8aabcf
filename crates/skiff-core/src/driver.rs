//! Contract between the pool and a container runtime
//!
//! The pool only orchestrates handle lifetime through this trait. It never
//! inspects payloads or logs itself.

use crate::{ActionDescriptor, ActivationId, InitResult, Result, RunResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime-assigned reference to a live sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle(String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a driver needs to start a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSpec {
    /// Human-readable container name
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CreateSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A container runtime the pool can drive
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create and start a sandbox.
    async fn create(&self, spec: &CreateSpec) -> Result<SandboxHandle>;

    /// Load an action's code into a freshly created sandbox.
    async fn run_init(&self, handle: &SandboxHandle, action: &ActionDescriptor) -> Result<InitResult>;

    /// Run one invocation inside the sandbox.
    async fn run(
        &self,
        handle: &SandboxHandle,
        payload: &serde_json::Value,
        activation_id: ActivationId,
    ) -> Result<RunResult>;

    /// Output captured from the sandbox so far.
    async fn get_logs(&self, handle: &SandboxHandle) -> Result<String>;

    /// Whether the sandbox is still alive and usable.
    async fn is_healthy(&self, handle: &SandboxHandle) -> bool;

    /// Stop the sandbox and release its resources.
    async fn destroy(&self, handle: &SandboxHandle) -> Result<()>;
}
