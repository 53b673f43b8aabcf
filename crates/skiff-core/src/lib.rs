//! # skiff-core
//!
//! Shared building blocks for the skiff container pool.
//!
//! This crate provides:
//! - The pool's data model (action identities, container ids, slot summaries)
//! - Pool configuration with validation and a builder
//! - The driver contract the pool uses to create, run and destroy sandboxes
//! - The length-prefixed MessagePack protocol spoken with guest runners

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod config;
pub mod driver;
pub mod error;
pub mod pipe;
pub mod protocol;
pub mod result;
pub mod slot;

pub use action::{ActionDescriptor, ActionIdentity, ActivationId, AuthKey};
pub use config::PoolConfig;
pub use driver::{ContainerDriver, CreateSpec, SandboxHandle};
pub use error::SkiffError;
pub use result::{InitResult, RunResult};
pub use slot::{ContainerId, SlotState, SlotSummary};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, SkiffError>;
