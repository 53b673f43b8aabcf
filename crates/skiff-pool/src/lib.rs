//! # skiff-pool
//!
//! The container pool at the heart of skiff:
//! - Admission control bounding checked-out containers at `max_active`
//! - Reuse of initialized containers keyed by action identity
//! - Count-based eviction on release and an age-based background sweeper
//! - Lazy crash detection, replacing dead containers on their next reuse
//!
//! ```no_run
//! use skiff_core::{ActionDescriptor, ActionIdentity, ActivationId, AuthKey, PoolConfig};
//! use skiff_pool::{ContainerPool, ProcessDriver};
//! use std::sync::Arc;
//!
//! # async fn demo() -> skiff_core::Result<()> {
//! let pool = ContainerPool::new(PoolConfig::default(), Arc::new(ProcessDriver::new()))?;
//! let action = ActionDescriptor::new(
//!     ActionIdentity::new("guest", "hello", "1"),
//!     "skiff-runner",
//!     "def main(args):\n    return {'hello': args.get('name')}\n",
//! );
//!
//! if let Some((container, _init)) = pool.acquire_for_action(&action, &AuthKey::new("k")).await {
//!     let result = pool
//!         .run(&container, &serde_json::json!({"name": "skiff"}), ActivationId::new())
//!         .await?;
//!     println!("{}", result.response);
//!     pool.release(container).await;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod admission;
mod gc;
pub mod pool;
pub mod process;
mod state;

pub use pool::{Container, ContainerPool};
pub use process::ProcessDriver;
