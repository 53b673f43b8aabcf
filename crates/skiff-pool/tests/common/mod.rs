//! In-memory driver for exercising the pool without spawning processes

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use skiff_core::{
    ActionDescriptor, ActionIdentity, ActivationId, ContainerDriver, CreateSpec, InitResult,
    PoolConfig, Result, RunResult, SandboxHandle, SkiffError,
};
use skiff_pool::ContainerPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Code that makes `run_init` report a failed initialization
pub const FAILING_INIT: &str = "raise SyntaxError";
/// Code that makes `run_init` hang for an hour
pub const HANGING_INIT: &str = "while True: pass";

#[derive(Default)]
struct FakeState {
    next: u64,
    live: HashSet<SandboxHandle>,
    crashed: HashSet<SandboxHandle>,
    destroyed: Vec<SandboxHandle>,
    specs: Vec<CreateSpec>,
    init_calls: usize,
    fail_create: bool,
    fail_destroy: bool,
    stall_health: bool,
}

#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the sandbox behind `handle` die.
    pub fn crash(&self, handle: &SandboxHandle) {
        self.state.lock().crashed.insert(handle.clone());
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.state.lock().fail_destroy = fail;
    }

    /// Make health checks hang for an hour.
    pub fn stall_health_checks(&self, stall: bool) {
        self.state.lock().stall_health = stall;
    }

    pub fn created(&self) -> usize {
        self.state.lock().specs.len()
    }

    pub fn specs(&self) -> Vec<CreateSpec> {
        self.state.lock().specs.clone()
    }

    pub fn init_calls(&self) -> usize {
        self.state.lock().init_calls
    }

    pub fn destroyed(&self) -> Vec<SandboxHandle> {
        self.state.lock().destroyed.clone()
    }

    pub fn live(&self) -> usize {
        self.state.lock().live.len()
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn create(&self, spec: &CreateSpec) -> Result<SandboxHandle> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(SkiffError::Create {
                image: spec.image.clone(),
                reason: "image not found".into(),
            });
        }
        state.next += 1;
        let handle = SandboxHandle::new(format!("fake-{}", state.next));
        state.live.insert(handle.clone());
        state.specs.push(spec.clone());
        Ok(handle)
    }

    async fn run_init(&self, _handle: &SandboxHandle, action: &ActionDescriptor) -> Result<InitResult> {
        self.state.lock().init_calls += 1;
        match action.code.as_str() {
            FAILING_INIT => Ok(InitResult::failure(Duration::ZERO, "invalid syntax")),
            HANGING_INIT => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(InitResult::success(Duration::from_secs(3600)))
            }
            _ => Ok(InitResult::success(Duration::from_millis(1))),
        }
    }

    async fn run(
        &self,
        handle: &SandboxHandle,
        payload: &serde_json::Value,
        _activation_id: ActivationId,
    ) -> Result<RunResult> {
        if self.state.lock().crashed.contains(handle) {
            return Err(SkiffError::Driver(format!("{handle} is not running")));
        }
        Ok(RunResult {
            exit_code: 0,
            response: payload.clone(),
            ..RunResult::default()
        })
    }

    async fn get_logs(&self, handle: &SandboxHandle) -> Result<String> {
        Ok(format!("logs of {handle}\n"))
    }

    async fn is_healthy(&self, handle: &SandboxHandle) -> bool {
        if self.state.lock().stall_health {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let state = self.state.lock();
        state.live.contains(handle) && !state.crashed.contains(handle)
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.live.remove(handle);
        state.destroyed.push(handle.clone());
        if state.fail_destroy {
            return Err(SkiffError::Driver("daemon unreachable".into()));
        }
        Ok(())
    }
}

pub fn action(name: &str) -> ActionDescriptor {
    ActionDescriptor::new(
        ActionIdentity::new("guest", name, "1"),
        "runtime:python3",
        "def main(args):\n    return args\n",
    )
}

pub fn action_with_code(name: &str, code: &str) -> ActionDescriptor {
    ActionDescriptor::new(ActionIdentity::new("guest", name, "1"), "runtime:python3", code)
}

/// Pool whose background sweeper never fires during a test
pub fn pool_with(driver: &Arc<FakeDriver>, config: PoolConfig) -> Arc<ContainerPool> {
    let driver: Arc<dyn ContainerDriver> = driver.clone();
    Arc::new(ContainerPool::new(config, driver).expect("valid config"))
}

pub fn config(max_active: usize, max_idle: usize) -> PoolConfig {
    PoolConfig::builder()
        .max_active(max_active)
        .max_idle(max_idle)
        .gc_frequency(Duration::from_secs(24 * 3600))
        .build()
}

/// `idle + active == tracked` must hold at every observation point.
pub fn assert_consistent(pool: &ContainerPool) {
    let all = pool.list_all();
    assert_eq!(pool.idle_count() + pool.active_count(), all.len());
}
