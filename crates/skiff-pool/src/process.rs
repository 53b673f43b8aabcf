//! Driver backed by local child processes
//!
//! Each sandbox is `image args...` spawned with piped stdio. Requests go to
//! its stdin and responses come back on its stdout as length-prefixed
//! MessagePack frames; stderr is collected as the container's logs.

use async_trait::async_trait;
use parking_lot::Mutex;
use skiff_core::pipe::FramedPipe;
use skiff_core::protocol::{Request, Response};
use skiff_core::{
    ActionDescriptor, ActivationId, ContainerDriver, CreateSpec, InitResult, Result, RunResult,
    SandboxHandle, SkiffError,
};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Environment variable carrying the container's pool name
pub const CONTAINER_NAME_ENV: &str = "SKIFF_CONTAINER";

/// One running child process
struct Sandbox {
    name: String,
    child: tokio::sync::Mutex<Child>,
    pipe: tokio::sync::Mutex<FramedPipe<ChildStdout, ChildStdin>>,
    logs: Arc<Mutex<String>>,
    log_task: JoinHandle<()>,
}

/// [`ContainerDriver`] that runs each container as a child process
#[derive(Default)]
pub struct ProcessDriver {
    sandboxes: Mutex<HashMap<SandboxHandle, Arc<Sandbox>>>,
    next_id: AtomicU64,
}

impl ProcessDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, handle: &SandboxHandle) -> Result<Arc<Sandbox>> {
        self.sandboxes
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| SkiffError::UnknownContainer(handle.to_string()))
    }

    async fn request(&self, handle: &SandboxHandle, request: &Request) -> Result<Response> {
        let sandbox = self.get(handle)?;
        let mut pipe = sandbox.pipe.lock().await;
        pipe.send(request).await?;
        pipe.recv::<Response>()
            .await?
            .ok_or_else(|| SkiffError::Driver(format!("{} exited mid-request", sandbox.name)))
    }
}

#[async_trait]
impl ContainerDriver for ProcessDriver {
    async fn create(&self, spec: &CreateSpec) -> Result<SandboxHandle> {
        let create_err = |reason: String| SkiffError::Create {
            image: spec.image.clone(),
            reason,
        };

        let mut child = Command::new(&spec.image)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(CONTAINER_NAME_ENV, &spec.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| create_err(e.to_string()))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(create_err("child stdio not captured".into()));
        };

        let logs = Arc::new(Mutex::new(String::new()));
        let log_task = {
            let logs = Arc::clone(&logs);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut logs = logs.lock();
                    logs.push_str(&line);
                    logs.push('\n');
                }
            })
        };

        let handle = SandboxHandle::new(format!(
            "proc-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        tracing::debug!(
            container = %spec.name,
            handle = %handle,
            pid = child.id(),
            "sandbox process spawned"
        );

        let sandbox = Sandbox {
            name: spec.name.clone(),
            child: tokio::sync::Mutex::new(child),
            pipe: tokio::sync::Mutex::new(FramedPipe::new(stdout, stdin)),
            logs,
            log_task,
        };
        self.sandboxes.lock().insert(handle.clone(), Arc::new(sandbox));

        Ok(handle)
    }

    async fn run_init(&self, handle: &SandboxHandle, action: &ActionDescriptor) -> Result<InitResult> {
        let request = Request::Init {
            main: action.main.clone(),
            code: action.code.clone(),
        };
        match self.request(handle, &request).await? {
            Response::Init(result) => Ok(result),
            Response::Error { message } => Err(SkiffError::Init(message)),
            Response::Run(_) => Err(SkiffError::Protocol("expected init response".into())),
        }
    }

    async fn run(
        &self,
        handle: &SandboxHandle,
        payload: &serde_json::Value,
        activation_id: ActivationId,
    ) -> Result<RunResult> {
        let request = Request::Run {
            payload: payload.clone(),
            activation_id,
        };
        match self.request(handle, &request).await? {
            Response::Run(result) => Ok(result),
            Response::Error { message } => Err(SkiffError::Driver(message)),
            Response::Init(_) => Err(SkiffError::Protocol("expected run response".into())),
        }
    }

    async fn get_logs(&self, handle: &SandboxHandle) -> Result<String> {
        Ok(self.get(handle)?.logs.lock().clone())
    }

    async fn is_healthy(&self, handle: &SandboxHandle) -> bool {
        let Ok(sandbox) = self.get(handle) else {
            return false;
        };
        let mut child = sandbox.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        let sandbox = self
            .sandboxes
            .lock()
            .remove(handle)
            .ok_or_else(|| SkiffError::UnknownContainer(handle.to_string()))?;

        let mut child = sandbox.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            child.kill().await?;
        }
        sandbox.log_task.abort();
        tracing::debug!(container = %sandbox.name, handle = %handle, "sandbox process destroyed");

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper(name: &str) -> CreateSpec {
        CreateSpec::new(name, "sh").args(["-c", "echo started >&2; sleep 30"])
    }

    #[tokio::test]
    async fn spawn_check_and_destroy() {
        let driver = ProcessDriver::new();
        let handle = driver.create(&sleeper("t1")).await.unwrap();
        assert!(driver.is_healthy(&handle).await);

        driver.destroy(&handle).await.unwrap();
        assert!(!driver.is_healthy(&handle).await);
        assert!(matches!(
            driver.destroy(&handle).await,
            Err(SkiffError::UnknownContainer(_))
        ));
    }

    #[tokio::test]
    async fn stderr_becomes_logs() {
        let driver = ProcessDriver::new();
        let handle = driver.create(&sleeper("t2")).await.unwrap();

        let mut logs = String::new();
        for _ in 0..50 {
            logs = driver.get_logs(&handle).await.unwrap();
            if !logs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(logs, "started\n");
        driver.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn exited_process_is_unhealthy() {
        let driver = ProcessDriver::new();
        let handle = driver
            .create(&CreateSpec::new("t3", "sh").args(["-c", "exit 0"]))
            .await
            .unwrap();

        let mut healthy = true;
        for _ in 0..50 {
            healthy = driver.is_healthy(&handle).await;
            if !healthy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!healthy);
        driver.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_is_a_create_error() {
        let driver = ProcessDriver::new();
        let err = driver
            .create(&CreateSpec::new("t4", "/nonexistent/skiff-image"))
            .await
            .unwrap_err();
        assert!(matches!(err, SkiffError::Create { .. }));
    }
}
