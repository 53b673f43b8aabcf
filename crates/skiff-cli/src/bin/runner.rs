//! skiff-runner - Python action runner that lives inside a sandbox
//!
//! Speaks the skiff frame protocol on stdin/stdout. Action output on stderr
//! (and this runner's own logs) end up in the container's logs.

use anyhow::Result;
use skiff_core::pipe::FramedPipe;
use skiff_core::protocol::{Request, Response};
use skiff_core::{ActivationId, InitResult, RunResult};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing_subscriber::EnvFilter;

/// Action code loaded by `Init`
struct LoadedAction {
    main: String,
    code: String,
}

struct RunnerConfig {
    interpreter: String,
    run_timeout: Duration,
}

impl RunnerConfig {
    fn from_env() -> Self {
        Self {
            interpreter: std::env::var("SKIFF_INTERPRETER").unwrap_or_else(|_| "python3".into()),
            run_timeout: std::env::var("SKIFF_RUN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(Duration::from_secs(60), Duration::from_secs),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries frames, so logs must go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("skiff=info".parse()?))
        .init();

    let config = RunnerConfig::from_env();
    let mut pipe = FramedPipe::new(tokio::io::stdin(), tokio::io::stdout());
    let mut action: Option<LoadedAction> = None;

    tracing::info!(
        container = std::env::var("SKIFF_CONTAINER").unwrap_or_default(),
        interpreter = %config.interpreter,
        "runner ready"
    );

    while let Some(request) = pipe.recv::<Request>().await? {
        let response = match request {
            Request::Init { .. } if action.is_some() => Response::Error {
                message: "action already initialized".into(),
            },
            Request::Init { main, code } => {
                let (result, loaded) = init(&config, main, code).await;
                action = loaded;
                Response::Init(result)
            }
            Request::Run {
                payload,
                activation_id,
            } => match &action {
                Some(loaded) => Response::Run(run(&config, loaded, &payload, activation_id).await),
                None => Response::Error {
                    message: "action not initialized".into(),
                },
            },
        };
        pipe.send(&response).await?;
    }

    tracing::info!("driver closed the channel, exiting");
    Ok(())
}

/// Check the code compiles and remember it.
async fn init(
    config: &RunnerConfig,
    main: String,
    code: String,
) -> (InitResult, Option<LoadedAction>) {
    let start = Instant::now();

    if main.is_empty() || !main.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return (
            InitResult::failure(start.elapsed(), format!("invalid entry point {main:?}")),
            None,
        );
    }

    let check = "import sys; compile(sys.stdin.read(), '<action>', 'exec')";
    match interpret(config, check, code.as_bytes(), config.run_timeout).await {
        Ok(output) if output.status.success() => {
            tracing::info!(main = %main, code_len = code.len(), "action initialized");
            (
                InitResult::success(start.elapsed()),
                Some(LoadedAction { main, code }),
            )
        }
        Ok(output) => (
            InitResult::failure(
                start.elapsed(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            None,
        ),
        Err(e) => (InitResult::failure(start.elapsed(), e.to_string()), None),
    }
}

async fn run(
    config: &RunnerConfig,
    action: &LoadedAction,
    payload: &serde_json::Value,
    activation_id: ActivationId,
) -> RunResult {
    let start = Instant::now();
    let script = format!(
        "{}\n\nimport json as _json, sys as _sys\n_sys.stdout.write(_json.dumps({}(_json.load(_sys.stdin))))\n",
        action.code, action.main
    );
    tracing::debug!(activation = %activation_id, "running action");

    let input = payload.to_string();
    match interpret(config, &script, input.as_bytes(), config.run_timeout).await {
        Ok(output) => {
            let mut result = RunResult::from_output(
                output.status.code().unwrap_or(-1),
                &output.stdout,
                start.elapsed(),
            );
            // Action stderr belongs in the container logs.
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                tracing::warn!(activation = %activation_id, exit_code = result.exit_code, "action failed");
                result.response = serde_json::json!({ "error": "action exited with an error" });
            }
            result
        }
        Err(InterpretError::TimedOut) => {
            tracing::warn!(activation = %activation_id, "action timed out");
            RunResult {
                timed_out: true,
                duration: start.elapsed(),
                ..RunResult::default()
            }
        }
        Err(e) => RunResult {
            response: serde_json::json!({ "error": e.to_string() }),
            duration: start.elapsed(),
            ..RunResult::default()
        },
    }
}

#[derive(Debug, thiserror::Error)]
enum InterpretError {
    #[error("action timed out")]
    TimedOut,
    #[error("failed to run interpreter: {0}")]
    Io(#[from] std::io::Error),
}

async fn interpret(
    config: &RunnerConfig,
    script: &str,
    stdin: &[u8],
    limit: Duration,
) -> std::result::Result<std::process::Output, InterpretError> {
    let mut child = Command::new(&config.interpreter)
        .arg("-c")
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Feed stdin while draining stdout/stderr, all under the time limit.
    let input = child.stdin.take();
    let exchange = async move {
        let feed = async move {
            if let Some(mut pipe) = input {
                pipe.write_all(stdin).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        if let Err(e) = fed {
            // The script is free to exit without reading its input.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(InterpretError::Io(e));
            }
        }
        Ok(output?)
    };

    match tokio::time::timeout(limit, exchange).await {
        Ok(result) => result,
        Err(_) => Err(InterpretError::TimedOut),
    }
}
