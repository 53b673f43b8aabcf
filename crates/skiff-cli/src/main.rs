//! skiff CLI - Drive a local container pool from the command line

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use skiff_core::config::default_config_path;
use skiff_core::{ActionDescriptor, ActionIdentity, ActivationId, AuthKey, PoolConfig};
use skiff_pool::{ContainerPool, ProcessDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about = "Container pool for short-lived actions")]
struct Cli {
    /// Pool config file (defaults to SKIFF_CONFIG env var, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an action in a fresh container and run one payload
    Invoke {
        /// Action source file (or - for stdin)
        code: PathBuf,

        /// Action name
        #[arg(short, long, default_value = "action")]
        name: String,

        #[arg(long, default_value = "guest")]
        namespace: String,

        #[arg(long, default_value = "1")]
        revision: String,

        /// Entry point inside the action source
        #[arg(short, long, default_value = "main")]
        main: String,

        /// Runtime image; the process driver treats it as a program path
        #[arg(short, long, default_value = "skiff-runner")]
        image: String,

        /// JSON payload handed to the action
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Credential exposed to the container
        #[arg(long, env = "SKIFF_AUTH_KEY", default_value = "")]
        auth_key: String,
    },

    /// Start an ad hoc container from an image and print its logs
    Exec {
        image: String,

        /// Arguments passed to the image
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// How long to let the container run before collecting logs
        #[arg(short, long, default_value = "500")]
        wait_ms: u64,
    },

    /// Print the effective pool config
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("skiff=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.or_else(default_config_path).as_deref())?;

    match cli.command {
        Commands::Invoke {
            code,
            name,
            namespace,
            revision,
            main,
            image,
            payload,
            auth_key,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let mut action = ActionDescriptor::new(
                ActionIdentity::new(namespace, name, revision),
                image,
                read_code(&code)?,
            );
            action.main = main;

            let pool = new_pool(config)?;
            let Some((container, init)) = pool
                .acquire_for_action(&action, &AuthKey::new(auth_key))
                .await
            else {
                bail!("could not start a container for {}", action.identity);
            };

            if let Some(init) = init.filter(|init| !init.ok) {
                let logs = pool.logs(&container).await.unwrap_or_default();
                pool.release(container).await;
                pool.drain().await;
                eprint!("{logs}");
                bail!(
                    "initialization failed: {}",
                    init.error.unwrap_or_else(|| "unknown error".into())
                );
            }

            let outcome = pool.run(&container, &payload, ActivationId::new()).await;
            pool.release(container).await;
            pool.drain().await;

            let result = outcome?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Exec {
            image,
            args,
            wait_ms,
        } => {
            let pool = new_pool(config)?;
            let Some(container) = pool.acquire_by_image(&image, &args).await else {
                bail!("could not start {image}");
            };
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;

            let logs = pool.logs(&container).await;
            pool.release(container).await;
            pool.drain().await;
            print!("{}", logs?);
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PoolConfig> {
    match path {
        // Validated on load.
        Some(path) => PoolConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let config = PoolConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn new_pool(config: PoolConfig) -> Result<ContainerPool> {
    // One-shot commands never live long enough for a sweep to matter.
    let config = PoolConfig {
        gc_enabled: false,
        ..config
    };
    Ok(ContainerPool::new(config, Arc::new(ProcessDriver::new()))?)
}

fn read_code(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return std::io::read_to_string(std::io::stdin()).context("reading action from stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
