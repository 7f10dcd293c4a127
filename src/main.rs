//! comfy-deploy - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_deploy::{
    DeployConfig, DeployError, FailurePolicy, HfBackend, ImageRecipe, ImageRole, Launcher,
    Manifest, PrepareJob, SystemAppProcess, api, download, gpu, manifest, metrics, mirror,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;

#[derive(Parser, Debug)]
#[command(name = "comfy-deploy")]
#[command(about = "Prepare and serve ComfyUI on GPU containers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, global = true, default_value = "json")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download every model in the model list into the cache volume
    Prepare {
        #[arg(long)]
        models_file: Option<PathBuf>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,

        #[arg(long, value_enum)]
        failure_policy: Option<FailurePolicy>,

        #[arg(long, value_enum)]
        hf_backend: Option<HfBackend>,

        /// Log downloads instead of running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Link the cache into the app model directory and run the web application
    Serve {
        #[arg(long)]
        port: Option<u16>,

        /// Status endpoint port, 0 disables it
        #[arg(long)]
        status_port: Option<u16>,
    },

    /// Only link the cache volume into the app model directory
    Mirror {
        #[arg(long)]
        source: Option<PathBuf>,

        #[arg(long)]
        target: Option<PathBuf>,

        /// Print the resulting links
        #[arg(long)]
        list: bool,
    },

    /// Render the container image recipe for a job role
    Image {
        #[arg(long, value_enum)]
        role: ImageRole,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print how each model list entry would be dispatched
    Check {
        #[arg(long)]
        models_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    let mut config = DeployConfig::load(cli.config)?;

    match cli.command {
        Commands::Prepare {
            models_file,
            cache_dir,
            failure_policy,
            hf_backend,
            dry_run,
        } => {
            if let Some(path) = models_file {
                config.models_file = path;
            }
            if let Some(dir) = cache_dir {
                config.cache_dir = dir;
            }
            if let Some(policy) = failure_policy {
                config.download.failure_policy = policy;
            }
            if let Some(backend) = hf_backend {
                config.download.hf_backend = backend;
            }
            config.validate()?;
            run_prepare(config, dry_run).await
        }
        Commands::Serve { port, status_port } => {
            if let Some(port) = port {
                config.serve.port = port;
            }
            if let Some(port) = status_port {
                config.serve.status_port = port;
            }
            config.validate()?;
            run_serve(config).await
        }
        Commands::Mirror {
            source,
            target,
            list,
        } => {
            if let Some(dir) = source {
                config.cache_dir = std::path::absolute(dir)?;
            }
            if let Some(dir) = target {
                config.models_dir = std::path::absolute(dir)?;
            }
            config.validate()?;

            let report = mirror::mirror_tree(&config.cache_dir, &config.models_dir)?;
            if list {
                for (link, points_to) in mirror::list_links(&config.cache_dir, &config.models_dir) {
                    println!("{} -> {}", link.display(), points_to.display());
                }
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Image { role, output } => {
            let plugins = manifest::load_plugins(&config.image.nodes_file)?;
            let text = ImageRecipe::for_role(role, &config, &plugins)?.render();
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("Failed to write image recipe: {:?}", path))?,
                None => print!("{}", text),
            }
            Ok(())
        }
        Commands::Check { models_file } => {
            let path = models_file.unwrap_or(config.models_file);
            let manifest = Manifest::load(&path)?;
            let plugins = manifest::load_plugins(&config.image.nodes_file)?;
            let plan = serde_json::json!({
                "models": manifest,
                "plugins": plugins,
            });
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
    }
}

async fn run_prepare(config: DeployConfig, dry_run: bool) -> Result<()> {
    tracing::info!(
        models_file = ?config.models_file,
        cache_dir = ?config.cache_dir,
        hf_backend = ?config.download.hf_backend,
        dry_run = dry_run,
        "Starting preparation job"
    );

    config.credentials.log_presence();
    let prometheus_handle = metrics::setup_metrics()?;

    let manifest = Manifest::load(&config.models_file)?;
    let downloader = download::from_config(&config, dry_run)?;
    let job = PrepareJob::new(
        downloader,
        config.cache_dir.clone(),
        config.download.failure_policy,
    );

    let outcome = job.run(&manifest).await;
    metrics::log_snapshot(&prometheus_handle);

    let report = outcome?;
    tracing::info!(report = %serde_json::to_string(&report)?, "Preparation report");
    report.into_result()?;

    Ok(())
}

async fn run_serve(config: DeployConfig) -> Result<()> {
    tracing::info!(
        cache_dir = ?config.cache_dir,
        models_dir = ?config.models_dir,
        port = config.serve.port,
        "Starting serving job"
    );

    let inventory = gpu::detect();
    gpu::preflight(&inventory, config.serve.require_gpu)?;
    config.credentials.log_presence();

    let prometheus_handle = metrics::setup_metrics()?;

    let launcher = Launcher::new(&config.serve, Arc::new(SystemAppProcess::new()));
    let mirror_state = Arc::new(RwLock::new(api::MirrorState::Pending));

    let status_handle = if config.serve.status_port != 0 {
        let app = api::create_router(api::AppState {
            app_status: launcher.status.clone(),
            mirror: mirror_state.clone(),
            prometheus_handle,
        });

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.serve.status_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind status server")?;
        tracing::info!(addr = %addr, "Starting status server");

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Status server error");
            }
        }))
    } else {
        None
    };

    // Link the cache before the app scans its model directory
    let (source, target) = (config.cache_dir.clone(), config.models_dir.clone());
    match tokio::task::spawn_blocking(move || mirror::mirror_tree(&source, &target))
        .await
        .context("Mirror task panicked")?
    {
        Ok(report) => *mirror_state.write().await = api::MirrorState::Done(report),
        Err(DeployError::MirrorSourceMissing(path)) => {
            tracing::warn!(path = ?path, "Model cache not mounted, starting without cached models");
            *mirror_state.write().await = api::MirrorState::SourceMissing(path);
        }
        Err(e) => return Err(e.into()),
    }

    let result = launcher.run(shutdown_signal()).await;

    if let Some(handle) = status_handle {
        handle.abort();
    }

    tracing::info!("Shutdown complete");
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
