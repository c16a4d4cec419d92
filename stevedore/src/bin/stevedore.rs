use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use stevedore::build::{BuildStage, BundleConfig, DEFAULT_CONCURRENCY, SyncConfig};
use stevedore::launcher::{
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT, DrainOutcome, LaunchConfig, Launcher,
    TrustedProxyPolicy,
};
use stevedore::{StevedoreError, logging};

#[derive(Parser)]
#[command(name = "stevedore", version)]
#[command(about = "Lock-pinned dependency sync and a gracefully draining launcher", long_about = None)]
struct Cli {
    /// Also write logs to a daily-rolling file in this directory.
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install exactly the lock-pinned dependency versions.
    Sync(SyncArgs),
    /// Sync, then copy the application bundle into the working directory.
    Build {
        #[command(flatten)]
        sync: SyncArgs,

        #[arg(long, value_name = "DIR")]
        app_source: PathBuf,

        #[arg(long, value_name = "DIR", default_value = ".")]
        app_dest: PathBuf,
    },
    /// Launch a registered application and serve until terminated.
    Serve(ServeArgs),
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long, value_name = "DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Lock file [default: <project-dir>/stevedore.lock]
    #[arg(long, value_name = "FILE")]
    lock: Option<PathBuf>,

    /// Project descriptor [default: <project-dir>/project.toml]
    #[arg(long, value_name = "FILE")]
    descriptor: Option<PathBuf>,

    /// Runtime-environment prefix [default: <project-dir>/.stevedore-env]
    #[arg(long, value_name = "PREFIX", env = "STEVEDORE_PROJECT_ENVIRONMENT")]
    environment: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Keep installed packages the lock no longer pins.
    #[arg(long)]
    inexact: bool,
}

impl SyncArgs {
    fn into_config(self) -> SyncConfig {
        let mut config = SyncConfig::for_project(&self.project_dir);
        if let Some(lock) = self.lock {
            config.lock_path = lock;
        }
        if let Some(descriptor) = self.descriptor {
            config.descriptor_path = descriptor;
        }
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        config.concurrency = self.concurrency;
        config.exact = !self.inexact;
        config
    }
}

#[derive(Args)]
struct ServeArgs {
    /// Application reference, `module:attr`.
    entry_point: String,

    #[arg(long, env = "STEVEDORE_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "STEVEDORE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Trust X-Forwarded-For / X-Forwarded-Proto from upstream proxies.
    #[arg(long)]
    proxy_headers: bool,

    /// Comma-separated peers (addresses or CIDR ranges) trusted to set
    /// forwarded headers; `*` trusts all.
    #[arg(long, value_name = "LIST", env = "FORWARDED_ALLOW_IPS")]
    forwarded_allow_ips: Option<String>,

    /// Seconds in-flight connections may run after termination begins.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_DRAIN_TIMEOUT.as_secs())]
    drain_timeout: u64,

    /// Change into this directory before resolving the application.
    #[arg(long, value_name = "DIR")]
    app_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn into_config(self) -> Result<LaunchConfig> {
        let proxy = match (self.proxy_headers, self.forwarded_allow_ips.as_deref()) {
            (false, Some(_)) => {
                tracing::warn!("Forwarded allow list given without --proxy-headers; headers stay ignored");
                TrustedProxyPolicy::Disabled
            }
            (false, None) => TrustedProxyPolicy::Disabled,
            (true, None) => TrustedProxyPolicy::AnyPeer,
            (true, Some(list)) => TrustedProxyPolicy::from_allow_list(list)?,
        };

        Ok(LaunchConfig {
            entry_point: self.entry_point,
            host: self.host,
            port: self.port,
            proxy,
            drain_timeout: Duration::from_secs(self.drain_timeout),
            app_dir: self.app_dir,
            ..LaunchConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match logging::init_logging(cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("stevedore: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Sync(args) => {
            let stage = BuildStage::new(args.into_config())?;
            stage.sync_locked().await.context("sync failed")?;
        }
        Command::Build {
            sync,
            app_source,
            app_dest,
        } => {
            let stage = BuildStage::new(sync.into_config())?;
            stage
                .build(BundleConfig::new(app_source, app_dest))
                .await
                .context("build failed")?;
        }
        Command::Serve(args) => {
            let server = Launcher::new(args.into_config()?)?
                .start()
                .await
                .context("startup failed")?;
            let report = server.serve().await?;
            if report.outcome == DrainOutcome::Forced {
                tracing::warn!(abandoned = report.abandoned, "Shutdown was forced");
            }
        }
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<StevedoreError>()
        .map(|e| e.class().exit_code())
        .unwrap_or(1)
}
