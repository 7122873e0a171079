use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kube::core::DynamicObject;
use maintenance_supervisor::controller::{
    self, cancel_pair, status_field, wait_for, wait_for_deletion, KubeStore, ObjectKey,
    PollOptions,
};
use maintenance_supervisor::crd::KindRegistry;
use maintenance_supervisor::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the supervisor
    Run(RunArgs),
    /// Show version information
    Version,
    /// Wait until an object reaches a status value, or is deleted
    Wait(WaitArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator namespace
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Only supervise MaintenanceWindows in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Approve every valid spec generation without waiting for an annotation
    #[arg(long, env = "AUTO_APPROVE")]
    auto_approve: bool,

    /// Port of the REST API
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    api_port: u16,
}

#[derive(Parser, Debug)]
struct WaitArgs {
    /// Registered kind, e.g. MongoDB, Postgres, MaintenanceWindow
    kind: String,

    /// Object name
    name: String,

    /// Object namespace
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Field under `status` to compare
    #[arg(long, default_value = "phase")]
    field: String,

    /// Value the status field must reach
    #[arg(long, default_value = controller::PHASE_READY)]
    equals: String,

    /// Wait for the object to disappear instead
    #[arg(long, conflicts_with_all = ["field", "equals"])]
    deleted: bool,

    /// Seconds between checks
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 1)]
    interval: u64,

    /// Seconds before giving up
    #[arg(long, env = "POLL_TIMEOUT_SECS", default_value_t = 600)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Maintenance Supervisor v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Wait(wait_args) => {
            init_tracing(args.log_format);
            run_wait(wait_args).await
        }
        Commands::Run(run_args) => {
            init_tracing(args.log_format);
            run_supervisor(run_args).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .init(),
    }
}

async fn run_wait(args: WaitArgs) -> Result<(), Error> {
    let registry = KindRegistry::with_defaults()?;
    let entry = registry.get(&args.kind).ok_or_else(|| {
        Error::ConfigError(format!(
            "unknown kind {}; known kinds: {}",
            args.kind,
            registry.kinds().collect::<Vec<_>>().join(", ")
        ))
    })?;

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    let store = KubeStore::dynamic(client, entry.resource.clone());
    let key = ObjectKey::new(&args.namespace, &args.name);
    let opts = PollOptions::new(
        Duration::from_secs(args.interval),
        Duration::from_secs(args.timeout),
    );

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling wait");
            handle.cancel();
        }
    });

    if args.deleted {
        wait_for_deletion::<DynamicObject, _>(&store, &key, &opts, &token).await?;
        info!("{} {} is gone", entry.resource.kind, key);
    } else {
        let field = args.field.as_str();
        let expected = args.equals.as_str();
        wait_for(&store, &key, &opts, &token, |obj: &DynamicObject| {
            Ok(status_field(obj, field) == Some(expected))
        })
        .await?;
        info!(
            "{} {} reached status.{} = {}",
            entry.resource.kind, key, field, expected
        );
    }

    Ok(())
}

async fn run_supervisor(args: RunArgs) -> Result<(), Error> {
    info!(
        "Starting Maintenance Supervisor v{} (namespace: {})",
        env!("CARGO_PKG_VERSION"),
        args.namespace
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let state = Arc::new(controller::ControllerState {
        client,
        auto_approve: args.auto_approve,
        watch_namespace: args.watch_namespace,
    });

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = maintenance_supervisor::rest_api::run_server(api_state, port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }
    #[cfg(not(feature = "rest-api"))]
    let _ = args.api_port;

    let result = controller::run_controller(state).await;
    info!("Supervisor stopped");
    result
}
