use clap::{Parser, Subcommand};
use expose_k8s::controller::{
    workload_api, ControllerOptions, ExposeController, ExposureMode,
};
use expose_k8s::Error;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// Show the workloads currently in scope
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace to watch (defaults to all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// How reconciled workloads are exposed
    #[arg(long, env = "EXPOSURE_MODE", value_enum, default_value = "external")]
    exposure: ExposureMode,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "RECONCILE_WORKERS", default_value_t = 1)]
    workers: usize,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to inspect (defaults to all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Expose-K8s Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api = workload_api(client, args.namespace.as_deref());
    let workloads = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Workloads in scope: {}", workloads.items.len());
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!(
        "Starting Expose-K8s Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let options = ControllerOptions {
        namespace: args.namespace,
        mode: args.exposure,
        workers: args.workers,
    };

    ExposeController::new(client, options).run().await
}
