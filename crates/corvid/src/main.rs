use clap::{Parser, Subcommand};
use corvid_client::HttpClusterClient;
use corvid_scheduler::{ConfigFactory, FactoryConfig, Policy, Scheduler, DEFAULT_PROVIDER};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "corvid", about = "Corvid pod scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the cluster and bind unassigned pods to nodes
    Run {
        /// Base URL of the API server
        #[arg(long, env = "CORVID_API_URL", default_value = "http://127.0.0.1:6443")]
        api_url: String,
        /// Registered algorithm provider to use
        #[arg(long, default_value = DEFAULT_PROVIDER, conflicts_with = "policy_config_file")]
        algorithm_provider: String,
        /// Policy file (JSON, or YAML for .yaml/.yml) selecting predicates and priorities
        #[arg(long, env = "CORVID_POLICY_CONFIG_FILE")]
        policy_config_file: Option<PathBuf>,
        /// Relist every cached collection this often; 0 disables resync
        #[arg(long, default_value_t = 0)]
        resync_period_secs: u64,
        /// Poll nodes this often instead of watching them; 0 watches
        #[arg(long, default_value_t = 0)]
        node_poll_period_secs: u64,
    },
    /// Parse and validate a policy file without contacting the cluster
    CheckPolicy {
        /// Policy file to check
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            api_url,
            algorithm_provider,
            policy_config_file,
            resync_period_secs,
            node_poll_period_secs,
        } => {
            let config = FactoryConfig {
                resync_period: Duration::from_secs(resync_period_secs),
                node_poll_period: Duration::from_secs(node_poll_period_secs),
                ..Default::default()
            };
            run_scheduler(
                &api_url,
                &algorithm_provider,
                policy_config_file.as_deref(),
                config,
            )
            .await
        }
        Commands::CheckPolicy { path } => check_policy(&path),
    }
}

/// Run the scheduler until ctrl-c
async fn run_scheduler(
    api_url: &str,
    algorithm_provider: &str,
    policy_config_file: Option<&std::path::Path>,
    config: FactoryConfig,
) -> miette::Result<()> {
    info!("Starting corvid scheduler against {}", api_url);

    let client = Arc::new(HttpClusterClient::new(api_url));
    let mut factory = ConfigFactory::new(client, config);

    let scheduler_config = match policy_config_file {
        Some(path) => {
            let policy = Policy::from_file(path)
                .map_err(|e| miette::miette!("Failed to load policy: {}", e))?;
            factory.create_from_config(&policy)
        }
        None => factory.create_from_provider(algorithm_provider),
    }
    .map_err(|e| miette::miette!("Failed to create scheduler: {}", e))?;

    let scheduler = Scheduler::new(scheduler_config);
    let config = scheduler.config().clone();
    let scheduler_handle = scheduler.spawn();

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        config.shutdown().await;
        let _ = scheduler_handle.await;
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

fn check_policy(path: &std::path::Path) -> miette::Result<()> {
    let policy = Policy::from_file(path)
        .map_err(|e| miette::miette!("Failed to load policy: {}", e))?;
    policy
        .validate()
        .map_err(|e| miette::miette!("{}", e))?;

    info!(
        "Policy {} is valid ({} predicates, {} priorities)",
        path.display(),
        policy.predicates.len(),
        policy.priorities.len()
    );
    Ok(())
}
