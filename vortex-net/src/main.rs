//! vortex-net: create and delete Open vSwitch bridge fabrics across a cluster.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vortex_net::audit::create_audit_logger;
use vortex_net::{
    Cluster, ClusterFile, ExecutionMode, FabricConfig, FabricError, Network, NetworkController,
    validate,
};

#[derive(Parser, Debug)]
#[command(name = "vortex-net", version, about)]
struct Cli {
    /// Cluster description (node addresses, workloads)
    #[arg(short, long)]
    cluster: Option<PathBuf>,

    /// Deadline for a single node call, in seconds
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    node_timeout_secs: u64,

    /// Run per-node steps concurrently instead of in list order
    #[arg(long)]
    concurrent: bool,

    /// OVSDB TCP port on remote nodes (overrides the cluster file)
    #[arg(long)]
    ovsdb_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a network descriptor without touching any node
    Validate {
        /// Network descriptor (JSON)
        network: PathBuf,
    },
    /// Create the network's bridge on every node
    Create { network: PathBuf },
    /// Delete the network's bridge from every node
    Delete { network: PathBuf },
    /// Show the bridge as found on every node
    Inspect { network: PathBuf },
    /// List running workloads attached to the network
    Status { network: PathBuf },
}

fn load_network(path: &Path) -> Result<Network> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read network {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse network {}", path.display()))
}

fn controller(cli: &Cli) -> Result<NetworkController> {
    let Some(path) = &cli.cluster else {
        bail!("--cluster is required for this command");
    };
    let mut file = ClusterFile::load(path)?;
    if let Some(port) = cli.ovsdb_port {
        file.ovsdb_port = port;
    }

    let execution = if cli.concurrent {
        ExecutionMode::Concurrent
    } else {
        ExecutionMode::Sequential
    };
    let config = FabricConfig::default()
        .with_node_timeout(Duration::from_secs(cli.node_timeout_secs))
        .with_execution(execution);

    info!(
        cluster = %path.display(),
        nodes = file.nodes.len(),
        execution = ?execution,
        "Loaded cluster"
    );

    let cluster = Cluster::from_file(&file, config).with_audit(create_audit_logger("vortex-net"));
    Ok(NetworkController::new(cluster))
}

fn report(err: FabricError) -> anyhow::Error {
    if let FabricError::PartialFailure {
        compensated,
        compensation_errors,
        ..
    } = &err
    {
        if !compensated.is_empty() {
            error!(nodes = %compensated.join(", "), "Rolled back");
        }
        for failure in compensation_errors {
            error!(node = %failure.node, error = %failure.error, "Rollback failed, bridge left behind");
        }
    }
    anyhow::Error::new(err)
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Validate { network } => {
            let network = load_network(network)?;
            validate(&network)?;
            println!("{}: ok", network.name);
        }
        Commands::Create { network } => {
            let network = load_network(network)?;
            let controller = controller(&cli)?;
            controller.create(&network).await.map_err(report)?;
            println!("{}: created bridge {}", network.name, network.bridge_name);
        }
        Commands::Delete { network } => {
            let network = load_network(network)?;
            let controller = controller(&cli)?;
            controller.delete(&network).await.map_err(report)?;
            println!("{}: deleted bridge {}", network.name, network.bridge_name);
        }
        Commands::Inspect { network } => {
            let network = load_network(network)?;
            let controller = controller(&cli)?;
            for r in controller.inspect(&network).await? {
                match &r.bridge {
                    Ok(Some(info)) => println!(
                        "{}\t{}\tdatapath={}\ttrunks={:?}\tports={}",
                        r.node,
                        info.name,
                        info.datapath_type.map(|d| d.as_str()).unwrap_or("?"),
                        info.trunks,
                        info.ports.join(",")
                    ),
                    Ok(None) => println!("{}\t-\tabsent", r.node),
                    Err(e) => println!("{}\t-\terror: {}", r.node, e),
                }
            }
        }
        Commands::Status { network } => {
            let network = load_network(network)?;
            let controller = controller(&cli)?;
            let workloads = controller.status(&network).await?;
            if workloads.is_empty() {
                println!("{}: not in use", network.name);
            } else {
                println!("{}: in use by {}", network.name, workloads.join(", "));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vortex_net=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let cli = Cli::parse_from([
            "vortex-net",
            "--cluster",
            "cluster.json",
            "--concurrent",
            "create",
            "net.json",
        ]);
        assert!(cli.concurrent);
        assert_eq!(cli.node_timeout_secs, 30);
        assert_eq!(cli.ovsdb_port, None);
        assert!(matches!(cli.command, Commands::Create { .. }));
    }

    #[test]
    fn test_zero_node_timeout_rejected() {
        let res = Cli::try_parse_from(["vortex-net", "--node-timeout-secs", "0", "validate", "n.json"]);
        assert!(res.is_err());

        let cli =
            Cli::try_parse_from(["vortex-net", "--node-timeout-secs", "1", "validate", "n.json"])
                .unwrap();
        assert_eq!(cli.node_timeout_secs, 1);
    }
}
