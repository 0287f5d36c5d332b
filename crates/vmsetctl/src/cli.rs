//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vmset_service::compute::SnapshotClient;
use vmset_service::config::Config;
use vmset_service::metrics;
use vmset_service::provider_id::ProviderId;
use vmset_service::store::{StoreOptions, VmSetStore};
use vmset_service::vmset::VmSet;

use crate::logging;
use crate::output::{self, LookupOutput, NodeOutput, ParsedProviderId, VmSummary};

/// Queries the VM set store.
#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a node provider ID without looking anything up.
    Parse {
        /// The provider ID, as found in the `spec.providerID` of a node.
        provider_id: String,
    },

    /// Look up the VM behind a node provider ID.
    Lookup {
        /// Path to a JSON snapshot of the compute resources.
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,
        provider_id: String,
    },

    /// Describe the VM backing a node.
    Node {
        /// Path to a JSON snapshot of the compute resources.
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,
        node: String,
    },

    /// List the distinct VM sets a group of nodes belongs to.
    Pools {
        /// Path to a JSON snapshot of the compute resources.
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,
        #[arg(required = true)]
        nodes: Vec<String>,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(name = "vmsetctl", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    logging::init_logging(&config);
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("vmsetctl")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    let output = runtime.block_on(run(cli.command, &config))?;
    println!("{output}");

    Ok(())
}

async fn open_vm_set(config: &Config, snapshot: &Path) -> Result<VmSet> {
    let client = Arc::new(
        SnapshotClient::open(snapshot)
            .await
            .with_context(|| format!("failed to open snapshot {}", snapshot.display()))?,
    );
    let store = VmSetStore::new(config, client.clone(), client);
    Ok(VmSet::new(store))
}

/// Runs a single command and returns its output as pretty JSON.
async fn run(command: Command, config: &Config) -> Result<String> {
    match command {
        Command::Parse { provider_id } => {
            let id = ProviderId::parse(&provider_id)?;
            output::to_json(&ParsedProviderId::new(&id))
        }
        Command::Lookup {
            snapshot,
            provider_id,
        } => {
            let vm_set = open_vm_set(config, &snapshot).await?;
            let vm = vm_set
                .vm_by_provider_id(&provider_id, StoreOptions::default())
                .await
                .with_context(|| format!("failed to look up {provider_id}"))?;
            let node_name = vm_set.node_name_by_provider_id(&provider_id).await?;
            let cidr_masks = vm_set.node_cidr_masks_by_provider_id(&provider_id).await?;

            output::to_json(&LookupOutput {
                vm: VmSummary::new(&vm),
                node_name,
                cidr_masks,
            })
        }
        Command::Node { snapshot, node } => {
            let vm_set = open_vm_set(config, &snapshot).await?;
            let vm = vm_set
                .store()
                .get_vm_by_name(&node, StoreOptions::default())
                .await
                .with_context(|| format!("failed to look up node {node}"))?;

            output::to_json(&NodeOutput {
                node: &node,
                vm: VmSummary::new(&vm),
                instance_type: vm_set.instance_type_by_node_name(&node).await?,
                power_status: vm_set.power_status_by_node_name(&node).await?,
                vm_set_name: vm_set.node_vm_set_name(&node).await?,
            })
        }
        Command::Pools { snapshot, nodes } => {
            let vm_set = open_vm_set(config, &snapshot).await?;
            let names = vm_set.agent_pool_vm_set_names(&nodes).await?;
            output::to_json(&names)
        }
    }
}
