// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;
use kvcluster::{
    config::{ClusterSpec, ProvisionConfig},
    constants::GATE_POLL_INTERVAL,
    platform::KubePlatform,
    reconcilers::{provision_cluster, teardown},
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// kvcluster - provision Kubernetes clusters on KubeVirt virtual machines
#[derive(Parser, Debug)]
#[command(name = "kvcluster")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision the cluster described by a definition file
    Create {
        /// Cluster definition file
        #[arg(short = 'f', long)]
        file: PathBuf,

        /// Seconds to wait for each readiness condition (unbounded if omitted)
        #[arg(long, value_name = "SECONDS")]
        gate_timeout: Option<u64>,

        /// Seconds between re-lists while waiting for a condition
        #[arg(long, value_name = "SECONDS", default_value_t = GATE_POLL_INTERVAL.as_secs())]
        poll_interval: u64,
    },
    /// Delete every resource of a cluster and its namespace
    Delete {
        /// Namespace of the cluster
        namespace: String,
    },
}

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("kvcluster")
        .enable_all()
        .build()?;

    let cli = Cli::parse();
    runtime.block_on(async_main(cli))
}

fn init_tracing() {
    // Respects RUST_LOG, defaulting to INFO, and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    init_tracing();
    debug!("Logging initialized with file and line number tracking");

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping without cleanup");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "kvcluster failed");
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    debug!("Initializing Kubernetes client");
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let platform = KubePlatform::new(client);

    match cli.command {
        Commands::Create {
            file,
            gate_timeout,
            poll_interval,
        } => {
            let spec = ClusterSpec::load(&file).await?;
            let config = provision_config(gate_timeout, poll_interval);
            info!(file = %file.display(), cluster = %spec.name, "Creating cluster");

            let report = provision_cluster(&platform, &spec, &config).await?;
            info!(
                state = %report.state,
                instances = report.instances,
                created = report.total_created(),
                service = ?report.service_address,
                inventory = ?report.inventory_path,
                deployer = ?report.deployer_path,
                "Cluster ready"
            );
        }
        Commands::Delete { namespace } => {
            let report = teardown(&platform, &namespace).await?;
            info!(namespace = %namespace, deleted = ?report.deleted, "Cluster deleted");
        }
    }
    Ok(())
}

fn provision_config(gate_timeout: Option<u64>, poll_interval: u64) -> ProvisionConfig {
    ProvisionConfig {
        gate_timeout: gate_timeout.map(Duration::from_secs),
        gate_poll_interval: Duration::from_secs(poll_interval.max(1)),
        ..ProvisionConfig::default()
    }
}
