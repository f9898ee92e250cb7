// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provisioning and teardown of virtual-machine clusters.
//!
//! # Provisioning Architecture
//!
//! A provisioning run is a single pass over a fixed sequence of states:
//!
//! 1. **Ensure** - Get-or-create every resource the state owns ([`ensure`])
//! 2. **Gate** - Wait for the platform to report the change ([`readiness`])
//! 3. **Advance** - Log the transition and move to the next state ([`cluster`])
//!
//! Version conflicts on read-modify-write updates are retried with backoff
//! ([`retry`]). Teardown deletes what a run created ([`teardown`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use kvcluster::config::{ClusterSpec, ProvisionConfig};
//! use kvcluster::platform::KubePlatform;
//! use kvcluster::reconcilers::provision_cluster;
//! use std::path::Path;
//!
//! async fn run(client: kube::Client) -> anyhow::Result<()> {
//!     let spec = ClusterSpec::load(Path::new("cluster.yaml")).await?;
//!     let platform = KubePlatform::new(client);
//!     let report = provision_cluster(&platform, &spec, &ProvisionConfig::default()).await?;
//!     println!("inventory written to {:?}", report.inventory_path);
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod ensure;
pub mod readiness;
pub mod retry;
pub mod teardown;

pub use cluster::{provision_cluster, ProvisionReport, ProvisionState};
pub use teardown::{teardown, TeardownReport};
