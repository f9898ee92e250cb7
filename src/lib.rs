// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # kvcluster - Virtual-Machine Cluster Provisioner for Kubernetes
//!
//! kvcluster turns a short cluster definition into a set of KubeVirt virtual
//! machines attached to Contrail overlay networks, waits for them to come up,
//! and writes the host inventory consumed by the Kubernetes deployment tooling.
//!
//! ## Modules
//!
//! - [`config`] - Cluster definition and run configuration
//! - [`platform`] - Uniform access to the Kubernetes resources a run manages
//! - [`crd`] - Custom resource types (network attachments, networks, instances)
//! - [`resources`] - Builders for every object a run submits
//! - [`cloudinit`] - Instance boot configuration
//! - [`reconcilers`] - Provisioning state machine, readiness gates and teardown
//! - [`network`] - Classification of instance addresses
//! - [`inventory`] - Host inventory synthesis and rendering
//! - [`deployer`] - Network deployment manifest rendering
//!
//! ## Example
//!
//! ```rust,no_run
//! use kvcluster::config::ClusterSpec;
//!
//! let spec = ClusterSpec::from_yaml(
//!     "name: demo\nnamespace: demo\ncontroller: 1\nworker: 2\n\
//!      subnet: 10.0.0.0/24\nmemory: 4Gi\ncpu: \"2\"\nimage: ubuntu:20.04\n",
//! )
//! .unwrap();
//! assert_eq!(spec.instance_count(), 3);
//! ```

pub mod cloudinit;
pub mod config;
pub mod constants;
pub mod crd;
pub mod deployer;
pub mod errors;
pub mod inventory;
pub mod labels;
pub mod network;
pub mod platform;
pub mod reconcilers;
pub mod resources;

#[cfg(test)]
pub(crate) mod fake_platform;
