// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster definition and run configuration.
//!
//! A [`ClusterSpec`] is loaded once from a YAML file and never mutated. The
//! [`ProvisionConfig`] carries everything else the orchestrator needs for a run
//! (readiness deadlines, polling cadence) and is passed explicitly into
//! [`crate::reconcilers::provision_cluster`].
//!
//! # Example
//!
//! ```yaml
//! name: demo
//! namespace: demo
//! controller: 3
//! worker: 2
//! subnet: 10.0.0.0/24
//! ctrldatasubnet: 10.1.0.0/24
//! keypath: ~/.ssh/id_rsa.pub
//! memory: 8Gi
//! cpu: "4"
//! image: ubuntu:20.04
//! suffix: local
//! kubeconfigdir: /tmp/demo
//! distro: ubuntu
//! ```

use crate::constants::{
    CTRL_DATA_SUFFIX, GATE_POLL_INTERVAL, NETWORK_POLL_ATTEMPTS, NETWORK_POLL_INTERVAL,
};
use crate::errors::ProvisionError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Operating system family of the instance image.
///
/// Selects distribution-specific boot configuration (netplan, apt mirror).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    /// Ubuntu images, configured through netplan
    Ubuntu,
    /// CentOS images
    #[default]
    Centos,
}

/// Immutable description of the cluster to provision.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSpec {
    /// Cluster name, also the name of the primary network and the `Service`
    pub name: String,
    /// Namespace holding every resource of the cluster
    pub namespace: String,
    /// Number of control-plane instances
    #[serde(default)]
    pub controller: u32,
    /// Number of worker instances
    #[serde(default)]
    pub worker: u32,
    /// Primary (data-plane) IPv4 subnet in CIDR notation
    pub subnet: String,
    /// Optional secondary control-data IPv4 subnet
    #[serde(default)]
    pub ctrldatasubnet: String,
    /// Path of the SSH public key authorized on every instance
    #[serde(default)]
    pub keypath: String,
    /// Memory request per instance (e.g. `8Gi`)
    pub memory: String,
    /// CPU request per instance (e.g. `4`)
    pub cpu: String,
    /// Container disk image reference
    pub image: String,
    /// Domain suffix appended to the cluster name in the inventory
    #[serde(default)]
    pub suffix: String,
    /// Directory receiving the inventory and deployment manifest
    #[serde(default)]
    pub kubeconfigdir: String,
    /// Pod IPv4 subnet of the provisioned cluster
    #[serde(default)]
    pub podv4subnet: String,
    /// Pod IPv6 subnet of the provisioned cluster
    #[serde(default)]
    pub podv6subnet: String,
    /// Service IPv4 subnet of the provisioned cluster
    #[serde(default)]
    pub servicev4subnet: String,
    /// Service IPv6 subnet of the provisioned cluster
    #[serde(default)]
    pub servicev6subnet: String,
    /// Autonomous system number used by the deployment manifest
    #[serde(default)]
    pub asn: u32,
    /// Extra routes installed on instances via the primary gateway
    #[serde(default)]
    pub routes: Vec<String>,
    /// Operating system family of the image
    #[serde(default)]
    pub distro: Distro,
    /// Image tag used by the deployment manifest
    #[serde(default)]
    pub tag: String,
    /// Image registry used by the deployment manifest
    #[serde(default)]
    pub registry: String,
    /// Container image repository handed to the configuration stage
    #[serde(default)]
    pub imagerepo: String,
}

impl ClusterSpec {
    /// Parses a cluster definition from YAML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidClusterSpec`] if the YAML is malformed or
    /// fails [`ClusterSpec::validate`].
    pub fn from_yaml(text: &str) -> Result<Self, ProvisionError> {
        let spec: Self =
            serde_yaml::from_str(text).map_err(|e| ProvisionError::InvalidClusterSpec {
                reason: e.to_string(),
            })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Reads and validates a cluster definition file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Io`] if the file cannot be read, or
    /// [`ProvisionError::InvalidClusterSpec`] if its content is invalid.
    pub async fn load(path: &Path) -> Result<Self, ProvisionError> {
        debug!(path = %path.display(), "Loading cluster definition");
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProvisionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&text)
    }

    /// Checks the fields every provisioning run depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidClusterSpec`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let required = [
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("memory", &self.memory),
            ("cpu", &self.cpu),
            ("image", &self.image),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ProvisionError::InvalidClusterSpec {
                    reason: format!("{field} must not be empty"),
                });
            }
        }

        parse_ipv4_cidr(&self.subnet)?;
        if self.has_ctrl_data_network() {
            parse_ipv4_cidr(&self.ctrldatasubnet)?;
        }
        Ok(())
    }

    /// Whether the optional control-data network is configured.
    #[must_use]
    pub fn has_ctrl_data_network(&self) -> bool {
        !self.ctrldatasubnet.trim().is_empty()
    }

    /// Name of the control-data network attachment.
    #[must_use]
    pub fn ctrl_data_network_name(&self) -> String {
        format!("{}{CTRL_DATA_SUFFIX}", self.name)
    }

    /// Fully qualified (`namespace/name`) name of the primary network.
    #[must_use]
    pub fn data_plane_network(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Fully qualified name of the control-data network, if configured.
    #[must_use]
    pub fn ctrl_data_network(&self) -> Option<String> {
        self.has_ctrl_data_network()
            .then(|| format!("{}/{}", self.namespace, self.ctrl_data_network_name()))
    }

    /// Cluster identifier used by the configuration stage (`name.suffix`).
    #[must_use]
    pub fn cluster_fqdn(&self) -> String {
        format!("{}.{}", self.name, self.suffix)
    }

    /// Total number of instances in the cluster definition.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.controller + self.worker
    }

    /// First host address of the primary subnet, used as the instance gateway.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidClusterSpec`] if the subnet is invalid.
    pub fn gateway(&self) -> Result<Ipv4Addr, ProvisionError> {
        let (network, _) = parse_ipv4_cidr(&self.subnet)?;
        Ok(Ipv4Addr::from(u32::from(network).wrapping_add(1)))
    }

    /// SSH public key path with a leading `~` expanded to the home directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidClusterSpec`] if the key path is empty or
    /// the home directory cannot be determined.
    pub fn expanded_keypath(&self) -> Result<PathBuf, ProvisionError> {
        let raw = self.keypath.trim();
        if raw.is_empty() {
            return Err(ProvisionError::InvalidClusterSpec {
                reason: "keypath must not be empty".to_string(),
            });
        }

        let Some(rest) = raw.strip_prefix('~') else {
            return Ok(PathBuf::from(raw));
        };
        let home = dirs::home_dir().ok_or_else(|| ProvisionError::InvalidClusterSpec {
            reason: "could not determine home directory for keypath".to_string(),
        })?;
        Ok(home.join(rest.trim_start_matches('/')))
    }
}

/// Parses an IPv4 CIDR and returns the network address and prefix length.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidClusterSpec`] if the value is not `a.b.c.d/len`
/// with a prefix length of at most 32.
pub fn parse_ipv4_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), ProvisionError> {
    let invalid = || ProvisionError::InvalidClusterSpec {
        reason: format!("'{cidr}' is not an IPv4 CIDR"),
    };

    let (address, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }

    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    Ok((Ipv4Addr::from(u32::from(address) & mask), prefix))
}

/// Settings for one provisioning run, passed explicitly to the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionConfig {
    /// Deadline applied to every readiness gate; `None` waits indefinitely
    pub gate_timeout: Option<Duration>,
    /// Interval at which readiness gates re-list state besides watching
    pub gate_poll_interval: Duration,
    /// Polling attempts after creating a network attachment
    pub network_poll_attempts: u32,
    /// Interval between network polling attempts
    pub network_poll_interval: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            gate_timeout: None,
            gate_poll_interval: GATE_POLL_INTERVAL,
            network_poll_attempts: NETWORK_POLL_ATTEMPTS,
            network_poll_interval: NETWORK_POLL_INTERVAL,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
