// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Network identity aggregation for running instances.
//!
//! Every running instance reports its attachments through the Multus
//! `k8s.v1.cni.cncf.io/network-status` annotation on its launcher pod. This
//! module parses those annotations and classifies each instance's addresses:
//!
//! - the entry named `{namespace}/{cluster}` is the data-plane address
//! - the entry named `{namespace}/{cluster}-ctrldata` (when configured) is the
//!   control-data address
//! - any other entry is the management address
//!
//! An instance without a data-plane address is an error; the inventory is never
//! written for it.

use crate::config::ClusterSpec;
use crate::constants::POD_PHASE_RUNNING;
use crate::errors::ProvisionError;
use crate::labels::{KUBEVIRT_DOMAIN_LABEL, NETWORK_STATUS_ANNOTATION};
use crate::resources::{InstanceDefinition, Role};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One network attachment reported for an instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    /// Network name (`namespace/name` for Multus attachments)
    #[serde(default)]
    pub name: String,
    /// Interface name inside the launcher pod
    #[serde(default)]
    pub interface: String,
    /// Addresses assigned on this network
    #[serde(default)]
    pub ips: Vec<String>,
}

/// A running instance with its reported network attachments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Instance name
    pub name: String,
    /// Instance role
    pub role: Role,
    /// Network attachments in annotation order
    pub networks: Vec<NetworkIdentity>,
}

/// Classified addresses of one instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostAddresses {
    /// Address used to reach the instance for configuration
    pub management: Option<String>,
    /// Address on the cluster's data-plane network
    pub data_plane: String,
    /// Address on the control-data network, when configured
    pub ctrl_data: Option<String>,
}

/// Classified instance, ready for inventory synthesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceAddresses {
    /// Instance role
    pub role: Role,
    /// Classified addresses
    pub addresses: HostAddresses,
}

/// Instance name carried by a launcher pod.
///
/// KubeVirt sets the pod host name to the instance name; the domain label is
/// the fallback when no host name is set.
#[must_use]
pub fn instance_name(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.hostname.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            pod.metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(KUBEVIRT_DOMAIN_LABEL).cloned())
        })
}

/// Whether the pod has reached the `Running` phase.
#[must_use]
pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(POD_PHASE_RUNNING)
}

/// Parses a network-status annotation value.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidNetworkAnnotation`] if the value is not a
/// JSON list of network entries.
pub fn parse_network_status(
    instance: &str,
    annotation: &str,
) -> Result<Vec<NetworkIdentity>, ProvisionError> {
    serde_json::from_str(annotation).map_err(|source| ProvisionError::InvalidNetworkAnnotation {
        instance: instance.to_string(),
        source,
    })
}

/// Builds records for the running launcher pods of submitted instances.
///
/// Pods of instances not submitted in this run, pods without an instance name
/// and pods not yet running are skipped. When several pods report the same
/// instance, the last one listed wins.
///
/// # Errors
///
/// Returns [`ProvisionError::MissingNetworkAnnotation`] for a running instance
/// without a network-status annotation, or
/// [`ProvisionError::InvalidNetworkAnnotation`] if the annotation is malformed.
pub fn collect_instances(
    namespace: &str,
    pods: &[Pod],
    definitions: &[InstanceDefinition],
) -> Result<BTreeMap<String, InstanceRecord>, ProvisionError> {
    let roles: BTreeMap<&str, Role> = definitions
        .iter()
        .map(|def| (def.name.as_str(), def.role))
        .collect();

    let mut records = BTreeMap::new();
    for pod in pods.iter().filter(|pod| is_running(pod)) {
        let Some(name) = instance_name(pod) else {
            continue;
        };
        let Some(role) = roles.get(name.as_str()).copied() else {
            debug!(namespace = %namespace, instance = %name, "Ignoring pod of an unsubmitted instance");
            continue;
        };

        let annotation = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(NETWORK_STATUS_ANNOTATION))
            .ok_or_else(|| ProvisionError::MissingNetworkAnnotation {
                namespace: namespace.to_string(),
                instance: name.clone(),
            })?;

        let networks = parse_network_status(&name, annotation)?;
        records.insert(
            name.clone(),
            InstanceRecord {
                name,
                role,
                networks,
            },
        );
    }

    Ok(records)
}

/// Classifies one instance's network attachments.
///
/// # Errors
///
/// Returns [`ProvisionError::MissingDataPlaneAddress`] if no address was
/// reported on `data_plane_network`.
pub fn classify(
    record: &InstanceRecord,
    data_plane_network: &str,
    ctrl_data_network: Option<&str>,
) -> Result<HostAddresses, ProvisionError> {
    let mut data_plane = None;
    let mut ctrl_data = None;
    let mut management: Option<&NetworkIdentity> = None;

    for network in &record.networks {
        let first_ip = network.ips.first().cloned();
        if network.name == data_plane_network {
            data_plane = data_plane.or(first_ip);
        } else if Some(network.name.as_str()) == ctrl_data_network {
            ctrl_data = ctrl_data.or(first_ip);
        } else if let Some(chosen) = management {
            warn!(
                instance = %record.name,
                chosen = %chosen.name,
                ignored = %network.name,
                "Instance reports more than one management network; keeping the first"
            );
        } else if first_ip.is_some() {
            management = Some(network);
        }
    }

    let data_plane = data_plane
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| ProvisionError::MissingDataPlaneAddress {
            instance: record.name.clone(),
            network: data_plane_network.to_string(),
        })?;

    Ok(HostAddresses {
        management: management.and_then(|network| network.ips.first().cloned()),
        data_plane,
        ctrl_data,
    })
}

/// Classifies every collected instance against the cluster's networks.
///
/// # Errors
///
/// Returns the first classification error; see [`classify`].
pub fn aggregate(
    spec: &ClusterSpec,
    records: &BTreeMap<String, InstanceRecord>,
) -> Result<BTreeMap<String, InstanceAddresses>, ProvisionError> {
    let data_plane_network = spec.data_plane_network();
    let ctrl_data_network = spec.ctrl_data_network();

    records
        .iter()
        .map(|(name, record)| {
            let addresses = classify(record, &data_plane_network, ctrl_data_network.as_deref())?;
            debug!(
                instance = %name,
                data_plane = %addresses.data_plane,
                management = ?addresses.management,
                "Classified instance addresses"
            );
            Ok((
                name.clone(),
                InstanceAddresses {
                    role: record.role,
                    addresses,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod network_tests;
