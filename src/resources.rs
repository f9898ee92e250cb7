// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes resource builders for cluster instances and networks.
//!
//! This module builds every object the orchestrator submits (`Namespace`,
//! `NetworkAttachmentDefinition`, `Secret`, `VirtualMachineInstance`, `Service`)
//! from a [`ClusterSpec`]. All functions are pure and easily testable.

use crate::config::ClusterSpec;
use crate::constants::{
    API_SERVER_PORT, API_SERVER_PORT_NAME, CLOUDINIT_DISK_NAME, CONTRAIL_CNI_CONFIG, DISK_BUS,
    IMAGE_PULL_POLICY, POD_NETWORK_NAME, ROUTE_TARGET, USERDATA_KEY,
};
use crate::crd::{
    CloudInitNoCloudSource, ContainerDiskSource, Devices, Disk, DiskTarget, DomainSpec, Interface,
    InterfaceBridge, LocalObjectReference, MultusNetwork, Network, NetworkAttachmentDefinition,
    NetworkAttachmentDefinitionSpec, PodNetwork, ResourceRequirements, VirtualMachineInstance,
    VirtualMachineInstanceSpec, Volume,
};
use crate::labels::{
    CLUSTER_LABEL, CLUSTER_LABEL_VALUE, NAMESPACE_LABEL, NETWORKS_ANNOTATION, ROLE_LABEL,
};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role of an instance within the provisioned cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Control-plane instance (also hosts the metadata store)
    Controller,
    /// Worker instance
    Worker,
}

impl Role {
    /// Label value and instance name prefix for this role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instance the cluster should contain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceDefinition {
    /// Instance name (`{role}-{index}`), also the boot configuration secret name
    pub name: String,
    /// Instance role
    pub role: Role,
    /// Index within the role
    pub index: u32,
}

/// Lists the instances of a cluster definition: controllers first, then workers.
#[must_use]
pub fn instance_definitions(spec: &ClusterSpec) -> Vec<InstanceDefinition> {
    let controllers = (0..spec.controller).map(|index| (Role::Controller, index));
    let workers = (0..spec.worker).map(|index| (Role::Worker, index));

    controllers
        .chain(workers)
        .map(|(role, index)| InstanceDefinition {
            name: format!("{role}-{index}"),
            role,
            index,
        })
        .collect()
}

/// Builds the labels carried by instances (and propagated to their pods).
#[must_use]
pub fn build_instance_labels(cluster_name: &str, role: Role) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_LABEL.into(), cluster_name.into());
    labels.insert(ROLE_LABEL.into(), role.as_str().into());
    labels
}

/// Builds the cluster namespace, marked as cluster-managed.
#[must_use]
pub fn build_namespace(name: &str) -> Namespace {
    let mut labels = BTreeMap::new();
    labels.insert(NAMESPACE_LABEL.into(), CLUSTER_LABEL_VALUE.into());

    Namespace {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Builds a `NetworkAttachmentDefinition` declaring an overlay network.
///
/// The subnet travels in the `juniper.net/networks` annotation, which the
/// network plugin turns into a `VirtualNetwork` of the same name.
#[must_use]
pub fn build_network_attachment(
    namespace: &str,
    name: &str,
    subnet: &str,
) -> NetworkAttachmentDefinition {
    let networks = serde_json::json!({
        "ipamV4Subnet": subnet,
        "fabricSNAT": true,
        "routeTargetList": [ROUTE_TARGET],
    });

    let mut annotations = BTreeMap::new();
    annotations.insert(NETWORKS_ANNOTATION.into(), networks.to_string());

    NetworkAttachmentDefinition {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: NetworkAttachmentDefinitionSpec {
            config: Some(CONTRAIL_CNI_CONFIG.into()),
        },
    }
}

/// Status text the network plugin writes once a network attachment is usable.
///
/// The trailing space is part of the plugin's message.
#[must_use]
pub fn expected_network_status(name: &str, subnet: &str) -> String {
    format!("success creating VirtualNetwork {name} v4Subnet: {subnet} ")
}

/// Builds the `Secret` delivering an instance's boot configuration.
#[must_use]
pub fn build_boot_secret(namespace: &str, name: &str, userdata: &str) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert(USERDATA_KEY.into(), userdata.into());

    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Builds the `VirtualMachineInstance` for one instance definition.
///
/// Every instance gets a bridged pod network (`default`), the primary cluster
/// network and, when configured, the control-data network. The boot disk is a
/// container disk of `image`; cloud-init reads its user data from the secret
/// named after the instance.
#[must_use]
pub fn build_instance(
    spec: &ClusterSpec,
    definition: &InstanceDefinition,
    image: &str,
) -> VirtualMachineInstance {
    let mut network_names = vec![spec.name.clone()];
    if spec.has_ctrl_data_network() {
        network_names.push(spec.ctrl_data_network_name());
    }

    let mut networks = vec![Network {
        name: POD_NETWORK_NAME.into(),
        pod: Some(PodNetwork {}),
        multus: None,
    }];
    networks.extend(network_names.iter().map(|name| Network {
        name: name.clone(),
        pod: None,
        multus: Some(MultusNetwork {
            network_name: format!("{}/{name}", spec.namespace),
        }),
    }));

    let interfaces = networks
        .iter()
        .map(|network| Interface {
            name: network.name.clone(),
            bridge: Some(InterfaceBridge {}),
        })
        .collect();

    let boot_disk = format!("{}-disk", spec.name);
    let disks = [boot_disk.as_str(), CLOUDINIT_DISK_NAME]
        .into_iter()
        .map(|name| Disk {
            name: name.into(),
            disk: Some(DiskTarget {
                bus: DISK_BUS.into(),
            }),
        })
        .collect();

    let mut requests = BTreeMap::new();
    requests.insert("memory".to_string(), Quantity(spec.memory.clone()));
    requests.insert("cpu".to_string(), Quantity(spec.cpu.clone()));

    let volumes = vec![
        Volume {
            name: boot_disk.clone(),
            container_disk: Some(ContainerDiskSource {
                image: image.into(),
                image_pull_policy: Some(IMAGE_PULL_POLICY.into()),
            }),
            cloud_init_no_cloud: None,
        },
        Volume {
            name: CLOUDINIT_DISK_NAME.into(),
            container_disk: None,
            cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                user_data_secret_ref: Some(LocalObjectReference {
                    name: definition.name.clone(),
                }),
            }),
        },
    ];

    VirtualMachineInstance {
        metadata: ObjectMeta {
            name: Some(definition.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(build_instance_labels(&spec.name, definition.role)),
            ..Default::default()
        },
        spec: VirtualMachineInstanceSpec {
            domain: DomainSpec {
                resources: ResourceRequirements { requests },
                devices: Devices { interfaces, disks },
            },
            networks,
            volumes,
        },
    }
}

/// Builds the API server `Service` fronting the control-plane instances.
#[must_use]
pub fn build_service(spec: &ClusterSpec) -> Service {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_LABEL.into(), spec.name.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(API_SERVER_PORT_NAME.into()),
                port: API_SERVER_PORT,
                target_port: Some(IntOrString::Int(API_SERVER_PORT)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            selector: Some(build_instance_labels(&spec.name, Role::Controller)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
