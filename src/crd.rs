// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom resource types consumed from the platform.
//!
//! None of these CRDs are owned by this crate; they are installed by the
//! platform's network plugin and virtualization add-on. Only the fields the
//! provisioner reads or writes are modelled, with unknown fields preserved where
//! objects are round-tripped through a read-modify-write.
//!
//! # Resource Types
//!
//! - [`NetworkAttachmentDefinition`] - Multus network attachment (`k8s.cni.cncf.io/v1`)
//! - [`VirtualNetwork`] - Overlay network created by the network plugin (`core.juniper.net/v1alpha1`)
//! - [`VirtualMachineInstance`] - KubeVirt virtual machine instance (`kubevirt.io/v1`)

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `NetworkAttachmentDefinition` binds pods (and therefore instances) to an
/// additional network.
///
/// The overlay subnet is declared through the `juniper.net/networks` annotation;
/// the network plugin reports progress through `juniper.net/networks-status`.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI configuration JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// `VirtualNetwork` is the logical overlay network backing a cluster network
/// attachment.
///
/// The provisioner only labels these objects, so its `spec` and `status` are
/// kept opaque and round-tripped unchanged.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.juniper.net",
    version = "v1alpha1",
    kind = "VirtualNetwork",
    status = "VirtualNetworkStatus",
    namespaced
)]
pub struct VirtualNetworkSpec {
    /// Fields owned by the network plugin
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Status reported by the network plugin for a `VirtualNetwork`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct VirtualNetworkStatus {
    /// Fields owned by the network plugin
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// `VirtualMachineInstance` is a running KubeVirt virtual machine.
///
/// KubeVirt schedules one launcher pod per instance; the pod carries the
/// instance labels, its phase and the Multus network-status annotation.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    shortname = "vmi",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Virtual hardware of the instance
    pub domain: DomainSpec,

    /// Networks the instance interfaces are connected to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    /// Volumes backing the instance disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// Virtual hardware of an instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// Compute resources requested for the instance
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Attached devices
    #[serde(default)]
    pub devices: Devices,
}

/// Compute resource requests (`memory`, `cpu`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Requested quantities keyed by resource name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

/// Devices attached to an instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    /// Network interfaces, matched to [`Network`] entries by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    /// Disks, matched to [`Volume`] entries by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,
}

/// Network interface of an instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// Interface name, equal to the name of the backing network
    pub name: String,

    /// Bridge binding to the pod interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<InterfaceBridge>,
}

/// Bridge interface binding; carries no settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InterfaceBridge {}

/// Network an instance is connected to.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network name, referenced by an [`Interface`]
    pub name: String,

    /// The launcher pod's own network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,

    /// A Multus network attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

/// Pod network source; carries no settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PodNetwork {}

/// Multus network source.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    /// `namespace/name` of the `NetworkAttachmentDefinition`
    pub network_name: String,
}

/// Disk attached to an instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Disk name, equal to the name of the backing volume
    pub name: String,

    /// Disk target settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,
}

/// Disk target settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    /// Bus the disk is attached to (e.g. `virtio`)
    pub bus: String,
}

/// Volume backing an instance disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,

    /// Ephemeral disk pulled from a container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    /// NoCloud cloud-init data source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloudSource>,
}

/// Container disk volume source.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    /// Image reference
    pub image: String,

    /// Pull policy (`Always`, `IfNotPresent`, `Never`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

/// NoCloud cloud-init volume source.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    /// `Secret` holding the user data under the `userdata` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret_ref: Option<LocalObjectReference>,
}

/// Reference to an object in the same namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LocalObjectReference {
    /// Object name
    pub name: String,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
