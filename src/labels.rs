// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across the provisioner.
//!
//! Labels are the only structured metadata channel shared with the platform:
//! instances are selected by cluster and role, namespaces and networks are
//! marked as cluster-managed, and the network plugin reports its progress in
//! annotations.

// ============================================================================
// Selection Labels
// ============================================================================

/// Label carrying the owning cluster name on instances, pods and services
pub const CLUSTER_LABEL: &str = "cluster";

/// Label carrying the instance role (`controller` or `worker`)
pub const ROLE_LABEL: &str = "role";

/// Label KubeVirt sets on launcher pods with the owning instance name
pub const KUBEVIRT_DOMAIN_LABEL: &str = "kubevirt.io/domain";

// ============================================================================
// Cluster-Managed Markers
// ============================================================================

/// Label placed on namespaces created by the provisioner
pub const NAMESPACE_LABEL: &str = "namespace";

/// Label placed on `VirtualNetwork` objects backing cluster networks
pub const VIRTUAL_NETWORK_LABEL: &str = "core.juniper.net/virtualnetwork";

/// Value of the cluster-managed marker labels
pub const CLUSTER_LABEL_VALUE: &str = "cluster";

// ============================================================================
// Network Annotations
// ============================================================================

/// Annotation declaring the subnet and routing of an overlay network
pub const NETWORKS_ANNOTATION: &str = "juniper.net/networks";

/// Annotation the network plugin writes once the overlay network exists
pub const NETWORKS_STATUS_ANNOTATION: &str = "juniper.net/networks-status";

/// Annotation Multus writes on pods listing every attached network
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";
