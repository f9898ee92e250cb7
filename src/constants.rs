// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the cluster provisioner.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// Network Constants
// ============================================================================

/// Suffix appended to the cluster name for the optional control-data network
pub const CTRL_DATA_SUFFIX: &str = "-ctrldata";

/// Name of the pod (management) network attached to every instance
pub const POD_NETWORK_NAME: &str = "default";

/// CNI configuration carried by every `NetworkAttachmentDefinition`
pub const CONTRAIL_CNI_CONFIG: &str =
    r#"{"cniVersion": "0.3.1","name": "contrail-k8s-cni","type": "contrail-k8s-cni"}"#;

/// Route target list advertised for cluster networks
pub const ROUTE_TARGET: &str = "target:1:1";

// ============================================================================
// Service Constants
// ============================================================================

/// Kubernetes API server port exposed by the cluster `Service`
pub const API_SERVER_PORT: i32 = 6443;

/// Name of the port on the cluster `Service`
pub const API_SERVER_PORT_NAME: &str = "api";

/// Namespace holding the platform DNS service
pub const DNS_SERVICE_NAMESPACE: &str = "kube-system";

/// Name of the platform DNS service whose address is handed to instances
pub const DNS_SERVICE_NAME: &str = "coredns";

/// Namespace holding the optional package mirror and image registry services
pub const SHARED_SERVICE_NAMESPACE: &str = "default";

/// Name of the optional package mirror service
pub const MIRROR_SERVICE_NAME: &str = "aptmirror";

/// Name of the optional in-cluster image registry service
pub const REGISTRY_SERVICE_NAME: &str = "registry";

/// Address instances use to reach the in-cluster image registry
pub const REGISTRY_SERVICE_ADDRESS: &str = "registry.default.svc.cluster1.local:5000";

/// Placeholder `clusterIP` value of headless services
pub const HEADLESS_CLUSTER_IP: &str = "None";

// ============================================================================
// Instance Constants
// ============================================================================

/// Key in the boot configuration `Secret` holding the cloud-init document
pub const USERDATA_KEY: &str = "userdata";

/// Name of the cloud-init disk and volume
pub const CLOUDINIT_DISK_NAME: &str = "cloudinitdisk";

/// Disk bus used for every instance disk
pub const DISK_BUS: &str = "virtio";

/// Pull policy for container disk images
pub const IMAGE_PULL_POLICY: &str = "Always";

/// Pod phase reported once an instance's launcher pod is running
pub const POD_PHASE_RUNNING: &str = "Running";

// ============================================================================
// Readiness Constants
// ============================================================================

/// Number of polling attempts after creating a `NetworkAttachmentDefinition`
pub const NETWORK_POLL_ATTEMPTS: u32 = 5;

/// Interval between network polling attempts (1 second)
pub const NETWORK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval at which readiness gates re-list state besides watching (5 seconds)
pub const GATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Conflict Retry Constants
// ============================================================================

/// Maximum read-modify-write attempts when labelling a network object
pub const LABEL_UPDATE_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Output Constants
// ============================================================================

/// File name of the generated host inventory
pub const INVENTORY_FILE_NAME: &str = "inventory.yaml";

/// File name of the generated deployment manifest
pub const DEPLOYER_FILE_NAME: &str = "deployer.yaml";

/// Unix permissions of generated artifact files
pub const ARTIFACT_FILE_MODE: u32 = 0o600;

/// Image tag used by the deployment manifest when none is configured
pub const DEFAULT_IMAGE_TAG: &str = "latest";

// ============================================================================
// Boot Configuration Constants
// ============================================================================

/// Unprivileged login user created on every instance
pub const INSTANCE_USER: &str = "contrail";

/// Initial password list applied by cloud-init
pub const INSTANCE_CHPASSWD: &str = "contrail:contrail\nroot:contrail";

/// Sudo rule for users created on instances
pub const INSTANCE_SUDO: &str = "ALL=(ALL) NOPASSWD:ALL";

/// Ubuntu package mirror used by instances
pub const UBUNTU_APT_MIRROR: &str =
    "https://svl-artifactory.juniper.net/artifactory/common-ubuntu-remote/";

/// Host name the package mirror answers for
pub const MIRROR_HOST_ALIAS: &str = "download.opensuse.org";
