// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for cluster provisioning.
//!
//! Every fatal condition aborts the provisioning run and is reported with enough
//! context (resource kind, namespace, name) to diagnose it. `CreateConflict` is the
//! only recoverable condition: it is produced when a concurrent run created the
//! same resource first and is resolved by re-fetching the existing object.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while provisioning or tearing down a cluster.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A get or list call failed for a reason other than "not found".
    #[error("Failed to look up {kind} '{namespace}/{name}': {source}")]
    LookupFailed {
        /// Resource kind (e.g. `Service`)
        kind: String,
        /// Namespace of the resource
        namespace: String,
        /// Resource name, or the selector used for list calls
        name: String,
        /// Underlying platform error
        #[source]
        source: kube::Error,
    },

    /// A create call failed for a reason other than "already exists".
    #[error("Failed to create {kind} '{namespace}/{name}': {source}")]
    CreateFailed {
        /// Resource kind
        kind: String,
        /// Namespace of the resource
        namespace: String,
        /// Resource name
        name: String,
        /// Underlying platform error
        #[source]
        source: kube::Error,
    },

    /// A concurrent run created the resource between our lookup and create.
    ///
    /// Recovered by the ensurer, which re-fetches the now-existing resource.
    #[error("{kind} '{namespace}/{name}' was created concurrently")]
    CreateConflict {
        /// Resource kind
        kind: String,
        /// Namespace of the resource
        namespace: String,
        /// Resource name
        name: String,
    },

    /// A read-modify-write kept losing against concurrent writers.
    #[error("Conflicting update to {kind} '{namespace}/{name}' after {attempts} attempt(s)")]
    UpdateConflict {
        /// Resource kind
        kind: String,
        /// Namespace of the resource
        namespace: String,
        /// Resource name
        name: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// An update call failed for a reason other than a version conflict.
    #[error("Failed to update {kind} '{namespace}/{name}': {source}")]
    UpdateFailed {
        /// Resource kind
        kind: String,
        /// Namespace of the resource
        namespace: String,
        /// Resource name
        name: String,
        /// Underlying platform error
        #[source]
        source: kube::Error,
    },

    /// A delete call failed for a reason other than "not found".
    #[error("Failed to delete {kind} '{namespace}/{name}': {source}")]
    DeleteFailed {
        /// Resource kind
        kind: String,
        /// Namespace of the resource
        namespace: String,
        /// Resource name
        name: String,
        /// Underlying platform error
        #[source]
        source: kube::Error,
    },

    /// A desired resource could not be submitted as built.
    #[error("Invalid {kind} definition: {reason}")]
    InvalidResource {
        /// Resource kind
        kind: String,
        /// What is wrong with the definition
        reason: String,
    },

    /// A running instance reports no network-status metadata at all.
    ///
    /// Indicates a defect in the platform's network integration.
    #[error("Instance '{namespace}/{instance}' has no network-status annotation")]
    MissingNetworkAnnotation {
        /// Namespace of the instance
        namespace: String,
        /// Instance name
        instance: String,
    },

    /// The network-status metadata of an instance is not valid JSON.
    #[error("Instance '{instance}' has a malformed network-status annotation: {source}")]
    InvalidNetworkAnnotation {
        /// Instance name
        instance: String,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// No address was reported on the cluster's data-plane network.
    #[error("Instance '{instance}' has no address on data-plane network '{network}'")]
    MissingDataPlaneAddress {
        /// Instance name
        instance: String,
        /// Expected data-plane network name
        network: String,
    },

    /// A readiness gate did not resolve before its deadline.
    #[error("Timed out after {elapsed:?} waiting for {what} ({kind})")]
    ReadinessTimeout {
        /// Resource kind being watched
        kind: String,
        /// Description of the awaited condition
        what: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// A readiness listener stopped without reporting an outcome.
    #[error("Readiness listener for {what} ({kind}) stopped: {reason}")]
    WatchFailed {
        /// Resource kind being watched
        kind: String,
        /// Description of the awaited condition
        what: String,
        /// Why the listener stopped
        reason: String,
    },

    /// A generated document could not be serialized.
    #[error("Failed to serialize {document}: {reason}")]
    SerializationFailure {
        /// Document being built (e.g. `inventory`)
        document: String,
        /// Serializer error
        reason: String,
    },

    /// The cluster definition is unusable.
    #[error("Invalid cluster definition: {reason}")]
    InvalidClusterSpec {
        /// What is wrong with the definition
        reason: String,
    },

    /// Reading an input or writing an artifact failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Short machine-readable name of the error condition, used in log fields.
    #[must_use]
    pub fn condition(&self) -> &'static str {
        match self {
            Self::LookupFailed { .. } => "LookupFailed",
            Self::CreateFailed { .. } => "CreateFailed",
            Self::CreateConflict { .. } => "CreateConflict",
            Self::UpdateConflict { .. } => "UpdateConflict",
            Self::UpdateFailed { .. } => "UpdateFailed",
            Self::DeleteFailed { .. } => "DeleteFailed",
            Self::InvalidResource { .. } => "InvalidResource",
            Self::MissingNetworkAnnotation { .. } => "MissingNetworkAnnotation",
            Self::InvalidNetworkAnnotation { .. } => "InvalidNetworkAnnotation",
            Self::MissingDataPlaneAddress { .. } => "MissingDataPlaneAddress",
            Self::ReadinessTimeout { .. } => "ReadinessTimeout",
            Self::WatchFailed { .. } => "WatchFailed",
            Self::SerializationFailure { .. } => "SerializationFailure",
            Self::InvalidClusterSpec { .. } => "InvalidClusterSpec",
            Self::Io { .. } => "Io",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
