// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Idempotent get-or-create helpers for platform resources.
//!
//! Every resource the orchestrator manages goes through one of these helpers so
//! that re-running a provisioning run adopts what already exists instead of
//! duplicating or failing on it.
//!
//! # Strategies
//!
//! - [`ensure`]: get, create if missing; a concurrent create is adopted
//! - [`upsert`]: create, replace if it already exists (boot configuration)
//! - [`label_virtual_network`]: read-modify-write of one label, retried on conflict

use crate::crd::VirtualNetwork;
use crate::errors::ProvisionError;
use crate::labels::{CLUSTER_LABEL_VALUE, VIRTUAL_NETWORK_LABEL};
use crate::platform::{is_already_exists, is_conflict, is_not_found, ResourceApi};
use crate::reconcilers::retry::retry_on_conflict;
use kube::Resource;
use tracing::{debug, info, warn};

/// Outcome of [`ensure`] and [`upsert`].
#[derive(Clone, Debug, PartialEq)]
pub struct Ensured<K> {
    /// The live object
    pub resource: K,
    /// Whether the object existed before this call (adopted rather than created)
    pub existed: bool,
}

/// Namespace (empty for cluster-scoped kinds) and name of a desired object.
fn identity<K>(resource: &K) -> Result<(String, String), ProvisionError>
where
    K: Resource<DynamicType = ()>,
{
    let meta = resource.meta();
    let name = meta
        .name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProvisionError::InvalidResource {
            kind: K::kind(&()).to_string(),
            reason: "resource must have a name".to_string(),
        })?;
    Ok((meta.namespace.clone().unwrap_or_default(), name))
}

/// Ensure a resource exists, creating it from `desired` if it does not.
///
/// An existing object is returned untouched. If a concurrent writer creates the
/// object between our lookup and our create, the "already exists" response is
/// treated as success and the winner's object is fetched and returned.
///
/// # Errors
///
/// - [`ProvisionError::InvalidResource`] if `desired` has no name
/// - [`ProvisionError::LookupFailed`] if the lookup fails for any reason other
///   than "not found"
/// - [`ProvisionError::CreateFailed`] if the create fails for any reason other
///   than "already exists"
pub async fn ensure<K>(
    api: &dyn ResourceApi<K>,
    desired: &K,
) -> Result<Ensured<K>, ProvisionError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let (namespace, name) = identity(desired)?;
    let lookup_failed = |source| ProvisionError::LookupFailed {
        kind: kind.clone(),
        namespace: namespace.clone(),
        name: name.clone(),
        source,
    };

    match api.get(&name).await {
        Ok(existing) => {
            info!(kind = %kind, namespace = %namespace, name = %name, "Resource already exists");
            return Ok(Ensured {
                resource: existing,
                existed: true,
            });
        }
        Err(e) if is_not_found(&e) => {
            debug!(kind = %kind, namespace = %namespace, name = %name, "Resource does not exist, creating");
        }
        Err(e) => return Err(lookup_failed(e)),
    }

    match api.create(desired).await {
        Ok(created) => {
            info!(kind = %kind, namespace = %namespace, name = %name, "Created resource");
            Ok(Ensured {
                resource: created,
                existed: false,
            })
        }
        Err(e) if is_already_exists(&e) => {
            let conflict = ProvisionError::CreateConflict {
                kind: kind.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
            };
            warn!(error = %conflict, "Adopting resource created by a concurrent writer");
            let existing = api.get(&name).await.map_err(lookup_failed)?;
            Ok(Ensured {
                resource: existing,
                existed: true,
            })
        }
        Err(source) => Err(ProvisionError::CreateFailed {
            kind,
            namespace,
            name,
            source,
        }),
    }
}

/// Create a resource, or replace it with `desired` if it already exists.
///
/// The replacement carries the live `resourceVersion`, so a concurrent change
/// between our read and our write surfaces as a conflict.
///
/// # Errors
///
/// - [`ProvisionError::CreateFailed`] if the create fails for any reason other
///   than "already exists"
/// - [`ProvisionError::LookupFailed`] if the existing object cannot be read
/// - [`ProvisionError::UpdateConflict`] if the object changed under us
/// - [`ProvisionError::UpdateFailed`] if the replace fails otherwise
pub async fn upsert<K>(api: &dyn ResourceApi<K>, desired: &K) -> Result<Ensured<K>, ProvisionError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let (namespace, name) = identity(desired)?;

    match api.create(desired).await {
        Ok(created) => {
            info!(kind = %kind, namespace = %namespace, name = %name, "Created resource");
            return Ok(Ensured {
                resource: created,
                existed: false,
            });
        }
        Err(e) if is_already_exists(&e) => {
            debug!(kind = %kind, namespace = %namespace, name = %name, "Resource already exists, replacing");
        }
        Err(source) => {
            return Err(ProvisionError::CreateFailed {
                kind,
                namespace,
                name,
                source,
            })
        }
    }

    let live = api
        .get(&name)
        .await
        .map_err(|source| ProvisionError::LookupFailed {
            kind: kind.clone(),
            namespace: namespace.clone(),
            name: name.clone(),
            source,
        })?;

    let mut replacement = desired.clone();
    replacement.meta_mut().resource_version = live.meta().resource_version.clone();

    match api.replace(&name, &replacement).await {
        Ok(replaced) => {
            info!(kind = %kind, namespace = %namespace, name = %name, "Replaced resource");
            Ok(Ensured {
                resource: replaced,
                existed: true,
            })
        }
        Err(e) if is_conflict(&e) => Err(ProvisionError::UpdateConflict {
            kind,
            namespace,
            name,
            attempts: 1,
        }),
        Err(source) => Err(ProvisionError::UpdateFailed {
            kind,
            namespace,
            name,
            source,
        }),
    }
}

/// Label the `VirtualNetwork` backing a network attachment as a cluster network.
///
/// Performs a read-modify-write of `core.juniper.net/virtualnetwork=cluster`,
/// retried up to `max_attempts` times while it conflicts with concurrent
/// writers. Returns `false` without writing if the label is already present.
///
/// # Errors
///
/// - [`ProvisionError::LookupFailed`] if the network cannot be read
/// - [`ProvisionError::UpdateConflict`] once `max_attempts` conflicting writes
///   have been made
/// - [`ProvisionError::UpdateFailed`] if the write fails otherwise
pub async fn label_virtual_network(
    api: &dyn ResourceApi<VirtualNetwork>,
    namespace: &str,
    name: &str,
    max_attempts: u32,
) -> Result<bool, ProvisionError> {
    let kind = VirtualNetwork::kind(&()).to_string();
    let kind = kind.as_str();
    let operation = format!("label {kind} {namespace}/{name}");

    retry_on_conflict(
        move || async move {
            let mut network = api
                .get(name)
                .await
                .map_err(|source| ProvisionError::LookupFailed {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?;

            let labels = network.meta_mut().labels.get_or_insert_with(Default::default);
            if labels.get(VIRTUAL_NETWORK_LABEL).map(String::as_str) == Some(CLUSTER_LABEL_VALUE) {
                debug!(namespace = %namespace, name = %name, "VirtualNetwork already labelled");
                return Ok(false);
            }
            labels.insert(VIRTUAL_NETWORK_LABEL.to_string(), CLUSTER_LABEL_VALUE.to_string());

            match api.replace(name, &network).await {
                Ok(_) => {
                    info!(namespace = %namespace, name = %name, "Labelled VirtualNetwork");
                    Ok(true)
                }
                Err(e) if is_conflict(&e) => Err(ProvisionError::UpdateConflict {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    attempts: 1,
                }),
                Err(source) => Err(ProvisionError::UpdateFailed {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                }),
            }
        },
        max_attempts,
        &operation,
    )
    .await
}

#[cfg(test)]
#[path = "ensure_tests.rs"]
mod ensure_tests;
