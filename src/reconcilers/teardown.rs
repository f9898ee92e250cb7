// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster teardown.
//!
//! Deletes everything a provisioning run creates in a namespace, children
//! first, then the namespace itself. Objects that are already gone are skipped,
//! so an interrupted teardown can simply be run again.

use crate::errors::ProvisionError;
use crate::platform::{is_not_found, ListQuery, Platform, ResourceApi};
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Objects removed by a teardown, keyed by resource kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Deleted object count per kind
    pub deleted: BTreeMap<String, u32>,
}

impl TeardownReport {
    /// Objects of `kind` deleted.
    #[must_use]
    pub fn deleted(&self, kind: &str) -> u32 {
        self.deleted.get(kind).copied().unwrap_or_default()
    }

    fn record<K: Resource<DynamicType = ()>>(&mut self) {
        *self
            .deleted
            .entry(K::kind(&()).to_string())
            .or_default() += 1;
    }
}

/// Deletes the instances, network attachments, services and secrets in
/// `namespace`, then the namespace.
///
/// # Errors
///
/// - [`ProvisionError::LookupFailed`] if listing a kind fails
/// - [`ProvisionError::DeleteFailed`] if a delete fails for any reason other
///   than "not found"
pub async fn teardown(
    platform: &dyn Platform,
    namespace: &str,
) -> Result<TeardownReport, ProvisionError> {
    info!(namespace = %namespace, "Tearing down cluster");
    let mut report = TeardownReport::default();

    delete_all(platform.instances(namespace).as_ref(), namespace, &mut report).await?;
    delete_all(
        platform.network_attachments(namespace).as_ref(),
        namespace,
        &mut report,
    )
    .await?;
    delete_all(platform.services(namespace).as_ref(), namespace, &mut report).await?;
    delete_all(platform.secrets(namespace).as_ref(), namespace, &mut report).await?;

    let namespaces = platform.namespaces();
    if delete_one(namespaces.as_ref(), "", namespace).await? {
        report.record::<Namespace>();
    }

    info!(namespace = %namespace, deleted = ?report.deleted, "Teardown complete");
    Ok(report)
}

async fn delete_all<K>(
    api: &dyn ResourceApi<K>,
    namespace: &str,
    report: &mut TeardownReport,
) -> Result<(), ProvisionError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let objects = api
        .list(&ListQuery::default())
        .await
        .map_err(|source| ProvisionError::LookupFailed {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: ListQuery::default().describe(),
            source,
        })?;

    for object in objects {
        let Some(name) = object.meta().name.clone() else {
            continue;
        };
        if delete_one(api, namespace, &name).await? {
            report.record::<K>();
        }
    }
    Ok(())
}

/// Deletes one object; returns `false` if it was already gone.
async fn delete_one<K>(
    api: &dyn ResourceApi<K>,
    namespace: &str,
    name: &str,
) -> Result<bool, ProvisionError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let kind = K::kind(&());
    match api.delete(name).await {
        Ok(()) => {
            info!(kind = %kind, namespace = %namespace, name = %name, "Deleted resource");
            Ok(true)
        }
        Err(e) if is_not_found(&e) => {
            debug!(kind = %kind, namespace = %namespace, name = %name, "Resource already deleted");
            Ok(false)
        }
        Err(source) => Err(ProvisionError::DeleteFailed {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
#[path = "teardown_tests.rs"]
mod teardown_tests;
