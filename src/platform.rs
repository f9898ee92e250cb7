// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Uniform access to the platform API.
//!
//! Every resource kind the provisioner touches is reached through
//! [`ResourceApi`], a small get/create/replace/delete/list/watch surface that
//! [`kube::Api`] implements directly. The [`Platform`] trait hands out one
//! `ResourceApi` per kind and namespace, so the orchestrator never depends on a
//! live cluster and can be exercised against an in-memory implementation.
//!
//! "Not found", "already exists" and "conflict" are told apart with
//! [`is_not_found`], [`is_already_exists`] and [`is_conflict`].

use crate::crd::{NetworkAttachmentDefinition, VirtualMachineInstance, VirtualNetwork};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

/// HTTP status the API server returns for missing objects.
const HTTP_NOT_FOUND: u16 = 404;

/// HTTP status the API server returns for "already exists" and version conflicts.
const HTTP_CONFLICT: u16 = 409;

/// Status reason distinguishing "already exists" from an optimistic-lock conflict.
const REASON_ALREADY_EXISTS: &str = "AlreadyExists";

/// Label and field selectors restricting list and watch calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Label selector (e.g. `cluster=demo`)
    pub labels: Option<String>,
    /// Field selector (e.g. `metadata.name=demo`)
    pub fields: Option<String>,
}

impl ListQuery {
    /// Matches every object carrying the given label.
    #[must_use]
    pub fn label(key: &str, value: &str) -> Self {
        Self {
            labels: Some(format!("{key}={value}")),
            fields: None,
        }
    }

    /// Matches the single object with the given name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            labels: None,
            fields: Some(format!("metadata.name={name}")),
        }
    }

    /// Human-readable form used in logs and error context.
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.labels, &self.fields) {
            (Some(labels), Some(fields)) => format!("{labels},{fields}"),
            (Some(selector), None) | (None, Some(selector)) => selector.clone(),
            (None, None) => "*".to_string(),
        }
    }

    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(labels) = &self.labels {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.fields {
            params = params.fields(fields);
        }
        params
    }

    fn watcher_config(&self) -> watcher::Config {
        let mut config = watcher::Config::default();
        if let Some(labels) = &self.labels {
            config = config.labels(labels);
        }
        if let Some(fields) = &self.fields {
            config = config.fields(fields);
        }
        config
    }
}

/// A change observed on a watched resource.
///
/// The resource kind travels with the type parameter, so consumers never
/// downcast event payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceEvent<K> {
    /// The object was added or modified (or listed during a watch restart)
    Applied(K),
    /// The object was deleted
    Deleted(K),
}

/// A watch stream failure; listeners log these and keep going.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct WatchError(pub String);

/// Stream of watch events for one resource kind.
pub type EventStream<K> = BoxStream<'static, Result<ResourceEvent<K>, WatchError>>;

/// Uniform operations on one resource kind within one scope.
#[async_trait]
pub trait ResourceApi<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Fetch an object by name.
    async fn get(&self, name: &str) -> Result<K, kube::Error>;

    /// Create an object.
    async fn create(&self, resource: &K) -> Result<K, kube::Error>;

    /// Replace an object. A `resourceVersion` on `resource` makes this a
    /// conditional update that fails with a conflict if the object changed.
    async fn replace(&self, name: &str, resource: &K) -> Result<K, kube::Error>;

    /// Delete an object by name.
    async fn delete(&self, name: &str) -> Result<(), kube::Error>;

    /// List objects matching the query.
    async fn list(&self, query: &ListQuery) -> Result<Vec<K>, kube::Error>;

    /// Watch objects matching the query.
    fn watch(&self, query: &ListQuery) -> EventStream<K>;
}

#[async_trait]
impl<K> ResourceApi<K> for Api<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, name: &str) -> Result<K, kube::Error> {
        Api::get(self, name).await
    }

    async fn create(&self, resource: &K) -> Result<K, kube::Error> {
        Api::create(self, &PostParams::default(), resource).await
    }

    async fn replace(&self, name: &str, resource: &K) -> Result<K, kube::Error> {
        Api::replace(self, name, &PostParams::default(), resource).await
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        Api::delete(self, name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<K>, kube::Error> {
        Api::list(self, &query.list_params())
            .await
            .map(|list| list.items)
    }

    fn watch(&self, query: &ListQuery) -> EventStream<K> {
        watcher(self.clone(), query.watcher_config())
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
                        Some(Ok(ResourceEvent::Applied(obj)))
                    }
                    Ok(watcher::Event::Delete(obj)) => Some(Ok(ResourceEvent::Deleted(obj))),
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(WatchError(e.to_string()))),
                }
            })
            .boxed()
    }
}

/// Source of per-kind [`ResourceApi`] handles.
pub trait Platform: Send + Sync {
    /// Cluster-scoped namespaces.
    fn namespaces(&self) -> Arc<dyn ResourceApi<Namespace>>;

    /// Network attachments in a namespace.
    fn network_attachments(&self, namespace: &str)
        -> Arc<dyn ResourceApi<NetworkAttachmentDefinition>>;

    /// Overlay networks in a namespace.
    fn virtual_networks(&self, namespace: &str) -> Arc<dyn ResourceApi<VirtualNetwork>>;

    /// Virtual machine instances in a namespace.
    fn instances(&self, namespace: &str) -> Arc<dyn ResourceApi<VirtualMachineInstance>>;

    /// Services in a namespace.
    fn services(&self, namespace: &str) -> Arc<dyn ResourceApi<Service>>;

    /// Secrets in a namespace.
    fn secrets(&self, namespace: &str) -> Arc<dyn ResourceApi<Secret>>;

    /// Pods in a namespace.
    fn pods(&self, namespace: &str) -> Arc<dyn ResourceApi<Pod>>;
}

/// [`Platform`] backed by a live Kubernetes API server.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    /// Wrap an initialized Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Platform for KubePlatform {
    fn namespaces(&self) -> Arc<dyn ResourceApi<Namespace>> {
        Arc::new(Api::<Namespace>::all(self.client.clone()))
    }

    fn network_attachments(
        &self,
        namespace: &str,
    ) -> Arc<dyn ResourceApi<NetworkAttachmentDefinition>> {
        Arc::new(Api::<NetworkAttachmentDefinition>::namespaced(
            self.client.clone(),
            namespace,
        ))
    }

    fn virtual_networks(&self, namespace: &str) -> Arc<dyn ResourceApi<VirtualNetwork>> {
        Arc::new(Api::<VirtualNetwork>::namespaced(
            self.client.clone(),
            namespace,
        ))
    }

    fn instances(&self, namespace: &str) -> Arc<dyn ResourceApi<VirtualMachineInstance>> {
        Arc::new(Api::<VirtualMachineInstance>::namespaced(
            self.client.clone(),
            namespace,
        ))
    }

    fn services(&self, namespace: &str) -> Arc<dyn ResourceApi<Service>> {
        Arc::new(Api::<Service>::namespaced(self.client.clone(), namespace))
    }

    fn secrets(&self, namespace: &str) -> Arc<dyn ResourceApi<Secret>> {
        Arc::new(Api::<Secret>::namespaced(self.client.clone(), namespace))
    }

    fn pods(&self, namespace: &str) -> Arc<dyn ResourceApi<Pod>> {
        Arc::new(Api::<Pod>::namespaced(self.client.clone(), namespace))
    }
}

/// Returns `true` if the API server reported that the object does not exist.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == HTTP_NOT_FOUND)
}

/// Returns `true` if a create failed because the object already exists.
#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == HTTP_CONFLICT && ae.reason == REASON_ALREADY_EXISTS)
}

/// Returns `true` if an update lost an optimistic-lock race.
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == HTTP_CONFLICT && ae.reason != REASON_ALREADY_EXISTS)
}

#[cfg(test)]
#[path = "platform_tests.rs"]
mod platform_tests;
