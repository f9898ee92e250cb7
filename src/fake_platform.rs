// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`Platform`] for unit tests.
//!
//! Objects are stored as JSON keyed by (kind, namespace, name) with a
//! monotonically increasing `resourceVersion`, so conditional replaces conflict
//! the way the API server does. Watches are fed from a broadcast channel.
//!
//! Optional hooks stand in for the controllers a real platform runs:
//!
//! - a new `NetworkAttachmentDefinition` gets its success status annotation and
//!   a `VirtualNetwork` of the same name
//! - a new `Service` gets a cluster IP
//! - a new `VirtualMachineInstance` gets a running launcher pod with a
//!   network-status annotation
//!
//! Faults can be injected per kind: failing lookups, version conflicts on
//! replace, and a competing create racing ours.

use crate::crd::{NetworkAttachmentDefinition, VirtualMachineInstance, VirtualNetwork};
use crate::labels::{
    KUBEVIRT_DOMAIN_LABEL, NETWORKS_ANNOTATION, NETWORKS_STATUS_ANNOTATION,
    NETWORK_STATUS_ANNOTATION,
};
use crate::platform::{
    EventStream, ListQuery, Platform, ResourceApi, ResourceEvent, WatchError,
};
use crate::resources::expected_network_status;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

type ObjectKey = (String, String, String);

/// Controllers simulated by the fake platform.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Hooks {
    /// Report network attachments as ready and create their `VirtualNetwork`
    pub network_status: bool,
    /// Assign a cluster IP to new services
    pub cluster_ip: bool,
    /// Launch a running pod for every new instance
    pub launch_pods: bool,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            network_status: true,
            cluster_ip: true,
            launch_pods: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Op {
    Create,
    Replace,
    Delete,
}

#[derive(Clone, Debug)]
struct StoredEvent {
    kind: String,
    namespace: String,
    object: Value,
    deleted: bool,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    next_version: u64,
    next_host: u32,
    next_service: u32,
    counters: BTreeMap<(String, Op), u32>,
    failing_gets: BTreeSet<String>,
    failing_lists: BTreeSet<String>,
    pending_conflicts: BTreeMap<String, u32>,
    racing_creates: BTreeSet<String>,
}

/// Shared in-memory platform; clones observe the same state.
#[derive(Clone)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<StoredEvent>,
    hooks: Hooks,
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(
        kube::core::Status {
            status: Some(kube::core::response::StatusSummary::Failure),
            message,
            reason: reason.to_string(),
            code,
            metadata: None,
            details: None,
        }
        .boxed(),
    )
}

fn name_of(object: &Value) -> String {
    object["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

fn matches_query(object: &Value, query: &ListQuery) -> bool {
    if let Some(labels) = &query.labels {
        for pair in labels.split(',').filter(|pair| !pair.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return false;
            };
            if object["metadata"]["labels"][key].as_str() != Some(value) {
                return false;
            }
        }
    }
    if let Some(fields) = &query.fields {
        if let Some(name) = fields.strip_prefix("metadata.name=") {
            if name_of(object) != name {
                return false;
            }
        }
    }
    true
}

impl FakePlatform {
    /// Platform with every hook enabled, seeded with the cluster DNS service.
    pub fn new() -> Self {
        Self::with_hooks(Hooks::default())
    }

    /// Platform with the given hooks, seeded with the cluster DNS service.
    pub fn with_hooks(hooks: Hooks) -> Self {
        let (events, _) = broadcast::channel(1024);
        let platform = Self {
            state: Arc::new(Mutex::new(State {
                next_host: 10,
                next_service: 100,
                ..Default::default()
            })),
            events,
            hooks,
        };
        platform.seed(&json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "coredns", "namespace": "kube-system" },
            "spec": { "clusterIP": "10.96.0.10" }
        }));
        platform
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake platform state poisoned")
    }

    fn api<K>(&self, namespace: &str) -> Arc<dyn ResourceApi<K>>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Arc::new(FakeApi::<K> {
            platform: self.clone(),
            namespace: namespace.to_string(),
            marker: PhantomData,
        })
    }

    /// Stores an object without counting it as a create.
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, object: &K) {
        let value = serde_json::to_value(object).expect("serializable object");
        self.seed(&value);
    }

    fn seed(&self, value: &Value) {
        let kind = value["kind"].as_str().unwrap_or_default().to_string();
        let namespace = value["metadata"]["namespace"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let mut state = self.lock();
        self.store(&mut state, &kind, &namespace, value.clone());
    }

    /// Typed copy of a stored object.
    pub fn object<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        self.lock()
            .objects
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).expect("stored object deserializes"))
    }

    /// Number of stored objects of `kind` in `namespace`.
    pub fn count(&self, kind: &str, namespace: &str) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(k, ns, _)| k == kind && ns == namespace)
            .count()
    }

    fn counter(&self, kind: &str, op: Op) -> u32 {
        self.lock()
            .counters
            .get(&(kind.to_string(), op))
            .copied()
            .unwrap_or_default()
    }

    /// Successful create calls for `kind`.
    pub fn creates(&self, kind: &str) -> u32 {
        self.counter(kind, Op::Create)
    }

    /// Successful replace calls for `kind`.
    pub fn replaces(&self, kind: &str) -> u32 {
        self.counter(kind, Op::Replace)
    }

    /// Successful delete calls for `kind`.
    pub fn deletes(&self, kind: &str) -> u32 {
        self.counter(kind, Op::Delete)
    }

    /// Successful create calls across every kind.
    pub fn total_creates(&self) -> u32 {
        self.lock()
            .counters
            .iter()
            .filter(|((_, op), _)| *op == Op::Create)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Makes every get of `kind` fail with a server error.
    pub fn fail_gets(&self, kind: &str) {
        self.lock().failing_gets.insert(kind.to_string());
    }

    /// Makes every list of `kind` fail with a server error.
    pub fn fail_lists(&self, kind: &str) {
        self.lock().failing_lists.insert(kind.to_string());
    }

    /// Makes the next `times` replaces of `kind` fail with a version conflict.
    pub fn conflict_replaces(&self, kind: &str, times: u32) {
        self.lock()
            .pending_conflicts
            .insert(kind.to_string(), times);
    }

    /// Makes the next create of `kind` lose against a concurrent create.
    pub fn race_next_create(&self, kind: &str) {
        self.lock().racing_creates.insert(kind.to_string());
    }

    /// Marks a network attachment ready the way the network plugin does.
    pub fn report_network_ready(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        self.mark_network_ready(&mut state, namespace, name);
    }

    /// Launches running pods for every instance in `namespace` without one.
    pub fn launch_instances(&self, namespace: &str) {
        let mut state = self.lock();
        let kind = VirtualMachineInstance::kind(&()).to_string();
        let instances: Vec<Value> = state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, value)| value.clone())
            .collect();
        for instance in instances {
            let pod_name = format!("virt-launcher-{}", name_of(&instance));
            let key = ("Pod".to_string(), namespace.to_string(), pod_name);
            if !state.objects.contains_key(&key) {
                self.launch_pod(&mut state, namespace, &instance);
            }
        }
    }

    fn store(&self, state: &mut State, kind: &str, namespace: &str, mut value: Value) -> Value {
        state.next_version += 1;
        value["metadata"]["resourceVersion"] = json!(state.next_version.to_string());
        if !namespace.is_empty() {
            value["metadata"]["namespace"] = json!(namespace);
        }
        let key = (kind.to_string(), namespace.to_string(), name_of(&value));
        state.objects.insert(key, value.clone());
        let _ = self.events.send(StoredEvent {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            object: value.clone(),
            deleted: false,
        });
        value
    }

    fn bump(state: &mut State, kind: &str, op: Op) {
        *state.counters.entry((kind.to_string(), op)).or_default() += 1;
    }

    fn mark_network_ready(&self, state: &mut State, namespace: &str, name: &str) {
        let key = (
            NetworkAttachmentDefinition::kind(&()).to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        let Some(mut nad) = state.objects.get(&key).cloned() else {
            return;
        };
        let subnet = nad["metadata"]["annotations"][NETWORKS_ANNOTATION]
            .as_str()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|networks| networks["ipamV4Subnet"].as_str().map(String::from))
            .unwrap_or_default();
        nad["metadata"]["annotations"][NETWORKS_STATUS_ANNOTATION] =
            json!(expected_network_status(name, &subnet));
        self.store(state, &key.0, namespace, nad);

        let network_kind = VirtualNetwork::kind(&()).to_string();
        let network_key = (network_kind.clone(), namespace.to_string(), name.to_string());
        if !state.objects.contains_key(&network_key) {
            let network = json!({
                "apiVersion": "core.juniper.net/v1alpha1",
                "kind": network_kind,
                "metadata": { "name": name, "labels": {} },
                "spec": { "v4SubnetReference": { "name": format!("{name}-v4") } }
            });
            self.store(state, &network_kind, namespace, network);
        }
    }

    fn launch_pod(&self, state: &mut State, namespace: &str, instance: &Value) {
        let name = name_of(instance);
        let host = state.next_host;
        state.next_host += 1;

        let networks = instance["spec"]["networks"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let status: Vec<Value> = networks
            .iter()
            .map(|network| {
                if network.get("pod").is_some() {
                    json!({
                        "name": "default-podnetwork",
                        "interface": "eth0",
                        "ips": [format!("192.168.1.{host}")],
                        "default": true
                    })
                } else {
                    let network_name = network["multus"]["networkName"]
                        .as_str()
                        .unwrap_or_default();
                    let prefix = if network_name.ends_with("-ctrldata") {
                        "10.1.0"
                    } else {
                        "10.0.0"
                    };
                    json!({
                        "name": network_name,
                        "interface": format!("net-{}", network["name"].as_str().unwrap_or_default()),
                        "ips": [format!("{prefix}.{host}")]
                    })
                }
            })
            .collect();

        let mut labels = instance["metadata"]["labels"].clone();
        if !labels.is_object() {
            labels = json!({});
        }
        labels[KUBEVIRT_DOMAIN_LABEL] = json!(name);

        let pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": format!("virt-launcher-{name}"),
                "labels": labels,
                "annotations": {
                    NETWORK_STATUS_ANNOTATION: Value::String(Value::Array(status).to_string())
                }
            },
            "spec": { "hostname": name, "containers": [] },
            "status": { "phase": "Running" }
        });
        self.store(state, "Pod", namespace, pod);
    }

    fn after_create(&self, state: &mut State, kind: &str, namespace: &str, object: &Value) {
        if kind == NetworkAttachmentDefinition::kind(&()) && self.hooks.network_status {
            self.mark_network_ready(state, namespace, &name_of(object));
        } else if kind == Service::kind(&()) && self.hooks.cluster_ip {
            let ip = format!("10.96.1.{}", state.next_service);
            state.next_service += 1;
            let mut service = object.clone();
            service["spec"]["clusterIP"] = json!(ip);
            self.store(state, kind, namespace, service);
        } else if kind == VirtualMachineInstance::kind(&()) && self.hooks.launch_pods {
            self.launch_pod(state, namespace, object);
        }
    }
}

impl Platform for FakePlatform {
    fn namespaces(&self) -> Arc<dyn ResourceApi<Namespace>> {
        self.api("")
    }

    fn network_attachments(
        &self,
        namespace: &str,
    ) -> Arc<dyn ResourceApi<NetworkAttachmentDefinition>> {
        self.api(namespace)
    }

    fn virtual_networks(&self, namespace: &str) -> Arc<dyn ResourceApi<VirtualNetwork>> {
        self.api(namespace)
    }

    fn instances(&self, namespace: &str) -> Arc<dyn ResourceApi<VirtualMachineInstance>> {
        self.api(namespace)
    }

    fn services(&self, namespace: &str) -> Arc<dyn ResourceApi<Service>> {
        self.api(namespace)
    }

    fn secrets(&self, namespace: &str) -> Arc<dyn ResourceApi<Secret>> {
        self.api(namespace)
    }

    fn pods(&self, namespace: &str) -> Arc<dyn ResourceApi<Pod>> {
        self.api(namespace)
    }
}

struct FakeApi<K> {
    platform: FakePlatform,
    namespace: String,
    marker: PhantomData<fn() -> K>,
}

impl<K> FakeApi<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn key(&self, name: &str) -> ObjectKey {
        (Self::kind(), self.namespace.clone(), name.to_string())
    }

    fn decode(value: Value) -> K {
        serde_json::from_value(value).expect("stored object deserializes")
    }

    fn not_found(&self, name: &str) -> kube::Error {
        api_error(
            404,
            "NotFound",
            format!("{} \"{name}\" not found", Self::kind()),
        )
    }
}

#[async_trait]
impl<K> ResourceApi<K> for FakeApi<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<K, kube::Error> {
        let state = self.platform.lock();
        if state.failing_gets.contains(&Self::kind()) {
            return Err(api_error(500, "InternalError", "injected failure".into()));
        }
        state
            .objects
            .get(&self.key(name))
            .cloned()
            .map(Self::decode)
            .ok_or_else(|| self.not_found(name))
    }

    async fn create(&self, resource: &K) -> Result<K, kube::Error> {
        let kind = Self::kind();
        let value = serde_json::to_value(resource).expect("serializable object");
        let name = name_of(&value);
        let key = self.key(&name);

        let mut state = self.platform.lock();
        let already_exists = || {
            api_error(
                409,
                "AlreadyExists",
                format!("{kind} \"{name}\" already exists"),
            )
        };
        if state.racing_creates.remove(&kind) {
            self.platform
                .store(&mut state, &kind, &self.namespace, value.clone());
            return Err(already_exists());
        }
        if state.objects.contains_key(&key) {
            return Err(already_exists());
        }

        let stored = self
            .platform
            .store(&mut state, &kind, &self.namespace, value);
        FakePlatform::bump(&mut state, &kind, Op::Create);
        self.platform
            .after_create(&mut state, &kind, &self.namespace, &stored);
        Ok(Self::decode(stored))
    }

    async fn replace(&self, name: &str, resource: &K) -> Result<K, kube::Error> {
        let kind = Self::kind();
        let value = serde_json::to_value(resource).expect("serializable object");

        let mut state = self.platform.lock();
        let Some(current) = state.objects.get(&self.key(name)).cloned() else {
            return Err(self.not_found(name));
        };

        let conflict = || {
            api_error(
                409,
                "Conflict",
                format!("the object has been modified; {kind} \"{name}\""),
            )
        };
        if let Some(remaining) = state.pending_conflicts.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(conflict());
            }
        }
        let requested = value["metadata"]["resourceVersion"].as_str();
        if requested.is_some() && requested != current["metadata"]["resourceVersion"].as_str() {
            return Err(conflict());
        }

        let stored = self
            .platform
            .store(&mut state, &kind, &self.namespace, value);
        FakePlatform::bump(&mut state, &kind, Op::Replace);
        Ok(Self::decode(stored))
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        let kind = Self::kind();
        let mut state = self.platform.lock();
        let Some(object) = state.objects.remove(&self.key(name)) else {
            return Err(self.not_found(name));
        };
        FakePlatform::bump(&mut state, &kind, Op::Delete);
        let _ = self.platform.events.send(StoredEvent {
            kind,
            namespace: self.namespace.clone(),
            object,
            deleted: true,
        });
        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<K>, kube::Error> {
        let kind = Self::kind();
        let state = self.platform.lock();
        if state.failing_lists.contains(&kind) {
            return Err(api_error(500, "InternalError", "injected failure".into()));
        }
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), value)| {
                *k == kind && *ns == self.namespace && matches_query(value, query)
            })
            .map(|(_, value)| Self::decode(value.clone()))
            .collect())
    }

    fn watch(&self, query: &ListQuery) -> EventStream<K> {
        let kind = Self::kind();
        let namespace = self.namespace.clone();
        let query = query.clone();
        let receiver = self.platform.events.subscribe();

        futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |event| {
            let relevant = event.kind == kind
                && event.namespace == namespace
                && matches_query(&event.object, &query);
            async move {
                if !relevant {
                    return None;
                }
                let object = match serde_json::from_value::<K>(event.object) {
                    Ok(object) => object,
                    Err(e) => return Some(Err(WatchError(e.to_string()))),
                };
                Some(Ok(if event.deleted {
                    ResourceEvent::Deleted(object)
                } else {
                    ResourceEvent::Applied(object)
                }))
            }
        })
        .boxed()
    }
}
