// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Readiness gates: waiting for the platform to report an asynchronous change.
//!
//! [`wait_until`] checks the current state once and returns immediately if the
//! predicate already holds. Otherwise it spawns a listener task that keeps a
//! snapshot of the matching objects up to date from a watch stream, re-lists on
//! a fixed interval to recover from missed events, and reports the first
//! snapshot that satisfies the predicate. The listener is owned by a
//! [`Subscription`] and aborted when it is dropped, including on timeout.
//!
//! [`poll_until`] is the bounded variant used right after creating an object
//! whose status is expected to settle within seconds.

use crate::config::ProvisionConfig;
use crate::constants::HEADLESS_CLUSTER_IP;
use crate::crd::NetworkAttachmentDefinition;
use crate::errors::ProvisionError;
use crate::labels::NETWORKS_STATUS_ANNOTATION;
use crate::network::{instance_name, is_running};
use crate::platform::{ListQuery, ResourceApi, ResourceEvent};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Deadline and re-list cadence of a readiness gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateOptions {
    /// Maximum wait; `None` waits until the condition holds
    pub timeout: Option<Duration>,
    /// Interval at which the listener re-lists besides watching
    pub poll_interval: Duration,
}

impl From<&ProvisionConfig> for GateOptions {
    fn from(config: &ProvisionConfig) -> Self {
        Self {
            timeout: config.gate_timeout,
            poll_interval: config.gate_poll_interval,
        }
    }
}

type GateResult<K> = Result<Vec<K>, ProvisionError>;

/// Handle on a running readiness listener.
///
/// Dropping the handle aborts the listener task.
pub struct Subscription<K> {
    kind: String,
    what: String,
    handle: JoinHandle<()>,
    receiver: oneshot::Receiver<GateResult<K>>,
}

impl<K> Drop for Subscription<K> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<K> Subscription<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    /// Spawns a listener over the objects matching `query`.
    pub fn spawn<P>(
        api: Arc<dyn ResourceApi<K>>,
        namespace: &str,
        query: ListQuery,
        what: &str,
        poll_interval: Duration,
        predicate: P,
    ) -> Self
    where
        P: Fn(&[K]) -> bool + Send + Sync + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let kind = K::kind(&()).to_string();
        let listener = Listener {
            api,
            namespace: namespace.to_string(),
            query,
            poll_interval,
            predicate,
        };
        let handle = tokio::spawn(async move {
            let result = listener.run().await;
            let _ = sender.send(result);
        });

        Self {
            kind,
            what: what.to_string(),
            handle,
            receiver,
        }
    }

    /// Waits for the listener's outcome, bounded by `timeout` if given.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::ReadinessTimeout`] if the deadline passes first
    /// - [`ProvisionError::WatchFailed`] if the listener stops without a result
    /// - any error the listener reports (e.g. a failed re-list)
    pub async fn wait(mut self, timeout: Option<Duration>) -> GateResult<K> {
        let started = Instant::now();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ProvisionError::ReadinessTimeout {
                        kind: self.kind.clone(),
                        what: self.what.clone(),
                        elapsed: started.elapsed(),
                    })
                }
            },
            None => (&mut self.receiver).await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ProvisionError::WatchFailed {
                kind: self.kind.clone(),
                what: self.what.clone(),
                reason: "listener stopped without a result".to_string(),
            }),
        }
    }
}

struct Listener<K, P> {
    api: Arc<dyn ResourceApi<K>>,
    namespace: String,
    query: ListQuery,
    poll_interval: Duration,
    predicate: P,
}

impl<K, P> Listener<K, P>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    P: Fn(&[K]) -> bool + Send + Sync + 'static,
{
    async fn run(self) -> GateResult<K> {
        let kind = K::kind(&()).to_string();
        let mut events = self.api.watch(&self.query);
        let mut watching = true;
        let mut snapshot: BTreeMap<String, K> = BTreeMap::new();

        // The first tick fires immediately, covering changes made between the
        // caller's check and the watch starting.
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.next(), if watching => match event {
                    Some(Ok(ResourceEvent::Applied(object))) => {
                        snapshot.insert(object_name(&object), object);
                    }
                    Some(Ok(ResourceEvent::Deleted(object))) => {
                        snapshot.remove(&object_name(&object));
                    }
                    Some(Err(e)) => {
                        warn!(kind = %kind, namespace = %self.namespace, error = %e, "Watch error, continuing");
                        continue;
                    }
                    None => {
                        warn!(kind = %kind, namespace = %self.namespace, "Watch stream ended, falling back to polling");
                        watching = false;
                        continue;
                    }
                },
                _ = ticker.tick() => {
                    let objects = self.api.list(&self.query).await.map_err(|source| {
                        ProvisionError::LookupFailed {
                            kind: kind.clone(),
                            namespace: self.namespace.clone(),
                            name: self.query.describe(),
                            source,
                        }
                    })?;
                    snapshot = objects
                        .into_iter()
                        .map(|object| (object_name(&object), object))
                        .collect();
                }
            }

            let current: Vec<K> = snapshot.values().cloned().collect();
            if (self.predicate)(&current) {
                return Ok(current);
            }
        }
    }
}

fn object_name<K: Resource>(object: &K) -> String {
    object.meta().name.clone().unwrap_or_default()
}

/// Waits until `predicate` holds over the objects matching `query`.
///
/// The current state is listed once first; if the predicate already holds, no
/// watch is opened.
///
/// # Errors
///
/// - [`ProvisionError::LookupFailed`] if listing fails
/// - [`ProvisionError::ReadinessTimeout`] if `options.timeout` passes first
/// - [`ProvisionError::WatchFailed`] if the listener stops without a result
pub async fn wait_until<K, P>(
    api: Arc<dyn ResourceApi<K>>,
    namespace: &str,
    query: ListQuery,
    what: &str,
    options: GateOptions,
    predicate: P,
) -> GateResult<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    P: Fn(&[K]) -> bool + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let current = api
        .list(&query)
        .await
        .map_err(|source| ProvisionError::LookupFailed {
            kind: kind.clone(),
            namespace: namespace.to_string(),
            name: query.describe(),
            source,
        })?;

    if predicate(&current) {
        debug!(kind = %kind, namespace = %namespace, what = %what, "Condition already satisfied");
        return Ok(current);
    }

    info!(kind = %kind, namespace = %namespace, what = %what, timeout = ?options.timeout, "Waiting for condition");
    let started = Instant::now();
    let subscription = Subscription::spawn(
        api,
        namespace,
        query,
        what,
        options.poll_interval,
        predicate,
    );
    let result = subscription.wait(options.timeout).await?;
    info!(kind = %kind, namespace = %namespace, what = %what, elapsed = ?started.elapsed(), "Condition satisfied");
    Ok(result)
}

/// Polls a single object until `predicate` holds, at most `attempts` times.
///
/// Lookup errors count as failed attempts. Returns `None` once the attempts
/// are used up.
pub async fn poll_until<K, P>(
    api: &dyn ResourceApi<K>,
    name: &str,
    attempts: u32,
    interval: Duration,
    predicate: P,
) -> Option<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    P: Fn(&K) -> bool,
{
    for attempt in 1..=attempts {
        match api.get(name).await {
            Ok(object) if predicate(&object) => return Some(object),
            Ok(_) => debug!(kind = %K::kind(&()), name = %name, attempt, "Condition not met yet"),
            Err(e) => debug!(kind = %K::kind(&()), name = %name, attempt, error = %e, "Lookup failed while polling"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}

/// Whether the network plugin reported the attachment as created.
#[must_use]
pub fn network_status_matches(nad: &NetworkAttachmentDefinition, expected: &str) -> bool {
    nad.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORKS_STATUS_ANNOTATION))
        .is_some_and(|status| status == expected)
}

/// Cluster IP of a service, once one is assigned.
#[must_use]
pub fn service_address(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != HEADLESS_CLUSTER_IP)
}

/// Number of distinct `submitted` instances with a running launcher pod.
#[must_use]
pub fn running_instance_count(pods: &[Pod], submitted: &BTreeSet<String>) -> usize {
    pods.iter()
        .filter(|pod| is_running(pod))
        .filter_map(instance_name)
        .filter(|name| submitted.contains(name))
        .collect::<BTreeSet<_>>()
        .len()
}

#[cfg(test)]
#[path = "readiness_tests.rs"]
mod readiness_tests;
