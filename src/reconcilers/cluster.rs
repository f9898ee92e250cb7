// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster provisioning orchestration.
//!
//! A provisioning run walks a fixed sequence of states. Each state ensures the
//! resources it owns exist (adopting what a previous run left behind) and waits
//! for the platform to report them usable before the next state starts:
//!
//! ```text
//! Started → NamespaceEnsured → PrimaryNetworkReady → [SecondaryNetworkReady]
//!         → InstancesSubmitted → InstancesRunning → ServiceReady → InventoryWritten
//! ```
//!
//! Any error moves the run to [`ProvisionState::Failed`] and aborts it. Nothing
//! is cleaned up; re-running the same cluster definition resumes from whatever
//! already exists.

use crate::cloudinit::BootConfig;
use crate::config::{ClusterSpec, ProvisionConfig};
use crate::constants::{
    DEPLOYER_FILE_NAME, DNS_SERVICE_NAME, DNS_SERVICE_NAMESPACE, LABEL_UPDATE_MAX_ATTEMPTS,
    MIRROR_SERVICE_NAME, REGISTRY_SERVICE_ADDRESS, REGISTRY_SERVICE_NAME,
    SHARED_SERVICE_NAMESPACE,
};
use crate::crd::{NetworkAttachmentDefinition, VirtualMachineInstance};
use crate::deployer::{render_deployer, DeployerParams};
use crate::errors::ProvisionError;
use crate::inventory::{synthesize, write_artifact, write_inventory};
use crate::labels::CLUSTER_LABEL;
use crate::network::{aggregate, collect_instances};
use crate::platform::{is_not_found, ListQuery, Platform, ResourceApi};
use crate::reconcilers::ensure::{ensure, label_virtual_network, upsert};
use crate::reconcilers::readiness::{
    network_status_matches, poll_until, running_instance_count, service_address, wait_until,
    GateOptions,
};
use crate::resources::{
    build_boot_secret, build_instance, build_namespace, build_network_attachment, build_service,
    expected_network_status, instance_definitions, InstanceDefinition,
};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Progress of a provisioning run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionState {
    /// Nothing has been ensured yet
    #[default]
    Started,
    /// The cluster namespace exists
    NamespaceEnsured,
    /// The primary network attachment is ready and its network labelled
    PrimaryNetworkReady,
    /// The control-data network attachment is ready and its network labelled
    SecondaryNetworkReady,
    /// Every instance and its boot configuration has been submitted
    InstancesSubmitted,
    /// Every submitted instance has a running launcher pod
    InstancesRunning,
    /// The API server service has an address
    ServiceReady,
    /// The inventory and deployment manifest are on disk
    InventoryWritten,
    /// The run aborted
    Failed,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "Started",
            Self::NamespaceEnsured => "NamespaceEnsured",
            Self::PrimaryNetworkReady => "PrimaryNetworkReady",
            Self::SecondaryNetworkReady => "SecondaryNetworkReady",
            Self::InstancesSubmitted => "InstancesSubmitted",
            Self::InstancesRunning => "InstancesRunning",
            Self::ServiceReady => "ServiceReady",
            Self::InventoryWritten => "InventoryWritten",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Resources of one kind touched by a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceTally {
    /// Objects this run created
    pub created: u32,
    /// Objects that already existed and were adopted (or replaced)
    pub adopted: u32,
}

/// Outcome of a successful provisioning run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProvisionReport {
    /// Last state reached
    pub state: ProvisionState,
    /// Created and adopted counts keyed by resource kind
    pub resources: BTreeMap<String, ResourceTally>,
    /// Number of instances submitted
    pub instances: usize,
    /// Address of the API server service
    pub service_address: Option<String>,
    /// Path of the written inventory
    pub inventory_path: Option<PathBuf>,
    /// Path of the written deployment manifest
    pub deployer_path: Option<PathBuf>,
}

impl ProvisionReport {
    fn record<K: Resource<DynamicType = ()>>(&mut self, existed: bool) {
        let tally = self
            .resources
            .entry(K::kind(&()).to_string())
            .or_default();
        if existed {
            tally.adopted += 1;
        } else {
            tally.created += 1;
        }
    }

    /// Objects of `kind` created by this run.
    #[must_use]
    pub fn created(&self, kind: &str) -> u32 {
        self.resources.get(kind).map_or(0, |tally| tally.created)
    }

    /// Objects of `kind` adopted by this run.
    #[must_use]
    pub fn adopted(&self, kind: &str) -> u32 {
        self.resources.get(kind).map_or(0, |tally| tally.adopted)
    }

    /// Objects created by this run across every kind.
    #[must_use]
    pub fn total_created(&self) -> u32 {
        self.resources.values().map(|tally| tally.created).sum()
    }
}

/// Platform services the instances are configured against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    /// Address of the platform DNS service
    pub dns: String,
    /// Address of the package mirror service, if one exists
    pub mirror: Option<String>,
    /// Address of the in-cluster image registry, if one exists
    pub registry: Option<String>,
}

impl Environment {
    /// Image reference instances boot from, pulled through the registry if present.
    #[must_use]
    pub fn image(&self, image: &str) -> String {
        match &self.registry {
            Some(registry) => format!("{registry}/{image}"),
            None => image.to_string(),
        }
    }
}

/// Looks up the platform services instances depend on.
///
/// The DNS service is required; the package mirror and the image registry are
/// optional and only used when present.
///
/// # Errors
///
/// - [`ProvisionError::LookupFailed`] if a service lookup fails for any reason
///   other than "not found", or the DNS service does not exist
/// - [`ProvisionError::InvalidResource`] if the DNS service has no address
pub async fn discover_environment(platform: &dyn Platform) -> Result<Environment, ProvisionError> {
    let kind = Service::kind(&()).to_string();

    let dns_service = platform
        .services(DNS_SERVICE_NAMESPACE)
        .get(DNS_SERVICE_NAME)
        .await
        .map_err(|source| ProvisionError::LookupFailed {
            kind: kind.clone(),
            namespace: DNS_SERVICE_NAMESPACE.to_string(),
            name: DNS_SERVICE_NAME.to_string(),
            source,
        })?;
    let dns = service_address(&dns_service).ok_or_else(|| ProvisionError::InvalidResource {
        kind: kind.clone(),
        reason: format!("{DNS_SERVICE_NAMESPACE}/{DNS_SERVICE_NAME} has no cluster IP"),
    })?;

    let shared = platform.services(SHARED_SERVICE_NAMESPACE);
    let mirror = optional_service(shared.as_ref(), MIRROR_SERVICE_NAME)
        .await?
        .and_then(|service| service_address(&service));
    let registry = optional_service(shared.as_ref(), REGISTRY_SERVICE_NAME)
        .await?
        .map(|_| REGISTRY_SERVICE_ADDRESS.to_string());

    info!(dns = %dns, mirror = ?mirror, registry = ?registry, "Discovered platform services");
    Ok(Environment {
        dns,
        mirror,
        registry,
    })
}

async fn optional_service(
    api: &dyn ResourceApi<Service>,
    name: &str,
) -> Result<Option<Service>, ProvisionError> {
    match api.get(name).await {
        Ok(service) => Ok(Some(service)),
        Err(e) if is_not_found(&e) => {
            debug!(namespace = %SHARED_SERVICE_NAMESPACE, name = %name, "Optional service not present");
            Ok(None)
        }
        Err(source) => Err(ProvisionError::LookupFailed {
            kind: Service::kind(&()).to_string(),
            namespace: SHARED_SERVICE_NAMESPACE.to_string(),
            name: name.to_string(),
            source,
        }),
    }
}

/// Provisions the cluster described by `spec`.
///
/// This function:
/// 1. Ensures the cluster namespace
/// 2. Ensures the primary network attachment, waits for it and labels its network
/// 3. Does the same for the control-data network when one is configured
/// 4. Submits one boot configuration `Secret` and one instance per definition
/// 5. Waits until every submitted instance has a running launcher pod
/// 6. Ensures the API server `Service` and waits for its address
/// 7. Classifies instance addresses and writes the inventory and deployment
///    manifest into `spec.kubeconfigdir`
///
/// Re-running with the same definition creates nothing new and rewrites
/// byte-identical artifacts.
///
/// # Errors
///
/// Returns the first [`ProvisionError`] raised by any step. The inventory is
/// only written once it is fully built.
pub async fn provision_cluster(
    platform: &dyn Platform,
    spec: &ClusterSpec,
    config: &ProvisionConfig,
) -> Result<ProvisionReport, ProvisionError> {
    info!(cluster = %spec.name, namespace = %spec.namespace, controllers = spec.controller, workers = spec.worker, "Provisioning cluster");

    let mut run = Run {
        platform,
        spec,
        config,
        report: ProvisionReport::default(),
    };

    match run.execute().await {
        Ok(()) => {
            info!(
                cluster = %spec.name,
                namespace = %spec.namespace,
                created = run.report.total_created(),
                inventory = ?run.report.inventory_path,
                "Cluster provisioned"
            );
            Ok(run.report)
        }
        Err(e) => {
            error!(
                cluster = %spec.name,
                namespace = %spec.namespace,
                last_state = %run.report.state,
                state = %ProvisionState::Failed,
                condition = e.condition(),
                error = %e,
                "Provisioning failed"
            );
            Err(e)
        }
    }
}

struct Run<'a> {
    platform: &'a dyn Platform,
    spec: &'a ClusterSpec,
    config: &'a ProvisionConfig,
    report: ProvisionReport,
}

impl Run<'_> {
    async fn execute(&mut self) -> Result<(), ProvisionError> {
        let spec = self.spec;
        spec.validate()?;
        let ssh_key = read_ssh_key(spec).await?;

        let namespace = ensure(
            self.platform.namespaces().as_ref(),
            &build_namespace(&spec.namespace),
        )
        .await?;
        self.report.record::<Namespace>(namespace.existed);
        self.advance(ProvisionState::NamespaceEnsured);

        self.ensure_network(&spec.name, &spec.subnet).await?;
        self.advance(ProvisionState::PrimaryNetworkReady);

        if spec.has_ctrl_data_network() {
            self.ensure_network(&spec.ctrl_data_network_name(), &spec.ctrldatasubnet)
                .await?;
            self.advance(ProvisionState::SecondaryNetworkReady);
        }

        let environment = discover_environment(self.platform).await?;
        let definitions = instance_definitions(spec);
        self.submit_instances(&definitions, &environment, &ssh_key)
            .await?;
        self.advance(ProvisionState::InstancesSubmitted);

        let pods = self.wait_for_instances(&definitions).await?;
        self.advance(ProvisionState::InstancesRunning);

        let address = self.ensure_service().await?;
        self.advance(ProvisionState::ServiceReady);

        self.write_artifacts(&pods, &definitions, &address).await?;
        self.advance(ProvisionState::InventoryWritten);
        Ok(())
    }

    fn advance(&mut self, state: ProvisionState) {
        info!(
            cluster = %self.spec.name,
            namespace = %self.spec.namespace,
            from = %self.report.state,
            to = %state,
            "Provisioning state transition"
        );
        self.report.state = state;
    }

    fn gate(&self) -> GateOptions {
        GateOptions::from(self.config)
    }

    /// Ensures one network attachment, waits for the network plugin to report
    /// it created and labels the backing `VirtualNetwork`.
    async fn ensure_network(&mut self, name: &str, subnet: &str) -> Result<(), ProvisionError> {
        let namespace = self.spec.namespace.as_str();
        let api = self.platform.network_attachments(namespace);

        let attachment = ensure(
            api.as_ref(),
            &build_network_attachment(namespace, name, subnet),
        )
        .await?;
        self.report
            .record::<NetworkAttachmentDefinition>(attachment.existed);

        // A fresh attachment usually settles within seconds
        let expected = expected_network_status(name, subnet);
        let settled = !attachment.existed
            && poll_until(
                api.as_ref(),
                name,
                self.config.network_poll_attempts,
                self.config.network_poll_interval,
                |nad| network_status_matches(nad, &expected),
            )
            .await
            .is_some();

        if !settled {
            wait_until(
                api,
                namespace,
                ListQuery::named(name),
                &format!("network {namespace}/{name}"),
                self.gate(),
                move |nads: &[NetworkAttachmentDefinition]| {
                    nads.iter().any(|nad| network_status_matches(nad, &expected))
                },
            )
            .await?;
        }
        info!(namespace = %namespace, name = %name, subnet = %subnet, "Network attachment ready");

        label_virtual_network(
            self.platform.virtual_networks(namespace).as_ref(),
            namespace,
            name,
            LABEL_UPDATE_MAX_ATTEMPTS,
        )
        .await?;
        Ok(())
    }

    async fn submit_instances(
        &mut self,
        definitions: &[InstanceDefinition],
        environment: &Environment,
        ssh_key: &str,
    ) -> Result<(), ProvisionError> {
        let spec = self.spec;
        let namespace = spec.namespace.as_str();
        let gateway = spec.gateway()?;
        let image = environment.image(&spec.image);
        let secrets = self.platform.secrets(namespace);
        let instances = self.platform.instances(namespace);

        for definition in definitions {
            let userdata = BootConfig {
                hostname: &definition.name,
                ssh_key,
                gateway,
                dns: &environment.dns,
                mirror: environment.mirror.as_deref(),
                registry: environment.registry.as_deref(),
                routes: &spec.routes,
                distro: spec.distro,
                ctrl_data: spec.has_ctrl_data_network(),
            }
            .render()?;

            let secret = upsert(
                secrets.as_ref(),
                &build_boot_secret(namespace, &definition.name, &userdata),
            )
            .await?;
            self.report.record::<Secret>(secret.existed);

            let instance = ensure(
                instances.as_ref(),
                &build_instance(spec, definition, &image),
            )
            .await?;
            self.report
                .record::<VirtualMachineInstance>(instance.existed);
        }

        self.report.instances = definitions.len();
        Ok(())
    }

    async fn wait_for_instances(
        &self,
        definitions: &[InstanceDefinition],
    ) -> Result<Vec<Pod>, ProvisionError> {
        let namespace = self.spec.namespace.as_str();
        let submitted: BTreeSet<String> = definitions
            .iter()
            .map(|definition| definition.name.clone())
            .collect();
        let required = self.spec.instance_count() as usize;

        wait_until(
            self.platform.pods(namespace),
            namespace,
            ListQuery::label(CLUSTER_LABEL, &self.spec.name),
            &format!("{required} running instance(s)"),
            self.gate(),
            move |pods: &[Pod]| running_instance_count(pods, &submitted) >= required,
        )
        .await
    }

    async fn ensure_service(&mut self) -> Result<String, ProvisionError> {
        let namespace = self.spec.namespace.as_str();
        let name = self.spec.name.as_str();
        let api = self.platform.services(namespace);

        let service = ensure(api.as_ref(), &build_service(self.spec)).await?;
        self.report.record::<Service>(service.existed);

        let address = match service_address(&service.resource) {
            Some(address) => address,
            None => {
                let what = format!("address of service {namespace}/{name}");
                let services = wait_until(
                    api,
                    namespace,
                    ListQuery::named(name),
                    &what,
                    self.gate(),
                    |services: &[Service]| services.iter().any(|s| service_address(s).is_some()),
                )
                .await?;
                services
                    .iter()
                    .find_map(service_address)
                    .ok_or_else(|| ProvisionError::WatchFailed {
                        kind: Service::kind(&()).to_string(),
                        what,
                        reason: "gate resolved without an address".to_string(),
                    })?
            }
        };

        info!(namespace = %namespace, name = %name, address = %address, "Service address assigned");
        self.report.service_address = Some(address.clone());
        Ok(address)
    }

    async fn write_artifacts(
        &mut self,
        pods: &[Pod],
        definitions: &[InstanceDefinition],
        service_address: &str,
    ) -> Result<(), ProvisionError> {
        let spec = self.spec;
        let records = collect_instances(&spec.namespace, pods, definitions)?;
        let instances = aggregate(spec, &records)?;

        let document = synthesize(&instances, spec, service_address);
        let manifest = render_deployer(&DeployerParams::from_spec(spec)?);
        let dir = artifacts_dir(spec);

        self.report.inventory_path = Some(write_inventory(&document, &dir).await?);
        let deployer_path = write_artifact(&dir, DEPLOYER_FILE_NAME, &manifest).await?;
        info!(path = %deployer_path.display(), "Created deployment manifest");
        self.report.deployer_path = Some(deployer_path);
        Ok(())
    }
}

async fn read_ssh_key(spec: &ClusterSpec) -> Result<String, ProvisionError> {
    let path = spec.expanded_keypath()?;
    let key = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ProvisionError::Io {
            path: path.clone(),
            source,
        })?;
    debug!(path = %path.display(), "Read SSH public key");
    Ok(key.trim().to_string())
}

fn artifacts_dir(spec: &ClusterSpec) -> PathBuf {
    let dir = spec.kubeconfigdir.trim();
    if dir.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(dir)
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
