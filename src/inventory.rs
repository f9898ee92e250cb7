// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host inventory synthesis for the configuration stage.
//!
//! [`synthesize`] folds classified instances into an [`InventoryDocument`] with
//! the host groups the configuration stage expects:
//!
//! | Group         | Members                          |
//! |---------------|----------------------------------|
//! | `all`         | every instance, plus cluster vars |
//! | `kube-master` | controllers                      |
//! | `etcd`        | controllers                      |
//! | `kube-node`   | workers                          |
//! | `k8s-cluster` | children `kube-master`, `kube-node` |
//!
//! [`InventoryDocument::render`] emits line-oriented YAML: booleans unquoted,
//! lists as flow literals (`[10.0.0.9]`), group members as bare `name:` keys.
//! Every map is sorted, so rendering the same inputs is byte-identical.
//!
//! Artifacts are rendered completely before [`write_artifact`] touches the
//! filesystem, and are moved into place only once written, so a failed run
//! never leaves a partial file behind.

use crate::config::ClusterSpec;
use crate::constants::ARTIFACT_FILE_MODE;
use crate::errors::ProvisionError;
use crate::network::InstanceAddresses;
use crate::resources::Role;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Group holding every host and the cluster variables.
pub const ALL_GROUP: &str = "all";
/// Control-plane group.
pub const KUBE_MASTER_GROUP: &str = "kube-master";
/// Metadata store group (same members as the control plane).
pub const ETCD_GROUP: &str = "etcd";
/// Worker group.
pub const KUBE_NODE_GROUP: &str = "kube-node";
/// Parent group of the control plane and workers.
pub const K8S_CLUSTER_GROUP: &str = "k8s-cluster";

/// Directory mode for the artifacts directory.
#[cfg(unix)]
const ARTIFACT_DIR_MODE: u32 = 0o755;

/// A variable value in the inventory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InventoryValue {
    /// Rendered unquoted (`true` / `false`)
    Bool(bool),
    /// Rendered plain, or quoted when YAML requires it
    Str(String),
    /// Rendered as a flow sequence (`[a, b]`)
    List(Vec<String>),
}

impl From<bool> for InventoryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for InventoryValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for InventoryValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Members of a host group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventoryGroup {
    /// Member hosts
    pub hosts: BTreeSet<String>,
    /// Member groups
    pub children: BTreeSet<String>,
}

/// Complete inventory, independent of its textual form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventoryDocument {
    /// Per-host variables, keyed by host name
    pub hosts: BTreeMap<String, BTreeMap<String, InventoryValue>>,
    /// Cluster-wide variables
    pub vars: BTreeMap<String, InventoryValue>,
    /// Host groups other than `all`
    pub groups: BTreeMap<String, InventoryGroup>,
}

/// Builds the inventory for the classified instances.
///
/// `service_address` is the API server service address, added to the
/// certificate subject alternative names.
#[must_use]
pub fn synthesize(
    instances: &BTreeMap<String, InstanceAddresses>,
    spec: &ClusterSpec,
    service_address: &str,
) -> InventoryDocument {
    let mut document = InventoryDocument::default();

    let mut masters = InventoryGroup::default();
    let mut nodes = InventoryGroup::default();

    for (name, instance) in instances {
        let addresses = &instance.addresses;
        let mut host = BTreeMap::new();
        if let Some(management) = &addresses.management {
            host.insert("ansible_host".to_string(), management.clone().into());
        }
        host.insert("ip".to_string(), addresses.data_plane.clone().into());
        if let Some(ctrl_data) = &addresses.ctrl_data {
            host.insert("ctrl_data_ip".to_string(), ctrl_data.clone().into());
        }
        document.hosts.insert(name.clone(), host);

        match instance.role {
            Role::Controller => masters.hosts.insert(name.clone()),
            Role::Worker => nodes.hosts.insert(name.clone()),
        };
    }

    document.groups.insert(ETCD_GROUP.into(), masters.clone());
    document.groups.insert(KUBE_MASTER_GROUP.into(), masters);
    document.groups.insert(KUBE_NODE_GROUP.into(), nodes);
    document.groups.insert(
        K8S_CLUSTER_GROUP.into(),
        InventoryGroup {
            hosts: BTreeSet::new(),
            children: [KUBE_MASTER_GROUP, KUBE_NODE_GROUP]
                .into_iter()
                .map(String::from)
                .collect(),
        },
    );

    document.vars = cluster_vars(spec, service_address);
    document
}

fn cluster_vars(spec: &ClusterSpec, service_address: &str) -> BTreeMap<String, InventoryValue> {
    let mut vars: BTreeMap<String, InventoryValue> = [
        ("enable_nodelocaldns", false.into()),
        ("download_run_once", true.into()),
        ("download_localhost", true.into()),
        ("enable_dual_stack_networks", true.into()),
        ("ansible_user", "root".into()),
        ("cluster_name", spec.cluster_fqdn().into()),
        ("artifacts_dir", spec.kubeconfigdir.clone().into()),
        ("kube_network_plugin", "cni".into()),
        ("kube_network_plugin_multus", false.into()),
        ("kubectl_localhost", true.into()),
        ("kubeconfig_localhost", true.into()),
        ("override_system_hostname", true.into()),
        ("container_manager", "crio".into()),
        ("kubelet_deployment_type", "host".into()),
        ("download_container", false.into()),
        ("etcd_deployment_type", "host".into()),
        ("host_key_checking", false.into()),
        (
            "supplementary_addresses_in_ssl_keys",
            InventoryValue::List(vec![service_address.to_string()]),
        ),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();

    let optional = [
        ("kube_service_addresses", &spec.servicev4subnet),
        ("kube_service_addresses_ipv6", &spec.servicev6subnet),
        ("kube_pods_subnet", &spec.podv4subnet),
        ("kube_pods_subnet_ipv6", &spec.podv6subnet),
        ("docker_image_repo", &spec.imagerepo),
    ];
    for (key, value) in optional {
        if !value.trim().is_empty() {
            vars.insert(key.to_string(), value.clone().into());
        }
    }

    vars
}

impl InventoryDocument {
    /// Renders the inventory as YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SerializationFailure`] if a value cannot be
    /// rendered as a YAML scalar.
    pub fn render(&self) -> Result<String, ProvisionError> {
        let mut out = String::new();

        out.push_str("all:\n");
        if self.hosts.is_empty() {
            out.push_str("  hosts: {}\n");
        } else {
            out.push_str("  hosts:\n");
            for (name, vars) in &self.hosts {
                let _ = writeln!(out, "    {}:", scalar(name)?);
                for (key, value) in vars {
                    let _ = writeln!(out, "      {key}: {}", render_value(value)?);
                }
            }
        }
        out.push_str("  vars:\n");
        for (key, value) in &self.vars {
            let _ = writeln!(out, "    {key}: {}", render_value(value)?);
        }

        for (group, members) in &self.groups {
            let _ = writeln!(out, "{group}:");
            if members.children.is_empty() {
                render_members(&mut out, "hosts", &members.hosts)?;
            } else {
                render_members(&mut out, "children", &members.children)?;
                if !members.hosts.is_empty() {
                    render_members(&mut out, "hosts", &members.hosts)?;
                }
            }
        }

        Ok(out)
    }
}

fn render_members(
    out: &mut String,
    section: &str,
    members: &BTreeSet<String>,
) -> Result<(), ProvisionError> {
    if members.is_empty() {
        let _ = writeln!(out, "  {section}: {{}}");
        return Ok(());
    }
    let _ = writeln!(out, "  {section}:");
    for member in members {
        let _ = writeln!(out, "    {}:", scalar(member)?);
    }
    Ok(())
}

fn render_value(value: &InventoryValue) -> Result<String, ProvisionError> {
    match value {
        InventoryValue::Bool(flag) => Ok(flag.to_string()),
        InventoryValue::Str(text) => scalar(text),
        InventoryValue::List(items) => {
            let items = items
                .iter()
                .map(|item| flow_item(item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", items.join(", ")))
        }
    }
}

/// Renders a string as a single-line YAML scalar, quoting only when needed.
fn scalar(text: &str) -> Result<String, ProvisionError> {
    let rendered = serde_yaml::to_string(text).map_err(|e| ProvisionError::SerializationFailure {
        document: "inventory".to_string(),
        reason: e.to_string(),
    })?;
    let rendered = rendered.trim_end_matches('\n');
    if rendered.contains('\n') {
        return json_quoted(text);
    }
    Ok(rendered.to_string())
}

/// Flow sequence items additionally need quoting for flow indicators.
fn flow_item(text: &str) -> Result<String, ProvisionError> {
    if text.contains([',', '[', ']', '{', '}']) {
        return json_quoted(text);
    }
    scalar(text)
}

fn json_quoted(text: &str) -> Result<String, ProvisionError> {
    serde_json::to_string(text).map_err(|e| ProvisionError::SerializationFailure {
        document: "inventory".to_string(),
        reason: e.to_string(),
    })
}

/// Writes a rendered artifact into `dir`, creating the directory if needed.
///
/// The contents go to a hidden sibling file (mode `0600`) that is renamed over
/// `file_name` once fully written, so readers see either the previous artifact
/// or the new one.
///
/// # Errors
///
/// Returns [`ProvisionError::Io`] if the directory or file cannot be written.
pub async fn write_artifact(
    dir: &Path,
    file_name: &str,
    contents: &str,
) -> Result<PathBuf, ProvisionError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ProvisionError::Io { path, source }
    };

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(ARTIFACT_DIR_MODE);
    builder.create(dir).await.map_err(io_error(dir))?;

    let path = dir.join(file_name);
    let staging = dir.join(format!(".{file_name}.tmp"));

    let written = async {
        write_staged(&staging, contents)
            .await
            .map_err(io_error(&staging))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(io_error(&path))
    }
    .await;

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
            debug!(path = %staging.display(), error = %cleanup, "Staging file not removed");
        }
        return Err(e);
    }

    debug!(path = %path.display(), bytes = contents.len(), "Wrote artifact");
    Ok(path)
}

async fn write_staged(staging: &Path, contents: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(ARTIFACT_FILE_MODE);

    let mut file = options.open(staging).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(staging, std::fs::Permissions::from_mode(ARTIFACT_FILE_MODE))
            .await?;
    }
    Ok(())
}

/// Renders the inventory and writes it as `inventory.yaml` into `dir`.
///
/// # Errors
///
/// Returns [`ProvisionError::SerializationFailure`] if rendering fails (no file
/// is touched) or [`ProvisionError::Io`] if writing fails.
pub async fn write_inventory(
    document: &InventoryDocument,
    dir: &Path,
) -> Result<PathBuf, ProvisionError> {
    let rendered = document.render()?;
    let path = write_artifact(dir, crate::constants::INVENTORY_FILE_NAME, &rendered).await?;
    info!(path = %path.display(), hosts = document.hosts.len(), "Created inventory file");
    Ok(path)
}

#[cfg(test)]
#[path = "inventory_tests.rs"]
mod inventory_tests;
