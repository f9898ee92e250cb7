// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Boot configuration documents for cluster instances.
//!
//! Each instance boots with a NoCloud `#cloud-config` document delivered through
//! the `userdata` key of a `Secret`. The document creates the login users,
//! points name resolution at the platform DNS service and, on Ubuntu images,
//! configures the cluster network interfaces through netplan.

use crate::config::Distro;
use crate::constants::{
    INSTANCE_CHPASSWD, INSTANCE_SUDO, INSTANCE_USER, MIRROR_HOST_ALIAS, UBUNTU_APT_MIRROR,
};
use crate::errors::ProvisionError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Header line cloud-init requires on user data documents.
const CLOUD_CONFIG_HEADER: &str = "#cloud-config\n";

/// Interface attached to the primary cluster network.
const DATA_INTERFACE: &str = "enp2s0";

/// Interface attached to the control-data network.
const CTRL_DATA_INTERFACE: &str = "enp3s0";

const RESOLVED_CONF_PATH: &str = "/etc/systemd/resolved.conf";
const NETPLAN_PATH: &str = "/etc/netplan/intf.yaml";
const REGISTRY_CONF_PATH: &str = "/etc/containers/registries.conf.d/001-local.conf";

/// Inputs for one instance's boot configuration.
#[derive(Clone, Debug)]
pub struct BootConfig<'a> {
    /// Instance host name
    pub hostname: &'a str,
    /// SSH public key authorized for every user
    pub ssh_key: &'a str,
    /// Gateway of the primary cluster network
    pub gateway: Ipv4Addr,
    /// Platform DNS service address
    pub dns: &'a str,
    /// Package mirror address, if a mirror service exists
    pub mirror: Option<&'a str>,
    /// Insecure image registry, if a registry service exists
    pub registry: Option<&'a str>,
    /// Extra routes installed via the gateway
    pub routes: &'a [String],
    /// Image distribution
    pub distro: Distro,
    /// Whether the control-data network is attached
    pub ctrl_data: bool,
}

#[derive(Serialize)]
struct CloudConfig {
    hostname: String,
    manage_etc_hosts: bool,
    users: Vec<User>,
    ssh_pwauth: bool,
    disable_root: bool,
    chpasswd: Chpasswd,
    write_files: Vec<WriteFile>,
    runcmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    apt: Option<Apt>,
}

#[derive(Serialize)]
struct User {
    name: String,
    sudo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    home: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shell: Option<String>,
    lock_passwd: bool,
    #[serde(rename = "ssh-authorized-keys")]
    ssh_authorized_keys: Vec<String>,
}

#[derive(Serialize)]
struct Chpasswd {
    list: String,
    expire: bool,
}

#[derive(Serialize)]
struct WriteFile {
    path: String,
    content: String,
}

#[derive(Serialize)]
struct Apt {
    primary: Vec<AptPrimary>,
}

#[derive(Serialize)]
struct AptPrimary {
    arches: Vec<String>,
    uri: String,
}

#[derive(Serialize)]
struct Netplan {
    network: NetplanNetwork,
}

#[derive(Serialize)]
struct NetplanNetwork {
    version: u8,
    ethernets: BTreeMap<String, Ethernet>,
}

#[derive(Serialize)]
struct Ethernet {
    dhcp4: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    routes: Vec<Route>,
}

#[derive(Serialize)]
struct Route {
    to: String,
    via: String,
}

impl BootConfig<'_> {
    /// Renders the `#cloud-config` document.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SerializationFailure`] if the document cannot be
    /// serialized.
    pub fn render(&self) -> Result<String, ProvisionError> {
        let key = self.ssh_key.trim().to_string();
        let users = vec![
            User {
                name: INSTANCE_USER.into(),
                sudo: INSTANCE_SUDO.into(),
                home: Some(format!("/home/{INSTANCE_USER}")),
                shell: Some("/bin/bash".into()),
                lock_passwd: false,
                ssh_authorized_keys: vec![key.clone()],
            },
            User {
                name: "root".into(),
                sudo: INSTANCE_SUDO.into(),
                home: None,
                shell: None,
                lock_passwd: false,
                ssh_authorized_keys: vec![key],
            },
        ];

        let mut write_files = vec![WriteFile {
            path: RESOLVED_CONF_PATH.into(),
            content: format!("[Resolve]\nDNS={}\n", self.dns),
        }];
        let mut runcmd = vec!["systemctl restart systemd-resolved.service".to_string()];
        let mut apt = None;

        if self.distro == Distro::Ubuntu {
            write_files.push(WriteFile {
                path: NETPLAN_PATH.into(),
                content: self.netplan()?,
            });
            runcmd.push("netplan apply".into());
            apt = Some(Apt {
                primary: vec![AptPrimary {
                    arches: vec!["default".into()],
                    uri: UBUNTU_APT_MIRROR.into(),
                }],
            });
        }

        if let Some(registry) = self.registry {
            write_files.push(WriteFile {
                path: REGISTRY_CONF_PATH.into(),
                content: format!("[[registry]]\nlocation = \"{registry}\"\ninsecure = true\n"),
            });
        }

        if let Some(mirror) = self.mirror {
            runcmd.push(format!(
                "echo \"{mirror} {MIRROR_HOST_ALIAS}\" >> /etc/hosts"
            ));
        }

        let document = CloudConfig {
            hostname: self.hostname.into(),
            manage_etc_hosts: true,
            users,
            ssh_pwauth: true,
            disable_root: false,
            chpasswd: Chpasswd {
                list: INSTANCE_CHPASSWD.into(),
                expire: false,
            },
            write_files,
            runcmd,
            apt,
        };

        let body = to_yaml("cloud-init document", &document)?;
        Ok(format!("{CLOUD_CONFIG_HEADER}{body}"))
    }

    fn netplan(&self) -> Result<String, ProvisionError> {
        let routes = self
            .routes
            .iter()
            .map(|to| Route {
                to: to.clone(),
                via: self.gateway.to_string(),
            })
            .collect();

        let mut ethernets = BTreeMap::new();
        ethernets.insert(
            DATA_INTERFACE.to_string(),
            Ethernet {
                dhcp4: true,
                routes,
            },
        );
        if self.ctrl_data {
            ethernets.insert(
                CTRL_DATA_INTERFACE.to_string(),
                Ethernet {
                    dhcp4: true,
                    routes: Vec::new(),
                },
            );
        }

        to_yaml(
            "netplan configuration",
            &Netplan {
                network: NetplanNetwork {
                    version: 2,
                    ethernets,
                },
            },
        )
    }
}

fn to_yaml<T: Serialize>(document: &str, value: &T) -> Result<String, ProvisionError> {
    serde_yaml::to_string(value).map_err(|e| ProvisionError::SerializationFailure {
        document: document.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[path = "cloudinit_tests.rs"]
mod cloudinit_tests;
