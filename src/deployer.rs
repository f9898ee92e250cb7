// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment manifest for the network stack of the provisioned cluster.
//!
//! The manifest is an embedded template with `{{TOKEN}}` placeholders that are
//! substituted from the cluster definition.

use crate::config::ClusterSpec;
use crate::constants::DEFAULT_IMAGE_TAG;
use crate::errors::ProvisionError;

const DEPLOYER_TEMPLATE: &str = include_str!("../templates/deployer.yaml.tmpl");

/// Values substituted into the deployment manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployerParams {
    /// Gateway of the primary cluster network
    pub gateway: String,
    /// Pod IPv4 subnet
    pub pod_v4_subnet: String,
    /// Pod IPv6 subnet
    pub pod_v6_subnet: String,
    /// Service IPv4 subnet
    pub service_v4_subnet: String,
    /// Service IPv6 subnet
    pub service_v6_subnet: String,
    /// Autonomous system number
    pub asn: u32,
    /// Control-plane replica count
    pub replicas: u32,
    /// Image registry prefix
    pub registry: String,
    /// Image tag
    pub tag: String,
}

impl DeployerParams {
    /// Derives the manifest values from the cluster definition.
    ///
    /// The replica count follows the controller count; an empty tag becomes
    /// `latest`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidClusterSpec`] if the primary subnet is
    /// invalid.
    pub fn from_spec(spec: &ClusterSpec) -> Result<Self, ProvisionError> {
        let tag = if spec.tag.trim().is_empty() {
            DEFAULT_IMAGE_TAG.to_string()
        } else {
            spec.tag.clone()
        };

        Ok(Self {
            gateway: spec.gateway()?.to_string(),
            pod_v4_subnet: spec.podv4subnet.clone(),
            pod_v6_subnet: spec.podv6subnet.clone(),
            service_v4_subnet: spec.servicev4subnet.clone(),
            service_v6_subnet: spec.servicev6subnet.clone(),
            asn: spec.asn,
            replicas: spec.controller,
            registry: spec.registry.clone(),
            tag,
        })
    }
}

/// Renders the deployment manifest.
#[must_use]
pub fn render_deployer(params: &DeployerParams) -> String {
    let asn = params.asn.to_string();
    let replicas = params.replicas.to_string();
    let tokens: [(&str, &str); 9] = [
        ("GATEWAY", &params.gateway),
        ("PODV4SUBNET", &params.pod_v4_subnet),
        ("PODV6SUBNET", &params.pod_v6_subnet),
        ("SERVICEV4SUBNET", &params.service_v4_subnet),
        ("SERVICEV6SUBNET", &params.service_v6_subnet),
        ("ASN", &asn),
        ("REPLICAS", &replicas),
        ("REGISTRY", &params.registry),
        ("TAG", &params.tag),
    ];

    tokens
        .iter()
        .fold(DEPLOYER_TEMPLATE.to_string(), |manifest, (token, value)| {
            manifest.replace(&format!("{{{{{token}}}}}"), value)
        })
}

#[cfg(test)]
#[path = "deployer_tests.rs"]
mod deployer_tests;
