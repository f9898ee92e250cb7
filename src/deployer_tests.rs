// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `deployer.rs`

#[cfg(test)]
mod tests {
    use super::super::{render_deployer, DeployerParams};
    use crate::config::ClusterSpec;

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "demo".into(),
            namespace: "ns".into(),
            controller: 3,
            subnet: "10.0.0.0/24".into(),
            podv4subnet: "10.244.0.0/16".into(),
            podv6subnet: "fd00:244::/64".into(),
            servicev4subnet: "10.96.0.0/12".into(),
            servicev6subnet: "fd00:96::/108".into(),
            asn: 64512,
            registry: "registry.example.com/contrail".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_params_from_spec() {
        let params = DeployerParams::from_spec(&spec()).unwrap();
        assert_eq!(params.gateway, "10.0.0.1");
        assert_eq!(params.replicas, 3);
        assert_eq!(params.tag, "latest");
        assert_eq!(params.asn, 64512);
    }

    #[test]
    fn test_params_keep_explicit_tag() {
        let mut spec = spec();
        spec.tag = "22.4".into();
        assert_eq!(DeployerParams::from_spec(&spec).unwrap().tag, "22.4");
    }

    #[test]
    fn test_render_substitutes_every_token() {
        let manifest = render_deployer(&DeployerParams::from_spec(&spec()).unwrap());

        assert!(!manifest.contains("{{"));
        assert!(manifest.contains("gateway: 10.0.0.1"));
        assert!(manifest.contains("replicas: 3"));
        assert!(manifest.contains("autonomousSystem: 64512"));
        assert!(manifest.contains("podV4Subnet: 10.244.0.0/16"));
        assert!(manifest.contains("serviceV6Subnet: fd00:96::/108"));
        assert!(manifest.contains("image: registry.example.com/contrail/contrail-control:latest"));
    }

    #[test]
    fn test_render_is_a_yaml_stream() {
        let manifest = render_deployer(&DeployerParams::from_spec(&spec()).unwrap());
        let kinds: Vec<String> = serde_yaml::Deserializer::from_str(&manifest)
            .map(|doc| {
                let value = <serde_yaml::Value as serde::Deserialize>::deserialize(doc).unwrap();
                value["kind"].as_str().unwrap_or_default().to_string()
            })
            .collect();

        assert!(kinds.contains(&"Deployment".to_string()));
        assert!(kinds.contains(&"ConfigMap".to_string()));
        assert!(kinds.contains(&"Job".to_string()));
    }
}
