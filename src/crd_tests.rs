// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::crd::*;
    use kube::Resource;
    use serde_json::json;

    #[test]
    fn test_network_attachment_definition_metadata() {
        assert_eq!(NetworkAttachmentDefinition::group(&()), "k8s.cni.cncf.io");
        assert_eq!(NetworkAttachmentDefinition::version(&()), "v1");
        assert_eq!(
            NetworkAttachmentDefinition::plural(&()),
            "network-attachment-definitions"
        );
    }

    #[test]
    fn test_virtual_machine_instance_metadata() {
        assert_eq!(VirtualMachineInstance::group(&()), "kubevirt.io");
        assert_eq!(VirtualMachineInstance::kind(&()), "VirtualMachineInstance");
        assert_eq!(VirtualMachineInstance::plural(&()), "virtualmachineinstances");
    }

    #[test]
    fn test_virtual_network_preserves_unknown_fields() {
        let original = json!({
            "apiVersion": "core.juniper.net/v1alpha1",
            "kind": "VirtualNetwork",
            "metadata": { "name": "demo", "namespace": "demo" },
            "spec": {
                "v4SubnetReference": { "name": "demo-v4" },
                "fabricSNAT": true
            },
            "status": {
                "state": "Success",
                "virtualNetworkNetworkId": 7
            }
        });

        let vn: VirtualNetwork = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(vn.spec.fields.len(), 2);
        assert_eq!(vn.status.as_ref().map(|s| s.fields.len()), Some(2));

        let round_tripped = serde_json::to_value(&vn).unwrap();
        assert_eq!(round_tripped["spec"], original["spec"]);
        assert_eq!(round_tripped["status"], original["status"]);
    }

    #[test]
    fn test_network_attachment_config_serialization() {
        let nad = NetworkAttachmentDefinition::new(
            "demo",
            NetworkAttachmentDefinitionSpec {
                config: Some("{}".to_string()),
            },
        );

        let value = serde_json::to_value(&nad).unwrap();
        assert_eq!(value["spec"]["config"], "{}");
        assert_eq!(value["apiVersion"], "k8s.cni.cncf.io/v1");
    }

    #[test]
    fn test_vmi_spec_uses_kubevirt_field_names() {
        let spec = VirtualMachineInstanceSpec {
            domain: DomainSpec::default(),
            networks: vec![Network {
                name: "demo".into(),
                pod: None,
                multus: Some(MultusNetwork {
                    network_name: "ns/demo".into(),
                }),
            }],
            volumes: vec![Volume {
                name: "cloudinitdisk".into(),
                container_disk: None,
                cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                    user_data_secret_ref: Some(LocalObjectReference {
                        name: "worker-0".into(),
                    }),
                }),
            }],
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["networks"][0]["multus"]["networkName"], "ns/demo");
        assert!(value["networks"][0].get("pod").is_none());
        assert_eq!(
            value["volumes"][0]["cloudInitNoCloud"]["userDataSecretRef"]["name"],
            "worker-0"
        );
    }

    #[test]
    fn test_vmi_spec_deserializes_with_missing_lists() {
        let spec: VirtualMachineInstanceSpec =
            serde_json::from_value(json!({ "domain": {} })).unwrap();

        assert!(spec.networks.is_empty());
        assert!(spec.volumes.is_empty());
        assert!(spec.domain.devices.interfaces.is_empty());
    }
}
