// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cloudinit.rs`

#[cfg(test)]
mod tests {
    use super::super::BootConfig;
    use crate::config::Distro;
    use serde_yaml::Value;
    use std::net::Ipv4Addr;

    fn config<'a>(distro: Distro, routes: &'a [String]) -> BootConfig<'a> {
        BootConfig {
            hostname: "worker-0",
            ssh_key: "ssh-rsa AAAA user@host\n",
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            dns: "10.96.0.10",
            mirror: None,
            registry: None,
            routes,
            distro,
            ctrl_data: false,
        }
    }

    fn parse(document: &str) -> Value {
        let body = document.strip_prefix("#cloud-config\n").unwrap();
        serde_yaml::from_str(body).unwrap()
    }

    fn file_content<'a>(doc: &'a Value, path: &str) -> Option<&'a str> {
        doc["write_files"]
            .as_sequence()
            .unwrap()
            .iter()
            .find(|f| f["path"].as_str() == Some(path))
            .and_then(|f| f["content"].as_str())
    }

    #[test]
    fn test_render_has_header_and_users() {
        let rendered = config(Distro::Centos, &[]).render().unwrap();
        assert!(rendered.starts_with("#cloud-config\n"));

        let doc = parse(&rendered);
        assert_eq!(doc["hostname"].as_str(), Some("worker-0"));
        assert_eq!(doc["manage_etc_hosts"].as_bool(), Some(true));

        let users = doc["users"].as_sequence().unwrap();
        assert_eq!(users[0]["name"].as_str(), Some("contrail"));
        assert_eq!(users[1]["name"].as_str(), Some("root"));
        assert_eq!(
            users[1]["ssh-authorized-keys"][0].as_str(),
            Some("ssh-rsa AAAA user@host")
        );
        assert_eq!(
            doc["chpasswd"]["list"].as_str(),
            Some("contrail:contrail\nroot:contrail")
        );
    }

    #[test]
    fn test_render_points_resolver_at_dns() {
        let doc = parse(&config(Distro::Centos, &[]).render().unwrap());
        assert_eq!(
            file_content(&doc, "/etc/systemd/resolved.conf"),
            Some("[Resolve]\nDNS=10.96.0.10\n")
        );
    }

    #[test]
    fn test_centos_has_no_netplan_or_apt() {
        let doc = parse(&config(Distro::Centos, &[]).render().unwrap());
        assert!(file_content(&doc, "/etc/netplan/intf.yaml").is_none());
        assert!(doc.get("apt").is_none());
    }

    #[test]
    fn test_ubuntu_netplan_routes_via_gateway() {
        let routes = vec!["192.168.0.0/16".to_string()];
        let doc = parse(&config(Distro::Ubuntu, &routes).render().unwrap());

        let netplan: Value =
            serde_yaml::from_str(file_content(&doc, "/etc/netplan/intf.yaml").unwrap()).unwrap();
        let data = &netplan["network"]["ethernets"]["enp2s0"];
        assert_eq!(data["dhcp4"].as_bool(), Some(true));
        assert_eq!(data["routes"][0]["to"].as_str(), Some("192.168.0.0/16"));
        assert_eq!(data["routes"][0]["via"].as_str(), Some("10.0.0.1"));
        assert!(netplan["network"]["ethernets"].get("enp3s0").is_none());

        let runcmd = doc["runcmd"].as_sequence().unwrap();
        assert!(runcmd.iter().any(|c| c.as_str() == Some("netplan apply")));
        assert!(doc["apt"]["primary"][0]["uri"].as_str().is_some());
    }

    #[test]
    fn test_ubuntu_ctrl_data_interface() {
        let mut cfg = config(Distro::Ubuntu, &[]);
        cfg.ctrl_data = true;
        let doc = parse(&cfg.render().unwrap());

        let netplan: Value =
            serde_yaml::from_str(file_content(&doc, "/etc/netplan/intf.yaml").unwrap()).unwrap();
        assert_eq!(
            netplan["network"]["ethernets"]["enp3s0"]["dhcp4"].as_bool(),
            Some(true)
        );
    }

    #[test]
    fn test_registry_and_mirror_entries() {
        let mut cfg = config(Distro::Centos, &[]);
        cfg.registry = Some("registry.local:5000");
        cfg.mirror = Some("10.96.0.50");
        let doc = parse(&cfg.render().unwrap());

        let registry =
            file_content(&doc, "/etc/containers/registries.conf.d/001-local.conf").unwrap();
        assert!(registry.contains("location = \"registry.local:5000\""));
        assert!(registry.contains("insecure = true"));

        let runcmd = doc["runcmd"].as_sequence().unwrap();
        assert!(runcmd.iter().any(|c| c.as_str()
            == Some("echo \"10.96.0.50 download.opensuse.org\" >> /etc/hosts")));
    }
}
