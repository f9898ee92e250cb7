// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common utilities for integration tests

#![allow(dead_code)]

use kube::client::Client;
use std::path::PathBuf;

/// Environment variable naming a cluster definition for end-to-end runs
pub const CLUSTER_FILE_ENV: &str = "KVCLUSTER_TEST_CLUSTER";

/// Get a Kubernetes client or skip the test if no cluster is reachable
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => {
            println!("✓ Successfully connected to Kubernetes cluster");
            Some(client)
        }
        Err(e) => {
            eprintln!("⊘ Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Cluster definition file for end-to-end runs, if one is configured
pub fn cluster_file_or_skip() -> Option<PathBuf> {
    match std::env::var(CLUSTER_FILE_ENV) {
        Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
        _ => {
            eprintln!("⊘ Skipping end-to-end test: {CLUSTER_FILE_ENV} is not set");
            None
        }
    }
}

/// Unique namespace name for a test run
pub fn test_namespace(prefix: &str) -> String {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() % 100_000)
        .unwrap_or_default();
    format!("{prefix}-{suffix}")
}
