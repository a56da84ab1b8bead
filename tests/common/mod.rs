// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::broadcast;

use toolhost::config::{
    CatalogSettings, ConnectionSettings, HostConfig, ServerConfig, SupervisorSettings,
};

/// A server running the bundled mock tool server.
pub fn mock_server() -> ServerConfig {
    let mut server = ServerConfig::new(env!("CARGO_BIN_EXE_mock-tool-server"));
    server.startup_timeout_sec = 5;
    server.request_timeout_sec = 5;
    server
}

/// Timings short enough for tests.
pub fn fast_config() -> HostConfig {
    let mut config = HostConfig::new();
    config.supervisor = SupervisorSettings {
        kill_timeout_ms: 500,
        restart_delay_ms: 50,
        max_restart_attempts: 2,
        health_check_interval_ms: 200,
        enable_auto_restart: false,
        shutdown_grace_ms: 2_000,
    };
    config.connection = ConnectionSettings {
        heartbeat_interval_ms: 200,
        reconnect_delay_ms: 100,
        auto_reconnect: true,
        max_reconnect_attempts: 3,
    };
    config.catalog = CatalogSettings {
        health_check_interval_ms: 60_000,
        ..CatalogSettings::default()
    };
    config
}

/// Wait for the first event matching `pred`.
pub async fn next_event<E, F>(rx: &mut broadcast::Receiver<E>, pred: F) -> E
where
    E: Clone,
    F: Fn(&E) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
