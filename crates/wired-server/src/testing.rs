//! In-process server for endpoint tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::ServerConfig;
use crate::state::{AppState, SharedState};

/// Config for tests: `/bin/sh`, a short resize grace and an 8 MB upload limit.
pub(crate) fn test_config(storage_dir: PathBuf) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        shell: "/bin/sh".to_string(),
        workdir: std::env::temp_dir(),
        storage_dir,
        resize_grace: Duration::from_millis(20),
        max_upload_bytes: 8 * 1024 * 1024,
    }
}

pub(crate) fn test_state(storage_dir: PathBuf) -> SharedState {
    Arc::new(AppState::new(test_config(storage_dir)))
}

/// Serve the full router on an ephemeral port with a throwaway storage directory.
pub(crate) async fn spawn_server() -> (SocketAddr, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().join("storage"));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = crate::router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, dir)
}
