//! Helpers for spinning up a TCP server backed by a temporary data
//! directory.
//!
//! [`TestServer`] runs the full accept loop in-process so integration tests
//! can exercise the public wire protocol without touching the real
//! filesystem. Each instance owns an isolated temporary directory and shuts
//! itself down automatically when dropped.

use anyhow::Result;
use common::EngineConfig;
use engine::Engine;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ::server::run as run_server;

/// In-process TCP server for end-to-end tests.
pub struct TestServer {
    address: String,
    _temp_dir: TempDir,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start a new server bound to `127.0.0.1` on a random port.
    pub async fn start() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();

        let config = EngineConfig::builder()
            .data_dir(temp_dir.path().to_path_buf())
            .build();
        let engine = Arc::new(Engine::new(&config));

        let task = tokio::spawn(async move {
            if let Err(err) = run_server(listener, engine).await {
                log::warn!("test server error: {err:?}");
            }
        });

        Ok(Self {
            address,
            _temp_dir: temp_dir,
            task,
        })
    }

    /// Return the socket address clients should dial.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
