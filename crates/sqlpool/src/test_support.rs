//! Minimal in-crate driver for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConnectionSettings;
use crate::driver::{Driver, Value};

#[derive(Debug, Error)]
#[error("echo driver failure: {0}")]
pub(crate) struct EchoError(String);

/// Echoes `<connection>:<query>`. `FAIL` errors, `HANG` never completes.
#[derive(Debug, Default)]
pub(crate) struct EchoDriver {
    connects: AtomicU32,
    disconnects: AtomicU32,
}

impl EchoDriver {
    pub(crate) fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub(crate) struct EchoHandle {
    name: String,
}

impl EchoHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Driver for EchoDriver {
    type Handle = EchoHandle;
    type Output = String;
    type Error = EchoError;

    async fn connect(
        &self,
        name: &str,
        _settings: &ConnectionSettings,
    ) -> Result<EchoHandle, EchoError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Let other tasks observe the pending connect.
        tokio::task::yield_now().await;
        Ok(EchoHandle::new(name))
    }

    async fn disconnect(&self, _handle: EchoHandle) -> Result<(), EchoError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(
        &self,
        handle: &mut EchoHandle,
        query: &str,
        _bindings: &[Value],
    ) -> Result<String, EchoError> {
        match query {
            "FAIL" => Err(EchoError(query.into())),
            "HANG" => std::future::pending().await,
            _ => Ok(format!("{}:{}", handle.name, query)),
        }
    }

    fn resolve_name(&self, handle: &EchoHandle) -> Option<String> {
        Some(handle.name.clone())
    }
}
