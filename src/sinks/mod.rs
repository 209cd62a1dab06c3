pub mod console;
pub mod http;
pub mod store;

use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::sinks::console::ConsoleSink;
use crate::sinks::http::HttpSink;
use crate::sinks::store::DocumentStoreSink;

/// An output destination for cleaned records.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short label used in logs (e.g. "console", "http").
    fn name(&self) -> &str;

    /// One-time setup. A failing sink is dropped by the dispatcher.
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Deliver one record. Errors are logged by the dispatcher, never retried.
    async fn deliver(&self, record: &Value) -> Result<()>;

    /// Release any held connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the sink matching a config entry's declared type.
pub fn build_sink(config: &SinkConfig) -> Option<Box<dyn Sink>> {
    match config.kind.to_lowercase().as_str() {
        "console" | "stdout" => Some(Box::new(ConsoleSink::from_config(config))),
        "http" => Some(Box::new(HttpSink::from_config(config))),
        "document" | "sqlite" | "mongodb" => {
            Some(Box::new(DocumentStoreSink::from_config(config)))
        }
        _ => None,
    }
}

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a [`SinkDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Uninitialized,
    Ready,
    Closed,
}

/// Fans each record out to every active sink concurrently.
pub struct SinkDispatcher {
    sinks: Vec<Box<dyn Sink>>,
    fallback: ConsoleSink,
    state: AtomicU8,
}

impl SinkDispatcher {
    /// A dispatcher with no sinks; records go to the console fallback.
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            fallback: ConsoleSink::stdout(true),
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    /// Replace the console fallback used when no sink is active.
    #[cfg(test)]
    pub fn with_fallback(mut self, fallback: ConsoleSink) -> Self {
        self.fallback = fallback;
        self
    }

    /// Construct and initialize every enabled sink. Unknown types and failing
    /// setups are logged and skipped.
    pub async fn initialize_all(mut self, configs: &[SinkConfig]) -> Self {
        for config in configs {
            if !config.enabled {
                debug!("Skipping disabled sink '{}'", config.kind);
                continue;
            }
            let Some(sink) = build_sink(config) else {
                warn!("Unknown sink type: {}", config.kind);
                continue;
            };
            self.add(sink).await;
        }
        self.state.store(READY, Ordering::SeqCst);
        if self.is_empty() {
            warn!("No sinks active; records are printed to stdout");
        } else {
            info!("{} sink(s) active", self.len());
        }
        self
    }

    /// Initialize one sink and keep it only if setup succeeds.
    pub async fn add(&mut self, mut sink: Box<dyn Sink>) -> bool {
        match sink.init().await {
            Ok(()) => {
                info!("Sink '{}' ready", sink.name());
                self.sinks.push(sink);
                true
            }
            Err(e) => {
                error!("Failed to init sink '{}': {:#}", sink.name(), e);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn state(&self) -> DispatcherState {
        match self.state.load(Ordering::SeqCst) {
            UNINITIALIZED => DispatcherState::Uninitialized,
            READY => DispatcherState::Ready,
            _ => DispatcherState::Closed,
        }
    }

    /// Deliver a record to all sinks and wait for every attempt. Never fails.
    pub async fn dispatch(&self, record: &Value) {
        if self.state() == DispatcherState::Closed {
            warn!("Dispatcher is closed; dropping record");
            return;
        }

        if self.sinks.is_empty() {
            if let Err(e) = self.fallback.deliver(record).await {
                error!("Console fallback failed: {:#}", e);
            }
            return;
        }

        let deliveries = self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.deliver(record).await {
                error!("Sink '{}' failed: {:#}", sink.name(), e);
            }
        });
        join_all(deliveries).await;
    }

    /// Tear down every sink concurrently. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.state.swap(CLOSED, Ordering::SeqCst) == CLOSED {
            return;
        }

        let closes = self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.close().await {
                error!("Sink '{}' close error: {:#}", sink.name(), e);
            }
        });
        join_all(closes).await;
        info!("All sinks closed");
    }
}

impl Default for SinkDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
