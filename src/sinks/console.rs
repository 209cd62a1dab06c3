use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::Sink;
use crate::config::SinkConfig;

/// Writes each record as JSON text, one record per write.
pub struct ConsoleSink {
    pretty: bool,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout(pretty: bool) -> Self {
        Self::with_writer(pretty, std::io::stdout())
    }

    pub fn with_writer(pretty: bool, writer: impl Write + Send + 'static) -> Self {
        Self {
            pretty,
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::stdout(config.pretty)
    }

    pub fn render(&self, record: &Value) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(record)
        } else {
            serde_json::to_string(record)
        };
        text.context("Failed to serialize record")
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, record: &Value) -> Result<()> {
        let text = self.render(record)?;
        // A poisoned lock still holds a usable writer.
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}", text).context("Failed to write record to console")?;
        writer.flush().context("Failed to flush console")?;
        Ok(())
    }
}

/// In-memory writer whose contents stay readable after being handed to a sink.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
