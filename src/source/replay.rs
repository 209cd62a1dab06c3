use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use super::HistorySource;
use crate::range::FetchRange;
use crate::record::{record_id, Record};

/// Reads recorded chat history from `<directory>/<chat>.jsonl` (one record
/// per line) or `<directory>/<chat>.json` (a JSON array).
pub struct ReplaySource {
    directory: PathBuf,
}

impl ReplaySource {
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
        }
    }

    fn locate(&self, chat: &str) -> Result<PathBuf> {
        let name = chat.trim_start_matches('@');
        ["jsonl", "json"]
            .iter()
            .map(|ext| self.directory.join(format!("{}.{}", name, ext)))
            .find(|p| p.exists())
            .with_context(|| {
                format!(
                    "No export found for chat '{}' in {}",
                    chat,
                    self.directory.display()
                )
            })
    }

    async fn load(&self, chat: &str) -> Result<Vec<Record>> {
        let path = self.locate(chat)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read export: {}", path.display()))?;
        Ok(parse_export(&content, &path))
    }
}

/// Parse an export, skipping malformed lines and records without an id.
fn parse_export(content: &str, path: &Path) -> Vec<Record> {
    let trimmed = content.trim_start();
    let raw: Vec<Value> = if trimmed.starts_with('[') {
        match serde_json::from_str(trimmed) {
            Ok(items) => items,
            Err(e) => {
                warn!("Malformed export {}: {}", path.display(), e);
                Vec::new()
            }
        }
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Skipping malformed line {} in {}: {}", n + 1, path.display(), e);
                    None
                }
            })
            .collect()
    };

    raw.into_iter()
        .filter(|record| {
            let has_id = record_id(record).is_some();
            if !has_id {
                warn!("Skipping record without an integer id in {}", path.display());
            }
            has_id
        })
        .collect()
}

/// Apply a fetch range the way the platform does.
pub fn apply_range(mut records: Vec<Record>, range: &FetchRange) -> Vec<Record> {
    records.retain(|record| {
        let Some(id) = record_id(record) else {
            return false;
        };
        range.min_id.map_or(true, |min| id > min) && range.max_id.map_or(true, |max| id < max)
    });

    records.sort_by_key(|record| record_id(record).unwrap_or_default());
    if !range.reverse() {
        records.reverse();
    }
    if let Some(limit) = range.max_items() {
        records.truncate(limit);
    }
    records
}

#[async_trait]
impl HistorySource for ReplaySource {
    async fn fetch(&self, chat: &str, range: &FetchRange) -> Result<BoxStream<'static, Record>> {
        let records = apply_range(self.load(chat).await?, range);
        debug!("Replaying {} record(s) for '{}'", records.len(), chat);
        Ok(stream::iter(records).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{resolve, RangeRequest};
    use serde_json::json;

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().filter_map(record_id).collect()
    }

    fn history() -> Vec<Record> {
        (1..=10).map(|id| json!({"_": "Message", "id": id})).collect()
    }

    #[test]
    fn test_default_order_is_newest_first() {
        let range = resolve(&RangeRequest {
            limit: Some(3),
            ..Default::default()
        });
        assert_eq!(ids(&apply_range(history(), &range)), vec![10, 9, 8]);
    }

    #[test]
    fn test_forward_exclusive_window() {
        let range = resolve(&RangeRequest {
            from_id: Some(3),
            to_id: Some(7),
            limit: Some(0),
            ..Default::default()
        });
        assert_eq!(ids(&apply_range(history(), &range)), vec![4, 5, 6]);
    }

    #[test]
    fn test_forward_inclusive_window() {
        let range = resolve(&RangeRequest {
            from_id: Some(3),
            to_id: Some(7),
            inclusive: true,
            limit: Some(0),
            ..Default::default()
        });
        assert_eq!(ids(&apply_range(history(), &range)), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_backward_from_bound() {
        let range = resolve(&RangeRequest {
            from_id: Some(5),
            backward: true,
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(ids(&apply_range(history(), &range)), vec![4, 3]);
    }

    #[test]
    fn test_parse_jsonl_skips_bad_lines() {
        let content = "{\"id\": 1}\n\nnot json\n{\"no_id\": true}\n{\"id\": 2}\n";
        let records = parse_export(content, Path::new("chat.jsonl"));
        assert_eq!(ids(&records), vec![1, 2]);
    }

    #[test]
    fn test_parse_json_array() {
        let records = parse_export("[{\"id\": 4}, {\"id\": 5}]", Path::new("chat.json"));
        assert_eq!(ids(&records), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_fetch_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = history().iter().map(|r| r.to_string()).collect();
        std::fs::write(dir.path().join("mychat.jsonl"), lines.join("\n")).unwrap();

        let source = ReplaySource::new(dir.path());
        let range = resolve(&RangeRequest {
            forward: true,
            limit: Some(4),
            ..Default::default()
        });
        let records: Vec<Record> = source.fetch("@mychat", &range).await.unwrap().collect().await;
        assert_eq!(ids(&records), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fetch_unknown_chat_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = ReplaySource::new(dir.path());
        let range = resolve(&RangeRequest::default());
        assert!(source.fetch("nobody", &range).await.is_err());
    }
}
