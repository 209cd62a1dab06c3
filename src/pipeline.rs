use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::filter::MessageFilter;
use crate::profile::ProfileSet;
use crate::range::{Direction, FetchRange};
use crate::record::{is_prunable, Record};
use crate::sinks::SinkDispatcher;
use crate::source::{CallbackEvent, HistorySource, LiveEvent};

/// Running counters, shared with the heartbeat job.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    filtered_out: AtomicU64,
    emptied: AtomicU64,
    dispatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub filtered_out: u64,
    pub emptied: u64,
    pub dispatched: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            emptied: self.emptied.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a history fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub fetched: u64,
    pub kept: u64,
}

/// fetch → filter → cleanup → dispatch, one detached dispatch per record.
pub struct Pipeline {
    filter: MessageFilter,
    profiles: Arc<ProfileSet>,
    profile_name: String,
    dispatcher: Arc<SinkDispatcher>,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        filter: MessageFilter,
        profiles: Arc<ProfileSet>,
        profile_name: &str,
        dispatcher: Arc<SinkDispatcher>,
        max_in_flight: usize,
    ) -> Self {
        if profiles.is_empty() {
            debug!("No cleanup profiles loaded");
        } else if !profiles.contains(profile_name) {
            debug!("Profile '{}' not defined; cleanup only prunes empty values", profile_name);
        }
        if filter.is_pass_all() {
            debug!("No message filters active");
        }
        Self {
            filter,
            profiles,
            profile_name: profile_name.to_string(),
            dispatcher,
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Filter and clean a raw message. `None` means nothing should be sent.
    pub fn prepare(&self, record: &Record) -> Option<Record> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if !self.filter.keep(record) {
            self.stats.filtered_out.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.clean(record)
    }

    /// Build the cleaned payload for a button press. Callbacks skip the filter.
    pub fn prepare_callback(&self, event: &CallbackEvent) -> Option<Record> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let mut payload = json!({
            "type": "callback_query",
            "id": event.id,
            "chat_id": event.chat_id,
            "message_id": event.message_id,
            "sender_id": event.sender_id,
            "chat_instance": event.chat_instance,
            "data": event.data,
        });
        if let Some(message) = event
            .message
            .as_ref()
            .and_then(|m| self.profiles.clean(m, &self.profile_name))
        {
            payload["message"] = message;
        }
        self.clean(&payload)
    }

    fn clean(&self, record: &Record) -> Option<Record> {
        let cleaned = self
            .profiles
            .clean(record, &self.profile_name)
            .filter(|c| !is_prunable(c));
        if cleaned.is_none() {
            self.stats.emptied.fetch_add(1, Ordering::Relaxed);
        }
        cleaned
    }

    /// Hand a cleaned record to the dispatcher without waiting for delivery.
    /// Waits only when `max_in_flight` dispatches are already running.
    pub async fn submit(&self, record: Record) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            warn!("Dispatch queue closed; dropping record");
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        self.tracker.spawn(async move {
            dispatcher.dispatch(&record).await;
            stats.dispatched.fetch_add(1, Ordering::Relaxed);
            drop(permit);
        });
    }

    /// Run one raw message through the pipeline. Returns whether it was kept.
    pub async fn process(&self, record: &Record) -> bool {
        match self.prepare(record) {
            Some(cleaned) => {
                self.submit(cleaned).await;
                true
            }
            None => false,
        }
    }

    pub async fn handle_event(&self, event: LiveEvent) {
        match event {
            LiveEvent::NewMessage(record) | LiveEvent::Edited(record) => {
                self.process(&record).await;
            }
            LiveEvent::Callback(callback) => {
                if let Some(payload) = self.prepare_callback(&callback) {
                    self.submit(payload).await;
                }
            }
        }
    }

    /// Fetch a chat's history in `range` and push every surviving record.
    pub async fn run_fetch(
        &self,
        source: &dyn HistorySource,
        chat: &str,
        range: &FetchRange,
    ) -> Result<FetchSummary> {
        range.log_notes();
        log_fetch_plan(chat, range);

        let mut records = source.fetch(chat, range).await?;
        let mut summary = FetchSummary::default();
        while let Some(record) = records.next().await {
            summary.fetched += 1;
            if self.process(&record).await {
                summary.kept += 1;
            }
        }

        if summary.kept == 0 {
            if let Some(start) = start_bound(range) {
                warn!("No messages found starting from ID {}. This might indicate:", start);
                warn!("1. The message ID doesn't exist in this chat");
                warn!("2. The chat was migrated to a channel (old message IDs become invalid)");
                warn!("3. All messages from that ID are older than available history");
            } else {
                warn!("No messages matched in '{}'", chat);
            }
        }

        info!(
            "Fetched {} record(s) from '{}', {} kept",
            summary.fetched, chat, summary.kept
        );
        Ok(summary)
    }

    /// Consume live events until the channel closes or `cancel` fires.
    pub async fn run_live(&self, mut events: mpsc::Receiver<LiveEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Live pipeline cancelled");
                    break;
                }
                event = events.recv() => match event {
                    // Waiting for dispatch capacity must not hide a shutdown request.
                    Some(event) => tokio::select! {
                        _ = self.handle_event(event) => {}
                        _ = cancel.cancelled() => {
                            warn!("Live pipeline cancelled while waiting for dispatch capacity");
                            break;
                        }
                    },
                    None => {
                        info!("Event source closed");
                        break;
                    }
                }
            }
        }
    }

    /// Stop accepting work and wait up to `timeout` for in-flight dispatches.
    /// Returns whether everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting for {} in-flight dispatch(es)", pending);
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "Drain timed out after {:?}; {} dispatch(es) abandoned",
                    timeout,
                    self.tracker.len()
                );
                false
            }
        }
    }
}

/// The user-supplied starting id, whichever side it was placed on.
fn start_bound(range: &FetchRange) -> Option<i64> {
    if range.reverse() {
        range.min_id
    } else {
        range.max_id
    }
}

fn log_fetch_plan(chat: &str, range: &FetchRange) {
    if !range.has_bounds() {
        match range.direction {
            Direction::Forward => info!(
                "Fetching messages from '{}' forward from the beginning (oldest -> newest).",
                chat
            ),
            Direction::Backward => info!(
                "Fetching messages from '{}' backward from the end (newest -> oldest).",
                chat
            ),
            Direction::Default => {
                info!("Fetching messages from '{}' with default direction.", chat)
            }
        }
        return;
    }

    let edges = if range.inclusive {
        "inclusive bounds, widened by one"
    } else {
        "exclusive bounds"
    };
    info!(
        "Fetching {} in '{}' with ids in ({:?}, {:?}), {}.",
        range.direction, chat, range.min_id, range.max_id, edges
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use serde_json::json;

    use crate::filter::FilterOptions;
    use crate::range::{resolve, RangeRequest};
    use crate::sinks::console::{ConsoleSink, SharedBuffer};
    use crate::sinks::tests::ProbeSink;
    use crate::sinks::Sink;
    use crate::source::replay::apply_range;

    struct VecSource(Vec<Record>);

    #[async_trait]
    impl HistorySource for VecSource {
        async fn fetch(
            &self,
            _chat: &str,
            range: &FetchRange,
        ) -> Result<BoxStream<'static, Record>> {
            Ok(stream::iter(apply_range(self.0.clone(), range)).boxed())
        }
    }

    /// Sink that waits before counting, to show dispatch does not block ingestion.
    struct SlowSink {
        delay: Duration,
        delivered: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn deliver(&self, _record: &Record) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn profiles() -> Arc<ProfileSet> {
        Arc::new(
            ProfileSet::from_json(
                r#"{"default": {"stop_keys": ["views"], "stop_objects": ["MessageService"]}}"#,
            )
            .unwrap(),
        )
    }

    async fn buffered_pipeline(filter: MessageFilter) -> (Pipeline, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let mut dispatcher = SinkDispatcher::new();
        dispatcher
            .add(Box::new(ConsoleSink::with_writer(false, buffer.clone())))
            .await;
        let pipeline = Pipeline::new(filter, profiles(), "default", Arc::new(dispatcher), 8);
        (pipeline, buffer)
    }

    fn history() -> Vec<Record> {
        vec![
            json!({"_": "Message", "id": 1, "out": true, "message": "mine", "views": 3}),
            json!({"_": "Message", "id": 2, "out": false, "message": "hello there", "views": 9}),
            json!({"_": "MessageService", "id": 3, "action": {"_": "MessageActionPinMessage"}}),
            json!({"_": "Message", "id": 4, "out": false, "message": "bye"}),
        ]
    }

    #[tokio::test]
    async fn test_fetch_filters_cleans_and_dispatches() {
        let filter = MessageFilter::new(&FilterOptions {
            incoming_only: true,
            ..Default::default()
        })
        .unwrap();
        let (pipeline, buffer) = buffered_pipeline(filter).await;
        let range = resolve(&RangeRequest {
            forward: true,
            limit: Some(0),
            ..Default::default()
        });

        let summary = pipeline
            .run_fetch(&VecSource(history()), "chat", &range)
            .await
            .unwrap();
        assert!(pipeline.drain(Duration::from_secs(5)).await);

        assert_eq!(summary, FetchSummary { fetched: 4, kept: 2 });
        let output = buffer.contents();
        let mut lines: Vec<&str> = output.lines().collect();
        lines.sort();
        assert_eq!(
            lines,
            vec![
                r#"{"_":"Message","id":2,"message":"hello there"}"#,
                r#"{"_":"Message","id":4,"message":"bye"}"#,
            ]
        );

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.filtered_out, 1);
        assert_eq!(stats.emptied, 1);
        assert_eq!(stats.dispatched, 2);
    }

    #[tokio::test]
    async fn test_fetch_with_nothing_kept() {
        let filter = MessageFilter::new(&FilterOptions {
            pattern: Some("no such text".to_string()),
            ..Default::default()
        })
        .unwrap();
        let (pipeline, buffer) = buffered_pipeline(filter).await;
        let range = resolve(&RangeRequest {
            from_id: Some(10),
            ..Default::default()
        });

        let summary = pipeline
            .run_fetch(&VecSource(history()), "chat", &range)
            .await
            .unwrap();
        pipeline.drain(Duration::from_secs(5)).await;

        assert_eq!(summary.kept, 0);
        assert!(buffer.contents().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_pipeline_falls_back_to_console() {
        let buffer = SharedBuffer::default();
        let dispatcher = SinkDispatcher::new()
            .with_fallback(ConsoleSink::with_writer(false, buffer.clone()))
            .initialize_all(&[])
            .await;
        let pipeline = Pipeline::new(
            MessageFilter::pass_all(),
            profiles(),
            "unknown-profile",
            Arc::new(dispatcher),
            4,
        );

        assert!(pipeline.process(&json!({"id": 9, "views": 1})).await);
        pipeline.drain(Duration::from_secs(5)).await;

        assert_eq!(buffer.contents(), "{\"id\":9,\"views\":1}\n");
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_block_ingestion() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = SinkDispatcher::new();
        dispatcher
            .add(Box::new(SlowSink {
                delay: Duration::from_millis(200),
                delivered: delivered.clone(),
            }))
            .await;
        let pipeline = Pipeline::new(
            MessageFilter::pass_all(),
            profiles(),
            "default",
            Arc::new(dispatcher),
            16,
        );

        let started = tokio::time::Instant::now();
        for id in 0..5 {
            pipeline.process(&json!({"id": id})).await;
        }
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        assert!(pipeline.drain(Duration::from_secs(5)).await);
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_drain_times_out_on_stuck_sink() {
        let mut dispatcher = SinkDispatcher::new();
        dispatcher
            .add(Box::new(SlowSink {
                delay: Duration::from_secs(30),
                delivered: Arc::new(AtomicUsize::new(0)),
            }))
            .await;
        let pipeline = Pipeline::new(
            MessageFilter::pass_all(),
            profiles(),
            "default",
            Arc::new(dispatcher),
            1,
        );

        pipeline.process(&json!({"id": 1})).await;
        assert!(!pipeline.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_failing_sink_isolated_through_pipeline() {
        let mut bad = ProbeSink::new();
        bad.fail_deliver = true;
        let good = ProbeSink::new();
        let good_count = good.delivered.clone();

        let mut dispatcher = SinkDispatcher::new();
        dispatcher.add(Box::new(bad)).await;
        dispatcher.add(Box::new(good)).await;
        let pipeline = Pipeline::new(
            MessageFilter::pass_all(),
            profiles(),
            "default",
            Arc::new(dispatcher),
            4,
        );

        pipeline.process(&json!({"id": 1})).await;
        pipeline.process(&json!({"id": 2})).await;
        pipeline.drain(Duration::from_secs(5)).await;

        assert_eq!(good_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_callback_payload_skips_filter_and_is_cleaned() {
        let filter = MessageFilter::new(&FilterOptions {
            outgoing_only: true,
            ..Default::default()
        })
        .unwrap();
        let (pipeline, _buffer) = buffered_pipeline(filter).await;

        let payload = pipeline
            .prepare_callback(&CallbackEvent {
                id: Some("cbq-1".to_string()),
                chat_id: Some(-100),
                message_id: Some(5),
                sender_id: Some(42),
                chat_instance: None,
                data: Some("yes".to_string()),
                message: Some(json!({"_": "Message", "id": 5, "views": 2, "out": false})),
            })
            .unwrap();

        assert_eq!(
            payload,
            json!({
                "type": "callback_query",
                "id": "cbq-1",
                "chat_id": -100,
                "message_id": 5,
                "sender_id": 42,
                "data": "yes",
                "message": {"_": "Message", "id": 5}
            })
        );
    }

    #[tokio::test]
    async fn test_run_live_handles_events_until_closed() {
        let (pipeline, buffer) = buffered_pipeline(MessageFilter::pass_all()).await;
        let (tx, rx) = mpsc::channel(8);

        tx.send(LiveEvent::NewMessage(json!({"id": 1, "message": "a"})))
            .await
            .unwrap();
        tx.send(LiveEvent::Edited(json!({"id": 1, "message": "b"})))
            .await
            .unwrap();
        tx.send(LiveEvent::Callback(CallbackEvent {
            data: Some("press".to_string()),
            ..Default::default()
        }))
        .await
        .unwrap();
        drop(tx);

        pipeline.run_live(rx, CancellationToken::new()).await;
        pipeline.drain(Duration::from_secs(5)).await;

        let output = buffer.contents();
        assert_eq!(output.lines().count(), 3);
        assert!(output.contains(r#""data":"press""#));
        assert!(output.contains(r#""message":"b""#));
    }

    #[tokio::test]
    async fn test_run_live_cancel_while_dispatch_is_saturated() {
        let mut dispatcher = SinkDispatcher::new();
        dispatcher
            .add(Box::new(SlowSink {
                delay: Duration::from_secs(30),
                delivered: Arc::new(AtomicUsize::new(0)),
            }))
            .await;
        let pipeline = Pipeline::new(
            MessageFilter::pass_all(),
            profiles(),
            "default",
            Arc::new(dispatcher),
            1,
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(LiveEvent::NewMessage(json!({"id": 1}))).await.unwrap();
        tx.send(LiveEvent::NewMessage(json!({"id": 2}))).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), pipeline.run_live(rx, cancel))
            .await
            .unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_live_stops_on_cancel() {
        let (pipeline, _buffer) = buffered_pipeline(MessageFilter::pass_all()).await;
        let (_tx, rx) = mpsc::channel::<LiveEvent>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), pipeline.run_live(rx, cancel))
            .await
            .unwrap();
    }
}
