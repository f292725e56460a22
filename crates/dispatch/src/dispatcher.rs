//! Reply delivery: chunking, receipt ordering, typing indicators.

use {
    std::sync::Arc,
    tokio::sync::{mpsc, watch},
    tracing::{debug, warn},
    volery_channels::{
        ChannelEvent, ChannelEventSink, ChannelOutbound, Error as ChannelError, SendReceipt,
        SharedChannels,
    },
    volery_common::types::{ReplyPayload, ReplyTarget},
};

#[cfg(feature = "metrics")]
use volery_metrics::{counter, definitions};

use crate::{chunk::chunk_text, error::Result};

/// One step of a streamed reply.
#[derive(Debug)]
pub enum ReplyEvent {
    /// A finished block of text, ready to deliver.
    Block(String),
    /// The stream completed normally.
    Done,
    /// The producer failed; delivery stops here.
    Error(String),
}

/// What a delivery attempt actually achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub chunks_sent: usize,
    pub ok: bool,
}

/// Delivers replies to their channel, one receipt at a time.
///
/// Chunk `n + 1` is only sent after chunk `n`'s receipt comes back, so
/// transports that reorder concurrent sends still show the reader a
/// coherent reply. A failed receipt aborts the remainder.
pub struct ReplyDispatcher {
    channels: SharedChannels,
    sink: Arc<dyn ChannelEventSink>,
    idle: IdleTracker,
}

impl ReplyDispatcher {
    #[must_use]
    pub fn new(channels: SharedChannels, sink: Arc<dyn ChannelEventSink>) -> Self {
        Self {
            channels,
            sink,
            idle: IdleTracker::default(),
        }
    }

    /// Deliver a complete reply.
    ///
    /// Text is chunked to `chunk_limit`; a media attachment goes out
    /// first via `send_media` with the first chunk as its caption, and
    /// remaining chunks follow as plain text. Transport rejections
    /// surface as `ok: false` reports; `Err` means a local failure
    /// (unknown channel, bad target).
    pub async fn send_final(
        &self,
        target: &ReplyTarget,
        payload: &ReplyPayload,
        chunk_limit: usize,
    ) -> Result<DeliveryReport> {
        let _busy = self.idle.begin();
        let outbound = self.resolve_outbound(target).await?;
        let to = outbound.normalize_target(&target.chat_id)?;

        let chunks = chunk_text(&payload.text, chunk_limit);
        if chunks.is_empty() && payload.media.is_none() {
            debug!(conversation = %target.chat_id, "empty reply; nothing to deliver");
            return Ok(DeliveryReport {
                chunks_sent: 0,
                ok: true,
            });
        }

        let typing = chunks.len() > 1 && self.typing_supported(target).await;
        if typing {
            let _ = outbound.send_typing(&target.account_id, &to, true).await;
        }

        let outcome = self
            .deliver_chunks(outbound.as_ref(), target, &to, payload, chunks)
            .await;

        if typing {
            let _ = outbound.send_typing(&target.account_id, &to, false).await;
        }

        let report = outcome?;
        self.emit_delivered(target, report);
        Ok(report)
    }

    /// Deliver a streamed reply, sending each block as it lands.
    ///
    /// Streams always toggle the typing indicator (when the channel has
    /// one) because the reader is visibly waiting on more output.
    pub async fn send_stream(
        &self,
        target: &ReplyTarget,
        events: mpsc::Receiver<ReplyEvent>,
        chunk_limit: usize,
    ) -> Result<DeliveryReport> {
        let _busy = self.idle.begin();
        let outbound = self.resolve_outbound(target).await?;
        let to = outbound.normalize_target(&target.chat_id)?;

        let typing = self.typing_supported(target).await;
        if typing {
            let _ = outbound.send_typing(&target.account_id, &to, true).await;
        }

        let outcome = self
            .consume_stream(outbound.as_ref(), target, &to, events, chunk_limit)
            .await;

        if typing {
            let _ = outbound.send_typing(&target.account_id, &to, false).await;
        }

        let report = outcome?;
        self.emit_delivered(target, report);
        Ok(report)
    }

    /// True when no delivery is currently in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle.is_idle()
    }

    /// Resolve once every in-flight delivery has finished.
    pub async fn wait_for_idle(&self) {
        self.idle.wait_for_idle().await;
    }

    async fn resolve_outbound(&self, target: &ReplyTarget) -> Result<Arc<dyn ChannelOutbound>> {
        match self.channels.outbound(&target.channel_id).await {
            Some(outbound) => Ok(outbound),
            None => Err(ChannelError::unknown_channel(&target.channel_id).into()),
        }
    }

    async fn typing_supported(&self, target: &ReplyTarget) -> bool {
        self.channels
            .dock(&target.channel_id)
            .await
            .is_some_and(|dock| dock.typing_indicators)
    }

    async fn deliver_chunks(
        &self,
        outbound: &dyn ChannelOutbound,
        target: &ReplyTarget,
        to: &str,
        payload: &ReplyPayload,
        chunks: Vec<String>,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport {
            chunks_sent: 0,
            ok: true,
        };
        let mut remaining = chunks.into_iter();

        if let Some(media) = payload.media.as_ref() {
            let caption = ReplyPayload {
                text: remaining.next().unwrap_or_default(),
                media: Some(media.clone()),
            };
            let receipt = outbound.send_media(&target.account_id, to, &caption).await?;
            if !self.note_receipt(target, &receipt, &mut report) {
                return Ok(report);
            }
        }

        for chunk in remaining {
            let receipt = outbound.send_text(&target.account_id, to, &chunk).await?;
            if !self.note_receipt(target, &receipt, &mut report) {
                break;
            }
        }
        Ok(report)
    }

    async fn consume_stream(
        &self,
        outbound: &dyn ChannelOutbound,
        target: &ReplyTarget,
        to: &str,
        mut events: mpsc::Receiver<ReplyEvent>,
        chunk_limit: usize,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport {
            chunks_sent: 0,
            ok: true,
        };

        'consume: loop {
            let Some(event) = events.recv().await else {
                debug!(conversation = %target.chat_id, "reply stream closed without done");
                break;
            };
            match event {
                ReplyEvent::Block(text) => {
                    for chunk in chunk_text(&text, chunk_limit) {
                        let receipt = outbound.send_text(&target.account_id, to, &chunk).await?;
                        if !self.note_receipt(target, &receipt, &mut report) {
                            break 'consume;
                        }
                    }
                },
                ReplyEvent::Done => break,
                ReplyEvent::Error(message) => {
                    warn!(
                        conversation = %target.chat_id,
                        message,
                        "reply stream reported an error"
                    );
                    report.ok = false;
                    break;
                },
            }
        }
        Ok(report)
    }

    /// Record one receipt; returns false when the remainder must abort.
    fn note_receipt(
        &self,
        target: &ReplyTarget,
        receipt: &SendReceipt,
        report: &mut DeliveryReport,
    ) -> bool {
        if receipt.ok {
            report.chunks_sent += 1;
            #[cfg(feature = "metrics")]
            counter!(definitions::REPLY_CHUNKS_SENT).increment(1);
            return true;
        }
        report.ok = false;
        #[cfg(feature = "metrics")]
        counter!(definitions::REPLY_SEND_FAILURES).increment(1);
        warn!(
            channel = %target.channel_id,
            account = %target.account_id,
            chat = %target.chat_id,
            error = ?receipt.error,
            "chunk rejected by channel; aborting remainder of reply"
        );
        false
    }

    fn emit_delivered(&self, target: &ReplyTarget, report: DeliveryReport) {
        self.sink.emit(ChannelEvent::ReplyDelivered {
            channel_id: target.channel_id.clone(),
            account_id: target.account_id.clone(),
            chat_id: target.chat_id.clone(),
            chunks: report.chunks_sent,
            ok: report.ok,
        });
    }
}

/// Counts in-flight deliveries so shutdown can wait for quiet.
#[derive(Clone)]
struct IdleTracker {
    counter: watch::Sender<usize>,
}

impl Default for IdleTracker {
    fn default() -> Self {
        let (tx, _) = watch::channel(0);
        Self { counter: tx }
    }
}

impl IdleTracker {
    fn begin(&self) -> IdleGuard {
        self.counter.send_modify(|n| *n += 1);
        IdleGuard {
            counter: self.counter.clone(),
        }
    }

    fn is_idle(&self) -> bool {
        *self.counter.borrow() == 0
    }

    async fn wait_for_idle(&self) {
        let mut rx = self.counter.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

struct IdleGuard {
    counter: watch::Sender<usize>,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        async_trait::async_trait,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        volery_channels::{ChannelDock, ChannelPlugin, ChannelRegistry, ChannelStatus, MediaSupport},
        volery_common::types::{ChatType, MediaRef},
    };

    use super::*;

    struct ScriptedOutbound {
        calls: Mutex<Vec<String>>,
        sends: AtomicUsize,
        fail_on: usize,
        delay_ms: u64,
    }

    impl ScriptedOutbound {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                sends: AtomicUsize::new(0),
                fail_on: 0,
                delay_ms: 0,
            })
        }

        fn failing_on(n: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                sends: AtomicUsize::new(0),
                fail_on: n,
                delay_ms: 0,
            })
        }

        fn slow(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                sends: AtomicUsize::new(0),
                fail_on: 0,
                delay_ms,
            })
        }

        fn record(&self, entry: String) {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        fn next_receipt(&self) -> SendReceipt {
            let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == n {
                SendReceipt::error("scripted failure")
            } else {
                SendReceipt::ok(Some(format!("m{n}")))
            }
        }
    }

    #[async_trait]
    impl ChannelOutbound for ScriptedOutbound {
        async fn send_text(
            &self,
            _account_id: &str,
            to: &str,
            text: &str,
        ) -> volery_channels::Result<SendReceipt> {
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            self.record(format!("text:{to}:{text}"));
            Ok(self.next_receipt())
        }

        async fn send_media(
            &self,
            _account_id: &str,
            to: &str,
            payload: &ReplyPayload,
        ) -> volery_channels::Result<SendReceipt> {
            let url = payload.media.as_ref().map_or("", |m| m.url.as_str());
            self.record(format!("media:{to}:{}:{url}", payload.text));
            Ok(self.next_receipt())
        }

        async fn send_typing(
            &self,
            _account_id: &str,
            to: &str,
            active: bool,
        ) -> volery_channels::Result<()> {
            let state = if active { "on" } else { "off" };
            self.record(format!("typing:{to}:{state}"));
            Ok(())
        }
    }

    struct TestPlugin {
        dock: ChannelDock,
        outbound: Arc<ScriptedOutbound>,
    }

    #[async_trait]
    impl ChannelPlugin for TestPlugin {
        fn dock(&self) -> &ChannelDock {
            &self.dock
        }

        async fn start_account(
            &mut self,
            _account_id: &str,
            _config: serde_json::Value,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop_account(&mut self, _account_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn outbound(&self) -> Option<Arc<dyn ChannelOutbound>> {
            Some(self.outbound.clone())
        }

        fn status(&self) -> Option<Arc<dyn ChannelStatus>> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ChannelEvent>>,
    }

    impl ChannelEventSink for RecordingSink {
        fn emit(&self, event: ChannelEvent) {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        }
    }

    fn shared_with(outbound: Arc<ScriptedOutbound>, typing: bool) -> SharedChannels {
        let mut registry = ChannelRegistry::new();
        registry
            .register(Box::new(TestPlugin {
                dock: ChannelDock {
                    channel_id: "bridge".into(),
                    label: "Bridge".into(),
                    chat_types: vec![ChatType::Dm, ChatType::Group],
                    media: MediaSupport::both(),
                    text_chunk_limit: 0,
                    typing_indicators: typing,
                    default_require_mention_in_groups: true,
                    debounce_default_ms: None,
                },
                outbound,
            }))
            .unwrap();
        SharedChannels::new(registry)
    }

    fn target() -> ReplyTarget {
        ReplyTarget {
            channel_id: "bridge".into(),
            account_id: "main".into(),
            chat_id: "c1".into(),
        }
    }

    fn dispatcher(outbound: Arc<ScriptedOutbound>, typing: bool) -> (ReplyDispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ReplyDispatcher::new(shared_with(outbound, typing), sink.clone());
        (dispatcher, sink)
    }

    #[tokio::test]
    async fn single_chunk_sends_without_typing() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, sink) = dispatcher(outbound.clone(), true);

        let report = dispatcher
            .send_final(&target(), &ReplyPayload::text("hi"), 100)
            .await
            .unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                chunks_sent: 1,
                ok: true
            }
        );
        assert_eq!(outbound.calls(), ["text:c1:hi"]);
        let events = sink.events.lock().unwrap_or_else(|e| e.into_inner());
        assert!(matches!(
            events[0],
            ChannelEvent::ReplyDelivered { chunks: 1, ok: true, .. }
        ));
    }

    #[tokio::test]
    async fn chunks_go_out_in_order_between_typing_toggles() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, _sink) = dispatcher(outbound.clone(), true);

        let report = dispatcher
            .send_final(&target(), &ReplyPayload::text("aaaa bbbb cccc"), 9)
            .await
            .unwrap();

        assert_eq!(report.chunks_sent, 3);
        assert_eq!(
            outbound.calls(),
            [
                "typing:c1:on",
                "text:c1:aaaa",
                "text:c1:bbbb",
                "text:c1:cccc",
                "typing:c1:off",
            ]
        );
    }

    #[tokio::test]
    async fn multi_chunk_without_typing_support_skips_toggles() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, _sink) = dispatcher(outbound.clone(), false);

        dispatcher
            .send_final(&target(), &ReplyPayload::text("aaaa bbbb cccc"), 9)
            .await
            .unwrap();

        assert_eq!(
            outbound.calls(),
            ["text:c1:aaaa", "text:c1:bbbb", "text:c1:cccc"]
        );
    }

    #[tokio::test]
    async fn failed_receipt_aborts_the_remainder() {
        let outbound = ScriptedOutbound::failing_on(2);
        let (dispatcher, sink) = dispatcher(outbound.clone(), true);

        let report = dispatcher
            .send_final(&target(), &ReplyPayload::text("aaaa bbbb cccc"), 9)
            .await
            .unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                chunks_sent: 1,
                ok: false
            }
        );
        // Second send failed; third never went out, typing still cleared.
        assert_eq!(
            outbound.calls(),
            [
                "typing:c1:on",
                "text:c1:aaaa",
                "text:c1:bbbb",
                "typing:c1:off",
            ]
        );
        let events = sink.events.lock().unwrap_or_else(|e| e.into_inner());
        assert!(matches!(
            events[0],
            ChannelEvent::ReplyDelivered { chunks: 1, ok: false, .. }
        ));
    }

    #[tokio::test]
    async fn media_leads_with_first_chunk_as_caption() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, _sink) = dispatcher(outbound.clone(), false);

        let payload = ReplyPayload {
            text: "aaaa bbbb cccc".into(),
            media: Some(MediaRef {
                url: "https://x/cat.png".into(),
                mime_type: "image/png".into(),
                file_name: None,
            }),
        };
        let report = dispatcher.send_final(&target(), &payload, 9).await.unwrap();

        assert_eq!(report.chunks_sent, 3);
        assert_eq!(
            outbound.calls(),
            [
                "media:c1:aaaa:https://x/cat.png",
                "text:c1:bbbb",
                "text:c1:cccc",
            ]
        );
    }

    #[tokio::test]
    async fn media_without_text_still_sends() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, _sink) = dispatcher(outbound.clone(), true);

        let payload = ReplyPayload {
            text: String::new(),
            media: Some(MediaRef {
                url: "https://x/dog.jpg".into(),
                mime_type: "image/jpeg".into(),
                file_name: None,
            }),
        };
        let report = dispatcher.send_final(&target(), &payload, 100).await.unwrap();

        assert_eq!(report.chunks_sent, 1);
        assert_eq!(outbound.calls(), ["media:c1::https://x/dog.jpg"]);
    }

    #[tokio::test]
    async fn empty_reply_is_skipped_entirely() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, sink) = dispatcher(outbound.clone(), true);

        let report = dispatcher
            .send_final(&target(), &ReplyPayload::text(""), 100)
            .await
            .unwrap();

        assert_eq!(report.chunks_sent, 0);
        assert!(report.ok);
        assert!(outbound.calls().is_empty());
        assert!(sink.events.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_is_a_local_error() {
        let registry = ChannelRegistry::new();
        let dispatcher = ReplyDispatcher::new(
            SharedChannels::new(registry),
            Arc::new(RecordingSink::default()),
        );
        let err = dispatcher
            .send_final(&target(), &ReplyPayload::text("hi"), 100)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown channel"));
    }

    #[tokio::test]
    async fn stream_blocks_are_chunked_and_sent_in_order() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, _sink) = dispatcher(outbound.clone(), true);

        let (tx, rx) = mpsc::channel(8);
        tx.send(ReplyEvent::Block("aaaa bbbb cccc".into())).await.unwrap();
        tx.send(ReplyEvent::Block("dd".into())).await.unwrap();
        tx.send(ReplyEvent::Done).await.unwrap();
        drop(tx);

        let report = dispatcher.send_stream(&target(), rx, 9).await.unwrap();

        assert_eq!(report.chunks_sent, 4);
        assert!(report.ok);
        assert_eq!(
            outbound.calls(),
            [
                "typing:c1:on",
                "text:c1:aaaa",
                "text:c1:bbbb",
                "text:c1:cccc",
                "text:c1:dd",
                "typing:c1:off",
            ]
        );
    }

    #[tokio::test]
    async fn stream_error_marks_delivery_failed() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, sink) = dispatcher(outbound.clone(), false);

        let (tx, rx) = mpsc::channel(8);
        tx.send(ReplyEvent::Block("hi".into())).await.unwrap();
        tx.send(ReplyEvent::Error("model crashed".into())).await.unwrap();
        drop(tx);

        let report = dispatcher.send_stream(&target(), rx, 100).await.unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                chunks_sent: 1,
                ok: false
            }
        );
        let events = sink.events.lock().unwrap_or_else(|e| e.into_inner());
        assert!(matches!(
            events[0],
            ChannelEvent::ReplyDelivered { ok: false, .. }
        ));
    }

    #[tokio::test]
    async fn closed_stream_without_done_completes() {
        let outbound = ScriptedOutbound::new();
        let (dispatcher, _sink) = dispatcher(outbound.clone(), false);

        let (tx, rx) = mpsc::channel(8);
        tx.send(ReplyEvent::Block("hi".into())).await.unwrap();
        drop(tx);

        let report = dispatcher.send_stream(&target(), rx, 100).await.unwrap();
        assert_eq!(report.chunks_sent, 1);
        assert!(report.ok);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_idle_blocks_until_delivery_finishes() {
        let outbound = ScriptedOutbound::slow(200);
        let (dispatcher, _sink) = dispatcher(outbound.clone(), false);
        let dispatcher = Arc::new(dispatcher);

        assert!(dispatcher.is_idle());
        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .send_final(&target(), &ReplyPayload::text("slow"), 100)
                    .await
                    .unwrap()
            }
        });
        tokio::task::yield_now().await;
        assert!(!dispatcher.is_idle());

        dispatcher.wait_for_idle().await;
        assert!(dispatcher.is_idle());
        let report = task.await.unwrap();
        assert_eq!(report.chunks_sent, 1);
    }
}
