//! Per-conversation message debouncing.
//!
//! People send bursts: three short messages in five seconds that are
//! really one thought. Buffering a conversation until it goes quiet lets
//! the agent answer the whole burst once instead of racing each
//! fragment.

use {
    std::{
        collections::HashMap,
        sync::{
            Arc, Mutex, MutexGuard,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace},
    volery_common::types::{ConversationKey, InboundMessage},
};

#[cfg(feature = "metrics")]
use volery_metrics::{counter, definitions};

/// One flushed conversation burst, messages in arrival order.
#[derive(Debug, Clone)]
pub struct DebouncedTurn {
    pub key: ConversationKey,
    pub messages: Vec<InboundMessage>,
}

#[derive(Default)]
struct Bucket {
    messages: Vec<InboundMessage>,
    generation: u64,
    timer: CancellationToken,
}

struct Inner {
    buckets: Mutex<HashMap<ConversationKey, Bucket>>,
    output: mpsc::UnboundedSender<DebouncedTurn>,
    default_window: Duration,
    // Global counter: a stale timer armed for an earlier bucket under the
    // same key can never match a later bucket's generation.
    generations: AtomicU64,
}

/// Buffers messages per conversation and emits a [`DebouncedTurn`] once
/// the conversation has been quiet for its window.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    /// Create a debouncer; flushed turns arrive on the returned receiver.
    #[must_use]
    pub fn new(default_window: Duration) -> (Self, mpsc::UnboundedReceiver<DebouncedTurn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            inner: Arc::new(Inner {
                buckets: Mutex::new(HashMap::new()),
                output: tx,
                default_window,
                generations: AtomicU64::new(0),
            }),
        };
        (debouncer, rx)
    }

    /// Queue a message under the default window.
    pub fn enqueue(&self, message: InboundMessage) -> usize {
        self.enqueue_with_window(message, self.inner.default_window)
    }

    /// Queue a message, (re)starting the conversation's flush timer.
    ///
    /// Returns how many messages the flush will carry. A zero window
    /// bypasses buffering: the message is flushed immediately, taking any
    /// previously buffered messages for the conversation along with it.
    pub fn enqueue_with_window(&self, message: InboundMessage, window: Duration) -> usize {
        let key = message.conversation_key();

        if window.is_zero() {
            let messages = {
                let mut buckets = self.lock_buckets();
                let mut messages = match buckets.remove(&key) {
                    Some(bucket) => {
                        bucket.timer.cancel();
                        bucket.messages
                    },
                    None => Vec::new(),
                };
                messages.push(message);
                messages
            };
            let count = messages.len();
            self.emit(DebouncedTurn { key, messages });
            return count;
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (timer, pending) = {
            let mut buckets = self.lock_buckets();
            let bucket = buckets.entry(key.clone()).or_insert_with(Bucket::default);
            bucket.messages.push(message);
            bucket.generation = generation;
            bucket.timer.cancel();
            bucket.timer = CancellationToken::new();
            (bucket.timer.clone(), bucket.messages.len())
        };

        let this = self.clone();
        let timer_key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {},
                () = tokio::time::sleep(window) => this.flush_generation(&timer_key, generation),
            }
        });

        trace!(conversation = %key, pending, "message buffered");
        pending
    }

    /// Flush a conversation immediately, cancelling its timer.
    ///
    /// Unknown conversations are a no-op.
    pub fn flush_now(&self, key: &ConversationKey) {
        let turn = {
            let mut buckets = self.lock_buckets();
            buckets.remove(key).map(|bucket| {
                bucket.timer.cancel();
                DebouncedTurn {
                    key: key.clone(),
                    messages: bucket.messages,
                }
            })
        };
        if let Some(turn) = turn {
            self.emit(turn);
        }
    }

    /// Cancel every timer and flush all buffered conversations.
    pub fn shutdown(&self) {
        let mut drained: Vec<(ConversationKey, Bucket)> = {
            let mut buckets = self.lock_buckets();
            buckets.drain().collect()
        };
        drained.sort_by_key(|(key, _)| key.to_string());
        for (key, bucket) in drained {
            bucket.timer.cancel();
            if !bucket.messages.is_empty() {
                self.emit(DebouncedTurn {
                    key,
                    messages: bucket.messages,
                });
            }
        }
    }

    /// Number of messages currently buffered for a conversation.
    #[must_use]
    pub fn buffered(&self, key: &ConversationKey) -> usize {
        self.lock_buckets()
            .get(key)
            .map_or(0, |bucket| bucket.messages.len())
    }

    /// Flush only if no newer enqueue re-armed the conversation since
    /// this timer was started.
    fn flush_generation(&self, key: &ConversationKey, generation: u64) {
        let turn = {
            let mut buckets = self.lock_buckets();
            match buckets.get(key) {
                Some(bucket) if bucket.generation == generation => {
                    buckets.remove(key).map(|bucket| DebouncedTurn {
                        key: key.clone(),
                        messages: bucket.messages,
                    })
                },
                _ => None,
            }
        };
        if let Some(turn) = turn {
            self.emit(turn);
        }
    }

    fn emit(&self, turn: DebouncedTurn) {
        #[cfg(feature = "metrics")]
        counter!(definitions::DEBOUNCE_FLUSH).increment(1);
        debug!(
            conversation = %turn.key,
            messages = turn.messages.len(),
            "flushing conversation turn"
        );
        if self.inner.output.send(turn).is_err() {
            debug!("turn receiver dropped; discarding flush");
        }
    }

    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<ConversationKey, Bucket>> {
        self.inner.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}
