//! In-memory stream backend
//!
//! Local-only append-log with simulated consumer groups: a VecDeque of
//! entries per stream, a group-level delivery cursor (mirroring the `>`
//! semantics of the durable backend), and a pending map with delivery
//! counts. Process crash loses everything; for durability use the Redis
//! backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::backend::{StreamBackend, StreamMessage, StreamStats, StreamSubscription};
use super::error::StreamError;

/// Default stream max length (approximate, trimmed on publish)
const DEFAULT_STREAM_MAX_LEN: usize = 100_000;

/// Entry stored in a memory stream
#[derive(Clone)]
struct StreamEntry {
    id: u64,
    payload: Vec<u8>,
}

/// Pending (delivered, unacknowledged) entry state
#[derive(Clone)]
struct PendingInfo {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

/// Consumer group state for a stream
#[derive(Clone, Default)]
struct ConsumerGroup {
    /// Group-level cursor: highest entry id handed out as "new"
    last_delivered: u64,
    /// Consumers that have read from the group
    consumers: HashMap<String, ()>,
    /// Pending entries: entry id -> delivery state
    pending: HashMap<u64, PendingInfo>,
}

/// Stream state
struct StreamState {
    messages: VecDeque<StreamEntry>,
    groups: HashMap<String, ConsumerGroup>,
    next_id: u64,
    max_len: usize,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            messages: VecDeque::new(),
            groups: HashMap::new(),
            next_id: 1,
            max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }
}

struct SharedState {
    streams: RwLock<HashMap<String, StreamState>>,
    /// Per-stream notifiers for immediate subscriber wakeup (avoids polling)
    notifiers: RwLock<HashMap<String, Arc<Notify>>>,
}

/// In-memory stream backend
pub struct MemoryStreamBackend {
    state: Arc<SharedState>,
}

impl Clone for MemoryStreamBackend {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MemoryStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStreamBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState {
                streams: RwLock::new(HashMap::new()),
                notifiers: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn trim_stream(stream: &mut StreamState) {
        while stream.messages.len() > stream.max_len {
            if let Some(entry) = stream.messages.pop_front() {
                for group in stream.groups.values_mut() {
                    group.pending.remove(&entry.id);
                }
            }
        }
    }

    fn get_or_create_notifier(&self, stream: &str) -> Arc<Notify> {
        {
            let notifiers = self.state.notifiers.read();
            if let Some(n) = notifiers.get(stream) {
                return Arc::clone(n);
            }
        }
        let mut notifiers = self.state.notifiers.write();
        if let Some(n) = notifiers.get(stream) {
            return Arc::clone(n);
        }
        let n = Arc::new(Notify::new());
        notifiers.insert(stream.to_string(), Arc::clone(&n));
        n
    }
}

#[async_trait]
impl StreamBackend for MemoryStreamBackend {
    async fn publish(&self, stream: &str, payload: &[u8]) -> Result<String, StreamError> {
        let id = {
            let mut streams = self.state.streams.write();
            let state = streams.entry(stream.to_string()).or_default();

            let id = state.next_id;
            state.next_id += 1;

            state.messages.push_back(StreamEntry {
                id,
                payload: payload.to_vec(),
            });

            Self::trim_stream(state);
            id
        };

        // Wake a subscriber immediately (no polling delay). notify_one stores
        // a permit, so a publish landing between a subscriber's state check
        // and its await is not lost.
        self.get_or_create_notifier(stream).notify_one();

        Ok(id.to_string())
    }

    async fn subscribe(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, StreamError> {
        {
            let mut streams = self.state.streams.write();
            let state = streams.entry(stream.to_string()).or_default();
            let cg = state.groups.entry(group.to_string()).or_default();
            cg.consumers.insert(consumer.to_string(), ());
        }

        let stream_name = stream.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let state = Arc::clone(&self.state);
        let notifier = self.get_or_create_notifier(stream);

        let receiver = stream! {
            loop {
                let maybe_msg = {
                    let mut streams = state.streams.write();
                    match streams.get_mut(&stream_name) {
                        None => None,
                        Some(stream_state) => {
                            let cg = stream_state
                                .groups
                                .entry(group.clone())
                                .or_default();

                            // Next entry past the group cursor (the durable
                            // backend's ">" read)
                            let found = stream_state
                                .messages
                                .iter()
                                .find(|entry| entry.id > cg.last_delivered)
                                .cloned();

                            found.map(|entry| {
                                cg.last_delivered = entry.id;
                                cg.pending.insert(
                                    entry.id,
                                    PendingInfo {
                                        consumer: consumer.clone(),
                                        delivered_at: Instant::now(),
                                        delivery_count: 1,
                                    },
                                );
                                StreamMessage {
                                    id: entry.id.to_string(),
                                    payload: entry.payload,
                                    delivery_count: 1,
                                }
                            })
                        }
                    }
                };

                if let Some(msg) = maybe_msg {
                    // Other consumers may be waiting on entries we skipped
                    notifier.notify_one();
                    yield Ok(msg);
                } else {
                    notifier.notified().await;
                }
            }
        };

        Ok(StreamSubscription {
            receiver: Box::pin(receiver),
        })
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StreamError> {
        let id: u64 = id
            .parse()
            .map_err(|_| StreamError::Stream(format!("invalid entry id: {id}")))?;

        let mut streams = self.state.streams.write();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| StreamError::Stream(format!("stream not found: {stream}")))?;

        let cg = state.groups.get_mut(group).ok_or_else(|| {
            StreamError::ConsumerGroup(format!("consumer group not found: {group}"))
        })?;

        cg.pending.remove(&id);
        Ok(())
    }

    async fn ack_batch(
        &self,
        stream: &str,
        group: &str,
        ids: &[String],
    ) -> Result<(), StreamError> {
        for id in ids {
            self.ack(stream, group, id).await?;
        }
        Ok(())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let mut streams = self.state.streams.write();
        let state = match streams.get_mut(stream) {
            Some(s) => s,
            None => return Ok(vec![]),
        };

        let cg = match state.groups.get_mut(group) {
            Some(g) => g,
            None => return Ok(vec![]),
        };

        let now = Instant::now();
        let min_idle = std::time::Duration::from_millis(min_idle_ms);

        let mut idle_ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, info)| now.duration_since(info.delivered_at) >= min_idle)
            .map(|(&id, _)| id)
            .collect();
        idle_ids.sort_unstable();
        idle_ids.truncate(count);

        let mut claimed = Vec::new();
        for id in idle_ids {
            let Some(entry) = state.messages.iter().find(|e| e.id == id) else {
                // Entry trimmed out from under the pending list
                cg.pending.remove(&id);
                continue;
            };
            if let Some(info) = cg.pending.get_mut(&id) {
                info.consumer = consumer.to_string();
                info.delivered_at = Instant::now();
                info.delivery_count += 1;
                claimed.push(StreamMessage {
                    id: id.to_string(),
                    payload: entry.payload.clone(),
                    delivery_count: info.delivery_count,
                });
            }
        }

        Ok(claimed)
    }

    async fn stats(&self, stream: &str, group: &str) -> Result<StreamStats, StreamError> {
        let streams = self.state.streams.read();
        let state = match streams.get(stream) {
            Some(s) => s,
            None => return Ok(StreamStats::default()),
        };

        let cg = match state.groups.get(group) {
            Some(g) => g,
            None => {
                return Ok(StreamStats {
                    length: state.messages.len() as u64,
                    ..Default::default()
                });
            }
        };

        let now = Instant::now();
        let oldest_pending_ms = cg
            .pending
            .values()
            .map(|info| now.duration_since(info.delivered_at).as_millis() as u64)
            .max();

        Ok(StreamStats {
            length: state.messages.len() as u64,
            pending: cg.pending.len() as u64,
            consumers: cg.consumers.len() as u64,
            oldest_pending_ms,
        })
    }

    async fn health_check(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
