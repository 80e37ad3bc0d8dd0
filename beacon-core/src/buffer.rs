//! Persistent event buffer with debounced, retried delivery
//!
//! ## Lifecycle
//!
//! ```text
//! [Idle] --track()--> [Cooldown] --timer elapses--> [Sending]
//! [Sending] --success--> [Idle]       (pending cleared, backup deleted)
//! [Sending] --failure--> [Cooldown]   (unbounded retry)
//! [Cooldown] --track()--> [Cooldown]  (event appended, timer untouched)
//! ```
//!
//! Every [`EventBuffer::track`] call writes the whole pending batch to the
//! [`BackupStore`] before returning, so a crash loses nothing that was
//! tracked. The backup is deleted only after the collector answers with the
//! exact body [`SUCCESS_MARKER`].
//!
//! At most one delivery loop runs per buffer. It is a spawned tokio task that
//! sleeps for the cooldown, sends whatever is pending at that moment, and
//! either finishes or starts the cooldown over. There is no retry limit and
//! no backoff.
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{Config, EventBuffer};
//!
//! # async fn run() -> beacon_core::Result<()> {
//! let config = Config::load()?;
//! let buffer = EventBuffer::from_config(&config.buffer)?;
//!
//! buffer.track("click", "btn1");
//! buffer.track("click", "btn2");
//!
//! // Both events go out together once the cooldown elapses
//! buffer.wait_idle().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::{BatchCodec, JsonCodec};
use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::storage::{BackupStore, FileStore};
use crate::transport::{HttpTransport, Transport};
use crate::types::{Event, EventBatch};

/// Response body the collector sends to acknowledge a batch
pub const SUCCESS_MARKER: &str = "200 OK";

/// Cooldown used when none is configured
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Requests sent to the collector
    pub attempts: usize,
    /// Requests that failed or were not acknowledged
    pub failures: usize,
    /// Requests acknowledged with the success marker
    pub batches_delivered: usize,
    /// Events removed from the buffer after acknowledgement
    pub events_delivered: usize,
    /// Backup writes or deletes that failed
    pub backup_failures: usize,
}

/// Client-side event buffer
///
/// Cheap to clone; clones share the same pending batch and delivery loop.
#[derive(Clone)]
pub struct EventBuffer {
    shared: Arc<Shared>,
}

/// Collects the capabilities an [`EventBuffer`] needs
pub struct EventBufferBuilder {
    store: Arc<dyn BackupStore>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn BatchCodec>,
    cooldown: Duration,
    runtime: Option<Handle>,
}

struct Shared {
    state: Mutex<BufferState>,
    store: Arc<dyn BackupStore>,
    codec: Arc<dyn BatchCodec>,
    transport: Arc<dyn Transport>,
    cooldown: Duration,
    runtime: Handle,
    /// `true` while no delivery loop is active
    idle_tx: watch::Sender<bool>,
}

struct BufferState {
    pending: EventBatch,
    /// A delivery loop is scheduled or in flight
    in_cooldown: bool,
    /// Set by shutdown; no new loops are started afterwards
    closed: bool,
    task: Option<JoinHandle<()>>,
    stats: DeliveryStats,
}

impl EventBufferBuilder {
    /// Replace the default JSON codec
    pub fn codec(mut self, codec: Arc<dyn BatchCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Wait before each delivery attempt (default 3 seconds)
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Runtime that drives the delivery loop (default: the current one)
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the buffer and recover any batch left by a previous process
    ///
    /// A recovered batch becomes the pending set and a delivery loop starts
    /// right away, as if the cooldown had just begun. An undecodable backup
    /// is quarantined and the buffer starts empty. Errors reading the backup
    /// are returned.
    pub fn initialize(self) -> Result<EventBuffer> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                Error::Runtime(format!("event buffer needs a tokio runtime: {}", e))
            })?,
        };

        let (idle_tx, _) = watch::channel(true);
        let shared = Arc::new(Shared {
            state: Mutex::new(BufferState {
                pending: EventBatch::default(),
                in_cooldown: false,
                closed: false,
                task: None,
                stats: DeliveryStats::default(),
            }),
            store: self.store,
            codec: self.codec,
            transport: self.transport,
            cooldown: self.cooldown,
            runtime,
            idle_tx,
        });

        shared.recover()?;

        Ok(EventBuffer { shared })
    }
}

impl EventBuffer {
    /// Start building a buffer around a backup store and a transport
    pub fn builder(
        store: Arc<dyn BackupStore>,
        transport: Arc<dyn Transport>,
    ) -> EventBufferBuilder {
        EventBufferBuilder {
            store,
            transport,
            codec: Arc::new(JsonCodec),
            cooldown: DEFAULT_COOLDOWN,
            runtime: None,
        }
    }

    /// Build a buffer with the default capabilities: the backup file under
    /// the data directory, JSON encoding, and HTTP POST to `server_url`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &BufferConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        let store = FileStore::new(config.backup_path());

        Self::builder(Arc::new(store), Arc::new(transport))
            .cooldown(config.cooldown())
            .initialize()
    }

    /// Record an event
    ///
    /// Appends to the pending batch, writes the batch to the backup, and
    /// schedules delivery if none is scheduled. Never waits on the network
    /// and never fails: a backup write error is logged and the event is
    /// still delivered from memory.
    pub fn track(&self, event_type: impl Into<String>, data: impl Into<String>) {
        let event = Event::new(event_type, data);
        tracing::trace!(event_type = %event.event_type, "Tracking event");

        let mut state = self.shared.lock();
        state.pending.events.push(event);
        self.shared.persist(&mut state);

        if !state.in_cooldown && !state.closed {
            self.shared.start_loop(&mut state);
        }
    }

    /// Stop the delivery loop
    ///
    /// Pending events stay in the backup for the next process to recover.
    /// Events tracked afterwards are still persisted but not delivered.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.closed = true;

        if let Some(task) = state.task.take() {
            task.abort();
        }
        if state.in_cooldown {
            state.in_cooldown = false;
            self.shared.idle_tx.send_replace(true);
        }

        tracing::info!(
            pending = state.pending.len(),
            "Event buffer shut down, pending events remain in backup"
        );
    }

    /// Wait until no delivery loop is active
    ///
    /// With an unreachable collector this never resolves; wrap it in
    /// `tokio::time::timeout` when a deadline matters.
    pub async fn wait_idle(&self) {
        let mut idle_rx = self.shared.idle_tx.subscribe();
        // The sender lives as long as `self`, so this only ends on idle
        let _ = idle_rx.wait_for(|idle| *idle).await;
    }

    /// Snapshot of the pending events, oldest first
    pub fn pending(&self) -> Vec<Event> {
        self.shared.lock().pending.events.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Whether a delivery attempt is scheduled or in flight
    pub fn is_cooling_down(&self) -> bool {
        self.shared.lock().in_cooldown
    }

    pub fn stats(&self) -> DeliveryStats {
        self.shared.lock().stats.clone()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // Critical sections never leave the state half-updated, so a poisoned
        // lock still guards consistent data
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn recover(self: &Arc<Self>) -> Result<()> {
        if !self.store.exists() {
            tracing::debug!("No event backup found");
            return Ok(());
        }

        let bytes = self.store.read_all()?;
        let batch = match self.codec.decode(&bytes) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Event backup is unreadable, starting empty");
                if let Err(e) = self.store.quarantine() {
                    tracing::error!(error = %e, "Failed to quarantine event backup");
                }
                return Ok(());
            }
        };

        tracing::info!(events = batch.len(), "Recovered pending events from backup");

        let mut state = self.lock();
        state.pending = batch;
        self.start_loop(&mut state);
        Ok(())
    }

    /// Write the pending batch through to the backup
    ///
    /// Runs under the state lock on the caller's thread, which may be a tokio
    /// worker, so backup writes land in the order events were tracked.
    /// Stores should stay small and local; a slow store stalls `track`.
    fn persist(&self, state: &mut BufferState) {
        let result = self
            .codec
            .encode(&state.pending)
            .and_then(|bytes| self.store.write_all(&bytes));

        if let Err(e) = result {
            state.stats.backup_failures += 1;
            tracing::error!(
                error = %e,
                pending = state.pending.len(),
                "Failed to write event backup"
            );
        }
    }

    fn start_loop(self: &Arc<Self>, state: &mut BufferState) {
        state.in_cooldown = true;
        self.idle_tx.send_replace(false);

        let shared = Arc::clone(self);
        state.task = Some(self.runtime.spawn(shared.run_delivery_loop()));
    }

    async fn run_delivery_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.cooldown).await;

            // Send what is pending now, including events tracked during the cooldown
            let batch = {
                let state = self.lock();
                if state.closed {
                    return;
                }
                state.pending.clone()
            };
            let sent = batch.len();

            let delivered = sent == 0 || self.attempt_delivery(&batch).await;

            let mut state = self.lock();
            if sent > 0 {
                state.stats.attempts += 1;
            }

            if !delivered {
                state.stats.failures += 1;
                tracing::debug!(
                    pending = state.pending.len(),
                    retry_in = ?self.cooldown,
                    "Delivery failed, retrying after cooldown"
                );
                continue;
            }

            // Events tracked while the request was in flight follow the sent prefix
            let sent = sent.min(state.pending.len());
            state.pending.events.drain(..sent);
            if sent > 0 {
                state.stats.batches_delivered += 1;
                state.stats.events_delivered += sent;
                tracing::debug!(events = sent, "Delivered events to collector");
            }

            if state.pending.is_empty() {
                // Still under the lock so a concurrent track cannot write in between
                if let Err(e) = self.store.delete() {
                    state.stats.backup_failures += 1;
                    tracing::error!(error = %e, "Failed to delete event backup");
                }
                state.in_cooldown = false;
                state.task = None;
                self.idle_tx.send_replace(true);
                return;
            }

            self.persist(&mut state);
            tracing::debug!(
                pending = state.pending.len(),
                "Events arrived during delivery, scheduling another attempt"
            );
        }
    }

    /// One POST of `batch`; true only if the body is exactly the success marker
    async fn attempt_delivery(&self, batch: &EventBatch) -> bool {
        let body = match self.codec.encode(batch) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode event batch");
                return false;
            }
        };

        match self.transport.post(body).await {
            Ok(response) if response == SUCCESS_MARKER => true,
            Ok(response) => {
                tracing::warn!(
                    events = batch.len(),
                    response = %response,
                    "Collector did not acknowledge events"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    events = batch.len(),
                    error = %e,
                    "Failed to send events to collector"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Notify;
    use tokio::time::{sleep, Instant};

    /// Transport that replays scripted responses and records every request
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<(Instant, EventBatch)>>,
        bodies: Mutex<Vec<Vec<u8>>>,
        /// Decodes request bodies; must match the buffer's codec
        codec: Arc<dyn BatchCodec>,
        /// When set, each request waits for a permit before answering
        gate: Option<Notify>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self::scripted(responses, Arc::new(JsonCodec), None))
        }

        fn gated(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self::scripted(responses, Arc::new(JsonCodec), Some(Notify::new())))
        }

        fn with_codec(codec: Arc<dyn BatchCodec>) -> Arc<Self> {
            Arc::new(Self::scripted(vec![], codec, None))
        }

        fn scripted(
            responses: Vec<Result<String>>,
            codec: Arc<dyn BatchCodec>,
            gate: Option<Notify>,
        ) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                bodies: Mutex::new(Vec::new()),
                codec,
                gate,
            }
        }

        /// Raw request bodies as they went over the wire
        fn bodies(&self) -> Vec<Vec<u8>> {
            self.bodies.lock().unwrap().clone()
        }

        fn requests(&self) -> Vec<EventBatch> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, batch)| batch.clone())
                .collect()
        }

        fn request_times(&self) -> Vec<Instant> {
            self.requests.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post(&self, body: Vec<u8>) -> Result<String> {
            let batch = self.codec.decode(&body).expect("request body is a batch");
            self.requests.lock().unwrap().push((Instant::now(), batch));
            self.bodies.lock().unwrap().push(body);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SUCCESS_MARKER.to_string()))
        }
    }

    const CODEC_TAG: &[u8] = b"beacon-v1:";

    /// JSON behind a fixed prefix, so its output is distinguishable from [`JsonCodec`]
    struct TaggedCodec;

    impl BatchCodec for TaggedCodec {
        fn encode(&self, batch: &EventBatch) -> Result<Vec<u8>> {
            let mut bytes = CODEC_TAG.to_vec();
            bytes.extend(JsonCodec.encode(batch)?);
            Ok(bytes)
        }

        fn decode(&self, bytes: &[u8]) -> Result<EventBatch> {
            let json = bytes
                .strip_prefix(CODEC_TAG)
                .ok_or_else(|| Error::Backup("missing codec tag".to_string()))?;
            JsonCodec.decode(json)
        }
    }

    /// Store whose writes always fail
    struct ReadOnlyStore;

    impl BackupStore for ReadOnlyStore {
        fn write_all(&self, _bytes: &[u8]) -> Result<()> {
            Err(Error::Backup("read-only".to_string()))
        }

        fn read_all(&self) -> Result<Vec<u8>> {
            Err(Error::Backup("empty".to_string()))
        }

        fn exists(&self) -> bool {
            false
        }

        fn delete(&self) -> Result<()> {
            Ok(())
        }
    }

    fn build(store: Arc<MemoryStore>, transport: Arc<ScriptedTransport>) -> EventBuffer {
        EventBuffer::builder(store, transport)
            .initialize()
            .expect("buffer should initialize")
    }

    fn stored_batch(store: &MemoryStore) -> Option<EventBatch> {
        store
            .contents()
            .map(|bytes| JsonCodec.decode(&bytes).expect("backup is a batch"))
    }

    fn clicks(names: &[&str]) -> EventBatch {
        names
            .iter()
            .map(|n| Event::new("click", *n))
            .collect::<Vec<_>>()
            .into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_persists_full_batch_in_order() {
        let store = Arc::new(MemoryStore::new());
        let buffer = build(store.clone(), ScriptedTransport::new(vec![]));

        buffer.track("click", "A");
        buffer.track("click", "B");
        buffer.track("click", "C");

        assert_eq!(stored_batch(&store), Some(clicks(&["A", "B", "C"])));
        assert_eq!(buffer.pending(), clicks(&["A", "B", "C"]).events);
        assert!(buffer.is_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_within_cooldown_coalesce_into_one_request() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![Ok("200 OK".to_string())]);
        let buffer = build(store.clone(), transport.clone());

        buffer.track("click", "btn1");
        sleep(Duration::from_secs(1)).await;
        buffer.track("click", "btn2");

        buffer.wait_idle().await;

        assert_eq!(transport.requests(), vec![clicks(&["btn1", "btn2"])]);
        assert_eq!(buffer.pending_count(), 0);
        assert!(!store.exists());
        assert!(!buffer.is_cooling_down());

        let stats = buffer.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.events_delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_measured_from_loop_entry() {
        let transport = ScriptedTransport::new(vec![]);
        let buffer = build(Arc::new(MemoryStore::new()), transport.clone());
        let start = Instant::now();

        buffer.track("click", "first");
        sleep(Duration::from_millis(2500)).await;
        buffer.track("click", "second");
        buffer.wait_idle().await;

        let times = transport.request_times();
        assert_eq!(times.len(), 1);
        let elapsed = times[0] - start;
        assert!(elapsed >= DEFAULT_COOLDOWN);
        assert!(elapsed < Duration::from_millis(3100), "timer was reset: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_body_keeps_events_and_retries_after_full_cooldown() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![
            Ok("500 Error".to_string()),
            Ok("200 OK".to_string()),
        ]);
        let buffer = build(store.clone(), transport.clone());
        let start = Instant::now();

        buffer.track("click", "btn1");
        buffer.track("click", "btn2");

        // First attempt at 3s fails
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(buffer.pending(), clicks(&["btn1", "btn2"]).events);
        assert_eq!(stored_batch(&store), Some(clicks(&["btn1", "btn2"])));
        assert!(buffer.is_cooling_down());

        buffer.track("click", "btn3");
        buffer.wait_idle().await;

        assert_eq!(
            transport.requests(),
            vec![clicks(&["btn1", "btn2"]), clicks(&["btn1", "btn2", "btn3"])]
        );
        let times = transport.request_times();
        assert!(times[1] - start >= Duration::from_secs(6));
        assert!(!store.exists());

        let stats = buffer.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.events_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![
            Err(Error::Transport("connection refused".to_string())),
            Err(Error::Transport("timed out".to_string())),
        ]);
        let buffer = build(store.clone(), transport.clone());

        buffer.track("click", "btn1");
        buffer.wait_idle().await;

        assert_eq!(transport.requests().len(), 3);
        assert_eq!(buffer.stats().failures, 2);
        assert!(!store.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_marker_must_match_exactly() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![
            Ok("200 OK\n".to_string()),
            Ok("ok".to_string()),
            Ok(String::new()),
        ]);
        let buffer = build(store.clone(), transport.clone());

        buffer.track("click", "btn1");
        buffer.wait_idle().await;

        assert_eq!(transport.requests().len(), 4);
        assert_eq!(buffer.stats().failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_backup_and_delivers_without_track() {
        let backup = JsonCodec.encode(&clicks(&["old1", "old2"])).unwrap();
        let store = Arc::new(MemoryStore::with_contents(backup));
        let transport = ScriptedTransport::new(vec![]);

        let buffer = build(store.clone(), transport.clone());
        assert_eq!(buffer.pending(), clicks(&["old1", "old2"]).events);
        assert!(buffer.is_cooling_down());

        buffer.wait_idle().await;

        assert_eq!(transport.requests(), vec![clicks(&["old1", "old2"])]);
        assert!(!store.exists());

        // A fresh instance finds nothing to recover
        let again = build(store.clone(), transport.clone());
        assert_eq!(again.pending_count(), 0);
        assert!(!again.is_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_backup_means_idle_start() {
        let transport = ScriptedTransport::new(vec![]);
        let buffer = build(Arc::new(MemoryStore::new()), transport.clone());

        assert!(!buffer.is_cooling_down());
        buffer.wait_idle().await;
        sleep(Duration::from_secs(10)).await;
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_backup_is_quarantined() {
        let store = Arc::new(MemoryStore::with_contents("{\"events\": [oops"));
        let buffer = build(store.clone(), ScriptedTransport::new(vec![]));

        assert_eq!(buffer.pending_count(), 0);
        assert!(!buffer.is_cooling_down());
        assert!(!store.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_tracked_during_request_are_not_dropped() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::gated(vec![]);
        let buffer = build(store.clone(), transport.clone());

        buffer.track("click", "A");
        // Request for [A] is now in flight and held by the gate
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.requests(), vec![clicks(&["A"])]);

        buffer.track("click", "B");
        transport.gate.as_ref().unwrap().notify_one();
        sleep(Duration::from_millis(100)).await;

        // A was acknowledged, B stays pending and persisted
        assert_eq!(buffer.pending(), clicks(&["B"]).events);
        assert_eq!(stored_batch(&store), Some(clicks(&["B"])));
        assert!(buffer.is_cooling_down());

        sleep(Duration::from_secs(3)).await;
        transport.gate.as_ref().unwrap().notify_one();
        buffer.wait_idle().await;

        assert_eq!(transport.requests(), vec![clicks(&["A"]), clicks(&["B"])]);
        assert!(!store.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_after_flush_starts_new_loop() {
        let transport = ScriptedTransport::new(vec![]);
        let buffer = build(Arc::new(MemoryStore::new()), transport.clone());

        buffer.track("click", "A");
        buffer.wait_idle().await;
        buffer.track("click", "B");
        assert!(buffer.is_cooling_down());
        buffer.wait_idle().await;

        assert_eq!(transport.requests(), vec![clicks(&["A"]), clicks(&["B"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_write_failure_does_not_lose_event() {
        let transport = ScriptedTransport::new(vec![]);
        let buffer = EventBuffer::builder(Arc::new(ReadOnlyStore), transport.clone())
            .initialize()
            .unwrap();

        buffer.track("click", "A");
        buffer.wait_idle().await;

        assert_eq!(transport.requests(), vec![clicks(&["A"])]);
        assert_eq!(buffer.stats().backup_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_delivery_and_keeps_backup() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![]);
        let buffer = build(store.clone(), transport.clone());

        buffer.track("click", "A");
        buffer.shutdown();
        assert!(!buffer.is_cooling_down());

        buffer.track("click", "B");
        assert!(!buffer.is_cooling_down());
        sleep(Duration::from_secs(10)).await;

        assert!(transport.requests().is_empty());
        assert_eq!(stored_batch(&store), Some(clicks(&["A", "B"])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_cooldown() {
        let transport = ScriptedTransport::new(vec![]);
        let buffer = EventBuffer::builder(Arc::new(MemoryStore::new()), transport.clone())
            .cooldown(Duration::from_millis(250))
            .initialize()
            .unwrap();
        let start = Instant::now();

        buffer.track("click", "A");
        buffer.wait_idle().await;

        let elapsed = transport.request_times()[0] - start;
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_initialize_outside_runtime_fails() {
        let result = EventBuffer::builder(
            Arc::new(MemoryStore::new()),
            ScriptedTransport::new(vec![]),
        )
        .initialize();
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[test]
    fn test_explicit_runtime_drives_delivery_from_plain_thread() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![]);

        // No runtime context here; the handle alone spawns the loop
        let buffer = EventBuffer::builder(store.clone(), transport.clone())
            .runtime(rt.handle().clone())
            .initialize()
            .expect("explicit runtime should be enough");

        buffer.track("click", "btn1");
        assert!(buffer.is_cooling_down());
        assert!(transport.requests().is_empty());

        rt.block_on(buffer.wait_idle());

        assert_eq!(transport.requests(), vec![clicks(&["btn1"])]);
        assert!(!store.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_codec_used_for_backup_request_and_recovery() {
        let codec: Arc<dyn BatchCodec> = Arc::new(TaggedCodec);
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::with_codec(codec.clone());
        let buffer = EventBuffer::builder(store.clone(), transport.clone())
            .codec(codec.clone())
            .initialize()
            .unwrap();

        buffer.track("click", "btn1");

        let backup = store.contents().expect("backup written");
        assert_eq!(backup, TaggedCodec.encode(&clicks(&["btn1"])).unwrap());
        assert!(JsonCodec.decode(&backup).is_err());

        buffer.wait_idle().await;
        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].starts_with(CODEC_TAG));
        assert_eq!(transport.requests(), vec![clicks(&["btn1"])]);

        // A backup left by an earlier process using the same codec
        let bytes = TaggedCodec.encode(&clicks(&["A", "B"])).unwrap();
        let store = Arc::new(MemoryStore::with_contents(bytes));
        let transport = ScriptedTransport::with_codec(codec.clone());
        let recovered = EventBuffer::builder(store.clone(), transport.clone())
            .codec(codec)
            .initialize()
            .unwrap();

        assert_eq!(recovered.pending(), clicks(&["A", "B"]).events);
        recovered.wait_idle().await;
        assert_eq!(transport.requests(), vec![clicks(&["A", "B"])]);
        assert!(!store.exists());
    }
}
