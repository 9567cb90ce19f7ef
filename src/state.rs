//! # Server & Session State
//!
//! Holds the state of the Wisp server, split across two levels:
//! - **Session registry**: maps session ids to live session info, shared
//!   with the HTTP API.
//! - **Stream table**: per-session map from a 32-bit stream id to its
//!   stream record.
//!
//! Registries use [`DashMap`] for concurrent access: sessions run
//! concurrently, and each session's stream table is shared between its
//! dispatcher and its per-stream tasks.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{Packet, StreamKind};

/// Sender feeding a session's outbound writer task. Every frame the
/// server emits on the WebSocket goes through one of these, so queue
/// order is wire order.
pub type FrameTx = mpsc::UnboundedSender<Packet>;

/// Generates a short, human-readable session id from a UUID.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Record for one live stream within a session.
pub struct Stream {
    /// Whether this stream targets a TCP connection or a UDP flow.
    pub kind: StreamKind,

    /// Bounded queue feeding the stream's writer task. Its capacity is
    /// the credit advertised to the client at CONNECT time.
    pub data_tx: mpsc::Sender<Bytes>,

    /// Handle of the pump task, used to cancel its in-flight upstream
    /// read on forced teardown. `None` only in the window between table
    /// insert and spawn.
    pub pump: Option<JoinHandle<()>>,
}

/// State shared by one session's dispatcher and its per-stream tasks.
pub struct Session {
    /// Short id used in logs and the API.
    pub id: String,

    /// Outbound frame queue.
    pub tx: FrameTx,

    /// Table of live streams, keyed by client-allocated stream id.
    pub streams: Arc<DashMap<u32, Stream>>,

    /// Buffer slots advertised via CONTINUE; also each stream's inbound
    /// queue capacity.
    pub credit: u32,
}

impl Session {
    pub fn new(tx: FrameTx, credit: u32) -> Self {
        Self {
            id: generate_session_id(),
            tx,
            streams: Arc::new(DashMap::new()),
            credit,
        }
    }

    /// Removes a stream and aborts its pump. Dropping the record's queue
    /// sender ends the stream's writer task, which closes the upstream
    /// write side. Returns `true` only for the caller that actually
    /// removed the record, so CLOSE emission stays single-shot.
    pub fn abort_stream(&self, stream_id: u32) -> bool {
        match self.streams.remove(&stream_id) {
            Some((_, stream)) => {
                if let Some(pump) = stream.pump {
                    pump.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Removes a stream without touching its pump. Used by the pump's own
    /// exit paths, which still need to queue the final CLOSE after the
    /// removal.
    pub fn release_stream(&self, stream_id: u32) -> bool {
        self.streams.remove(&stream_id).is_some()
    }

    /// Drains the whole table on session teardown, aborting every pump.
    pub fn teardown_streams(&self) {
        let ids: Vec<u32> = self.streams.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.abort_stream(id);
        }
    }
}

/// Per-session information exposed to the HTTP API.
pub struct SessionInfo {
    /// The session's stream table, shared for counting live streams.
    pub streams: Arc<DashMap<u32, Stream>>,
}

/// Shared application state, cloned and passed to each request handler.
#[derive(Clone)]
pub struct AppState {
    /// Buffer slots advertised to clients at session start and per TCP
    /// stream.
    pub buffer_size: u32,

    /// Registry of live sessions, keyed by short session id.
    pub sessions: Arc<DashMap<String, SessionInfo>>,
}

impl AppState {
    pub fn new(buffer_size: u32) -> Self {
        Self {
            buffer_size,
            sessions: Arc::new(DashMap::new()),
        }
    }
}
