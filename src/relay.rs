//! # Per-Stream Relay Tasks
//!
//! Every live stream runs two tasks:
//! 1. **Pump (upstream → WebSocket)**: reads from the upstream socket and
//!    queues DATA frames for the client; on EOF or error it removes the
//!    stream and queues the stream's final CLOSE.
//! 2. **Stream writer (WebSocket → upstream)**: drains the stream's
//!    bounded inbound queue and writes each chunk upstream.
//!
//! ## Data Flow
//!
//! ```text
//! upstream ──read──→ [pump] ──DATA──→ outbound queue ──→ WebSocket
//! WebSocket ──DATA──→ dispatcher ──queue──→ [stream writer] ──write──→ upstream
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{CloseReason, Packet};
use crate::state::Session;
use crate::transport::{UpstreamReader, UpstreamWriter, READ_CHUNK};

/// Reads from the upstream socket and queues DATA frames until EOF, an
/// I/O error, or the stream leaves the table.
///
/// Upstream EOF closes the stream with NORMAL; an upstream read error
/// closes it with NETWORK_ERROR. Either way the CLOSE queued here is the
/// last frame the stream ever produces.
pub async fn run_pump(session: Arc<Session>, stream_id: u32, mut reader: UpstreamReader) {
    let mut buf = vec![0u8; READ_CHUNK];
    let reason = loop {
        match reader.read(&mut buf).await {
            Ok(Some(n)) => {
                let payload = Bytes::copy_from_slice(&buf[..n]);
                // Queued while holding the table entry: a CLOSE is only
                // queued after removal, so it always lands behind any
                // in-flight DATA.
                match session.streams.get(&stream_id) {
                    Some(_entry) => {
                        if session.tx.send(Packet::data(stream_id, payload)).is_err() {
                            return; // session is draining
                        }
                    }
                    // Stream closed while we were reading; nothing more
                    // to emit for this id.
                    None => return,
                }
            }
            Ok(None) => break CloseReason::Normal,
            Err(err) => {
                debug!("stream {} upstream read error: {}", stream_id, err);
                break CloseReason::NetworkError;
            }
        }
    };
    if session.release_stream(stream_id) {
        let _ = session.tx.send(Packet::close(stream_id, reason));
    }
}

/// Drains the stream's inbound queue into the upstream socket.
///
/// Exits when the queue closes (the stream was removed elsewhere and its
/// sender dropped) or when a write fails; dropping the writer half then
/// closes the upstream write side.
pub async fn run_stream_writer(
    session: Arc<Session>,
    stream_id: u32,
    mut writer: UpstreamWriter,
    mut data_rx: mpsc::Receiver<Bytes>,
) {
    while let Some(chunk) = data_rx.recv().await {
        if let Err(err) = writer.write(&chunk).await {
            debug!("stream {} upstream write error: {}", stream_id, err);
            if session.abort_stream(stream_id) {
                let _ = session
                    .tx
                    .send(Packet::close(stream_id, CloseReason::NetworkError));
            }
            return;
        }
    }
}
