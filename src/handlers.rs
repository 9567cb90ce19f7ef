//! # WebSocket Handlers
//!
//! Contains the core Wisp logic of the server:
//! - Upgrading HTTP connections to WebSocket
//! - Managing the lifecycle of each session (outbound writer task,
//!   initial handshake, teardown)
//! - Dispatching decoded packets to the per-type handlers
//! - Opening upstream streams and wiring up their relay tasks

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{CloseReason, ConnectRequest, Packet, PacketType, StreamKind};
use crate::relay::{run_pump, run_stream_writer};
use crate::state::{AppState, Session, SessionInfo, Stream};
use crate::transport;

// ─── WebSocket Upgrade Endpoint ─────────────────────────────────

/// `GET /` — Upgrades the HTTP connection to a WebSocket connection.
///
/// This is the entry point for all Wisp clients. After the upgrade, the
/// connection is handled by [`handle_session`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

// ─── Session Lifecycle ──────────────────────────────────────────

/// Manages the full lifecycle of a single Wisp session.
///
/// ## Flow:
/// 1. Split the socket into a sink (outbound) and stream (inbound)
/// 2. Spawn an outbound task that encodes and sends queued frames
/// 3. Send the initial CONTINUE on stream id 0 advertising the credit
/// 4. Dispatch incoming binary messages on the current task
/// 5. On disconnect: tear down every live stream, deregister the session
async fn handle_session(socket: WebSocket, state: AppState) {
    // Split the WebSocket into separate read/write halves
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Create an unbounded channel for queueing outbound frames. The
    // dispatcher and every per-stream task send frames to the client
    // through its sender.
    let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
    let session = Arc::new(Session::new(tx, state.buffer_size));
    info!("New session: {}", session.id);

    // Register this session in the global registry for the API
    state.sessions.insert(
        session.id.clone(),
        SessionInfo {
            streams: session.streams.clone(),
        },
    );

    // ── Outbound Writer Task ──
    // Sole owner of the WebSocket sink: drains the frame queue and sends
    // each packet as one binary message, so queue order is wire order.
    let outbound_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if ws_sink
                .send(Message::Binary(packet.encode().into()))
                .await
                .is_err()
            {
                break; // WebSocket closed; stop sending
            }
        }
    });

    // The initial CONTINUE on stream id 0 is the first frame of every
    // session.
    let _ = session.tx.send(Packet::credit(0, session.credit));

    // ── Inbound Loop ──
    // Processes incoming WebSocket frames. Wisp packets arrive as binary
    // messages; text frames and pings are not part of the protocol.
    let mut malformed: u64 = 0;
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Binary(data) => handle_packet(&session, data, &mut malformed).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Teardown on Disconnect ──
    info!("Session closed: {}", session.id);
    if malformed > 0 {
        debug!("session {}: dropped {} malformed frames", session.id, malformed);
    }

    // Stop the outbound writer first; late CLOSE frames from exiting
    // pumps have nowhere to go once the socket is gone.
    outbound_task.abort();

    // Abort every pump and drop every queue sender; the stream writer
    // tasks exit as their queues close, releasing all upstream sockets.
    session.teardown_streams();

    state.sessions.remove(&session.id);
}

// ─── Packet Dispatcher ──────────────────────────────────────────

/// Handles a single inbound WebSocket binary message.
///
/// Malformed frames (short packets, unknown types) are dropped and
/// counted. Valid packets are routed by type:
/// - **CONNECT**: opens an upstream transport and registers the stream
/// - **DATA**: forwarded to the stream's writer task via its queue
/// - **CLOSE**: tears the stream down locally, without echoing a CLOSE
/// - **CONTINUE**: server-to-client only; dropped
async fn handle_packet(session: &Arc<Session>, data: Bytes, malformed: &mut u64) {
    let packet = match Packet::decode(data) {
        Ok(packet) => packet,
        Err(err) => {
            *malformed += 1;
            debug!("session {}: dropping malformed frame: {}", session.id, err);
            return;
        }
    };

    match packet.packet_type {
        PacketType::Connect => handle_connect(session, packet).await,
        PacketType::Data => handle_data(session, packet),
        PacketType::Close => handle_close(session, packet),
        PacketType::Continue => {
            debug!(
                "session {}: dropping client CONTINUE for stream {}",
                session.id, packet.stream_id
            );
        }
    }
}

/// CONNECT: open an upstream transport and register the new stream.
async fn handle_connect(session: &Arc<Session>, packet: Packet) {
    let stream_id = packet.stream_id;

    // Stream id 0 is reserved for session-scoped control frames.
    if stream_id == 0 {
        warn!("session {}: dropping CONNECT for reserved stream id 0", session.id);
        return;
    }
    // A CLOSE reply here would reference the live stream, so a duplicate
    // CONNECT is dropped instead.
    if session.streams.contains_key(&stream_id) {
        warn!(
            "session {}: dropping CONNECT for already-open stream {}",
            session.id, stream_id
        );
        return;
    }

    let request = match ConnectRequest::parse(&packet.payload) {
        Ok(request) => request,
        Err(err) => {
            debug!(
                "session {}: invalid CONNECT payload for stream {}: {}",
                session.id, stream_id, err
            );
            let _ = session
                .tx
                .send(Packet::close(stream_id, CloseReason::Invalid));
            return;
        }
    };

    debug!(
        "session {}: CONNECT {} stream {} to {}:{}",
        session.id, request.kind, stream_id, request.host, request.port
    );

    let connected = match request.kind {
        StreamKind::Tcp => transport::connect_tcp(&request.host, request.port).await,
        StreamKind::Udp => transport::open_udp(&request.host, request.port).await,
    };
    let (reader, writer) = match connected {
        Ok(pair) => pair,
        Err(err) => {
            debug!(
                "session {}: stream {} connect failed: {}",
                session.id, stream_id, err
            );
            let _ = session.tx.send(Packet::close(stream_id, err.close_reason()));
            return;
        }
    };

    // TCP streams are granted their credit before any DATA can flow; UDP
    // flows are uncredited.
    if request.kind == StreamKind::Tcp {
        let _ = session.tx.send(Packet::credit(stream_id, session.credit));
    }

    // Register the stream BEFORE spawning the pump, so the pump always
    // observes its own table entry.
    let (data_tx, data_rx) = mpsc::channel(session.credit as usize);
    session.streams.insert(
        stream_id,
        Stream {
            kind: request.kind,
            data_tx,
            pump: None,
        },
    );

    tokio::spawn(run_stream_writer(
        session.clone(),
        stream_id,
        writer,
        data_rx,
    ));
    let pump = tokio::spawn(run_pump(session.clone(), stream_id, reader));

    match session.streams.get_mut(&stream_id) {
        Some(mut entry) => entry.pump = Some(pump),
        // The pump already tore the stream down (instant upstream EOF).
        None => pump.abort(),
    }
}

/// DATA: forward the payload to the stream's writer task.
fn handle_data(session: &Arc<Session>, packet: Packet) {
    let stream_id = packet.stream_id;

    // The verdict is computed first and acted on after the table guard
    // drops; removing the entry while holding it would deadlock.
    let overflow = match session.streams.get(&stream_id) {
        // The peer may have closed this stream concurrently.
        None => {
            debug!(
                "session {}: dropping DATA for unknown stream {}",
                session.id, stream_id
            );
            return;
        }
        Some(entry) => match entry.data_tx.try_send(packet.payload) {
            Ok(()) => false,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            // The writer task is already exiting; its own teardown path
            // emits the CLOSE.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        },
    };

    if overflow {
        warn!(
            "session {}: stream {} inbound queue overflow",
            session.id, stream_id
        );
        if session.abort_stream(stream_id) {
            let _ = session
                .tx
                .send(Packet::close(stream_id, CloseReason::NetworkError));
        }
    }
}

/// CLOSE: tear the stream down locally. The peer initiated the close, so
/// no CLOSE frame is echoed back.
fn handle_close(session: &Arc<Session>, packet: Packet) {
    let stream_id = packet.stream_id;
    let reason = packet.payload.first().copied().unwrap_or_default();
    if session.abort_stream(stream_id) {
        debug!(
            "session {}: client closed stream {} (reason 0x{:02x})",
            session.id, stream_id, reason
        );
    } else {
        debug!(
            "session {}: dropping CLOSE for unknown stream {}",
            session.id, stream_id
        );
    }
}
