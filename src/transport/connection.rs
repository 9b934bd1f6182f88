//! Per-connection read and write loops.
//!
//! [`serve`] registers a socket with its hub, then runs the write loop as
//! its own task and the read loop on the calling task. Either side
//! failing requests shutdown through the shared [`Connection`] state, so
//! the other side exits at its next suspension point. Every blocking
//! operation carries a deadline.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::handle::ConnectionHandle;
use super::state::{CloseReason, Connection, closing};
use crate::config::ConnectionConfig;
use crate::domain::{ParticipantId, SessionId};
use crate::envelope;
use crate::hub::{Hub, HubError};

/// Runs one participant socket for its whole membership in `hub`.
///
/// Returns once both loops have exited and the socket is closed. The
/// connection is always unregistered from the hub before returning.
pub async fn serve<S, E>(
    socket: S,
    session_id: SessionId,
    participant: ParticipantId,
    hub: Hub,
    config: ConnectionConfig,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
    E: fmt::Display + Send,
    <S as Sink<Message>>::Error: fmt::Display + Send,
{
    let (handle, outbound) = ConnectionHandle::channel(participant, config.outbound_queue_capacity);
    let connection = handle.connection().clone();
    let connection_id = connection.id();
    let (sink, stream) = socket.split();

    if let Err(err) = hub.register(handle).await {
        let reason = match err {
            HubError::CapacityExceeded { .. } => CloseReason::SessionFull,
            HubError::Closed => CloseReason::SessionClosed,
        };
        tracing::info!(%session_id, %connection_id, %reason, "registration rejected");
        connection.begin_close(reason);
        write_loop(sink, outbound, &connection, &config).await;
        connection.finish_close(reason);
        return;
    }

    connection.activate();
    tracing::info!(%session_id, %connection_id, %participant, "connection registered");

    let writer = {
        let connection = connection.clone();
        let config = config.clone();
        tokio::spawn(async move { write_loop(sink, outbound, &connection, &config).await })
    };

    let read_reason = read_loop(stream, &connection, &hub, &config).await;
    connection.begin_close(read_reason);
    hub.unregister(connection_id).await;

    if let Err(err) = writer.await {
        tracing::error!(%session_id, %connection_id, error = %err, "write loop panicked");
    }

    let reason = connection.finish_close(read_reason);
    tracing::info!(%session_id, %connection_id, %reason, "connection closed");
}

/// Reads frames until the peer leaves, misbehaves or stops answering
/// pings, handing each decoded envelope to `hub`.
///
/// The read deadline starts at `pong_wait` and is extended by every pong.
/// Control frames are consumed here and never reach the hub.
pub async fn read_loop<S, E>(
    mut stream: S,
    connection: &Connection,
    hub: &Hub,
    config: &ConnectionConfig,
) -> CloseReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let connection_id = connection.id();
    let mut state = connection.subscribe();
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let next = tokio::select! {
            biased;
            reason = closing(&mut state) => return reason,
            next = time::timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::warn!(%connection_id, "no pong within deadline");
                return CloseReason::KeepaliveTimeout;
            }
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(err))) => {
                tracing::debug!(%connection_id, error = %err, "read failed");
                return CloseReason::Transport;
            }
            Ok(Some(Ok(message))) => message,
        };

        let data = match frame {
            Message::Binary(data) => data,
            Message::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Message::Ping(_) => {
                tracing::trace!(%connection_id, "ping");
                continue;
            }
            Message::Pong(_) => {
                tracing::trace!(%connection_id, "pong");
                deadline = Instant::now() + config.pong_wait;
                continue;
            }
            Message::Close(_) => return CloseReason::PeerClosed,
        };

        let envelope = match envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%connection_id, error = %err, "malformed envelope");
                return CloseReason::ProtocolViolation(err);
            }
        };

        if hub.broadcast(connection_id, envelope).await.is_err() {
            return CloseReason::SessionClosed;
        }
    }
}

/// Drains the outbound queue onto the wire and keeps the peer alive with
/// pings until shutdown is requested.
///
/// Always finishes by sending a close frame and closing the sink, each
/// bounded by `write_wait`. Returns the reason the loop ended.
pub async fn write_loop<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Bytes>,
    connection: &Connection,
    config: &ConnectionConfig,
) -> CloseReason
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let connection_id = connection.id();
    let mut state = connection.subscribe();
    let ping_period = config.ping_period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let message = tokio::select! {
            biased;
            reason = closing(&mut state) => break reason,
            _ = ticker.tick() => Message::Ping(Bytes::new()),
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Binary(frame),
                None => {
                    connection.begin_close(CloseReason::SessionClosed);
                    continue;
                }
            },
        };

        if let Err(reason) = send_with_deadline(&mut sink, message, config.write_wait).await {
            tracing::debug!(%connection_id, %reason, "write failed");
            connection.begin_close(reason);
            close_sink(&mut sink, connection, config.write_wait).await;
            return reason;
        }
    };

    let close = Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: Utf8Bytes::from_static(reason.description()),
    }));
    if let Err(err) = send_with_deadline(&mut sink, close, config.write_wait).await {
        tracing::debug!(%connection_id, reason = %err, "close frame not delivered");
    }
    close_sink(&mut sink, connection, config.write_wait).await;
    reason
}

async fn close_sink<W>(sink: &mut W, connection: &Connection, write_wait: Duration)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let connection_id = connection.id();
    match time::timeout(write_wait, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(%connection_id, error = %err, "socket close failed"),
        Err(_) => tracing::debug!(%connection_id, "socket close timed out"),
    }
}

async fn send_with_deadline<W>(
    sink: &mut W,
    message: Message,
    write_wait: Duration,
) -> Result<(), CloseReason>
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    match time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::trace!(error = %err, "sink error");
            Err(CloseReason::Transport)
        }
        Err(_) => Err(CloseReason::Transport),
    }
}
