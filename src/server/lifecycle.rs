//! Stream lifecycle
//!
//! `Connecting -> Streaming -> Closed`. A connection is `Connecting` between
//! gate approval and upgrade, `Streaming` once its push task is armed, and
//! `Closed` forever after the first close event. Only the first close runs
//! teardown.

use crate::auth::Claims;
use crate::channels::Channel;
use crate::server::connections::{CancelSignal, ConnectionId, ConnectionInfo, ConnectionRegistry};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the client
    ClientClosed,
    /// Read error on the transport
    TransportError,
    /// A push could not be written in time
    WriteFailure,
    /// The registry disarmed the connection from outside (server shutdown)
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::ClientClosed => "client closed",
            CloseReason::TransportError => "transport error",
            CloseReason::WriteFailure => "write failure",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Closed(CloseReason),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot start streaming from state {0:?}")]
    InvalidTransition(ConnectionState),
}

/// Per-connection state machine
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `Connecting -> Streaming`
    pub fn begin_streaming(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Streaming;
                Ok(())
            }
            other => Err(LifecycleError::InvalidTransition(other)),
        }
    }

    /// Move to `Closed`. Returns true only when leaving `Streaming`, i.e.
    /// exactly once per streaming connection; that caller owns teardown.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        match self.state {
            ConnectionState::Streaming => {
                self.state = ConnectionState::Closed(reason);
                true
            }
            ConnectionState::Connecting => {
                self.state = ConnectionState::Closed(reason);
                false
            }
            ConnectionState::Closed(_) => false,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a push task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushExit {
    Cancelled,
    WriteFailed,
}

/// Push one payload per channel interval until cancelled or a write fails.
///
/// The first push happens one interval after start. A generator failure skips
/// that tick only. Cancellation is checked before every tick, so once the
/// signal fires no new push begins; a push already being written completes.
pub async fn push_loop<S>(
    mut sink: S,
    channel: Arc<Channel>,
    mut cancel: CancelSignal,
    write_timeout: Duration,
    conn_id: ConnectionId,
) -> PushExit
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let period = channel.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break PushExit::Cancelled,
            _ = ticker.tick() => {
                let payload = match channel.render() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(conn_id = %conn_id, channel = %channel, error = %e, "Generator failed, skipping tick");
                        continue;
                    }
                };

                match timeout(write_timeout, sink.send(Message::Text(payload.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "Push write failed");
                        break PushExit::WriteFailed;
                    }
                    Err(_) => {
                        debug!(conn_id = %conn_id, "Push write timed out");
                        break PushExit::WriteFailed;
                    }
                }
            }
        }
    };

    if exit == PushExit::Cancelled {
        // Best effort; the peer may already be gone
        let _ = timeout(write_timeout, sink.close()).await;
    }

    exit
}

/// Read inbound frames until the client closes or the transport fails.
/// Inbound data frames carry no meaning and are dropped.
async fn wait_for_close<S, E>(stream: &mut S, conn_id: ConnectionId) -> CloseReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => return CloseReason::ClientClosed,
            Ok(_) => {}
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                return CloseReason::TransportError;
            }
        }
    }

    CloseReason::ClientClosed
}

/// Drive one upgraded connection from `Connecting` to `Closed`
pub async fn run_stream(
    socket: WebSocket,
    mut lifecycle: Lifecycle,
    claims: Claims,
    channel: Arc<Channel>,
    connections: ConnectionRegistry,
    write_timeout: Duration,
) {
    let username = claims.username.clone();
    let info = ConnectionInfo::new(claims, channel.id());
    let conn_id = info.id;
    let (sink, mut stream) = socket.split();

    let push_channel = channel.clone();
    let mut pusher = connections.arm(info, |cancel| {
        tokio::spawn(push_loop(sink, push_channel, cancel, write_timeout, conn_id))
    });

    if let Err(e) = lifecycle.begin_streaming() {
        warn!(conn_id = %conn_id, error = %e, "Aborting stream");
        connections.disarm(conn_id);
        pusher.abort();
        return;
    }

    info!(conn_id = %conn_id, channel = %channel, username = %username, "Stream opened");

    let (reason, pusher_done) = tokio::select! {
        exit = &mut pusher => {
            let reason = match exit {
                Ok(PushExit::Cancelled) => CloseReason::Shutdown,
                Ok(PushExit::WriteFailed) => CloseReason::WriteFailure,
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "Push task failed");
                    CloseReason::WriteFailure
                }
            };
            (reason, true)
        }
        reason = wait_for_close(&mut stream, conn_id) => (reason, false),
    };

    if lifecycle.close(reason) {
        connections.disarm(conn_id);

        if !pusher_done && timeout(write_timeout, &mut pusher).await.is_err() {
            pusher.abort();
        }
    }

    info!(conn_id = %conn_id, channel = %channel, reason = %reason, "Stream closed");
}
