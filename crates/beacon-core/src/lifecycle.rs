//! Connection lifecycle.
//!
//! A connection is handed over already upgraded and moves through
//! `Active -> Closing -> Closed`. While active, three things run:
//!
//! - the read loop, in the caller's task, decoding and routing frames
//! - a writer task, the only owner of the write half
//! - a keepalive task probing the peer and watching for silence
//!
//! Whichever of them stops first ends the session. On `Closing` the
//! connection leaves every room exactly once.

use crate::handle::{ConnectionHandle, DeliveryError, Outbound, DEFAULT_OUTBOUND_CAPACITY};
use crate::identity::Identity;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::router::{MessageRouter, Session};
use beacon_protocol::FrameCodec;
use std::sync::Arc;
use std::time::Duration;
use tenvis_beacon_transport::{Connection, ConnectionId, FrameSink, FrameStream, Incoming};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// How long a closing writer may keep flushing before it is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Shortest keepalive period.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress (owned by the transport layer).
    Connecting,
    /// Reading and routing.
    Active,
    /// Tearing down.
    Closing,
    /// Done.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// Reading from the connection failed.
    ReadError,
    /// The writer stopped: a write or keepalive probe failed, or the
    /// connection was evicted.
    WriterStopped,
    /// Nothing was received within the heartbeat timeout.
    KeepaliveTimeout,
}

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval between keepalive probes.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_message_size: 64 * 1024,
        }
    }
}

/// What happened over a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// Identity, if one was assigned.
    pub identity: Option<Identity>,
    /// Final state. Always [`ConnectionState::Closed`].
    pub state: ConnectionState,
    /// Why the session ended.
    pub reason: CloseReason,
    /// Rooms left during teardown.
    pub rooms_left: usize,
}

/// Drives one connection from hand-over to teardown.
pub struct ConnectionLifecycle<C: Connection> {
    connection: C,
    router: Arc<MessageRouter>,
    config: LifecycleConfig,
    codec: FrameCodec,
    state: ConnectionState,
}

impl<C: Connection> ConnectionLifecycle<C> {
    /// Take ownership of an upgraded connection.
    #[must_use]
    pub fn new(connection: C, router: Arc<MessageRouter>, config: LifecycleConfig) -> Self {
        let codec = FrameCodec::with_max_frame_size(config.max_message_size);
        Self {
            connection,
            router,
            config,
            codec,
            state: ConnectionState::Connecting,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the session to completion.
    pub async fn run(self) -> SessionSummary {
        let ConnectionLifecycle {
            connection,
            router,
            config,
            codec,
            mut state,
        } = self;

        let _metrics_guard = ConnectionMetricsGuard::new();
        let connection_id = ConnectionId::next();
        let remote_addr = connection.remote_addr();

        let (handle, outbound) = ConnectionHandle::new(connection_id, config.outbound_capacity);
        let (sink, mut stream) = connection.split();
        let (activity, last_seen) = watch::channel(Instant::now());

        let mut writer = tokio::spawn(write_loop(
            connection_id,
            sink,
            outbound,
            handle.shutdown_signal(),
        ));
        let mut keepalive = tokio::spawn(keepalive_loop(
            connection_id,
            handle.clone(),
            last_seen,
            config.heartbeat_interval,
            config.heartbeat_timeout,
        ));

        transition(&mut state, connection_id, ConnectionState::Active);
        info!(
            connection = %connection_id,
            remote = ?remote_addr,
            max_frame = codec.max_frame_size(),
            "Connection active"
        );

        let mut session = Session::new(handle.clone());
        let reason = loop {
            tokio::select! {
                incoming = stream.recv() => match incoming {
                    Ok(Some(Incoming::Frame(data))) => {
                        activity.send_replace(Instant::now());
                        handle_frame(&router, &codec, &mut session, &data);
                    }
                    Ok(Some(Incoming::Heartbeat)) => {
                        activity.send_replace(Instant::now());
                    }
                    Ok(None) => break CloseReason::PeerClosed,
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "Read failed");
                        metrics::record_error("read");
                        break CloseReason::ReadError;
                    }
                },
                _ = &mut writer => break CloseReason::WriterStopped,
                exit = &mut keepalive => break exit.unwrap_or(CloseReason::KeepaliveTimeout),
            }
        };

        transition(&mut state, connection_id, ConnectionState::Closing);
        let rooms_left = router.rooms().leave(connection_id);

        keepalive.abort();
        handle.close();
        if reason != CloseReason::WriterStopped {
            tokio::spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    writer.abort();
                }
            });
        }

        transition(&mut state, connection_id, ConnectionState::Closed);
        info!(
            connection = %connection_id,
            identity = ?session.identity().map(Identity::as_str),
            reason = ?reason,
            rooms_left,
            "Connection closed"
        );

        SessionSummary {
            connection_id,
            identity: session.identity().cloned(),
            state,
            reason,
            rooms_left,
        }
    }
}

fn handle_frame(router: &MessageRouter, codec: &FrameCodec, session: &mut Session, data: &[u8]) {
    let message = match codec.decode(data) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection = %session.id(), error = %e, "Dropping malformed frame");
            metrics::record_error("decode");
            return;
        }
    };

    let kind = message.kind;
    match router.route(session, message) {
        Ok(routed) => trace!(connection = %session.id(), %kind, ?routed, "Routed"),
        Err(e) if e.is_routing_miss() => {
            debug!(connection = %session.id(), %kind, error = %e, "Nothing to route to")
        }
        Err(e) => warn!(connection = %session.id(), %kind, error = %e, "Dropping message"),
    }
}

fn transition(state: &mut ConnectionState, connection_id: ConnectionId, next: ConnectionState) {
    debug!(connection = %connection_id, from = ?*state, to = ?next, "State transition");
    *state = next;
}

/// Drain the outbound queue into the sink until closed or a write fails.
async fn write_loop<S: FrameSink>(
    connection_id: ConnectionId,
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                trace!(connection = %connection_id, "Writer asked to close");
                break;
            }

            item = outbound.recv() => match item {
                Some(Outbound::Frame(data)) => {
                    if let Err(e) = sink.send_frame(data).await {
                        debug!(connection = %connection_id, error = %e, "Write failed");
                        break;
                    }
                }
                Some(Outbound::Ping) => {
                    if let Err(e) = sink.ping().await {
                        debug!(connection = %connection_id, error = %e, "Keepalive probe failed");
                        break;
                    }
                }
                None => break,
            }
        }
    }

    if let Err(e) = sink.close().await {
        trace!(connection = %connection_id, error = %e, "Close failed");
    }
}

/// Probe the peer every `interval` until it has been silent for
/// `timeout` or the writer is gone, and report which.
async fn keepalive_loop(
    connection_id: ConnectionId,
    handle: ConnectionHandle,
    last_seen: watch::Receiver<Instant>,
    interval: Duration,
    timeout: Duration,
) -> CloseReason {
    // A zero period would panic in `interval_at`
    let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        ticker.tick().await;

        let idle = last_seen.borrow().elapsed();
        if idle >= timeout {
            warn!(connection = %connection_id, idle_ms = idle.as_millis() as u64, "Keepalive timeout");
            return CloseReason::KeepaliveTimeout;
        }

        match handle.ping() {
            Ok(()) => trace!(connection = %connection_id, "Keepalive probe queued"),
            // Writer is busy; it is making progress so skip this probe
            Err(DeliveryError::QueueFull) => {}
            Err(DeliveryError::Closed) => return CloseReason::WriterStopped,
        }
    }
}
