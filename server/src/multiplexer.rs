//! Server multiplexer: one reader task per accepted connection feeding a
//! single central task over an `mpsc` channel, plus two
//! `tokio::time::interval` tickers driving periodic housekeeping. The
//! central task is the sole owner of [`ServerState`]: no `Mutex` guards
//! registry or session state; only one task ever touches it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};

use purcrdr_protocol::{serialize, DataType, ErrorCode, Message};
use purcrdr_transport::{PacketKind, RecvOutcome, Transport, TransportError, TransportKind, UsTransport, WsTransport};

use crate::dispatcher::{dispatch, DispatchContext};
use crate::endpoint::{CloseCause, EndpointId};
use crate::state::ServerState;

enum ServerEvent {
    Accepted { transport: Arc<dyn Transport>, kind: TransportKind },
    Inbound { id: EndpointId, message: Message },
    /// A connection ended. `fatal_code` carries a taxonomy code when the
    /// cause should be reported before closing (e.g. `TooLarge`), written
    /// best-effort since no `requestId` survives an oversize or malformed
    /// frame to correlate a normal response against.
    Disconnected { id: EndpointId, fatal_code: Option<ErrorCode> },
}

/// Spawn a reader task for one accepted connection: pump `recv_packet` in a
/// loop, forwarding parsed messages to the central task. Non-fatal
/// keepalive outcomes (`Ping`/`Pong`, already answered or noted by the
/// transport layer) are silently absorbed here.
fn spawn_reader(id: EndpointId, transport: Arc<dyn Transport>, tx: mpsc::Sender<ServerEvent>) {
    tokio::spawn(async move {
        loop {
            match transport.recv_packet().await {
                Ok(RecvOutcome::Packet(packet)) => match purcrdr_protocol::parse(&packet.payload) {
                    Ok(message) => {
                        if tx.send(ServerEvent::Inbound { id, message }).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = id.0, error = %e, "dropping unparsable packet");
                    }
                },
                Ok(RecvOutcome::Ping) | Ok(RecvOutcome::Pong) => continue,
                Err(e) => {
                    debug!(endpoint = id.0, error = %e, "reader task exiting");
                    let fatal_code = match &e {
                        TransportError::TooLarge { .. } => Some(ErrorCode::TooLarge),
                        TransportError::Protocol(_) => Some(ErrorCode::Protocol),
                        _ => None,
                    };
                    let _ = tx.send(ServerEvent::Disconnected { id, fatal_code }).await;
                    return;
                }
            }
        }
    });
}

async fn spawn_us_acceptor(listener: UnixListener, tx: mpsc::Sender<ServerEvent>) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let transport: Arc<dyn Transport> = Arc::new(UsTransport::new(stream));
                    if tx
                        .send(ServerEvent::Accepted { transport, kind: TransportKind::Unix })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "US accept failed"),
            }
        }
    });
}

async fn spawn_ws_acceptor(listener: TcpListener, tx: mpsc::Sender<ServerEvent>) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match accept_async(stream).await {
                            Ok(ws) => {
                                let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(ws));
                                let _ = tx
                                    .send(ServerEvent::Accepted { transport, kind: TransportKind::WebSocket })
                                    .await;
                            }
                            Err(e) => warn!(error = %e, "WS handshake failed"),
                        }
                    });
                }
                Err(e) => warn!(error = %e, "WS accept failed"),
            }
        }
    });
}

/// Count connections of `kind` currently live, for the `MAX_CLIENTS_EACH`
/// per-listener cap: connections beyond the cap are refused with an
/// immediate close.
fn clients_of_kind(state: &ServerState, kind: TransportKind) -> usize {
    state
        .registry
        .endpoints_of_kind(kind)
}

async fn send_response(state: &ServerState, id: EndpointId, response: &Message) {
    if let Some(transport) = state.connections.get(&id) {
        let bytes = serialize(response);
        if let Err(e) = transport.send_packet(PacketKind::Text, &bytes).await {
            warn!(endpoint = id.0, error = %e, "failed to write response");
        }
    }
}

/// Drive the event loop until the process is signaled to stop. `us_listener`
/// is mandatory (the US socket always exists); `ws_listener` is optional,
/// mirroring `ListenerConfig::ws_port`'s `Option`.
pub async fn run(
    mut state: ServerState,
    us_listener: UnixListener,
    ws_listener: Option<TcpListener>,
) {
    let (tx, mut rx) = mpsc::channel(1024);

    spawn_us_acceptor(us_listener, tx.clone()).await;
    if let Some(ws) = ws_listener {
        spawn_ws_acceptor(ws, tx.clone()).await;
    }

    let reap_every = Duration::from_secs(state.config.housekeeping.reap_dangling_interval_secs);
    let check_every = Duration::from_secs(state.config.housekeeping.check_no_responding_interval_secs);
    let mut reap_tick = tokio::time::interval(reap_every);
    let mut check_tick = tokio::time::interval(check_every);

    info!("server event loop starting");

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                handle_event(&mut state, event, &tx).await;
            }
            _ = reap_tick.tick() => reap_dangling(&mut state),
            _ = check_tick.tick() => check_no_responding(&mut state).await,
        }
    }
}

async fn handle_event(state: &mut ServerState, event: ServerEvent, tx: &mpsc::Sender<ServerEvent>) {
    match event {
        ServerEvent::Accepted { transport, kind } => {
            if clients_of_kind(state, kind) >= state.config.limits.max_clients_each {
                warn!(?kind, "refusing connection: MAX_CLIENTS_EACH reached");
                tokio::spawn(async move {
                    let _ = transport.close().await;
                });
                return;
            }
            let now = Instant::now();
            let id = state.registry.new_endpoint(kind, now);
            state.connections.insert(id, transport.clone());
            info!(endpoint = id.0, ?kind, "accepted connection");
            spawn_reader(id, transport, tx.clone());
        }
        ServerEvent::Inbound { id, message } => {
            state.touch(id, Instant::now());
            if let Message::Request(req) = message {
                let kind = state.connections.get(&id).map(|t| t.kind()).unwrap_or(TransportKind::Unix);
                let response = {
                    let mut ctx = DispatchContext {
                        registry: &mut state.registry,
                        sessions: &mut state.sessions,
                        endpoint_id: id.0,
                        transport_kind: kind,
                        now: Instant::now(),
                    };
                    dispatch(&mut ctx, &req)
                };
                send_response(state, id, &response).await;
            } else {
                debug!(endpoint = id.0, "ignoring non-request inbound message");
            }
        }
        ServerEvent::Disconnected { id, fatal_code } => {
            if let Some(code) = fatal_code {
                // Best-effort: the frame that triggered this never yielded a
                // parsed `requestId`, so there's nothing to correlate against.
                if let Some(transport) = state.connections.get(&id) {
                    let resp = Message::new_response(String::new(), code.to_status(), 0, DataType::Void, vec![]);
                    let bytes = serialize(&resp);
                    let _ = transport.send_packet(PacketKind::Text, &bytes).await;
                }
            }
            state.registry.del_endpoint(id, CloseCause::LostConnection);
            state.remove_connection(id);
        }
    }
}

fn reap_dangling(state: &mut ServerState) {
    let now = Instant::now();
    let max_no_responding = Duration::from_secs(state.config.housekeeping.max_no_responding_time_secs);
    let to_reap = state.registry.dangling_to_reap(now, max_no_responding);
    for id in to_reap {
        if let Some(transport) = state.connections.get(&id).cloned() {
            tokio::spawn(async move {
                let _ = transport.close().await;
            });
        }
        state.registry.del_endpoint(id, CloseCause::NoResponding);
        state.remove_connection(id);
    }
}

async fn check_no_responding(state: &mut ServerState) {
    let now = Instant::now();
    let ping_time = Duration::from_secs(state.config.housekeeping.max_ping_time_secs);
    let kill_time = Duration::from_secs(state.config.housekeeping.max_no_responding_time_secs);
    let (to_ping, to_kill) = state.registry.no_responding_scan(now, ping_time, kill_time);

    for id in to_ping {
        if let Some(transport) = state.connections.get(&id) {
            if let Err(e) = transport.ping().await {
                warn!(endpoint = id.0, error = %e, "ping failed");
            }
        }
    }
    for id in to_kill {
        if let Some(transport) = state.connections.get(&id).cloned() {
            let _ = transport.close().await;
        }
        state.registry.del_endpoint(id, CloseCause::NoResponding);
        state.remove_connection(id);
    }
}
