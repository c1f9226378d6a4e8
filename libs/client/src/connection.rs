//! The client connection: one socket + codec pair, a pending-requests table
//! keyed by `requestId`, and an event dispatcher. A `Connection` is
//! single-owner: nothing here takes an internal background task; one
//! coordinator drives its own I/O loop and a connection is not meant to be
//! shared across tasks without external synchronization.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use purcrdr_protocol::constants::DEFAULT_REQUEST_TIMEOUT_SECS;
use purcrdr_protocol::message::{self, EventMessage, Message, ResponseMessage};
use purcrdr_transport::{PacketKind, RecvOutcome, Transport, UsTransport};

use crate::error::{ClientError, Result};
use crate::unix_bind::{bind_and_connect, client_address};

/// What to do with a response once it arrives, registered by
/// [`Connection::send_request`]/[`Connection::send_request_and_wait`].
enum PendingSlot {
    /// `send_request_and_wait` is parked on this oneshot.
    Wait(oneshot::Sender<ResponseMessage>),
    /// `send_request` registered a fire-and-watch callback.
    Callback(Box<dyn FnOnce(Result<ResponseMessage>) + Send>),
}

struct PendingRequest {
    deadline: Instant,
    slot: PendingSlot,
}

/// Invoked for every inbound [`EventMessage`] that isn't a response.
pub type EventHandler = Arc<dyn Fn(EventMessage) + Send + Sync>;

/// One PurCRDR client connection.
pub struct Connection {
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    event_handler: Mutex<Option<EventHandler>>,
    last_ret_code: Mutex<Option<u16>>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
            event_handler: Mutex::new(None),
            last_ret_code: Mutex::new(None),
        }
    }

    /// Open `AF_UNIX/SOCK_STREAM`, bind the client's own address under
    /// `CLI_PATH`, then connect to the server's listening `path`.
    pub async fn connect_unix(path: impl AsRef<Path>, app: &str, runner: &str) -> Result<Self> {
        Self::connect_unix_from(path, Path::new(purcrdr_protocol::DEF_CLI_PATH), app, runner).await
    }

    /// Testable variant that takes an explicit `CLI_PATH` directory.
    pub async fn connect_unix_from(
        path: impl AsRef<Path>,
        cli_dir: &Path,
        app: &str,
        runner: &str,
    ) -> Result<Self> {
        let client_path = client_address(cli_dir, app, runner);
        let std_stream = bind_and_connect(path.as_ref(), &client_path)
            .map_err(ClientError::Io)?;
        std_stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(std_stream)?;
        let transport = Arc::new(UsTransport::new(stream));
        Ok(Self::new(transport))
    }

    /// Register the callback invoked for every inbound event.
    pub async fn set_event_handler(&self, handler: EventHandler) {
        *self.event_handler.lock().await = Some(handler);
    }

    /// The `retCode` of the most recently received response, if any.
    pub async fn last_ret_code(&self) -> Option<u16> {
        *self.last_ret_code.lock().await
    }

    /// Serialize `msg`, send it, and register `handler` against its
    /// `requestId`. A `None` handler is a fire-and-forget request: the
    /// caller never learns how it resolved.
    pub async fn send_request(
        &self,
        msg: &Message,
        time_expected: Duration,
        handler: Option<Box<dyn FnOnce(Result<ResponseMessage>) + Send>>,
    ) -> Result<()> {
        let Message::Request(req) = msg else {
            return Err(ClientError::UnknownResult(
                "send_request requires a Request message".into(),
            ));
        };
        let wire = message::serialize(msg);
        self.transport
            .send_packet(PacketKind::Text, &wire)
            .await?;

        if let Some(handler) = handler {
            self.pending.lock().await.insert(
                req.request_id.clone(),
                PendingRequest {
                    deadline: Instant::now() + time_expected,
                    slot: PendingSlot::Callback(handler),
                },
            );
        }
        Ok(())
    }

    /// Send `msg` and block until its correlated response arrives or
    /// `time_expected` elapses. Interleaved events and unrelated responses
    /// are dispatched through their normal handlers while we wait.
    pub async fn send_request_and_wait(
        &self,
        msg: &Message,
        time_expected: Duration,
    ) -> Result<ResponseMessage> {
        let Message::Request(req) = msg else {
            return Err(ClientError::UnknownResult(
                "send_request_and_wait requires a Request message".into(),
            ));
        };
        let request_id = req.request_id.clone();
        let wire = message::serialize(msg);
        self.transport
            .send_packet(PacketKind::Text, &wire)
            .await?;

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + time_expected;
        self.pending.lock().await.insert(
            request_id.clone(),
            PendingRequest {
                deadline,
                slot: PendingSlot::Wait(tx),
            },
        );

        let mut rx = rx;
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.pending.lock().await.remove(&request_id);
                return Err(ClientError::Timeout);
            }
            let remaining = deadline - now;
            tokio::select! {
                biased;
                resp = &mut rx => {
                    return resp.map_err(|_| ClientError::Timeout);
                }
                outcome = self.pump_once() => {
                    outcome?;
                    // Fall through and re-check the oneshot / deadline.
                    if let Ok(resp) = rx.try_recv() {
                        return Ok(resp);
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    self.pending.lock().await.remove(&request_id);
                    return Err(ClientError::Timeout);
                }
            }
        }
    }

    /// Pump exactly one packet: parse it, then dispatch it to a pending
    /// callback/waiter (response), the event handler (event), or drop it
    /// with a warning (unmatched response, keepalive).
    pub async fn read_and_dispatch_packet(&self) -> Result<()> {
        self.pump_once().await
    }

    /// [`Self::read_and_dispatch_packet`] bounded by `timeout`.
    pub async fn wait_and_dispatch_packet(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.pump_once())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn pump_once(&self) -> Result<()> {
        self.sweep_expired().await;
        match self.transport.recv_packet().await? {
            RecvOutcome::Ping | RecvOutcome::Pong => {
                trace!("keepalive frame, no packet available");
                Ok(())
            }
            RecvOutcome::Packet(packet) => {
                if packet.payload.is_empty() {
                    return Ok(());
                }
                let msg = message::parse(&packet.payload)?;
                self.dispatch(msg).await
            }
        }
    }

    async fn dispatch(&self, msg: Message) -> Result<()> {
        match msg {
            Message::Response(resp) => {
                *self.last_ret_code.lock().await = Some(resp.ret_code);
                let pending = self.pending.lock().await.remove(&resp.request_id);
                match pending {
                    Some(PendingRequest { slot: PendingSlot::Wait(tx), .. }) => {
                        let _ = tx.send(resp);
                    }
                    Some(PendingRequest { slot: PendingSlot::Callback(cb), .. }) => {
                        cb(Ok(resp));
                    }
                    None => {
                        warn!(request_id = %resp.request_id, "response for no outstanding request");
                    }
                }
                Ok(())
            }
            Message::Event(event) => {
                if let Some(handler) = self.event_handler.lock().await.clone() {
                    handler(event);
                } else {
                    debug!(event = %event.event, "dropped event: no handler registered");
                }
                Ok(())
            }
            Message::Request(req) => {
                warn!(operation = %req.operation, "client received a request-shaped message, dropping");
                Ok(())
            }
        }
    }

    /// Fail every pending request whose deadline has passed with
    /// [`ClientError::Timeout`]. There is no way to retract an in-flight
    /// request on the wire, the request itself isn't cancelled, only
    /// given up on locally.
    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(PendingRequest { slot: PendingSlot::Callback(cb), .. }) = pending.remove(&id) {
                cb(Err(ClientError::Timeout));
            }
        }
    }

    /// Emit a bare `PING` frame as a periodic keepalive.
    pub async fn ping_server(&self) -> Result<()> {
        self.transport.ping().await.map_err(Into::into)
    }

    /// Send `CLOSE` and release the transport.
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.close().await.map_err(Into::into)
    }

    pub const fn default_timeout() -> Duration {
        Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use purcrdr_protocol::{DataType, StatusCode, Target};
    use tempfile::tempdir;
    use tokio::net::{UnixListener, UnixStream};

    async fn loopback() -> (Connection, UnixStream) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let client_stream = UnixStream::connect(&path).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let transport = Arc::new(UsTransport::new(client_stream));
        (Connection::new(transport), server_stream)
    }

    #[tokio::test]
    async fn send_request_and_wait_correlates_by_request_id() {
        let (conn, server) = loopback().await;
        let server_transport = UsTransport::new(server);

        let req = Message::new_request(
            Target::Workspace,
            0,
            "createPlainWindow",
            None,
            None,
            Some("REQ1".to_string()),
            DataType::Ejson,
            br#"{"name":"w0"}"#.to_vec(),
        );

        let wait = tokio::spawn(async move { conn.send_request_and_wait(&req, Duration::from_secs(2)).await });

        // Act as the server: read the request, then reply with a matching
        // response carrying a nonzero window handle.
        match server_transport.recv_packet().await.unwrap() {
            RecvOutcome::Packet(p) => {
                let parsed = message::parse(&p.payload).unwrap();
                assert_eq!(parsed.request_id(), Some("REQ1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let resp = Message::new_response("REQ1", StatusCode::Ok, 7, DataType::Void, vec![]);
        server_transport
            .send_packet(PacketKind::Text, &message::serialize(&resp))
            .await
            .unwrap();

        let result = wait.await.unwrap().unwrap();
        assert_eq!(result.ret_code, StatusCode::Ok.code());
        assert_eq!(result.result_value, 7);
    }

    #[tokio::test]
    async fn send_request_and_wait_times_out_with_no_response() {
        let (conn, _server) = loopback().await;
        let req = Message::new_request(
            Target::Workspace,
            0,
            "createPlainWindow",
            None,
            None,
            Some("REQ2".to_string()),
            DataType::Void,
            vec![],
        );
        let result = conn.send_request_and_wait(&req, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn events_dispatch_to_registered_handler() {
        let (conn, server) = loopback().await;
        let server_transport = UsTransport::new(server);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        conn.set_event_handler(Arc::new(move |ev: EventMessage| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(ev.event);
            }
        }))
        .await;

        let event = Message::new_event(Target::Dom, 3, "change", None, None, DataType::Void, vec![]);
        server_transport
            .send_packet(PacketKind::Text, &message::serialize(&event))
            .await
            .unwrap();

        conn.read_and_dispatch_packet().await.unwrap();
        assert_eq!(rx.await.unwrap(), "change");
    }
}
