// mock_gateway: A mock MudVault Mesh gateway for testing the client.
//
// Accepts WebSocket connections, expects an `auth` envelope first,
// answers it with success (or an error when started in rejecting mode),
// records every envelope received afterwards, and lets tests inject
// envelopes toward connected clients.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use mvm_protocol::builders::EnvelopeBuilder;
use mvm_protocol::{Address, Envelope, MessageKind, error_codes};

/// The mock gateway's mesh name, echoed in the envelopes it originates.
const GATEWAY_NAME: &str = "Gateway";

type Shared<T> = Arc<Mutex<T>>;

/// A mock gateway bound to a random local port.
///
/// # Protocol behavior
///
/// - The first envelope from a client must be `auth` with a `payload.token`.
///   Valid auth (any non-empty token unless a rejecting gateway) is answered
///   with an `auth` envelope carrying `payload.status = "success"`; rejection
///   is an `error` envelope with code `auth-failed`.
/// - `ping` envelopes are answered with `pong` echoing `payload.timestamp`.
/// - Everything received after auth is recorded for test assertions.
pub struct MockGateway {
    addr: SocketAddr,
    received: Shared<Vec<String>>,
    sessions: Shared<Vec<mpsc::UnboundedSender<String>>>,
    reject_auth: bool,
    /// Accept-loop handle; dropped (and thus detached) with the gateway.
    _task: tokio::task::JoinHandle<()>,
}

impl MockGateway {
    /// Start a gateway that accepts any token.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_inner(false).await
    }

    /// Start a gateway that rejects every auth attempt.
    pub async fn start_rejecting_auth() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_inner(true).await
    }

    async fn start_inner(reject_auth: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received: Shared<Vec<String>> = Arc::new(Mutex::new(Vec::new()));
        let sessions: Shared<Vec<mpsc::UnboundedSender<String>>> = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let received = Arc::clone(&received);
            let sessions = Arc::clone(&sessions);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _peer)) => {
                            let received = Arc::clone(&received);
                            let sessions = Arc::clone(&sessions);
                            tokio::spawn(async move {
                                let _ =
                                    handle_connection(stream, received, sessions, reject_auth).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Ok(Self {
            addr,
            received,
            sessions,
            reject_auth,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn rejects_auth(&self) -> bool {
        self.reject_auth
    }

    /// All envelope texts received so far (auth included).
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Number of live client sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Inject an envelope toward every connected client.
    pub fn push(&self, envelope_text: &str) {
        let sessions = self.sessions.lock().unwrap();
        for tx in sessions.iter() {
            let _ = tx.send(envelope_text.to_owned());
        }
    }

    /// Wait until an envelope matching `pred` has been received.
    pub async fn wait_for<F>(&self, pred: F, wait: Duration) -> Option<String>
    where
        F: Fn(&Envelope) -> bool,
    {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let found = self
                .received
                .lock()
                .unwrap()
                .iter()
                .find(|text| Envelope::parse(text).is_ok_and(|env| pred(&env)))
                .cloned();
            if found.is_some() {
                return found;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the first envelope of a kind.
    pub async fn wait_for_kind(&self, kind: MessageKind, wait: Duration) -> Option<String> {
        self.wait_for(|env| env.kind == kind, wait).await
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: tokio::net::TcpStream,
    received: Shared<Vec<String>>,
    sessions: Shared<Vec<mpsc::UnboundedSender<String>>>,
    reject_auth: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    sessions.lock().unwrap().push(tx);

    let mut authed = false;
    loop {
        tokio::select! {
            injected = rx.recv() => {
                match injected {
                    Some(text) => write.send(Message::Text(text.into())).await?,
                    None => break,
                }
            }
            msg = read.next() => {
                let Some(msg) = msg else { break };
                let text = match msg? {
                    Message::Text(t) => t.to_string(),
                    Message::Close(_) => break,
                    Message::Ping(data) => {
                        write.send(Message::Pong(data)).await?;
                        continue;
                    }
                    _ => continue,
                };
                received.lock().unwrap().push(text.clone());

                let Ok(env) = Envelope::parse(&text) else { continue };
                if !authed {
                    let reply = answer_auth(&env, reject_auth, &mut authed);
                    write.send(Message::Text(reply.into())).await?;
                    continue;
                }
                if env.kind == MessageKind::Ping {
                    let echo = env.payload_int("timestamp").unwrap_or(0);
                    let pong = EnvelopeBuilder::new(
                        MessageKind::Pong,
                        Address::mud(GATEWAY_NAME),
                        Address::mud(&env.from.mud),
                    )
                    .payload_int("timestamp", echo)
                    .build();
                    write.send(Message::Text(pong.into())).await?;
                }
            }
        }
    }
    Ok(())
}

fn answer_auth(env: &Envelope, reject_auth: bool, authed: &mut bool) -> String {
    let token_ok = env.kind == MessageKind::Auth
        && env
            .payload_str("token")
            .is_some_and(|token| !token.is_empty());

    if token_ok && !reject_auth {
        *authed = true;
        EnvelopeBuilder::new(
            MessageKind::Auth,
            Address::mud(GATEWAY_NAME),
            Address::mud(&env.from.mud),
        )
        .payload_str("status", "success")
        .payload_str("mudName", &env.from.mud)
        .build()
    } else {
        EnvelopeBuilder::new(
            MessageKind::Error,
            Address::mud(GATEWAY_NAME),
            Address::mud(&env.from.mud),
        )
        .payload_str("code", error_codes::AUTH_FAILED)
        .payload_str("message", "invalid token")
        .build()
    }
}
