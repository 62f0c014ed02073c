//! The network collaborator: one telnet connection over TCP or TLS.
//!
//! [`TelnetClient`] implements [`Network`].  A connection is a single tokio
//! task that owns the stream; it reads and frames server output into
//! [`NetEvent`]s (blocking on the bounded event channel when the session
//! falls behind) and writes lines handed to it through a small outgoing
//! queue.  `send` never waits: a full outgoing queue is reported as
//! backpressure.
//!
//! Addresses are `host:port`, or `tls://host:port` for TLS with the Mozilla
//! root bundle.

pub mod telnet;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::bridge::{ConnectFuture, NetEvent, Network};
use crate::error::NetError;
use telnet::{encode_line, Frame, Framer};

/// How long an unterminated line may sit before it is shown as a prompt.
pub const PROMPT_FLUSH: Duration = Duration::from_millis(100);
/// Lines queued for the server before `send` reports backpressure.
pub const SEND_QUEUE: usize = 64;

const READ_BUF: usize = 8192;

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Za-z0-9]").ok());
    match re {
        Some(re) if text.contains('\x1b') => re.replace_all(text, "").into_owned(),
        _ => text.to_owned(),
    }
}

// ── Address ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Target {
    pub fn parse(address: &str) -> Result<Self, NetError> {
        let invalid = || NetError::InvalidAddress(address.to_owned());
        let trimmed = address.trim();
        let (tls, rest) = match trimmed.strip_prefix("tls://") {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix("telnet://").unwrap_or(trimmed)),
        };
        // "host:port" or "host port"
        let (host, port) = rest
            .rsplit_once(':')
            .or_else(|| rest.rsplit_once(' '))
            .ok_or_else(invalid)?;
        let host = host.trim();
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.trim().parse::<u16>().map_err(|_| invalid())?;
        Ok(Self { host: host.to_owned(), port, tls })
    }
}

// ── Stream ────────────────────────────────────────────────────────────────

enum Inner {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Inner {
    async fn open(target: &Target) -> Result<Self, NetError> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        if !target.tls {
            return Ok(Inner::Plain(tcp));
        }
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let name = ServerName::try_from(target.host.clone()).map_err(|e| NetError::Tls(e.to_string()))?;
        let tls = connector.connect(name, tcp).await.map_err(|e| NetError::Tls(e.to_string()))?;
        Ok(Inner::Tls(Box::new(tls)))
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inner::Plain(s) => s.read(buf).await,
            Inner::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Inner::Plain(s) => s.write_all(buf).await,
            Inner::Tls(s) => s.write_all(buf).await,
        }
    }
}

// ── TelnetClient ──────────────────────────────────────────────────────────

struct Live {
    id: u64,
    outgoing: mpsc::Sender<String>,
    task: AbortHandle,
}

struct Shared {
    events: mpsc::Sender<NetEvent>,
    live: Mutex<Option<Live>>,
    server_echo: AtomicBool,
    next_id: AtomicU64,
    /// Bumped under the `live` lock by every connect and disconnect.  An
    /// attempt only installs its stream if the epoch is still its own.
    epoch: AtomicU64,
}

impl Shared {
    fn live(&self) -> MutexGuard<'_, Option<Live>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the live connection, if any, and invalidate attempts still in
    /// flight.  Returns the new epoch.
    fn reset(&self) -> u64 {
        let mut live = self.live();
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(old) = live.take() {
            old.task.abort();
        }
        self.server_echo.store(false, Ordering::Relaxed);
        epoch
    }
}

/// Telnet client handed to the session as its network collaborator.
#[derive(Clone)]
pub struct TelnetClient {
    shared: Arc<Shared>,
}

impl TelnetClient {
    /// `events` feeds the session's network relay.
    pub fn new(events: mpsc::Sender<NetEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                events,
                live: Mutex::new(None),
                server_echo: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
        }
    }
}

impl Network for TelnetClient {
    fn connect(&self, address: &str) -> ConnectFuture {
        let shared = Arc::clone(&self.shared);
        let target = Target::parse(address);
        let epoch = shared.reset();
        Box::pin(async move {
            let target = target?;
            info!(target: "net", host = %target.host, port = target.port, tls = target.tls, "connecting");
            let stream = Inner::open(&target).await?;

            let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
            let (outgoing, rx) = mpsc::channel(SEND_QUEUE);
            shared.server_echo.store(false, Ordering::Relaxed);
            {
                // Held while spawning so the pump cannot finish before it is
                // registered as live.
                let mut live = shared.live();
                if shared.epoch.load(Ordering::Relaxed) != epoch {
                    debug!(target: "net", id, "connection attempt superseded");
                    return Err(NetError::Cancelled);
                }
                let task = tokio::spawn(pump(Arc::clone(&shared), id, stream, rx));
                if let Some(old) = live.replace(Live { id, outgoing, task: task.abort_handle() }) {
                    old.task.abort();
                }
            }
            info!(target: "net", id, "connected");
            Ok(())
        })
    }

    fn disconnect(&self) {
        if self.shared.live().is_some() {
            info!(target: "net", "disconnecting");
        }
        self.shared.reset();
    }

    fn send(&self, data: &str) -> Result<(), NetError> {
        let live = self.shared.live();
        let live = live.as_ref().ok_or(NetError::NotConnected)?;
        live.outgoing.try_send(data.to_owned()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => NetError::NotConnected,
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.live().is_some()
    }

    fn local_echo_enabled(&self) -> Option<bool> {
        Some(!self.shared.server_echo.load(Ordering::Relaxed))
    }
}

fn frame_event(frame: Frame) -> NetEvent {
    match frame {
        Frame::Line(text) => NetEvent::Line(text),
        Frame::Prompt(text) => NetEvent::Prompt(text),
    }
}

/// Drive one connection until EOF, an I/O error, or abort.
async fn pump(shared: Arc<Shared>, id: u64, mut stream: Inner, mut outgoing: mpsc::Receiver<String>) {
    let mut framer = Framer::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut flush_at: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) => break "closed by server".to_owned(),
                    Ok(n) => n,
                    Err(e) => break e.to_string(),
                };
                let (frames, reply) = framer.process(&buf[..n]);
                shared.server_echo.store(framer.server_echoes(), Ordering::Relaxed);
                if !reply.is_empty() {
                    if let Err(e) = stream.write_all(&reply).await {
                        break e.to_string();
                    }
                }
                for frame in frames {
                    if shared.events.send(frame_event(frame)).await.is_err() {
                        return; // session gone
                    }
                }
                flush_at = framer.has_partial().then(|| Instant::now() + PROMPT_FLUSH);
            }
            Some(line) = outgoing.recv() => {
                if let Err(e) = stream.write_all(&encode_line(&line)).await {
                    break e.to_string();
                }
            }
            _ = time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                flush_at = None;
                if let Some(frame) = framer.take_partial() {
                    if shared.events.send(frame_event(frame)).await.is_err() {
                        return;
                    }
                }
            }
        }
    };

    // Only report if we are still the live connection; an explicit
    // disconnect or reconnect already replaced us.
    let current = {
        let mut live = shared.live();
        if live.as_ref().is_some_and(|l| l.id == id) {
            *live = None;
            true
        } else {
            false
        }
    };
    if current {
        warn!(target: "net", id, "connection ended: {reason}");
        shared.server_echo.store(false, Ordering::Relaxed);
        if let Some(frame) = framer.take_partial() {
            let _ = shared.events.send(frame_event(frame)).await;
        }
        let _ = shared.events.send(NetEvent::Closed).await;
    } else {
        debug!(target: "net", id, "stale connection ended: {reason}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
