//! The capability bridge between the session and the script runtime.
//!
//! Two collaborator seams are traits so the core can run against real I/O or
//! test doubles:
//!
//! | Trait       | Implemented by                  | Threading                     |
//! |-------------|---------------------------------|-------------------------------|
//! | [`Network`] | [`crate::net::TelnetClient`]    | `Send + Sync`, shared with workers |
//! | [`Display`] | [`crate::ui::TerminalHandle`]   | owned by the consumer thread  |
//!
//! [`Host`] bundles everything a script may touch.  It lives behind an `Rc`
//! on the consumer thread; the runtime's Lua functions hold clones of it.
//! Nothing here blocks: side effects that must be serialised (printing,
//! lifecycle requests) are parked on the consumer's local queue and picked up
//! by the loop once the current dispatch returns.

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::error::NetError;
use crate::event::{Event, SystemControl};
use crate::history::History;
use crate::timer::TimerScheduler;

// ── Network collaborator ──────────────────────────────────────────────────

/// Result of a connection attempt; resolved off the consumer thread.
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<(), NetError>> + Send + 'static>>;

/// What the transport produces for the network relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Line(String),
    Prompt(String),
    Closed,
}

pub trait Network: Send + Sync {
    /// Start connecting to `address`.  The returned future may take a while;
    /// the session awaits it on a worker task.
    fn connect(&self, address: &str) -> ConnectFuture;

    /// Drop the connection and cancel any attempt still in flight.
    fn disconnect(&self);

    /// Whether a transport is currently established.
    fn is_connected(&self) -> bool;

    /// Queue one line for the server.  Must not block.
    fn send(&self, data: &str) -> Result<(), NetError>;

    /// Whether typed input should be echoed locally.  `None` means the
    /// transport does not know, which callers treat as "echo".
    fn local_echo_enabled(&self) -> Option<bool> {
        None
    }
}

// ── Display collaborator ──────────────────────────────────────────────────

/// Pane operations requested by scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneOp {
    Create(String),
    Write { name: String, text: String },
    Toggle(String),
    Clear(String),
}

/// One bar in the layout.  `height` defaults to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarSpec {
    pub name: String,
    pub height: u16,
}

impl BarSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), height: 1 }
    }
}

/// Which bars sit above and below the scrollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub top: Vec<BarSpec>,
    pub bottom: Vec<BarSpec>,
}

impl Default for Layout {
    fn default() -> Self {
        Self { top: Vec::new(), bottom: vec![BarSpec::new("status")] }
    }
}

/// Configuration pushed to the front end whenever scripts change it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiConfig {
    /// Keys that should be reported as [`Event::KeyPressed`] instead of
    /// being handled by the line editor.
    pub bound_keys: Vec<String>,
    pub layout: Layout,
}

pub trait Display {
    /// Append a line to permanent scrollback.
    fn render_line(&mut self, text: &str);
    /// Append locally echoed input to scrollback.
    fn render_echo(&mut self, text: &str);
    /// Replace the live (uncommitted) prompt overlay; empty clears it.
    fn render_prompt(&mut self, text: &str);
    fn set_status(&mut self, text: &str);
    fn set_infobar(&mut self, text: &str);
    /// Replace the contents of the input line.
    fn set_input(&mut self, text: &str);
    fn pane(&mut self, op: PaneOp);
    fn show_picker(&mut self, title: &str, items: &[String]);
    fn apply_config(&mut self, config: &UiConfig);
}

// ── Host ──────────────────────────────────────────────────────────────────

/// Session state scripts can query with `rune.state()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    pub connected: bool,
    pub address: Option<String>,
    /// The uncommitted prompt; empty when there is none.
    pub prompt: String,
}

/// Capabilities granted to the script runtime.
pub struct Host {
    display: RefCell<Box<dyn Display>>,
    network: Arc<dyn Network>,
    history: RefCell<History>,
    pending: RefCell<VecDeque<Event>>,
    state: RefCell<HostState>,
    timers: TimerScheduler,
    config_dir: PathBuf,
}

impl Host {
    pub fn new(
        display: Box<dyn Display>,
        network: Arc<dyn Network>,
        timers: TimerScheduler,
        config_dir: PathBuf,
    ) -> Self {
        Self {
            display: RefCell::new(display),
            network,
            history: RefCell::new(History::default()),
            pending: RefCell::new(VecDeque::new()),
            state: RefCell::new(HostState::default()),
            timers,
            config_dir,
        }
    }

    // ── Network ───────────────────────────────────────────────────────────

    pub fn send(&self, data: &str) -> Result<(), NetError> {
        self.network.send(data)
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn local_echo(&self) -> bool {
        self.network.local_echo_enabled().unwrap_or(true)
    }

    // ── Loop-internal events ──────────────────────────────────────────────

    /// Park `event` on the consumer's local queue.
    pub fn post(&self, event: Event) {
        self.pending.borrow_mut().push_back(event);
    }

    pub fn print(&self, text: &str) {
        self.post(Event::DisplayLine(text.to_owned()));
    }

    pub fn control(&self, request: SystemControl) {
        debug!(target: "session", ?request, "control requested by script");
        self.post(Event::SystemControl(request));
    }

    pub fn take_pending(&self) -> Option<Event> {
        self.pending.borrow_mut().pop_front()
    }

    // ── Display ───────────────────────────────────────────────────────────

    /// Borrow the display for the duration of one call.
    ///
    /// Never hold the returned guard across a script call.
    pub fn display(&self) -> RefMut<'_, Box<dyn Display>> {
        self.display.borrow_mut()
    }

    /// Push a changed binding/layout configuration to the front end now.
    pub fn on_config_change(&self, config: &UiConfig) {
        self.display().apply_config(config);
    }

    // ── History ───────────────────────────────────────────────────────────

    pub fn history(&self) -> Vec<String> {
        self.history.borrow().entries()
    }

    pub fn add_history(&self, entry: &str) {
        self.history.borrow_mut().add(entry);
    }

    // ── State ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> HostState {
        self.state.borrow().clone()
    }

    pub fn prompt(&self) -> String {
        self.state.borrow().prompt.clone()
    }

    pub fn set_prompt(&self, prompt: String) {
        self.state.borrow_mut().prompt = prompt;
    }

    pub fn set_connected(&self, address: Option<String>) {
        let mut state = self.state.borrow_mut();
        state.connected = address.is_some();
        state.address = address;
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    // ── Misc ──────────────────────────────────────────────────────────────

    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Resolve a script path: absolute paths are used as-is, relative ones
    /// are looked up in the configuration directory.
    pub fn resolve_script(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config_dir.join(p)
        }
    }
}
