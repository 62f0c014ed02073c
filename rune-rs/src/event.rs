//! The unified event stream.
//!
//! Every asynchronous source (network, keyboard, timers, connection workers)
//! is converted into an [`Event`] and pushed onto one bounded queue.  The
//! session's consumer loop is the only reader.
//!
//! ```text
//!   network relay ──┐
//!   input relay   ──┼──► mpsc (bounded) ──► Session consumer ──► ExtensionRuntime
//!   timer relay   ──┘                          ▲
//!   connect worker (transient) ────────────────┘
//! ```

use tokio::sync::mpsc;

/// Capacity of the shared event queue.  Producers block when it is full.
pub const QUEUE_CAPACITY: usize = 256;

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create the shared bounded event queue.
pub fn queue() -> (EventSender, EventReceiver) {
    mpsc::channel(QUEUE_CAPACITY)
}

// ── Event ─────────────────────────────────────────────────────────────────

/// One unit of work for the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete line from the server: `raw` keeps ANSI sequences, `clean`
    /// has them stripped.
    NetworkLine { raw: String, clean: String },
    /// An unterminated line the server marked (or that timed out) as a prompt.
    NetworkPrompt { raw: String, clean: String },
    /// The remote end closed the connection.
    NetworkClosed,
    /// A line submitted from the input editor.
    UserInput(String),
    /// A bound key was pressed; `buffer` is the input line at that moment.
    KeyPressed { key: String, buffer: String },
    /// The picker closed with a selection (`Some(index)`) or was cancelled.
    PickerSelected(Option<usize>),
    /// Already-rendered output routed back through the loop.
    DisplayLine(String),
    DisplayEcho(String),
    DisplayPrompt(String),
    /// Deferred work: timer callbacks, connection results, reload.
    TimerFired(Job),
    SystemControl(SystemControl),
}

/// Process-level lifecycle requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemControl {
    Quit,
    Connect(String),
    Disconnect,
    Reload,
}

/// Work carried by [`Event::TimerFired`], executed inline on the consumer.
///
/// Jobs name what to run rather than holding script values, so they can be
/// produced on any thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Invoke the script callback tracked under `handle`, if the runtime that
    /// created it (`generation`) is still live and the handle still tracked.
    Timer { generation: u64, handle: u64 },
    /// Outcome of a connection attempt made off the consumer thread.
    /// `attempt` identifies the request; a result for any other attempt
    /// than the one pending is dropped.
    ConnectResult { attempt: u64, address: String, error: Option<String> },
    /// Rebuild the script environment.
    Reload,
}

// ── InputEvent ────────────────────────────────────────────────────────────

/// What the interactive front end reports to the input relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    Key { key: String, buffer: String },
    Picked(Option<usize>),
    /// The user asked to leave (Ctrl-C, or the front end shut down).
    Quit,
}

impl From<InputEvent> for Event {
    fn from(ev: InputEvent) -> Self {
        match ev {
            InputEvent::Line(text) => Event::UserInput(text),
            InputEvent::Key { key, buffer } => Event::KeyPressed { key, buffer },
            InputEvent::Picked(choice) => Event::PickerSelected(choice),
            InputEvent::Quit => Event::SystemControl(SystemControl::Quit),
        }
    }
}
