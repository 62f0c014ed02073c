//! The interactive terminal front end.
//!
//! The front end runs on its own OS thread: crossterm's key polling blocks,
//! and the session's consumer thread must never wait on the terminal.  The
//! session talks to it through [`TerminalHandle`], which implements
//! [`Display`] by forwarding [`UiCommand`]s over an unbounded channel.  Key
//! presses travel back as [`InputEvent`]s on the interactive-input channel.

pub mod editor;
pub mod state;
pub mod terminal;

use std::io;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self as ct, Event as CtEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::{Display, PaneOp, UiConfig};
use crate::event::InputEvent;

pub use state::{UiCommand, UiState};
use terminal::RawModeGuard;

/// How long the front end waits for a key before checking for commands.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The session's side of the front end.
#[derive(Debug, Clone)]
pub struct TerminalHandle {
    tx: std_mpsc::Sender<UiCommand>,
}

impl TerminalHandle {
    pub fn new(tx: std_mpsc::Sender<UiCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, cmd: UiCommand) {
        if self.tx.send(cmd).is_err() {
            debug!(target: "ui", "front end gone; dropping display command");
        }
    }
}

impl Display for TerminalHandle {
    fn render_line(&mut self, text: &str) {
        self.send(UiCommand::Line(text.to_owned()));
    }

    fn render_echo(&mut self, text: &str) {
        self.send(UiCommand::Echo(text.to_owned()));
    }

    fn render_prompt(&mut self, text: &str) {
        self.send(UiCommand::Prompt(text.to_owned()));
    }

    fn set_status(&mut self, text: &str) {
        self.send(UiCommand::Status(text.to_owned()));
    }

    fn set_infobar(&mut self, text: &str) {
        self.send(UiCommand::Infobar(text.to_owned()));
    }

    fn set_input(&mut self, text: &str) {
        self.send(UiCommand::Input(text.to_owned()));
    }

    fn pane(&mut self, op: PaneOp) {
        self.send(UiCommand::Pane(op));
    }

    fn show_picker(&mut self, title: &str, items: &[String]) {
        self.send(UiCommand::Picker { title: title.to_owned(), items: items.to_vec() });
    }

    fn apply_config(&mut self, config: &UiConfig) {
        self.send(UiCommand::Config(config.clone()));
    }
}

/// Owns the front-end thread.  Dropping it without [`TerminalUi::shutdown`]
/// leaves the thread to exit when the session side hangs up.
pub struct TerminalUi {
    tx: std_mpsc::Sender<UiCommand>,
    thread: Option<JoinHandle<()>>,
}

impl TerminalUi {
    /// Enter raw mode and start the front-end thread.  Key events are sent
    /// to `input`.
    pub fn start(input: mpsc::Sender<InputEvent>) -> io::Result<(Self, TerminalHandle)> {
        let guard = RawModeGuard::enter()?;
        let (tx, rx) = std_mpsc::channel();
        let thread = thread::Builder::new()
            .name("rune-ui".into())
            .spawn(move || front_end(rx, input, guard))?;
        let handle = TerminalHandle::new(tx.clone());
        Ok((Self { tx, thread: Some(thread) }, handle))
    }

    /// Stop the thread and restore the terminal.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(UiCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(target: "ui", "front-end thread panicked");
            }
        }
    }
}

fn front_end(
    rx: std_mpsc::Receiver<UiCommand>,
    input: mpsc::Sender<InputEvent>,
    _guard: RawModeGuard,
) {
    let mut state = UiState::new();
    let mut out = io::stdout();
    let (mut width, mut height) = crossterm::terminal::size().unwrap_or((80, 24));
    let mut dirty = true;

    loop {
        loop {
            match rx.try_recv() {
                Ok(cmd) => {
                    if !state.apply(cmd) {
                        return;
                    }
                    dirty = true;
                }
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => return,
            }
        }

        if dirty {
            if let Err(e) = terminal::draw(&mut out, &state, width, height) {
                warn!(target: "ui", "redraw failed: {e}");
            }
            dirty = false;
        }

        let event = match ct::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => ct::read(),
            Err(e) => Err(e),
        };
        match event {
            Ok(CtEvent::Key(key)) => {
                dirty = true;
                if let Some(ev) = state.handle_key(key) {
                    if input.blocking_send(ev).is_err() {
                        return;
                    }
                }
            }
            Ok(CtEvent::Resize(w, h)) => {
                width = w;
                height = h;
                dirty = true;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "ui", "terminal input failed: {e}");
                let _ = input.blocking_send(InputEvent::Quit);
                return;
            }
        }
    }
}
