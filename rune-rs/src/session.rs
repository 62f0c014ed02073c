//! The session: single owner of the event queue and the script runtime.
//!
//! ```text
//!          ┌───────────── relays (tokio tasks, producers only) ─────────────┐
//!  NetEvent ──► network relay ─┐                                            │
//! InputEvent ──► input relay  ─┼──► bounded Event queue ──► Session::run ──► ExtensionRuntime
//!       Job ──► timer relay   ─┘                              ▲  │
//!                                                             │  └── Host::pending (local)
//!                      connect worker (one per connect) ──────┘
//! ```
//!
//! [`Session::run`] starts the relays, boots the runtime, then processes one
//! event at a time until quit.  Events raised while handling an event (a
//! script printing, asking to reload, ...) go to the host's local queue and
//! are handled before the next event from the shared queue, so a script can
//! never block on the bounded queue it is being fed from.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::{Display, Host, NetEvent, Network};
use crate::embedded::CORE_SCRIPTS;
use crate::error::{BootError, SessionError};
use crate::event::{self, Event, EventReceiver, EventSender, InputEvent, Job, SystemControl, QUEUE_CAPACITY};
use crate::hook::Hook;
use crate::net::strip_ansi;
use crate::runtime::ExtensionRuntime;
use crate::timer::TimerScheduler;

// ── Configuration ─────────────────────────────────────────────────────────

/// Static boot inputs, replayed verbatim on every reload.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub config_dir: PathBuf,
    /// Bundled scripts as `(name, source)`; loaded sorted by name.
    pub core_scripts: Vec<(String, String)>,
    /// Extra script paths, loaded in order after `init.lua`.
    pub scripts: Vec<PathBuf>,
}

impl BootConfig {
    /// Boot configuration with the bundled core scripts.
    pub fn new(config_dir: PathBuf, scripts: Vec<PathBuf>) -> Self {
        let core_scripts = CORE_SCRIPTS.iter().map(|f| (f.name.to_owned(), f.content.to_owned())).collect();
        Self { config_dir, core_scripts, scripts }
    }
}

/// The external collaborators a session drives.
pub struct Collaborators {
    pub network: Arc<dyn Network>,
    /// Output of the network collaborator.
    pub net_events: mpsc::Receiver<NetEvent>,
    pub display: Box<dyn Display>,
    /// Output of the interactive front end.
    pub input: mpsc::Receiver<InputEvent>,
}

// ── Relays ────────────────────────────────────────────────────────────────

async fn network_relay(mut source: mpsc::Receiver<NetEvent>, tx: EventSender) {
    while let Some(ev) = source.recv().await {
        let event = match ev {
            NetEvent::Line(raw) => {
                let clean = strip_ansi(&raw);
                Event::NetworkLine { raw, clean }
            }
            NetEvent::Prompt(raw) => {
                let clean = strip_ansi(&raw);
                Event::NetworkPrompt { raw, clean }
            }
            NetEvent::Closed => Event::NetworkClosed,
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
    debug!(target: "session", "network relay finished");
}

async fn input_relay(mut source: mpsc::Receiver<InputEvent>, tx: EventSender) {
    while let Some(ev) = source.recv().await {
        if tx.send(ev.into()).await.is_err() {
            return;
        }
    }
    // Front end gone: nothing can drive the session any more.
    debug!(target: "session", "input closed, requesting quit");
    let _ = tx.send(Event::SystemControl(SystemControl::Quit)).await;
}

async fn timer_relay(mut source: mpsc::Receiver<Job>, tx: EventSender) {
    while let Some(job) = source.recv().await {
        if tx.send(Event::TimerFired(job)).await.is_err() {
            return;
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────

struct Sources {
    net: mpsc::Receiver<NetEvent>,
    input: mpsc::Receiver<InputEvent>,
    timers: mpsc::Receiver<Job>,
}

pub struct Session {
    config: BootConfig,
    host: Rc<Host>,
    runtime: Option<ExtensionRuntime>,
    tx: EventSender,
    rx: EventReceiver,
    sources: Option<Sources>,
    workers: JoinSet<()>,
    generation: u64,
    /// Id of the most recent connection request.
    attempt: u64,
    /// The attempt whose result is still awaited, if any.
    pending_attempt: Option<u64>,
    quit: bool,
}

impl Session {
    /// Wire up a session.  Nothing runs until [`Session::run`] (or
    /// [`Session::start_workers`]).
    pub fn new(config: BootConfig, collab: Collaborators) -> Self {
        let (tx, rx) = event::queue();
        let (timer_tx, timer_rx) = mpsc::channel(QUEUE_CAPACITY);
        let host = Rc::new(Host::new(
            collab.display,
            collab.network,
            TimerScheduler::new(timer_tx),
            config.config_dir.clone(),
        ));
        Self {
            config,
            host,
            runtime: None,
            tx,
            rx,
            sources: Some(Sources { net: collab.net_events, input: collab.input, timers: timer_rx }),
            workers: JoinSet::new(),
            generation: 0,
            attempt: 0,
            pending_attempt: None,
            quit: false,
        }
    }

    pub fn host(&self) -> &Rc<Host> {
        &self.host
    }

    pub fn runtime(&self) -> Option<&ExtensionRuntime> {
        self.runtime.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    /// Start the three relays.  Fails if they were already started.
    pub fn start_workers(&mut self) -> Result<(), SessionError> {
        let sources = self.sources.take().ok_or(SessionError::AlreadyRan)?;
        self.workers.spawn(network_relay(sources.net, self.tx.clone()));
        self.workers.spawn(input_relay(sources.input, self.tx.clone()));
        self.workers.spawn(timer_relay(sources.timers, self.tx.clone()));
        debug!(target: "session", "relays started");
        Ok(())
    }

    /// Queue a lifecycle request, handled before anything on the shared queue.
    pub fn request(&self, control: SystemControl) {
        self.host.post(Event::SystemControl(control));
    }

    /// Start the relays, boot, and process events until quit.
    pub async fn run(mut self) -> Result<(), SessionError> {
        self.start_workers()?;
        if let Err(e) = self.boot() {
            error!(target: "session", "boot failed: {e}");
            self.host.display().render_line(&format!("boot error: {e}"));
        }
        info!(target: "session", "entering event loop");
        while !self.quit {
            let Some(ev) = self.next_event().await else { break };
            self.handle_event(ev);
        }
        info!(target: "session", "session finished");
        Ok(())
    }

    /// Next event: locally raised ones first, then the shared queue.
    pub async fn next_event(&mut self) -> Option<Event> {
        if let Some(ev) = self.host.take_pending() {
            return Some(ev);
        }
        self.rx.recv().await
    }

    /// Handle every locally raised event.
    pub fn drain_pending(&mut self) {
        while !self.quit {
            let Some(ev) = self.host.take_pending() else { break };
            self.handle_event(ev);
        }
    }

    // ── Boot ──────────────────────────────────────────────────────────────

    /// Replace the runtime with a fresh one and replay the boot sequence.
    ///
    /// The new runtime becomes current before any script loads, so a failed
    /// step leaves it active with whatever loaded so far.
    pub fn boot(&mut self) -> Result<(), BootError> {
        if let Some(old) = self.runtime.take() {
            old.cancel_all_timers();
        }
        self.generation += 1;
        info!(target: "session", generation = self.generation, "booting script runtime");

        let rt = ExtensionRuntime::new(Rc::clone(&self.host), self.generation).map_err(BootError::Runtime)?;
        rt.set_config_dir(&self.config.config_dir).map_err(BootError::Runtime)?;
        let rt = self.runtime.insert(rt);

        let result = Self::load_scripts(rt, &self.config);
        if result.is_ok() {
            rt.call_hook(Hook::Ready.name(), ());
        }
        // Bindings and layout may have changed even if a step failed.
        let ui = rt.ui_config();
        self.host.on_config_change(&ui);
        result
    }

    fn load_scripts(rt: &ExtensionRuntime, config: &BootConfig) -> Result<(), BootError> {
        let mut core: Vec<&(String, String)> = config.core_scripts.iter().collect();
        core.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, source) in core {
            rt.load_source(name, source).map_err(|source| BootError::Load { name: name.clone(), source })?;
        }

        let init = config.config_dir.join("init.lua");
        if init.is_file() {
            rt.load_file(&init).map_err(|source| BootError::Load { name: "init.lua".into(), source })?;
        } else {
            debug!(target: "session", "no {}", init.display());
        }

        for path in &config.scripts {
            rt.load_file(path)
                .map_err(|source| BootError::Load { name: path.display().to_string(), source })?;
        }
        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    fn call_hook(&self, hook: Hook, args: impl mlua::IntoLuaMulti) {
        if let Some(rt) = &self.runtime {
            rt.call_hook(hook.name(), args);
        }
    }

    /// Flush an uncommitted prompt into scrollback.
    fn commit_prompt(&self) {
        let prompt = self.host.prompt();
        if prompt.is_empty() {
            return;
        }
        self.host.set_prompt(String::new());
        let mut display = self.host.display();
        display.render_line(&prompt);
        display.render_prompt("");
    }

    /// Apply one event.  Runs scripts synchronously.
    pub fn handle_event(&mut self, ev: Event) {
        trace!(target: "session", ?ev, "event");
        match ev {
            Event::NetworkLine { raw, clean } => {
                self.commit_prompt();
                let (text, show) = match &self.runtime {
                    Some(rt) => rt.on_output(&raw, &clean),
                    None => (raw, true),
                };
                if show {
                    self.host.display().render_line(&text);
                }
            }
            Event::NetworkPrompt { raw, clean } => {
                self.commit_prompt();
                let text = match &self.runtime {
                    Some(rt) => rt.on_prompt(&raw, &clean),
                    None => raw,
                };
                self.host.set_prompt(text.clone());
                self.host.display().render_prompt(&text);
            }
            Event::NetworkClosed => {
                if self.host.is_connected() {
                    info!(target: "session", "connection closed by remote");
                    self.host.set_connected(None);
                    self.call_hook(Hook::Disconnected, ());
                }
            }
            Event::UserInput(line) => self.submit(line),
            Event::KeyPressed { key, buffer } => {
                if let Some(rt) = &self.runtime {
                    if !rt.call_binding(&key, &buffer) {
                        debug!(target: "session", %key, "key not bound");
                    }
                }
            }
            Event::PickerSelected(choice) => {
                if let Some(rt) = &self.runtime {
                    rt.picker_select(choice);
                }
            }
            Event::DisplayLine(text) => self.host.display().render_line(&text),
            Event::DisplayEcho(text) => self.host.display().render_echo(&text),
            Event::DisplayPrompt(text) => {
                self.host.set_prompt(text.clone());
                self.host.display().render_prompt(&text);
            }
            Event::TimerFired(job) => self.run_job(job),
            Event::SystemControl(control) => self.control(control),
        }
    }

    fn submit(&mut self, line: String) {
        self.commit_prompt();
        let (allow, text) = match &self.runtime {
            Some(rt) => rt.on_input(&line),
            None => (true, line.clone()),
        };
        if self.host.local_echo() {
            self.host.display().render_echo(&line);
        }
        if !allow {
            return;
        }
        if !self.host.is_connected() {
            debug!(target: "session", "not connected, input dropped");
            return;
        }
        if let Err(e) = self.host.send(&text) {
            warn!(target: "net", "send failed: {e}");
            match &self.runtime {
                Some(rt) => rt.report_error(&format!("send: {e}")),
                None => self.host.display().render_line(&format!("send: {e}")),
            }
        }
    }

    fn run_job(&mut self, job: Job) {
        match job {
            Job::Timer { generation, handle } => {
                let fired = self.runtime.as_ref().is_some_and(|rt| rt.fire_timer(generation, handle));
                if !fired {
                    trace!(target: "timer", generation, handle, "stale timer posting dropped");
                }
            }
            Job::ConnectResult { attempt, address, error } => self.connect_finished(attempt, address, error),
            Job::Reload => match self.boot() {
                Ok(()) => {
                    info!(target: "session", generation = self.generation, "reloaded");
                    self.call_hook(Hook::Reloaded, ());
                }
                Err(e) => {
                    error!(target: "session", "reload failed: {e}");
                    self.host.display().render_line(&format!("reload error: {e}"));
                }
            },
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    fn control(&mut self, control: SystemControl) {
        match control {
            SystemControl::Quit => {
                info!(target: "session", "quit requested");
                self.quit = true;
            }
            SystemControl::Connect(address) => self.connect(address),
            SystemControl::Disconnect => self.disconnect(),
            SystemControl::Reload => {
                self.call_hook(Hook::Reloading, ());
                self.host.post(Event::TimerFired(Job::Reload));
            }
        }
    }

    /// Fire `connecting`, then connect on a worker task.  The outcome comes
    /// back as a [`Job::ConnectResult`].
    ///
    /// A newer request supersedes one still in flight; its result is dropped.
    fn connect(&mut self, address: String) {
        if self.host.is_connected() {
            self.disconnect();
        }
        self.call_hook(Hook::Connecting, address.clone());
        self.attempt += 1;
        let attempt = self.attempt;
        self.pending_attempt = Some(attempt);
        let future = self.host.network().connect(&address);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let error = future.await.err().map(|e| e.to_string());
            let _ = tx.send(Event::TimerFired(Job::ConnectResult { attempt, address, error })).await;
        });
    }

    fn connect_finished(&mut self, attempt: u64, address: String, error: Option<String>) {
        if self.pending_attempt != Some(attempt) {
            debug!(target: "session", attempt, %address, "stale connect result dropped");
            // Nothing newer is in flight, so a transport this attempt left
            // behind is unwanted.
            if error.is_none() && self.pending_attempt.is_none() && !self.host.is_connected() {
                self.host.network().disconnect();
            }
            return;
        }
        self.pending_attempt = None;

        if let Some(message) = error {
            warn!(target: "session", %address, "connect failed: {message}");
            let message = format!("connect {address}: {message}");
            match &self.runtime {
                Some(rt) => rt.report_error(&message),
                None => self.host.display().render_line(&message),
            }
            return;
        }

        // The remote end may already have hung up; its close was ignored
        // because the session was not connected yet.
        let live = self.host.network().is_connected();
        info!(target: "session", %address, "connected");
        self.host.set_connected(Some(address.clone()));
        self.call_hook(Hook::Connected, address);
        if !live {
            info!(target: "session", "connection closed by remote");
            self.host.set_connected(None);
            self.call_hook(Hook::Disconnected, ());
        }
    }

    fn disconnect(&mut self) {
        self.pending_attempt = None;
        self.call_hook(Hook::Disconnecting, ());
        self.host.network().disconnect();
        self.host.set_connected(None);
        self.call_hook(Hook::Disconnected, ());
    }
}
