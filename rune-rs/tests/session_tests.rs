//! End-to-end tests of the session loop against recording test doubles.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::mpsc;

use rune::bridge::{ConnectFuture, Display, NetEvent, Network, PaneOp, UiConfig};
use rune::error::{BootError, NetError};
use rune::event::{Event, InputEvent, Job, SystemControl};
use rune::session::{BootConfig, Collaborators, Session};

// ── Test doubles ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rec {
    Line(String),
    Echo(String),
    Prompt(String),
    Status(String),
    Input(String),
    Config(UiConfig),
    Other,
}

#[derive(Clone, Default)]
struct RecordingDisplay {
    log: Rc<RefCell<Vec<Rec>>>,
}

impl RecordingDisplay {
    fn take(&self) -> Vec<Rec> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    fn lines(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|r| match r {
                Rec::Line(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Display for RecordingDisplay {
    fn render_line(&mut self, text: &str) {
        self.log.borrow_mut().push(Rec::Line(text.into()));
    }
    fn render_echo(&mut self, text: &str) {
        self.log.borrow_mut().push(Rec::Echo(text.into()));
    }
    fn render_prompt(&mut self, text: &str) {
        self.log.borrow_mut().push(Rec::Prompt(text.into()));
    }
    fn set_status(&mut self, text: &str) {
        self.log.borrow_mut().push(Rec::Status(text.into()));
    }
    fn set_infobar(&mut self, _: &str) {
        self.log.borrow_mut().push(Rec::Other);
    }
    fn set_input(&mut self, text: &str) {
        self.log.borrow_mut().push(Rec::Input(text.into()));
    }
    fn pane(&mut self, _: PaneOp) {
        self.log.borrow_mut().push(Rec::Other);
    }
    fn show_picker(&mut self, _: &str, _: &[String]) {
        self.log.borrow_mut().push(Rec::Other);
    }
    fn apply_config(&mut self, config: &UiConfig) {
        self.log.borrow_mut().push(Rec::Config(config.clone()));
    }
}

/// Connects instantly unless the address starts with "bad"; records sends.
#[derive(Clone, Default)]
struct MockNetwork {
    sent: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<Mutex<usize>>,
    live: Arc<Mutex<bool>>,
}

impl MockNetwork {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn is_live(&self) -> bool {
        *self.live.lock().unwrap()
    }

    /// The server drops the connection.
    fn hang_up(&self) {
        *self.live.lock().unwrap() = false;
    }
}

impl Network for MockNetwork {
    fn connect(&self, address: &str) -> ConnectFuture {
        let fail = address.starts_with("bad");
        let address = address.to_owned();
        let live = Arc::clone(&self.live);
        Box::pin(async move {
            if fail {
                Err(NetError::InvalidAddress(address))
            } else {
                *live.lock().unwrap() = true;
                Ok(())
            }
        })
    }

    fn disconnect(&self) {
        *self.disconnects.lock().unwrap() += 1;
        *self.live.lock().unwrap() = false;
    }

    fn is_connected(&self) -> bool {
        self.is_live()
    }

    fn send(&self, data: &str) -> Result<(), NetError> {
        self.sent.lock().unwrap().push(data.to_owned());
        Ok(())
    }
}

struct Harness {
    session: Session,
    display: RecordingDisplay,
    network: MockNetwork,
    net_tx: mpsc::Sender<NetEvent>,
    input_tx: mpsc::Sender<InputEvent>,
    _dir: tempfile::TempDir,
}

fn build(config: BootConfig, dir: tempfile::TempDir) -> Harness {
    let display = RecordingDisplay::default();
    let network = MockNetwork::default();
    let (net_tx, net_events) = mpsc::channel(16);
    let (input_tx, input) = mpsc::channel(16);
    let session = Session::new(
        config,
        Collaborators {
            network: Arc::new(network.clone()),
            net_events,
            display: Box::new(display.clone()),
            input,
        },
    );
    Harness { session, display, network, net_tx, input_tx, _dir: dir }
}

fn harness_with(core: &[(&str, &str)], scripts: Vec<PathBuf>, dir: tempfile::TempDir) -> Harness {
    let config = BootConfig {
        config_dir: dir.path().to_path_buf(),
        core_scripts: core.iter().map(|(n, s)| (n.to_string(), s.to_string())).collect(),
        scripts,
    };
    build(config, dir)
}

/// A session with the bundled core scripts.
fn core_harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    build(BootConfig::new(dir.path().to_path_buf(), Vec::new()), dir)
}

fn harness(core: &[(&str, &str)]) -> Harness {
    harness_with(core, Vec::new(), tempfile::tempdir().unwrap())
}

fn line(text: &str) -> Event {
    Event::NetworkLine { raw: text.into(), clean: text.into() }
}

fn prompt(text: &str) -> Event {
    Event::NetworkPrompt { raw: text.into(), clean: text.into() }
}

impl Harness {
    fn handle(&mut self, ev: Event) {
        self.session.handle_event(ev);
        self.session.drain_pending();
    }

    fn eval_string(&self, expr: &str) -> String {
        self.session.runtime().unwrap().eval::<String>(expr).unwrap()
    }

    /// Connect and process the worker's result.
    async fn connect(&mut self, address: &str) {
        self.handle(Event::SystemControl(SystemControl::Connect(address.into())));
        let ev = self.connect_result().await;
        self.handle(ev);
    }

    /// Wait for the connect worker to post its outcome.
    async fn connect_result(&mut self) -> Event {
        let ev = self.session.next_event().await.unwrap();
        assert!(matches!(ev, Event::TimerFired(Job::ConnectResult { .. })), "{ev:?}");
        ev
    }

    fn log(&self) -> String {
        self.eval_string("table.concat(log, ',')")
    }
}

// ── Output and prompt ─────────────────────────────────────────────────────

#[test]
fn hidden_output_is_not_rendered() {
    let mut h = harness(&[("a", r#"rune.hooks.on("output", function(t) return t, false end)"#)]);
    h.session.boot().unwrap();
    h.display.take();
    h.handle(line("secret"));
    assert!(h.display.lines().is_empty());
}

#[test]
fn rewritten_output_is_rendered_once() {
    let mut h = harness(&[("a", r#"rune.hooks.on("output", function(t) return t:upper() end)"#)]);
    h.session.boot().unwrap();
    h.display.take();
    h.handle(line("hello"));
    assert_eq!(h.display.take(), vec![Rec::Line("HELLO".into())]);
}

#[test]
fn output_without_runtime_is_shown_raw() {
    let mut h = harness(&[]);
    h.handle(line("\x1b[1mraw\x1b[0m"));
    assert_eq!(h.display.lines(), vec!["\x1b[1mraw\x1b[0m".to_string()]);
}

#[test]
fn new_output_commits_the_pending_prompt_first() {
    let mut h = harness(&[]);
    h.session.boot().unwrap();
    h.display.take();
    h.handle(prompt("HP 10> "));
    h.handle(line("A rat arrives."));
    assert_eq!(
        h.display.take(),
        vec![
            Rec::Prompt("HP 10> ".into()),
            Rec::Line("HP 10> ".into()),
            Rec::Prompt(String::new()),
            Rec::Line("A rat arrives.".into()),
        ]
    );
    assert_eq!(h.session.host().prompt(), "");
}

#[test]
fn suppressed_prompt_is_cleared() {
    let mut h = harness(&[("a", r#"rune.hooks.on("prompt", function() return false end)"#)]);
    h.session.boot().unwrap();
    h.display.take();
    h.handle(prompt("> "));
    assert_eq!(h.display.take(), vec![Rec::Prompt(String::new())]);
}

// ── Input ─────────────────────────────────────────────────────────────────

#[test]
fn input_commits_prompt_then_runs_hooks_then_echoes() {
    let mut h = harness(&[("a", r#"rune.hooks.on("input", function(l) rune.status("saw " .. l) end)"#)]);
    h.session.boot().unwrap();
    h.handle(prompt("> "));
    h.display.take();
    h.handle(Event::UserInput("look".into()));
    assert_eq!(
        h.display.take(),
        vec![
            Rec::Line("> ".into()),
            Rec::Prompt(String::new()),
            Rec::Status("saw look".into()),
            Rec::Echo("look".into()),
        ]
    );
}

#[tokio::test]
async fn input_is_rewritten_then_sent_when_connected() {
    let mut h = harness(&[("a", r#"rune.hooks.on("input", function(l) if l == "n" then return "north" end end)"#)]);
    h.session.boot().unwrap();
    h.connect("mud.example.org:4000").await;
    h.handle(Event::UserInput("n".into()));
    h.handle(Event::UserInput("look".into()));
    assert_eq!(h.network.sent(), vec!["north".to_string(), "look".to_string()]);
    // The echo shows what was typed.
    assert!(h.display.take().contains(&Rec::Echo("n".into())));
}

#[test]
fn input_while_offline_is_not_sent() {
    let mut h = harness(&[]);
    h.session.boot().unwrap();
    h.handle(Event::UserInput("look".into()));
    assert!(h.network.sent().is_empty());
}

#[tokio::test]
async fn blocked_input_is_not_sent() {
    let mut h = harness(&[("a", r#"rune.hooks.on("input", function() return false end)"#)]);
    h.session.boot().unwrap();
    h.connect("mud:1").await;
    h.handle(Event::UserInput("secret".into()));
    assert!(h.network.sent().is_empty());
}

// ── Core scripts ──────────────────────────────────────────────────────────

#[tokio::test]
async fn slash_commands_are_not_sent() {
    let mut h = core_harness();
    h.session.boot().unwrap();
    h.connect("mud:1").await;

    h.handle(Event::UserInput("//who".into()));
    h.handle(Event::UserInput("/nosuch".into()));
    assert_eq!(h.network.sent(), vec!["/who".to_string()]);
    assert!(h.display.lines().iter().any(|l| l.contains("unknown command: /nosuch")));

    h.handle(Event::UserInput("/quit".into()));
    assert!(h.session.is_quitting());
}

#[test]
fn history_navigation_through_bound_keys() {
    let mut h = core_harness();
    h.session.boot().unwrap();
    let config = h.session.runtime().unwrap().ui_config();
    assert!(config.bound_keys.contains(&"up".to_string()));
    assert!(config.bound_keys.contains(&"tab".to_string()));

    h.handle(Event::UserInput("look".into()));
    h.handle(Event::UserInput("score".into()));
    assert_eq!(h.session.host().history(), vec!["look".to_string(), "score".to_string()]);

    h.display.take();
    h.handle(Event::KeyPressed { key: "up".into(), buffer: "dra".into() });
    h.handle(Event::KeyPressed { key: "up".into(), buffer: "score".into() });
    h.handle(Event::KeyPressed { key: "down".into(), buffer: "look".into() });
    h.handle(Event::KeyPressed { key: "down".into(), buffer: "score".into() });
    assert_eq!(
        h.display.take(),
        vec![
            Rec::Input("score".into()),
            Rec::Input("look".into()),
            Rec::Input("score".into()),
            Rec::Input("dra".into()),
        ]
    );
}

#[test]
fn tab_completes_words_seen_in_output() {
    let mut h = core_harness();
    h.session.boot().unwrap();
    h.handle(line("A fireball explodes"));
    h.display.take();
    h.handle(Event::KeyPressed { key: "tab".into(), buffer: "cast fir".into() });
    assert_eq!(h.display.take(), vec![Rec::Input("cast fireball".into())]);
}

// ── Boot and reload ───────────────────────────────────────────────────────

#[test]
fn boot_failure_skips_the_remaining_steps() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.lua");
    let good = dir.path().join("good.lua");
    std::fs::write(&bad, "this is not lua").unwrap();
    std::fs::write(&good, "loaded_good = true").unwrap();
    let mut h = harness_with(
        &[("a", r#"rune.hooks.on("ready", function() ready = true end)"#)],
        vec![bad, good],
        dir,
    );

    let err = h.session.boot().unwrap_err();
    assert!(matches!(&err, BootError::Load { name, .. } if name.ends_with("bad.lua")), "{err}");
    let rt = h.session.runtime().unwrap();
    assert_eq!(rt.eval::<Option<bool>>("loaded_good").unwrap(), None);
    assert_eq!(rt.eval::<Option<bool>>("ready").unwrap(), None);
    // The front end still hears about bindings and layout.
    assert!(h.display.take().iter().any(|r| matches!(r, Rec::Config(_))));
}

#[test]
fn init_lua_runs_after_core_scripts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("init.lua"), r#"order = order .. ",init""#).unwrap();
    let mut h = harness_with(
        &[("20_b", r#"order = order .. ",b""#), ("10_a", r#"order = "a""#)],
        Vec::new(),
        dir,
    );
    h.session.boot().unwrap();
    assert_eq!(h.eval_string("order"), "a,b,init");
}

#[test]
fn reload_replaces_the_runtime_and_fires_hooks() {
    let mut h = harness(&[(
        "a",
        r#"
        boots = (boots or 0) + 1
        rune.hooks.on("reloading", function() rune.status("reloading") end)
        rune.hooks.on("reloaded", function() rune.status("reloaded") end)
        "#,
    )]);
    h.session.boot().unwrap();
    assert_eq!(h.session.generation(), 1);
    h.display.take();

    h.handle(Event::SystemControl(SystemControl::Reload));
    assert_eq!(h.session.generation(), 2);
    // A fresh interpreter: globals from the old one are gone.
    assert_eq!(h.session.runtime().unwrap().eval::<i64>("boots").unwrap(), 1);
    let statuses: Vec<Rec> = h.display.take().into_iter().filter(|r| matches!(r, Rec::Status(_))).collect();
    assert_eq!(statuses, vec![Rec::Status("reloading".into()), Rec::Status("reloaded".into())]);
}

#[tokio::test(start_paused = true)]
async fn reload_cancels_old_timers_and_restarts_handles() {
    let mut h = harness(&[("a", r#"h = rune.timer.after(1, function() rune.print("fired") end)"#)]);
    h.session.start_workers().unwrap();
    h.session.boot().unwrap();
    assert_eq!(h.session.runtime().unwrap().eval::<i64>("h").unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.handle(Event::SystemControl(SystemControl::Reload));
    assert_eq!(h.session.runtime().unwrap().eval::<i64>("h").unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    while let Ok(Some(ev)) =
        tokio::time::timeout(Duration::from_millis(50), h.session.next_event()).await
    {
        h.handle(ev);
    }
    let fired = h.display.lines().iter().filter(|l| *l == "fired").count();
    assert_eq!(fired, 1);
    assert_eq!(h.session.runtime().unwrap().live_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn repeating_timer_fires_until_cancelled() {
    let mut h = harness(&[(
        "a",
        r#"
        n = 0
        h = rune.timer.every(1, function()
          n = n + 1
          if n == 3 then rune.timer.cancel(h) end
        end)
        "#,
    )]);
    h.session.start_workers().unwrap();
    h.session.boot().unwrap();

    tokio::time::sleep(Duration::from_millis(5500)).await;
    while let Ok(Some(ev)) =
        tokio::time::timeout(Duration::from_millis(50), h.session.next_event()).await
    {
        h.handle(ev);
    }
    assert_eq!(h.session.runtime().unwrap().eval::<i64>("n").unwrap(), 3);
    assert_eq!(h.session.runtime().unwrap().live_timers(), 0);
}

// ── Connection lifecycle ──────────────────────────────────────────────────

const LIFECYCLE_LOG: &str = r#"
log = {}
for _, ev in ipairs({ "connecting", "connected", "disconnecting", "disconnected" }) do
  rune.hooks.on(ev, function(arg)
    table.insert(log, arg and (ev .. " " .. arg) or ev)
  end)
end
"#;

#[tokio::test]
async fn connect_and_disconnect_fire_hooks_in_order() {
    let mut h = harness(&[("a", LIFECYCLE_LOG)]);
    h.session.boot().unwrap();
    h.connect("mud:4000").await;
    let state = h.session.host().state();
    assert!(state.connected);
    assert_eq!(state.address.as_deref(), Some("mud:4000"));

    h.handle(Event::SystemControl(SystemControl::Disconnect));
    assert!(!h.session.host().is_connected());
    assert_eq!(*h.network.disconnects.lock().unwrap(), 1);
    assert_eq!(
        h.eval_string("table.concat(log, ',')"),
        "connecting mud:4000,connected mud:4000,disconnecting,disconnected"
    );
}

#[tokio::test]
async fn failed_connect_is_reported() {
    let mut h = harness(&[("a", LIFECYCLE_LOG)]);
    h.session.boot().unwrap();
    h.connect("bad-host").await;
    assert!(!h.session.host().is_connected());
    assert!(h.display.lines().iter().any(|l| l.starts_with("error: connect bad-host")));
    assert_eq!(h.eval_string("table.concat(log, ',')"), "connecting bad-host");
}

#[tokio::test]
async fn remote_close_fires_disconnected_once() {
    let mut h = harness(&[("a", LIFECYCLE_LOG)]);
    h.session.boot().unwrap();
    h.connect("mud:1").await;
    h.handle(Event::NetworkClosed);
    h.handle(Event::NetworkClosed);
    assert_eq!(
        h.eval_string("table.concat(log, ',')"),
        "connecting mud:1,connected mud:1,disconnected"
    );
}

#[tokio::test]
async fn disconnect_during_connect_drops_the_late_result() {
    let mut h = harness(&[("a", LIFECYCLE_LOG)]);
    h.session.boot().unwrap();
    h.handle(Event::SystemControl(SystemControl::Connect("mud:1".into())));
    h.handle(Event::SystemControl(SystemControl::Disconnect));
    let result = h.connect_result().await;
    h.handle(result);

    assert!(!h.session.host().is_connected());
    assert!(!h.network.is_live());
    assert_eq!(h.log(), "connecting mud:1,disconnecting,disconnected");
}

#[tokio::test]
async fn only_the_latest_connect_request_connects() {
    let mut h = harness(&[("a", LIFECYCLE_LOG)]);
    h.session.boot().unwrap();
    h.handle(Event::SystemControl(SystemControl::Connect("mud:1".into())));
    h.handle(Event::SystemControl(SystemControl::Connect("mud:2".into())));
    for _ in 0..2 {
        let result = h.connect_result().await;
        h.handle(result);
    }

    assert_eq!(h.session.host().state().address.as_deref(), Some("mud:2"));
    assert_eq!(h.log(), "connecting mud:1,connecting mud:2,connected mud:2");
}

#[tokio::test]
async fn close_before_connect_result_still_ends_disconnected() {
    let mut h = harness(&[("a", LIFECYCLE_LOG)]);
    h.session.boot().unwrap();
    h.handle(Event::SystemControl(SystemControl::Connect("mud:1".into())));
    let result = h.connect_result().await;
    h.network.hang_up();
    h.handle(Event::NetworkClosed);
    h.handle(result);

    assert!(!h.session.host().is_connected());
    assert_eq!(h.log(), "connecting mud:1,connected mud:1,disconnected");
}

// ── Relays and the run loop ───────────────────────────────────────────────

#[tokio::test]
async fn relays_feed_the_shared_queue() {
    let mut h = harness(&[]);
    h.session.start_workers().unwrap();
    assert!(h.session.start_workers().is_err());

    h.net_tx.send(NetEvent::Line("\x1b[31mred\x1b[0m".into())).await.unwrap();
    h.input_tx.send(InputEvent::Line("look".into())).await.unwrap();

    let mut got = Vec::new();
    for _ in 0..2 {
        got.push(h.session.next_event().await.unwrap());
    }
    assert!(got.contains(&Event::NetworkLine {
        raw: "\x1b[31mred\x1b[0m".into(),
        clean: "red".into()
    }));
    assert!(got.contains(&Event::UserInput("look".into())));
}

#[tokio::test]
async fn run_exits_when_input_closes() {
    let h = harness(&[("a", r#"rune.print("booted")"#)]);
    let Harness { session, display, input_tx, .. } = h;
    drop(input_tx);
    session.run().await.unwrap();
    assert!(display.lines().contains(&"booted".to_string()));
}

#[tokio::test]
async fn requested_connect_runs_after_boot() {
    let h = harness(&[(
        "a",
        r#"rune.hooks.on("connected", function(addr) rune.status("up " .. addr); rune.quit() end)"#,
    )]);
    let Harness { session, display, network, input_tx: _input_tx, .. } = h;
    session.request(SystemControl::Connect("mud:9".into()));
    session.run().await.unwrap();
    assert!(display.take().contains(&Rec::Status("up mud:9".into())));
    assert_eq!(*network.disconnects.lock().unwrap(), 0);
}

// ── Properties ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Net {
    Line(String),
    Prompt(String),
}

fn net_event() -> impl Strategy<Value = Net> {
    prop_oneof![
        "[a-z ]{0,6}".prop_map(Net::Line),
        "[a-z>]{0,4}".prop_map(Net::Prompt),
    ]
}

proptest! {
    /// Every non-empty prompt reaches scrollback exactly once, right before
    /// whatever arrived after it, and the last one stays pending.
    #[test]
    fn prompts_are_committed_before_later_output(events in prop::collection::vec(net_event(), 0..20)) {
        let mut h = harness(&[]);
        h.session.boot().unwrap();
        h.display.take();

        let mut expected = Vec::new();
        let mut pending = String::new();
        for ev in &events {
            if !pending.is_empty() {
                expected.push(std::mem::take(&mut pending));
            }
            match ev {
                Net::Line(text) => {
                    expected.push(text.clone());
                    h.handle(line(text));
                }
                Net::Prompt(text) => {
                    pending = text.clone();
                    h.handle(prompt(text));
                }
            }
        }
        prop_assert_eq!(h.display.lines(), expected);
        prop_assert_eq!(h.session.host().prompt(), pending);
    }
}
