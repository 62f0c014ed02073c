//! The embedded Lua runtime: one interpreter plus everything scripts have
//! registered with it.
//!
//! An [`ExtensionRuntime`] is built fresh on every boot and dropped whole on
//! reload; nothing is patched in place.  Its [`Registry`] (hooks, bindings,
//! timers, picker, caches, layout) is shared with the `rune.*` functions
//! through an `Rc<RefCell<_>>`.  Dispatch never holds a registry borrow while
//! a script runs, so callbacks are free to register or remove hooks, timers
//! and bindings.
//!
//! `Lua` is `!Send` here (mlua is built without its `send` feature), so the
//! compiler guarantees the interpreter stays on the consumer thread.

mod api;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, warn};

use crate::bridge::{Host, Layout, UiConfig};
use crate::cache::{PatternCache, WordCache};
use crate::error::ScriptError;
use crate::hook::{Hook, HookTable};
use crate::timer::TimerTable;

// ── Registry ──────────────────────────────────────────────────────────────

/// A picker waiting for the front end to report a choice.
struct PendingPick {
    items: Vec<String>,
    callback: LuaRegistryKey,
}

/// Per-runtime registrations.  Callbacks are Lua registry keys.
pub(crate) struct Registry {
    hooks: HookTable<LuaRegistryKey>,
    bindings: BTreeMap<String, LuaRegistryKey>,
    timers: TimerTable<LuaRegistryKey>,
    picker: Option<PendingPick>,
    patterns: PatternCache,
    words: WordCache,
    layout: Layout,
}

impl Registry {
    fn ui_config(&self) -> UiConfig {
        UiConfig { bound_keys: self.bindings.keys().cloned().collect(), layout: self.layout.clone() }
    }
}

/// Release registry keys we no longer reference.
fn release(lua: &Lua, keys: impl IntoIterator<Item = LuaRegistryKey>) {
    for key in keys {
        if let Err(e) = lua.remove_registry_value(key) {
            debug!(target: "scripting", "releasing callback: {e}");
        }
    }
}

/// Resolve the callbacks registered for `event`, in dispatch order.
fn callbacks(lua: &Lua, registry: &RefCell<Registry>, event: &str) -> Vec<LuaFunction> {
    let reg = registry.borrow();
    reg.hooks
        .callbacks(event)
        .filter_map(|key| lua.registry_value::<LuaFunction>(key).ok())
        .collect()
}

/// Fire `event` with `args`; every callback runs, failures are reported.
fn dispatch(lua: &Lua, host: &Host, registry: &RefCell<Registry>, event: &str, args: LuaMultiValue) {
    let is_error = event.eq_ignore_ascii_case(Hook::Error.name());
    for f in callbacks(lua, registry, event) {
        if let Err(e) = f.call::<()>(args.clone()) {
            if is_error {
                // The reporting path itself failed; nowhere left to report to.
                debug!(target: "scripting", "error hook failed: {e}");
            } else {
                report(lua, host, registry, &format!("{event} hook: {e}"));
            }
        }
    }
}

/// Report a script failure through the `error` hook.
///
/// With no `error` hook registered the message is printed instead.
fn report(lua: &Lua, host: &Host, registry: &RefCell<Registry>, message: &str) {
    warn!(target: "scripting", "{message}");
    if !registry.borrow().hooks.is_registered(Hook::Error.name()) {
        host.print(&format!("error: {message}"));
        return;
    }
    match message.into_lua_multi(lua) {
        Ok(args) => dispatch(lua, host, registry, Hook::Error.name(), args),
        Err(e) => debug!(target: "scripting", "error hook arguments: {e}"),
    }
}

/// Read and execute one script file.
fn exec_file(lua: &Lua, path: &Path) -> Result<(), ScriptError> {
    let source = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ScriptError::NotFound(path.to_path_buf())
        } else {
            ScriptError::Io { path: path.to_path_buf(), source }
        }
    })?;
    lua.load(source).set_name(format!("@{}", path.display())).exec()?;
    Ok(())
}

/// First string returned by a filter callback, or whether it returned `false`.
enum Verdict {
    Keep,
    Block,
    Replace(String, Option<bool>),
}

fn verdict(ret: LuaMultiValue) -> Verdict {
    let mut values = ret.into_iter();
    match values.next() {
        Some(LuaValue::Boolean(false)) => Verdict::Block,
        Some(LuaValue::String(s)) => {
            let flag = match values.next() {
                Some(LuaValue::Boolean(b)) => Some(b),
                _ => None,
            };
            Verdict::Replace(s.to_string_lossy(), flag)
        }
        _ => Verdict::Keep,
    }
}

// ── ExtensionRuntime ──────────────────────────────────────────────────────

pub struct ExtensionRuntime {
    lua: Lua,
    host: Rc<Host>,
    registry: Rc<RefCell<Registry>>,
    generation: u64,
}

impl ExtensionRuntime {
    /// Create an interpreter with the `rune` API installed.
    ///
    /// `generation` stamps every timer this runtime schedules so postings
    /// that outlive it can be recognised and dropped.
    pub fn new(host: Rc<Host>, generation: u64) -> Result<Self, ScriptError> {
        let lua = Lua::new();
        let registry = Rc::new(RefCell::new(Registry {
            hooks: HookTable::new(),
            bindings: BTreeMap::new(),
            timers: TimerTable::new(host.timers().clone(), generation),
            picker: None,
            patterns: PatternCache::default(),
            words: WordCache::default(),
            layout: Layout::default(),
        }));
        api::install(&lua, &host, &registry)?;
        Ok(Self { lua, host, registry, generation })
    }

    /// Expose the configuration directory as `rune.config_dir` and put it on
    /// `package.path` so `require` finds user modules.
    pub fn set_config_dir(&self, dir: &Path) -> Result<(), ScriptError> {
        let dir = dir.to_string_lossy().into_owned();
        let rune: LuaTable = self.lua.globals().get("rune")?;
        rune.set("config_dir", dir.as_str())?;

        let package: LuaTable = self.lua.globals().get("package")?;
        let path: String = package.get("path")?;
        package.set("path", format!("{dir}/?.lua;{dir}/?/init.lua;{path}"))?;
        Ok(())
    }

    /// Execute `source` under the chunk name `name`.
    pub fn load_source(&self, name: &str, source: &str) -> Result<(), ScriptError> {
        debug!(target: "scripting", "loading {name}");
        self.lua.load(source).set_name(format!("={name}")).exec()?;
        Ok(())
    }

    pub fn load_file(&self, path: &Path) -> Result<(), ScriptError> {
        debug!(target: "scripting", "loading {}", path.display());
        exec_file(&self.lua, path)
    }

    // ── Filter hooks ──────────────────────────────────────────────────────

    /// Run the `output` chain over one server line.
    ///
    /// Callbacks see `(text, clean)` where `text` is the current result
    /// (starting from `raw`) and `clean` the ANSI-free original.  Returns the
    /// text to display and whether to display it.
    pub fn on_output(&self, raw: &str, clean: &str) -> (String, bool) {
        let mut text = raw.to_owned();
        let mut show = true;
        for f in callbacks(&self.lua, &self.registry, Hook::Output.name()) {
            match f.call::<LuaMultiValue>((text.as_str(), clean)) {
                Ok(ret) => match verdict(ret) {
                    Verdict::Keep => {}
                    Verdict::Block => show = false,
                    Verdict::Replace(t, flag) => {
                        text = t;
                        show = flag.unwrap_or(true);
                    }
                },
                Err(e) => self.report_error(&format!("output hook: {e}")),
            }
        }
        (text, show)
    }

    /// Run the `prompt` chain.  An empty result means the prompt is suppressed.
    pub fn on_prompt(&self, raw: &str, clean: &str) -> String {
        let mut text = raw.to_owned();
        for f in callbacks(&self.lua, &self.registry, Hook::Prompt.name()) {
            match f.call::<LuaMultiValue>((text.as_str(), clean)) {
                Ok(ret) => match verdict(ret) {
                    Verdict::Keep => {}
                    Verdict::Block => text.clear(),
                    Verdict::Replace(t, _) => text = t,
                },
                Err(e) => self.report_error(&format!("prompt hook: {e}")),
            }
        }
        text
    }

    /// Run the `input` chain.  Returns whether default submission should
    /// proceed, and the (possibly rewritten) text.
    pub fn on_input(&self, line: &str) -> (bool, String) {
        let mut text = line.to_owned();
        let mut allow = true;
        for f in callbacks(&self.lua, &self.registry, Hook::Input.name()) {
            match f.call::<LuaMultiValue>(text.as_str()) {
                Ok(ret) => match verdict(ret) {
                    Verdict::Keep => {}
                    Verdict::Block => allow = false,
                    Verdict::Replace(t, _) => {
                        text = t;
                        allow = true;
                    }
                },
                Err(e) => self.report_error(&format!("input hook: {e}")),
            }
        }
        (allow, text)
    }

    // ── Notifications ─────────────────────────────────────────────────────

    /// Fire a lifecycle or custom hook.  Return values are ignored.
    pub fn call_hook(&self, event: &str, args: impl IntoLuaMulti) {
        match args.into_lua_multi(&self.lua) {
            Ok(args) => dispatch(&self.lua, &self.host, &self.registry, event, args),
            Err(e) => self.report_error(&format!("{event} hook arguments: {e}")),
        }
    }

    pub fn report_error(&self, message: &str) {
        report(&self.lua, &self.host, &self.registry, message);
    }

    /// Run the callback for timer `handle`.
    ///
    /// Returns `false` when the posting is stale: another runtime scheduled
    /// it, or the handle was cancelled (or already fired) in the meantime.
    pub fn fire_timer(&self, generation: u64, handle: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        let fired = {
            let mut reg = self.registry.borrow_mut();
            reg.timers.fire(handle, |key| self.lua.registry_value::<LuaFunction>(key))
        };
        let Some((callback, released)) = fired else { return false };
        release(&self.lua, released);

        let result = callback.and_then(|f| f.call::<()>(()));
        if let Err(e) = result {
            self.report_error(&format!("timer {handle}: {e}"));
        }
        true
    }

    /// Run the callback bound to `key` with the current input line.
    ///
    /// A string result replaces the input line.  Returns `false` if nothing
    /// is bound.
    pub fn call_binding(&self, key: &str, buffer: &str) -> bool {
        let callback = {
            let reg = self.registry.borrow();
            match reg.bindings.get(&key.to_ascii_lowercase()) {
                Some(k) => self.lua.registry_value::<LuaFunction>(k),
                None => return false,
            }
        };
        match callback.and_then(|f| f.call::<Option<String>>(buffer)) {
            Ok(Some(text)) => self.host.display().set_input(&text),
            Ok(None) => {}
            Err(e) => self.report_error(&format!("key {key}: {e}")),
        }
        true
    }

    /// Deliver a picker result.  `fn(item, index)` runs with a 1-based index;
    /// a cancelled picker just releases the callback.
    pub fn picker_select(&self, choice: Option<usize>) {
        let Some(pick) = self.registry.borrow_mut().picker.take() else { return };
        let selected = choice.and_then(|i| pick.items.get(i).map(|item| (item.clone(), i + 1)));
        let callback = self.lua.registry_value::<LuaFunction>(&pick.callback);
        release(&self.lua, [pick.callback]);

        let Some((item, index)) = selected else { return };
        if let Err(e) = callback.and_then(|f| f.call::<()>((item, index))) {
            self.report_error(&format!("picker: {e}"));
        }
    }

    /// Cancel every live timer.  Idempotent.
    pub fn cancel_all_timers(&self) {
        let keys = self.registry.borrow_mut().timers.cancel_all();
        release(&self.lua, keys);
    }

    pub fn live_timers(&self) -> usize {
        self.registry.borrow().timers.len()
    }

    /// Current key bindings and layout, as the front end needs them.
    pub fn ui_config(&self) -> UiConfig {
        self.registry.borrow().ui_config()
    }

    // ── Direct evaluation ─────────────────────────────────────────────────

    /// Execute a chunk (the `/lua` command).
    pub fn exec(&self, chunk: &str) -> Result<(), ScriptError> {
        self.lua.load(chunk).set_name("=eval").exec()?;
        Ok(())
    }

    /// Evaluate an expression and convert the result.
    pub fn eval<R: FromLuaMulti>(&self, expr: &str) -> Result<R, ScriptError> {
        Ok(self.lua.load(expr).set_name("=eval").eval()?)
    }
}

impl Drop for ExtensionRuntime {
    fn drop(&mut self) {
        self.cancel_all_timers();
        debug!(target: "scripting", generation = self.generation, "runtime torn down");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
