//! The `rune` global table.
//!
//! | Lua                                   | Host side                          |
//! |---------------------------------------|------------------------------------|
//! | `rune.send(text)`                     | [`Host::send`]                     |
//! | `rune.connect(addr)` / `disconnect()` | queued [`SystemControl`]           |
//! | `rune.quit()` / `rune.reload()`       | queued [`SystemControl`]           |
//! | `rune.print(text)`                    | queued display line                |
//! | `rune.load(path)`                     | executes immediately               |
//! | `rune.timer.*`                        | [`TimerTable`](crate::timer::TimerTable) |
//! | `rune.history.*`                      | host-owned history                 |
//! | `rune.hooks.*`                        | [`HookTable`](crate::hook::HookTable) |
//! | `rune.bind` / `unbind` / `layout`     | registry + [`Host::on_config_change`] |
//! | `rune.status` / `infobar` / `pane.*` / `input.set` / `pick` | display |
//! | `rune.state()`                        | [`Host::state`]                    |
//! | `rune.regex(p)`                       | [`PatternCache`](crate::cache::PatternCache) |
//! | `rune.words.*`                        | [`WordCache`](crate::cache::WordCache) |

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mlua::prelude::*;
use regex::Regex;

use super::{dispatch, exec_file, release, PendingPick, Registry};
use crate::bridge::{BarSpec, Host, PaneOp};
use crate::error::ScriptError;
use crate::event::SystemControl;
use crate::hook::{HookOptions, DEFAULT_PRIORITY};
use crate::timer::duration_from_secs;

type Shared = Rc<RefCell<Registry>>;

pub(super) fn install(lua: &Lua, host: &Rc<Host>, registry: &Shared) -> LuaResult<()> {
    let rune = lua.create_table()?;
    install_system(lua, &rune, host)?;
    install_timers(lua, &rune, registry)?;
    install_history(lua, &rune, host)?;
    install_hooks(lua, &rune, host, registry)?;
    install_ui(lua, &rune, host, registry)?;
    install_text(lua, &rune, registry)?;
    rune.set("config_dir", host.config_dir().to_string_lossy().into_owned())?;
    lua.globals().set("rune", rune)?;
    Ok(())
}

fn script_to_lua(e: ScriptError) -> LuaError {
    match e {
        ScriptError::Lua(e) => e,
        other => LuaError::external(other),
    }
}

/// Read an integer handle, treating anything else as "no handle".
fn handle_arg(value: &LuaValue) -> Option<u64> {
    match value {
        LuaValue::Integer(i) => u64::try_from(*i).ok(),
        LuaValue::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as u64),
        _ => None,
    }
}

// ── Network, display, lifecycle ───────────────────────────────────────────

fn install_system(lua: &Lua, rune: &LuaTable, host: &Rc<Host>) -> LuaResult<()> {
    // rune.send(text) → true | nil, message
    {
        let host = Rc::clone(host);
        rune.set(
            "send",
            lua.create_function(move |_, text: String| match host.send(&text) {
                Ok(()) => Ok((Some(true), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "connect",
            lua.create_function(move |_, address: String| {
                host.control(SystemControl::Connect(address));
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "disconnect",
            lua.create_function(move |_, ()| {
                host.control(SystemControl::Disconnect);
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "quit",
            lua.create_function(move |_, ()| {
                host.control(SystemControl::Quit);
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "reload",
            lua.create_function(move |_, ()| {
                host.control(SystemControl::Reload);
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "print",
            lua.create_function(move |_, text: String| {
                host.print(&text);
                Ok(())
            })?,
        )?;
    }
    // rune.load(path): relative paths resolve against the config directory.
    {
        let host = Rc::clone(host);
        rune.set(
            "load",
            lua.create_function(move |lua, path: String| {
                exec_file(lua, &host.resolve_script(&path)).map_err(script_to_lua)
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "state",
            lua.create_function(move |lua, ()| {
                let state = host.state();
                let t = lua.create_table()?;
                t.set("connected", state.connected)?;
                t.set("address", state.address)?;
                t.set("prompt", state.prompt)?;
                Ok(t)
            })?,
        )?;
    }
    Ok(())
}

// ── Timers ────────────────────────────────────────────────────────────────

fn install_timers(lua: &Lua, rune: &LuaTable, registry: &Shared) -> LuaResult<()> {
    let timer = lua.create_table()?;
    for (name, repeating) in [("after", false), ("every", true)] {
        let registry = Rc::clone(registry);
        timer.set(
            name,
            lua.create_function(move |lua, (secs, f): (f64, LuaFunction)| {
                let key = lua.create_registry_value(f)?;
                let delay = duration_from_secs(secs);
                Ok(registry.borrow_mut().timers.schedule(delay, repeating, key))
            })?,
        )?;
    }
    {
        let registry = Rc::clone(registry);
        timer.set(
            "cancel",
            lua.create_function(move |lua, handle: LuaValue| {
                let released = handle_arg(&handle).and_then(|h| registry.borrow_mut().timers.cancel(h));
                release(lua, released);
                Ok(())
            })?,
        )?;
    }
    {
        let registry = Rc::clone(registry);
        timer.set(
            "cancel_all",
            lua.create_function(move |lua, ()| {
                let released = registry.borrow_mut().timers.cancel_all();
                release(lua, released);
                Ok(())
            })?,
        )?;
    }
    rune.set("timer", timer)
}

// ── History ───────────────────────────────────────────────────────────────

fn install_history(lua: &Lua, rune: &LuaTable, host: &Rc<Host>) -> LuaResult<()> {
    let history = lua.create_table()?;
    {
        let host = Rc::clone(host);
        history.set("get", lua.create_function(move |_, ()| Ok(host.history()))?)?;
    }
    {
        let host = Rc::clone(host);
        history.set(
            "add",
            lua.create_function(move |_, entry: String| {
                host.add_history(&entry);
                Ok(())
            })?,
        )?;
    }
    rune.set("history", history)
}

// ── Hooks ─────────────────────────────────────────────────────────────────

/// Recognised options: `priority` (number) and `name` (string).  Anything
/// else, including wrongly typed values, falls back to the default.
fn hook_options(opts: Option<LuaTable>) -> LuaResult<HookOptions> {
    let Some(opts) = opts else { return Ok(HookOptions::default()) };
    let priority = match opts.get::<LuaValue>("priority")? {
        LuaValue::Integer(i) => i,
        LuaValue::Number(n) if n.is_finite() => n as i64,
        _ => DEFAULT_PRIORITY,
    };
    let name = match opts.get::<LuaValue>("name")? {
        LuaValue::String(s) => Some(s.to_string_lossy()),
        _ => None,
    };
    Ok(HookOptions { priority, name })
}

fn install_hooks(lua: &Lua, rune: &LuaTable, host: &Rc<Host>, registry: &Shared) -> LuaResult<()> {
    let hooks = lua.create_table()?;
    {
        let registry = Rc::clone(registry);
        hooks.set(
            "on",
            lua.create_function(move |lua, (event, f, opts): (String, LuaFunction, Option<LuaTable>)| {
                let opts = hook_options(opts)?;
                let key = lua.create_registry_value(f)?;
                let replaced = registry.borrow_mut().hooks.register(&event, opts, key);
                release(lua, replaced);
                Ok(())
            })?,
        )?;
    }
    {
        let registry = Rc::clone(registry);
        hooks.set(
            "off",
            lua.create_function(move |lua, (event, name): (String, String)| {
                let removed = registry.borrow_mut().hooks.remove(&event, &name);
                let found = removed.is_some();
                release(lua, removed);
                Ok(found)
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        let registry = Rc::clone(registry);
        hooks.set(
            "call",
            lua.create_function(move |lua, (event, args): (String, LuaMultiValue)| {
                dispatch(lua, &host, &registry, &event, args);
                Ok(())
            })?,
        )?;
    }
    rune.set("hooks", hooks)
}

// ── UI composition ────────────────────────────────────────────────────────

/// A layout entry is either a bar name or `{ name = ..., height = ... }`.
fn bar_spec(value: LuaValue) -> LuaResult<Option<BarSpec>> {
    Ok(match value {
        LuaValue::String(s) => Some(BarSpec::new(s.to_string_lossy())),
        LuaValue::Table(t) => match t.get::<LuaValue>("name")? {
            LuaValue::String(name) => {
                let height = match t.get::<LuaValue>("height")? {
                    LuaValue::Integer(h) => u16::try_from(h.max(1)).unwrap_or(u16::MAX),
                    LuaValue::Number(h) if h.is_finite() => h.clamp(1.0, f64::from(u16::MAX)) as u16,
                    _ => 1,
                };
                Some(BarSpec { name: name.to_string_lossy(), height })
            }
            _ => None,
        },
        _ => None,
    })
}

fn bar_list(value: LuaValue) -> LuaResult<Option<Vec<BarSpec>>> {
    let LuaValue::Table(t) = value else { return Ok(None) };
    let mut bars = Vec::new();
    for entry in t.sequence_values::<LuaValue>() {
        if let Some(bar) = bar_spec(entry?)? {
            bars.push(bar);
        }
    }
    Ok(Some(bars))
}

fn install_ui(lua: &Lua, rune: &LuaTable, host: &Rc<Host>, registry: &Shared) -> LuaResult<()> {
    // rune.bind(key, fn) / rune.unbind(key)
    {
        let host = Rc::clone(host);
        let registry = Rc::clone(registry);
        rune.set(
            "bind",
            lua.create_function(move |lua, (key, f): (String, LuaFunction)| {
                let key = key.to_ascii_lowercase();
                let callback = lua.create_registry_value(f)?;
                let config = {
                    let mut reg = registry.borrow_mut();
                    let old = reg.bindings.insert(key, callback);
                    release(lua, old);
                    reg.ui_config()
                };
                host.on_config_change(&config);
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        let registry = Rc::clone(registry);
        rune.set(
            "unbind",
            lua.create_function(move |lua, key: String| {
                let (removed, config) = {
                    let mut reg = registry.borrow_mut();
                    (reg.bindings.remove(&key.to_ascii_lowercase()), reg.ui_config())
                };
                if removed.is_some() {
                    release(lua, removed);
                    host.on_config_change(&config);
                }
                Ok(())
            })?,
        )?;
    }
    // rune.layout{ top = {...}, bottom = {...} }; an omitted side is kept.
    {
        let host = Rc::clone(host);
        let registry = Rc::clone(registry);
        rune.set(
            "layout",
            lua.create_function(move |_, spec: LuaTable| {
                let top = bar_list(spec.get("top")?)?;
                let bottom = bar_list(spec.get("bottom")?)?;
                let config = {
                    let mut reg = registry.borrow_mut();
                    if let Some(top) = top {
                        reg.layout.top = top;
                    }
                    if let Some(bottom) = bottom {
                        reg.layout.bottom = bottom;
                    }
                    reg.ui_config()
                };
                host.on_config_change(&config);
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "status",
            lua.create_function(move |_, text: String| {
                host.display().set_status(&text);
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        rune.set(
            "infobar",
            lua.create_function(move |_, text: String| {
                host.display().set_infobar(&text);
                Ok(())
            })?,
        )?;
    }

    let pane = lua.create_table()?;
    {
        let host = Rc::clone(host);
        pane.set(
            "create",
            lua.create_function(move |_, name: String| {
                host.display().pane(PaneOp::Create(name));
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        pane.set(
            "write",
            lua.create_function(move |_, (name, text): (String, String)| {
                host.display().pane(PaneOp::Write { name, text });
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        pane.set(
            "toggle",
            lua.create_function(move |_, name: String| {
                host.display().pane(PaneOp::Toggle(name));
                Ok(())
            })?,
        )?;
    }
    {
        let host = Rc::clone(host);
        pane.set(
            "clear",
            lua.create_function(move |_, name: String| {
                host.display().pane(PaneOp::Clear(name));
                Ok(())
            })?,
        )?;
    }
    rune.set("pane", pane)?;

    let input = lua.create_table()?;
    {
        let host = Rc::clone(host);
        input.set(
            "set",
            lua.create_function(move |_, text: String| {
                host.display().set_input(&text);
                Ok(())
            })?,
        )?;
    }
    rune.set("input", input)?;

    // rune.pick(title, items, fn): a newer picker replaces a pending one.
    {
        let host = Rc::clone(host);
        let registry = Rc::clone(registry);
        rune.set(
            "pick",
            lua.create_function(move |lua, (title, items, f): (String, Vec<String>, LuaFunction)| {
                let callback = lua.create_registry_value(f)?;
                host.display().show_picker(&title, &items);
                let old = registry.borrow_mut().picker.replace(PendingPick { items, callback });
                release(lua, old.map(|p| p.callback));
                Ok(())
            })?,
        )?;
    }
    Ok(())
}

// ── Text helpers ──────────────────────────────────────────────────────────

/// Compiled pattern handed to scripts by `rune.regex`.
struct Matcher(Arc<Regex>);

impl LuaUserData for Matcher {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("test", |_, this, text: String| Ok(this.0.is_match(&text)));

        // Like string.match: the captures, or the whole match if there are
        // none; nil when nothing matches.
        methods.add_method("match", |lua, this, text: String| {
            let Some(caps) = this.0.captures(&text) else {
                return Ok(LuaMultiValue::from_vec(vec![LuaValue::Nil]));
            };
            let groups: Vec<Option<regex::Match>> = if caps.len() > 1 {
                caps.iter().skip(1).collect()
            } else {
                vec![caps.get(0)]
            };
            let values = groups
                .into_iter()
                .map(|m| match m {
                    Some(m) => lua.create_string(m.as_str()).map(LuaValue::String),
                    None => Ok(LuaValue::Nil),
                })
                .collect::<LuaResult<Vec<_>>>()?;
            Ok(LuaMultiValue::from_vec(values))
        });

        methods.add_method("replace", |_, this, (text, with): (String, String)| {
            Ok(this.0.replace_all(&text, with.as_str()).into_owned())
        });

        methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| Ok(format!("regex({})", this.0.as_str())));
    }
}

fn install_text(lua: &Lua, rune: &LuaTable, registry: &Shared) -> LuaResult<()> {
    // rune.regex(pattern) → matcher | nil, message
    {
        let registry = Rc::clone(registry);
        rune.set(
            "regex",
            lua.create_function(move |_, pattern: String| match registry.borrow_mut().patterns.get(&pattern) {
                Ok(re) => Ok((Some(Matcher(re)), None)),
                Err(message) => Ok((None, Some(message))),
            })?,
        )?;
    }

    let words = lua.create_table()?;
    {
        let registry = Rc::clone(registry);
        words.set(
            "add",
            lua.create_function(move |_, text: String| {
                registry.borrow_mut().words.add_text(&text);
                Ok(())
            })?,
        )?;
    }
    {
        let registry = Rc::clone(registry);
        words.set(
            "complete",
            lua.create_function(move |_, prefix: String| Ok(registry.borrow().words.complete(&prefix)))?,
        )?;
    }
    rune.set("words", words)
}
