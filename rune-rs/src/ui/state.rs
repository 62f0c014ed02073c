//! Everything the front end shows, independent of the terminal.
//!
//! [`UiState::apply`] folds display commands from the session into the
//! model; [`UiState::handle_key`] turns key presses into edits or into
//! [`InputEvent`]s for the session.  Rendering reads the model and never
//! writes it.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::bridge::{Layout, PaneOp, UiConfig};
use crate::event::InputEvent;

use super::editor::LineEditor;

/// Scrollback lines kept before the oldest is dropped.
pub const SCROLLBACK_MAX: usize = 5000;
/// Lines kept per pane.
pub const PANE_MAX: usize = 200;
/// Rows a visible pane occupies below its title.
pub const PANE_HEIGHT: usize = 5;

/// What the session asks the front end to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Line(String),
    Echo(String),
    Prompt(String),
    Status(String),
    Infobar(String),
    Input(String),
    Pane(PaneOp),
    Picker { title: String, items: Vec<String> },
    Config(UiConfig),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Output,
    Echo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollLine {
    pub text: String,
    pub kind: LineKind,
}

#[derive(Debug, Default)]
pub struct Pane {
    pub lines: VecDeque<String>,
    pub visible: bool,
}

impl Pane {
    fn push(&mut self, text: &str) {
        for line in text.split('\n') {
            if self.lines.len() == PANE_MAX {
                self.lines.pop_front();
            }
            self.lines.push_back(line.to_owned());
        }
    }
}

#[derive(Debug)]
pub struct Picker {
    pub title: String,
    pub items: Vec<String>,
    pub selected: usize,
}

#[derive(Debug)]
pub struct UiState {
    pub scrollback: VecDeque<ScrollLine>,
    /// Lines scrolled back from the bottom; 0 follows new output.
    pub scroll: usize,
    pub prompt: String,
    pub status: String,
    pub infobar: String,
    pub editor: LineEditor,
    pub panes: BTreeMap<String, Pane>,
    pub layout: Layout,
    pub picker: Option<Picker>,
    bound: HashSet<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

impl UiState {
    pub fn new() -> Self {
        Self {
            scrollback: VecDeque::new(),
            scroll: 0,
            prompt: String::new(),
            status: String::new(),
            infobar: String::new(),
            editor: LineEditor::new(),
            panes: BTreeMap::new(),
            layout: Layout::default(),
            picker: None,
            bound: HashSet::new(),
        }
    }

    fn push_line(&mut self, text: String, kind: LineKind) {
        if self.scrollback.len() == SCROLLBACK_MAX {
            self.scrollback.pop_front();
        }
        self.scrollback.push_back(ScrollLine { text, kind });
        if self.scroll > 0 {
            // Keep the viewport on the same lines while scrolled back.
            self.scroll = (self.scroll + 1).min(self.scrollback.len());
        }
    }

    /// Fold one command into the model.  Returns `false` on shutdown.
    pub fn apply(&mut self, cmd: UiCommand) -> bool {
        match cmd {
            UiCommand::Line(text) => self.push_line(text, LineKind::Output),
            UiCommand::Echo(text) => self.push_line(text, LineKind::Echo),
            UiCommand::Prompt(text) => self.prompt = text,
            UiCommand::Status(text) => self.status = text,
            UiCommand::Infobar(text) => self.infobar = text,
            UiCommand::Input(text) => self.editor.set_text(&text),
            UiCommand::Pane(op) => self.pane(op),
            UiCommand::Picker { title, items } => {
                self.picker = Some(Picker { title, items, selected: 0 });
            }
            UiCommand::Config(config) => {
                self.bound = config.bound_keys.into_iter().collect();
                self.layout = config.layout;
            }
            UiCommand::Shutdown => return false,
        }
        true
    }

    fn pane(&mut self, op: PaneOp) {
        match op {
            PaneOp::Create(name) => {
                self.panes.entry(name).or_default().visible = true;
            }
            PaneOp::Write { name, text } => {
                let pane = self.panes.entry(name).or_insert_with(|| Pane {
                    visible: true,
                    ..Pane::default()
                });
                pane.push(&text);
            }
            PaneOp::Toggle(name) => {
                let pane = self.panes.entry(name).or_default();
                pane.visible = !pane.visible;
            }
            PaneOp::Clear(name) => {
                if let Some(pane) = self.panes.get_mut(&name) {
                    pane.lines.clear();
                }
            }
        }
    }

    pub fn is_bound(&self, key: &str) -> bool {
        self.bound.contains(key)
    }

    /// Text shown in the bar called `name`.  `status` and `infobar` are the
    /// script-set texts; any other name shows the tail of that pane.
    pub fn bar_text(&self, name: &str) -> String {
        match name {
            "status" => self.status.clone(),
            "infobar" => self.infobar.clone(),
            other => self
                .panes
                .get(other)
                .and_then(|p| p.lines.back().cloned())
                .unwrap_or_default(),
        }
    }

    /// Apply a key press.  Returns the event to send to the session, if any.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<InputEvent> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Some(InputEvent::Quit);
        }
        if self.picker.is_some() {
            return self.picker_key(key);
        }
        let name = key_name(&key);
        if let Some(name) = name.filter(|n| self.is_bound(n)) {
            return Some(InputEvent::Key { key: name, buffer: self.editor.text() });
        }
        self.edit_key(key)
    }

    fn picker_key(&mut self, key: KeyEvent) -> Option<InputEvent> {
        let picker = self.picker.as_mut()?;
        match key.code {
            KeyCode::Up => picker.selected = picker.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Tab => {
                if picker.selected + 1 < picker.items.len() {
                    picker.selected += 1;
                }
            }
            KeyCode::Enter => {
                let choice = (!picker.items.is_empty()).then_some(picker.selected);
                self.picker = None;
                return Some(InputEvent::Picked(choice));
            }
            KeyCode::Esc => {
                self.picker = None;
                return Some(InputEvent::Picked(None));
            }
            _ => {}
        }
        None
    }

    fn edit_key(&mut self, key: KeyEvent) -> Option<InputEvent> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let ed = &mut self.editor;
        match key.code {
            KeyCode::Enter => {
                self.scroll = 0;
                return Some(InputEvent::Line(ed.take_line()));
            }
            KeyCode::Char('a') if ctrl => ed.move_home(),
            KeyCode::Char('e') if ctrl => ed.move_end(),
            KeyCode::Char('u') if ctrl => ed.kill_to_start(),
            KeyCode::Char('k') if ctrl => ed.kill_to_end(),
            KeyCode::Char('w') if ctrl => ed.kill_word_backward(),
            KeyCode::Char('y') if ctrl => ed.yank(),
            KeyCode::Char(_) if ctrl => {}
            KeyCode::Char(c) => ed.insert_char(c),
            KeyCode::Backspace => {
                ed.delete_before();
            }
            KeyCode::Delete => {
                ed.delete_at();
            }
            KeyCode::Left => ed.move_left(),
            KeyCode::Right => ed.move_right(),
            KeyCode::Home => ed.move_home(),
            KeyCode::End => ed.move_end(),
            KeyCode::PageUp => {
                self.scroll = (self.scroll + 10).min(self.scrollback.len().saturating_sub(1));
            }
            KeyCode::PageDown => self.scroll = self.scroll.saturating_sub(10),
            _ => {}
        }
        None
    }
}

/// Name a key press the way scripts bind it: `up`, `tab`, `f5`,
/// `ctrl+r`, `alt+shift+left`.  Plain characters are named by themselves.
pub fn key_name(key: &KeyEvent) -> Option<String> {
    let base = match key.code {
        KeyCode::Char(' ') => "space".to_owned(),
        KeyCode::Char(c) if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
            c.to_lowercase().collect()
        }
        KeyCode::Char(c) => return Some(c.to_string()),
        KeyCode::Up => "up".to_owned(),
        KeyCode::Down => "down".to_owned(),
        KeyCode::Left => "left".to_owned(),
        KeyCode::Right => "right".to_owned(),
        KeyCode::Home => "home".to_owned(),
        KeyCode::End => "end".to_owned(),
        KeyCode::PageUp => "pageup".to_owned(),
        KeyCode::PageDown => "pagedown".to_owned(),
        KeyCode::Tab => "tab".to_owned(),
        KeyCode::BackTab => "shift+tab".to_owned(),
        KeyCode::Enter => "enter".to_owned(),
        KeyCode::Esc => "esc".to_owned(),
        KeyCode::Backspace => "backspace".to_owned(),
        KeyCode::Delete => "delete".to_owned(),
        KeyCode::Insert => "insert".to_owned(),
        KeyCode::F(n) => format!("f{n}"),
        _ => return None,
    };
    let mut name = String::new();
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        name.push_str("ctrl+");
    }
    if key.modifiers.contains(KeyModifiers::ALT) {
        name.push_str("alt+");
    }
    let shifted_char = matches!(key.code, KeyCode::Char(_) | KeyCode::BackTab);
    if key.modifiers.contains(KeyModifiers::SHIFT) && !shifted_char {
        name.push_str("shift+");
    }
    name.push_str(&base);
    Some(name)
}
