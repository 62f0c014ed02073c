//! Drawing [`UiState`] with crossterm.
//!
//! [`compose`] lays the screen out into rows without touching the terminal,
//! which keeps the layout rules testable.  [`draw`] then queues the rows
//! onto any writer.  Rows, top to bottom:
//!
//! ```text
//!   top bars
//!   scrollback          (whatever is left)
//!   visible panes       (title + PANE_HEIGHT rows each)
//!   picker              (when open)
//!   bottom bars
//!   prompt + input line
//! ```

use std::io::{self, Write};

use crossterm::{
    cursor, queue,
    style::{Print, PrintStyledContent, ResetColor, Stylize},
    terminal::{self, ClearType},
};

use crate::bridge::BarSpec;
use crate::net::strip_ansi;

use super::state::{LineKind, UiState, PANE_HEIGHT};

/// Picker rows shown at once (items, not counting the title).
const PICKER_ROWS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Server text; may carry ANSI sequences and is printed as-is.
    Output,
    Echo,
    Bar,
    PaneTitle,
    Plain,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub text: String,
    pub kind: RowKind,
}

impl Row {
    fn new(text: impl Into<String>, kind: RowKind) -> Self {
        Self { text: text.into(), kind }
    }
}

/// A laid-out screen: `rows.len() == height` and the cursor sits on the
/// last row at `cursor_col`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub rows: Vec<Row>,
    pub cursor_col: u16,
}

/// Pad `s` with spaces to exactly `width` chars, or truncate if too long.
pub fn pad_or_truncate(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count >= width {
        s.chars().take(width).collect()
    } else {
        let mut out = s.to_owned();
        out.extend(std::iter::repeat(' ').take(width - count));
        out
    }
}

fn bar_rows(state: &UiState, bars: &[BarSpec], width: usize, rows: &mut Vec<Row>) {
    for bar in bars {
        let text = state.bar_text(&bar.name);
        let mut lines = text.split('\n');
        for _ in 0..bar.height {
            let line = lines.next().unwrap_or("");
            rows.push(Row::new(pad_or_truncate(line, width), RowKind::Bar));
        }
    }
}

/// The input row and the cursor column within it.  When the text is wider
/// than the terminal, the window slides so the cursor stays visible.
fn input_row(state: &UiState, width: usize) -> (Row, u16) {
    let prompt = strip_ansi(&state.prompt);
    let prompt_len = prompt.chars().count();
    let chars: Vec<char> = prompt.chars().chain(state.editor.text().chars()).collect();
    let cursor = prompt_len + state.editor.pos();
    let width = width.max(1);
    let (start, col) = if cursor < width {
        (0, cursor)
    } else {
        (cursor + 1 - width, width - 1)
    };
    let text: String = chars.iter().skip(start).take(width).collect();
    (Row::new(text, RowKind::Plain), col as u16)
}

fn picker_rows(state: &UiState, width: usize, rows: &mut Vec<Row>) {
    let Some(picker) = &state.picker else {
        return;
    };
    rows.push(Row::new(pad_or_truncate(&picker.title, width), RowKind::Bar));
    let first = (picker.selected + 1).saturating_sub(PICKER_ROWS);
    for (i, item) in picker.items.iter().enumerate().skip(first).take(PICKER_ROWS) {
        let kind = if i == picker.selected { RowKind::Selected } else { RowKind::Plain };
        rows.push(Row::new(pad_or_truncate(&format!(" {item}"), width), kind));
    }
}

fn pane_rows(state: &UiState, width: usize, rows: &mut Vec<Row>) {
    for (name, pane) in state.panes.iter().filter(|(_, p)| p.visible) {
        rows.push(Row::new(pad_or_truncate(&format!("[{name}]"), width), RowKind::PaneTitle));
        let skip = pane.lines.len().saturating_sub(PANE_HEIGHT);
        let shown: Vec<&String> = pane.lines.iter().skip(skip).collect();
        for i in 0..PANE_HEIGHT {
            let text = shown.get(i).map(|s| s.as_str()).unwrap_or("");
            rows.push(Row::new(text, RowKind::Output));
        }
    }
}

/// Lay out the whole screen.
pub fn compose(state: &UiState, width: usize, height: usize) -> Screen {
    let mut top = Vec::new();
    bar_rows(state, &state.layout.top, width, &mut top);

    let mut bottom = Vec::new();
    pane_rows(state, width, &mut bottom);
    picker_rows(state, width, &mut bottom);
    bar_rows(state, &state.layout.bottom, width, &mut bottom);
    let (input, cursor_col) = input_row(state, width);
    bottom.push(input);

    let output_rows = height.saturating_sub(top.len() + bottom.len());
    let end = state.scrollback.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(output_rows);
    let mut rows = top;
    // Pad first so output sits directly above the bottom section.
    for _ in (end - start)..output_rows {
        rows.push(Row::new("", RowKind::Plain));
    }
    rows.extend(state.scrollback.range(start..end).map(|line| match line.kind {
        LineKind::Output => Row::new(line.text.clone(), RowKind::Output),
        LineKind::Echo => Row::new(line.text.clone(), RowKind::Echo),
    }));
    rows.extend(bottom);

    if rows.len() > height {
        rows.drain(..rows.len() - height);
    }
    Screen { rows, cursor_col }
}

/// Redraw every row and place the cursor on the input line.
pub fn draw(out: &mut impl Write, state: &UiState, width: u16, height: u16) -> io::Result<()> {
    let screen = compose(state, width as usize, height as usize);
    queue!(out, cursor::Hide)?;
    for (i, row) in screen.rows.iter().enumerate() {
        queue!(out, cursor::MoveTo(0, i as u16), terminal::Clear(ClearType::CurrentLine))?;
        let text = row.text.as_str();
        match row.kind {
            RowKind::Output => queue!(out, Print(text), ResetColor)?,
            RowKind::Plain => queue!(out, Print(text))?,
            RowKind::Echo => queue!(out, PrintStyledContent(text.dark_yellow()))?,
            RowKind::Bar | RowKind::Selected => queue!(out, PrintStyledContent(text.reverse()))?,
            RowKind::PaneTitle => queue!(out, PrintStyledContent(text.bold()))?,
        }
    }
    let row = (screen.rows.len() as u16).saturating_sub(1);
    queue!(out, cursor::MoveTo(screen.cursor_col, row), cursor::Show)?;
    out.flush()
}

// ── RawModeGuard ──────────────────────────────────────────────────────────

/// Puts the terminal in raw mode on the alternate screen; restores it on drop.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let guard = RawModeGuard(());
        crossterm::execute!(
            io::stdout(),
            terminal::EnterAlternateScreen,
            terminal::DisableLineWrap
        )?;
        Ok(guard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::execute!(
            io::stdout(),
            terminal::EnableLineWrap,
            terminal::LeaveAlternateScreen,
            cursor::Show
        );
        let _ = terminal::disable_raw_mode();
    }
}
