//! The input line buffer.
//!
//! Positions are char indices, never byte offsets, so cursor movement works
//! the same for ASCII and multi-byte text.

#[derive(Debug, Clone, Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    /// Cursor position, `0..=buffer.len()`.
    pos: usize,
    /// Last text removed by a kill command.
    killed: Vec<char>,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Return the line and leave the editor empty.
    pub fn take_line(&mut self) -> String {
        let line = self.text();
        self.buffer.clear();
        self.pos = 0;
        line
    }

    /// Replace the whole buffer; the cursor goes to the end.
    pub fn set_text(&mut self, text: &str) {
        self.buffer = text.chars().collect();
        self.pos = self.buffer.len();
    }

    pub fn insert_char(&mut self, ch: char) {
        self.buffer.insert(self.pos, ch);
        self.pos += 1;
    }

    /// Backspace.  Returns whether anything was removed.
    pub fn delete_before(&mut self) -> bool {
        if self.pos == 0 {
            return false;
        }
        self.pos -= 1;
        self.buffer.remove(self.pos);
        true
    }

    pub fn delete_at(&mut self) -> bool {
        if self.pos >= self.buffer.len() {
            return false;
        }
        self.buffer.remove(self.pos);
        true
    }

    pub fn move_left(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.pos = (self.pos + 1).min(self.buffer.len());
    }

    pub fn move_home(&mut self) {
        self.pos = 0;
    }

    pub fn move_end(&mut self) {
        self.pos = self.buffer.len();
    }

    /// Start of the word before the cursor: skip spaces, then non-spaces.
    fn word_start(&self) -> usize {
        let mut i = self.pos;
        while i > 0 && self.buffer[i - 1].is_whitespace() {
            i -= 1;
        }
        while i > 0 && !self.buffer[i - 1].is_whitespace() {
            i -= 1;
        }
        i
    }

    pub fn kill_to_end(&mut self) {
        self.killed = self.buffer.split_off(self.pos);
    }

    pub fn kill_to_start(&mut self) {
        self.killed = self.buffer.drain(..self.pos).collect();
        self.pos = 0;
    }

    pub fn kill_word_backward(&mut self) {
        let start = self.word_start();
        self.killed = self.buffer.drain(start..self.pos).collect();
        self.pos = start;
    }

    /// Paste the last killed text at the cursor.
    pub fn yank(&mut self) {
        for &ch in &self.killed {
            self.buffer.insert(self.pos, ch);
            self.pos += 1;
        }
    }
}
