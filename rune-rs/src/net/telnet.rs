//! Telnet byte-stream parsing, option negotiation and line framing.
//!
//! [`TelnetParser`] is a pure FSM turning server bytes into [`TelnetEvent`]s.
//! [`Negotiation`] answers WILL/WONT/DO/DONT for the few options we care
//! about.  [`Framer`] sits on top of both and produces whole lines and
//! prompts.  None of it does I/O.

// ── Telnet byte constants ──────────────────────────────────────────────────

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
/// Go Ahead: end of a prompt.
pub const GA: u8 = 249;
pub const SE: u8 = 240;
/// End of Record: the other prompt marker.
pub const EOR: u8 = 239;

pub mod opt {
    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
    pub const EOR: u8 = 25;
}

// ── TelnetEvent ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    Data(Vec<u8>),
    Will(u8),
    Wont(u8),
    Do(u8),
    Dont(u8),
    /// `IAC SB <opt> ... IAC SE`; we accept none, so payloads are dropped.
    Subneg(u8),
    /// `IAC GA` or `IAC EOR`.
    PromptMark,
}

// ── Parser FSM ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum State {
    Normal,
    Iac,
    Cmd(u8),
    Sb,
    SbData(u8),
    SbIac(u8),
}

#[derive(Debug)]
pub struct TelnetParser {
    state: State,
    data: Vec<u8>,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetParser {
    pub fn new() -> Self {
        Self { state: State::Normal, data: Vec::new() }
    }

    /// Feed raw bytes; returns every event decoded from them.  State carries
    /// over, so sequences split across reads are handled.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            self.step(b, &mut events);
        }
        self.flush_data(&mut events);
        events
    }

    fn flush_data(&mut self, events: &mut Vec<TelnetEvent>) {
        if !self.data.is_empty() {
            events.push(TelnetEvent::Data(std::mem::take(&mut self.data)));
        }
    }

    fn step(&mut self, b: u8, events: &mut Vec<TelnetEvent>) {
        self.state = match (self.state, b) {
            (State::Normal, IAC) => {
                self.flush_data(events);
                State::Iac
            }
            (State::Normal, _) => {
                self.data.push(b);
                State::Normal
            }
            (State::Iac, IAC) => {
                self.data.push(IAC);
                State::Normal
            }
            (State::Iac, WILL | WONT | DO | DONT) => State::Cmd(b),
            (State::Iac, SB) => State::Sb,
            (State::Iac, GA | EOR) => {
                events.push(TelnetEvent::PromptMark);
                State::Normal
            }
            // NOP and other single-byte commands.
            (State::Iac, _) => State::Normal,
            (State::Cmd(cmd), option) => {
                events.push(match cmd {
                    WILL => TelnetEvent::Will(option),
                    WONT => TelnetEvent::Wont(option),
                    DO => TelnetEvent::Do(option),
                    _ => TelnetEvent::Dont(option),
                });
                State::Normal
            }
            (State::Sb, option) => State::SbData(option),
            (State::SbData(option), IAC) => State::SbIac(option),
            (State::SbData(option), _) => State::SbData(option),
            (State::SbIac(option), SE) => {
                events.push(TelnetEvent::Subneg(option));
                State::Normal
            }
            (State::SbIac(option), IAC) => State::SbData(option),
            // Malformed subnegotiation: recover.
            (State::SbIac(_), _) => State::Normal,
        };
    }
}

// ── Negotiation ───────────────────────────────────────────────────────────

/// Options the server may enable on its side (we answer DO).
fn accept_remote(option: u8) -> bool {
    matches!(option, opt::ECHO | opt::SGA | opt::EOR)
}

/// Which options the server has enabled.  We never enable anything on our
/// side, so every DO is refused.
#[derive(Debug)]
pub struct Negotiation {
    them: [bool; 256],
}

impl Default for Negotiation {
    fn default() -> Self {
        Self { them: [false; 256] }
    }
}

impl Negotiation {
    /// Returns the bytes to answer with, if any.
    pub fn receive(&mut self, event: &TelnetEvent) -> Option<[u8; 3]> {
        match *event {
            TelnetEvent::Will(o) if !self.them[o as usize] => {
                if accept_remote(o) {
                    self.them[o as usize] = true;
                    Some([IAC, DO, o])
                } else {
                    Some([IAC, DONT, o])
                }
            }
            TelnetEvent::Wont(o) if self.them[o as usize] => {
                self.them[o as usize] = false;
                Some([IAC, DONT, o])
            }
            TelnetEvent::Do(o) => Some([IAC, WONT, o]),
            _ => None,
        }
    }

    pub fn is_them(&self, option: u8) -> bool {
        self.them[option as usize]
    }
}

// ── Framer ────────────────────────────────────────────────────────────────

/// What the framer produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Prompt(String),
}

/// Telnet decoding plus line/prompt framing.
///
/// Lines end at LF (a preceding CR is dropped).  Bytes before `IAC GA` or
/// `IAC EOR` become a prompt; bytes left over without either can be flushed
/// as a prompt by the caller after a quiet period.
#[derive(Debug, Default)]
pub struct Framer {
    parser: TelnetParser,
    neg: Negotiation,
    partial: Vec<u8>,
}

fn decode(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `raw`.  Returns the frames and the negotiation replies to write.
    pub fn process(&mut self, raw: &[u8]) -> (Vec<Frame>, Vec<u8>) {
        let mut frames = Vec::new();
        let mut reply = Vec::new();
        for event in self.parser.feed(raw) {
            match event {
                TelnetEvent::Data(data) => self.ingest(&data, &mut frames),
                TelnetEvent::PromptMark => {
                    if let Some(prompt) = self.take_partial() {
                        frames.push(prompt);
                    }
                }
                TelnetEvent::Subneg(_) => {}
                other => {
                    if let Some(bytes) = self.neg.receive(&other) {
                        reply.extend_from_slice(&bytes);
                    }
                }
            }
        }
        (frames, reply)
    }

    fn ingest(&mut self, data: &[u8], frames: &mut Vec<Frame>) {
        for &b in data {
            if b == b'\n' {
                if self.partial.last() == Some(&b'\r') {
                    self.partial.pop();
                }
                frames.push(Frame::Line(decode(std::mem::take(&mut self.partial))));
            } else {
                self.partial.push(b);
            }
        }
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Flush the unterminated tail as a prompt.
    pub fn take_partial(&mut self) -> Option<Frame> {
        if self.partial.is_empty() {
            return None;
        }
        Some(Frame::Prompt(decode(std::mem::take(&mut self.partial))))
    }

    /// Whether the server has taken over echoing (password entry).
    pub fn server_echoes(&self) -> bool {
        self.neg.is_them(opt::ECHO)
    }
}

/// Encode one outgoing line with CRLF appended.
///
/// UTF-8 text never contains 0xFF, so no IAC escaping is needed.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 2);
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

// ── Tests ─────────────────────────────────────────────────────────────────
