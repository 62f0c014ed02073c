//! Bundled core scripts, baked into the binary with `include_str!`.
//!
//! Boot loads them sorted by name before the user's `init.lua`, so the
//! numeric prefixes fix their order.

/// A single embedded script.
pub struct EmbeddedFile {
    pub name: &'static str,
    pub content: &'static str,
}

pub static CORE_SCRIPTS: &[EmbeddedFile] = &[
    EmbeddedFile { name: "10_history.lua",    content: include_str!("../lua/core/10_history.lua") },
    EmbeddedFile { name: "20_commands.lua",   content: include_str!("../lua/core/20_commands.lua") },
    EmbeddedFile { name: "30_completion.lua", content: include_str!("../lua/core/30_completion.lua") },
];
