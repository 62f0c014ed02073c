//! rune: a scriptable MUD client.
//!
//! The crate is organised around one consumer thread ([`session`]) that owns
//! the Lua runtime ([`runtime`]) and processes a single bounded event queue
//! ([`event`]).  Network, keyboard and timers are producers only.
//!
//! Module map:
//!
//! | Module      | Concern                                             |
//! |-------------|-----------------------------------------------------|
//! | [`session`] | event loop, boot and reload, lifecycle              |
//! | [`runtime`] | Lua interpreter, hooks, bindings, the `rune` table  |
//! | [`bridge`]  | collaborator traits and the capabilities given to scripts |
//! | [`timer`]   | one-shot and repeating timers with stale-fire filtering |
//! | [`net`]     | telnet client over TCP or TLS                       |
//! | [`ui`]      | crossterm front end                                 |
//! | [`cache`]   | bounded regex and completion-word caches            |

pub mod bridge;
pub mod cache;
pub mod cli;
pub mod embedded;
pub mod error;
pub mod event;
pub mod history;
pub mod hook;
pub mod logging;
pub mod net;
pub mod runtime;
pub mod session;
pub mod timer;
pub mod ui;
