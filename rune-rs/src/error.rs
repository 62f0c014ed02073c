//! Error types.
//!
//! Script failures are never fatal to the process: they are reported through
//! the display or the `error` hook.  Only [`SessionError`] aborts [`run`].
//!
//! [`run`]: crate::session::Session::run

use std::path::PathBuf;

use thiserror::Error;

/// A script could not be read or executed.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{}: not found", .0.display())]
    NotFound(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

/// A step of the boot sequence failed; remaining steps were skipped.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("cannot create script runtime: {0}")]
    Runtime(#[source] ScriptError),

    #[error("loading {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: ScriptError,
    },
}

/// Errors surfaced by the network collaborator.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid address {0:?} (expected host:port or tls://host:port)")]
    InvalidAddress(String),

    #[error("not connected")]
    NotConnected,

    #[error("send queue is full")]
    Backpressure,

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("tls: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fatal failures of the session loop itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already ran")]
    AlreadyRan,
}
