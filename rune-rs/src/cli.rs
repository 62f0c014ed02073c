//! Command-line argument parsing.
//!
//! Usage:
//!   rune [-C <dir>] [-d] [-c <address>] [<script>...]

use std::path::PathBuf;

use clap::Parser;
use directories::ProjectDirs;

/// Environment variable that overrides the configuration directory.
pub const CONFIG_DIR_ENV: &str = "RUNE_CONFIG_DIR";

#[derive(Debug, Parser)]
#[command(name = "rune", version, about, long_about = None)]
pub struct Cli {
    /// Configuration directory (holds init.lua and rune.log)
    #[arg(short = 'C', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub debug: bool,

    /// Connect to ADDRESS once scripts are loaded (host:port, tls://host:port)
    #[arg(short, long, value_name = "ADDRESS")]
    pub connect: Option<String>,

    /// Extra scripts to load after init.lua, in order
    #[arg(value_name = "SCRIPT")]
    pub scripts: Vec<PathBuf>,
}

/// Pick the configuration directory: the flag, then `$RUNE_CONFIG_DIR`,
/// then the platform config directory, then `./.rune`.
pub fn resolve_config_dir(flag: Option<PathBuf>, env: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Some(dir) = env.filter(|s| !s.is_empty()) {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("", "", "rune")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".rune"))
}

impl Cli {
    pub fn config_dir(&self) -> PathBuf {
        resolve_config_dir(self.config_dir.clone(), std::env::var(CONFIG_DIR_ENV).ok())
    }
}
