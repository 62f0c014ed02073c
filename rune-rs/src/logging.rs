//! File logging.
//!
//! The terminal belongs to the front end, so logs only go to
//! `<config_dir>/rune.log`.  The file is truncated at startup once it grows
//! past [`MAX_LOG_SIZE`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "rune.log";
pub const MAX_LOG_SIZE: u64 = 1024 * 1024;

/// Install the global subscriber writing to `<config_dir>/rune.log`.
///
/// `RUST_LOG` picks the level unless `debug` forces it.  The returned guard
/// flushes the writer when dropped and must outlive the session.
pub fn init(config_dir: &Path, debug: bool) -> io::Result<WorkerGuard> {
    fs::create_dir_all(config_dir)?;
    let path = config_dir.join(LOG_FILE);
    truncate_if_needed(&path)?;

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let (writer, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    tracing::info!(target: "session", "logging to {}", path.display());
    Ok(guard)
}

fn filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Empty the log once it exceeds [`MAX_LOG_SIZE`].
fn truncate_if_needed(path: &Path) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_LOG_SIZE => {
            File::create(path)?;
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_log_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE);
        fs::write(&path, vec![b'x'; MAX_LOG_SIZE as usize + 1]).unwrap();
        truncate_if_needed(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn small_log_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE);
        fs::write(&path, b"earlier session\n").unwrap();
        truncate_if_needed(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"earlier session\n");
    }

    #[test]
    fn missing_log_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        truncate_if_needed(&dir.path().join(LOG_FILE)).unwrap();
    }
}
