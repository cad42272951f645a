//! Central path resolution for the service's data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `ASSESSMENT_DATA_DIR` env > `~/.assessment`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

fn default_data_dir() -> PathBuf {
    if let Ok(env_val) = std::env::var("ASSESSMENT_DATA_DIR") {
        return PathBuf::from(env_val);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".assessment")
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_data_dir);

    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    dir
}

/// The current data directory; the default resolution if `init_data_dir`
/// hasn't been called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .unwrap_or_else(default_data_dir)
}

pub fn db_path() -> PathBuf {
    data_dir().join("sessions.db")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn tokens_path() -> PathBuf {
    data_dir().join("tokens.toml")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    Ok(())
}
