//! Plaintext `_last_id` counter shared by the file stores.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

const COUNTER_FILE: &str = "_last_id";

/// Monotonic id allocator backed by `<dir>/_last_id`.
///
/// The first call writes `1`; later calls read, increment and write back.
/// Writes go through a temp file and a rename, so a crash never leaves a
/// half-written counter behind.
pub struct IdCounter {
    path: PathBuf,
    guard: Mutex<()>,
}

impl IdCounter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(COUNTER_FILE),
            guard: Mutex::new(()),
        }
    }

    pub fn next_id(&self) -> Result<u64> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let next = match fs::read_to_string(&self.path) {
            Ok(content) => {
                let trimmed = content.trim();
                let last: u64 = trimmed.parse().map_err(|_| {
                    Error::Parse(format!(
                        "counter {} holds '{}', not a number",
                        self.path.display(),
                        trimmed
                    ))
                })?;
                last + 1
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 1,
            Err(e) => return Err(e.into()),
        };

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, next.to_string())?;
        fs::rename(&tmp, &self.path)?;

        Ok(next)
    }

    /// Last id handed out, 0 if none.
    pub fn current(&self) -> Result<u64> {
        match fs::read_to_string(&self.path) {
            Ok(content) => content
                .trim()
                .parse()
                .map_err(|_| Error::Parse(format!("counter {} is corrupted", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
