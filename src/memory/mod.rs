//! Global memory: one plaintext file shared by every mode.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

pub struct MemoryFile {
    path: PathBuf,
    guard: Mutex<()>,
}

impl MemoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current text; a missing file reads as empty.
    pub fn read(&self) -> Result<String> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the whole memory.
    pub fn replace(&self, text: &str) -> Result<()> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_parent()?;
        std::fs::write(&self.path, text)?;
        tracing::debug!(bytes = text.len(), "Memory replaced");
        Ok(())
    }

    /// Append `text`, separated by a newline when the file already has content.
    pub fn append(&self, text: &str) -> Result<()> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_parent()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() > 0 {
            file.write_all(b"\n")?;
        }
        file.write_all(text.as_bytes())?;
        tracing::debug!(bytes = text.len(), "Memory appended");
        Ok(())
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_reads_empty() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryFile::new(dir.path().join("memories.txt"));
        assert_eq!(memory.read().unwrap(), "");
    }

    #[test]
    fn test_replace_then_append() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryFile::new(dir.path().join("memories.txt"));

        memory.append("first").unwrap();
        assert_eq!(memory.read().unwrap(), "first");

        memory.replace("Initial memory line").unwrap();
        memory.append("Appended line").unwrap();
        assert_eq!(memory.read().unwrap(), "Initial memory line\nAppended line");

        memory.replace("").unwrap();
        memory.append("fresh").unwrap();
        assert_eq!(memory.read().unwrap(), "fresh");
    }
}
