//! SQLite chat history.
//!
//! Every text-bearing message, inbound or outbound, is stored once (keyed by
//! the transport's message id). Task batches are cut from it with a per-task
//! watermark.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

pub struct HistoryStore {
    conn: Mutex<Connection>,
}

/// A message row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage<'a> {
    pub id: &'a str,
    pub chat: &'a str,
    pub sender: &'a str,
    pub text: &'a str,
    pub timestamp: i64,
    pub from_me: bool,
}

fn format_line(text: &str, from_me: bool) -> String {
    if from_me {
        format!("Me: {}", text)
    } else {
        format!("User: {}", text)
    }
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat TEXT NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                ts INTEGER NOT NULL,
                from_me INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat, ts);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store a message; a second save with the same id is ignored.
    pub fn save_message(&self, msg: StoredMessage<'_>) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO messages (id, chat, sender, content, ts, from_me) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![msg.id, msg.chat, msg.sender, msg.text, msg.timestamp, msg.from_me],
        )?;
        Ok(inserted == 1)
    }

    /// Last `limit` messages of a chat, oldest first, as `Me: ..`/`User: ..` lines.
    pub fn recent_messages(&self, chat: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT content, from_me FROM messages WHERE chat = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat, limit as i64], |row| {
            Ok(format_line(&row.get::<_, String>(0)?, row.get(1)?))
        })?;
        let mut lines = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        lines.reverse();
        Ok(lines)
    }

    /// Inbound messages newer than `watermark`, oldest first, plus the new
    /// watermark. A zero watermark yields the latest `limit` inbound messages.
    /// Our own sends are never returned, so they cannot re-trigger a batch.
    ///
    /// The watermark has one-second resolution: a message stored after a
    /// batch read, but stamped with the same second as that batch's newest
    /// message, falls at or below the watermark and is not returned. Batches
    /// run a full debounce window after the message that triggered them, so
    /// only a late delivery carrying an old timestamp hits this.
    pub fn messages_since(
        &self,
        chat: &str,
        watermark: i64,
        limit: usize,
    ) -> Result<(Vec<String>, i64)> {
        let conn = self.conn();
        let mut rows: Vec<(String, i64)> = if watermark <= 0 {
            let mut stmt = conn.prepare(
                "SELECT content, ts FROM messages WHERE chat = ?1 AND from_me = 0 ORDER BY ts DESC, rowid DESC LIMIT ?2",
            )?;
            let mapped = stmt.query_map(params![chat, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let mut rows = mapped.collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            rows
        } else {
            let mut stmt = conn.prepare(
                "SELECT content, ts FROM messages WHERE chat = ?1 AND from_me = 0 AND ts > ?2 ORDER BY ts ASC, rowid ASC",
            )?;
            let mapped = stmt.query_map(params![chat, watermark], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let new_watermark = rows.iter().map(|(_, ts)| *ts).max().unwrap_or(watermark);
        let lines = rows
            .drain(..)
            .map(|(text, _)| format_line(&text, false))
            .collect();
        Ok((lines, new_watermark))
    }

    /// Newest inbound timestamp of a chat, if any.
    pub fn latest_inbound(&self, chat: &str) -> Result<Option<i64>> {
        let ts = self
            .conn()
            .query_row(
                "SELECT MAX(ts) FROM messages WHERE chat = ?1 AND from_me = 0",
                params![chat],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(ts.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg<'a>(id: &'a str, text: &'a str, ts: i64, from_me: bool) -> StoredMessage<'a> {
        StoredMessage {
            id,
            chat: "ana@x",
            sender: if from_me { "me@x" } else { "ana@x" },
            text,
            timestamp: ts,
            from_me,
        }
    }

    #[test]
    fn test_save_is_idempotent() {
        let history = HistoryStore::open_in_memory().unwrap();
        assert!(history.save_message(msg("m1", "hello", 10, false)).unwrap());
        assert!(!history.save_message(msg("m1", "hello again", 11, false)).unwrap());
        assert_eq!(history.recent_messages("ana@x", 10).unwrap(), vec!["User: hello"]);
    }

    #[test]
    fn test_recent_is_oldest_first_and_limited() {
        let history = HistoryStore::open_in_memory().unwrap();
        history.save_message(msg("1", "a", 10, false)).unwrap();
        history.save_message(msg("2", "b", 20, true)).unwrap();
        history.save_message(msg("3", "c", 30, false)).unwrap();

        assert_eq!(
            history.recent_messages("ana@x", 2).unwrap(),
            vec!["Me: b", "User: c"]
        );
        assert!(history.recent_messages("nobody@x", 5).unwrap().is_empty());
    }

    #[test]
    fn test_messages_since_watermark() {
        let history = HistoryStore::open_in_memory().unwrap();
        history.save_message(msg("1", "old", 10, false)).unwrap();
        history.save_message(msg("2", "my reply", 15, true)).unwrap();
        history.save_message(msg("3", "new one", 20, false)).unwrap();
        history.save_message(msg("4", "new two", 22, false)).unwrap();

        let (lines, wm) = history.messages_since("ana@x", 10, 9).unwrap();
        assert_eq!(lines, vec!["User: new one", "User: new two"]);
        assert_eq!(wm, 22);

        let (lines, wm) = history.messages_since("ana@x", 22, 9).unwrap();
        assert!(lines.is_empty());
        assert_eq!(wm, 22);
    }

    #[test]
    fn test_watermark_is_inclusive_to_the_second() {
        let history = HistoryStore::open_in_memory().unwrap();
        history.save_message(msg("1", "first", 30, false)).unwrap();
        let (lines, wm) = history.messages_since("ana@x", 29, 9).unwrap();
        assert_eq!(lines, vec!["User: first"]);

        history.save_message(msg("2", "same second", 30, false)).unwrap();
        history.save_message(msg("3", "next second", 31, false)).unwrap();
        let (lines, wm) = history.messages_since("ana@x", wm, 9).unwrap();
        assert_eq!(lines, vec!["User: next second"]);
        assert_eq!(wm, 31);
    }

    #[test]
    fn test_zero_watermark_takes_latest_inbound() {
        let history = HistoryStore::open_in_memory().unwrap();
        for i in 0..5 {
            history
                .save_message(msg(&format!("in{}", i), &format!("m{}", i), 100 + i, false))
                .unwrap();
        }
        history.save_message(msg("out", "mine", 200, true)).unwrap();

        let (lines, wm) = history.messages_since("ana@x", 0, 2).unwrap();
        assert_eq!(lines, vec!["User: m3", "User: m4"]);
        assert_eq!(wm, 104);
        assert_eq!(history.latest_inbound("ana@x").unwrap(), Some(104));
        assert_eq!(history.latest_inbound("ghost@x").unwrap(), None);
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.db");
        {
            let history = HistoryStore::open(&path).unwrap();
            history.save_message(msg("1", "persisted", 1, false)).unwrap();
        }
        let history = HistoryStore::open(&path).unwrap();
        assert_eq!(history.recent_messages("ana@x", 1).unwrap(), vec!["User: persisted"]);
    }
}
