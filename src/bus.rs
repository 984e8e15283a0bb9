//! Project-scoped one-shot message queue. Producers are hook processes;
//! the consumer prepends messages to its next response, so lines stay short
//! and advisory. Delivery is at-most-once.

use crate::db::Store;
use crate::models::now_ts;
use anyhow::Result;
use rusqlite::params;

const MAX_MESSAGE_CHARS: usize = 200;

impl Store {
    pub fn add_notification(&self, project: &str, message: &str) -> Result<()> {
        let mut message = message.trim().to_string();
        if message.is_empty() {
            return Ok(());
        }
        if message.len() > MAX_MESSAGE_CHARS {
            let mut cut = MAX_MESSAGE_CHARS;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        self.conn.execute(
            "INSERT INTO notifications (project, message, created_at) VALUES (?1, ?2, ?3)",
            params![project, message, now_ts()],
        )?;
        Ok(())
    }

    /// Atomically read and delete all pending messages for a project,
    /// in insertion order. A second call returns nothing.
    pub fn consume_pending(&mut self, project: &str) -> Result<Vec<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let messages: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT message FROM notifications WHERE project = ?1 ORDER BY id ASC")?;
            let rows = stmt
                .query_map([project], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        tx.execute("DELETE FROM notifications WHERE project = ?1", [project])?;
        tx.commit()?;
        Ok(messages)
    }

    pub fn pending_notification_count(&self, project: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE project = ?1",
            [project],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_consume_preserves_insertion_order() {
        let mut store = Store::open_in_memory().unwrap();
        store.add_notification("p", "first").unwrap();
        store.add_notification("p", "second").unwrap();
        store.add_notification("p", "third").unwrap();

        let messages = store.consume_pending("p").unwrap();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn consume_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        store.add_notification("p", "only once").unwrap();
        assert_eq!(store.consume_pending("p").unwrap().len(), 1);
        assert!(store.consume_pending("p").unwrap().is_empty());
    }

    #[test]
    fn consume_is_project_scoped() {
        let mut store = Store::open_in_memory().unwrap();
        store.add_notification("p1", "for p1").unwrap();
        store.add_notification("p2", "for p2").unwrap();

        assert_eq!(store.consume_pending("p1").unwrap(), vec!["for p1"]);
        assert_eq!(store.pending_notification_count("p2").unwrap(), 1);
    }

    #[test]
    fn blank_messages_are_dropped() {
        let mut store = Store::open_in_memory().unwrap();
        store.add_notification("p", "   ").unwrap();
        assert!(store.consume_pending("p").unwrap().is_empty());
    }

    #[test]
    fn long_messages_are_truncated() {
        let mut store = Store::open_in_memory().unwrap();
        store.add_notification("p", &"m".repeat(500)).unwrap();
        let messages = store.consume_pending("p").unwrap();
        assert_eq!(messages[0].len(), 200);
    }
}
