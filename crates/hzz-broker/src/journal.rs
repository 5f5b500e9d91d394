//! SQLite-backed message journal.
//!
//! One row per message the broker still owes someone: ready, unacked or
//! dead-lettered. Acks and purges delete the row. On startup the broker
//! reloads every row, oldest id first.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection};

use hzz_services::{BrokerError, Journal, JournalEntry, MessageId};

pub struct SqliteJournal {
    conn: Mutex<Connection>,
}

fn journal_error(e: rusqlite::Error) -> BrokerError {
    BrokerError::Journal(e.to_string())
}

impl SqliteJournal {
    pub fn open(path: &Path) -> Result<Self, BrokerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BrokerError::Journal(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(journal_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(journal_error)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, BrokerError> {
        Self::init(Connection::open_in_memory().map_err(journal_error)?)
    }

    fn init(conn: Connection) -> Result<Self, BrokerError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id    INTEGER PRIMARY KEY,
                queue TEXT NOT NULL,
                body  BLOB NOT NULL
            );
            "#,
            [],
        )
        .map_err(journal_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rows currently stored.
    pub fn len(&self) -> Result<usize, BrokerError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(journal_error)?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, BrokerError> {
        Ok(self.len()? == 0)
    }
}

impl Journal for SqliteJournal {
    fn append(&self, id: MessageId, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.conn()
            .execute(
                "INSERT INTO messages (id, queue, body) VALUES (?1, ?2, ?3)",
                params![id as i64, queue, body],
            )
            .map_err(journal_error)?;
        Ok(())
    }

    fn relocate(&self, id: MessageId, queue: &str) -> Result<(), BrokerError> {
        self.conn()
            .execute(
                "UPDATE messages SET queue = ?1 WHERE id = ?2",
                params![queue, id as i64],
            )
            .map_err(journal_error)?;
        Ok(())
    }

    fn remove(&self, id: MessageId) -> Result<(), BrokerError> {
        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id as i64])
            .map_err(journal_error)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalEntry>, BrokerError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, queue, body FROM messages ORDER BY id ASC")
            .map_err(journal_error)?;
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok(JournalEntry {
                    id: id as MessageId,
                    queue: row.get(1)?,
                    body: row.get(2)?,
                })
            })
            .map_err(journal_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(journal_error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use hzz_services::{Broker, MemoryBroker};

    use super::*;

    #[test]
    fn rows_follow_append_relocate_remove() {
        let journal = SqliteJournal::open_in_memory().unwrap();
        journal.append(1, "task_queue", b"a").unwrap();
        journal.append(2, "task_queue", b"b").unwrap();
        journal.relocate(2, "task_queue.dlq").unwrap();
        journal.remove(1).unwrap();

        let rows = journal.load().unwrap();
        assert_eq!(
            rows,
            vec![JournalEntry {
                id: 2,
                queue: "task_queue.dlq".into(),
                body: b"b".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn broker_restart_restores_queues_from_disk() {
        let path = std::env::temp_dir().join(format!("hzz-journal-{}.sqlite3", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let broker =
                MemoryBroker::with_journal(Arc::new(SqliteJournal::open(&path).unwrap())).unwrap();
            broker.publish("task_queue", Bytes::from_static(b"one")).await.unwrap();
            broker.publish("task_queue", Bytes::from_static(b"two")).await.unwrap();
            let ch = broker.open_channel(1).await.unwrap();
            let d = broker
                .receive(ch, &["task_queue"], Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            broker.ack(ch, d.tag).await.unwrap();
        }

        let journal = Arc::new(SqliteJournal::open(&path).unwrap());
        assert_eq!(journal.len().unwrap(), 1);
        let broker = MemoryBroker::with_journal(journal).unwrap();
        let ch = broker.open_channel(1).await.unwrap();
        let d = broker
            .receive(ch, &["task_queue"], Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.body, Bytes::from_static(b"two"));
        let _ = std::fs::remove_file(&path);
    }
}
