//! SQLite access layer for the bridge's message history store.
//!
//! Wraps the single read/write connection to messages.db and keeps every
//! SQL statement the reconciler needs behind methods on [`MessageStore`].
//! Schema creation mirrors the bridge's own layout, so tests can build
//! fixture stores through the same handle the tool uses.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StoreError::Io(e) => write!(f, "io error: {e}"),
            StoreError::NotFound(path) => write!(f, "store file not found: {path}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Chat row stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRow {
    pub jid: String,
    pub name: Option<String>,
    pub last_message_time: Option<i64>,
}

/// Message row stored in the database.
///
/// The primary key is `(id, chat_jid)`: the same message id can exist under
/// two chats at once, which is exactly the duplicate the merge path removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub content: Option<String>,
    pub timestamp: i64,
    pub is_from_me: bool,
}

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

/// Handle wrapping the read/write connection to messages.db.
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Open the message store at the given path. Creates the schema if it
    /// is missing; callers that require an existing store check the path
    /// before opening.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store with the full schema. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // Foreign key enforcement stays off for the whole run: chat renames
        // update the parent jid and the child chat_jid in separate statements.
        conn.execute_batch("PRAGMA foreign_keys=OFF;")?;
        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chats (
                jid                 TEXT PRIMARY KEY,
                name                TEXT,
                last_message_time   INTEGER
            );

            CREATE TABLE IF NOT EXISTS messages (
                id          TEXT,
                chat_jid    TEXT,
                sender      TEXT NOT NULL,
                content     TEXT,
                timestamp   INTEGER NOT NULL,
                is_from_me  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id, chat_jid),
                FOREIGN KEY (chat_jid) REFERENCES chats(jid)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat
                ON messages(chat_jid, timestamp);
            ",
        )?;
        Ok(())
    }

    /// Begin a transaction on the store's connection. Statements issued
    /// through this handle while the transaction is live are part of it;
    /// dropping the transaction without committing rolls everything back.
    pub fn begin(&self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // -----------------------------------------------------------------------
    // Chats
    // -----------------------------------------------------------------------

    pub fn insert_chat(&self, row: &ChatRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO chats (jid, name, last_message_time) VALUES (?1, ?2, ?3)",
            params![row.jid, row.name, row.last_message_time],
        )?;
        Ok(())
    }

    pub fn get_chat(&self, jid: &str) -> Result<Option<ChatRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT jid, name, last_message_time FROM chats WHERE jid = ?1",
                params![jid],
                |row| {
                    Ok(ChatRow {
                        jid: row.get(0)?,
                        name: row.get(1)?,
                        last_message_time: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn chat_exists(&self, jid: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chats WHERE jid = ?1",
            params![jid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List chat jids ending in the given domain suffix, ordered by jid.
    pub fn chats_with_suffix(&self, suffix: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT jid FROM chats WHERE jid LIKE ?1 ORDER BY jid")?;
        let rows = stmt.query_map(params![format!("%{suffix}")], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Rename a chat in place and cascade the new jid to its messages.
    pub fn rename_chat(&self, old_jid: &str, new_jid: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE chats SET jid = ?2 WHERE jid = ?1",
            params![old_jid, new_jid],
        )?;
        self.conn.execute(
            "UPDATE messages SET chat_jid = ?2 WHERE chat_jid = ?1",
            params![old_jid, new_jid],
        )?;
        Ok(())
    }

    pub fn delete_chat(&self, jid: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute("DELETE FROM chats WHERE jid = ?1", params![jid])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub fn insert_message(&self, row: &MessageRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO messages (id, chat_jid, sender, content, timestamp, is_from_me)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.chat_jid,
                row.sender,
                row.content,
                row.timestamp,
                row.is_from_me as i32,
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: &str, chat_jid: &str) -> Result<Option<MessageRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, chat_jid, sender, content, timestamp, is_from_me
                 FROM messages WHERE id = ?1 AND chat_jid = ?2",
                params![id, chat_jid],
                message_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List all messages filed under a chat, oldest first.
    pub fn messages_for_chat(&self, chat_jid: &str) -> Result<Vec<MessageRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chat_jid, sender, content, timestamp, is_from_me
             FROM messages WHERE chat_jid = ?1 ORDER BY timestamp, id",
        )?;
        let rows = stmt.query_map(params![chat_jid], message_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Delete messages under `old_jid` whose id also exists under `new_jid`.
    /// Returns the number of duplicates removed.
    pub fn delete_duplicate_messages(
        &self,
        old_jid: &str,
        new_jid: &str,
    ) -> Result<usize, StoreError> {
        let affected = self.conn.execute(
            "DELETE FROM messages WHERE chat_jid = ?1 AND id IN (
                SELECT m1.id FROM messages m1
                INNER JOIN messages m2 ON m1.id = m2.id
                WHERE m1.chat_jid = ?1 AND m2.chat_jid = ?2
            )",
            params![old_jid, new_jid],
        )?;
        Ok(affected)
    }

    /// Move every remaining message from `old_jid` to `new_jid`. Returns the
    /// number of rows moved.
    pub fn reassign_messages(&self, old_jid: &str, new_jid: &str) -> Result<usize, StoreError> {
        let affected = self.conn.execute(
            "UPDATE messages SET chat_jid = ?2 WHERE chat_jid = ?1",
            params![old_jid, new_jid],
        )?;
        Ok(affected)
    }

    // -----------------------------------------------------------------------
    // Senders
    // -----------------------------------------------------------------------

    /// Distinct sender values ending in the given domain suffix.
    pub fn suffixed_senders(&self, suffix: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT sender FROM messages WHERE sender LIKE ?1 ORDER BY sender")?;
        let rows = stmt.query_map(params![format!("%{suffix}")], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Distinct sender values carrying no domain suffix at all.
    pub fn bare_senders(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT sender FROM messages WHERE sender NOT LIKE '%@%' ORDER BY sender",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Rewrite every message row carrying `old_sender` to `new_sender`.
    /// A bulk value substitution by equality; sender rewrites never delete
    /// rows. Returns the number of rows rewritten.
    pub fn update_sender(&self, old_sender: &str, new_sender: &str) -> Result<usize, StoreError> {
        let affected = self.conn.execute(
            "UPDATE messages SET sender = ?2 WHERE sender = ?1",
            params![old_sender, new_sender],
        )?;
        Ok(affected)
    }
}

fn message_from_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_jid: row.get(1)?,
        sender: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        is_from_me: row.get::<_, i32>(5)? != 0,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MessageStore {
        MessageStore::open_in_memory().unwrap()
    }

    fn chat(jid: &str) -> ChatRow {
        ChatRow {
            jid: jid.to_string(),
            name: None,
            last_message_time: None,
        }
    }

    fn message(id: &str, chat_jid: &str, sender: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            chat_jid: chat_jid.to_string(),
            sender: sender.to_string(),
            content: Some("hello".to_string()),
            timestamp: 1_700_000_000,
            is_from_me: false,
        }
    }

    #[test]
    fn test_chat_roundtrip() {
        let store = test_store();
        store
            .insert_chat(&ChatRow {
                jid: "111@lid".to_string(),
                name: Some("Alice".to_string()),
                last_message_time: Some(1_700_000_000),
            })
            .unwrap();

        let loaded = store.get_chat("111@lid").unwrap().unwrap();
        assert_eq!(loaded.name, Some("Alice".to_string()));
        assert!(store.chat_exists("111@lid").unwrap());
        assert!(!store.chat_exists("999@lid").unwrap());
    }

    #[test]
    fn test_chats_with_suffix() {
        let store = test_store();
        store.insert_chat(&chat("333@lid")).unwrap();
        store.insert_chat(&chat("111@lid")).unwrap();
        store
            .insert_chat(&chat("22211111111@s.whatsapp.net"))
            .unwrap();

        let lid_chats = store.chats_with_suffix("@lid").unwrap();
        assert_eq!(lid_chats, vec!["111@lid", "333@lid"]);
    }

    #[test]
    fn test_rename_chat_cascades_to_messages() {
        let store = test_store();
        store.insert_chat(&chat("111@lid")).unwrap();
        store.insert_message(&message("m1", "111@lid", "111")).unwrap();
        store.insert_message(&message("m2", "111@lid", "111")).unwrap();

        store.rename_chat("111@lid", "222@s.whatsapp.net").unwrap();

        assert!(!store.chat_exists("111@lid").unwrap());
        assert!(store.chat_exists("222@s.whatsapp.net").unwrap());
        assert!(store.messages_for_chat("111@lid").unwrap().is_empty());
        assert_eq!(store.messages_for_chat("222@s.whatsapp.net").unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_delete_and_reassign() {
        let store = test_store();
        store.insert_chat(&chat("111@lid")).unwrap();
        store.insert_chat(&chat("222@s.whatsapp.net")).unwrap();
        // m1 exists under both chats; m2 only under the old one.
        store.insert_message(&message("m1", "111@lid", "111")).unwrap();
        store
            .insert_message(&message("m1", "222@s.whatsapp.net", "222"))
            .unwrap();
        store.insert_message(&message("m2", "111@lid", "111")).unwrap();

        let dupes = store
            .delete_duplicate_messages("111@lid", "222@s.whatsapp.net")
            .unwrap();
        assert_eq!(dupes, 1);

        let moved = store
            .reassign_messages("111@lid", "222@s.whatsapp.net")
            .unwrap();
        assert_eq!(moved, 1);

        let remaining = store.messages_for_chat("222@s.whatsapp.net").unwrap();
        assert_eq!(remaining.len(), 2);
        // The copy of m1 that survives is the one already under the target.
        let m1 = store.get_message("m1", "222@s.whatsapp.net").unwrap().unwrap();
        assert_eq!(m1.sender, "222");
    }

    #[test]
    fn test_sender_queries_and_update() {
        let store = test_store();
        store.insert_chat(&chat("g@g.us")).unwrap();
        store.insert_message(&message("m1", "g@g.us", "111@lid")).unwrap();
        store.insert_message(&message("m2", "g@g.us", "111@lid")).unwrap();
        store.insert_message(&message("m3", "g@g.us", "555")).unwrap();
        store
            .insert_message(&message("m4", "g@g.us", "777@s.whatsapp.net"))
            .unwrap();

        assert_eq!(store.suffixed_senders("@lid").unwrap(), vec!["111@lid"]);
        assert_eq!(store.bare_senders().unwrap(), vec!["555"]);

        let rewritten = store.update_sender("111@lid", "999@s.whatsapp.net").unwrap();
        assert_eq!(rewritten, 2);
        assert!(store.suffixed_senders("@lid").unwrap().is_empty());
    }

    #[test]
    fn test_transaction_rollback_on_drop() {
        let store = test_store();
        {
            let _tx = store.begin().unwrap();
            store.insert_chat(&chat("111@lid")).unwrap();
            // Dropped without commit.
        }
        assert!(!store.chat_exists("111@lid").unwrap());
    }
}
