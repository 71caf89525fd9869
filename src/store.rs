//! Append-only message store over SQLite, with FTS5 keyword search.
//!
//! Every turn is written to the `messages` table and indexed in the
//! `messages_fts` virtual table in one transaction. Rows are never updated
//! or deleted, so concurrent sessions cannot conflict on individual
//! records. Display order is timestamp ascending; retrieval order is
//! timestamp descending. Equal timestamps fall back to insertion order.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Message, Role};

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one turn and index its text. The row and its FTS entry
    /// commit together.
    pub async fn insert(&self, msg: &Message) -> Result<()> {
        let context_json = match &msg.context {
            Some(texts) => Some(serde_json::to_string(texts)?),
            None => None,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, username, role, text, timestamp, context_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.username)
        .bind(msg.role.as_str())
        .bind(&msg.text)
        .bind(msg.timestamp)
        .bind(&context_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO messages_fts (message_id, username, text) VALUES (?, ?, ?)")
            .bind(&msg.id)
            .bind(&msg.username)
            .bind(&msg.text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Full persisted log for a user, oldest first.
    pub async fn history(&self, username: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, role, text, timestamp, context_json
            FROM messages
            WHERE username = ?
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// The `limit` most recent turns for `username` whose text matches
    /// `query`, newest first. Matching is tokenized keyword match via FTS5
    /// — not substring, not semantic similarity.
    pub async fn search_recent(
        &self,
        username: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let Some(expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT m.id, m.username, m.role, m.text, m.timestamp, m.context_json
            FROM messages_fts
            JOIN messages m ON m.id = messages_fts.message_id
            WHERE messages_fts MATCH ? AND m.username = ?
            ORDER BY m.timestamp DESC, m.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// Number of persisted turns for a user.
    pub async fn count(&self, username: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let role_str: String = row.get("role");
    let context_json: Option<String> = row.get("context_json");
    let context = match context_json {
        Some(json) => {
            Some(serde_json::from_str(&json).with_context(|| "Invalid context_json in store")?)
        }
        None => None,
    };

    Ok(Message {
        id: row.get("id"),
        username: row.get("username"),
        role: Role::parse(&role_str)?,
        text: row.get("text"),
        timestamp: row.get("timestamp"),
        context,
    })
}

/// Build an FTS5 MATCH expression from a raw utterance.
///
/// The utterance is split into alphanumeric terms; each term is quoted and
/// the terms are OR-combined, so any matching term counts as a hit and
/// FTS5 query operators in user text carry no meaning. Returns `None` when
/// the utterance has no indexable terms.
pub fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, MessageStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (tmp, MessageStore::new(pool))
    }

    fn message_at(username: &str, text: &str, timestamp: i64) -> Message {
        let mut msg = Message::new(username, Role::User, text);
        msg.timestamp = timestamp;
        msg
    }

    #[test]
    fn test_fts_match_expr_quotes_terms() {
        assert_eq!(fts_match_expr("cats"), Some("\"cats\"".to_string()));
        assert_eq!(
            fts_match_expr("how are you?"),
            Some("\"how\" OR \"are\" OR \"you\"".to_string())
        );
    }

    #[test]
    fn test_fts_match_expr_strips_operators() {
        // Bare AND/OR/NOT would be FTS5 operators; quoting neutralizes them
        assert_eq!(
            fts_match_expr("cats AND dogs"),
            Some("\"cats\" OR \"AND\" OR \"dogs\"".to_string())
        );
    }

    #[test]
    fn test_fts_match_expr_empty() {
        assert_eq!(fts_match_expr(""), None);
        assert_eq!(fts_match_expr("?!... --"), None);
    }

    #[tokio::test]
    async fn test_history_preserves_insertion_order() {
        let (_tmp, store) = test_store().await;

        // Equal timestamps: insertion order must break the tie
        store.insert(&message_at("alice", "first", 1000)).await.unwrap();
        store.insert(&message_at("alice", "second", 1000)).await.unwrap();
        store.insert(&message_at("alice", "third", 2000)).await.unwrap();

        let history = store.history("alice").await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_search_recent_orders_by_recency() {
        let (_tmp, store) = test_store().await;

        store
            .insert(&message_at("alice", "cats are great", 1000))
            .await
            .unwrap();
        store
            .insert(&message_at("alice", "dogs are great", 2000))
            .await
            .unwrap();
        store
            .insert(&message_at("alice", "cats rule", 3000))
            .await
            .unwrap();

        let matches = store.search_recent("alice", "cats", 5).await.unwrap();
        let texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["cats rule", "cats are great"]);
    }

    #[tokio::test]
    async fn test_search_recent_bounded_and_scoped() {
        let (_tmp, store) = test_store().await;

        for i in 0..8 {
            store
                .insert(&message_at("alice", &format!("cats note {}", i), 1000 + i))
                .await
                .unwrap();
        }
        store
            .insert(&message_at("bob", "cats elsewhere", 9000))
            .await
            .unwrap();

        let matches = store.search_recent("alice", "cats", 5).await.unwrap();
        assert_eq!(matches.len(), 5);
        for m in &matches {
            assert_eq!(m.username, "alice");
        }
    }

    #[tokio::test]
    async fn test_search_recent_no_match() {
        let (_tmp, store) = test_store().await;
        store
            .insert(&message_at("alice", "hello there", 1000))
            .await
            .unwrap();

        assert!(store
            .search_recent("alice", "zebras", 5)
            .await
            .unwrap()
            .is_empty());
        assert!(store.search_recent("alice", "?!", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_roundtrip() {
        let (_tmp, store) = test_store().await;

        let audit = Message::new("alice", Role::System, "ctx hello")
            .with_context(vec!["ctx".to_string()]);
        store.insert(&audit).await.unwrap();

        let history = store.history("alice").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].context.as_deref(), Some(&["ctx".to_string()][..]));
    }

    #[tokio::test]
    async fn test_count() {
        let (_tmp, store) = test_store().await;
        assert_eq!(store.count("alice").await.unwrap(), 0);
        store.insert(&message_at("alice", "one", 1)).await.unwrap();
        store.insert(&message_at("bob", "two", 2)).await.unwrap();
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }
}
