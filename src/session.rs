//! Conversation session.
//!
//! A `Session` is the live, in-memory representation of one authenticated
//! user's ongoing conversation: the turns appended since login plus the
//! external model conversation handle. It mediates between retrieval, the
//! message store, and the model API.
//!
//! Lifecycle: created after a successful authenticate, discarded at logout.
//! The in-memory view starts empty at login; persisted history is shown by
//! querying the store directly, not by restoring the view.
//!
//! Invariant: every turn is durably stored before it is appended to the
//! in-memory view, so a crash loses at most the in-flight turn.

use anyhow::{bail, Result};

use crate::config::RetrievalConfig;
use crate::model::ChatModel;
use crate::models::{Message, Role};
use crate::retrieval;
use crate::store::MessageStore;

pub struct Session {
    username: String,
    turns: Vec<Message>,
    store: MessageStore,
    model: Box<dyn ChatModel>,
    retrieval: RetrievalConfig,
}

impl Session {
    /// Open a session for an already-authenticated user.
    pub fn open(
        username: &str,
        store: MessageStore,
        model: Box<dyn ChatModel>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            username: username.to_string(),
            turns: Vec::new(),
            store,
            model,
            retrieval,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Turns appended during this login, oldest first.
    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    /// Process one user turn to completion.
    ///
    /// Persists the user turn, grounds the prompt in retrieved history,
    /// records an audit turn carrying the augmented prompt and the raw
    /// retrieved list, calls the model, and persists the reply. Every
    /// successful call adds exactly three rows to the store and three
    /// entries to the in-memory view.
    ///
    /// A model failure becomes a synthetic reply embedding the error text;
    /// the call is never retried. A retrieval failure degrades to an
    /// ungrounded prompt. Store write failures propagate and abort the
    /// cycle.
    pub async fn submit(&mut self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            bail!("message must not be empty");
        }

        let user_turn = Message::new(&self.username, Role::User, text);
        self.store.insert(&user_turn).await?;
        self.turns.push(user_turn);

        let retrieved =
            match retrieval::retrieve(&self.store, &self.username, text, self.retrieval.limit)
                .await
            {
                Ok(texts) => texts,
                Err(e) => {
                    eprintln!(
                        "Warning: retrieval unavailable, replying without context: {}",
                        e
                    );
                    Vec::new()
                }
            };

        let context = retrieval::build_context(&retrieved, self.retrieval.max_context_chars);
        let augmented = retrieval::compose_prompt(&context, text);

        let audit_turn =
            Message::new(&self.username, Role::System, &augmented).with_context(retrieved);
        self.store.insert(&audit_turn).await?;
        self.turns.push(audit_turn);

        let reply = match self.model.send(&augmented).await {
            Ok(reply) => reply,
            Err(e) => format!("Error: {}", e),
        };

        let assistant_turn = Message::new(&self.username, Role::Assistant, &reply);
        self.store.insert(&assistant_turn).await?;
        self.turns.push(assistant_turn);

        Ok(reply)
    }

    /// Discard the in-memory view and the model handle. Persisted history
    /// is untouched.
    pub fn logout(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EchoChat;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn send(&mut self, _prompt: &str) -> Result<String> {
            Err(anyhow!("connection refused"))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    async fn test_store() -> (tempfile::TempDir, MessageStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (tmp, MessageStore::new(pool))
    }

    fn open_session(store: &MessageStore, model: Box<dyn ChatModel>) -> Session {
        Session::open("bob", store.clone(), model, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_submit_persists_three_turns() {
        let (_tmp, store) = test_store().await;
        let mut session = open_session(&store, Box::new(EchoChat::default()));

        session.submit("hello").await.unwrap();

        assert_eq!(store.count("bob").await.unwrap(), 3);
        assert_eq!(session.turns().len(), 3);

        let roles: Vec<Role> = session.turns().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::System, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_submit_audit_turn_carries_prompt_and_context() {
        let (_tmp, store) = test_store().await;
        let mut session = open_session(&store, Box::new(EchoChat::default()));

        let reply = session.submit("hello").await.unwrap();

        let audit = &session.turns()[1];
        assert!(audit.text.ends_with("hello"));
        assert!(audit.context.is_some());
        // The echo provider returns the augmented prompt verbatim
        assert_eq!(reply, audit.text);
        assert_eq!(session.turns()[2].text, audit.text);
    }

    #[tokio::test]
    async fn test_submit_grounds_in_prior_turns() {
        let (_tmp, store) = test_store().await;
        let mut session = open_session(&store, Box::new(EchoChat::default()));

        session.submit("cats are great").await.unwrap();
        session.submit("tell me about cats").await.unwrap();

        let audit = &session.turns()[4];
        let retrieved = audit.context.as_ref().unwrap();
        assert!(retrieved.iter().any(|t| t == "cats are great"));
    }

    #[tokio::test]
    async fn test_model_failure_becomes_visible_reply() {
        let (_tmp, store) = test_store().await;
        let mut session = open_session(&store, Box::new(FailingModel));

        let reply = session.submit("hello").await.unwrap();

        assert!(reply.contains("connection refused"));
        // The failure still produces exactly three persisted turns
        assert_eq!(store.count("bob").await.unwrap(), 3);
        assert_eq!(session.turns()[2].text, reply);
    }

    #[tokio::test]
    async fn test_empty_submission_rejected() {
        let (_tmp, store) = test_store().await;
        let mut session = open_session(&store, Box::new(EchoChat::default()));

        assert!(session.submit("   ").await.is_err());
        assert_eq!(store.count("bob").await.unwrap(), 0);
        assert!(session.turns().is_empty());
    }
}
