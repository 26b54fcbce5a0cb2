use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    domain::UserId,
    model::{ModelClient, ModelError, Turn},
    persona::Persona,
};

/// One user's conversation with the model.
///
/// The transcript always starts with the persona preamble. A successful
/// [`ChatSession::send`] appends the user turn and the model turn together; a
/// failed one leaves the transcript exactly as it was.
///
/// The transcript lock is held for the whole remote call, so overlapping
/// messages from the same user are answered one after the other and the
/// transcript never interleaves two exchanges.
pub struct ChatSession {
    user: UserId,
    model: Arc<dyn ModelClient>,
    transcript: Mutex<Vec<Turn>>,
}

impl ChatSession {
    fn new(user: UserId, seed: &[Turn], model: Arc<dyn ModelClient>) -> Self {
        Self {
            user,
            model,
            transcript: Mutex::new(seed.to_vec()),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Forward `text` to the model and return its reply.
    pub async fn send(&self, text: &str) -> Result<String, ModelError> {
        let mut transcript = self.transcript.lock().await;

        let mut next = Vec::with_capacity(transcript.len() + 2);
        next.extend_from_slice(&transcript);
        next.push(Turn::user(text));

        let reply = self.model.generate(&next).await?;

        next.push(Turn::model(reply.clone()));
        *transcript = next;
        Ok(reply)
    }

    /// Snapshot of the transcript, preamble included.
    pub async fn transcript(&self) -> Vec<Turn> {
        self.transcript.lock().await.clone()
    }

    pub async fn turn_count(&self) -> usize {
        self.transcript.lock().await.len()
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("user", &self.user)
            .field("provider", &self.model.provider())
            .finish_non_exhaustive()
    }
}

/// Process-wide map from user to their current session.
///
/// Sessions live until reset or process exit; there is no eviction and no
/// persistence.
pub struct SessionStore {
    persona: Persona,
    model: Arc<dyn ModelClient>,
    sessions: Mutex<HashMap<UserId, Arc<ChatSession>>>,
}

impl SessionStore {
    pub fn new(persona: Persona, model: Arc<dyn ModelClient>) -> Self {
        Self {
            persona,
            model,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// The user's session, creating a preamble-only one on first contact.
    pub async fn get_or_create(&self, user: UserId) -> Arc<ChatSession> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(user)
            .or_insert_with(|| {
                tracing::debug!(user = %user, "creating chat session");
                Arc::new(self.fresh(user))
            })
            .clone()
    }

    /// Replace the user's session (if any) with a preamble-only one.
    pub async fn reset(&self, user: UserId) -> Arc<ChatSession> {
        let session = Arc::new(self.fresh(user));
        self.sessions.lock().await.insert(user, session.clone());
        session
    }

    pub async fn exists(&self, user: UserId) -> bool {
        self.sessions.lock().await.contains_key(&user)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    fn fresh(&self, user: UserId) -> ChatSession {
        ChatSession::new(user, &self.persona.seed(), self.model.clone())
    }
}
