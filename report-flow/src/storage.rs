use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::{assistant::AssistantConversation, error::Result, session::ReportSession};

/// Everything one user works with: a report session and an assistant transcript.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub report: ReportSession,
    pub assistant: AssistantConversation,
}

impl Session {
    pub fn new(id: impl Into<String>, report: ReportSession, assistant: AssistantConversation) -> Self {
        Self {
            id: id.into(),
            report,
            assistant,
        }
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;

    /// Drop sessions not loaded for at least `max_idle`; returns how many went.
    async fn evict_idle(&self, _max_idle: Duration) -> Result<usize> {
        Ok(0)
    }
}

struct StoredSession {
    session: Session,
    last_access: Instant,
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, StoredSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(
            session.id.clone(),
            StoredSession {
                session,
                last_access: Instant::now(),
            },
        );
        info!("{} sessions in memory", self.sessions.len());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get_mut(id).map(|mut entry| {
            entry.last_access = Instant::now();
            entry.session.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        info!("{} sessions in memory", self.sessions.len());
        Ok(())
    }

    async fn evict_idle(&self, max_idle: Duration) -> Result<usize> {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.last_access.elapsed() < max_idle);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(
                "Evicted {} idle sessions, {} remain",
                evicted,
                self.sessions.len()
            );
        }
        Ok(evicted)
    }
}
