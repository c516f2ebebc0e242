use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    types::{ScrapeError, ScrapeSession},
    utils::new_session_id,
};

/// When finished sessions are dropped from the store. Running sessions are
/// never evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Evict terminal sessions that finished longer ago than this.
    pub ttl: Option<Duration>,
    /// Keep at most this many terminal sessions, oldest evicted first.
    pub max_terminal: Option<usize>,
}

impl RetentionPolicy {
    pub fn keep_all() -> Self {
        RetentionPolicy::default()
    }
}

/// Registry of scrape sessions. Each entry has its own lock so polling one
/// session never contends with the writer of another.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<RwLock<ScrapeSession>>>>,
    retention: RetentionPolicy,
}

impl SessionStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Registers a new session in `starting` state and returns its id.
    pub async fn create(&self) -> String {
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions).await;

        let mut id = new_session_id();
        while sessions.contains_key(&id) {
            id = new_session_id();
        }
        sessions.insert(id.clone(), Arc::new(RwLock::new(ScrapeSession::new(&id))));
        debug!("session {} registered", id);
        id
    }

    /// Point-in-time copy of a session.
    pub async fn get(&self, id: &str) -> Option<ScrapeSession> {
        let entry = self.entry(id).await?;
        let session = entry.read().await;
        Some(session.clone())
    }

    pub async fn mutate<F, R>(&self, id: &str, f: F) -> Result<R, ScrapeError>
    where
        F: FnOnce(&mut ScrapeSession) -> R,
    {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| ScrapeError::SessionNotFound(id.into()))?;
        let mut session = entry.write().await;
        Ok(f(&mut session))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn entry(&self, id: &str) -> Option<Arc<RwLock<ScrapeSession>>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn prune(&self, sessions: &mut HashMap<String, Arc<RwLock<ScrapeSession>>>) {
        if self.retention == RetentionPolicy::keep_all() {
            return;
        }

        let mut finished = vec![];
        for (id, entry) in sessions.iter() {
            let s = entry.read().await;
            if let (true, Some(at)) = (s.status.is_terminal(), s.finished_at) {
                finished.push((id.clone(), at));
            }
        }
        finished.sort_by_key(|(_, at)| *at);

        let mut evict = vec![];
        if let Some(ttl) = self.retention.ttl {
            let now = Utc::now();
            for (id, at) in &finished {
                let age = now.signed_duration_since(*at).to_std().unwrap_or_default();
                if age > ttl {
                    evict.push(id.clone());
                }
            }
        }
        if let Some(max) = self.retention.max_terminal {
            let remaining: Vec<&String> = finished
                .iter()
                .map(|(id, _)| id)
                .filter(|id| !evict.contains(*id))
                .collect();
            if remaining.len() > max {
                let excess = remaining.len() - max;
                evict.extend(remaining.into_iter().take(excess).cloned());
            }
        }

        for id in evict {
            debug!("evicting finished session {}", id);
            sessions.remove(&id);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new(RetentionPolicy::keep_all())
    }
}
