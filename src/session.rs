use crate::token::TokenState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "crm_session";

struct Entry {
    tokens: TokenState,
    last_seen: Instant,
}

/// Outcome of writing a refreshed access token back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBack {
    Stored,
    /// Another request of the same session changed the token first; its value stays.
    Superseded,
    /// The session was cleared or expired while the request ran.
    Missing,
}

/// In-memory session store. Entries expire after `ttl` without a read or write.
#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Stores the tokens under a fresh random id and returns the id.
    pub async fn create(&self, tokens: TokenState) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let mut entries = self.entries.lock().await;
        self.prune_locked(&mut entries);
        entries.insert(
            id.clone(),
            Entry {
                tokens,
                last_seen: Instant::now(),
            },
        );
        id
    }

    pub async fn get(&self, id: &str) -> Option<TokenState> {
        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        let entry = entries.get_mut(id)?;
        if entry.last_seen.elapsed() > ttl {
            entries.remove(id);
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.tokens.clone())
    }

    /// Compare-and-swap keyed on the access token: the stored tokens are replaced
    /// only while the stored access token is still `expected`. A rotated refresh
    /// token travels along with the new access token.
    pub async fn write_back(&self, id: &str, expected: &str, tokens: TokenState) -> WriteBack {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            return WriteBack::Missing;
        };
        if entry.tokens.access_token != expected {
            return WriteBack::Superseded;
        }
        entry.tokens = tokens;
        entry.last_seen = Instant::now();
        WriteBack::Stored
    }

    pub async fn remove(&self, id: &str) -> Option<TokenState> {
        self.entries.lock().await.remove(id).map(|entry| entry.tokens)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn prune_locked(&self, entries: &mut HashMap<String, Entry>) {
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.last_seen.elapsed() <= ttl);
    }
}
