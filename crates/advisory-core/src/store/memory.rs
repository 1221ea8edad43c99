//! In-memory [`StateStore`] backed by a `HashMap` behind `RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::ConversationState;

use super::StateStore;

/// Process-lifetime conversation state map.
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("conversation state lock poisoned")
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let states = self.states.read().map_err(poisoned)?;
        Ok(states.get(conversation_id).cloned())
    }

    async fn put(&self, conversation_id: &str, state: ConversationState) -> Result<()> {
        let mut states = self.states.write().map_err(poisoned)?;
        states.insert(conversation_id.to_string(), state);
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let mut states = self.states.write().map_err(poisoned)?;
        Ok(states.remove(conversation_id).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.states.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.states.read().map_err(poisoned)?.len())
    }
}
