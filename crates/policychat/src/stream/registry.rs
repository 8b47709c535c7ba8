//! One in-flight turn per chat.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use policychat_protocol::ChatId;
use std::sync::Arc;

/// Chats that currently have a turn streaming.
#[derive(Debug, Clone, Default)]
pub struct TurnRegistry {
    active: Arc<DashMap<ChatId, ()>>,
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `chat_id` for a turn. `None` if a turn is already in flight there.
    pub fn try_acquire(&self, chat_id: ChatId) -> Option<TurnGuard> {
        match self.active.entry(chat_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(TurnGuard {
                    chat_id,
                    active: Arc::clone(&self.active),
                })
            }
        }
    }

    pub fn is_active(&self, chat_id: ChatId) -> bool {
        self.active.contains_key(&chat_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Releases the chat when dropped.
#[derive(Debug)]
pub struct TurnGuard {
    chat_id: ChatId,
    active: Arc<DashMap<ChatId, ()>>,
}

impl TurnGuard {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.active.remove(&self.chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let registry = TurnRegistry::new();

        let guard = registry.try_acquire(5).unwrap();
        assert!(registry.is_active(5));
        assert!(registry.try_acquire(5).is_none());
        assert!(registry.try_acquire(6).is_some());

        drop(guard);
        assert!(!registry.is_active(5));
        assert!(registry.try_acquire(5).is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = TurnRegistry::new();
        let other = registry.clone();

        let _guard = registry.try_acquire(1).unwrap();
        assert!(other.try_acquire(1).is_none());
        assert_eq!(other.active_count(), 1);
    }
}
