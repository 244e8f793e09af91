//! Per-conversation ephemeral state.
//!
//! Nothing here survives a restart. Each conversation holds at most one
//! [`PendingAction`]; setting a new one replaces the old one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Opaque conversation identifier (a Telegram chat id rendered as decimal).
pub type ConversationId = String;

/// A multi-step flow waiting for one more text message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PendingAction {
    #[default]
    None,
    /// "Mint to specific collection" was pressed on image `image_id`.
    AwaitingCollectionAddress { image_id: String },
    /// "Generate Image" was pressed from the main menu.
    AwaitingImagePrompt,
}

impl PendingAction {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub pending: PendingAction,
    /// Metadata URI pinned by the most recent collection flow.
    pub last_metadata_uri: Option<String>,
}

/// Shared, concurrent store of [`ConversationState`] keyed by conversation id.
#[derive(Debug, Default)]
pub struct SessionStore {
    states: RwLock<HashMap<ConversationId, ConversationState>>,
    locks: StdMutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

/// Exclusive turn on one conversation, released on drop.
///
/// The conversation's lock entry is dropped with the last turn that
/// references it, so the lock table only holds conversations with an event
/// in flight.
pub struct ConversationTurn<'a> {
    store: &'a SessionStore,
    conversation_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationTurn<'_> {
    fn drop(&mut self) {
        // Release first: the guard holds a reference to the lock itself.
        self.guard.take();
        let mut locks = self.store.lock_table();
        if locks
            .get(&self.conversation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.conversation_id);
        }
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a conversation's state. Unknown conversations are idle.
    pub async fn get(&self, conversation_id: &str) -> ConversationState {
        self.states
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn pending(&self, conversation_id: &str) -> PendingAction {
        self.get(conversation_id).await.pending
    }

    /// Replace the pending action, returning the previous one.
    pub async fn set_pending(&self, conversation_id: &str, action: PendingAction) -> PendingAction {
        let mut states = self.states.write().await;
        let state = states.entry(conversation_id.to_string()).or_default();
        std::mem::replace(&mut state.pending, action)
    }

    /// Reset the pending action to `None`, returning what was there.
    pub async fn clear_pending(&self, conversation_id: &str) -> PendingAction {
        self.set_pending(conversation_id, PendingAction::None).await
    }

    pub async fn set_last_metadata_uri(&self, conversation_id: &str, uri: impl Into<String>) {
        let mut states = self.states.write().await;
        states
            .entry(conversation_id.to_string())
            .or_default()
            .last_metadata_uri = Some(uri.into());
    }

    pub async fn last_metadata_uri(&self, conversation_id: &str) -> Option<String> {
        self.get(conversation_id).await.last_metadata_uri
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<ConversationId, Arc<Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire the serialization lock for one conversation.
    ///
    /// Hold the turn for the whole handling of an event so two events from
    /// the same conversation never read the same pre-update state.
    pub async fn lock_conversation(&self, conversation_id: &str) -> ConversationTurn<'_> {
        let lock = Arc::clone(
            self.lock_table()
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        ConversationTurn {
            store: self,
            conversation_id: conversation_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unknown_conversation_is_idle() {
        let store = SessionStore::new();
        assert_eq!(store.pending("42").await, PendingAction::None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn set_pending_overwrites_previous() {
        let store = SessionStore::new();
        store
            .set_pending(
                "42",
                PendingAction::AwaitingCollectionAddress {
                    image_id: "a".to_string(),
                },
            )
            .await;

        let previous = store
            .set_pending(
                "42",
                PendingAction::AwaitingCollectionAddress {
                    image_id: "b".to_string(),
                },
            )
            .await;

        assert_eq!(
            previous,
            PendingAction::AwaitingCollectionAddress {
                image_id: "a".to_string()
            }
        );
        assert_eq!(
            store.pending("42").await,
            PendingAction::AwaitingCollectionAddress {
                image_id: "b".to_string()
            }
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn clear_pending_keeps_metadata_uri() {
        let store = SessionStore::new();
        store.set_last_metadata_uri("7", "ipfs://meta").await;
        store
            .set_pending("7", PendingAction::AwaitingImagePrompt)
            .await;

        store.clear_pending("7").await;

        let state = store.get("7").await;
        assert!(state.pending.is_none());
        assert_eq!(state.last_metadata_uri.as_deref(), Some("ipfs://meta"));
    }

    #[tokio::test]
    async fn conversations_are_independent() {
        let store = SessionStore::new();
        store
            .set_pending("1", PendingAction::AwaitingImagePrompt)
            .await;

        assert_eq!(store.pending("1").await, PendingAction::AwaitingImagePrompt);
        assert_eq!(store.pending("2").await, PendingAction::None);
    }

    #[tokio::test]
    async fn conversation_lock_serializes_same_id() {
        let store = Arc::new(SessionStore::new());
        let guard = store.lock_conversation("1").await;

        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock_conversation("1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different conversation is not blocked.
        let _other = tokio::time::timeout(Duration::from_millis(100), store.lock_conversation("2"))
            .await
            .expect("other conversation lock");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender finishes")
            .expect("contender task");
    }

    #[tokio::test]
    async fn released_conversation_locks_are_dropped() {
        let store = SessionStore::new();
        {
            let _first = store.lock_conversation("1").await;
            let _second = store.lock_conversation("2").await;
            assert_eq!(store.lock_table().len(), 2);
        }
        assert!(store.lock_table().is_empty());
    }

    #[tokio::test]
    async fn waiting_turn_keeps_lock_entry() {
        let store = Arc::new(SessionStore::new());
        let first = store.lock_conversation("1").await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _turn = store.lock_conversation("1").await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still references the lock, so the entry survives.
        drop(first);
        assert_eq!(store.lock_table().len(), 1);

        waiter.await.expect("waiter task");
        assert!(store.lock_table().is_empty());
    }
}
