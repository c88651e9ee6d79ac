//! Persisted conversation history.

use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_models::ConversationTurn;
use switchyard_storage::{keys, KvStore};
use tracing::warn;

/// Ordered turn log, durable through the host KV facility.
pub struct ConversationLog {
    turns: Mutex<Vec<ConversationTurn>>,
    kv: Option<Arc<dyn KvStore>>,
}

impl ConversationLog {
    pub fn new(kv: Option<Arc<dyn KvStore>>) -> Self {
        let log = Self {
            turns: Mutex::new(Vec::new()),
            kv,
        };
        log.load();
        log
    }

    pub fn append(&self, turn: ConversationTurn) {
        self.turns.lock().push(turn);
        self.persist();
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    pub fn clear(&self) {
        self.turns.lock().clear();
        self.persist();
    }

    /// Last `max_turns` turns, dropping oldest ones until the combined
    /// content fits the character budget.
    pub fn tail(&self, max_turns: usize, char_budget: usize) -> Vec<ConversationTurn> {
        let turns = self.turns.lock();
        let mut tail: Vec<ConversationTurn> =
            turns.iter().rev().take(max_turns).cloned().collect();
        tail.reverse();

        let mut total: usize = tail.iter().map(|turn| turn.content.len()).sum();
        while total > char_budget && !tail.is_empty() {
            let removed = tail.remove(0);
            total -= removed.content.len();
        }
        tail
    }

    fn load(&self) {
        let Some(kv) = &self.kv else { return };
        match kv.get(keys::CONVERSATIONS) {
            Ok(Some(payload)) => match serde_json::from_str::<Vec<ConversationTurn>>(&payload) {
                Ok(turns) => *self.turns.lock() = turns,
                Err(error) => {
                    warn!(error = %error, "persisted conversation is corrupt; starting empty")
                }
            },
            Ok(None) => {}
            Err(error) => warn!(error = %error, "failed to read persisted conversation"),
        }
    }

    fn persist(&self) {
        let Some(kv) = &self.kv else { return };
        let turns = self.turns.lock().clone();
        match serde_json::to_string(&turns) {
            Ok(payload) => {
                if let Err(error) = kv.set(keys::CONVERSATIONS, &payload) {
                    warn!(error = %error, "failed to persist conversation");
                }
            }
            Err(error) => warn!(error = %error, "failed to serialize conversation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_storage::MemoryKvStore;

    #[test]
    fn test_append_and_tail() {
        let log = ConversationLog::new(None);
        log.append(ConversationTurn::user("one"));
        log.append(ConversationTurn::assistant("two"));
        log.append(ConversationTurn::user("three"));

        let tail = log.tail(2, 1_000);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "two");
        assert_eq!(tail[1].content, "three");
    }

    #[test]
    fn test_tail_respects_char_budget() {
        let log = ConversationLog::new(None);
        log.append(ConversationTurn::user("aaaaaaaaaa"));
        log.append(ConversationTurn::user("bbbbb"));
        log.append(ConversationTurn::user("cc"));

        // Budget fits only the last two turns.
        let tail = log.tail(10, 8);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "bbbbb");
    }

    #[test]
    fn test_round_trips_through_kv() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        {
            let log = ConversationLog::new(Some(kv.clone()));
            log.append(ConversationTurn::user("hello"));
        }

        let revived = ConversationLog::new(Some(kv));
        assert_eq!(revived.len(), 1);
        assert_eq!(revived.turns()[0].content, "hello");
    }
}
