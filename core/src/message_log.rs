use crate::models::Message;

/// Insertion-ordered message list keyed by (`timestamp`, `content`).
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn contains(&self, message: &Message) -> bool {
        self.entries.iter().any(|known| known.same_identity(message))
    }

    /// Append unconditionally. Used for optimistic inserts.
    pub fn push(&mut self, message: Message) {
        self.entries.push(message);
    }

    /// Append every message not already present, preserving the incoming
    /// order, and return how many were added. Duplicates inside `incoming`
    /// collapse to their first occurrence.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) -> usize {
        let before = self.entries.len();
        for message in incoming {
            if !self.contains(&message) {
                self.entries.push(message);
            }
        }
        self.entries.len() - before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
