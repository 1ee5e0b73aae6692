//! Authoritative document buffer.
//!
//! The server holds exactly one plain-text document. Every accepted mutation,
//! whether a full replacement or a positional insert/delete, bumps the version
//! by one. No history is kept: the content only reflects the last mutation.
//!
//! Positions and lengths count Unicode scalar values, never bytes, so an
//! operation can not split a character.

use serde::{Deserialize, Serialize};

/// A positional edit against the current content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    /// Insert `content` before the character at `position`
    Insert { position: i64, content: String },
    /// Remove `length` characters starting at `position`
    Delete { position: i64, length: i64 },
}

impl Operation {
    pub fn insert(position: i64, content: impl Into<String>) -> Self {
        Operation::Insert {
            position,
            content: content.into(),
        }
    }

    pub fn delete(position: i64, length: i64) -> Self {
        Operation::Delete { position, length }
    }

    pub fn position(&self) -> i64 {
        match self {
            Operation::Insert { position, .. } | Operation::Delete { position, .. } => *position,
        }
    }
}

/// The shared text and its version counter
#[derive(Debug, Clone, Default)]
pub struct DocumentState {
    content: String,
    version: u64,
}

impl DocumentState {
    /// Empty document at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content and version
    pub fn read(&self) -> (&str, u64) {
        (&self.content, self.version)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Overwrite the whole content (last write wins)
    pub fn replace(&mut self, new_content: impl Into<String>) -> u64 {
        self.content = new_content.into();
        self.bump()
    }

    /// Apply a positional operation, clamping out-of-range positions
    pub fn apply(&mut self, op: &Operation) -> u64 {
        let len = self.len();

        match op {
            Operation::Insert { position, content } => {
                let at = self.byte_offset(clamp(*position, len));
                self.content.insert_str(at, content);
            }
            Operation::Delete { position, length } => {
                let start = clamp(*position, len);
                let end = clamp(position.saturating_add((*length).max(0)), len).max(start);
                let (from, to) = (self.byte_offset(start), self.byte_offset(end));
                self.content.replace_range(from..to, "");
            }
        }

        self.bump()
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Byte offset of the character at `char_index` (or the end)
    fn byte_offset(&self, char_index: usize) -> usize {
        self.content
            .char_indices()
            .nth(char_index)
            .map(|(offset, _)| offset)
            .unwrap_or(self.content.len())
    }
}

fn clamp(position: i64, len: usize) -> usize {
    if position <= 0 {
        0
    } else {
        (position as u64).min(len as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str) -> DocumentState {
        let mut doc = DocumentState::new();
        doc.replace(content);
        doc
    }

    #[test]
    fn test_new_document_is_empty() {
        let doc = DocumentState::new();
        assert_eq!(doc.read(), ("", 0));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_replace_is_last_write_wins() {
        let mut doc = DocumentState::new();
        assert_eq!(doc.replace("A"), 1);
        assert_eq!(doc.replace("B"), 2);
        assert_eq!(doc.read(), ("B", 2));
    }

    #[test]
    fn test_insert_in_middle() {
        let mut doc = doc("helo");
        doc.apply(&Operation::insert(3, "l"));
        assert_eq!(doc.content(), "hello");
    }

    #[test]
    fn test_insert_clamps_past_end() {
        let mut doc = doc("hello");
        let version = doc.apply(&Operation::insert(100, "X"));
        assert_eq!(doc.content(), "helloX");
        assert_eq!(version, 2);
    }

    #[test]
    fn test_insert_clamps_negative_position() {
        let mut doc = doc("hello");
        doc.apply(&Operation::insert(-4, ">"));
        assert_eq!(doc.content(), ">hello");
    }

    #[test]
    fn test_delete_span() {
        let mut doc = doc("hello world");
        doc.apply(&Operation::delete(5, 6));
        assert_eq!(doc.content(), "hello");
    }

    #[test]
    fn test_delete_clamps_span() {
        let mut doc = doc("hello");
        doc.apply(&Operation::delete(3, 100));
        assert_eq!(doc.content(), "hel");

        doc.apply(&Operation::delete(50, 2));
        assert_eq!(doc.content(), "hel");

        doc.apply(&Operation::delete(1, -3));
        assert_eq!(doc.content(), "hel");
        assert_eq!(doc.version(), 4);
    }

    #[test]
    fn test_positions_count_characters() {
        let mut doc = doc("héllo");
        doc.apply(&Operation::insert(2, "_"));
        assert_eq!(doc.content(), "hé_llo");

        doc.apply(&Operation::delete(1, 1));
        assert_eq!(doc.content(), "h_llo");
        assert_eq!(doc.len(), 5);
    }

    #[test]
    fn test_noop_operation_still_bumps_version() {
        let mut doc = DocumentState::new();
        assert_eq!(doc.apply(&Operation::delete(0, 10)), 1);
        assert_eq!(doc.apply(&Operation::insert(0, "")), 2);
        assert_eq!(doc.read(), ("", 2));
    }
}
