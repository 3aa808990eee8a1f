//! Composite group keys

use crate::models::Val;
use serde::{Deserialize, Serialize};

/// One level of a group key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// Values of the fields grouped at this level
    Group(Vec<Val>),
    /// Ungrouped detail row; the sequence is assigned by the store that keeps it
    Detail(u64),
}

/// Identity of an item within its depth: one part per depth from 0 to the
/// item's own depth. Equal keys at the same depth are the same logical row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey {
    parts: Vec<KeyPart>,
}

impl GroupKey {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self { parts }
    }

    pub fn child(&self, part: KeyPart) -> Self {
        let mut parts = Vec::with_capacity(self.parts.len() + 1);
        parts.extend_from_slice(&self.parts);
        parts.push(part);
        Self { parts }
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<KeyPart> {
        self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The key of the enclosing group; the root key for depth-0 items.
    pub fn parent(&self) -> GroupKey {
        let end = self.parts.len().saturating_sub(1);
        Self {
            parts: self.parts[..end].to_vec(),
        }
    }

    /// Whether `self` lies beneath `ancestor`.
    pub fn starts_with(&self, ancestor: &GroupKey) -> bool {
        self.parts.len() > ancestor.parts.len() && self.parts.starts_with(&ancestor.parts)
    }

    pub fn is_detail(&self) -> bool {
        matches!(self.parts.last(), Some(KeyPart::Detail(_)))
    }

    /// Give a detail key its store-unique sequence number.
    pub(crate) fn assign_sequence(&mut self, sequence: u64) {
        if let Some(KeyPart::Detail(seq)) = self.parts.last_mut() {
            *seq = sequence;
        }
    }

    /// Stable textual form handed to clients for open-group tracking.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.parts).unwrap_or_default()
    }
}
