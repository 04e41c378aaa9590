//! B+ tree node representation.

use common::{PageId, RecordId};
use serde::{Deserialize, Serialize};
use types::{compare_composite, CompositeKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Internal,
    Leaf,
}

/// A B+ tree node, either an internal separator node or a leaf carrying
/// record identifiers. Duplicate keys in a leaf are kept sorted by key
/// and then by record id, which doubles as the insertion-order tie-break
/// a non-unique index needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BTreeNode {
    Internal {
        /// Separator keys: n keys for n+1 children.
        keys: Vec<CompositeKey>,
        children: Vec<PageId>,
    },
    Leaf {
        /// (key, record id) pairs in ascending order.
        entries: Vec<(CompositeKey, RecordId)>,
        next_leaf: Option<PageId>,
        prev_leaf: Option<PageId>,
    },
}

impl BTreeNode {
    pub fn new_leaf() -> Self {
        Self::Leaf {
            entries: Vec::new(),
            next_leaf: None,
            prev_leaf: None,
        }
    }

    pub fn new_internal(keys: Vec<CompositeKey>, children: Vec<PageId>) -> Self {
        Self::Internal { keys, children }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Internal { .. } => NodeType::Internal,
            Self::Leaf { .. } => NodeType::Leaf,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Internal { keys, .. } => keys.len(),
            Self::Leaf { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Order two leaf entries first by key, then by record id — the
/// deterministic tie-break a non-unique index relies on for duplicate runs.
pub fn entry_order(a: &(CompositeKey, RecordId), b: &(CompositeKey, RecordId)) -> std::cmp::Ordering {
    compare_composite(&a.0, &b.0).then_with(|| record_id_order(a.1, b.1))
}

pub fn record_id_order(a: RecordId, b: RecordId) -> std::cmp::Ordering {
    (a.page_id.0, a.slot).cmp(&(b.page_id.0, b.slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{KeySegment, KeyType};

    fn key(v: i32) -> CompositeKey {
        vec![KeySegment::new(v.to_le_bytes().to_vec(), KeyType::Integer, false)]
    }

    #[test]
    fn new_leaf_is_empty() {
        let leaf = BTreeNode::new_leaf();
        assert!(leaf.is_leaf());
        assert!(leaf.is_empty());
        assert_eq!(leaf.len(), 0);
    }

    #[test]
    fn new_internal_has_correct_type() {
        let internal = BTreeNode::new_internal(vec![key(5)], vec![PageId(0), PageId(1)]);
        assert!(!internal.is_leaf());
        assert_eq!(internal.node_type(), NodeType::Internal);
        assert_eq!(internal.len(), 1);
    }

    #[test]
    fn entry_order_breaks_ties_by_record_id() {
        let rid_a = RecordId { page_id: PageId(0), slot: 0 };
        let rid_b = RecordId { page_id: PageId(0), slot: 1 };
        let a = (key(1), rid_a);
        let b = (key(1), rid_b);
        assert_eq!(entry_order(&a, &b), std::cmp::Ordering::Less);
    }
}
