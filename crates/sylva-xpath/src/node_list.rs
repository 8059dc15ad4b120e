//! Node collections backing node-set and span values.
//!
//! Callers hand the pool either a single node, an immutable [`NodeList`] or a
//! [`MutableNodeList`]; all three are normalized into a `NodeList`, which is the
//! only representation a value payload ever stores.
use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::Error;
use crate::model::XdmNode;

/// Immutable, cheaply clonable list of node references.
pub struct NodeList<N> {
    nodes: Arc<[N]>,
}

impl<N> NodeList<N> {
    pub fn empty() -> Self {
        Self { nodes: Arc::from(Vec::new()) }
    }

    pub fn from_node(node: N) -> Self {
        Self { nodes: Arc::from(vec![node]) }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&N> {
        self.nodes.get(index)
    }

    pub fn first(&self) -> Option<&N> {
        self.nodes.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, N> {
        self.nodes.iter()
    }

    pub fn as_slice(&self) -> &[N] {
        &self.nodes
    }

    /// True when both lists share the same backing storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes)
    }
}

impl<N> Clone for NodeList<N> {
    fn clone(&self) -> Self {
        Self { nodes: Arc::clone(&self.nodes) }
    }
}

impl<N> Default for NodeList<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<N: PartialEq> PartialEq for NodeList<N> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.nodes[..] == other.nodes[..]
    }
}

impl<N: fmt::Debug> fmt::Debug for NodeList<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}

impl<N> From<Vec<N>> for NodeList<N> {
    fn from(nodes: Vec<N>) -> Self {
        Self { nodes: Arc::from(nodes) }
    }
}

impl<N> From<MutableNodeList<N>> for NodeList<N> {
    fn from(list: MutableNodeList<N>) -> Self {
        list.freeze()
    }
}

impl<N> FromIterator<N> for NodeList<N> {
    fn from_iter<I: IntoIterator<Item = N>>(iter: I) -> Self {
        Self { nodes: iter.into_iter().collect() }
    }
}

impl<'a, N> IntoIterator for &'a NodeList<N> {
    type Item = &'a N;
    type IntoIter = std::slice::Iter<'a, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// Growable node list used while a node-set is being assembled.
#[derive(Clone)]
pub struct MutableNodeList<N> {
    nodes: SmallVec<[N; 8]>,
}

impl<N> Default for MutableNodeList<N> {
    fn default() -> Self {
        Self { nodes: SmallVec::new() }
    }
}

impl<N: fmt::Debug> fmt::Debug for MutableNodeList<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}

impl<N> MutableNodeList<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: N) {
        self.nodes.push(node);
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, N> {
        self.nodes.iter()
    }

    pub fn freeze(self) -> NodeList<N> {
        self.nodes.into_iter().collect()
    }
}

impl<N: XdmNode> MutableNodeList<N> {
    /// Insert keeping document order; returns `false` when the node is already present.
    pub fn insert_in_document_order(&mut self, node: N) -> Result<bool, Error> {
        // Appending in order is the common case while walking an axis forwards.
        if let Some(last) = self.nodes.last() {
            match last.compare_document_order(&node)? {
                Ordering::Less => {}
                Ordering::Equal => return Ok(false),
                Ordering::Greater => {
                    let mut lo = 0usize;
                    let mut hi = self.nodes.len();
                    while lo < hi {
                        let mid = (lo + hi) / 2;
                        match self.nodes[mid].compare_document_order(&node)? {
                            Ordering::Less => lo = mid + 1,
                            Ordering::Equal => return Ok(false),
                            Ordering::Greater => hi = mid,
                        }
                    }
                    self.nodes.insert(lo, node);
                    return Ok(true);
                }
            }
        }
        self.nodes.push(node);
        Ok(true)
    }

    /// Sort into document order and drop duplicates.
    pub fn sort_document_order(&mut self) -> Result<(), Error> {
        if self.nodes.iter().all(|n| n.doc_order_key().is_some()) {
            self.nodes.sort_by_key(|n| n.doc_order_key().unwrap_or(u64::MAX));
        } else {
            // Surface comparison errors instead of producing an arbitrary order.
            let mut failure = None;
            self.nodes.sort_by(|a, b| {
                a.compare_document_order(b).unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    Ordering::Equal
                })
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }
        self.nodes.dedup();
        Ok(())
    }
}

impl<N> FromIterator<N> for MutableNodeList<N> {
    fn from_iter<I: IntoIterator<Item = N>>(iter: I) -> Self {
        Self { nodes: iter.into_iter().collect() }
    }
}

impl<N> Extend<N> for MutableNodeList<N> {
    fn extend<I: IntoIterator<Item = N>>(&mut self, iter: I) {
        self.nodes.extend(iter);
    }
}
