use core::cmp::Ordering;
use core::fmt;

use crate::error::{Error, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into(), ns_uri: None }
    }

    pub fn new(prefix: Option<String>, local: impl Into<String>, ns_uri: Option<String>) -> Self {
        Self { prefix, local: local.into(), ns_uri }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => write!(f, "{}:{}", prefix, self.local),
            _ => f.write_str(&self.local),
        }
    }
}

/// Fallback comparator for document order based on ancestry and
/// stable sibling ordering.
///
/// - If one node is an ancestor of the other, the ancestor precedes the descendant.
/// - Among siblings, attributes come first, then namespaces, then child nodes; within
///   each group the order provided by the adapter is preserved.
/// - Nodes of different roots yield `err:FOER0000`. Adapters that host several trees
///   should override `XdmNode::compare_document_order` or provide `doc_order_key`.
pub fn try_compare_by_ancestry<N: XdmNode>(a: &N, b: &N) -> Result<Ordering, Error> {
    if a == b {
        return Ok(Ordering::Equal);
    }
    fn path_to_root<N: XdmNode>(mut n: N) -> Vec<N> {
        let mut p = vec![n.clone()];
        while let Some(parent) = n.parent() {
            p.push(parent.clone());
            n = parent;
        }
        p.reverse();
        p
    }
    let pa = path_to_root(a.clone());
    let pb = path_to_root(b.clone());
    let len = core::cmp::min(pa.len(), pb.len());
    let common = pa.iter().zip(pb.iter()).take_while(|(x, y)| x == y).count();
    if common == len {
        return Ok(if pa.len() < pb.len() { Ordering::Less } else { Ordering::Greater });
    }
    if common == 0 {
        return Err(Error::from_code(
            ErrorCode::FOER0000,
            "document order requires adapter: nodes from different roots",
        ));
    }
    let parent = &pa[common - 1];
    let position = |needle: &N| -> Option<usize> {
        parent
            .attributes()
            .chain(parent.namespaces())
            .chain(parent.children())
            .position(|n| &n == needle)
    };
    Ok(match (position(&pa[common]), position(&pb[common])) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => Ordering::Equal,
    })
}

/// Navigation surface every document representation exposes to the query engine.
///
/// Identity is `Eq`: two handles are equal exactly when they denote the same node
/// of the same live document.
pub trait XdmNode: Clone + Eq + core::fmt::Debug + Send + Sync + 'static {
    type Children<'a>: Iterator<Item = Self> + Send + 'a
    where
        Self: 'a;
    type Attributes<'a>: Iterator<Item = Self> + Send + 'a
    where
        Self: 'a;
    type Namespaces<'a>: Iterator<Item = Self> + Send + 'a
    where
        Self: 'a;

    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;
    fn base_uri(&self) -> Option<String> {
        None
    }

    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Self::Children<'_>;
    fn attributes(&self) -> Self::Attributes<'_>;
    fn namespaces(&self) -> Self::Namespaces<'_>;

    /// Optional hint for document order comparisons. If provided, the engine uses this
    /// value to avoid recomputing ancestry during ordering operations.
    fn doc_order_key(&self) -> Option<u64> {
        None
    }

    fn compare_document_order(&self, other: &Self) -> Result<Ordering, Error> {
        if let (Some(a), Some(b)) = (self.doc_order_key(), other.doc_order_key()) {
            return Ok(a.cmp(&b));
        }
        try_compare_by_ancestry(self, other)
    }

    fn children_vec(&self) -> Vec<Self>
    where
        Self: Sized,
    {
        self.children().collect()
    }

    fn attributes_vec(&self) -> Vec<Self>
    where
        Self: Sized,
    {
        self.attributes().collect()
    }

    fn namespaces_vec(&self) -> Vec<Self>
    where
        Self: Sized,
    {
        self.namespaces().collect()
    }

    fn first_child(&self) -> Option<Self> {
        self.children().next()
    }

    fn last_child(&self) -> Option<Self> {
        self.children().last()
    }

    /// Attributes and namespace nodes have no siblings.
    fn next_sibling(&self) -> Option<Self> {
        if matches!(self.kind(), NodeKind::Attribute | NodeKind::Namespace) {
            return None;
        }
        let parent = self.parent()?;
        let mut siblings = parent.children();
        siblings.by_ref().find(|n| n == self)?;
        siblings.next()
    }

    fn previous_sibling(&self) -> Option<Self> {
        if matches!(self.kind(), NodeKind::Attribute | NodeKind::Namespace) {
            return None;
        }
        let parent = self.parent()?;
        let mut previous = None;
        for sibling in parent.children() {
            if &sibling == self {
                return previous;
            }
            previous = Some(sibling);
        }
        None
    }

    /// Attribute lookup by local name (namespace-agnostic).
    fn attribute(&self, local: &str) -> Option<Self> {
        self.attributes().find(|a| a.name().is_some_and(|q| q.local == local))
    }

    fn root(&self) -> Self {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }
}
