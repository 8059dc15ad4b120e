//! Stable node identities over foreign trees.
//!
//! A document registered with the liaison is represented by an adapter core: one
//! [`DocumentStrategy`] plus the handle under which the liaison tracks it. The
//! liaison holds the only strong reference to the core. [`DocumentAdapter`] and
//! [`AdapterNode`] hold weak references, so destroying the document (or resetting
//! the liaison) releases the backing tree no matter how many node handles are still
//! around; those handles then fail loudly instead of reading freed state.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use sylva_xpath::{NodeKind, QName, XdmNode};

use crate::error::LiaisonError;
use crate::foreign::{ForeignDocument, ForeignName, ForeignNode, ForeignNodeId, ForeignNodeKind, ForeignTree};

mod bridge;
mod wrapper;

pub use bridge::BridgeDocument;
pub use wrapper::WrapperDocument;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    /// Mirrors the foreign tree into its own node table (legacy path).
    Bridge,
    /// Reads the foreign tree directly.
    #[default]
    Wrapper,
}

/// Read-only navigation over one foreign tree. Node references are the foreign
/// tree's own ids in both implementations.
pub trait DocumentStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn foreign(&self) -> &Arc<ForeignDocument>;
    /// Whether the auxiliary indices are currently built for the tree's revision.
    fn is_indexed(&self) -> bool;

    fn node_kind(&self, node: ForeignNodeId) -> NodeKind;
    fn name(&self, node: ForeignNodeId) -> Option<QName>;
    fn string_value(&self, node: ForeignNodeId) -> String;
    fn parent(&self, node: ForeignNodeId) -> Option<ForeignNodeId>;
    fn children(&self, node: ForeignNodeId) -> Vec<ForeignNodeId>;
    fn attributes(&self, node: ForeignNodeId) -> Vec<ForeignNodeId>;
    fn namespaces(&self, node: ForeignNodeId) -> Vec<ForeignNodeId>;
    /// Position in document order, unique within the document.
    fn order_key(&self, node: ForeignNodeId) -> u32;
    fn element_by_id(&self, id: &str) -> Option<ForeignNodeId>;
    fn document_element(&self) -> Option<ForeignNodeId>;

    fn as_bridge(&self) -> Option<&BridgeDocument> {
        None
    }

    fn as_wrapper(&self) -> Option<&WrapperDocument> {
        None
    }
}

/// Document order and ID lookup, derived from one revision of a foreign tree.
#[derive(Debug, Default)]
pub(crate) struct TreeIndex {
    pub revision: u64,
    order: Vec<u32>,
    ids: HashMap<String, ForeignNodeId>,
    pub document_element: Option<ForeignNodeId>,
}

impl TreeIndex {
    pub fn build(tree: &ForeignTree) -> Self {
        // Detached nodes sort after everything reachable, in arena order.
        let detached_base = u32::try_from(tree.len()).unwrap_or(u32::MAX);
        let mut order: Vec<u32> =
            (0..tree.len()).map(|i| detached_base.saturating_add(u32::try_from(i).unwrap_or(u32::MAX))).collect();
        let mut ids = HashMap::new();
        for (position, id) in tree.document_order().into_iter().enumerate() {
            order[id.index()] = u32::try_from(position).unwrap_or(u32::MAX);
            let Some(node) = tree.node(id) else { continue };
            if node.kind == ForeignNodeKind::Attribute && is_id_attribute(node.name.as_ref()) {
                if let Some(owner) = node.parent {
                    ids.entry(node.value.trim().to_string()).or_insert(owner);
                }
            }
        }
        Self { revision: tree.revision(), order, ids, document_element: tree.document_element() }
    }

    pub fn order_key(&self, node: ForeignNodeId) -> u32 {
        self.order.get(node.index()).copied().unwrap_or(u32::MAX)
    }

    pub fn element_by_id(&self, id: &str) -> Option<ForeignNodeId> {
        self.ids.get(id).copied()
    }
}

/// `xml:id`, or an unprefixed `id` attribute.
fn is_id_attribute(name: Option<&ForeignName>) -> bool {
    name.is_some_and(|n| n.qname == "xml:id" || (n.prefix.is_none() && n.local == "id"))
}

pub(crate) fn map_kind(kind: ForeignNodeKind) -> NodeKind {
    match kind {
        ForeignNodeKind::Document => NodeKind::Document,
        ForeignNodeKind::Element => NodeKind::Element,
        ForeignNodeKind::Attribute => NodeKind::Attribute,
        ForeignNodeKind::Text | ForeignNodeKind::CData => NodeKind::Text,
        ForeignNodeKind::Comment => NodeKind::Comment,
        ForeignNodeKind::ProcessingInstruction => NodeKind::ProcessingInstruction,
        ForeignNodeKind::Namespace => NodeKind::Namespace,
    }
}

pub(crate) fn map_name(node: &ForeignNode) -> Option<QName> {
    let name = node.name.as_ref()?;
    Some(match node.kind {
        ForeignNodeKind::Element | ForeignNodeKind::Attribute => {
            QName::new(name.prefix.clone(), name.local.clone(), name.ns_uri.clone())
        }
        ForeignNodeKind::Namespace => {
            QName::new(Some(name.local.clone()), name.local.clone(), Some(node.value.clone()))
        }
        ForeignNodeKind::ProcessingInstruction => QName::local(name.local.clone()),
        _ => return None,
    })
}

/// Identity of a registered document: owning liaison, liaison epoch, slot and slot
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle {
    pub(crate) liaison: u64,
    pub(crate) epoch: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

pub(crate) struct AdapterCore {
    strategy: Box<dyn DocumentStrategy>,
    handle: DocumentHandle,
    sequence: u64,
}

impl AdapterCore {
    pub(crate) fn new(strategy: Box<dyn DocumentStrategy>, handle: DocumentHandle) -> Self {
        Self { strategy, handle, sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed) }
    }

    pub(crate) fn strategy(&self) -> &dyn DocumentStrategy {
        self.strategy.as_ref()
    }
}

/// Weak view of a registered document.
#[derive(Clone)]
pub struct DocumentAdapter {
    core: Weak<AdapterCore>,
    handle: DocumentHandle,
}

impl DocumentAdapter {
    pub(crate) fn new(core: &Arc<AdapterCore>) -> Self {
        Self { core: Arc::downgrade(core), handle: core.handle }
    }

    fn core(&self) -> Result<Arc<AdapterCore>, LiaisonError> {
        self.core.upgrade().ok_or(LiaisonError::StaleDocument)
    }

    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    /// False once the document was destroyed or its liaison reset.
    pub fn is_valid(&self) -> bool {
        self.core.strong_count() > 0
    }

    pub fn strategy_kind(&self) -> Result<StrategyKind, LiaisonError> {
        Ok(self.core()?.strategy.kind())
    }

    pub fn root(&self) -> Result<AdapterNode, LiaisonError> {
        self.core()?;
        Ok(self.node(ForeignNodeId::DOCUMENT))
    }

    pub fn document_element(&self) -> Result<Option<AdapterNode>, LiaisonError> {
        Ok(self.core()?.strategy.document_element().map(|id| self.node(id)))
    }

    pub fn element_by_id(&self, id: &str) -> Result<Option<AdapterNode>, LiaisonError> {
        Ok(self.core()?.strategy.element_by_id(id).map(|n| self.node(n)))
    }

    pub fn foreign_document(&self) -> Result<Arc<ForeignDocument>, LiaisonError> {
        Ok(Arc::clone(self.core()?.strategy.foreign()))
    }

    /// Node handle for a foreign id. The id is not checked until the node is used.
    pub fn node(&self, id: ForeignNodeId) -> AdapterNode {
        AdapterNode { core: self.core.clone(), node: id }
    }
}

impl PartialEq for DocumentAdapter {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}
impl Eq for DocumentAdapter {}

impl std::fmt::Debug for DocumentAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAdapter").field("handle", &self.handle).field("valid", &self.is_valid()).finish()
    }
}

/// A node of an adapted document, usable wherever the query engine expects an
/// [`XdmNode`].
///
/// # Panics
///
/// Every navigation method panics when the owning document has been destroyed or
/// the liaison reset.
#[derive(Clone)]
pub struct AdapterNode {
    core: Weak<AdapterCore>,
    node: ForeignNodeId,
}

impl AdapterNode {
    fn core(&self) -> Arc<AdapterCore> {
        match self.core.upgrade() {
            Some(core) => core,
            None => panic!(
                "use after invalidation: adapter node {:?} belongs to a document that was destroyed \
                 or whose liaison was reset",
                self.node
            ),
        }
    }

    fn sibling(&self, id: ForeignNodeId) -> AdapterNode {
        AdapterNode { core: self.core.clone(), node: id }
    }

    fn siblings(&self, ids: Vec<ForeignNodeId>) -> std::vec::IntoIter<AdapterNode> {
        ids.into_iter().map(|id| self.sibling(id)).collect::<Vec<_>>().into_iter()
    }

    pub fn foreign_id(&self) -> ForeignNodeId {
        self.node
    }

    pub fn is_valid(&self) -> bool {
        self.core.strong_count() > 0
    }

    pub fn document_handle(&self) -> DocumentHandle {
        self.core().handle
    }

    fn sibling_at(&self, step: isize) -> Option<AdapterNode> {
        let core = self.core();
        let parent = core.strategy.parent(self.node)?;
        let children = core.strategy.children(parent);
        let position = children.iter().position(|id| *id == self.node)?;
        let target = position.checked_add_signed(step)?;
        children.get(target).map(|id| self.sibling(*id))
    }

    /// Attribute of this element by local name and namespace URI.
    pub fn attribute_ns(&self, local: &str, ns_uri: Option<&str>) -> Option<AdapterNode> {
        let core = self.core();
        core.strategy
            .attributes(self.node)
            .into_iter()
            .find(|id| {
                core.strategy.name(*id).is_some_and(|name| name.local == local && name.ns_uri.as_deref() == ns_uri)
            })
            .map(|id| self.sibling(id))
    }
}

impl PartialEq for AdapterNode {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.core, &other.core) && self.node == other.node
    }
}
impl Eq for AdapterNode {}

impl std::hash::Hash for AdapterNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.core.as_ptr().hash(state);
        self.node.hash(state);
    }
}

impl std::fmt::Debug for AdapterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("AdapterNode");
        s.field("node", &self.node);
        if let Some(core) = self.core.upgrade() {
            s.field("kind", &core.strategy.node_kind(self.node)).field("name", &core.strategy.name(self.node));
        } else {
            s.field("valid", &false);
        }
        s.finish()
    }
}

impl XdmNode for AdapterNode {
    type Children<'a>
        = std::vec::IntoIter<AdapterNode>
    where
        Self: 'a;
    type Attributes<'a>
        = std::vec::IntoIter<AdapterNode>
    where
        Self: 'a;
    type Namespaces<'a>
        = std::vec::IntoIter<AdapterNode>
    where
        Self: 'a;

    fn kind(&self) -> NodeKind {
        self.core().strategy.node_kind(self.node)
    }

    fn name(&self) -> Option<QName> {
        self.core().strategy.name(self.node)
    }

    fn string_value(&self) -> String {
        self.core().strategy.string_value(self.node)
    }

    fn base_uri(&self) -> Option<String> {
        self.core().strategy.foreign().system_id()
    }

    fn parent(&self) -> Option<Self> {
        self.core().strategy.parent(self.node).map(|id| self.sibling(id))
    }

    fn children(&self) -> Self::Children<'_> {
        let ids = self.core().strategy.children(self.node);
        self.siblings(ids)
    }

    fn attributes(&self) -> Self::Attributes<'_> {
        let ids = self.core().strategy.attributes(self.node);
        self.siblings(ids)
    }

    fn namespaces(&self) -> Self::Namespaces<'_> {
        let ids = self.core().strategy.namespaces(self.node);
        self.siblings(ids)
    }

    fn first_child(&self) -> Option<Self> {
        self.core().strategy.children(self.node).first().map(|id| self.sibling(*id))
    }

    fn last_child(&self) -> Option<Self> {
        self.core().strategy.children(self.node).last().map(|id| self.sibling(*id))
    }

    /// Attributes and namespace nodes are not among their parent's children, so
    /// they have no siblings.
    fn next_sibling(&self) -> Option<Self> {
        self.sibling_at(1)
    }

    fn previous_sibling(&self) -> Option<Self> {
        self.sibling_at(-1)
    }

    /// Documents are ordered by registration; nodes by position within their document.
    fn doc_order_key(&self) -> Option<u64> {
        let core = self.core();
        Some((core.sequence << 32) | u64::from(core.strategy.order_key(self.node)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample() -> ForeignDocument {
        let doc = ForeignDocument::new();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        let a = doc.append_element(root, ForeignName::parse("a")).unwrap();
        doc.set_attribute(a, ForeignName::parse("xml:id"), " first ").unwrap();
        let b = doc.append_element(root, ForeignName::parse("b")).unwrap();
        doc.set_attribute(b, ForeignName::parse("id"), "second").unwrap();
        doc.set_attribute(b, ForeignName::parse("p:id"), "not-an-id").unwrap();
        doc
    }

    #[rstest]
    fn index_orders_attributes_before_children() {
        let doc = sample();
        let tree = doc.read();
        let index = TreeIndex::build(&tree);
        let order = tree.document_order();
        for pair in order.windows(2) {
            assert!(index.order_key(pair[0]) < index.order_key(pair[1]));
        }
    }

    #[rstest]
    fn index_finds_ids() {
        let doc = sample();
        let tree = doc.read();
        let index = TreeIndex::build(&tree);
        let a = index.element_by_id("first").unwrap();
        assert_eq!(tree.node(a).unwrap().name.as_ref().unwrap().local, "a");
        assert!(index.element_by_id("second").is_some());
        assert!(index.element_by_id("not-an-id").is_none());
    }

    #[rstest]
    fn sibling_navigation_and_attribute_lookup() {
        let doc = Arc::new(sample());
        let core = Arc::new(AdapterCore::new(
            Box::new(WrapperDocument::new(Arc::clone(&doc), false, false)),
            DocumentHandle { liaison: 0, epoch: 0, index: 0, generation: 0 },
        ));
        let adapter = DocumentAdapter::new(&core);
        let root = adapter.document_element().unwrap().unwrap();
        let a = root.first_child().unwrap();
        let b = root.last_child().unwrap();
        assert_eq!(a.next_sibling(), Some(b.clone()));
        assert_eq!(b.previous_sibling(), Some(a.clone()));
        assert!(a.previous_sibling().is_none());
        assert!(b.next_sibling().is_none());
        assert_eq!(b.attribute_ns("id", None).map(|n| n.string_value()).as_deref(), Some("second"));
        assert!(b.attribute_ns("missing", None).is_none());
        let id = b.attribute_ns("id", None).unwrap();
        assert_eq!(b.attribute("id"), Some(id.clone()));
        assert!(id.next_sibling().is_none());
        assert!(id.previous_sibling().is_none());
    }

    #[rstest]
    fn cdata_maps_to_text() {
        assert_eq!(map_kind(ForeignNodeKind::CData), NodeKind::Text);
    }
}
