use std::sync::Arc;

use parking_lot::RwLock;
use sylva_xpath::{NodeKind, QName};

use super::{DocumentStrategy, StrategyKind, TreeIndex, map_kind, map_name};
use crate::foreign::{ForeignDocument, ForeignNode, ForeignNodeId, ForeignNodeKind};

/// Reads the foreign tree in place. Document order and the ID index are derived on
/// first demand, or up front when the document is built for concurrent readers or
/// with `build_maps`.
pub struct WrapperDocument {
    foreign: Arc<ForeignDocument>,
    index: RwLock<Option<Arc<TreeIndex>>>,
    thread_safe: bool,
    build_maps: bool,
}

impl WrapperDocument {
    pub fn new(foreign: Arc<ForeignDocument>, thread_safe: bool, build_maps: bool) -> Self {
        let wrapper = Self { foreign, index: RwLock::new(None), thread_safe, build_maps };
        if thread_safe || build_maps {
            wrapper.index();
        }
        wrapper
    }

    pub fn thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub fn build_maps(&self) -> bool {
        self.build_maps
    }

    fn index(&self) -> Arc<TreeIndex> {
        let revision = self.foreign.revision();
        if let Some(index) = self.index.read().as_ref().filter(|ix| ix.revision == revision) {
            return Arc::clone(index);
        }
        let tree = self.foreign.read();
        let index = Arc::new(TreeIndex::build(&tree));
        tracing::trace!(revision = index.revision, nodes = tree.len(), "wrapper index built");
        *self.index.write() = Some(Arc::clone(&index));
        index
    }

    fn with_node<T>(&self, node: ForeignNodeId, default: T, f: impl FnOnce(&ForeignNode) -> T) -> T {
        self.foreign.read().node(node).map(f).unwrap_or(default)
    }
}

impl DocumentStrategy for WrapperDocument {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Wrapper
    }

    fn foreign(&self) -> &Arc<ForeignDocument> {
        &self.foreign
    }

    fn is_indexed(&self) -> bool {
        let revision = self.foreign.revision();
        self.index.read().as_ref().is_some_and(|ix| ix.revision == revision)
    }

    fn node_kind(&self, node: ForeignNodeId) -> NodeKind {
        self.with_node(node, NodeKind::Document, |n| map_kind(n.kind))
    }

    fn name(&self, node: ForeignNodeId) -> Option<QName> {
        self.with_node(node, None, map_name)
    }

    fn string_value(&self, node: ForeignNodeId) -> String {
        let tree = self.foreign.read();
        match tree.node(node) {
            Some(n) if matches!(n.kind, ForeignNodeKind::Document | ForeignNodeKind::Element) => {
                tree.text_content(node)
            }
            Some(n) => n.value.clone(),
            None => String::new(),
        }
    }

    fn parent(&self, node: ForeignNodeId) -> Option<ForeignNodeId> {
        self.with_node(node, None, |n| n.parent)
    }

    fn children(&self, node: ForeignNodeId) -> Vec<ForeignNodeId> {
        self.with_node(node, Vec::new(), |n| n.children.clone())
    }

    fn attributes(&self, node: ForeignNodeId) -> Vec<ForeignNodeId> {
        self.with_node(node, Vec::new(), |n| n.attributes.clone())
    }

    fn namespaces(&self, node: ForeignNodeId) -> Vec<ForeignNodeId> {
        self.with_node(node, Vec::new(), |n| n.namespaces.clone())
    }

    fn order_key(&self, node: ForeignNodeId) -> u32 {
        self.index().order_key(node)
    }

    fn element_by_id(&self, id: &str) -> Option<ForeignNodeId> {
        self.index().element_by_id(id)
    }

    fn document_element(&self) -> Option<ForeignNodeId> {
        self.foreign.document_element()
    }

    fn as_wrapper(&self) -> Option<&WrapperDocument> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::ForeignName;
    use rstest::rstest;

    fn tree() -> Arc<ForeignDocument> {
        let doc = ForeignDocument::new();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        doc.append_text(root, "x").unwrap();
        Arc::new(doc)
    }

    #[rstest]
    #[case(false, false, false)]
    #[case(true, false, true)]
    #[case(false, true, true)]
    fn index_build_timing(#[case] thread_safe: bool, #[case] build_maps: bool, #[case] eager: bool) {
        let wrapper = WrapperDocument::new(tree(), thread_safe, build_maps);
        assert_eq!(wrapper.is_indexed(), eager);
        wrapper.order_key(ForeignNodeId::DOCUMENT);
        assert!(wrapper.is_indexed());
    }

    #[rstest]
    fn index_follows_revision() {
        let foreign = tree();
        let wrapper = WrapperDocument::new(Arc::clone(&foreign), false, true);
        let root = wrapper.document_element().unwrap();
        let added = foreign.append_element(root, ForeignName::parse("late")).unwrap();
        foreign.set_attribute(added, ForeignName::parse("id"), "late").unwrap();
        assert!(!wrapper.is_indexed());
        assert_eq!(wrapper.element_by_id("late"), Some(added));
        assert!(wrapper.order_key(added) > wrapper.order_key(root));
    }
}
