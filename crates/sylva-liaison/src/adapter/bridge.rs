use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use string_cache::DefaultAtom;
use sylva_xpath::{NodeKind, QName};

use super::{DocumentStrategy, StrategyKind, TreeIndex, map_kind};
use crate::foreign::{ForeignDocument, ForeignNodeId, ForeignNodeKind, ForeignTree};

type Ids = SmallVec<[ForeignNodeId; 4]>;

#[derive(Debug, Clone)]
struct MirrorName {
    prefix: Option<DefaultAtom>,
    local: DefaultAtom,
    ns_uri: Option<DefaultAtom>,
}

impl MirrorName {
    fn to_qname(&self) -> QName {
        QName::new(
            self.prefix.as_ref().map(|p| p.to_string()),
            self.local.to_string(),
            self.ns_uri.as_ref().map(|u| u.to_string()),
        )
    }
}

#[derive(Debug, Clone)]
struct MirrorNode {
    kind: NodeKind,
    name: Option<MirrorName>,
    value: String,
    parent: Option<ForeignNodeId>,
    children: Ids,
    attributes: Ids,
    namespaces: Ids,
}

/// Copy of one revision of the foreign tree. Names are interned; slots line up with
/// foreign ids so node handles survive a rebuild.
struct Mirror {
    index: TreeIndex,
    nodes: Vec<MirrorNode>,
}

impl Mirror {
    fn build(tree: &ForeignTree) -> Self {
        let nodes = (0..tree.len())
            .filter_map(|i| tree.node(ForeignNodeId::from_index(i)))
            .map(|node| {
                let name = node.name.as_ref().map(|n| match node.kind {
                    ForeignNodeKind::Namespace => MirrorName {
                        prefix: Some(DefaultAtom::from(n.local.as_str())),
                        local: DefaultAtom::from(n.local.as_str()),
                        ns_uri: Some(DefaultAtom::from(node.value.as_str())),
                    },
                    _ => MirrorName {
                        prefix: n.prefix.as_deref().map(DefaultAtom::from),
                        local: DefaultAtom::from(n.local.as_str()),
                        ns_uri: n.ns_uri.as_deref().map(DefaultAtom::from),
                    },
                });
                MirrorNode {
                    kind: map_kind(node.kind),
                    name,
                    value: node.value.clone(),
                    parent: node.parent,
                    children: node.children.iter().copied().collect(),
                    attributes: node.attributes.iter().copied().collect(),
                    namespaces: node.namespaces.iter().copied().collect(),
                }
            })
            .collect();
        Self { index: TreeIndex::build(tree), nodes }
    }

    fn node(&self, id: ForeignNodeId) -> Option<&MirrorNode> {
        self.nodes.get(id.index())
    }

    fn text_content(&self, id: ForeignNodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        for child in &node.children {
            if let Some(c) = self.node(*child) {
                match c.kind {
                    NodeKind::Text => out.push_str(&c.value),
                    NodeKind::Element => self.text_content(*child, out),
                    _ => {}
                }
            }
        }
    }
}

/// Mirrors the whole foreign tree into its own table when constructed and again
/// whenever the tree's revision moves on. Reads never touch the foreign tree.
pub struct BridgeDocument {
    foreign: Arc<ForeignDocument>,
    mirror: RwLock<Arc<Mirror>>,
}

impl BridgeDocument {
    pub fn new(foreign: Arc<ForeignDocument>) -> Self {
        let mirror = Arc::new(Mirror::build(&foreign.read()));
        tracing::trace!(nodes = mirror.nodes.len(), "bridge mirror built");
        Self { foreign, mirror: RwLock::new(mirror) }
    }

    fn mirror(&self) -> Arc<Mirror> {
        let revision = self.foreign.revision();
        {
            let current = self.mirror.read();
            if current.index.revision == revision {
                return Arc::clone(&current);
            }
        }
        let rebuilt = Arc::new(Mirror::build(&self.foreign.read()));
        tracing::trace!(revision = rebuilt.index.revision, "bridge mirror rebuilt");
        *self.mirror.write() = Arc::clone(&rebuilt);
        rebuilt
    }

    /// Number of mirrored nodes, detached ones included.
    pub fn mirrored_len(&self) -> usize {
        self.mirror().nodes.len()
    }
}

impl DocumentStrategy for BridgeDocument {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bridge
    }

    fn foreign(&self) -> &Arc<ForeignDocument> {
        &self.foreign
    }

    fn is_indexed(&self) -> bool {
        self.mirror.read().index.revision == self.foreign.revision()
    }

    fn node_kind(&self, node: ForeignNodeId) -> NodeKind {
        self.mirror().node(node).map_or(NodeKind::Document, |n| n.kind)
    }

    fn name(&self, node: ForeignNodeId) -> Option<QName> {
        let mirror = self.mirror();
        let n = mirror.node(node)?;
        match n.kind {
            NodeKind::Element | NodeKind::Attribute | NodeKind::Namespace => n.name.as_ref().map(MirrorName::to_qname),
            NodeKind::ProcessingInstruction => n.name.as_ref().map(|name| QName::local(name.local.to_string())),
            _ => None,
        }
    }

    fn string_value(&self, node: ForeignNodeId) -> String {
        let mirror = self.mirror();
        match mirror.node(node) {
            Some(n) if matches!(n.kind, NodeKind::Document | NodeKind::Element) => {
                let mut out = String::new();
                mirror.text_content(node, &mut out);
                out
            }
            Some(n) => n.value.clone(),
            None => String::new(),
        }
    }

    fn parent(&self, node: ForeignNodeId) -> Option<ForeignNodeId> {
        self.mirror().node(node)?.parent
    }

    fn children(&self, node: ForeignNodeId) -> Vec<ForeignNodeId> {
        self.mirror().node(node).map(|n| n.children.to_vec()).unwrap_or_default()
    }

    fn attributes(&self, node: ForeignNodeId) -> Vec<ForeignNodeId> {
        self.mirror().node(node).map(|n| n.attributes.to_vec()).unwrap_or_default()
    }

    fn namespaces(&self, node: ForeignNodeId) -> Vec<ForeignNodeId> {
        self.mirror().node(node).map(|n| n.namespaces.to_vec()).unwrap_or_default()
    }

    fn order_key(&self, node: ForeignNodeId) -> u32 {
        self.mirror().index.order_key(node)
    }

    fn element_by_id(&self, id: &str) -> Option<ForeignNodeId> {
        self.mirror().index.element_by_id(id)
    }

    fn document_element(&self) -> Option<ForeignNodeId> {
        self.mirror().index.document_element
    }

    fn as_bridge(&self) -> Option<&BridgeDocument> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::ForeignName;
    use rstest::rstest;

    #[rstest]
    fn mirror_tracks_foreign_mutations() {
        let foreign = Arc::new(ForeignDocument::new());
        let root = foreign.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        let bridge = BridgeDocument::new(Arc::clone(&foreign));
        assert!(bridge.is_indexed());
        assert_eq!(bridge.string_value(root), "");

        let text = foreign.append_text(root, "later").unwrap();
        assert!(!bridge.is_indexed());
        assert_eq!(bridge.string_value(root), "later");
        assert_eq!(bridge.children(root), vec![text]);
        assert_eq!(bridge.mirrored_len(), 3);
    }

    #[rstest]
    fn namespace_nodes_are_named_by_prefix() {
        let foreign = Arc::new(ForeignDocument::new());
        let root = foreign.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        let ns = foreign.declare_namespace(root, Some("p"), "urn:p").unwrap();
        let bridge = BridgeDocument::new(foreign);
        let name = bridge.name(ns).unwrap();
        assert_eq!(name.local, "p");
        assert_eq!(name.ns_uri.as_deref(), Some("urn:p"));
        assert_eq!(bridge.node_kind(ns), NodeKind::Namespace);
    }
}
