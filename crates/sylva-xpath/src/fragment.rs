//! Detached in-memory trees.
//!
//! A transformation assembles result tree fragments out of nodes that do not belong
//! to any parsed document; this module provides the node type for them. The same
//! builder is handy for test fixtures.
//!
//! ```
//! use sylva_xpath::fragment::{attr, elem, text};
//! use sylva_xpath::XdmNode;
//!
//! // <root id="r"><child>Hello</child><child world="yes"/></root>
//! let root = elem("root")
//!     .attr(attr("id", "r"))
//!     .child(elem("child").child(text("Hello")))
//!     .child(elem("child").attr(attr("world", "yes")))
//!     .build();
//!
//! assert_eq!(root.name().unwrap().local, "root");
//! assert_eq!(root.children_vec().len(), 2);
//! assert_eq!(root.string_value(), "Hello");
//! ```
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use crate::model::{NodeKind, QName, XdmNode};

struct Inner {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    // Set once when the node is attached to its parent.
    parent: OnceLock<Weak<Inner>>,
    attributes: Vec<FragmentNode>,
    namespaces: Vec<FragmentNode>,
    children: Vec<FragmentNode>,
    text: OnceLock<String>,
}

/// Arc-backed node of a detached tree. Identity is pointer identity.
#[derive(Clone)]
pub struct FragmentNode(Arc<Inner>);

impl PartialEq for FragmentNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for FragmentNode {}

impl std::hash::Hash for FragmentNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for FragmentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentNode")
            .field("kind", &self.0.kind)
            .field("name", &self.0.name)
            .field("value", &self.0.value)
            .finish()
    }
}

impl FragmentNode {
    fn leaf(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        FragmentBuilder::new(kind, name, value).build()
    }

    pub fn document() -> FragmentBuilder {
        FragmentBuilder::new(NodeKind::Document, None, None)
    }

    pub fn element(name: &str) -> FragmentBuilder {
        FragmentBuilder::new(NodeKind::Element, Some(split_qname(name)), None)
    }

    pub fn attribute(name: &str, value: &str) -> FragmentNode {
        Self::leaf(NodeKind::Attribute, Some(split_qname(name)), Some(value.to_string()))
    }

    pub fn text(value: &str) -> FragmentNode {
        Self::leaf(NodeKind::Text, None, Some(value.to_string()))
    }

    pub fn comment(value: &str) -> FragmentNode {
        Self::leaf(NodeKind::Comment, None, Some(value.to_string()))
    }

    pub fn pi(target: &str, data: &str) -> FragmentNode {
        Self::leaf(NodeKind::ProcessingInstruction, Some(QName::local(target)), Some(data.to_string()))
    }

    pub fn namespace(prefix: &str, uri: &str) -> FragmentNode {
        Self::leaf(
            NodeKind::Namespace,
            Some(QName::new(Some(prefix.to_string()), prefix, Some(uri.to_string()))),
            Some(uri.to_string()),
        )
    }

    /// Resolve a namespace prefix by walking the ancestor chain (including self).
    pub fn lookup_namespace_uri(&self, prefix: &str) -> Option<String> {
        let mut cur = Some(self.clone());
        while let Some(n) = cur {
            let found = n.0.namespaces.iter().find(|ns| {
                ns.0.name.as_ref().and_then(|q| q.prefix.as_deref()) == Some(prefix)
            });
            if let Some(ns) = found {
                return ns.0.value.clone();
            }
            cur = n.parent();
        }
        None
    }
}

fn split_qname(name: &str) -> QName {
    match name.split_once(':') {
        Some((prefix, local)) => QName::new(Some(prefix.to_string()), local, None),
        None => QName::local(name),
    }
}

pub struct FragmentBuilder {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    children: Vec<FragmentNode>,
    attributes: Vec<FragmentNode>,
    namespaces: Vec<FragmentNode>,
}

impl FragmentBuilder {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        Self { kind, name, value, children: Vec::new(), attributes: Vec::new(), namespaces: Vec::new() }
    }

    pub fn child(mut self, child: impl Into<NodeOrBuilder>) -> Self {
        self.children.push(child.into().into_node());
        self
    }

    pub fn children<I: IntoIterator<Item = NodeOrBuilder>>(mut self, it: I) -> Self {
        self.children.extend(it.into_iter().map(NodeOrBuilder::into_node));
        self
    }

    pub fn attr(mut self, attr: FragmentNode) -> Self {
        debug_assert!(attr.kind() == NodeKind::Attribute);
        self.attributes.push(attr);
        self
    }

    pub fn namespace(mut self, ns: FragmentNode) -> Self {
        debug_assert!(ns.kind() == NodeKind::Namespace);
        self.namespaces.push(ns);
        self
    }

    pub fn build(self) -> FragmentNode {
        let node = FragmentNode(Arc::new(Inner {
            kind: self.kind,
            name: self.name,
            value: self.value,
            parent: OnceLock::new(),
            attributes: self.attributes,
            namespaces: self.namespaces,
            children: self.children,
            text: OnceLock::new(),
        }));
        let weak = Arc::downgrade(&node.0);
        for owned in node.0.attributes.iter().chain(&node.0.namespaces).chain(&node.0.children) {
            // A node keeps the first parent it was attached to.
            let _ = owned.0.parent.set(weak.clone());
        }
        node
    }
}

pub enum NodeOrBuilder {
    Built(FragmentNode),
    Builder(FragmentBuilder),
}

impl NodeOrBuilder {
    fn into_node(self) -> FragmentNode {
        match self {
            NodeOrBuilder::Built(n) => n,
            NodeOrBuilder::Builder(b) => b.build(),
        }
    }
}

impl From<FragmentNode> for NodeOrBuilder {
    fn from(n: FragmentNode) -> Self {
        NodeOrBuilder::Built(n)
    }
}
impl From<FragmentBuilder> for NodeOrBuilder {
    fn from(b: FragmentBuilder) -> Self {
        NodeOrBuilder::Builder(b)
    }
}

pub fn elem(name: &str) -> FragmentBuilder {
    FragmentNode::element(name)
}
pub fn text(v: &str) -> FragmentNode {
    FragmentNode::text(v)
}
pub fn attr(name: &str, v: &str) -> FragmentNode {
    FragmentNode::attribute(name, v)
}
pub fn comment(v: &str) -> FragmentNode {
    FragmentNode::comment(v)
}
pub fn ns(prefix: &str, uri: &str) -> FragmentNode {
    FragmentNode::namespace(prefix, uri)
}
pub fn doc() -> FragmentBuilder {
    FragmentNode::document()
}

impl XdmNode for FragmentNode {
    type Children<'a>
        = std::vec::IntoIter<FragmentNode>
    where
        Self: 'a;
    type Attributes<'a>
        = std::vec::IntoIter<FragmentNode>
    where
        Self: 'a;
    type Namespaces<'a>
        = std::vec::IntoIter<FragmentNode>
    where
        Self: 'a;

    fn kind(&self) -> NodeKind {
        self.0.kind
    }

    fn name(&self) -> Option<QName> {
        self.0.name.clone()
    }

    fn string_value(&self) -> String {
        match self.0.kind {
            NodeKind::Element | NodeKind::Document => self
                .0
                .text
                .get_or_init(|| {
                    fn collect(n: &FragmentNode, out: &mut String) {
                        for c in &n.0.children {
                            match c.0.kind {
                                NodeKind::Text => out.push_str(c.0.value.as_deref().unwrap_or_default()),
                                NodeKind::Element => collect(c, out),
                                _ => {}
                            }
                        }
                    }
                    let mut out = String::new();
                    collect(self, &mut out);
                    out
                })
                .clone(),
            _ => self.0.value.clone().unwrap_or_default(),
        }
    }

    fn parent(&self) -> Option<Self> {
        self.0.parent.get().and_then(Weak::upgrade).map(FragmentNode)
    }

    fn children(&self) -> Self::Children<'_> {
        self.0.children.clone().into_iter()
    }

    fn attributes(&self) -> Self::Attributes<'_> {
        self.0.attributes.clone().into_iter()
    }

    fn namespaces(&self) -> Self::Namespaces<'_> {
        self.0.namespaces.clone().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cmp::Ordering;
    use rstest::rstest;

    #[rstest]
    fn parent_links_are_set_on_build() {
        let root = elem("r").attr(attr("a", "1")).child(elem("c").child(text("x"))).build();
        let c = root.first_child().unwrap();
        assert_eq!(c.parent().unwrap(), root);
        assert_eq!(root.attribute("a").unwrap().parent().unwrap(), root);
        assert_eq!(c.first_child().unwrap().root(), root);
    }

    #[rstest]
    fn prefixed_names_split() {
        let e = elem("p:item").build();
        let q = e.name().unwrap();
        assert_eq!(q.prefix.as_deref(), Some("p"));
        assert_eq!(q.local, "item");
        assert_eq!(q.to_string(), "p:item");
    }

    #[rstest]
    fn sibling_navigation() {
        let r = elem("r").child(elem("a")).child(text("t")).child(elem("b")).build();
        let kids = r.children_vec();
        assert_eq!(kids[0].next_sibling().unwrap(), kids[1]);
        assert_eq!(kids[2].previous_sibling().unwrap(), kids[1]);
        assert!(kids[0].previous_sibling().is_none());
        assert!(kids[2].next_sibling().is_none());
    }

    #[rstest]
    fn attributes_precede_children_in_document_order() {
        let r = elem("r").attr(attr("a", "1")).child(elem("c")).build();
        let a = r.attribute("a").unwrap();
        let c = r.first_child().unwrap();
        assert_eq!(a.compare_document_order(&c).unwrap(), Ordering::Less);
        assert_eq!(r.compare_document_order(&a).unwrap(), Ordering::Less);
    }

    #[rstest]
    fn namespace_lookup_walks_ancestors() {
        let t = elem("root").namespace(ns("p", "urn:one")).child(elem("leaf")).build();
        let leaf = t.first_child().unwrap();
        assert_eq!(leaf.lookup_namespace_uri("p").as_deref(), Some("urn:one"));
        assert!(leaf.lookup_namespace_uri("q").is_none());
    }

    #[rstest]
    fn document_string_value_skips_comments() {
        let d = doc().child(elem("r").child(text("a")).child(comment("no")).child(elem("i").child(text("b")))).build();
        assert_eq!(d.string_value(), "ab");
    }
}
