//! The tree produced by the external parser.
//!
//! A [`ForeignDocument`] is an arena of nodes behind a `parking_lot::RwLock`. Nodes
//! are addressed by [`ForeignNodeId`] and are never deallocated individually:
//! removing a child only detaches it. Every mutation bumps the tree revision so that
//! adapters can tell when their indices are out of date.
use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::LiaisonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForeignNodeId(u32);

impl ForeignNodeId {
    pub const DOCUMENT: ForeignNodeId = ForeignNodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignNodeKind {
    Document,
    Element,
    Attribute,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    Namespace,
}

impl ForeignNodeKind {
    fn is_text(self) -> bool {
        matches!(self, ForeignNodeKind::Text | ForeignNodeKind::CData)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignName {
    pub qname: String,
    pub local: String,
    pub prefix: Option<String>,
    pub ns_uri: Option<String>,
}

impl ForeignName {
    /// Split `p:local` into prefix and local part; no namespace is attached.
    pub fn parse(qname: &str) -> Self {
        let (prefix, local) = match qname.split_once(':') {
            Some((p, l)) if !p.is_empty() && !l.is_empty() => (Some(p.to_string()), l.to_string()),
            _ => (None, qname.to_string()),
        };
        Self { qname: qname.to_string(), local, prefix, ns_uri: None }
    }

    /// A name taken verbatim, as reported when namespace processing is off.
    pub fn unqualified(qname: &str) -> Self {
        Self { qname: qname.to_string(), local: qname.to_string(), prefix: None, ns_uri: None }
    }

    #[must_use]
    pub fn with_namespace(mut self, uri: Option<String>) -> Self {
        self.ns_uri = uri;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ForeignNode {
    pub kind: ForeignNodeKind,
    pub name: Option<ForeignName>,
    pub value: String,
    pub parent: Option<ForeignNodeId>,
    pub children: Vec<ForeignNodeId>,
    pub attributes: Vec<ForeignNodeId>,
    pub namespaces: Vec<ForeignNodeId>,
}

impl ForeignNode {
    fn new(kind: ForeignNodeKind, name: Option<ForeignName>, value: String) -> Self {
        Self { kind, name, value, parent: None, children: Vec::new(), attributes: Vec::new(), namespaces: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub struct ForeignTree {
    nodes: Vec<ForeignNode>,
    revision: u64,
    system_id: Option<String>,
}

impl Default for ForeignTree {
    fn default() -> Self {
        Self {
            nodes: vec![ForeignNode::new(ForeignNodeKind::Document, None, String::new())],
            revision: 0,
            system_id: None,
        }
    }
}

impl ForeignTree {
    pub fn node(&self, id: ForeignNodeId) -> Option<&ForeignNode> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // The document node is always present.
        false
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    pub fn document_element(&self) -> Option<ForeignNodeId> {
        self.nodes[0].children.iter().copied().find(|c| self.nodes[c.index()].kind == ForeignNodeKind::Element)
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text_content(&self, id: ForeignNodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else { continue };
            if node.kind.is_text() {
                out.push_str(&node.value);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Nodes reachable from the document node in document order: each node, then its
    /// attributes, then its namespace nodes, then its children.
    pub fn document_order(&self) -> Vec<ForeignNodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ForeignNodeId::DOCUMENT];
        while let Some(current) = stack.pop() {
            order.push(current);
            let node = &self.nodes[current.index()];
            order.extend(node.attributes.iter().copied());
            order.extend(node.namespaces.iter().copied());
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }

    fn checked(&self, id: ForeignNodeId) -> Result<&ForeignNode, LiaisonError> {
        self.node(id).ok_or(LiaisonError::InvalidNode { id, reason: "no such node" })
    }

    fn checked_container(&self, id: ForeignNodeId) -> Result<(), LiaisonError> {
        match self.checked(id)?.kind {
            ForeignNodeKind::Document | ForeignNodeKind::Element => Ok(()),
            _ => Err(LiaisonError::InvalidNode { id, reason: "node cannot have children" }),
        }
    }

    fn checked_element(&self, id: ForeignNodeId) -> Result<(), LiaisonError> {
        match self.checked(id)?.kind {
            ForeignNodeKind::Element => Ok(()),
            _ => Err(LiaisonError::InvalidNode { id, reason: "not an element" }),
        }
    }

    fn alloc(&mut self, parent: ForeignNodeId, mut node: ForeignNode) -> ForeignNodeId {
        let id = ForeignNodeId::from_index(self.nodes.len());
        node.parent = Some(parent);
        self.nodes.push(node);
        id
    }

    pub(crate) fn push_child(
        &mut self,
        parent: ForeignNodeId,
        kind: ForeignNodeKind,
        name: Option<ForeignName>,
        value: String,
    ) -> ForeignNodeId {
        let id = self.alloc(parent, ForeignNode::new(kind, name, value));
        self.nodes[parent.index()].children.push(id);
        id
    }

    /// Append text, merging into a directly preceding text node.
    pub(crate) fn push_text(&mut self, parent: ForeignNodeId, text: &str) -> ForeignNodeId {
        if let Some(&last) = self.nodes[parent.index()].children.last() {
            if self.nodes[last.index()].kind == ForeignNodeKind::Text {
                self.nodes[last.index()].value.push_str(text);
                return last;
            }
        }
        self.push_child(parent, ForeignNodeKind::Text, None, text.to_string())
    }

    pub(crate) fn push_attribute(&mut self, element: ForeignNodeId, name: ForeignName, value: String) -> ForeignNodeId {
        let existing = self.nodes[element.index()]
            .attributes
            .iter()
            .copied()
            .find(|a| self.nodes[a.index()].name.as_ref().is_some_and(|n| n.qname == name.qname));
        if let Some(id) = existing {
            let node = &mut self.nodes[id.index()];
            node.value = value;
            node.name = Some(name);
            return id;
        }
        let id = self.alloc(element, ForeignNode::new(ForeignNodeKind::Attribute, Some(name), value));
        self.nodes[element.index()].attributes.push(id);
        id
    }

    pub(crate) fn push_namespace(&mut self, element: ForeignNodeId, prefix: Option<&str>, uri: &str) -> ForeignNodeId {
        let local = prefix.unwrap_or_default();
        let qname = if local.is_empty() { "xmlns".to_string() } else { format!("xmlns:{local}") };
        let name = ForeignName {
            qname,
            local: local.to_string(),
            prefix: Some(local.to_string()),
            ns_uri: Some(uri.to_string()),
        };
        let id = self.alloc(element, ForeignNode::new(ForeignNodeKind::Namespace, Some(name), uri.to_string()));
        self.nodes[element.index()].namespaces.push(id);
        id
    }

    pub(crate) fn set_system_id(&mut self, system_id: Option<&str>) {
        self.system_id = system_id.map(str::to_string);
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Merge adjacent text nodes and drop empty ones. Returns whether anything changed.
    fn normalize(&mut self) -> bool {
        let mut changed = false;
        for index in 0..self.nodes.len() {
            if self.nodes[index].children.is_empty() {
                continue;
            }
            let children = std::mem::take(&mut self.nodes[index].children);
            let mut kept: Vec<ForeignNodeId> = Vec::with_capacity(children.len());
            for child in children {
                if self.nodes[child.index()].kind == ForeignNodeKind::Text {
                    if self.nodes[child.index()].value.is_empty() {
                        self.nodes[child.index()].parent = None;
                        changed = true;
                        continue;
                    }
                    if let Some(&prev) = kept.last() {
                        if self.nodes[prev.index()].kind == ForeignNodeKind::Text {
                            let text = std::mem::take(&mut self.nodes[child.index()].value);
                            self.nodes[prev.index()].value.push_str(&text);
                            self.nodes[child.index()].parent = None;
                            changed = true;
                            continue;
                        }
                    }
                }
                kept.push(child);
            }
            self.nodes[index].children = kept;
        }
        changed
    }
}

/// Shared, internally synchronized foreign tree.
#[derive(Debug, Default)]
pub struct ForeignDocument {
    tree: RwLock<ForeignTree>,
}

impl ForeignDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tree(tree: ForeignTree) -> Self {
        Self { tree: RwLock::new(tree) }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ForeignTree> {
        self.tree.read()
    }

    pub fn revision(&self) -> u64 {
        self.tree.read().revision
    }

    pub fn system_id(&self) -> Option<String> {
        self.tree.read().system_id.clone()
    }

    pub fn document_element(&self) -> Option<ForeignNodeId> {
        self.tree.read().document_element()
    }

    pub fn append_element(&self, parent: ForeignNodeId, name: ForeignName) -> Result<ForeignNodeId, LiaisonError> {
        let mut tree = self.tree.write();
        tree.checked_container(parent)?;
        if parent == ForeignNodeId::DOCUMENT && tree.document_element().is_some() {
            return Err(LiaisonError::InvalidNode { id: parent, reason: "document already has an element" });
        }
        let id = tree.push_child(parent, ForeignNodeKind::Element, Some(name), String::new());
        tree.touch();
        Ok(id)
    }

    pub fn append_text(&self, parent: ForeignNodeId, text: &str) -> Result<ForeignNodeId, LiaisonError> {
        self.append_leaf(parent, ForeignNodeKind::Text, None, text)
    }

    pub fn append_cdata(&self, parent: ForeignNodeId, text: &str) -> Result<ForeignNodeId, LiaisonError> {
        self.append_leaf(parent, ForeignNodeKind::CData, None, text)
    }

    pub fn append_comment(&self, parent: ForeignNodeId, text: &str) -> Result<ForeignNodeId, LiaisonError> {
        self.append_leaf(parent, ForeignNodeKind::Comment, None, text)
    }

    pub fn append_processing_instruction(
        &self,
        parent: ForeignNodeId,
        target: &str,
        data: &str,
    ) -> Result<ForeignNodeId, LiaisonError> {
        self.append_leaf(parent, ForeignNodeKind::ProcessingInstruction, Some(ForeignName::unqualified(target)), data)
    }

    fn append_leaf(
        &self,
        parent: ForeignNodeId,
        kind: ForeignNodeKind,
        name: Option<ForeignName>,
        value: &str,
    ) -> Result<ForeignNodeId, LiaisonError> {
        let mut tree = self.tree.write();
        tree.checked_container(parent)?;
        if parent == ForeignNodeId::DOCUMENT && kind.is_text() {
            return Err(LiaisonError::InvalidNode { id: parent, reason: "text is not allowed at document level" });
        }
        // Unlike the parser path, explicit appends never merge text.
        let id = tree.push_child(parent, kind, name, value.to_string());
        tree.touch();
        Ok(id)
    }

    /// Set or replace an attribute, matched by qualified name.
    pub fn set_attribute(
        &self,
        element: ForeignNodeId,
        name: ForeignName,
        value: &str,
    ) -> Result<ForeignNodeId, LiaisonError> {
        let mut tree = self.tree.write();
        tree.checked_element(element)?;
        let id = tree.push_attribute(element, name, value.to_string());
        tree.touch();
        Ok(id)
    }

    pub fn declare_namespace(
        &self,
        element: ForeignNodeId,
        prefix: Option<&str>,
        uri: &str,
    ) -> Result<ForeignNodeId, LiaisonError> {
        let mut tree = self.tree.write();
        tree.checked_element(element)?;
        let id = tree.push_namespace(element, prefix, uri);
        tree.touch();
        Ok(id)
    }

    pub fn set_value(&self, node: ForeignNodeId, value: &str) -> Result<(), LiaisonError> {
        let mut tree = self.tree.write();
        match tree.checked(node)?.kind {
            ForeignNodeKind::Document | ForeignNodeKind::Element => {
                return Err(LiaisonError::InvalidNode { id: node, reason: "node has no value of its own" });
            }
            _ => {}
        }
        tree.nodes[node.index()].value = value.to_string();
        tree.touch();
        Ok(())
    }

    /// Detach `child` from `parent`. Returns `false` when it was not a child.
    pub fn remove_child(&self, parent: ForeignNodeId, child: ForeignNodeId) -> Result<bool, LiaisonError> {
        let mut tree = self.tree.write();
        tree.checked_container(parent)?;
        tree.checked(child)?;
        let children = &mut tree.nodes[parent.index()].children;
        let Some(pos) = children.iter().position(|c| *c == child) else {
            return Ok(false);
        };
        children.remove(pos);
        tree.nodes[child.index()].parent = None;
        tree.touch();
        Ok(true)
    }

    pub fn normalize(&self) {
        let mut tree = self.tree.write();
        if tree.normalize() {
            tree.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn mutations_bump_revision() {
        let doc = ForeignDocument::new();
        let r0 = doc.revision();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("root")).unwrap();
        doc.set_attribute(root, ForeignName::parse("a"), "1").unwrap();
        assert!(doc.revision() > r0);
        assert_eq!(doc.document_element(), Some(root));
    }

    #[rstest]
    fn normalize_merges_adjacent_text() {
        let doc = ForeignDocument::new();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        doc.append_text(root, "a").unwrap();
        doc.append_text(root, "").unwrap();
        doc.append_text(root, "b").unwrap();
        doc.append_cdata(root, "c").unwrap();
        doc.append_text(root, "d").unwrap();
        let before = doc.revision();
        doc.normalize();
        assert!(doc.revision() > before);
        let tree = doc.read();
        let kids = &tree.node(root).unwrap().children;
        assert_eq!(kids.len(), 3);
        assert_eq!(tree.node(kids[0]).unwrap().value, "ab");
        assert_eq!(tree.text_content(root), "abcd");
    }

    #[rstest]
    fn normalize_is_quiet_when_nothing_changes() {
        let doc = ForeignDocument::new();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        doc.append_text(root, "x").unwrap();
        let before = doc.revision();
        doc.normalize();
        assert_eq!(doc.revision(), before);
    }

    #[rstest]
    fn invalid_parents_are_rejected() {
        let doc = ForeignDocument::new();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        let text = doc.append_text(root, "x").unwrap();
        assert!(matches!(doc.append_element(text, ForeignName::parse("y")), Err(LiaisonError::InvalidNode { .. })));
        assert!(doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("second")).is_err());
        assert!(doc.append_text(ForeignNodeId::DOCUMENT, "loose").is_err());
    }

    #[rstest]
    fn removed_children_are_detached() {
        let doc = ForeignDocument::new();
        let root = doc.append_element(ForeignNodeId::DOCUMENT, ForeignName::parse("r")).unwrap();
        let a = doc.append_element(root, ForeignName::parse("a")).unwrap();
        assert!(doc.remove_child(root, a).unwrap());
        assert!(!doc.remove_child(root, a).unwrap());
        let tree = doc.read();
        assert!(tree.node(a).unwrap().parent.is_none());
        assert!(!tree.document_order().contains(&a));
    }

    #[rstest]
    fn prefixed_names_split() {
        let n = ForeignName::parse("p:item");
        assert_eq!(n.prefix.as_deref(), Some("p"));
        assert_eq!(n.local, "item");
        let odd = ForeignName::parse(":x");
        assert_eq!(odd.local, ":x");
    }
}
