//! Typed results of path-query evaluation.
//!
//! A [`TypedValue`] wraps exactly one authoritative payload. Derived forms (the
//! string form of a number, the numeric form of a string, the string value of a
//! node-set) are computed on first request and cached; values never change after
//! construction, so the caches are write-once.
use core::fmt;
use std::cell::OnceCell;

use compact_str::CompactString;

use crate::model::XdmNode;
use crate::node_list::NodeList;

pub mod convert;

pub use convert::{number_to_string, string_to_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    Number,
    String,
    NodeSet,
    ResultTreeFragment,
    Span,
    Unknown,
    Null,
}

impl ValueKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::NodeSet => "node-set",
            ValueKind::ResultTreeFragment => "result-tree-fragment",
            ValueKind::Span => "span",
            ValueKind::Unknown => "unknown",
            ValueKind::Null => "null",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Detached subtree produced by a transformation, held as its top-level nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTreeFragment<N> {
    nodes: NodeList<N>,
}

impl<N> ResultTreeFragment<N> {
    pub fn new(nodes: impl Into<NodeList<N>>) -> Self {
        Self { nodes: nodes.into() }
    }

    pub fn nodes(&self) -> &NodeList<N> {
        &self.nodes
    }
}

impl<N: XdmNode> ResultTreeFragment<N> {
    pub fn string_value(&self) -> String {
        self.nodes.iter().map(XdmNode::string_value).collect()
    }
}

/// Positional range `[start, end)` over a node list.
#[derive(Debug, Clone, PartialEq)]
pub struct Span<N> {
    nodes: NodeList<N>,
    start: usize,
    end: usize,
}

impl<N> Span<N> {
    pub fn new(nodes: impl Into<NodeList<N>>) -> Self {
        let nodes = nodes.into();
        let end = nodes.len();
        Self { nodes, start: 0, end }
    }

    /// Narrow to `[start, end)` relative to the current range; bounds are clamped.
    #[must_use]
    pub fn narrow(&self, start: usize, end: usize) -> Self {
        let new_start = self.start.saturating_add(start).min(self.end);
        let new_end = self.start.saturating_add(end).clamp(new_start, self.end);
        Self { nodes: self.nodes.clone(), start: new_start, end: new_end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes.as_slice()[self.start..self.end]
    }

    pub fn backing(&self) -> &NodeList<N> {
        &self.nodes
    }
}

/// Authoritative payload, one variant per value kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePayload<N> {
    Boolean(bool),
    Number(f64),
    String(CompactString),
    NodeSet(NodeList<N>),
    ResultTreeFragment(ResultTreeFragment<N>),
    Span(Span<N>),
    Unknown(CompactString),
    Null,
}

impl<N> ValuePayload<N> {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValuePayload::Boolean(_) => ValueKind::Boolean,
            ValuePayload::Number(_) => ValueKind::Number,
            ValuePayload::String(_) => ValueKind::String,
            ValuePayload::NodeSet(_) => ValueKind::NodeSet,
            ValuePayload::ResultTreeFragment(_) => ValueKind::ResultTreeFragment,
            ValuePayload::Span(_) => ValueKind::Span,
            ValuePayload::Unknown(_) => ValueKind::Unknown,
            ValuePayload::Null => ValueKind::Null,
        }
    }
}

#[derive(Clone)]
pub struct TypedValue<N> {
    payload: ValuePayload<N>,
    string_form: OnceCell<CompactString>,
    number_form: OnceCell<f64>,
}

impl<N> TypedValue<N> {
    pub fn new(payload: ValuePayload<N>) -> Self {
        Self { payload, string_form: OnceCell::new(), number_form: OnceCell::new() }
    }

    pub fn kind(&self) -> ValueKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &ValuePayload<N> {
        &self.payload
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().type_name()
    }

    /// Nodes visible through this value: the node-set itself, the span's range or the
    /// fragment's top-level nodes.
    pub fn nodes(&self) -> Option<&[N]> {
        match &self.payload {
            ValuePayload::NodeSet(list) => Some(list.as_slice()),
            ValuePayload::Span(span) => Some(span.nodes()),
            ValuePayload::ResultTreeFragment(frag) => Some(frag.nodes().as_slice()),
            _ => None,
        }
    }
}

impl<N: XdmNode> TypedValue<N> {
    pub fn to_boolean(&self) -> bool {
        match &self.payload {
            ValuePayload::Boolean(b) => *b,
            ValuePayload::Number(n) => convert::number_to_boolean(*n),
            ValuePayload::String(s) => !s.is_empty(),
            ValuePayload::NodeSet(list) => !list.is_empty(),
            ValuePayload::Span(span) => !span.is_empty(),
            // A fragment behaves as a node-set holding its root node.
            ValuePayload::ResultTreeFragment(_) => true,
            ValuePayload::Unknown(_) | ValuePayload::Null => false,
        }
    }

    pub fn to_number(&self) -> f64 {
        match &self.payload {
            ValuePayload::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ValuePayload::Number(n) => *n,
            ValuePayload::Null => 0.0,
            ValuePayload::Unknown(_) => f64::NAN,
            ValuePayload::String(_)
            | ValuePayload::NodeSet(_)
            | ValuePayload::Span(_)
            | ValuePayload::ResultTreeFragment(_) => {
                *self.number_form.get_or_init(|| string_to_number(self.as_str()))
            }
        }
    }

    /// String form per XPath `string()`.
    pub fn as_str(&self) -> &str {
        match &self.payload {
            ValuePayload::String(s) | ValuePayload::Unknown(s) => s.as_str(),
            ValuePayload::Null => "",
            ValuePayload::Boolean(b) => if *b { "true" } else { "false" },
            ValuePayload::Number(n) => self.string_form.get_or_init(|| number_to_string(*n)).as_str(),
            ValuePayload::NodeSet(list) => self
                .string_form
                .get_or_init(|| first_string_value(list.as_slice()))
                .as_str(),
            ValuePayload::Span(span) => {
                self.string_form.get_or_init(|| first_string_value(span.nodes())).as_str()
            }
            ValuePayload::ResultTreeFragment(frag) => {
                self.string_form.get_or_init(|| frag.string_value().into()).as_str()
            }
        }
    }

    /// Length of the string form in characters.
    pub fn string_length(&self) -> usize {
        self.as_str().chars().count()
    }
}

fn first_string_value<N: XdmNode>(nodes: &[N]) -> CompactString {
    nodes.first().map(|n| CompactString::from(n.string_value())).unwrap_or_default()
}

impl<N: PartialEq> PartialEq for TypedValue<N> {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl<N: fmt::Debug> fmt::Debug for TypedValue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedValue").field(&self.payload).finish()
    }
}

impl<N: XdmNode> fmt::Display for TypedValue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
