//! The external-parser seam.
//!
//! The liaison talks to parsers only through [`ForeignParser`]. [`QuickXmlParser`] is
//! the bundled implementation; any other parser can be plugged in as long as it
//! reports content through a [`ContentHandler`] and diagnostics through an
//! [`ErrorHandler`].
use std::sync::Arc;

use crate::diagnostics::SaxParseError;
use crate::foreign::{ForeignDocument, ForeignName, ForeignNodeId, ForeignNodeKind, ForeignTree};
use crate::handler::{ContentHandler, EntityResolver, ErrorHandler, StartElement};
use crate::source::InputSource;

mod dtd;
mod quick;

pub use quick::QuickXmlParser;

/// Per-parse settings handed to the parser.
#[derive(Clone)]
pub struct ParserConfig {
    pub validate: bool,
    pub do_namespaces: bool,
    pub include_ignorable_whitespace: bool,
    pub exit_on_first_fatal_error: bool,
    pub external_schema_location: Option<String>,
    pub external_no_namespace_schema_location: Option<String>,
    pub entity_resolver: Option<Arc<dyn EntityResolver>>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            validate: false,
            do_namespaces: true,
            include_ignorable_whitespace: true,
            exit_on_first_fatal_error: true,
            external_schema_location: None,
            external_no_namespace_schema_location: None,
            entity_resolver: None,
        }
    }
}

impl ParserConfig {
    /// Settings for event streaming: never validates, never processes namespaces.
    #[must_use]
    pub fn for_streaming(&self) -> Self {
        Self { validate: false, do_namespaces: false, ..self.clone() }
    }

    pub fn has_schema_location(&self) -> bool {
        self.external_schema_location.is_some() || self.external_no_namespace_schema_location.is_some()
    }
}

impl std::fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserConfig")
            .field("validate", &self.validate)
            .field("do_namespaces", &self.do_namespaces)
            .field("include_ignorable_whitespace", &self.include_ignorable_whitespace)
            .field("exit_on_first_fatal_error", &self.exit_on_first_fatal_error)
            .field("external_schema_location", &self.external_schema_location)
            .field("external_no_namespace_schema_location", &self.external_no_namespace_schema_location)
            .field("entity_resolver", &self.entity_resolver.is_some())
            .finish()
    }
}

pub trait ForeignParser {
    /// Short human readable name, e.g. `"quick-xml"`.
    fn description(&self) -> &str;

    /// Drive `content` with the events of `source`. Diagnostics go to `errors`; the
    /// parse fails with the first diagnostic the handler rejects, or with the first
    /// fatal error once the input is exhausted.
    fn parse_events(
        &self,
        source: &InputSource,
        config: &ParserConfig,
        content: &mut dyn ContentHandler,
        errors: &dyn ErrorHandler,
    ) -> Result<(), SaxParseError>;

    fn parse_document(
        &self,
        source: &InputSource,
        config: &ParserConfig,
        errors: &dyn ErrorHandler,
    ) -> Result<ForeignDocument, SaxParseError> {
        let mut builder = DomBuilder::new(config.include_ignorable_whitespace);
        self.parse_events(source, config, &mut builder, errors)?;
        Ok(builder.finish(source.system_id()))
    }
}

/// Content handler that assembles a [`ForeignDocument`].
#[derive(Debug)]
pub struct DomBuilder {
    tree: ForeignTree,
    open: Vec<ForeignNodeId>,
    keep_whitespace: bool,
}

impl DomBuilder {
    pub fn new(keep_whitespace: bool) -> Self {
        Self { tree: ForeignTree::default(), open: Vec::new(), keep_whitespace }
    }

    fn current(&self) -> ForeignNodeId {
        self.open.last().copied().unwrap_or(ForeignNodeId::DOCUMENT)
    }

    pub fn finish(mut self, system_id: Option<&str>) -> ForeignDocument {
        self.tree.set_system_id(system_id);
        ForeignDocument::from_tree(self.tree)
    }
}

impl ContentHandler for DomBuilder {
    fn start_element(&mut self, element: &StartElement) {
        let name = ForeignName {
            qname: element.qname.clone(),
            local: element.local.clone(),
            prefix: element.prefix.clone(),
            ns_uri: element.ns_uri.clone(),
        };
        let parent = self.current();
        let id = self.tree.push_child(parent, ForeignNodeKind::Element, Some(name), String::new());
        for attr in &element.attributes {
            let name = ForeignName {
                qname: attr.qname.clone(),
                local: attr.local.clone(),
                prefix: attr.prefix.clone(),
                ns_uri: attr.ns_uri.clone(),
            };
            self.tree.push_attribute(id, name, attr.value.clone());
        }
        for decl in &element.namespaces {
            self.tree.push_namespace(id, decl.prefix.as_deref(), &decl.uri);
        }
        self.open.push(id);
    }

    fn end_element(&mut self, _qname: &str) {
        self.open.pop();
    }

    fn characters(&mut self, text: &str) {
        if self.open.is_empty() {
            return;
        }
        let parent = self.current();
        self.tree.push_text(parent, text);
    }

    fn cdata(&mut self, text: &str) {
        if self.open.is_empty() {
            return;
        }
        let parent = self.current();
        self.tree.push_child(parent, ForeignNodeKind::CData, None, text.to_string());
    }

    fn ignorable_whitespace(&mut self, text: &str) {
        if self.keep_whitespace {
            self.characters(text);
        }
    }

    fn processing_instruction(&mut self, target: &str, data: &str) {
        let parent = self.current();
        self.tree.push_child(
            parent,
            ForeignNodeKind::ProcessingInstruction,
            Some(ForeignName::unqualified(target)),
            data.to_string(),
        );
    }

    fn comment(&mut self, text: &str) {
        let parent = self.current();
        self.tree.push_child(parent, ForeignNodeKind::Comment, None, text.to_string());
    }
}
