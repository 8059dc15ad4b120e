//! SAX-style callbacks between a parser and its consumer.
use crate::diagnostics::{SaxParseError, Severity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEvent {
    pub qname: String,
    pub local: String,
    pub prefix: Option<String>,
    pub ns_uri: Option<String>,
    pub value: String,
}

/// `xmlns` (prefix `None`) or `xmlns:p` declaration seen in namespace mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub qname: String,
    pub local: String,
    pub prefix: Option<String>,
    pub ns_uri: Option<String>,
    pub attributes: Vec<AttributeEvent>,
    /// Always empty when namespace processing is off; the declarations then
    /// arrive as ordinary attributes.
    pub namespaces: Vec<NamespaceDecl>,
}

/// Document content callbacks. Every method defaults to doing nothing.
pub trait ContentHandler {
    fn start_document(&mut self) {}
    fn end_document(&mut self) {}
    fn start_element(&mut self, _element: &StartElement) {}
    fn end_element(&mut self, _qname: &str) {}
    fn characters(&mut self, _text: &str) {}
    fn cdata(&mut self, text: &str) {
        self.characters(text);
    }
    fn ignorable_whitespace(&mut self, _text: &str) {}
    fn processing_instruction(&mut self, _target: &str, _data: &str) {}
    fn comment(&mut self, _text: &str) {}
}

/// Decides what happens to a diagnostic. Returning `Err` aborts the parse with that
/// error; returning `Ok` lets the parser carry on where it can.
pub trait ErrorHandler: Send + Sync {
    fn warning(&self, error: &SaxParseError) -> Result<(), SaxParseError>;
    fn error(&self, error: &SaxParseError) -> Result<(), SaxParseError>;
    fn fatal_error(&self, error: &SaxParseError) -> Result<(), SaxParseError>;

    fn report(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
        match error.severity {
            Severity::Warning => self.warning(error),
            Severity::Error => self.error(error),
            Severity::Fatal => self.fatal_error(error),
        }
    }
}

/// Supplies replacement text for entity references the document does not declare.
pub trait EntityResolver: Send + Sync {
    fn resolve_entity(&self, name: &str) -> Option<String>;
}
