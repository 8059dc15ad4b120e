use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::dtd::{
    DocType, ReferenceError, builtin_reference, expand_references, normalize_attribute_whitespace,
    normalize_line_endings,
};
use super::{ForeignParser, ParserConfig};
use crate::diagnostics::{SaxParseError, Severity};
use crate::handler::{AttributeEvent, ContentHandler, ErrorHandler, NamespaceDecl, StartElement};
use crate::source::InputSource;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Default [`ForeignParser`], built on `quick-xml`'s pull reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuickXmlParser;

impl QuickXmlParser {
    pub fn new() -> Self {
        Self
    }
}

impl ForeignParser for QuickXmlParser {
    fn description(&self) -> &str {
        "quick-xml"
    }

    fn parse_events(
        &self,
        source: &InputSource,
        config: &ParserConfig,
        content: &mut dyn ContentHandler,
        errors: &dyn ErrorHandler,
    ) -> Result<(), SaxParseError> {
        Session::new(source, config, errors).run(content)
    }
}

fn offset(position: u64) -> usize {
    usize::try_from(position).unwrap_or(usize::MAX)
}

// `run` rejects input that is not UTF-8 before any event is decoded.
fn text_of(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn is_utf8_label(label: &str) -> bool {
    ["utf-8", "utf8", "us-ascii"].iter().any(|known| label.eq_ignore_ascii_case(known))
}

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => (Some(prefix), local),
        _ => (None, qname),
    }
}

struct Session<'a> {
    bytes: &'a [u8],
    system_id: Option<&'a str>,
    config: &'a ParserConfig,
    errors: &'a dyn ErrorHandler,
    line_starts: Vec<usize>,
    open: Vec<String>,
    // One frame per open element: (prefix, uri), "" for the default namespace.
    scopes: Vec<Vec<(String, String)>>,
    doctype: Option<DocType>,
    root_seen: bool,
    first_fatal: Option<SaxParseError>,
}

impl<'a> Session<'a> {
    fn new(source: &'a InputSource, config: &'a ParserConfig, errors: &'a dyn ErrorHandler) -> Self {
        let bytes = source.bytes();
        let line_starts = std::iter::once(0)
            .chain(bytes.iter().enumerate().filter(|(_, b)| **b == b'\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            bytes,
            system_id: source.system_id(),
            config,
            errors,
            line_starts,
            open: Vec::new(),
            scopes: Vec::new(),
            doctype: None,
            root_seen: false,
            first_fatal: None,
        }
    }

    fn position(&self, offset: usize) -> (u64, u64) {
        let offset = offset.min(self.bytes.len());
        let line = self.line_starts.partition_point(|start| *start <= offset).max(1);
        let start = self.line_starts[line - 1];
        let column = text_of(&self.bytes[start..offset]).chars().count() + 1;
        (line as u64, column as u64)
    }

    fn diagnostic(&self, severity: Severity, message: impl Into<String>, offset: usize) -> SaxParseError {
        let (line, column) = self.position(offset);
        SaxParseError::new(severity, message).at(self.system_id, line, column)
    }

    /// Hand a diagnostic to the error handler. Fatal errors the handler lets pass
    /// still end the parse, immediately or once the input is exhausted.
    fn report(&mut self, severity: Severity, message: impl Into<String>, offset: usize) -> Result<(), SaxParseError> {
        let err = self.diagnostic(severity, message, offset);
        self.errors.report(&err)?;
        if severity == Severity::Fatal {
            if self.config.exit_on_first_fatal_error {
                return Err(err);
            }
            self.first_fatal.get_or_insert(err);
        }
        Ok(())
    }

    /// Fatal error after which the reader cannot continue.
    fn abort(&mut self, message: impl Into<String>, offset: usize) -> SaxParseError {
        let err = self.diagnostic(Severity::Fatal, message, offset);
        match self.errors.fatal_error(&err) {
            Err(rejected) => rejected,
            Ok(()) => self.first_fatal.take().unwrap_or(err),
        }
    }

    fn run(mut self, content: &mut dyn ContentHandler) -> Result<(), SaxParseError> {
        if let Err(e) = std::str::from_utf8(self.bytes) {
            return Err(self.abort("Invalid byte sequence, the input must be encoded as UTF-8", e.valid_up_to()));
        }
        let mut reader = Reader::from_reader(self.bytes);
        {
            let config = reader.config_mut();
            config.trim_text(false);
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
            config.expand_empty_elements = false;
        }
        let mut buf = Vec::new();
        content.start_document();
        loop {
            let at = offset(reader.buffer_position());
            buf.clear();
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => {
                    let at = offset(reader.error_position());
                    return Err(self.abort(e.to_string(), at));
                }
            };
            match event {
                Event::Decl(decl) => {
                    if let Ok(version) = decl.version() {
                        if version.as_ref() != b"1.0" {
                            let version = text_of(&version).into_owned();
                            self.report(
                                Severity::Warning,
                                format!("XML version {version} is not supported, the document is read as XML 1.0"),
                                at,
                            )?;
                        }
                    }
                    if let Some(Ok(label)) = decl.encoding() {
                        let label = text_of(&label).into_owned();
                        if !is_utf8_label(&label) {
                            let message =
                                format!("The declared encoding '{label}' is not supported, the input must be UTF-8");
                            return Err(self.abort(message, at));
                        }
                    }
                }
                Event::DocType(body) => {
                    if self.root_seen {
                        let message = "The document type declaration must precede the root element";
                        self.report(Severity::Fatal, message, at)?;
                    } else {
                        self.doctype = Some(DocType::parse(&text_of(&body)));
                    }
                }
                Event::Start(start) => self.start_element(&start, at, false, content)?,
                Event::Empty(start) => self.start_element(&start, at, true, content)?,
                Event::End(end) => {
                    let qname = text_of(end.name().as_ref()).into_owned();
                    self.end_element(&qname, at, content)?;
                }
                Event::Text(text) => {
                    let raw = normalize_line_endings(&text_of(&text));
                    self.text(&raw, at, content)?;
                }
                Event::GeneralRef(reference) => {
                    let name = text_of(&reference).into_owned();
                    self.reference(&name, at, content)?;
                }
                Event::CData(data) => {
                    if self.open.is_empty() {
                        self.report(Severity::Fatal, "A CDATA section is not allowed outside the root element", at)?;
                    } else {
                        content.cdata(&text_of(&data));
                    }
                }
                Event::Comment(text) => content.comment(&text_of(&text)),
                Event::PI(pi) => {
                    let data = text_of(pi.content());
                    content.processing_instruction(&text_of(pi.target()), data.trim_start_matches(is_xml_whitespace));
                }
                Event::Eof => {
                    self.finish(content)?;
                    break;
                }
            }
        }
        match self.first_fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn resolve(&self, name: &str) -> Option<String> {
        if let Some(c) = builtin_reference(name) {
            return Some(c.to_string());
        }
        if let Some(value) = self.doctype.as_ref().and_then(|dt| dt.entities.get(name)) {
            return Some(value.clone());
        }
        self.config.entity_resolver.as_ref().and_then(|resolver| resolver.resolve_entity(name))
    }

    fn expand(&mut self, raw: &str, at: usize) -> Result<String, SaxParseError> {
        match expand_references(raw, |name| self.resolve(name)) {
            Ok(text) => Ok(text),
            Err(ReferenceError::Undeclared(name)) => {
                self.report(Severity::Fatal, format!("The entity '{name}' was referenced, but not declared"), at)?;
                Ok(raw.to_string())
            }
            Err(ReferenceError::Unterminated) => {
                self.report(Severity::Fatal, "An entity reference is missing its terminating ';'", at)?;
                Ok(raw.to_string())
            }
        }
    }

    fn check_root(&mut self, qname: &str, at: usize) -> Result<(), SaxParseError> {
        let declared = self.doctype.as_ref().map(|dt| dt.name.clone()).filter(|name| name != qname);
        if let Some(declared) = declared {
            self.report(
                Severity::Error,
                format!("The root element <{qname}> does not match the document type name '{declared}'"),
                at,
            )?;
        }
        if self.config.validate && self.doctype.is_none() && !self.config.has_schema_location() {
            self.report(Severity::Warning, "Validation was requested but the document has no grammar", at)?;
        }
        Ok(())
    }

    fn lookup(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(XML_NS.to_string());
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    fn start_element(
        &mut self,
        start: &BytesStart<'_>,
        at: usize,
        empty: bool,
        content: &mut dyn ContentHandler,
    ) -> Result<(), SaxParseError> {
        let qname = text_of(start.name().as_ref()).into_owned();
        if self.open.is_empty() {
            if self.root_seen {
                let message = format!("Multiple root elements: <{qname}> follows the document element");
                self.report(Severity::Fatal, message, at)?;
            } else {
                self.root_seen = true;
                self.check_root(&qname, at)?;
            }
        }
        let undeclared = self.config.validate
            && self.doctype.as_ref().is_some_and(|dt| dt.declares_elements() && !dt.elements.contains(&qname));
        if undeclared {
            self.report(Severity::Error, format!("The element type '{qname}' is not declared"), at)?;
        }

        let mut raw_attributes = Vec::new();
        for attribute in start.attributes() {
            match attribute {
                Ok(attribute) => {
                    let key = text_of(attribute.key.as_ref()).into_owned();
                    let raw = normalize_attribute_whitespace(&text_of(&attribute.value));
                    let value = self.expand(&raw, at)?;
                    raw_attributes.push((key, value));
                }
                Err(e) => {
                    self.report(Severity::Fatal, format!("Malformed attribute in <{qname}>: {e}"), at)?;
                    break;
                }
            }
        }

        let element = if self.config.do_namespaces {
            self.qualify(qname.clone(), raw_attributes, at)?
        } else {
            self.scopes.push(Vec::new());
            StartElement {
                local: qname.clone(),
                qname: qname.clone(),
                prefix: None,
                ns_uri: None,
                attributes: raw_attributes
                    .into_iter()
                    .map(|(key, value)| AttributeEvent {
                        local: key.clone(),
                        qname: key,
                        prefix: None,
                        ns_uri: None,
                        value,
                    })
                    .collect(),
                namespaces: Vec::new(),
            }
        };
        content.start_element(&element);
        if empty {
            self.scopes.pop();
            content.end_element(&qname);
        } else {
            self.open.push(qname);
        }
        Ok(())
    }

    /// Split namespace declarations off the attributes, open a scope and resolve
    /// every prefix against it.
    fn qualify(
        &mut self,
        qname: String,
        raw_attributes: Vec<(String, String)>,
        at: usize,
    ) -> Result<StartElement, SaxParseError> {
        let mut namespaces = Vec::new();
        let mut plain = Vec::new();
        for (key, value) in raw_attributes {
            if key == "xmlns" {
                namespaces.push(NamespaceDecl { prefix: None, uri: value });
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                namespaces.push(NamespaceDecl { prefix: Some(prefix.to_string()), uri: value });
            } else {
                plain.push((key, value));
            }
        }
        self.scopes.push(namespaces.iter().map(|d| (d.prefix.clone().unwrap_or_default(), d.uri.clone())).collect());

        let (prefix, local) = split_qname(&qname);
        let ns_uri = self.lookup(prefix.unwrap_or_default());
        if let (Some(prefix), None) = (prefix, &ns_uri) {
            self.report(Severity::Error, format!("The namespace prefix '{prefix}' of <{qname}> is not bound"), at)?;
        }

        let mut attributes = Vec::with_capacity(plain.len());
        for (key, value) in plain {
            let (prefix, local) = split_qname(&key);
            // Unprefixed attributes are in no namespace.
            let ns_uri = prefix.and_then(|p| self.lookup(p));
            if let (Some(prefix), None) = (prefix, &ns_uri) {
                self.report(
                    Severity::Error,
                    format!("The namespace prefix '{prefix}' of attribute '{key}' is not bound"),
                    at,
                )?;
            }
            attributes.push(AttributeEvent {
                local: local.to_string(),
                prefix: prefix.map(str::to_string),
                qname: key.clone(),
                ns_uri,
                value,
            });
        }

        Ok(StartElement {
            local: local.to_string(),
            prefix: prefix.map(str::to_string),
            ns_uri,
            qname: qname.clone(),
            attributes,
            namespaces,
        })
    }

    fn end_element(&mut self, qname: &str, at: usize, content: &mut dyn ContentHandler) -> Result<(), SaxParseError> {
        let Some(expected) = self.open.pop() else {
            return self.report(Severity::Fatal, format!("The end tag </{qname}> has no matching start tag"), at);
        };
        if expected != qname {
            self.report(Severity::Fatal, format!("Expected the end tag </{expected}> but found </{qname}>"), at)?;
        }
        self.scopes.pop();
        content.end_element(&expected);
        Ok(())
    }

    fn text(&mut self, raw: &str, at: usize, content: &mut dyn ContentHandler) -> Result<(), SaxParseError> {
        let text = self.expand(raw, at)?;
        if self.open.is_empty() {
            if !text.chars().all(is_xml_whitespace) {
                self.report(Severity::Fatal, "Text is not allowed outside the root element", at)?;
            }
            return Ok(());
        }
        if text.is_empty() {
            return Ok(());
        }
        if text.chars().all(is_xml_whitespace) {
            content.ignorable_whitespace(&text);
        } else {
            content.characters(&text);
        }
        Ok(())
    }

    fn reference(&mut self, name: &str, at: usize, content: &mut dyn ContentHandler) -> Result<(), SaxParseError> {
        match self.resolve(name) {
            Some(_) if self.open.is_empty() => {
                self.report(Severity::Fatal, "An entity reference is not allowed outside the root element", at)
            }
            Some(text) => {
                content.characters(&text);
                Ok(())
            }
            None => self.report(Severity::Fatal, format!("The entity '{name}' was referenced, but not declared"), at),
        }
    }

    fn finish(&mut self, content: &mut dyn ContentHandler) -> Result<(), SaxParseError> {
        let end = self.bytes.len();
        if let Some(unclosed) = self.open.last().cloned() {
            self.report(Severity::Fatal, format!("The input ended before the closing tag </{unclosed}>"), end)?;
            while let Some(name) = self.open.pop() {
                self.scopes.pop();
                content.end_element(&name);
            }
        } else if !self.root_seen {
            self.report(Severity::Fatal, "The document has no root element", end)?;
        }
        content.end_document();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ErrorHandler;
    use parking_lot::Mutex;
    use rstest::rstest;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ContentHandler for Recorder {
        fn start_element(&mut self, element: &StartElement) {
            let attrs: Vec<_> = element.attributes.iter().map(|a| format!("{}={}", a.qname, a.value)).collect();
            self.events.push(format!("start {} {:?} [{}]", element.qname, element.ns_uri, attrs.join(",")));
        }
        fn end_element(&mut self, qname: &str) {
            self.events.push(format!("end {qname}"));
        }
        fn characters(&mut self, text: &str) {
            self.events.push(format!("text {text}"));
        }
        fn ignorable_whitespace(&mut self, _text: &str) {
            self.events.push("ws".into());
        }
    }

    /// Lets everything through and remembers what it saw.
    #[derive(Default)]
    struct Lenient {
        seen: Mutex<Vec<SaxParseError>>,
    }

    impl ErrorHandler for Lenient {
        fn warning(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
            self.seen.lock().push(error.clone());
            Ok(())
        }
        fn error(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
            self.seen.lock().push(error.clone());
            Ok(())
        }
        fn fatal_error(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
            self.seen.lock().push(error.clone());
            Ok(())
        }
    }

    fn run(xml: &str, config: &ParserConfig) -> (Result<(), SaxParseError>, Vec<String>, Vec<SaxParseError>) {
        let handler = Lenient::default();
        let mut recorder = Recorder::default();
        let result = QuickXmlParser.parse_events(&InputSource::from_text(xml), config, &mut recorder, &handler);
        (result, recorder.events, handler.seen.into_inner())
    }

    #[rstest]
    fn namespaces_resolve_through_scopes() {
        let (result, events, seen) = run(
            r#"<a xmlns="urn:d" xmlns:p="urn:p"><p:b p:x="1" y="2"/></a>"#,
            &ParserConfig::default(),
        );
        result.unwrap();
        assert!(seen.is_empty());
        assert_eq!(events[0], r#"start a Some("urn:d") []"#);
        assert_eq!(events[1], r#"start p:b Some("urn:p") [p:x=1,y=2]"#);
    }

    #[rstest]
    fn streaming_config_keeps_xmlns_as_attributes() {
        let (result, events, _) = run(r#"<a xmlns:p="urn:p"><p:b/></a>"#, &ParserConfig::default().for_streaming());
        result.unwrap();
        assert_eq!(events[0], "start a None [xmlns:p=urn:p]");
        assert_eq!(events[1], "start p:b None []");
    }

    #[rstest]
    fn unbound_prefix_is_recoverable() {
        let (result, _, seen) = run("<q:a/>", &ParserConfig::default());
        result.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].severity, Severity::Error);
    }

    #[rstest]
    fn entities_expand_in_text_and_attributes() {
        let xml = "<!DOCTYPE r [<!ENTITY who \"world\">]><r a=\"&who;&#33;\">hello &who;</r>";
        let (result, events, _) = run(xml, &ParserConfig::default());
        result.unwrap();
        assert_eq!(events[0], "start r None [a=world!]");
        let text: String = events.iter().filter_map(|e| e.strip_prefix("text ")).collect();
        assert_eq!(text, "hello world");
    }

    #[rstest]
    fn whitespace_only_text_is_ignorable() {
        let (result, events, _) = run("<r>\n  <a/>\n</r>", &ParserConfig::default());
        result.unwrap();
        assert_eq!(events.iter().filter(|e| *e == "ws").count(), 2);
    }

    #[rstest]
    fn positions_are_one_based() {
        let (result, _, seen) = run("<r>\n  <a></b>\n</r>", &ParserConfig::default());
        let err = result.unwrap_err();
        assert_eq!(err.severity, Severity::Fatal);
        assert_eq!((err.line, err.column), (2, 6));
        assert_eq!(seen.len(), 1);
    }

    #[rstest]
    fn lenient_parse_continues_when_not_exiting_on_first_fatal() {
        let config = ParserConfig { exit_on_first_fatal_error: false, ..ParserConfig::default() };
        let (result, events, seen) = run("<r><a></b><c/></r>", &config);
        let err = result.unwrap_err();
        assert!(err.message.contains("</a>"));
        assert!(events.iter().any(|e| e.starts_with("start c")));
        assert_eq!(seen.len(), 1);
    }

    #[rstest]
    #[case("", "no root element")]
    #[case("<a/><b/>", "Multiple root elements")]
    #[case("<a/>text", "outside the root element")]
    #[case("<a>&bogus;</a>", "not declared")]
    #[case("<a>", "closing tag </a>")]
    fn fatal_conditions(#[case] xml: &str, #[case] fragment: &str) {
        let (result, _, _) = run(xml, &ParserConfig::default());
        let err = result.unwrap_err();
        assert_eq!(err.severity, Severity::Fatal);
        assert!(err.message.contains(fragment), "{}", err.message);
    }

    #[rstest]
    fn malformed_utf8_is_fatal() {
        let handler = Lenient::default();
        let source = InputSource::from_bytes(b"<a>caf\xE9</a>".to_vec());
        let result = QuickXmlParser.parse_events(&source, &ParserConfig::default(), &mut Recorder::default(), &handler);
        let err = result.unwrap_err();
        assert_eq!(err.severity, Severity::Fatal);
        assert_eq!((err.line, err.column), (1, 7));
        assert!(err.message.contains("UTF-8"), "{}", err.message);
    }

    #[rstest]
    #[case("ISO-8859-1", false)]
    #[case("windows-1252", false)]
    #[case("UTF-8", true)]
    #[case("utf8", true)]
    fn declared_encoding_must_be_utf8(#[case] label: &str, #[case] accepted: bool) {
        let xml = format!("<?xml version=\"1.0\" encoding=\"{label}\"?><a>cafe</a>");
        let (result, _, seen) = run(&xml, &ParserConfig::default());
        assert_eq!(result.is_ok(), accepted, "{label}: {result:?}");
        if !accepted {
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].severity, Severity::Fatal);
            assert!(seen[0].message.contains(label));
        }
    }

    #[rstest]
    fn undeclared_element_only_checked_when_validating() {
        let xml = "<!DOCTYPE r [<!ELEMENT r ANY>]><r><x/></r>";
        let (_, _, quiet) = run(xml, &ParserConfig::default());
        assert!(quiet.is_empty());
        let config = ParserConfig { validate: true, ..ParserConfig::default() };
        let (_, _, seen) = run(xml, &config);
        assert_eq!(seen.len(), 1);
        assert!(seen[0].message.contains("'x'"));
    }

    #[rstest]
    fn version_and_grammar_warnings() {
        let config = ParserConfig { validate: true, ..ParserConfig::default() };
        let (result, _, seen) = run("<?xml version=\"1.1\"?><r/>", &config);
        result.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.severity == Severity::Warning));
        let with_schema = ParserConfig { external_schema_location: Some("urn:s s.xsd".into()), ..config };
        let (_, _, seen) = run("<r/>", &with_schema);
        assert!(seen.is_empty());
    }
}
