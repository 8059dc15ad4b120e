//! Parser liaison for the Sylva transformation runtime.
//!
//! [`ParserLiaison`] parses XML through a pluggable [`ForeignParser`] (by default
//! [`QuickXmlParser`]), routes the parser's diagnostics, and registers the resulting
//! trees as [`DocumentAdapter`]s whose nodes implement [`sylva_xpath::XdmNode`].
//!
//! ```
//! use sylva_liaison::{InputSource, ParserLiaison};
//! use sylva_xpath::XdmNode;
//!
//! let mut liaison = ParserLiaison::new();
//! let doc = liaison.parse_document(&InputSource::from_text("<greeting>hi</greeting>"))?;
//! let root = doc.document_element()?.expect("document element");
//! assert_eq!(root.string_value(), "hi");
//! # Ok::<(), sylva_liaison::LiaisonError>(())
//! ```
pub mod adapter;
pub mod diagnostics;
pub mod error;
pub mod foreign;
pub mod handler;
pub mod liaison;
pub mod options;
pub mod parser;
pub mod source;

pub use adapter::{
    AdapterNode, BridgeDocument, DocumentAdapter, DocumentHandle, DocumentStrategy, StrategyKind, WrapperDocument,
};
pub use diagnostics::{
    CollectingSink, ConsoleSink, DiagnosticSink, ExecutionContext, NullSink, SaxParseError, Severity, TracingSink,
};
pub use error::LiaisonError;
pub use foreign::{ForeignDocument, ForeignName, ForeignNode, ForeignNodeId, ForeignNodeKind, ForeignTree};
pub use handler::{AttributeEvent, ContentHandler, EntityResolver, ErrorHandler, NamespaceDecl, StartElement};
pub use liaison::{LiaisonState, ParserLiaison};
pub use options::LiaisonOptions;
pub use parser::{DomBuilder, ForeignParser, ParserConfig, QuickXmlParser};
pub use source::InputSource;
