//! The parser liaison: drives the external parser, routes its diagnostics and owns
//! the identity map from document handles to adapted documents.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::adapter::{
    AdapterCore, BridgeDocument, DocumentAdapter, DocumentHandle, DocumentStrategy, StrategyKind, WrapperDocument,
};
use crate::diagnostics::{ConsoleSink, DiagnosticSink, ExecutionContext, SaxParseError};
use crate::error::LiaisonError;
use crate::foreign::ForeignDocument;
use crate::handler::{ContentHandler, EntityResolver, ErrorHandler};
use crate::options::LiaisonOptions;
use crate::parser::{ForeignParser, QuickXmlParser};
use crate::source::InputSource;

static NEXT_LIAISON: AtomicU64 = AtomicU64::new(1);

/// Outcome of the most recent parse request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiaisonState {
    #[default]
    Idle,
    Parsing,
    /// The parse succeeded; DOM parses carry the handle of the new document.
    Completed(Option<DocumentHandle>),
    Failed,
}

struct DocumentEntry {
    core: Arc<AdapterCore>,
    owned: bool,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<DocumentEntry>,
}

/// Default diagnostic routing: render, hand to the execution context (or the sink),
/// then decide whether the parse goes on.
struct RoutingHandler<'a> {
    sink: &'a dyn DiagnosticSink,
    context: Option<&'a dyn ExecutionContext>,
    validate: bool,
}

impl RoutingHandler<'_> {
    fn route(&self, error: &SaxParseError) {
        let message = error.format_message();
        match self.context {
            Some(context) => context.warn(&message),
            None => self.sink.emit(error.severity, &message),
        }
    }
}

impl ErrorHandler for RoutingHandler<'_> {
    fn warning(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
        self.route(error);
        Ok(())
    }

    fn error(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
        self.route(error);
        if self.validate { Err(error.clone()) } else { Ok(()) }
    }

    fn fatal_error(&self, error: &SaxParseError) -> Result<(), SaxParseError> {
        self.route(error);
        Err(error.clone())
    }
}

/// Parses documents through a [`ForeignParser`] and keeps track of every document
/// adapted for the query engine.
///
/// Documents come from [`parse_document`](Self::parse_document) and
/// [`create_document`](Self::create_document) (owned by the liaison) or from
/// [`create_document_from`](Self::create_document_from) (caller's tree). Each is
/// registered under a generation-stamped [`DocumentHandle`] until it is destroyed or
/// the liaison is reset. Handles and adapters from before that point go stale.
pub struct ParserLiaison {
    id: u64,
    options: LiaisonOptions,
    parser: Box<dyn ForeignParser>,
    sink: Arc<dyn DiagnosticSink>,
    execution_context: Option<Arc<dyn ExecutionContext>>,
    epoch: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
    state: LiaisonState,
}

impl Default for ParserLiaison {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserLiaison {
    pub fn new() -> Self {
        Self::with_options(LiaisonOptions::default())
    }

    pub fn with_options(options: LiaisonOptions) -> Self {
        Self {
            id: NEXT_LIAISON.fetch_add(1, Ordering::Relaxed),
            options,
            parser: Box::new(QuickXmlParser::new()),
            sink: Arc::new(ConsoleSink),
            execution_context: None,
            epoch: 0,
            slots: Vec::new(),
            free: Vec::new(),
            state: LiaisonState::Idle,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: impl ForeignParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Where diagnostics go when no execution context is bound.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_sink(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.sink = sink;
    }

    pub fn options(&self) -> &LiaisonOptions {
        &self.options
    }

    pub fn state(&self) -> LiaisonState {
        self.state
    }

    pub fn parser_description(&self) -> &str {
        self.parser.description()
    }

    /// Number of documents currently registered.
    pub fn document_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// Parse `source` into a new liaison-owned document.
    pub fn parse_document(&mut self, source: &InputSource) -> Result<DocumentAdapter, LiaisonError> {
        self.state = LiaisonState::Parsing;
        debug!(system_id = ?source.system_id(), parser = self.parser.description(), "parse started");
        let config = self.options.parser_config();
        let result = match self.options.error_handler() {
            Some(handler) => self.parser.parse_document(source, &config, handler.as_ref()),
            None => {
                let routing = RoutingHandler {
                    sink: self.sink.as_ref(),
                    context: self.execution_context.as_deref(),
                    validate: config.validate,
                };
                self.parser.parse_document(source, &config, &routing)
            }
        };
        let foreign = match result {
            Ok(foreign) => foreign,
            Err(err) => {
                self.state = LiaisonState::Failed;
                debug!(error = %err, "parse failed");
                return Err(err.into());
            }
        };
        foreign.normalize();
        let strategy = build_strategy(
            Arc::new(foreign),
            self.options.strategy(),
            self.options.thread_safe(),
            self.options.build_maps(),
        );
        let adapter = self.register(strategy, true);
        self.state = LiaisonState::Completed(Some(adapter.handle()));
        debug!(handle = ?adapter.handle(), "parse finished");
        Ok(adapter)
    }

    /// Stream the events of `source` into `handler` without building a document.
    /// Streaming never validates and never processes namespaces.
    pub fn parse_stream(&mut self, source: &InputSource, handler: &mut dyn ContentHandler) -> Result<(), LiaisonError> {
        self.state = LiaisonState::Parsing;
        debug!(system_id = ?source.system_id(), "stream parse started");
        let config = self.options.parser_config().for_streaming();
        let result = match self.options.error_handler() {
            Some(errors) => self.parser.parse_events(source, &config, handler, errors.as_ref()),
            None => {
                let routing = RoutingHandler {
                    sink: self.sink.as_ref(),
                    context: self.execution_context.as_deref(),
                    validate: config.validate,
                };
                self.parser.parse_events(source, &config, handler, &routing)
            }
        };
        match result {
            Ok(()) => {
                self.state = LiaisonState::Completed(None);
                debug!("stream parse finished");
                Ok(())
            }
            Err(err) => {
                self.state = LiaisonState::Failed;
                debug!(error = %err, "stream parse failed");
                Err(err.into())
            }
        }
    }

    /// An empty liaison-owned document, read through the wrapper strategy.
    pub fn create_document(&mut self) -> DocumentAdapter {
        let strategy = build_strategy(Arc::new(ForeignDocument::new()), StrategyKind::Wrapper, false, false);
        self.register(strategy, true)
    }

    /// Adapt a tree the caller owns. Destroying the adapter leaves the tree alone.
    pub fn create_document_from(
        &mut self,
        foreign: Arc<ForeignDocument>,
        thread_safe: bool,
        strategy: StrategyKind,
        build_maps: bool,
    ) -> DocumentAdapter {
        self.register(build_strategy(foreign, strategy, thread_safe, build_maps), false)
    }

    fn register(&mut self, strategy: Box<dyn DocumentStrategy>, owned: bool) -> DocumentAdapter {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                u32::try_from(self.slots.len() - 1).unwrap_or(u32::MAX)
            }
        };
        let generation = self.slots.get(index as usize).map_or(0, |slot| slot.generation);
        let handle = DocumentHandle { liaison: self.id, epoch: self.epoch, index, generation };
        let core = Arc::new(AdapterCore::new(strategy, handle));
        let adapter = DocumentAdapter::new(&core);
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.entry = Some(DocumentEntry { core, owned });
        }
        trace!(?handle, owned, "document registered");
        adapter
    }

    fn entry(&self, handle: DocumentHandle) -> Option<&DocumentEntry> {
        if handle.liaison != self.id || handle.epoch != self.epoch {
            return None;
        }
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entries(&self) -> impl Iterator<Item = &DocumentEntry> {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }

    /// Unregister `adapter`'s document. Owned trees are released; a caller's tree
    /// only loses the liaison's reference. Returns `false` for unknown or stale
    /// adapters.
    pub fn destroy_document(&mut self, adapter: &DocumentAdapter) -> bool {
        let handle = adapter.handle();
        if self.entry(handle).is_none() {
            return false;
        }
        let Some(slot) = self.slots.get_mut(handle.index as usize) else { return false };
        let Some(entry) = slot.entry.take() else { return false };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        let foreign = entry.core.strategy().foreign();
        if entry.owned && Arc::strong_count(foreign) > 1 {
            let references = Arc::strong_count(foreign) - 1;
            warn!(?handle, references, "destroyed document is still referenced elsewhere");
        }
        debug!(?handle, owned = entry.owned, "document destroyed");
        true
    }

    /// Drop every registered document and unbind the execution context. Every
    /// handle issued so far goes stale.
    pub fn reset(&mut self) {
        let released = self.document_count();
        self.slots.clear();
        self.free.clear();
        self.epoch = self.epoch.wrapping_add(1);
        self.execution_context = None;
        self.state = LiaisonState::Idle;
        debug!(released, epoch = self.epoch, "liaison reset");
    }

    pub fn map_document(&self, handle: DocumentHandle) -> Option<DocumentAdapter> {
        self.entry(handle).map(|entry| DocumentAdapter::new(&entry.core))
    }

    /// The adapter registered for `foreign`, whichever strategy reads it.
    pub fn find_document(&self, foreign: &Arc<ForeignDocument>) -> Option<DocumentAdapter> {
        self.entries()
            .find(|entry| Arc::ptr_eq(entry.core.strategy().foreign(), foreign))
            .map(|entry| DocumentAdapter::new(&entry.core))
    }

    /// The bridge behind `handle`; `None` when a wrapper reads that document.
    pub fn map_to_bridge(&self, handle: DocumentHandle) -> Option<&BridgeDocument> {
        self.entry(handle)?.core.strategy().as_bridge()
    }

    /// The wrapper behind `handle`; `None` when a bridge reads that document.
    pub fn map_to_wrapper(&self, handle: DocumentHandle) -> Option<&WrapperDocument> {
        self.entry(handle)?.core.strategy().as_wrapper()
    }

    /// The bridge registered for `foreign`, found by scanning every entry.
    pub fn find_bridge(&self, foreign: &Arc<ForeignDocument>) -> Option<&BridgeDocument> {
        self.entries().find_map(|entry| {
            let bridge = entry.core.strategy().as_bridge()?;
            Arc::ptr_eq(bridge.foreign(), foreign).then_some(bridge)
        })
    }

    pub fn find_wrapper(&self, foreign: &Arc<ForeignDocument>) -> Option<&WrapperDocument> {
        self.entries().find_map(|entry| {
            let wrapper = entry.core.strategy().as_wrapper()?;
            Arc::ptr_eq(wrapper.foreign(), foreign).then_some(wrapper)
        })
    }

    /// The foreign tree behind a bridge-read document.
    pub fn map_bridge_foreign_document(&self, handle: DocumentHandle) -> Option<Arc<ForeignDocument>> {
        let bridge = self.entry(handle)?.core.strategy().as_bridge()?;
        Some(Arc::clone(bridge.foreign()))
    }

    /// The foreign tree behind a wrapper-read document.
    pub fn map_to_foreign_document(&self, handle: DocumentHandle) -> Option<Arc<ForeignDocument>> {
        let wrapper = self.entry(handle)?.core.strategy().as_wrapper()?;
        Some(Arc::clone(wrapper.foreign()))
    }

    /// Whether the liaison owns the tree behind `handle`.
    pub fn is_owned(&self, handle: DocumentHandle) -> Option<bool> {
        self.entry(handle).map(|entry| entry.owned)
    }

    pub fn execution_context(&self) -> Option<Arc<dyn ExecutionContext>> {
        self.execution_context.as_ref().map(Arc::clone)
    }

    pub fn set_execution_context(&mut self, context: Option<Arc<dyn ExecutionContext>>) {
        self.execution_context = context;
    }

    pub fn use_validation(&self) -> bool {
        self.options.use_validation()
    }

    pub fn set_use_validation(&mut self, validate: bool) {
        self.options.set_use_validation(validate);
    }

    pub fn include_ignorable_whitespace(&self) -> bool {
        self.options.include_ignorable_whitespace()
    }

    pub fn set_include_ignorable_whitespace(&mut self, include: bool) {
        self.options.set_include_ignorable_whitespace(include);
    }

    pub fn do_namespaces(&self) -> bool {
        self.options.do_namespaces()
    }

    pub fn set_do_namespaces(&mut self, enabled: bool) {
        self.options.set_do_namespaces(enabled);
    }

    pub fn exit_on_first_fatal_error(&self) -> bool {
        self.options.exit_on_first_fatal_error()
    }

    pub fn set_exit_on_first_fatal_error(&mut self, exit: bool) {
        self.options.set_exit_on_first_fatal_error(exit);
    }

    pub fn external_schema_location(&self) -> Option<&str> {
        self.options.external_schema_location()
    }

    /// `None` or an empty location clears the setting.
    pub fn set_external_schema_location(&mut self, location: Option<&str>) {
        self.options.set_external_schema_location(location);
    }

    pub fn external_no_namespace_schema_location(&self) -> Option<&str> {
        self.options.external_no_namespace_schema_location()
    }

    /// `None` or an empty location clears the setting.
    pub fn set_external_no_namespace_schema_location(&mut self, location: Option<&str>) {
        self.options.set_external_no_namespace_schema_location(location);
    }

    pub fn entity_resolver(&self) -> Option<Arc<dyn EntityResolver>> {
        self.options.entity_resolver()
    }

    pub fn set_entity_resolver(&mut self, resolver: Option<Arc<dyn EntityResolver>>) {
        self.options.set_entity_resolver(resolver);
    }

    pub fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.options.error_handler()
    }

    pub fn set_error_handler(&mut self, handler: Option<Arc<dyn ErrorHandler>>) {
        self.options.set_error_handler(handler);
    }

    pub fn thread_safe(&self) -> bool {
        self.options.thread_safe()
    }

    pub fn set_thread_safe(&mut self, thread_safe: bool) {
        self.options.set_thread_safe(thread_safe);
    }

    pub fn build_maps(&self) -> bool {
        self.options.build_maps()
    }

    pub fn set_build_maps(&mut self, build_maps: bool) {
        self.options.set_build_maps(build_maps);
    }

    pub fn strategy(&self) -> StrategyKind {
        self.options.strategy()
    }

    pub fn set_strategy(&mut self, strategy: StrategyKind) {
        self.options.set_strategy(strategy);
    }

    pub fn indent(&self) -> Option<u32> {
        self.options.indent()
    }

    pub fn set_indent(&mut self, indent: Option<u32>) {
        self.options.set_indent(indent);
    }
}

impl std::fmt::Debug for ParserLiaison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserLiaison")
            .field("id", &self.id)
            .field("parser", &self.parser.description())
            .field("options", &self.options)
            .field("epoch", &self.epoch)
            .field("documents", &self.document_count())
            .field("state", &self.state)
            .finish()
    }
}

fn build_strategy(
    foreign: Arc<ForeignDocument>,
    kind: StrategyKind,
    thread_safe: bool,
    build_maps: bool,
) -> Box<dyn DocumentStrategy> {
    match kind {
        StrategyKind::Bridge => Box::new(BridgeDocument::new(foreign)),
        StrategyKind::Wrapper => Box::new(WrapperDocument::new(foreign, thread_safe, build_maps)),
    }
}
