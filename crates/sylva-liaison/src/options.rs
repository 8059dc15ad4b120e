use std::sync::Arc;

use crate::adapter::StrategyKind;
use crate::handler::{EntityResolver, ErrorHandler};
use crate::parser::ParserConfig;

/// Settings for a [`ParserLiaison`](crate::ParserLiaison).
#[derive(Clone)]
pub struct LiaisonOptions {
    use_validation: bool,
    include_ignorable_whitespace: bool,
    do_namespaces: bool,
    exit_on_first_fatal_error: bool,
    external_schema_location: Option<String>,
    external_no_namespace_schema_location: Option<String>,
    entity_resolver: Option<Arc<dyn EntityResolver>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    thread_safe: bool,
    build_maps: bool,
    strategy: StrategyKind,
    indent: Option<u32>,
}

impl Default for LiaisonOptions {
    fn default() -> Self {
        Self {
            use_validation: false,
            include_ignorable_whitespace: true,
            do_namespaces: true,
            exit_on_first_fatal_error: true,
            external_schema_location: None,
            external_no_namespace_schema_location: None,
            entity_resolver: None,
            error_handler: None,
            thread_safe: false,
            build_maps: false,
            strategy: StrategyKind::Wrapper,
            indent: None,
        }
    }
}

fn non_empty(location: impl Into<String>) -> Option<String> {
    Some(location.into()).filter(|l| !l.is_empty())
}

impl LiaisonOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.use_validation = validate;
        self
    }

    pub fn use_validation(&self) -> bool {
        self.use_validation
    }

    pub fn with_ignorable_whitespace(mut self, include: bool) -> Self {
        self.include_ignorable_whitespace = include;
        self
    }

    pub fn include_ignorable_whitespace(&self) -> bool {
        self.include_ignorable_whitespace
    }

    pub fn with_namespaces(mut self, enabled: bool) -> Self {
        self.do_namespaces = enabled;
        self
    }

    pub fn do_namespaces(&self) -> bool {
        self.do_namespaces
    }

    pub fn with_exit_on_first_fatal_error(mut self, exit: bool) -> Self {
        self.exit_on_first_fatal_error = exit;
        self
    }

    pub fn exit_on_first_fatal_error(&self) -> bool {
        self.exit_on_first_fatal_error
    }

    /// An empty location clears the setting.
    pub fn with_external_schema_location(mut self, location: impl Into<String>) -> Self {
        self.external_schema_location = non_empty(location);
        self
    }

    pub fn external_schema_location(&self) -> Option<&str> {
        self.external_schema_location.as_deref()
    }

    /// An empty location clears the setting.
    pub fn with_external_no_namespace_schema_location(mut self, location: impl Into<String>) -> Self {
        self.external_no_namespace_schema_location = non_empty(location);
        self
    }

    pub fn external_no_namespace_schema_location(&self) -> Option<&str> {
        self.external_no_namespace_schema_location.as_deref()
    }

    pub fn with_entity_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.entity_resolver = Some(resolver);
        self
    }

    pub fn entity_resolver(&self) -> Option<Arc<dyn EntityResolver>> {
        self.entity_resolver.as_ref().map(Arc::clone)
    }

    /// Replaces the liaison's own diagnostic routing entirely.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref().map(Arc::clone)
    }

    pub fn with_thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    pub fn thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub fn with_build_maps(mut self, build_maps: bool) -> Self {
        self.build_maps = build_maps;
        self
    }

    pub fn build_maps(&self) -> bool {
        self.build_maps
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Indentation hint for serializers working on liaison documents; `None` leaves
    /// output unindented.
    pub fn with_indent(mut self, indent: Option<u32>) -> Self {
        self.indent = indent;
        self
    }

    pub fn indent(&self) -> Option<u32> {
        self.indent
    }

    pub(crate) fn set_use_validation(&mut self, validate: bool) {
        self.use_validation = validate;
    }

    pub(crate) fn set_include_ignorable_whitespace(&mut self, include: bool) {
        self.include_ignorable_whitespace = include;
    }

    pub(crate) fn set_do_namespaces(&mut self, enabled: bool) {
        self.do_namespaces = enabled;
    }

    pub(crate) fn set_exit_on_first_fatal_error(&mut self, exit: bool) {
        self.exit_on_first_fatal_error = exit;
    }

    pub(crate) fn set_external_schema_location(&mut self, location: Option<&str>) {
        self.external_schema_location = location.and_then(non_empty);
    }

    pub(crate) fn set_external_no_namespace_schema_location(&mut self, location: Option<&str>) {
        self.external_no_namespace_schema_location = location.and_then(non_empty);
    }

    pub(crate) fn set_entity_resolver(&mut self, resolver: Option<Arc<dyn EntityResolver>>) {
        self.entity_resolver = resolver;
    }

    pub(crate) fn set_error_handler(&mut self, handler: Option<Arc<dyn ErrorHandler>>) {
        self.error_handler = handler;
    }

    pub(crate) fn set_thread_safe(&mut self, thread_safe: bool) {
        self.thread_safe = thread_safe;
    }

    pub(crate) fn set_build_maps(&mut self, build_maps: bool) {
        self.build_maps = build_maps;
    }

    pub(crate) fn set_strategy(&mut self, strategy: StrategyKind) {
        self.strategy = strategy;
    }

    pub(crate) fn set_indent(&mut self, indent: Option<u32>) {
        self.indent = indent;
    }

    /// Parser settings for a DOM parse.
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            validate: self.use_validation,
            do_namespaces: self.do_namespaces,
            include_ignorable_whitespace: self.include_ignorable_whitespace,
            exit_on_first_fatal_error: self.exit_on_first_fatal_error,
            external_schema_location: self.external_schema_location.clone(),
            external_no_namespace_schema_location: self.external_no_namespace_schema_location.clone(),
            entity_resolver: self.entity_resolver(),
        }
    }
}

impl std::fmt::Debug for LiaisonOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiaisonOptions")
            .field("use_validation", &self.use_validation)
            .field("include_ignorable_whitespace", &self.include_ignorable_whitespace)
            .field("do_namespaces", &self.do_namespaces)
            .field("exit_on_first_fatal_error", &self.exit_on_first_fatal_error)
            .field("external_schema_location", &self.external_schema_location)
            .field("external_no_namespace_schema_location", &self.external_no_namespace_schema_location)
            .field("entity_resolver", &self.entity_resolver.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("thread_safe", &self.thread_safe)
            .field("build_maps", &self.build_maps)
            .field("strategy", &self.strategy)
            .field("indent", &self.indent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults() {
        let options = LiaisonOptions::default();
        assert!(!options.use_validation());
        assert!(options.include_ignorable_whitespace());
        assert!(options.do_namespaces());
        assert!(options.exit_on_first_fatal_error());
        assert!(!options.thread_safe());
        assert!(!options.build_maps());
        assert_eq!(options.strategy(), StrategyKind::Wrapper);
        assert_eq!(options.indent(), None);
        assert!(options.error_handler().is_none());
    }

    #[rstest]
    #[case("", None)]
    #[case("urn:a a.xsd", Some("urn:a a.xsd"))]
    fn empty_schema_location_means_unset(#[case] location: &str, #[case] expected: Option<&str>) {
        let options = LiaisonOptions::new()
            .with_external_schema_location(location)
            .with_external_no_namespace_schema_location(location);
        assert_eq!(options.external_schema_location(), expected);
        assert_eq!(options.external_no_namespace_schema_location(), expected);
        assert_eq!(options.parser_config().has_schema_location(), expected.is_some());
    }

    #[rstest]
    fn parser_config_mirrors_options() {
        let config = LiaisonOptions::new().with_validation(true).with_namespaces(false).parser_config();
        assert!(config.validate);
        assert!(!config.do_namespaces);
        assert!(config.include_ignorable_whitespace);
    }
}
