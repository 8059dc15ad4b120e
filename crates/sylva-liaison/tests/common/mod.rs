#![allow(dead_code)]

use std::sync::Arc;

use sylva_liaison::{CollectingSink, LiaisonOptions, ParserLiaison};
use tracing_subscriber::EnvFilter;

/// Surface library logs in test output; `RUST_LOG=sylva_liaison=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

pub fn liaison_with(options: LiaisonOptions) -> (ParserLiaison, Arc<CollectingSink>) {
    init_tracing();
    let sink = Arc::new(CollectingSink::new());
    let liaison = ParserLiaison::with_options(options).with_sink(sink.clone());
    (liaison, sink)
}

pub const CATALOG: &str = r#"<?xml version="1.0"?>
<catalog xmlns:x="urn:extra">
  <book id="b1" x:lang="en"><title>First</title></book>
  <book id="b2"><title>Second</title><!-- note --></book>
  <?render fast?>
</catalog>"#;
