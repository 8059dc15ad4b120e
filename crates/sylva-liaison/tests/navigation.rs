mod common;

use rstest::rstest;
use sylva_liaison::{AdapterNode, InputSource, LiaisonOptions, StrategyKind};
use sylva_xpath::{NodeKind, XdmNode};

use common::{CATALOG, liaison_with};

/// Pre-order walk in document order: node, attributes, namespaces, children.
fn walk(node: &AdapterNode, out: &mut Vec<AdapterNode>) {
    out.push(node.clone());
    out.extend(node.attributes());
    out.extend(node.namespaces());
    for child in node.children() {
        walk(&child, out);
    }
}

fn describe(node: &AdapterNode) -> String {
    let name = node.name().map(|q| format!("{}{{{}}}", q, q.ns_uri.clone().unwrap_or_default())).unwrap_or_default();
    format!("{:?} {} {:?}", node.kind(), name, node.string_value())
}

fn parse(options: LiaisonOptions, text: &str) -> (sylva_liaison::ParserLiaison, sylva_liaison::DocumentAdapter) {
    let (mut liaison, _sink) = liaison_with(options);
    let doc = liaison.parse_document(&InputSource::from_text(text)).unwrap();
    (liaison, doc)
}

#[rstest]
fn bridge_and_wrapper_navigate_identically() {
    let (_bridge_liaison, bridge) = parse(LiaisonOptions::new().with_strategy(StrategyKind::Bridge), CATALOG);
    let (_wrapper_liaison, wrapper) = parse(LiaisonOptions::new(), CATALOG);

    let mut from_bridge = Vec::new();
    walk(&bridge.root().unwrap(), &mut from_bridge);
    let mut from_wrapper = Vec::new();
    walk(&wrapper.root().unwrap(), &mut from_wrapper);

    let left: Vec<String> = from_bridge.iter().map(describe).collect();
    let right: Vec<String> = from_wrapper.iter().map(describe).collect();
    assert_eq!(left, right);
    for (b, w) in from_bridge.iter().zip(&from_wrapper) {
        assert_eq!(b.parent().map(|p| describe(&p)), w.parent().map(|p| describe(&p)));
    }
}

#[rstest]
#[case(StrategyKind::Bridge)]
#[case(StrategyKind::Wrapper)]
fn order_keys_follow_document_order(#[case] strategy: StrategyKind) {
    let (_liaison, doc) = parse(LiaisonOptions::new().with_strategy(strategy), CATALOG);
    let mut nodes = Vec::new();
    walk(&doc.root().unwrap(), &mut nodes);
    let keys: Vec<u64> = nodes.iter().map(|n| n.doc_order_key().unwrap()).collect();
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]), "{keys:?}");

    let first = &nodes[1];
    let last = nodes.last().unwrap();
    assert_eq!(first.compare_document_order(last).unwrap(), std::cmp::Ordering::Less);
}

#[rstest]
fn documents_are_ordered_by_registration() {
    let (mut liaison, _sink) = liaison_with(LiaisonOptions::new());
    let first = liaison.parse_document(&InputSource::from_text("<a><deep/></a>")).unwrap();
    let second = liaison.parse_document(&InputSource::from_text("<b/>")).unwrap();
    let deep = first.document_element().unwrap().unwrap().first_child().unwrap();
    let other = second.root().unwrap();
    assert!(deep.doc_order_key() < other.doc_order_key());
}

#[rstest]
#[case(StrategyKind::Bridge)]
#[case(StrategyKind::Wrapper)]
fn element_by_id(#[case] strategy: StrategyKind) {
    let (_liaison, doc) = parse(LiaisonOptions::new().with_strategy(strategy), CATALOG);
    let book = doc.element_by_id("b2").unwrap().expect("id b2");
    assert_eq!(book.name().unwrap().local, "book");
    assert_eq!(book.first_child().unwrap().string_value(), "Second");
    assert!(doc.element_by_id("nope").unwrap().is_none());
}

#[rstest]
fn namespace_declarations_become_namespace_nodes() {
    let (_liaison, doc) = parse(LiaisonOptions::new(), CATALOG);
    let catalog = doc.document_element().unwrap().unwrap();
    assert_eq!(catalog.attributes().count(), 0);
    let ns: Vec<_> = catalog.namespaces().collect();
    assert_eq!(ns.len(), 1);
    assert_eq!(ns[0].kind(), NodeKind::Namespace);
    assert_eq!(ns[0].name().unwrap().local, "x");
    assert_eq!(ns[0].string_value(), "urn:extra");

    let book = doc.element_by_id("b1").unwrap().unwrap();
    let lang = book.attribute_ns("lang", Some("urn:extra")).expect("qualified attribute");
    assert_eq!(lang.string_value(), "en");
    assert_eq!(lang.parent(), Some(book.clone()));
    assert!(book.attribute_ns("lang", None).is_none());
}

#[rstest]
fn without_namespace_processing_declarations_stay_attributes() {
    let (_liaison, doc) = parse(LiaisonOptions::new().with_namespaces(false), CATALOG);
    let catalog = doc.document_element().unwrap().unwrap();
    assert_eq!(catalog.namespaces().count(), 0);
    assert!(catalog.attribute_ns("xmlns:x", None).is_some());
}

#[rstest]
#[case(true, 7)]
#[case(false, 3)]
fn ignorable_whitespace(#[case] include: bool, #[case] children: usize) {
    let (_liaison, doc) = parse(LiaisonOptions::new().with_ignorable_whitespace(include), CATALOG);
    let catalog = doc.document_element().unwrap().unwrap();
    assert_eq!(catalog.children().count(), children);
    let kinds: Vec<NodeKind> = catalog.children().map(|c| c.kind()).filter(|k| *k != NodeKind::Text).collect();
    assert_eq!(kinds, vec![NodeKind::Element, NodeKind::Element, NodeKind::ProcessingInstruction]);
}

#[rstest]
fn siblings_and_leaf_kinds() {
    let (_liaison, doc) = parse(LiaisonOptions::new().with_ignorable_whitespace(false), CATALOG);
    let catalog = doc.document_element().unwrap().unwrap();
    let b1 = catalog.first_child().unwrap();
    let b2 = b1.next_sibling().unwrap();
    assert_eq!(b2.previous_sibling(), Some(b1.clone()));
    let comment = b2.last_child().unwrap();
    assert_eq!(comment.kind(), NodeKind::Comment);
    assert_eq!(comment.string_value(), " note ");
    let pi = catalog.last_child().unwrap();
    assert_eq!(pi.name().unwrap().local, "render");
    assert_eq!(pi.string_value(), "fast");
    assert!(pi.next_sibling().is_none());
    assert_eq!(catalog.parent(), doc.root().ok());
}

#[rstest]
fn cdata_reads_as_text() {
    let (_liaison, doc) = parse(LiaisonOptions::new(), "<a>x<![CDATA[<y>]]></a>");
    let a = doc.document_element().unwrap().unwrap();
    assert_eq!(a.string_value(), "x<y>");
    assert!(a.children().all(|c| c.kind() == NodeKind::Text));
}

#[rstest]
fn base_uri_is_the_system_id() {
    let (mut liaison, _sink) = liaison_with(LiaisonOptions::new());
    let doc = liaison.parse_document(&InputSource::from_text("<a/>").with_system_id("file:///in.xml")).unwrap();
    assert_eq!(doc.root().unwrap().base_uri().as_deref(), Some("file:///in.xml"));
}

#[rstest]
fn nodes_are_shared_across_reader_threads() {
    let (_liaison, doc) = parse(LiaisonOptions::new().with_thread_safe(true), CATALOG);
    let root = doc.root().unwrap();
    let expected = root.string_value();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                scope.spawn(move || {
                    let mut nodes = Vec::new();
                    walk(&root, &mut nodes);
                    (root.string_value(), nodes.len())
                })
            })
            .collect();
        for handle in handles {
            let (value, _) = handle.join().unwrap();
            assert_eq!(value, expected);
        }
    });
}
