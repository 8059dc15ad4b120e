use rstest::{fixture, rstest};
use sylva_xpath::fragment::{elem, text};
use sylva_xpath::{
    ErrorCode, FragmentNode, MutableNodeList, NodeList, OwnershipGuard, ResultTreeFragment, ValueKind, ValuePool,
    XdmNode,
};

type Pool = ValuePool<FragmentNode>;

#[fixture]
fn pool() -> Pool {
    ValuePool::new()
}

fn items() -> FragmentNode {
    elem("items")
        .child(elem("item").child(text("3")))
        .child(elem("item").child(text("4")))
        .child(elem("item").child(text("5")))
        .build()
}

#[rstest]
fn every_creator_reports_its_kind(pool: Pool) {
    let root = items();
    let kids = root.children_vec();
    let handles = [
        (pool.create_boolean(true, false), ValueKind::Boolean),
        (pool.create_number(1.0), ValueKind::Number),
        (pool.create_string("s"), ValueKind::String),
        (pool.create_node_set(kids.clone()), ValueKind::NodeSet),
        (pool.create_node_set_from_node(root.clone()), ValueKind::NodeSet),
        (pool.create_span(kids.clone()), ValueKind::Span),
        (pool.create_span_from_node(root.clone()), ValueKind::Span),
        (pool.create_result_tree_fragment(ResultTreeFragment::new(vec![root.clone()])), ValueKind::ResultTreeFragment),
        (pool.create_unknown("ext:thing"), ValueKind::Unknown),
        (pool.create_null(false), ValueKind::Null),
    ];
    for (handle, kind) in handles {
        assert_eq!(pool.get(handle).unwrap().kind(), kind);
    }
    assert_eq!(pool.live_count(), 10);
}

#[rstest]
fn node_set_inputs_normalize_to_same_payload(pool: Pool) {
    let root = items();
    let kids = root.children_vec();
    let mut building = MutableNodeList::new();
    for k in kids.iter().rev() {
        building.insert_in_document_order(k.clone()).unwrap();
    }
    let from_mutable = pool.create_node_set(building);
    let from_list = pool.create_node_set(NodeList::from(kids.clone()));
    let from_vec = pool.create_node_set(kids);
    let a = pool.get(from_mutable).unwrap();
    assert_eq!(*a, *pool.get(from_list).unwrap());
    assert_eq!(*a, *pool.get(from_vec).unwrap());
    assert_eq!(a.as_str(), "3");
}

#[rstest]
fn optimized_booleans_are_shared(pool: Pool) {
    let a = pool.create_boolean(true, true);
    let b = pool.create_boolean(true, true);
    assert_eq!(a, b);
    assert!(std::rc::Rc::ptr_eq(&pool.get(a).unwrap(), &pool.get(b).unwrap()));
    let plain = pool.create_boolean(true, false);
    assert_ne!(plain, a);
    assert!(pool.get(plain).unwrap().to_boolean());
    assert_eq!(pool.stats().shared_hits, 2);
}

#[rstest]
fn singletons_survive_reset(pool: Pool) {
    let t = pool.create_boolean(true, true);
    let n = pool.create_null(true);
    pool.reset();
    assert!(pool.get(t).unwrap().to_boolean());
    assert_eq!(pool.get(n).unwrap().kind(), ValueKind::Null);
    assert!(pool.return_object(t));
}

#[rstest]
fn reset_invalidates_outstanding_handles(pool: Pool) {
    let handles: Vec<_> = (0..5).map(|i| pool.create_number(f64::from(i))).collect();
    pool.reset();
    assert_eq!(pool.live_count(), 0);
    for h in handles {
        assert_eq!(pool.get(h).unwrap_err().code(), ErrorCode::UseAfterInvalidation);
        assert!(!pool.return_object(h));
    }
    // The slot index reused by the next value must not resurrect the old handle.
    let fresh = pool.create_number(9.0);
    assert_eq!(pool.get(fresh).unwrap().to_number(), 9.0);
}

#[rstest]
fn double_return_is_rejected(pool: Pool) {
    let h = pool.create_string("once");
    assert!(pool.return_object(h));
    assert!(!pool.return_object(h));
    let stats = pool.stats();
    assert_eq!(stats.returned, 1);
    assert_eq!(stats.rejected_returns, 1);
}

#[rstest]
fn handles_are_bound_to_their_pool(pool: Pool) {
    let other = Pool::new();
    let h = other.create_string("elsewhere");
    assert_ne!(pool.id(), other.id());
    assert_eq!(pool.get(h).unwrap_err().code(), ErrorCode::ForeignValue);
    assert!(!pool.return_object(h));
    assert!(other.contains(h));
}

#[rstest]
fn clone_value_copies_across_pools(pool: Pool) {
    let other = Pool::new();
    let source = other.create_string("copied");
    let copy = pool.clone_value(&other.get(source).unwrap());
    other.reset();
    assert_eq!(pool.get(copy).unwrap().as_str(), "copied");
}

#[rstest]
fn reference_counts_track_use(pool: Pool) {
    let h = pool.create_number(2.0);
    assert_eq!(pool.referenced(h).unwrap(), 1);
    assert_eq!(pool.referenced(h).unwrap(), 2);
    assert_eq!(pool.dereferenced(h).unwrap(), 1);
    assert_eq!(pool.dereferenced(h).unwrap(), 0);
    assert_eq!(pool.dereferenced(h).unwrap_err().code(), ErrorCode::RefCountUnderflow);
}

#[rstest]
fn guards_return_exactly_once(pool: Pool) {
    let mut guards: Vec<OwnershipGuard<'_, FragmentNode>> =
        (0..4).map(|i| pool.guard(pool.create_number(f64::from(i)))).collect();
    let moved = guards[0].transfer();
    assert_eq!(pool.live_count(), 4);
    drop(guards);
    assert_eq!(pool.live_count(), 1);
    assert!(moved.value().unwrap().to_number() == 0.0);
    drop(moved);
    assert_eq!(pool.live_count(), 0);
    let stats = pool.stats();
    assert_eq!(stats.returned, 4);
    assert_eq!(stats.rejected_returns, 0);
}
