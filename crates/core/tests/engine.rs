//! Engine coverage beyond the headline scenarios: collections and their
//! indexes, counters, delete actions, copies, detached staging, migration
//! policies and error surfaces.

use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;
use stratadb::{
    CompositeIndexDecl, Database, DeleteAction, ElementDecl, Error, Exclude, FieldDecl, FieldKind,
    FieldValue, IndexExtra, MemKv, ObjectError, ObjectTypeDecl, RefSpec, TypeId, UpgradePolicy,
    ValueEncoding,
};

fn open(decls: Vec<ObjectTypeDecl>) -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::open(Arc::new(MemKv::new()), decls).unwrap()
}

fn library_decls() -> Vec<ObjectTypeDecl> {
    vec![
        ObjectTypeDecl::new("Book", 1)
            .with_field(FieldDecl::simple("title", 10, ValueEncoding::String).indexed())
            .with_field(FieldDecl::counter("checkouts", 11))
            .with_field(FieldDecl::new(
                "tags",
                12,
                FieldKind::Set(ElementDecl::simple(13, ValueEncoding::String).indexed()),
            ))
            .with_field(FieldDecl::new(
                "chapters",
                14,
                FieldKind::List(ElementDecl::simple(15, ValueEncoding::String).indexed()),
            ))
            .with_field(FieldDecl::new(
                "ratings",
                16,
                FieldKind::Map {
                    key: ElementDecl::simple(17, ValueEncoding::String),
                    value: ElementDecl::simple(18, ValueEncoding::I64).indexed(),
                },
            )),
        ObjectTypeDecl::new("Shelf", 2).with_field(FieldDecl::reference(
            "featured",
            20,
            RefSpec::to_type(TypeId(1)).with_on_delete(DeleteAction::Nullify),
        )),
    ]
}

#[test]
fn set_semantics_and_element_index() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();

    assert!(tx.set_insert(book, "tags", "rust".into()).unwrap());
    assert!(!tx.set_insert(book, "tags", "rust".into()).unwrap());
    assert!(tx.set_insert(book, "tags", "databases".into()).unwrap());
    assert!(tx.set_contains(book, "tags", &"rust".into()).unwrap());
    assert_eq!(
        tx.set_iter(book, "tags").unwrap(),
        vec![FieldValue::from("databases"), FieldValue::from("rust")]
    );

    let by_tag = tx
        .query_element_index(Some("Book"), "tags", &ValueEncoding::String)
        .unwrap()
        .collect_map()
        .unwrap();
    assert_eq!(
        by_tag.get(&FieldValue::from("rust")),
        Some(&BTreeSet::from([book]))
    );

    assert!(tx.set_remove(book, "tags", &"rust".into()).unwrap());
    assert!(!tx.set_remove(book, "tags", &"rust".into()).unwrap());
    let by_tag = tx
        .query_element_index(Some("Book"), "tags", &ValueEncoding::String)
        .unwrap()
        .collect_map()
        .unwrap();
    assert!(by_tag.get(&FieldValue::from("rust")).is_none());
}

#[test]
fn list_semantics_and_position_index() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();

    tx.list_push(book, "chapters", "intro".into()).unwrap();
    tx.list_push(book, "chapters", "body".into()).unwrap();
    tx.list_insert(book, "chapters", 1, "preface".into()).unwrap();
    assert_eq!(
        tx.list_get(book, "chapters").unwrap(),
        vec![
            FieldValue::from("intro"),
            FieldValue::from("preface"),
            FieldValue::from("body"),
        ]
    );

    // The element index yields (value, id, position), in that order.
    let entries = tx
        .query_element_index(Some("Book"), "chapters", &ValueEncoding::String)
        .unwrap()
        .entries()
        .unwrap();
    let positions: Vec<(FieldValue, IndexExtra)> = entries
        .into_iter()
        .map(|entry| (entry.value, entry.extra))
        .collect();
    assert_eq!(
        positions,
        vec![
            (FieldValue::from("body"), IndexExtra::ListIndex(2)),
            (FieldValue::from("intro"), IndexExtra::ListIndex(0)),
            (FieldValue::from("preface"), IndexExtra::ListIndex(1)),
        ]
    );

    let removed = tx.list_remove(book, "chapters", 0).unwrap();
    assert_eq!(removed, FieldValue::from("intro"));
    assert_eq!(tx.list_len(book, "chapters").unwrap(), 2);
    assert_eq!(
        tx.list_at(book, "chapters", 0).unwrap(),
        FieldValue::from("preface")
    );
    assert!(matches!(
        tx.list_at(book, "chapters", 9),
        Err(Error::Object(ObjectError::ListIndex { .. }))
    ));
}

#[test]
fn map_semantics_and_value_index() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();

    assert_eq!(
        tx.map_insert(book, "ratings", "amy".into(), FieldValue::I64(4))
            .unwrap(),
        None
    );
    assert_eq!(
        tx.map_insert(book, "ratings", "amy".into(), FieldValue::I64(5))
            .unwrap(),
        Some(FieldValue::I64(4))
    );
    tx.map_insert(book, "ratings", "bob".into(), FieldValue::I64(5))
        .unwrap();

    // The value index carries the map key as its extra component.
    let entries = tx
        .query_map_value_index(Some("Book"), "ratings", &ValueEncoding::I64)
        .unwrap()
        .entries()
        .unwrap();
    let keys: Vec<(FieldValue, IndexExtra)> = entries
        .into_iter()
        .map(|entry| (entry.value, entry.extra))
        .collect();
    assert_eq!(
        keys,
        vec![
            (FieldValue::I64(5), IndexExtra::MapKey("amy".into())),
            (FieldValue::I64(5), IndexExtra::MapKey("bob".into())),
        ]
    );

    assert_eq!(
        tx.map_remove(book, "ratings", &"amy".into()).unwrap(),
        Some(FieldValue::I64(5))
    );
    assert_eq!(tx.map_len(book, "ratings").unwrap(), 1);
}

#[test]
fn counters_bypass_indexes_and_listeners() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();

    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let sink = Arc::clone(&fired);
    tx.add_change_listener("Book", "", stratadb::ChangeKind::Simple, move |_| {
        sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(tx.counter_get(book, "checkouts").unwrap(), 0);
    assert_eq!(tx.counter_adjust(book, "checkouts", 3).unwrap(), 3);
    assert_eq!(tx.counter_adjust(book, "checkouts", -1).unwrap(), 2);
    tx.counter_set(book, "checkouts", 10).unwrap();
    assert_eq!(tx.counter_get(book, "checkouts").unwrap(), 10);
    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn value_bounds_restrict_index_views() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    for title in ["alpha", "beta", "gamma", "delta"] {
        let book = tx.create("Book").unwrap();
        tx.write_field(book, "title", title.into()).unwrap();
    }

    let bounded = tx
        .query_index(Some("Book"), "title", &ValueEncoding::String)
        .unwrap()
        .with_value_bounds(
            Bound::Included(&"beta".into()),
            Bound::Excluded(&"gamma".into()),
        )
        .unwrap()
        .collect_map()
        .unwrap();
    let titles: Vec<&FieldValue> = bounded.keys().collect();
    assert_eq!(
        titles,
        vec![&FieldValue::from("beta"), &FieldValue::from("delta")]
    );
}

#[test]
fn delete_actions_nullify_and_exception() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();
    let shelf = tx.create("Shelf").unwrap();
    tx.write_field(shelf, "featured", FieldValue::Ref(book))
        .unwrap();

    // Nullify clears the inbound reference.
    assert!(tx.delete(book).unwrap());
    assert_eq!(tx.read_field(shelf, "featured").unwrap(), FieldValue::Null);

    // Exception refuses the deletion outright.
    let decls = vec![
        ObjectTypeDecl::new("Target", 1),
        ObjectTypeDecl::new("Holder", 2).with_field(FieldDecl::reference(
            "held",
            10,
            RefSpec::to_type(TypeId(1)).with_on_delete(DeleteAction::Exception),
        )),
    ];
    let db = open(decls);
    let mut tx = db.begin().unwrap();
    let target = tx.create("Target").unwrap();
    let holder = tx.create("Holder").unwrap();
    tx.write_field(holder, "held", FieldValue::Ref(target))
        .unwrap();
    assert!(matches!(
        tx.delete(target),
        Err(Error::Object(ObjectError::Referenced { .. }))
    ));
    assert!(tx.exists(target).unwrap());
    // Dropping the reference unblocks it.
    tx.write_field(holder, "held", FieldValue::Null).unwrap();
    assert!(tx.delete(target).unwrap());
}

#[test]
fn delete_action_remove_drops_collection_entries() {
    let decls = vec![
        ObjectTypeDecl::new("Target", 1),
        ObjectTypeDecl::new("Holder", 2).with_field(FieldDecl::new(
            "members",
            10,
            FieldKind::Set(ElementDecl::reference(
                11,
                RefSpec::to_type(TypeId(1)).with_on_delete(DeleteAction::Remove),
            )),
        )),
    ];
    let db = open(decls);
    let mut tx = db.begin().unwrap();
    let t1 = tx.create("Target").unwrap();
    let t2 = tx.create("Target").unwrap();
    let holder = tx.create("Holder").unwrap();
    tx.set_insert(holder, "members", FieldValue::Ref(t1)).unwrap();
    tx.set_insert(holder, "members", FieldValue::Ref(t2)).unwrap();

    assert!(tx.delete(t1).unwrap());
    assert_eq!(
        tx.set_iter(holder, "members").unwrap(),
        vec![FieldValue::Ref(t2)]
    );
}

#[test]
fn forward_delete_takes_referent_along() {
    let decls = vec![
        ObjectTypeDecl::new("Doc", 1).with_field(FieldDecl::reference(
            "attachment",
            10,
            RefSpec::to_type(TypeId(2))
                .with_on_delete(DeleteAction::Nullify)
                .with_forward_delete(),
        )),
        ObjectTypeDecl::new("Blob", 2),
    ];
    let db = open(decls);
    let mut tx = db.begin().unwrap();
    let doc = tx.create("Doc").unwrap();
    let blob = tx.create("Blob").unwrap();
    tx.write_field(doc, "attachment", FieldValue::Ref(blob))
        .unwrap();

    assert!(tx.delete(doc).unwrap());
    assert!(!tx.exists(blob).unwrap());
}

#[test]
fn reference_checks_run_before_the_write() {
    let decls = vec![
        ObjectTypeDecl::new("A", 1),
        ObjectTypeDecl::new("B", 2),
        ObjectTypeDecl::new("Holder", 3).with_field(FieldDecl::reference(
            "only_a",
            10,
            RefSpec::to_type(TypeId(1)).with_on_delete(DeleteAction::Nullify),
        )),
    ];
    let db = open(decls);
    let mut tx = db.begin().unwrap();
    let b = tx.create("B").unwrap();
    let holder = tx.create("Holder").unwrap();

    assert!(matches!(
        tx.write_field(holder, "only_a", FieldValue::Ref(b)),
        Err(Error::Object(ObjectError::IncompatibleReference { .. }))
    ));

    let a = tx.create("A").unwrap();
    tx.write_field(holder, "only_a", FieldValue::Ref(a)).unwrap();
    tx.write_field(holder, "only_a", FieldValue::Null).unwrap();
    tx.delete(a).unwrap();
    // A dangling assignment is rejected up front.
    assert!(matches!(
        tx.write_field(holder, "only_a", FieldValue::Ref(a)),
        Err(Error::Object(ObjectError::Deleted(_)))
    ));
}

#[test]
fn delete_is_idempotent_and_recreate_restores() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();
    assert!(tx.delete(book).unwrap());
    assert!(!tx.delete(book).unwrap());
    assert!(tx.recreate(book).unwrap());
    assert!(!tx.recreate(book).unwrap());
    assert!(tx.delete(book).unwrap());
    assert!(!tx.delete(book).unwrap());
}

#[test]
fn composite_index_and_tuple_exclusions() {
    let decls = vec![ObjectTypeDecl::new("Point", 1)
        .with_field(FieldDecl::simple("x", 10, ValueEncoding::I32))
        .with_field(FieldDecl::simple("y", 11, ValueEncoding::I32))
        .with_composite(
            CompositeIndexDecl::new("xy", 20, [10, 11])
                .unique()
                .with_exclude_tuple(vec![
                    Exclude::Value(FieldValue::I32(0)),
                    Exclude::Value(FieldValue::I32(0)),
                ]),
        )];
    let db = open(decls);
    let mut tx = db.begin().unwrap();

    // Two objects at the excluded origin tuple validate.
    for _ in 0..2 {
        tx.create("Point").unwrap();
    }
    tx.validate().unwrap();

    let p1 = tx.create("Point").unwrap();
    let p2 = tx.create("Point").unwrap();
    for id in [p1, p2] {
        tx.write_field(id, "x", FieldValue::I32(3)).unwrap();
        tx.write_field(id, "y", FieldValue::I32(4)).unwrap();
    }
    assert!(matches!(tx.validate(), Err(Error::Validation(_))));
    tx.write_field(p2, "y", FieldValue::I32(5)).unwrap();
    tx.validate().unwrap();

    let by_tuple = tx
        .query_composite(
            Some("Point"),
            "xy",
            &[ValueEncoding::I32, ValueEncoding::I32],
        )
        .unwrap()
        .collect_map()
        .unwrap();
    assert_eq!(
        by_tuple.get(&vec![FieldValue::I32(3), FieldValue::I32(4)]),
        Some(&BTreeSet::from([p1]))
    );
}

#[test]
fn incomparable_value_types_are_rejected() {
    let db = open(library_decls());
    let tx = db.begin().unwrap();
    assert!(matches!(
        tx.query_index(Some("Book"), "title", &ValueEncoding::I32),
        Err(Error::Index(stratadb::IndexError::IncomparableValueType { .. }))
    ));
}

#[test]
fn copy_cascade_with_identity_remap() {
    let decls = vec![ObjectTypeDecl::new("Node", 1)
        .with_field(FieldDecl::simple("label", 10, ValueEncoding::String).indexed())
        .with_field(FieldDecl::reference(
            "next",
            11,
            RefSpec::to_type(TypeId(1))
                .with_on_delete(DeleteAction::Nullify)
                .with_forward_cascade("chain"),
        ))];
    let db = open(decls.clone());
    let db2 = open(decls);

    let mut src = db.begin().unwrap();
    let n1 = src.create("Node").unwrap();
    let n2 = src.create("Node").unwrap();
    let n3 = src.create("Node").unwrap();
    src.write_field(n1, "label", "one".into()).unwrap();
    src.write_field(n2, "label", "two".into()).unwrap();
    src.write_field(n3, "label", "three".into()).unwrap();
    src.write_field(n1, "next", FieldValue::Ref(n2)).unwrap();
    src.write_field(n2, "next", FieldValue::Ref(n3)).unwrap();

    let mut dest = db2.begin().unwrap();

    // Depth 1 copies the root and its immediate cascade referent only.
    src.copy_to(&mut dest, n1, 1, &["chain"], &BTreeMap::new())
        .unwrap();
    assert!(dest.exists(n1).unwrap());
    assert!(dest.exists(n2).unwrap());
    assert!(!dest.exists(n3).unwrap());

    // Unbounded depth with identity remapping of the root.
    let mut dest2 = db2.begin().unwrap();
    let fresh = src.create("Node").unwrap();
    src.delete(fresh).unwrap();
    let id_map = BTreeMap::from([(n1, fresh)]);
    let new_root = src.copy_to(&mut dest2, n1, -1, &["chain"], &id_map).unwrap();
    assert_eq!(new_root, fresh);
    assert!(dest2.exists(fresh).unwrap());
    assert!(!dest2.exists(n1).unwrap());
    assert_eq!(
        dest2.read_field(fresh, "next").unwrap(),
        FieldValue::Ref(n2)
    );
    assert_eq!(
        dest2.read_field(fresh, "label").unwrap(),
        FieldValue::from("one")
    );

    // Cascades not named are not followed.
    let mut dest3 = db2.begin().unwrap();
    src.copy_to(&mut dest3, n1, -1, &["other"], &BTreeMap::new())
        .unwrap();
    assert!(dest3.exists(n1).unwrap());
    assert!(!dest3.exists(n2).unwrap());
}

#[test]
fn detached_transaction_stages_subgraphs() {
    let decls = vec![ObjectTypeDecl::new("Node", 1)
        .with_field(FieldDecl::simple("label", 10, ValueEncoding::String))
        .with_field(FieldDecl::reference(
            "next",
            11,
            RefSpec::to_type(TypeId(1))
                .with_on_delete(DeleteAction::Nullify)
                .with_forward_cascade("chain"),
        ))];
    let db = open(decls);
    let mut tx = db.begin().unwrap();
    let n1 = tx.create("Node").unwrap();
    let n2 = tx.create("Node").unwrap();
    tx.write_field(n1, "label", "root".into()).unwrap();
    tx.write_field(n1, "next", FieldValue::Ref(n2)).unwrap();

    let mut detached = tx.detach();
    detached
        .copy_in(&mut tx, n1, -1, &["chain"], &BTreeMap::new())
        .unwrap();
    assert!(detached.exists(n1).unwrap());
    assert!(detached.exists(n2).unwrap());

    // Mutate the staged copy, then copy it back out.
    detached
        .write_field(n1, "label", "staged".into())
        .unwrap();
    detached
        .copy_out(&mut tx, n1, 0, &[], &BTreeMap::new())
        .unwrap();
    assert_eq!(
        tx.read_field(n1, "label").unwrap(),
        FieldValue::from("staged")
    );
}

#[test]
fn migration_policies_reset_and_require() {
    let old = || {
        vec![ObjectTypeDecl::new("Rec", 1)
            .with_field(FieldDecl::simple("v", 10, ValueEncoding::String))]
    };

    // RESET discards the stored value.
    let store = Arc::new(MemKv::new());
    let db_old = Database::open(store.clone(), old()).unwrap();
    let mut tx = db_old.begin().unwrap();
    let id = tx.create("Rec").unwrap();
    tx.write_field(id, "v", "keepsake".into()).unwrap();
    tx.commit().unwrap();
    let new = vec![ObjectTypeDecl::new("Rec", 1).with_field(
        FieldDecl::simple("v", 10, ValueEncoding::I32).with_upgrade(UpgradePolicy::Reset),
    )];
    let db_new = Database::open(store, new).unwrap();
    let mut tx = db_new.begin().unwrap();
    assert_eq!(tx.read_field(id, "v").unwrap(), FieldValue::I32(0));

    // REQUIRE fails when no exact conversion exists.
    let store = Arc::new(MemKv::new());
    let db_old = Database::open(store.clone(), old()).unwrap();
    let mut tx = db_old.begin().unwrap();
    let id = tx.create("Rec").unwrap();
    tx.write_field(id, "v", "not-a-number".into()).unwrap();
    tx.commit().unwrap();
    let new = vec![ObjectTypeDecl::new("Rec", 1).with_field(
        FieldDecl::simple("v", 10, ValueEncoding::I32).with_upgrade(UpgradePolicy::Require),
    )];
    let db_new = Database::open(store, new).unwrap();
    let mut tx = db_new.begin().unwrap();
    assert!(matches!(
        tx.read_field(id, "v"),
        Err(Error::Migrate(stratadb::MigrateError::UpgradeConversion { .. }))
    ));
}

#[test]
fn untyped_handles_for_types_outside_the_schema() {
    let store = Arc::new(MemKv::new());
    let old = vec![
        ObjectTypeDecl::new("Kept", 1),
        ObjectTypeDecl::new("Dropped", 2).with_field(FieldDecl::reference(
            "peer",
            10,
            RefSpec::to_type(TypeId(1)).with_on_delete(DeleteAction::Nullify),
        )),
    ];
    let db_old = Database::open(store.clone(), old).unwrap();
    let mut tx = db_old.begin().unwrap();
    let kept = tx.create("Kept").unwrap();
    let dropped = tx.create("Dropped").unwrap();
    tx.write_field(dropped, "peer", FieldValue::Ref(kept))
        .unwrap();
    tx.commit().unwrap();

    let new = vec![ObjectTypeDecl::new("Kept", 1)];
    let db_new = Database::open(store, new).unwrap();
    let mut tx = db_new.begin().unwrap();

    // Field access is off the table, but references remain inspectable.
    assert!(matches!(
        tx.read_field(dropped, "peer"),
        Err(Error::Migrate(stratadb::MigrateError::TypeNotInSchema(_)))
    ));
    match tx.get(dropped).unwrap() {
        stratadb::Handle::Untyped(handle) => {
            let refs = handle.references().unwrap();
            assert_eq!(refs, vec![("peer".to_owned(), kept)]);
            assert!(handle.delete().unwrap());
        }
        stratadb::Handle::Typed(_) => panic!("expected an untyped handle"),
    }
    assert!(!tx.exists(dropped).unwrap());
}

#[test]
fn snapshot_isolation_between_transactions() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let book = tx.create("Book").unwrap();
    let probe = db.begin().unwrap();
    tx.commit().unwrap();

    // A second, still-open transaction keeps working on its snapshot.
    assert!(!probe.exists(book).unwrap());

    let mut dead = db.begin().unwrap();
    let another = dead.create("Book").unwrap();
    dead.rollback();
    let _ = another;
}

#[test]
fn cross_type_unique_constraint() {
    // `code` is unique across both types sharing the storage id.
    let decls = vec![
        ObjectTypeDecl::new("Alpha", 1)
            .with_field(FieldDecl::simple("code", 10, ValueEncoding::I64).unique()),
        ObjectTypeDecl::new("Beta", 2)
            .with_field(FieldDecl::simple("code", 10, ValueEncoding::I64).unique()),
    ];
    let db = open(decls);
    let mut tx = db.begin().unwrap();
    let a = tx.create("Alpha").unwrap();
    let b = tx.create("Beta").unwrap();
    tx.write_field(a, "code", FieldValue::I64(7)).unwrap();
    tx.write_field(b, "code", FieldValue::I64(7)).unwrap();
    assert!(matches!(tx.validate(), Err(Error::Validation(_))));
    tx.write_field(b, "code", FieldValue::I64(8)).unwrap();
    tx.validate().unwrap();
}

#[test]
fn typed_facade_round_trip() {
    let db = open(library_decls());
    let mut tx = db.begin().unwrap();
    let id = tx.create("Book").unwrap();

    let mut book = tx.get_as(id, "Book").unwrap();
    book.set("title", "The Art of Shelving").unwrap();
    assert_eq!(
        book.get("title").unwrap(),
        FieldValue::from("The Art of Shelving")
    );
    {
        let mut tags = book.set_view("tags");
        tags.insert("furniture").unwrap();
        assert_eq!(tags.len().unwrap(), 1);
    }
    {
        let mut counter = book.counter("checkouts");
        counter.adjust(2).unwrap();
        assert_eq!(counter.get().unwrap(), 2);
    }
    assert!(book.delete().unwrap());
}
