//! Invariant-level tests of the property operations: idempotence, protected
//! targets, cardinality, URL uniqueness, timestamps, and notifications.

mod common;

use common::*;
use semstore::{ChangeEvent, Error, RemovalFlags, Variant};

#[test]
fn add_property_is_idempotent() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], Some("Alice"), None, APP)
        .unwrap();
    let fullname = ex("fullname");
    let values = [Variant::from("Alice Cooper")];

    engine
        .add_property(&[uri.as_str()], &fullname, &values, APP)
        .unwrap();
    let first = values_of(&engine, &uri, &fullname);

    // a second identical add is a silent no-op
    let sub = engine.watch(&[], &[], &[]).unwrap();
    engine
        .add_property(&[uri.as_str()], &fullname, &values, APP)
        .unwrap();
    assert_eq!(values_of(&engine, &uri, &fullname), first);
    assert!(sub.try_next().is_none());
}

#[test]
fn metadata_properties_are_protected() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    for prop in ["created", "lastModified", "creator", "userVisible"] {
        let err = engine
            .add_property(&[uri.as_str()], &nao(prop), &[Variant::from("x")], APP)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{prop}: {err}");
        let err = engine
            .remove_properties(&[uri.as_str()], &[&nao(prop)], APP)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{prop}: {err}");
    }
}

#[test]
fn schema_entities_are_not_writable() {
    let engine = test_engine();
    let err = engine
        .add_property(&[&ex("Contact")], &nao("prefLabel"), &[Variant::from("x")], APP)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn unknown_property_is_rejected() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let err = engine
        .add_property(&[uri.as_str()], &ex("noSuchProperty"), &[Variant::from("x")], APP)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn max_cardinality_is_enforced() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let age = ex("age");
    engine
        .add_property(&[uri.as_str()], &age, &[Variant::from(30)], APP)
        .unwrap();
    let err = engine
        .add_property(&[uri.as_str()], &age, &[Variant::from(31)], APP)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    // set replaces, so it stays within the limit
    engine
        .set_property(&[uri.as_str()], &age, &[Variant::from(31)], APP)
        .unwrap();
    assert_eq!(values_of(&engine, &uri, &age), vec!["31"]);
}

#[test]
fn set_property_diffs_against_stored_values() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let note = ex("note");
    engine
        .set_property(
            &[uri.as_str()],
            &note,
            &[Variant::from("a"), Variant::from("b")],
            APP,
        )
        .unwrap();

    let sub = engine.watch(&[uri.as_str()], &[], &[]).unwrap();
    engine
        .set_property(
            &[uri.as_str()],
            &note,
            &[Variant::from("b"), Variant::from("c")],
            APP,
        )
        .unwrap();
    assert_eq!(values_of(&engine, &uri, &note), vec!["b", "c"]);

    // the event carries only the actual difference
    let events = sub.drain();
    let Some(ChangeEvent::PropertyChanged { added, removed, .. }) = events.first() else {
        panic!("expected a property change event");
    };
    assert_eq!(added.len(), 1);
    assert_eq!(removed.len(), 1);
}

#[test]
fn set_with_empty_values_removes_the_property() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let note = ex("note");
    engine
        .set_property(&[uri.as_str()], &note, &[Variant::from("a")], APP)
        .unwrap();
    engine.set_property(&[uri.as_str()], &note, &[], APP).unwrap();
    assert!(values_of(&engine, &uri, &note).is_empty());
}

#[test]
fn canonical_url_is_unique() {
    let engine = test_engine();
    let r1 = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let r2 = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let url = nie("url");
    engine
        .add_property(
            &[r1.as_str()],
            &url,
            &[Variant::from("https://example.org/page")],
            APP,
        )
        .unwrap();
    let err = engine
        .add_property(
            &[r2.as_str()],
            &url,
            &[Variant::from("https://example.org/page")],
            APP,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn canonical_url_cannot_be_removed() {
    let engine = test_engine();
    let r = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    engine
        .add_property(
            &[r.as_str()],
            &nie("url"),
            &[Variant::from("https://example.org/a")],
            APP,
        )
        .unwrap();
    let err = engine
        .remove_properties(&[r.as_str()], &[&nie("url")], APP)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = engine
        .remove_property(
            &[r.as_str()],
            &nie("url"),
            &[Variant::from("https://example.org/a")],
            APP,
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn modification_timestamp_strictly_increases() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let before = values_of(&engine, &uri, &nao("lastModified"));
    assert_eq!(before.len(), 1);

    engine
        .add_property(&[uri.as_str()], &ex("note"), &[Variant::from("x")], APP)
        .unwrap();
    let after = values_of(&engine, &uri, &nao("lastModified"));
    assert_eq!(after.len(), 1);
    // RFC 3339 UTC with fixed precision compares lexicographically
    assert!(after[0] > before[0], "{} !> {}", after[0], before[0]);

    // the creation timestamp never moves
    assert_eq!(
        values_of(&engine, &uri, &nao("created")).len(),
        1
    );
}

#[test]
fn resource_reduced_to_metadata_is_collected() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], Some("temp"), None, APP)
        .unwrap();
    let sub = engine.watch(&[uri.as_str()], &[], &[]).unwrap();
    engine
        .remove_properties(&[uri.as_str()], &[RDF_TYPE, &nao("prefLabel")], APP)
        .unwrap();
    assert_eq!(quad_count(&engine, &uri), 0);
    let events = sub.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, ChangeEvent::ResourceRemoved { .. })));
}

#[test]
fn referenced_resource_is_not_collected() {
    let engine = test_engine();
    let contact = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let tag = engine
        .create_resource(&[&ex("Tag")], Some("work"), None, APP)
        .unwrap();
    engine
        .add_property(
            &[contact.as_str()],
            &ex("hasTag"),
            &[Variant::from(tag.clone())],
            APP,
        )
        .unwrap();
    // the tag keeps only its metadata but stays referenced
    engine
        .remove_properties(&[tag.as_str()], &[RDF_TYPE, &nao("prefLabel")], APP)
        .unwrap();
    assert!(quad_count(&engine, &tag) > 0);
}

#[test]
fn removal_of_unknown_resources_is_silent() {
    let engine = test_engine();
    engine
        .remove_resources(&["nepomuk:/res/does-not-exist"], RemovalFlags::default(), APP)
        .unwrap();
}

#[test]
fn watcher_filters_by_resource_and_property() {
    let engine = test_engine();
    let a = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let b = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let sub = engine
        .watch(&[a.as_str()], &[&ex("note")], &[])
        .unwrap();

    engine
        .add_property(&[b.as_str()], &ex("note"), &[Variant::from("x")], APP)
        .unwrap();
    engine
        .add_property(&[a.as_str()], &ex("fullname"), &[Variant::from("Al")], APP)
        .unwrap();
    assert!(sub.try_next().is_none());

    engine
        .add_property(&[a.as_str()], &ex("note"), &[Variant::from("x")], APP)
        .unwrap();
    let events = sub.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChangeEvent::PropertyChanged { resource, .. } if resource == &a
    ));
    engine.unwatch(sub.id());
}

#[test]
fn type_changes_are_reported_on_both_axes() {
    let engine = test_engine();
    let uri = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    let sub = engine.watch(&[uri.as_str()], &[], &[]).unwrap();
    engine
        .add_property(
            &[uri.as_str()],
            RDF_TYPE,
            &[Variant::from(node(&ex("Tag")))],
            APP,
        )
        .unwrap();
    // the plain property change is delivered alongside the type event
    let events = sub.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        ChangeEvent::PropertyChanged { resource, .. } if resource == &uri
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ChangeEvent::TypesAdded { resource, types } if resource == &uri
            && types.contains(&node(&ex("Tag")))
    )));
}

#[test]
fn empty_arguments_are_rejected() {
    let engine = test_engine();
    assert!(engine
        .add_property(&[], &ex("note"), &[Variant::from("x")], APP)
        .is_err());
    assert!(engine
        .add_property(&["nepomuk:/res/x"], &ex("note"), &[], APP)
        .is_err());
    assert!(engine
        .add_property(&["nepomuk:/res/x"], &ex("note"), &[Variant::from("x")], "")
        .is_err());
}
