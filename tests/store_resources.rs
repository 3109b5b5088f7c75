//! Tests of the batched storeResources pipeline: identity resolution,
//! identification against existing data, schema validation, and the store
//! flags.

mod common;

use common::*;

use oxigraph::model::vocab::xsd;
use oxigraph::model::Literal;
use semstore::{
    Error, IdentificationMode, ResourceId, SimpleResource, SimpleResourceGraph, StoreFlags,
    Variant,
};

fn store(
    engine: &semstore::Engine,
    graph: SimpleResourceGraph,
    flags: StoreFlags,
) -> semstore::Result<std::collections::HashMap<ResourceId, oxigraph::model::NamedNode>> {
    engine.store_resources(graph, APP, IdentificationMode::default(), flags, false)
}

fn contact(name: &str) -> SimpleResource {
    let mut res = SimpleResource::blank("c");
    res.add_type(node(&ex("Contact")));
    res.add_literal(node(&ex("fullname")), Literal::new_simple_literal(name));
    res
}

#[test]
fn blank_descriptions_get_fresh_uris() {
    let engine = test_engine();
    let graph: SimpleResourceGraph = [contact("Ada")].into_iter().collect();
    let mapping = store(&engine, graph, StoreFlags::default()).unwrap();

    let uri = &mapping[&ResourceId::Blank("c".into())];
    assert!(uri.as_str().starts_with("nepomuk:/res/"));
    assert_eq!(values_of(&engine, uri, &ex("fullname")), vec!["Ada"]);
    // the engine filled in the bookkeeping
    assert_eq!(values_of(&engine, uri, &nao("created")).len(), 1);
    assert_eq!(values_of(&engine, uri, &nao("lastModified")).len(), 1);
}

#[test]
fn second_store_identifies_the_existing_resource() {
    let engine = test_engine();

    let build = || -> SimpleResourceGraph {
        let mut email = SimpleResource::blank("e");
        email.add_type(node(&ex("EmailAddress")));
        email.add_literal(
            node(&ex("emailAddress")),
            Literal::new_simple_literal("ada@example.org"),
        );
        let mut c = contact("Ada");
        c.add_ref(node(&ex("hasEmail")), ResourceId::Blank("e".into()));
        [email, c].into_iter().collect()
    };

    let first = store(&engine, build(), StoreFlags::default()).unwrap();
    let second = store(&engine, build(), StoreFlags::default()).unwrap();
    assert_eq!(
        first[&ResourceId::Blank("c".into())],
        second[&ResourceId::Blank("c".into())]
    );
    assert_eq!(
        first[&ResourceId::Blank("e".into())],
        second[&ResourceId::Blank("e".into())]
    );
    // no duplicate was created
    let contacts = engine
        .store()
        .quads_for_pattern(
            None,
            Some(oxigraph::model::vocab::rdf::TYPE),
            Some(node(&ex("Contact")).as_ref().into()),
            None,
        )
        .count();
    assert_eq!(contacts, 1);
}

#[test]
fn domain_violations_fail_the_whole_batch() {
    let engine = test_engine();
    let mut res = SimpleResource::blank("t");
    res.add_type(node(&ex("Tag")));
    // fullname is declared on contacts only
    res.add_literal(node(&ex("fullname")), Literal::new_simple_literal("x"));
    let err = store(&engine, [res].into_iter().collect(), StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn overwrite_replaces_single_valued_properties() {
    let engine = test_engine();
    let uri = "nepomuk:/res/test-overwrite";

    let with_age = |age: i32| -> SimpleResourceGraph {
        let mut res = SimpleResource::with_uri(node(uri));
        res.add_type(node(&ex("Contact")));
        res.add_literal(
            node(&ex("age")),
            Literal::new_typed_literal(age.to_string(), xsd::INT),
        );
        [res].into_iter().collect()
    };

    store(&engine, with_age(30), StoreFlags::default()).unwrap();
    // a conflicting value fails by default
    let err = store(&engine, with_age(31), StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let flags = StoreFlags {
        overwrite_properties: true,
        ..StoreFlags::default()
    };
    store(&engine, with_age(31), flags).unwrap();
    assert_eq!(values_of(&engine, &node(uri), &ex("age")), vec!["31"]);
}

#[test]
fn lazy_cardinalities_drop_the_excess() {
    let engine = test_engine();
    let mut res = SimpleResource::with_uri(node("nepomuk:/res/test-lazy"));
    res.add_type(node(&ex("Contact")));
    res.add_literal(node(&ex("age")), Literal::new_typed_literal("30", xsd::INT));
    res.add_literal(node(&ex("age")), Literal::new_typed_literal("31", xsd::INT));
    let graph: SimpleResourceGraph = [res].into_iter().collect();

    let err = store(&engine, graph.clone(), StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let flags = StoreFlags {
        lazy_cardinalities: true,
        ..StoreFlags::default()
    };
    store(&engine, graph, flags).unwrap();
    assert_eq!(
        values_of(&engine, &node("nepomuk:/res/test-lazy"), &ex("age")),
        vec!["30"]
    );
}

#[test]
fn blank_objects_must_be_described() {
    let engine = test_engine();
    let mut c = contact("Ada");
    c.add_ref(node(&ex("hasEmail")), ResourceId::Blank("ghost".into()));
    let err = store(&engine, [c].into_iter().collect(), StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn schema_entities_are_not_valid_subjects() {
    let engine = test_engine();
    let mut res = SimpleResource::with_uri(node(&ex("Contact")));
    res.add_literal(node(&nao("prefLabel")), Literal::new_simple_literal("x"));
    let err = store(&engine, [res].into_iter().collect(), StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn merge_duplicates_collapses_identical_blanks() {
    let engine = test_engine();
    let mut graph = SimpleResourceGraph::new();
    for name in ["t1", "t2"] {
        let mut tag = SimpleResource::blank(name);
        tag.add_type(node(&ex("Tag")));
        tag.add_literal(node(&nao("prefLabel")), Literal::new_simple_literal("work"));
        graph.insert(tag);
    }

    let flags = StoreFlags {
        merge_duplicates: true,
        ..StoreFlags::default()
    };
    store(&engine, graph, flags).unwrap();
    let tags = engine
        .store()
        .quads_for_pattern(
            None,
            Some(oxigraph::model::vocab::rdf::TYPE),
            Some(node(&ex("Tag")).as_ref().into()),
            None,
        )
        .count();
    assert_eq!(tags, 1);
}

#[test]
fn provided_timestamps_are_honored() {
    let engine = test_engine();
    let created = "2020-05-01T12:00:00Z";
    let mut res = contact("Old");
    res.add_literal(
        node(&nao("created")),
        Literal::new_typed_literal(created, xsd::DATE_TIME),
    );
    let mapping = store(&engine, [res].into_iter().collect(), StoreFlags::default()).unwrap();
    let uri = &mapping[&ResourceId::Blank("c".into())];
    let stored = values_of(&engine, uri, &nao("created"));
    assert_eq!(stored.len(), 1);
    assert!(stored[0].starts_with("2020-05-01T12:00:00"));
}

#[test]
fn url_conflicts_are_detected_across_the_store() {
    let engine = test_engine();
    let r = engine
        .create_resource(&[&ex("Contact")], None, None, APP)
        .unwrap();
    engine
        .add_property(
            &[r.as_str()],
            &nie("url"),
            &[Variant::from("https://example.org/contact")],
            APP,
        )
        .unwrap();

    let mut res = contact("Other");
    res.add_ref(
        node(&nie("url")),
        ResourceId::Uri(node("https://example.org/contact")),
    );
    let err = store(&engine, [res].into_iter().collect(), StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn url_conflicts_are_detected_within_one_batch() {
    let engine = test_engine();
    let mut graph = SimpleResourceGraph::new();
    for name in ["First", "Second"] {
        let mut res = SimpleResource::blank(name);
        res.add_type(node(&ex("Contact")));
        res.add_literal(node(&ex("fullname")), Literal::new_simple_literal(name));
        res.add_ref(
            node(&nie("url")),
            ResourceId::Uri(node("https://example.org/shared")),
        );
        graph.insert(res);
    }
    let err = store(&engine, graph, StoreFlags::default()).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    // nothing was written
    let holders = engine
        .store()
        .quads_for_pattern(
            None,
            Some(node(&nie("url")).as_ref()),
            Some(node("https://example.org/shared").as_ref().into()),
            None,
        )
        .count();
    assert_eq!(holders, 0);
}

#[test]
fn identification_can_be_disabled() {
    let engine = test_engine();
    let build = || -> SimpleResourceGraph { [contact("Solo")].into_iter().collect() };

    let first = engine
        .store_resources(
            build(),
            APP,
            IdentificationMode::IdentifyNew,
            StoreFlags::default(),
            false,
        )
        .unwrap();
    let second = engine
        .store_resources(
            build(),
            APP,
            IdentificationMode::IdentifyNone,
            StoreFlags::default(),
            false,
        )
        .unwrap();
    assert_ne!(
        first[&ResourceId::Blank("c".into())],
        second[&ResourceId::Blank("c".into())]
    );
}
