#![allow(dead_code)]

use oxigraph::model::NamedNode;
use semstore::util::parse_rdf;
use semstore::{Config, Engine, RdfFormat};

pub const APP: &str = "test_app";

pub const NAO: &str = "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#";
pub const NIE: &str = "http://www.semanticdesktop.org/ontologies/2007/01/19/nie#";
pub const NFO: &str = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#";
pub const EX: &str = "http://example.org/onto#";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// A small desktop-style ontology covering the classes and properties the
/// tests exercise.
pub const ONTOLOGY: &str = r#"
@prefix rdf:  <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix xsd:  <http://www.w3.org/2001/XMLSchema#> .
@prefix nao:  <http://www.semanticdesktop.org/ontologies/2007/08/15/nao#> .
@prefix nie:  <http://www.semanticdesktop.org/ontologies/2007/01/19/nie#> .
@prefix nfo:  <http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#> .
@prefix nrl:  <http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#> .
@prefix pimo: <http://www.semanticdesktop.org/ontologies/2007/11/01/pimo#> .
@prefix ex:   <http://example.org/onto#> .

nao:Agent a rdfs:Class .
pimo:Person a rdfs:Class .
nie:DataObject a rdfs:Class .
nie:InformationElement a rdfs:Class .
nfo:FileDataObject a rdfs:Class ; rdfs:subClassOf nie:DataObject .
nfo:Folder a rdfs:Class ; rdfs:subClassOf nfo:FileDataObject .
ex:Contact a rdfs:Class .
ex:EmailAddress a rdfs:Class .
ex:Tag a rdfs:Class .

nao:prefLabel a rdf:Property ; rdfs:range xsd:string ; nrl:maxCardinality "1"^^xsd:int .
nao:description a rdf:Property ; rdfs:range xsd:string ; nrl:maxCardinality "1"^^xsd:int .
nao:identifier a rdf:Property ; rdfs:range xsd:string .
nao:created a rdf:Property ; rdfs:range xsd:dateTime ; nrl:maxCardinality "1"^^xsd:int .
nao:lastModified a rdf:Property ; rdfs:range xsd:dateTime ; nrl:maxCardinality "1"^^xsd:int .
nao:userVisible a rdf:Property ; rdfs:range xsd:boolean .
nao:creator a rdf:Property ; rdfs:range nao:Agent .
nao:maintainedBy a rdf:Property ; rdfs:range nao:Agent .
nao:hasSubResource a rdf:Property ; rdfs:range rdfs:Resource .
nie:url a rdf:Property ; rdfs:range rdfs:Resource ; nrl:maxCardinality "1"^^xsd:int .
nie:isPartOf a rdf:Property ; rdfs:range nfo:Folder ; nrl:maxCardinality "1"^^xsd:int .
nfo:fileName a rdf:Property ; rdfs:range xsd:string ; nrl:maxCardinality "1"^^xsd:int .

ex:fullname a rdf:Property ; rdfs:domain ex:Contact ; rdfs:range xsd:string ;
    nrl:maxCardinality "1"^^xsd:int .
ex:age a rdf:Property ; rdfs:domain ex:Contact ; rdfs:range xsd:int ;
    nrl:maxCardinality "1"^^xsd:int .
ex:hasEmail a rdf:Property , nrl:DefiningProperty ; rdfs:domain ex:Contact ;
    rdfs:range ex:EmailAddress .
ex:emailAddress a rdf:Property ; rdfs:domain ex:EmailAddress ; rdfs:range xsd:string ;
    nrl:maxCardinality "1"^^xsd:int .
ex:hasTag a rdf:Property ; rdfs:range ex:Tag .
ex:note a rdf:Property ; rdfs:range xsd:string .
"#;

/// An in-memory engine with the test ontology loaded.
pub fn test_engine() -> Engine {
    let engine = Engine::new(Config::in_memory()).unwrap();
    for quad in parse_rdf(ONTOLOGY.as_bytes(), Some(RdfFormat::Turtle)).unwrap() {
        engine.store().insert(quad.as_ref()).unwrap();
    }
    engine.rebuild_schema().unwrap();
    engine
}

pub fn ex(local: &str) -> String {
    format!("{EX}{local}")
}

pub fn nao(local: &str) -> String {
    format!("{NAO}{local}")
}

pub fn nie(local: &str) -> String {
    format!("{NIE}{local}")
}

pub fn nfo(local: &str) -> String {
    format!("{NFO}{local}")
}

pub fn node(uri: &str) -> NamedNode {
    NamedNode::new(uri).unwrap()
}

/// All objects of (resource, property) as strings, sorted.
pub fn values_of(engine: &Engine, resource: &NamedNode, property: &str) -> Vec<String> {
    let prop = node(property);
    let mut out: Vec<String> = engine
        .store()
        .quads_for_pattern(
            Some(resource.as_ref().into()),
            Some(prop.as_ref()),
            None,
            None,
        )
        .map(|q| match q.unwrap().object {
            oxigraph::model::Term::Literal(lit) => lit.value().to_string(),
            oxigraph::model::Term::NamedNode(n) => n.as_str().to_string(),
            other => other.to_string(),
        })
        .collect();
    out.sort();
    out
}

pub fn quad_count(engine: &Engine, resource: &NamedNode) -> usize {
    engine
        .store()
        .quads_for_pattern(Some(resource.as_ref().into()), None, None, None)
        .count()
}
