//! In-request resource descriptions: the input shape of storeResources and
//! the output shape of describeResources. A description is a set of
//! property values attached to either a persistent URI or a within-request
//! blank identifier.

use std::collections::{HashMap, HashSet};

use oxigraph::model::vocab::rdf;
use oxigraph::model::{Literal, NamedNode, Term};

use crate::errors::{Error, Result};
use crate::variant::Scalar;

/// Identity of a resource inside one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Uri(NamedNode),
    Blank(String),
}

impl ResourceId {
    /// Parses a wire identifier: `_:name` is a blank identifier, anything
    /// else must be an absolute URI.
    pub fn parse(s: &str) -> Result<ResourceId> {
        if let Some(name) = s.strip_prefix("_:") {
            if name.is_empty() {
                return Err(Error::invalid("empty blank node identifier"));
            }
            Ok(ResourceId::Blank(name.to_string()))
        } else if s.is_empty() {
            Err(Error::invalid("empty resource identifier"))
        } else {
            Ok(ResourceId::Uri(NamedNode::new(s)?))
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, ResourceId::Blank(_))
    }

    pub fn as_uri(&self) -> Option<&NamedNode> {
        match self {
            ResourceId::Uri(n) => Some(n),
            ResourceId::Blank(_) => None,
        }
    }
}

impl From<NamedNode> for ResourceId {
    fn from(n: NamedNode) -> ResourceId {
        ResourceId::Uri(n)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Uri(n) => write!(f, "{}", n.as_str()),
            ResourceId::Blank(b) => write!(f, "_:{b}"),
        }
    }
}

/// A property value inside a description: either a literal or a reference
/// to another resource (persistent or within-request).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropValue {
    Literal(Literal),
    Ref(ResourceId),
}

impl PropValue {
    /// Builds a value from an untyped scalar; URLs and resource references
    /// become references, everything else a literal.
    pub fn from_scalar(scalar: &Scalar) -> Result<PropValue> {
        match scalar {
            Scalar::Url(u) => Ok(PropValue::Ref(ResourceId::Uri(NamedNode::new(u.as_str())?))),
            Scalar::Resource(n) => Ok(PropValue::Ref(ResourceId::Uri(n.clone()))),
            other => match other.to_term() {
                Term::Literal(lit) => Ok(PropValue::Literal(lit)),
                _ => Err(Error::invalid("value cannot be carried as a literal")),
            },
        }
    }

    pub fn as_ref_id(&self) -> Option<&ResourceId> {
        match self {
            PropValue::Ref(id) => Some(id),
            PropValue::Literal(_) => None,
        }
    }
}

/// A partial description of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleResource {
    pub id: ResourceId,
    // a multimap kept in insertion order
    pub properties: Vec<(NamedNode, PropValue)>,
}

impl SimpleResource {
    pub fn new(id: ResourceId) -> SimpleResource {
        SimpleResource {
            id,
            properties: Vec::new(),
        }
    }

    pub fn blank(name: impl Into<String>) -> SimpleResource {
        SimpleResource::new(ResourceId::Blank(name.into()))
    }

    pub fn with_uri(uri: NamedNode) -> SimpleResource {
        SimpleResource::new(ResourceId::Uri(uri))
    }

    pub fn add(&mut self, property: NamedNode, value: PropValue) {
        let pair = (property, value);
        if !self.properties.contains(&pair) {
            self.properties.push(pair);
        }
    }

    pub fn add_literal(&mut self, property: NamedNode, literal: Literal) {
        self.add(property, PropValue::Literal(literal));
    }

    pub fn add_ref(&mut self, property: NamedNode, target: impl Into<ResourceId>) {
        self.add(property, PropValue::Ref(target.into()));
    }

    pub fn add_type(&mut self, class: NamedNode) {
        self.add_ref(rdf::TYPE.into_owned(), ResourceId::Uri(class));
    }

    pub fn values<'a>(
        &'a self,
        property: &'a NamedNode,
    ) -> impl Iterator<Item = &'a PropValue> + 'a {
        self.properties
            .iter()
            .filter(move |(p, _)| p == property)
            .map(|(_, v)| v)
    }

    /// The declared rdf:type values.
    pub fn types(&self) -> Vec<NamedNode> {
        self.properties
            .iter()
            .filter(|(p, _)| p.as_ref() == rdf::TYPE)
            .filter_map(|(_, v)| match v {
                PropValue::Ref(ResourceId::Uri(n)) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, property: &NamedNode, value: &PropValue) -> bool {
        self.properties.iter().any(|(p, v)| p == property && v == value)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// A key identifying the content of this description irrespective of
    /// its identity, used to collapse duplicates inside a batch.
    fn content_key(&self) -> Vec<(String, String)> {
        let mut key: Vec<(String, String)> = self
            .properties
            .iter()
            .map(|(p, v)| {
                let v = match v {
                    PropValue::Literal(l) => l.to_string(),
                    PropValue::Ref(id) => id.to_string(),
                };
                (p.as_str().to_string(), v)
            })
            .collect();
        key.sort();
        key.dedup();
        key
    }

    fn rewrite_refs(&mut self, from: &ResourceId, to: &ResourceId) {
        for (_, v) in self.properties.iter_mut() {
            if let PropValue::Ref(id) = v {
                if id == from {
                    *id = to.clone();
                }
            }
        }
        self.properties.dedup();
    }
}

/// An ordered collection of descriptions handled by one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimpleResourceGraph {
    pub resources: Vec<SimpleResource>,
}

impl SimpleResourceGraph {
    pub fn new() -> SimpleResourceGraph {
        SimpleResourceGraph::default()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&SimpleResource> {
        self.resources.iter().find(|r| &r.id == id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }

    /// Adds a description, merging into an existing one with the same id.
    pub fn insert(&mut self, res: SimpleResource) {
        if let Some(existing) = self.resources.iter_mut().find(|r| r.id == res.id) {
            for (p, v) in res.properties {
                existing.add(p, v);
            }
        } else {
            self.resources.push(res);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimpleResource> {
        self.resources.iter()
    }

    /// Every resource id referenced as a value somewhere in the batch.
    pub fn referenced_ids(&self) -> HashSet<ResourceId> {
        self.resources
            .iter()
            .flat_map(|r| r.properties.iter())
            .filter_map(|(_, v)| v.as_ref_id().cloned())
            .collect()
    }

    /// Rewrites one identity everywhere: as a subject and in all references.
    pub fn rewrite_id(&mut self, from: &ResourceId, to: &ResourceId) {
        for res in self.resources.iter_mut() {
            if &res.id == from {
                res.id = to.clone();
            }
            res.rewrite_refs(from, to);
        }
        // a rewrite may have made two subjects collide; merge them
        let mut merged = SimpleResourceGraph::new();
        for res in std::mem::take(&mut self.resources) {
            merged.insert(res);
        }
        self.resources = merged.resources;
    }

    /// Collapses blank descriptions that are identical except for their
    /// identity, rewriting references; runs to fix-point since each collapse
    /// can make further descriptions identical.
    pub fn merge_duplicates(&mut self) {
        loop {
            let mut by_content: HashMap<Vec<(String, String)>, ResourceId> = HashMap::new();
            let mut rewrite: Option<(ResourceId, ResourceId)> = None;
            for res in self.resources.iter() {
                if !res.id.is_blank() {
                    continue;
                }
                let key = res.content_key();
                match by_content.get(&key) {
                    Some(keep) => {
                        rewrite = Some((res.id.clone(), keep.clone()));
                        break;
                    }
                    None => {
                        by_content.insert(key, res.id.clone());
                    }
                }
            }
            match rewrite {
                Some((from, to)) => self.rewrite_id(&from, &to),
                None => break,
            }
        }
    }
}

impl FromIterator<SimpleResource> for SimpleResourceGraph {
    fn from_iter<T: IntoIterator<Item = SimpleResource>>(iter: T) -> Self {
        let mut graph = SimpleResourceGraph::new();
        for res in iter {
            graph.insert(res);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/onto#{local}")).unwrap()
    }

    #[test]
    fn parse_identifiers() {
        assert_eq!(
            ResourceId::parse("_:a").unwrap(),
            ResourceId::Blank("a".into())
        );
        assert!(matches!(
            ResourceId::parse("http://example.org/x").unwrap(),
            ResourceId::Uri(_)
        ));
        assert!(ResourceId::parse("").is_err());
        assert!(ResourceId::parse("_:").is_err());
        assert!(ResourceId::parse("not a uri").is_err());
    }

    #[test]
    fn insert_merges_same_identity() {
        let mut graph = SimpleResourceGraph::new();
        let mut a = SimpleResource::blank("a");
        a.add_literal(prop("name"), Literal::new_simple_literal("x"));
        let mut b = SimpleResource::blank("a");
        b.add_literal(prop("name"), Literal::new_simple_literal("x"));
        b.add_literal(prop("age"), Literal::new_simple_literal("7"));
        graph.insert(a);
        graph.insert(b);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.resources[0].properties.len(), 2);
    }

    #[test]
    fn duplicate_blanks_collapse_to_fixpoint() {
        let mut graph = SimpleResourceGraph::new();
        // two identical emails, referenced by two contacts that only differ
        // by which email they point at; everything collapses pairwise
        for (contact, email) in [("c1", "e1"), ("c2", "e2")] {
            let mut e = SimpleResource::blank(email);
            e.add_literal(prop("address"), Literal::new_simple_literal("p@x.org"));
            let mut c = SimpleResource::blank(contact);
            c.add_literal(prop("name"), Literal::new_simple_literal("Peter"));
            c.add_ref(prop("email"), ResourceId::Blank(email.into()));
            graph.insert(e);
            graph.insert(c);
        }
        graph.merge_duplicates();
        assert_eq!(graph.len(), 2);
        let ids: HashSet<_> = graph.iter().map(|r| r.id.clone()).collect();
        assert!(ids.contains(&ResourceId::Blank("e1".into())));
        assert!(ids.contains(&ResourceId::Blank("c1".into())));
    }

    #[test]
    fn rewrite_updates_subjects_and_refs() {
        let mut graph = SimpleResourceGraph::new();
        let mut a = SimpleResource::blank("a");
        a.add_ref(prop("knows"), ResourceId::Blank("b".into()));
        graph.insert(a);
        graph.insert(SimpleResource::blank("b"));
        let target = ResourceId::Uri(NamedNode::new("nepomuk:/res/b").unwrap());
        graph.rewrite_id(&ResourceId::Blank("b".into()), &target);
        assert!(graph.contains(&target));
        assert_eq!(
            graph.resources[0].properties[0].1,
            PropValue::Ref(target.clone())
        );
    }
}
