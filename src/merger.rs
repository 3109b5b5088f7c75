//! The write engine behind storeResources: maps incoming blank and
//! unresolved identities onto existing or freshly minted URIs, validates the
//! whole batch against the schema, and emits the minimal set of inserts and
//! deletions.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use log::debug;
use oxigraph::model::vocab::{rdf, rdfs, xsd};
use oxigraph::model::{Literal, NamedNode, Quad, Subject, Term};
use oxigraph::store::Store;

use crate::consts;
use crate::errors::{Error, Result};
use crate::graphs::GraphRegistry;
use crate::options::StoreFlags;
use crate::resolver;
use crate::resource::{PropValue, ResourceId, SimpleResourceGraph};
use crate::schema::SchemaTree;
use crate::util::{datetime_literal, parse_datetime, touch_resource};
use crate::variant::Scalar;
use crate::watcher::WatcherHub;

pub struct ResourceMerger<'a> {
    pub store: &'a Store,
    pub schema: &'a SchemaTree,
    pub registry: &'a GraphRegistry,
    pub watcher: &'a WatcherHub,
    pub app: &'a str,
    pub flags: StoreFlags,
    pub discardable: bool,
}

/// One validated triple waiting to be written.
struct Planned {
    subject: NamedNode,
    property: NamedNode,
    object: Term,
    system: bool,
}

impl<'a> ResourceMerger<'a> {
    /// Merges the batch into the store. `mappings` carries the identities
    /// the identifier discovered; every remaining blank is allocated here.
    /// The first validation failure aborts the batch before any write.
    pub fn merge(
        &self,
        graph: &SimpleResourceGraph,
        mut mappings: HashMap<ResourceId, NamedNode>,
    ) -> Result<HashMap<ResourceId, NamedNode>> {
        let mut created: HashSet<NamedNode> = HashSet::new();

        // identity assignment: identified blanks keep their mapping, the
        // rest get fresh URIs; explicit URIs map to themselves
        for res in graph.iter() {
            if mappings.contains_key(&res.id) {
                continue;
            }
            match &res.id {
                ResourceId::Uri(uri) => {
                    if !resolver::resource_exists(self.store, uri.as_ref())? {
                        created.insert(uri.clone());
                    }
                    mappings.insert(res.id.clone(), uri.clone());
                }
                ResourceId::Blank(_) => {
                    let uri = resolver::fresh_resource_uri(self.store)?;
                    created.insert(uri.clone());
                    mappings.insert(res.id.clone(), uri.clone());
                }
            }
        }

        // declared types per final identity, for domain and range checks
        let mut batch_types: HashMap<NamedNode, Vec<NamedNode>> = HashMap::new();
        for res in graph.iter() {
            let uri = &mappings[&res.id];
            batch_types
                .entry(uri.clone())
                .or_default()
                .extend(res.types());
        }

        let mut planned = self.plan(graph, &mappings)?;
        let removals = self.validate(&mut planned, &batch_types)?;
        self.check_url_conflicts(&planned, &mappings)?;
        self.write(planned, removals, &created, &batch_types)?;
        Ok(mappings)
    }

    /// Normalizes every description into concrete triples, rewriting
    /// references through the identity mappings and coercing literals into
    /// the declared ranges.
    fn plan(
        &self,
        graph: &SimpleResourceGraph,
        mappings: &HashMap<ResourceId, NamedNode>,
    ) -> Result<Vec<Planned>> {
        let mut planned = Vec::new();
        for res in graph.iter() {
            let subject = mappings[&res.id].clone();
            for (prop, value) in &res.properties {
                let object: Term = match value {
                    PropValue::Ref(id) => match mappings.get(id) {
                        Some(uri) => uri.clone().into(),
                        None => match id {
                            ResourceId::Uri(uri) => uri.clone().into(),
                            ResourceId::Blank(b) => {
                                return Err(Error::invalid(format!(
                                    "blank object _:{b} never appears as a subject"
                                )))
                            }
                        },
                    },
                    PropValue::Literal(lit) => self.normalize_literal(prop, lit)?,
                };
                let system = prop.as_ref() == consts::NIE_URL
                    || consts::is_metadata_property(prop.as_ref());
                planned.push(Planned {
                    subject: subject.clone(),
                    property: prop.clone(),
                    object,
                    system,
                });
            }
        }
        Ok(planned)
    }

    fn normalize_literal(&self, prop: &NamedNode, lit: &Literal) -> Result<Term> {
        if !self.schema.is_known_property(prop.as_ref()) {
            // unknown properties carry their literal untouched
            return Ok(lit.clone().into());
        }
        if let Some(target) = self.schema.literal_range_type(prop.as_ref()) {
            if lit.datatype() == target.as_ref()
                || (target.as_ref() == rdfs::LITERAL && lit.datatype() == xsd::STRING)
            {
                return Ok(lit.clone().into());
            }
            // unsigned counts pass for durations without rewriting
            if target.as_ref() == xsd::DURATION
                && (lit.datatype() == xsd::UNSIGNED_INT || lit.datatype() == xsd::INT)
            {
                return Ok(Literal::new_typed_literal(lit.value(), xsd::DURATION).into());
            }
            let scalar = Scalar::from_literal(lit)?;
            return self.schema.variant_to_node(&scalar, prop.as_ref());
        }
        if self.schema.property_range(prop.as_ref()).is_some() {
            return Err(Error::invalid(format!(
                "{} expects a resource, got literal {}",
                prop.as_str(),
                lit
            )));
        }
        Ok(lit.clone().into())
    }

    /// Schema validation over the whole batch. Returns the existing quads
    /// that overwrite flags schedule for deletion; with lazy cardinalities,
    /// excess planned values are dropped in place.
    fn validate(
        &self,
        planned: &mut Vec<Planned>,
        batch_types: &HashMap<NamedNode, Vec<NamedNode>>,
    ) -> Result<Vec<Quad>> {
        let mut removals: Vec<Quad> = Vec::new();
        let mut skip: HashSet<usize> = HashSet::new();
        let mut by_subject_prop: HashMap<(NamedNode, NamedNode), Vec<usize>> = HashMap::new();
        for (i, p) in planned.iter().enumerate() {
            if p.system || p.property.as_ref() == rdf::TYPE {
                continue;
            }
            by_subject_prop
                .entry((p.subject.clone(), p.property.clone()))
                .or_default()
                .push(i);
        }

        for ((subject, property), indices) in &by_subject_prop {
            let entries: Vec<&Planned> = indices.iter().map(|i| &planned[*i]).collect();
            let known = self.schema.is_known_property(property.as_ref());

            // cardinality
            let max = self.schema.max_cardinality(property.as_ref());
            if known && max > 0 {
                let existing = self.existing_values(subject, property)?;
                let new_values: HashSet<&Term> = entries.iter().map(|p| &p.object).collect();
                let overwrite = self.flags.overwrite_all_properties
                    || (self.flags.overwrite_properties && max == 1);
                let budget = if overwrite {
                    for quad in self.existing_quads(subject, property)? {
                        if !new_values.contains(&quad.object) {
                            removals.push(quad);
                        }
                    }
                    max as usize
                } else {
                    let kept: HashSet<Term> = existing
                        .into_iter()
                        .filter(|t| !new_values.contains(t))
                        .collect();
                    (max as usize).saturating_sub(kept.len())
                };
                if new_values.len() > budget {
                    if !self.flags.lazy_cardinalities {
                        return Err(Error::invalid(format!(
                            "{} would exceed the max cardinality {max} of {}",
                            subject.as_str(),
                            property.as_str()
                        )));
                    }
                    // drop the excess, keeping first-seen values
                    let mut seen: HashSet<&Term> = HashSet::new();
                    for i in indices {
                        let object = &planned[*i].object;
                        if seen.contains(object) {
                            skip.insert(*i);
                            continue;
                        }
                        if seen.len() >= budget {
                            skip.insert(*i);
                        } else {
                            seen.insert(object);
                        }
                    }
                }
            }

            if !known {
                continue;
            }

            // domain
            if let Some(domain) = self.schema.property_domain(property.as_ref()) {
                let types = self.effective_types(subject, batch_types)?;
                let ok = types
                    .iter()
                    .any(|t| self.schema.is_child_of(t.as_ref(), domain.as_ref()));
                if !ok {
                    return Err(Error::invalid(format!(
                        "{} is not in the domain {} of {}",
                        subject.as_str(),
                        domain.as_str(),
                        property.as_str()
                    )));
                }
            }

            // range
            if let Some(range) = self.schema.property_range(property.as_ref()) {
                for entry in entries {
                    let Term::NamedNode(object) = &entry.object else {
                        return Err(Error::invalid(format!(
                            "{} expects a resource value",
                            property.as_str()
                        )));
                    };
                    let types = self.effective_types(object, batch_types)?;
                    let ok = types
                        .iter()
                        .any(|t| self.schema.is_child_of(t.as_ref(), range.as_ref()));
                    if !ok {
                        return Err(Error::invalid(format!(
                            "{} is not in the range {} of {}",
                            object.as_str(),
                            range.as_str(),
                            property.as_str()
                        )));
                    }
                }
            } else if let Some(target) = self.schema.literal_range_type(property.as_ref()) {
                for entry in entries {
                    let Term::Literal(lit) = &entry.object else {
                        return Err(Error::invalid(format!(
                            "{} expects a literal value",
                            property.as_str()
                        )));
                    };
                    let dt = lit.datatype();
                    let ok = dt == target.as_ref()
                        || (target.as_ref() == rdfs::LITERAL)
                        || (target.as_ref() == xsd::STRING && dt == xsd::STRING)
                        || (target.as_ref() == xsd::DURATION && dt == xsd::UNSIGNED_INT);
                    if !ok {
                        return Err(Error::invalid(format!(
                            "literal of type {} does not match range {} of {}",
                            dt.as_str(),
                            target.as_str(),
                            property.as_str()
                        )));
                    }
                }
            }
        }
        let mut index = 0;
        planned.retain(|_| {
            let keep = !skip.contains(&index);
            index += 1;
            keep
        });
        Ok(removals)
    }

    /// Declared batch types plus whatever the store already knows.
    fn effective_types(
        &self,
        uri: &NamedNode,
        batch_types: &HashMap<NamedNode, Vec<NamedNode>>,
    ) -> Result<Vec<NamedNode>> {
        let mut types: Vec<NamedNode> = batch_types.get(uri).cloned().unwrap_or_default();
        for quad in
            self.store
                .quads_for_pattern(Some(uri.as_ref().into()), Some(rdf::TYPE), None, None)
        {
            let quad = quad?;
            if let Term::NamedNode(t) = quad.object {
                if !types.contains(&t) {
                    types.push(t);
                }
            }
        }
        Ok(types)
    }

    fn existing_values(&self, subject: &NamedNode, property: &NamedNode) -> Result<Vec<Term>> {
        let mut out = Vec::new();
        for quad in self.store.quads_for_pattern(
            Some(subject.as_ref().into()),
            Some(property.as_ref()),
            None,
            None,
        ) {
            let quad = quad?;
            if !out.contains(&quad.object) {
                out.push(quad.object);
            }
        }
        Ok(out)
    }

    fn existing_quads(&self, subject: &NamedNode, property: &NamedNode) -> Result<Vec<Quad>> {
        self.store
            .quads_for_pattern(
                Some(subject.as_ref().into()),
                Some(property.as_ref()),
                None,
                None,
            )
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// The canonical URL stays unique across resources, against the store
    /// and within the batch itself.
    fn check_url_conflicts(
        &self,
        planned: &[Planned],
        mappings: &HashMap<ResourceId, NamedNode>,
    ) -> Result<()> {
        let mapped: HashSet<&NamedNode> = mappings.values().collect();
        let mut claimed: HashMap<&NamedNode, &NamedNode> = HashMap::new();
        for p in planned {
            if p.property.as_ref() != consts::NIE_URL {
                continue;
            }
            let Term::NamedNode(url) = &p.object else {
                return Err(Error::invalid("the canonical URL must be a URL"));
            };
            match claimed.get(url) {
                Some(prior) if *prior != &p.subject => {
                    return Err(Error::conflict(format!(
                        "{} and {} both claim the URL {}",
                        prior.as_str(),
                        p.subject.as_str(),
                        url.as_str()
                    )));
                }
                _ => {
                    claimed.insert(url, &p.subject);
                }
            }
            for quad in self.store.quads_for_pattern(
                None,
                Some(consts::NIE_URL),
                Some(url.as_ref().into()),
                None,
            ) {
                let quad = quad?;
                if let Subject::NamedNode(holder) = &quad.subject {
                    if holder != &p.subject && !mapped.contains(holder) {
                        return Err(Error::conflict(format!(
                            "{} already holds the URL {}",
                            holder.as_str(),
                            url.as_str()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn write(
        &self,
        planned: Vec<Planned>,
        removals: Vec<Quad>,
        created: &HashSet<NamedNode>,
        batch_types: &HashMap<NamedNode, Vec<NamedNode>>,
    ) -> Result<()> {
        let app_graph = self.registry.fetch_graph(self.store, self.app, self.discardable)?;
        let now = Utc::now();

        // timestamps provided by the caller override the write clock
        let mut provided_created: HashMap<NamedNode, Literal> = HashMap::new();
        let mut provided_modified: HashMap<NamedNode, Literal> = HashMap::new();

        let mut removed_by_pair: HashMap<(NamedNode, NamedNode), Vec<Term>> = HashMap::new();
        let mut touched_graphs: Vec<NamedNode> = Vec::new();
        for quad in removals {
            self.store.remove(quad.as_ref())?;
            if let oxigraph::model::GraphName::NamedNode(g) = &quad.graph_name {
                if !touched_graphs.contains(g) {
                    touched_graphs.push(g.clone());
                }
            }
            if let Subject::NamedNode(s) = quad.subject {
                removed_by_pair
                    .entry((s, quad.predicate))
                    .or_default()
                    .push(quad.object);
            }
        }

        let mut added_by_pair: HashMap<(NamedNode, NamedNode), Vec<Term>> = HashMap::new();
        let mut affected: HashSet<NamedNode> = HashSet::new();
        for p in planned {
            if p.property.as_ref() == consts::NAO_CREATED {
                if let Term::Literal(lit) = &p.object {
                    provided_created.insert(p.subject.clone(), lit.clone());
                }
                continue;
            }
            if p.property.as_ref() == consts::NAO_LAST_MODIFIED {
                if let Term::Literal(lit) = &p.object {
                    provided_modified.insert(p.subject.clone(), lit.clone());
                }
                continue;
            }
            let graph = if p.system {
                consts::SYSTEM_GRAPH.into_owned()
            } else {
                app_graph.clone()
            };
            // values already present anywhere are reused, not duplicated
            let present = self
                .store
                .quads_for_pattern(
                    Some(p.subject.as_ref().into()),
                    Some(p.property.as_ref()),
                    Some(p.object.as_ref()),
                    None,
                )
                .next()
                .transpose()?
                .is_some();
            if present {
                continue;
            }
            self.store.insert(
                Quad::new(
                    p.subject.clone(),
                    p.property.clone(),
                    p.object.clone(),
                    graph,
                )
                .as_ref(),
            )?;
            affected.insert(p.subject.clone());
            added_by_pair
                .entry((p.subject, p.property))
                .or_default()
                .push(p.object);
        }
        affected.extend(removed_by_pair.keys().map(|(s, _)| s.clone()));

        // resource metadata
        for uri in &affected {
            if let Some(lit) = provided_created.get(uri) {
                if let Some(ts) = parse_datetime(lit) {
                    crate::util::ensure_created(self.store, uri.as_ref(), ts)?;
                }
            }
            match provided_modified.get(uri).and_then(parse_datetime) {
                Some(ts) => touch_resource(self.store, uri.as_ref(), ts)?,
                None => touch_resource(self.store, uri.as_ref(), now)?,
            }
        }

        self.registry
            .remove_trailing_graphs(self.store, &touched_graphs)?;

        // notification, after every write of the request has been issued
        for uri in created {
            if !affected.contains(uri) {
                continue;
            }
            let mut closure: Vec<NamedNode> = batch_types.get(uri).cloned().unwrap_or_default();
            for t in closure.clone() {
                for parent in self.schema.all_parents(t.as_ref()) {
                    if !closure.contains(&parent) {
                        closure.push(parent);
                    }
                }
            }
            debug!("created {} with {} types", uri.as_str(), closure.len());
            self.watcher.resource_created(uri, &closure);
        }
        let mut pairs: HashSet<(NamedNode, NamedNode)> = added_by_pair.keys().cloned().collect();
        pairs.extend(removed_by_pair.keys().cloned());
        for (subject, property) in pairs {
            if created.contains(&subject) {
                continue;
            }
            let added = added_by_pair
                .remove(&(subject.clone(), property.clone()))
                .unwrap_or_default();
            let removed = removed_by_pair
                .remove(&(subject.clone(), property.clone()))
                .unwrap_or_default();
            let types = if self.watcher.has_type_watches() || property.as_ref() == rdf::TYPE {
                self.effective_types(&subject, batch_types)?
            } else {
                Vec::new()
            };
            self.watcher
                .change_property(&subject, &types, &property, &added, &removed);
        }
        Ok(())
    }
}
