//! Resource identification: given a partial description, decide whether a
//! persistent resource in the store represents the same entity. Used by the
//! storeResources pipeline and by import.

use std::collections::{HashMap, HashSet};

use log::debug;
use oxigraph::model::vocab::rdf;
use oxigraph::model::{NamedNode, Term};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

use crate::consts;
use crate::errors::{Error, Result};
use crate::options::IdentificationMode;
use crate::resource::{PropValue, ResourceId, SimpleResource, SimpleResourceGraph};
use crate::schema::SchemaTree;
use crate::util::parse_datetime;

/// Hook consulted when identification finds more than one equally good
/// candidate.
pub trait DuplicateResolver {
    fn duplicate_match(
        &self,
        store: &Store,
        candidates: &[NamedNode],
        description: &SimpleResource,
    ) -> Result<Option<NamedNode>>;
}

/// The base behavior: an ambiguous match fails identification.
pub struct FailOnDuplicate;

impl DuplicateResolver for FailOnDuplicate {
    fn duplicate_match(
        &self,
        _store: &Store,
        candidates: &[NamedNode],
        description: &SimpleResource,
    ) -> Result<Option<NamedNode>> {
        debug!(
            "ambiguous identification of {}: {} candidates",
            description.id,
            candidates.len()
        );
        Ok(None)
    }
}

/// The engine's tiebreak: the candidate that has existed longest wins.
pub struct OldestCreatedWins;

impl DuplicateResolver for OldestCreatedWins {
    fn duplicate_match(
        &self,
        store: &Store,
        candidates: &[NamedNode],
        _description: &SimpleResource,
    ) -> Result<Option<NamedNode>> {
        let mut best: Option<(chrono::DateTime<chrono::Utc>, NamedNode)> = None;
        for cand in candidates {
            for quad in store.quads_for_pattern(
                Some(cand.as_ref().into()),
                Some(consts::NAO_CREATED),
                None,
                None,
            ) {
                let quad = quad?;
                let Term::Literal(lit) = &quad.object else {
                    continue;
                };
                let Some(created) = parse_datetime(lit) else {
                    continue;
                };
                let better = match &best {
                    Some((ts, _)) => created < *ts,
                    None => true,
                };
                if better {
                    best = Some((created, cand.clone()));
                }
            }
        }
        Ok(best.map(|(_, uri)| uri))
    }
}

pub struct ResourceIdentifier<'a> {
    store: &'a Store,
    schema: &'a SchemaTree,
    mode: IdentificationMode,
    duplicates: &'a dyn DuplicateResolver,
    mappings: HashMap<ResourceId, NamedNode>,
    being_identified: HashSet<ResourceId>,
}

impl<'a> ResourceIdentifier<'a> {
    pub fn new(
        store: &'a Store,
        schema: &'a SchemaTree,
        mode: IdentificationMode,
        duplicates: &'a dyn DuplicateResolver,
    ) -> ResourceIdentifier<'a> {
        ResourceIdentifier {
            store,
            schema,
            mode,
            duplicates,
            mappings: HashMap::new(),
            being_identified: HashSet::new(),
        }
    }

    /// Runs identification over every blank resource in the batch and
    /// returns the discovered identity mappings.
    pub fn identify_all(
        mut self,
        graph: &SimpleResourceGraph,
    ) -> Result<HashMap<ResourceId, NamedNode>> {
        if self.mode == IdentificationMode::IdentifyNone {
            return Ok(self.mappings);
        }
        let ids: Vec<ResourceId> = graph
            .iter()
            .filter(|r| r.id.is_blank())
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            self.identify(graph, &id)?;
        }
        Ok(self.mappings)
    }

    fn identify(
        &mut self,
        graph: &SimpleResourceGraph,
        id: &ResourceId,
    ) -> Result<Option<NamedNode>> {
        if let Some(found) = self.mappings.get(id) {
            return Ok(Some(found.clone()));
        }
        // re-entry through a reference cycle is suppressed
        if !self.being_identified.insert(id.clone()) {
            return Ok(None);
        }
        let result = match graph.get(id) {
            Some(res) => self.identify_one(graph, res)?,
            None => None,
        };
        self.being_identified.remove(id);
        if let Some(uri) = &result {
            debug!("identified {id} as {}", uri.as_str());
            self.mappings.insert(id.clone(), uri.clone());
        }
        Ok(result)
    }

    fn identify_one(
        &mut self,
        graph: &SimpleResourceGraph,
        res: &SimpleResource,
    ) -> Result<Option<NamedNode>> {
        // identification is meaningless without types
        let types = res.types();
        if types.is_empty() {
            return Ok(None);
        }
        // data objects represent concrete byte streams; two files with the
        // same metadata are still two files
        if types
            .iter()
            .any(|t| self.schema.is_child_of(t.as_ref(), consts::NIE_DATA_OBJECT))
        {
            return Ok(None);
        }

        let pairs = self.identifying_pairs(graph, res)?;
        if pairs.is_empty() {
            return Ok(None);
        }

        let candidates = self.query_candidates(&pairs)?;
        let mut scored: Vec<(NamedNode, usize)> = Vec::new();
        'cand: for cand in candidates {
            // every required type must be present, directly or via a subtype
            let cand_types = self.stored_types(&cand)?;
            for required in &types {
                let ok = cand_types.iter().any(|ct| {
                    ct == required || self.schema.is_child_of(ct.as_ref(), required.as_ref())
                });
                if !ok {
                    continue 'cand;
                }
            }
            let score = self.score(&cand, &pairs)?;
            if score > 0 {
                scored.push((cand, score));
            }
        }
        let best = scored.iter().map(|(_, s)| *s).max().unwrap_or(0);
        let winners: Vec<NamedNode> = scored
            .into_iter()
            .filter(|(_, s)| *s == best)
            .map(|(c, _)| c)
            .collect();
        match winners.len() {
            0 => Ok(None),
            1 => Ok(winners.into_iter().next()),
            _ => self.duplicates.duplicate_match(self.store, &winners, res),
        }
    }

    /// The identifying property-value pairs of a description. Values that
    /// are themselves unidentified batch members are identified first; a
    /// pair whose value cannot be pinned down is skipped.
    fn identifying_pairs(
        &mut self,
        graph: &SimpleResourceGraph,
        res: &SimpleResource,
    ) -> Result<Vec<(NamedNode, Term)>> {
        let mut pairs = Vec::new();
        for (prop, value) in &res.properties {
            if prop.as_ref() == rdf::TYPE {
                continue;
            }
            if !self.schema.is_identifying_property(prop.as_ref()) {
                continue;
            }
            let term: Term = match value {
                PropValue::Literal(lit) => lit.clone().into(),
                PropValue::Ref(ResourceId::Uri(uri)) => uri.clone().into(),
                PropValue::Ref(blank @ ResourceId::Blank(_)) => {
                    match self.identify(graph, blank)? {
                        Some(uri) => uri.into(),
                        None => continue,
                    }
                }
            };
            pairs.push((prop.clone(), term));
        }
        Ok(pairs)
    }

    /// Candidates matching at least one identifying pair; partial matches
    /// are acceptable and simply score lower.
    fn query_candidates(&self, pairs: &[(NamedNode, Term)]) -> Result<Vec<NamedNode>> {
        let patterns: Vec<String> = pairs
            .iter()
            .map(|(p, t)| format!("{{ ?r <{}> {t} . }}", p.as_str()))
            .collect();
        let query = format!(
            "SELECT DISTINCT ?r WHERE {{ {} }} LIMIT 100",
            patterns.join(" UNION ")
        );
        let mut out = Vec::new();
        if let QueryResults::Solutions(solutions) = self.store.query(&query)? {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::internal(e.to_string()))?;
                if let Some(Term::NamedNode(r)) = solution.get("r") {
                    out.push(r.clone());
                }
            }
        }
        Ok(out)
    }

    fn stored_types(&self, uri: &NamedNode) -> Result<Vec<NamedNode>> {
        let mut types = Vec::new();
        for quad in
            self.store
                .quads_for_pattern(Some(uri.as_ref().into()), Some(rdf::TYPE), None, None)
        {
            let quad = quad?;
            if let Term::NamedNode(t) = quad.object {
                types.push(t);
            }
        }
        Ok(types)
    }

    fn score(&self, cand: &NamedNode, pairs: &[(NamedNode, Term)]) -> Result<usize> {
        let mut score = 0;
        for (prop, term) in pairs {
            let matched = self
                .store
                .quads_for_pattern(
                    Some(cand.as_ref().into()),
                    Some(prop.as_ref()),
                    Some(term.as_ref()),
                    None,
                )
                .next()
                .transpose()?
                .is_some();
            if matched {
                score += 1;
            }
        }
        Ok(score)
    }
}
