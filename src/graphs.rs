//! The graph and application registry. Every write is tagged with a named
//! graph owned by the calling application; each graph is paired with a
//! metadata graph describing its kind, owner, and creation time.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use log::debug;
use oxigraph::model::vocab::rdf;
use oxigraph::model::{NamedNode, NamedNodeRef, QuadRef, Subject, Term, TermRef};
use oxigraph::store::Store;

use crate::consts;
use crate::errors::Result;
use crate::resolver::{fresh_graph_uri, fresh_resource_uri};
use crate::util::datetime_literal;

// the lookup caches are tiny; wholesale clearing on overflow keeps them
// bounded without LRU bookkeeping
const CACHE_LIMIT: usize = 32;

#[derive(Debug, Default)]
pub struct GraphRegistry {
    graph_cache: Mutex<HashMap<(String, bool), NamedNode>>,
    agent_cache: Mutex<HashMap<String, NamedNode>>,
}

impl GraphRegistry {
    pub fn new() -> GraphRegistry {
        GraphRegistry::default()
    }

    /// Required after an ontology rebuild.
    pub fn clear_cache(&self) {
        self.graph_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.agent_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// The agent resource for an application identifier, created lazily.
    pub fn find_agent(&self, store: &Store, app: &str) -> Result<NamedNode> {
        {
            let cache = self.agent_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(agent) = cache.get(app) {
                return Ok(agent.clone());
            }
        }
        let agent = match self.query_agent(store, app)? {
            Some(agent) => agent,
            None => self.create_agent(store, app)?,
        };
        let mut cache = self.agent_cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(app.to_string(), agent.clone());
        Ok(agent)
    }

    fn query_agent(&self, store: &Store, app: &str) -> Result<Option<NamedNode>> {
        let ident = oxigraph::model::Literal::new_simple_literal(app);
        for quad in store.quads_for_pattern(
            None,
            Some(consts::NAO_IDENTIFIER),
            Some(ident.as_ref().into()),
            None,
        ) {
            let quad = quad?;
            let Subject::NamedNode(candidate) = quad.subject else {
                continue;
            };
            let is_agent = store
                .quads_for_pattern(
                    Some(candidate.as_ref().into()),
                    Some(rdf::TYPE),
                    Some(TermRef::NamedNode(consts::NAO_AGENT)),
                    None,
                )
                .next()
                .transpose()?
                .is_some();
            if is_agent {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn create_agent(&self, store: &Store, app: &str) -> Result<NamedNode> {
        let agent = fresh_resource_uri(store)?;
        debug!("creating agent {} for application {app}", agent.as_str());
        let g = consts::SYSTEM_GRAPH;
        store.insert(QuadRef::new(
            agent.as_ref(),
            rdf::TYPE,
            TermRef::NamedNode(consts::NAO_AGENT),
            g,
        ))?;
        let ident = oxigraph::model::Literal::new_simple_literal(app);
        store.insert(QuadRef::new(
            agent.as_ref(),
            consts::NAO_IDENTIFIER,
            ident.as_ref(),
            g,
        ))?;
        let now: Term = datetime_literal(Utc::now()).into();
        store.insert(QuadRef::new(
            agent.as_ref(),
            consts::NAO_CREATED,
            now.as_ref(),
            g,
        ))?;
        Ok(agent)
    }

    /// A writable graph owned by the application, of the requested kind.
    /// Created together with its metadata graph on first use.
    pub fn fetch_graph(&self, store: &Store, app: &str, discardable: bool) -> Result<NamedNode> {
        let key = (app.to_string(), discardable);
        {
            let cache = self.graph_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(g) = cache.get(&key) {
                return Ok(g.clone());
            }
        }
        let agent = self.find_agent(store, app)?;
        let kind = if discardable {
            consts::NRL_DISCARDABLE_INSTANCE_BASE
        } else {
            consts::NRL_INSTANCE_BASE
        };
        let graph = match self.query_graph(store, agent.as_ref(), kind)? {
            Some(g) => g,
            None => self.create_graph(store, agent.as_ref(), kind)?,
        };
        let mut cache = self.graph_cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, graph.clone());
        Ok(graph)
    }

    fn query_graph(
        &self,
        store: &Store,
        agent: NamedNodeRef<'_>,
        kind: NamedNodeRef<'_>,
    ) -> Result<Option<NamedNode>> {
        for quad in store.quads_for_pattern(
            None,
            Some(consts::NAO_MAINTAINED_BY),
            Some(TermRef::NamedNode(agent)),
            None,
        ) {
            let quad = quad?;
            let Subject::NamedNode(candidate) = quad.subject else {
                continue;
            };
            let matches_kind = store
                .quads_for_pattern(
                    Some(candidate.as_ref().into()),
                    Some(rdf::TYPE),
                    Some(TermRef::NamedNode(kind)),
                    Some(quad.graph_name.as_ref()),
                )
                .next()
                .transpose()?
                .is_some();
            if matches_kind {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Writes a graph / metadata-graph pair.
    pub fn create_graph(
        &self,
        store: &Store,
        agent: NamedNodeRef<'_>,
        kind: NamedNodeRef<'_>,
    ) -> Result<NamedNode> {
        let graph = fresh_graph_uri(store)?;
        let meta = fresh_graph_uri(store)?;
        debug!(
            "creating graph {} (metadata {}) of kind {}",
            graph.as_str(),
            meta.as_str(),
            kind.as_str()
        );
        let m = meta.as_ref();
        store.insert(QuadRef::new(
            m,
            rdf::TYPE,
            TermRef::NamedNode(consts::NRL_GRAPH_METADATA),
            m,
        ))?;
        store.insert(QuadRef::new(
            m,
            consts::NRL_CORE_GRAPH_METADATA_FOR,
            TermRef::NamedNode(graph.as_ref()),
            m,
        ))?;
        store.insert(QuadRef::new(
            graph.as_ref(),
            rdf::TYPE,
            TermRef::NamedNode(kind),
            m,
        ))?;
        let now: Term = datetime_literal(Utc::now()).into();
        store.insert(QuadRef::new(
            graph.as_ref(),
            consts::NAO_CREATED,
            now.as_ref(),
            m,
        ))?;
        store.insert(QuadRef::new(
            graph.as_ref(),
            consts::NAO_MAINTAINED_BY,
            TermRef::NamedNode(agent),
            m,
        ))?;
        Ok(graph)
    }

    /// The metadata graph describing a graph, when there is one.
    pub fn metadata_graph(&self, store: &Store, graph: NamedNodeRef<'_>) -> Result<Option<NamedNode>> {
        for quad in store.quads_for_pattern(
            None,
            Some(consts::NRL_CORE_GRAPH_METADATA_FOR),
            Some(TermRef::NamedNode(graph)),
            None,
        ) {
            let quad = quad?;
            if let Subject::NamedNode(m) = quad.subject {
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    /// Every content graph maintained by the given application.
    pub fn application_graphs(&self, store: &Store, app: &str) -> Result<Vec<NamedNode>> {
        let Some(agent) = self.query_agent(store, app)? else {
            return Ok(Vec::new());
        };
        let mut graphs = Vec::new();
        for quad in store.quads_for_pattern(
            None,
            Some(consts::NAO_MAINTAINED_BY),
            Some(agent.as_ref().into()),
            None,
        ) {
            let quad = quad?;
            if let Subject::NamedNode(g) = quad.subject {
                if !graphs.contains(&g) {
                    graphs.push(g);
                }
            }
        }
        Ok(graphs)
    }

    pub fn is_discardable(&self, store: &Store, graph: NamedNodeRef<'_>) -> Result<bool> {
        Ok(store
            .quads_for_pattern(
                Some(graph.into()),
                Some(rdf::TYPE),
                Some(TermRef::NamedNode(consts::NRL_DISCARDABLE_INSTANCE_BASE)),
                None,
            )
            .next()
            .transpose()?
            .is_some())
    }

    pub fn is_ontology_graph(&self, store: &Store, graph: NamedNodeRef<'_>) -> Result<bool> {
        Ok(store
            .quads_for_pattern(
                Some(graph.into()),
                Some(rdf::TYPE),
                Some(TermRef::NamedNode(consts::NRL_ONTOLOGY)),
                None,
            )
            .next()
            .transpose()?
            .is_some())
    }

    /// Clears the metadata of graphs that lost their last content statement.
    pub fn remove_trailing_graphs(&self, store: &Store, candidates: &[NamedNode]) -> Result<()> {
        for graph in candidates {
            if graph.as_ref() == consts::SYSTEM_GRAPH {
                continue;
            }
            let has_content = store
                .quads_for_pattern(None, None, None, Some(graph.as_ref().into()))
                .next()
                .transpose()?
                .is_some();
            if has_content {
                continue;
            }
            if let Some(meta) = self.metadata_graph(store, graph.as_ref())? {
                debug!("clearing trailing graph {}", graph.as_str());
                store.remove_named_graph(meta.as_ref())?;
            }
            let mut cache = self.graph_cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.retain(|_, g| g != graph);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_is_created_once() {
        let store = Store::new().unwrap();
        let reg = GraphRegistry::new();
        let a1 = reg.find_agent(&store, "appA").unwrap();
        let a2 = reg.find_agent(&store, "appA").unwrap();
        assert_eq!(a1, a2);
        let other = reg.find_agent(&store, "appB").unwrap();
        assert_ne!(a1, other);
    }

    #[test]
    fn graph_pair_is_created_and_reused() {
        let store = Store::new().unwrap();
        let reg = GraphRegistry::new();
        let g1 = reg.fetch_graph(&store, "appA", false).unwrap();
        let g2 = reg.fetch_graph(&store, "appA", false).unwrap();
        assert_eq!(g1, g2);
        // survives a cache clear because the store is queried
        reg.clear_cache();
        let g3 = reg.fetch_graph(&store, "appA", false).unwrap();
        assert_eq!(g1, g3);
        // the discardable graph is distinct
        let gd = reg.fetch_graph(&store, "appA", true).unwrap();
        assert_ne!(g1, gd);
        assert!(reg.is_discardable(&store, gd.as_ref()).unwrap());
        assert!(!reg.is_discardable(&store, g1.as_ref()).unwrap());
        // metadata pair exists
        let meta = reg.metadata_graph(&store, g1.as_ref()).unwrap();
        assert!(meta.is_some());
    }

    #[test]
    fn trailing_graphs_lose_their_metadata() {
        let store = Store::new().unwrap();
        let reg = GraphRegistry::new();
        let g = reg.fetch_graph(&store, "appA", false).unwrap();
        // graph has no content statements, so it is trailing
        reg.remove_trailing_graphs(&store, &[g.clone()]).unwrap();
        assert!(reg.metadata_graph(&store, g.as_ref()).unwrap().is_none());
    }
}
