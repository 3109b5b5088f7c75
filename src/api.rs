//! The data-management engine: every public operation validates its input
//! against the loaded schema, writes through the application graph registry,
//! maintains resource metadata in the system graph, and feeds the watcher.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use log::{debug, info};
use oxigraph::io::RdfFormat;
use oxigraph::model::vocab::{rdf, rdfs};
use oxigraph::model::{
    BlankNode, NamedNode, NamedNodeRef, Quad, QuadRef, Subject, Term, TermRef, Triple,
};
use oxigraph::store::Store;
use url::Url;

use crate::config::Config;
use crate::consts;
use crate::errors::{Error, Result};
use crate::graphs::GraphRegistry;
use crate::identifier::{OldestCreatedWins, ResourceIdentifier};
use crate::merger::ResourceMerger;
use crate::options::{DescribeFlags, IdentificationMode, RemovalFlags, StoreFlags};
use crate::resolver::{self, UriResolver};
use crate::resource::{PropValue, ResourceId, SimpleResource, SimpleResourceGraph};
use crate::schema::SchemaTree;
use crate::util::{fetch_rdf, read_rdf_file, serialize_triples, touch_resource};
use crate::variant::{Scalar, Variant};
use crate::watcher::{Subscription, WatchId, WatcherHub};

/// Graph kinds; a resource typed as one of these is engine-owned and never a
/// valid target of a client write.
const GRAPH_KINDS: [NamedNodeRef<'_>; 5] = [
    consts::NRL_GRAPH,
    consts::NRL_INSTANCE_BASE,
    consts::NRL_DISCARDABLE_INSTANCE_BASE,
    consts::NRL_GRAPH_METADATA,
    consts::NRL_ONTOLOGY,
];

pub struct Engine {
    store: Store,
    config: Config,
    schema: SchemaTree,
    registry: GraphRegistry,
    watcher: WatcherHub,
    resolver: UriResolver,
}

impl Engine {
    /// Opens (or creates) the store described by the configuration, loads
    /// the schema, and bootstraps the engine-owned resources on first start.
    pub fn new(config: Config) -> Result<Engine> {
        let store = match &config.store_path {
            Some(path) => {
                info!("opening store at {}", path.display());
                Store::open(path)?
            }
            None => Store::new()?,
        };
        let engine = Engine {
            schema: SchemaTree::new(),
            registry: GraphRegistry::new(),
            watcher: WatcherHub::new(config.watch_queue_capacity),
            resolver: UriResolver::new(config.stat_local_files),
            store,
            config,
        };
        engine.schema.rebuild(&engine.store)?;
        engine.bootstrap()?;
        Ok(engine)
    }

    fn bootstrap(&self) -> Result<()> {
        let tagged = self
            .store
            .quads_for_pattern(
                Some(consts::SYSTEM_GRAPH.into()),
                Some(rdf::TYPE),
                None,
                Some(consts::SYSTEM_GRAPH.into()),
            )
            .next()
            .transpose()?
            .is_some();
        if !tagged {
            self.store.insert(QuadRef::new(
                consts::SYSTEM_GRAPH,
                rdf::TYPE,
                TermRef::NamedNode(consts::NRL_GRAPH),
                consts::SYSTEM_GRAPH,
            ))?;
        }
        if !resolver::resource_exists(&self.store, consts::ME)? {
            info!("first start, creating the owner resource");
            self.store.insert(QuadRef::new(
                consts::ME,
                rdf::TYPE,
                TermRef::NamedNode(consts::PIMO_PERSON),
                consts::SYSTEM_GRAPH,
            ))?;
            touch_resource(&self.store, consts::ME, Utc::now())?;
        }
        Ok(())
    }

    /// Direct access to the underlying store, mainly for loading ontologies
    /// and for tests.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &SchemaTree {
        &self.schema
    }

    pub fn watcher(&self) -> &WatcherHub {
        &self.watcher
    }

    /// Re-reads the class and property definitions from the store. Required
    /// after ontologies change.
    pub fn rebuild_schema(&self) -> Result<()> {
        self.schema.rebuild(&self.store)?;
        self.registry.clear_cache();
        Ok(())
    }

    /// Registers a change watch. Empty filter lists match everything.
    pub fn watch(
        &self,
        resources: &[&str],
        properties: &[&str],
        types: &[&str],
    ) -> Result<Subscription> {
        Ok(self.watcher.subscribe(
            parse_nodes(resources)?,
            parse_nodes(properties)?,
            parse_nodes(types)?,
        ))
    }

    pub fn unwatch(&self, id: WatchId) {
        self.watcher.unsubscribe(id);
    }

    /// Adds values to a property of each resource. Values already present
    /// are skipped without an event; exceeding the property's maximum
    /// cardinality fails the whole call.
    pub fn add_property(
        &self,
        resources: &[&str],
        property: &str,
        values: &[Variant],
        app: &str,
    ) -> Result<()> {
        self.check_args(resources, app)?;
        if values.is_empty() {
            return Err(Error::invalid("no values given"));
        }
        let property = NamedNode::new(property)?;
        self.check_property_target(property.as_ref())?;
        if property.as_ref() == consts::NIE_URL {
            return self.attach_url(resources, values, app, false);
        }
        let terms = self.terms_for_property(&property, values, true)?;
        let targets = self.resolve_or_create(resources)?;
        let max = self.schema.max_cardinality(property.as_ref());

        for uri in &targets {
            self.check_resource_target(uri.as_ref())?;
            let current: HashSet<Term> = self
                .property_quads(uri, &property)?
                .into_iter()
                .map(|q| q.object)
                .collect();
            let added: Vec<Term> = terms
                .iter()
                .filter(|t| !current.contains(*t))
                .cloned()
                .collect();
            if max > 0 && current.len() + added.len() > max as usize {
                return Err(Error::invalid(format!(
                    "{} would exceed the max cardinality {max} of {}",
                    uri.as_str(),
                    property.as_str()
                )));
            }
            if added.is_empty() {
                continue;
            }
            let g = self.registry.fetch_graph(&self.store, app, false)?;
            for t in &added {
                self.store.insert(QuadRef::new(
                    uri.as_ref(),
                    property.as_ref(),
                    t.as_ref(),
                    g.as_ref(),
                ))?;
            }
            self.touch(uri)?;
            self.notify(uri, &property, &added, &[])?;
        }
        Ok(())
    }

    /// Replaces the values of a property on each resource. An empty value
    /// list removes the property; otherwise the stored values are diffed
    /// against the new set and only the difference is written.
    pub fn set_property(
        &self,
        resources: &[&str],
        property: &str,
        values: &[Variant],
        app: &str,
    ) -> Result<()> {
        self.check_args(resources, app)?;
        let property = NamedNode::new(property)?;
        self.check_property_target(property.as_ref())?;
        if values.is_empty() {
            self.check_property_removable(property.as_ref())?;
            return self.remove_values(resources, &[(property, None)]);
        }
        if property.as_ref() == consts::NIE_URL {
            return self.attach_url(resources, values, app, true);
        }
        let terms = self.terms_for_property(&property, values, true)?;
        let max = self.schema.max_cardinality(property.as_ref());
        if max > 0 && terms.len() > max as usize {
            return Err(Error::invalid(format!(
                "{} values for {} exceed the max cardinality {max}",
                terms.len(),
                property.as_str()
            )));
        }
        let targets = self.resolve_or_create(resources)?;
        let mut touched_graphs: Vec<NamedNode> = Vec::new();

        for uri in &targets {
            self.check_resource_target(uri.as_ref())?;
            let current = self.property_quads(uri, &property)?;
            let new_set: HashSet<&Term> = terms.iter().collect();
            let mut removed = Vec::new();
            for quad in &current {
                if !new_set.contains(&quad.object) {
                    self.store.remove(quad.as_ref())?;
                    push_graph(&mut touched_graphs, quad);
                    removed.push(quad.object.clone());
                }
            }
            let current_set: HashSet<Term> = current.into_iter().map(|q| q.object).collect();
            let added: Vec<Term> = terms
                .iter()
                .filter(|t| !current_set.contains(*t))
                .cloned()
                .collect();
            if added.is_empty() && removed.is_empty() {
                continue;
            }
            let g = self.registry.fetch_graph(&self.store, app, false)?;
            for t in &added {
                self.store.insert(QuadRef::new(
                    uri.as_ref(),
                    property.as_ref(),
                    t.as_ref(),
                    g.as_ref(),
                ))?;
            }
            self.touch(uri)?;
            self.notify(uri, &property, &added, &removed)?;
        }
        self.registry
            .remove_trailing_graphs(&self.store, &touched_graphs)?;
        Ok(())
    }

    /// Removes specific values from a property. Resources the store does not
    /// know are skipped silently.
    pub fn remove_property(
        &self,
        resources: &[&str],
        property: &str,
        values: &[Variant],
        app: &str,
    ) -> Result<()> {
        self.check_args(resources, app)?;
        if values.is_empty() {
            return Err(Error::invalid("no values given"));
        }
        let property = NamedNode::new(property)?;
        self.check_property_removable(property.as_ref())?;
        let terms = self.terms_for_property(&property, values, false)?;
        self.remove_values(resources, &[(property, Some(terms))])
    }

    /// Removes all values of the given properties from each resource.
    pub fn remove_properties(
        &self,
        resources: &[&str],
        properties: &[&str],
        app: &str,
    ) -> Result<()> {
        self.check_args(resources, app)?;
        if properties.is_empty() {
            return Err(Error::invalid("no properties given"));
        }
        let mut props = Vec::new();
        for p in properties {
            let property = NamedNode::new(*p)?;
            self.check_property_removable(property.as_ref())?;
            props.push((property, None));
        }
        self.remove_values(resources, &props)
    }

    /// Creates a fresh resource with the given types, and optionally a label
    /// and a description. Returns the new URI.
    pub fn create_resource(
        &self,
        types: &[&str],
        label: Option<&str>,
        description: Option<&str>,
        app: &str,
    ) -> Result<NamedNode> {
        if app.is_empty() {
            return Err(Error::invalid("no calling application given"));
        }
        let mut classes = Vec::new();
        for t in types {
            let class = NamedNode::new(*t)?;
            if !self.schema.is_known_class(class.as_ref()) && class.as_ref() != rdfs::RESOURCE {
                return Err(Error::invalid(format!("unknown class {}", class.as_str())));
            }
            classes.push(class);
        }
        let mut classes = self.schema.reduce_types(&classes);
        if classes.is_empty() {
            classes.push(rdfs::RESOURCE.into_owned());
        }

        let uri = resolver::fresh_resource_uri(&self.store)?;
        debug!("creating resource {} for {app}", uri.as_str());
        let g = self.registry.fetch_graph(&self.store, app, false)?;
        for class in &classes {
            self.store.insert(QuadRef::new(
                uri.as_ref(),
                rdf::TYPE,
                class.as_ref(),
                g.as_ref(),
            ))?;
        }
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            let lit = oxigraph::model::Literal::new_simple_literal(label);
            self.store.insert(QuadRef::new(
                uri.as_ref(),
                consts::NAO_PREF_LABEL,
                lit.as_ref(),
                g.as_ref(),
            ))?;
        }
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            let lit = oxigraph::model::Literal::new_simple_literal(description);
            self.store.insert(QuadRef::new(
                uri.as_ref(),
                consts::NAO_DESCRIPTION,
                lit.as_ref(),
                g.as_ref(),
            ))?;
        }
        self.touch(&uri)?;
        self.watcher
            .resource_created(&uri, &self.type_closure(&classes));
        Ok(uri)
    }

    /// Removes resources entirely: their statements, the statements
    /// referring to them, and their metadata. With the sub-resource flag,
    /// dependent resources that nothing else references go with them.
    pub fn remove_resources(
        &self,
        resources: &[&str],
        flags: RemovalFlags,
        app: &str,
    ) -> Result<()> {
        self.check_args(resources, app)?;
        let seeds = self.resolve_existing(resources)?;
        if seeds.is_empty() {
            return Ok(());
        }
        for uri in &seeds {
            self.check_resource_target(uri.as_ref())?;
        }
        let all = if flags.remove_sub_resources {
            self.expand_sub_resources(&seeds)?
        } else {
            seeds
        };
        let set: HashSet<NamedNode> = all.iter().cloned().collect();

        let mut touched_graphs: Vec<NamedNode> = Vec::new();
        // referrer -> property -> dangling values, for the post-removal events
        let mut modified: HashMap<NamedNode, HashMap<NamedNode, Vec<Term>>> = HashMap::new();
        for uri in &all {
            let types = self.event_types(uri)?;
            for quad in self.outgoing_quads(uri)? {
                self.store.remove(quad.as_ref())?;
                push_graph(&mut touched_graphs, &quad);
            }
            for quad in self.incoming_quads(uri)? {
                self.store.remove(quad.as_ref())?;
                push_graph(&mut touched_graphs, &quad);
                if let Subject::NamedNode(referrer) = &quad.subject {
                    if !set.contains(referrer) {
                        modified
                            .entry(referrer.clone())
                            .or_default()
                            .entry(quad.predicate.clone())
                            .or_default()
                            .push(quad.object.clone());
                    }
                }
            }
            debug!("removed resource {}", uri.as_str());
            self.watcher.resource_removed(uri, &types);
        }
        for (referrer, by_prop) in modified {
            self.touch(&referrer)?;
            for (property, removed) in by_prop {
                self.notify(&referrer, &property, &[], &removed)?;
            }
        }
        self.registry
            .remove_trailing_graphs(&self.store, &touched_graphs)?;
        Ok(())
    }

    /// Removes everything one application asserted, without touching other
    /// applications' statements. A resource whose data came exclusively from
    /// this application (and that nothing references) disappears entirely,
    /// metadata included; otherwise only the application's share goes and
    /// the resource is marked modified.
    pub fn remove_data_by_application(
        &self,
        resources: Option<&[&str]>,
        flags: RemovalFlags,
        app: &str,
    ) -> Result<()> {
        if app.is_empty() {
            return Err(Error::invalid("no calling application given"));
        }
        let app_graphs = self.registry.application_graphs(&self.store, app)?;
        if app_graphs.is_empty() {
            return Ok(());
        }
        let graph_set: HashSet<NamedNode> = app_graphs.iter().cloned().collect();

        let mut targets: Vec<NamedNode> = match resources {
            Some(list) => {
                self.check_args(list, app)?;
                self.resolve_existing(list)?
            }
            None => {
                let mut subjects = Vec::new();
                for g in &app_graphs {
                    for quad in self.store.quads_for_pattern(
                        None,
                        None,
                        None,
                        Some(g.as_ref().into()),
                    ) {
                        let quad = quad?;
                        if let Subject::NamedNode(s) = quad.subject {
                            if !subjects.contains(&s) {
                                subjects.push(s);
                            }
                        }
                    }
                }
                subjects
            }
        };
        if flags.remove_sub_resources {
            targets = self.expand_sub_resources(&targets)?;
        }

        for uri in &targets {
            let types = self.event_types(uri)?;
            let mut removed_by_prop: HashMap<NamedNode, Vec<Term>> = HashMap::new();
            for g in &app_graphs {
                for quad in self.store.quads_for_pattern(
                    Some(uri.as_ref().into()),
                    None,
                    None,
                    Some(g.as_ref().into()),
                ) {
                    let quad = quad?;
                    self.store.remove(quad.as_ref())?;
                    removed_by_prop
                        .entry(quad.predicate.clone())
                        .or_default()
                        .push(quad.object.clone());
                }
            }
            if removed_by_prop.is_empty() {
                continue;
            }
            // data left behind by other applications keeps the resource
            let mut has_other_data = false;
            for quad in self.outgoing_quads(uri)? {
                match &quad.graph_name {
                    oxigraph::model::GraphName::NamedNode(g) => {
                        if g.as_ref() != consts::SYSTEM_GRAPH && !graph_set.contains(g) {
                            has_other_data = true;
                            break;
                        }
                    }
                    _ => {
                        has_other_data = true;
                        break;
                    }
                }
            }
            let has_incoming = self
                .store
                .quads_for_pattern(None, None, Some(uri.as_ref().into()), None)
                .next()
                .transpose()?
                .is_some();
            if !has_other_data && !has_incoming {
                for quad in self.outgoing_quads(uri)? {
                    self.store.remove(quad.as_ref())?;
                }
                debug!("removed resource {} with its last application", uri.as_str());
                self.watcher.resource_removed(uri, &types);
            } else {
                self.touch(uri)?;
                for (property, removed) in removed_by_prop {
                    self.notify(uri, &property, &[], &removed)?;
                }
            }
        }
        self.registry
            .remove_trailing_graphs(&self.store, &app_graphs)?;
        Ok(())
    }

    /// Stores a batch of resource descriptions: external URLs are mapped to
    /// internal resources, blank descriptions are matched against existing
    /// resources, the batch is schema-validated as a whole, and the new
    /// statements land in the application's graph. Returns the identity each
    /// input description ended up with.
    pub fn store_resources(
        &self,
        mut graph: SimpleResourceGraph,
        app: &str,
        mode: IdentificationMode,
        flags: StoreFlags,
        discardable: bool,
    ) -> Result<HashMap<ResourceId, NamedNode>> {
        if app.is_empty() {
            return Err(Error::invalid("no calling application given"));
        }
        if graph.is_empty() {
            return Err(Error::invalid("no resources given"));
        }

        let subject_ids: HashSet<ResourceId> = graph.iter().map(|r| r.id.clone()).collect();
        // canonical-URL values stay raw URLs and are exempt from resolution
        let url_values: HashSet<ResourceId> = graph
            .iter()
            .flat_map(|r| r.properties.iter())
            .filter(|(p, _)| p.as_ref() == consts::NIE_URL)
            .filter_map(|(_, v)| v.as_ref_id().cloned())
            .collect();
        let mut all_ids: Vec<ResourceId> = graph.iter().map(|r| r.id.clone()).collect();
        for id in graph.referenced_ids() {
            if !all_ids.contains(&id) && !(url_values.contains(&id) && !subject_ids.contains(&id)) {
                all_ids.push(id);
            }
        }
        // external identifiers are normalized onto internal resources before
        // identification; the original ids stay valid keys in the result
        let mut renames: Vec<(ResourceId, ResourceId)> = Vec::new();
        for id in all_ids {
            let ResourceId::Uri(uri) = &id else { continue };
            match self.resolver.classify(&self.schema, uri.as_ref()) {
                resolver::UriState::NepomukUri | resolver::UriState::BlankUri => {}
                resolver::UriState::OntologyUri => {
                    if subject_ids.contains(&id) {
                        return Err(Error::invalid(format!(
                            "{} is a schema entity and cannot be written to",
                            uri.as_str()
                        )));
                    }
                }
                _ => {
                    if let Some(resolved) =
                        self.resolver
                            .resolve(&self.store, &self.schema, uri.as_ref(), true)?
                    {
                        if &resolved != uri {
                            let to = ResourceId::Uri(resolved);
                            graph.rewrite_id(&id, &to);
                            renames.push((id.clone(), to));
                        }
                    }
                }
            }
        }

        if flags.merge_duplicates {
            graph.merge_duplicates();
        }

        let tiebreak = OldestCreatedWins;
        let identifier = ResourceIdentifier::new(&self.store, &self.schema, mode, &tiebreak);
        let mappings = identifier.identify_all(&graph)?;

        let merger = ResourceMerger {
            store: &self.store,
            schema: &self.schema,
            registry: &self.registry,
            watcher: &self.watcher,
            app,
            flags,
            discardable,
        };
        let mut result = merger.merge(&graph, mappings)?;
        for (original, renamed) in renames {
            if let Some(uri) = result.get(&renamed).cloned() {
                result.insert(original, uri);
            }
        }
        Ok(result)
    }

    /// Merges duplicate resources into the first one: its data is kept,
    /// non-conflicting data from the others is copied over, references are
    /// redirected, and the duplicates disappear.
    pub fn merge_resources(&self, resources: &[&str], app: &str) -> Result<()> {
        self.check_args(resources, app)?;
        if resources.len() < 2 {
            return Err(Error::invalid("merging needs at least two resources"));
        }
        let mut resolved = Vec::new();
        for r in resources {
            let uri = NamedNode::new(*r)?;
            match self
                .resolver
                .resolve(&self.store, &self.schema, uri.as_ref(), false)?
            {
                Some(u) => {
                    if !resolved.contains(&u) {
                        resolved.push(u);
                    }
                }
                None => return Err(Error::not_found(format!("unknown resource {r}"))),
            }
        }
        if resolved.len() < 2 {
            return Err(Error::invalid("merging needs at least two distinct resources"));
        }
        let target = resolved[0].clone();
        self.check_resource_target(target.as_ref())?;
        let dups: Vec<NamedNode> = resolved.into_iter().skip(1).collect();
        let dup_set: HashSet<NamedNode> = dups.iter().cloned().collect();
        let mut touched_graphs: Vec<NamedNode> = Vec::new();

        for dup in &dups {
            self.check_resource_target(dup.as_ref())?;
            let dup_types = self.event_types(dup)?;
            // copy what the target can still take
            for quad in self.outgoing_quads(dup)? {
                let p = quad.predicate.as_ref();
                if consts::is_metadata_property(p) || p == consts::NIE_URL {
                    continue;
                }
                let max = self.schema.max_cardinality(p);
                if max > 0 {
                    let count = self.property_quads(&target, &quad.predicate)?.len();
                    if count >= max as usize {
                        continue;
                    }
                }
                let already = self
                    .store
                    .quads_for_pattern(
                        Some(target.as_ref().into()),
                        Some(p),
                        Some(quad.object.as_ref()),
                        None,
                    )
                    .next()
                    .transpose()?
                    .is_some();
                if already {
                    continue;
                }
                let copied = Quad::new(
                    target.clone(),
                    quad.predicate.clone(),
                    quad.object.clone(),
                    quad.graph_name.clone(),
                );
                self.store.insert(copied.as_ref())?;
                self.notify(
                    &target,
                    &quad.predicate,
                    std::slice::from_ref(&quad.object),
                    &[],
                )?;
            }
            // incoming references follow the merge
            for quad in self.incoming_quads(dup)? {
                self.store.remove(quad.as_ref())?;
                push_graph(&mut touched_graphs, &quad);
                let Subject::NamedNode(referrer) = &quad.subject else {
                    continue;
                };
                if referrer == &target || dup_set.contains(referrer) {
                    continue;
                }
                let redirected = Quad::new(
                    referrer.clone(),
                    quad.predicate.clone(),
                    target.clone(),
                    quad.graph_name.clone(),
                );
                self.store.insert(redirected.as_ref())?;
                self.touch(referrer)?;
                self.notify(
                    referrer,
                    &quad.predicate,
                    &[target.clone().into()],
                    &[dup.clone().into()],
                )?;
            }
            for quad in self.outgoing_quads(dup)? {
                self.store.remove(quad.as_ref())?;
                push_graph(&mut touched_graphs, &quad);
            }
            debug!("merged {} into {}", dup.as_str(), target.as_str());
            self.watcher.resource_removed(dup, &dup_types);
        }
        self.touch(&target)?;
        self.registry
            .remove_trailing_graphs(&self.store, &touched_graphs)?;
        Ok(())
    }

    /// Returns the full descriptions of the given resources, their
    /// sub-resources, and (unless excluded) the resources related to them
    /// through defining properties.
    pub fn describe_resources(
        &self,
        resources: &[&str],
        flags: DescribeFlags,
        target_parties: &[&str],
    ) -> Result<SimpleResourceGraph> {
        if resources.is_empty() {
            return Err(Error::invalid("no resources given"));
        }
        if !target_parties.is_empty() {
            return Err(Error::invalid("target party filtering is not supported"));
        }
        let mut set: Vec<NamedNode> = Vec::new();
        for r in resources {
            let uri = NamedNode::new(*r)?;
            match self
                .resolver
                .resolve(&self.store, &self.schema, uri.as_ref(), false)?
            {
                Some(u) => {
                    if !set.contains(&u) {
                        set.push(u);
                    }
                }
                None => return Err(Error::not_found(format!("unknown resource {r}"))),
            }
        }
        // sub-resources are part of the description
        let mut i = 0;
        while i < set.len() {
            for quad in self.store.quads_for_pattern(
                Some(set[i].as_ref().into()),
                Some(consts::NAO_HAS_SUB_RESOURCE),
                None,
                None,
            ) {
                let quad = quad?;
                if let Term::NamedNode(child) = quad.object {
                    if !set.contains(&child) {
                        set.push(child);
                    }
                }
            }
            i += 1;
        }
        let lookup: HashSet<NamedNode> = set.iter().cloned().collect();

        let mut discardable_cache: HashMap<NamedNode, bool> = HashMap::new();
        let mut graph = SimpleResourceGraph::new();
        let mut related: Vec<NamedNode> = Vec::new();
        for uri in &set {
            let res = self.describe_one(uri, flags, false, &mut discardable_cache)?;
            if !flags.exclude_related {
                for (p, v) in &res.properties {
                    if let PropValue::Ref(ResourceId::Uri(o)) = v {
                        if !lookup.contains(o)
                            && o.as_str().starts_with(consts::RESOURCE_NS)
                            && self.schema.is_defining_property(p.as_ref())
                            && !related.contains(o)
                        {
                            related.push(o.clone());
                        }
                    }
                }
            }
            graph.insert(res);
        }
        for uri in related {
            if !graph.contains(&ResourceId::Uri(uri.clone())) {
                let res = self.describe_one(&uri, flags, true, &mut discardable_cache)?;
                graph.insert(res);
            }
        }
        // descriptions reduced to bookkeeping alone carry no information
        graph.resources.retain(|r| {
            r.properties
                .iter()
                .any(|(p, _)| !consts::is_metadata_property(p.as_ref()))
        });
        Ok(graph)
    }

    fn describe_one(
        &self,
        uri: &NamedNode,
        flags: DescribeFlags,
        defining_only: bool,
        discardable_cache: &mut HashMap<NamedNode, bool>,
    ) -> Result<SimpleResource> {
        let mut res = SimpleResource::with_uri(uri.clone());
        for quad in self.outgoing_quads(uri)? {
            let p = quad.predicate.as_ref();
            if defining_only && p != rdf::TYPE && !self.schema.is_defining_property(p) {
                continue;
            }
            if flags.exclude_discardable {
                if let oxigraph::model::GraphName::NamedNode(g) = &quad.graph_name {
                    if g.as_ref() != consts::SYSTEM_GRAPH {
                        let discardable = match discardable_cache.get(g) {
                            Some(d) => *d,
                            None => {
                                let d = self.registry.is_discardable(&self.store, g.as_ref())?;
                                discardable_cache.insert(g.clone(), d);
                                d
                            }
                        };
                        if discardable {
                            continue;
                        }
                    }
                }
            }
            match quad.object {
                Term::Literal(lit) => res.add_literal(quad.predicate, lit),
                Term::NamedNode(o) => res.add_ref(quad.predicate, ResourceId::Uri(o)),
                _ => {}
            }
        }
        Ok(res)
    }

    /// Serializes the descriptions of the given resources. With the
    /// anonymize flag, internal resource URIs are replaced by blank nodes so
    /// the output carries no store-specific identifiers.
    pub fn export_resources(
        &self,
        resources: &[&str],
        format: RdfFormat,
        flags: DescribeFlags,
    ) -> Result<String> {
        let graph = self.describe_resources(resources, flags, &[])?;
        let mut blanks: HashMap<NamedNode, BlankNode> = HashMap::new();
        if flags.anonymize {
            for (i, res) in graph.iter().enumerate() {
                if let ResourceId::Uri(uri) = &res.id {
                    if uri.as_str().starts_with(consts::RESOURCE_NS) {
                        blanks.insert(uri.clone(), BlankNode::new_unchecked(format!("b{i}")));
                    }
                }
            }
        }
        let mut triples = Vec::new();
        for res in graph.iter() {
            let ResourceId::Uri(uri) = &res.id else { continue };
            let subject: Subject = match blanks.get(uri) {
                Some(b) => b.clone().into(),
                None => uri.clone().into(),
            };
            for (property, value) in &res.properties {
                let object: Term = match value {
                    PropValue::Literal(lit) => lit.clone().into(),
                    PropValue::Ref(ResourceId::Uri(o)) => match blanks.get(o) {
                        Some(b) => b.clone().into(),
                        None => o.clone().into(),
                    },
                    PropValue::Ref(ResourceId::Blank(_)) => continue,
                };
                triples.push(Triple::new(subject.clone(), property.clone(), object));
            }
        }
        serialize_triples(&triples, format)
    }

    /// Reads an RDF document from a local file or a remote URL and stores
    /// its statements as a resource batch.
    pub fn import_resources(
        &self,
        location: &str,
        app: &str,
        mode: IdentificationMode,
        flags: StoreFlags,
        discardable: bool,
    ) -> Result<HashMap<ResourceId, NamedNode>> {
        let url = Url::parse(location)
            .map_err(|_| Error::invalid(format!("not a valid URL: {location}")))?;
        let quads = if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| Error::invalid(format!("not a local path: {location}")))?;
            read_rdf_file(&path)?
        } else {
            fetch_rdf(location)?
        };

        let mut graph = SimpleResourceGraph::new();
        for quad in quads {
            let id = match &quad.subject {
                Subject::NamedNode(n) => ResourceId::Uri(n.clone()),
                Subject::BlankNode(b) => ResourceId::Blank(b.as_str().to_string()),
            };
            let mut res = SimpleResource::new(id);
            match quad.object {
                Term::Literal(lit) => res.add_literal(quad.predicate, lit),
                Term::NamedNode(n) => res.add_ref(quad.predicate, ResourceId::Uri(n)),
                Term::BlankNode(b) => {
                    res.add_ref(quad.predicate, ResourceId::Blank(b.as_str().to_string()))
                }
            }
            graph.insert(res);
        }
        if graph.is_empty() {
            return Err(Error::invalid(format!("no statements found at {location}")));
        }
        info!("importing {} resources from {location}", graph.len());
        self.store_resources(graph, app, mode, flags, discardable)
    }

    // ---- internals ----

    fn check_args(&self, resources: &[&str], app: &str) -> Result<()> {
        if resources.is_empty() {
            return Err(Error::invalid("no resources given"));
        }
        if resources.iter().any(|r| r.is_empty()) {
            return Err(Error::invalid("empty resource identifier"));
        }
        if app.is_empty() {
            return Err(Error::invalid("no calling application given"));
        }
        Ok(())
    }

    /// Metadata properties belong to the engine and cannot be written.
    fn check_property_target(&self, property: NamedNodeRef<'_>) -> Result<()> {
        if consts::is_metadata_property(property) {
            return Err(Error::invalid(format!(
                "{} is managed by the engine",
                property.as_str()
            )));
        }
        Ok(())
    }

    /// The canonical URL cannot be removed either; it only moves.
    fn check_property_removable(&self, property: NamedNodeRef<'_>) -> Result<()> {
        self.check_property_target(property)?;
        if property == consts::NIE_URL {
            return Err(Error::invalid(
                "the canonical URL cannot be removed from a resource",
            ));
        }
        Ok(())
    }

    /// Classes, properties, and graphs are never valid write targets.
    fn check_resource_target(&self, uri: NamedNodeRef<'_>) -> Result<()> {
        if self.schema.is_known_class(uri) || self.schema.is_known_property(uri) {
            return Err(Error::invalid(format!(
                "{} is a schema entity and cannot be edited",
                uri.as_str()
            )));
        }
        for quad in self
            .store
            .quads_for_pattern(Some(uri.into()), Some(rdf::TYPE), None, None)
        {
            let quad = quad?;
            if let Term::NamedNode(t) = &quad.object {
                if GRAPH_KINDS.contains(&t.as_ref()) {
                    return Err(Error::invalid(format!(
                        "{} is a graph and cannot be edited as a resource",
                        uri.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Converts the value list for one property. rdf:type is handled apart
    /// since it is not an ontology-declared property.
    fn terms_for_property(
        &self,
        property: &NamedNode,
        values: &[Variant],
        require_known_class: bool,
    ) -> Result<Vec<Term>> {
        if property.as_ref() != rdf::TYPE {
            return self
                .schema
                .variant_list_to_node_set(values, property.as_ref());
        }
        let mut out: Vec<Term> = Vec::new();
        for variant in values {
            for scalar in variant.as_slice() {
                let class = match scalar {
                    Scalar::Resource(n) => n.clone(),
                    Scalar::Url(u) => NamedNode::new(u.as_str())?,
                    other => {
                        return Err(Error::invalid(format!(
                            "rdf:type expects a class, got {:?}",
                            other.kind()
                        )))
                    }
                };
                if require_known_class
                    && !self.schema.is_known_class(class.as_ref())
                    && class.as_ref() != rdfs::RESOURCE
                {
                    return Err(Error::invalid(format!("unknown class {}", class.as_str())));
                }
                let term = Term::from(class);
                if !out.contains(&term) {
                    out.push(term);
                }
            }
        }
        Ok(out)
    }

    /// Resolves each resource identifier, allocating resources for new URLs.
    fn resolve_or_create(&self, resources: &[&str]) -> Result<Vec<NamedNode>> {
        let parsed = parse_nodes(resources)?;
        let resolved = self
            .resolver
            .resolve_all(&self.store, &self.schema, &parsed, true)?;
        let mut out = Vec::new();
        for (input, uri) in parsed.iter().zip(resolved) {
            match uri {
                Some(u) => {
                    if !out.contains(&u) {
                        out.push(u);
                    }
                }
                None => {
                    return Err(Error::not_found(format!(
                        "unknown resource {}",
                        input.as_str()
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Resolves to existing resources only; identifiers the store does not
    /// know are dropped.
    fn resolve_existing(&self, resources: &[&str]) -> Result<Vec<NamedNode>> {
        let parsed = parse_nodes(resources)?;
        let resolved = self
            .resolver
            .resolve_all(&self.store, &self.schema, &parsed, false)?;
        let mut out = Vec::new();
        for uri in resolved.into_iter().flatten() {
            if !out.contains(&uri) {
                out.push(uri);
            }
        }
        Ok(out)
    }

    /// The shared removal path of removeProperty and removeProperties.
    /// `None` values mean "all values of this property".
    fn remove_values(
        &self,
        resources: &[&str],
        props: &[(NamedNode, Option<Vec<Term>>)],
    ) -> Result<()> {
        let targets = self.resolve_existing(resources)?;
        let mut touched_graphs: Vec<NamedNode> = Vec::new();
        for uri in &targets {
            self.check_resource_target(uri.as_ref())?;
            let mut any = false;
            for (property, terms) in props {
                let quads: Vec<Quad> = match terms {
                    Some(terms) => {
                        let mut out = Vec::new();
                        for term in terms {
                            for quad in self.store.quads_for_pattern(
                                Some(uri.as_ref().into()),
                                Some(property.as_ref()),
                                Some(term.as_ref()),
                                None,
                            ) {
                                out.push(quad?);
                            }
                        }
                        out
                    }
                    None => self.property_quads(uri, property)?,
                };
                let mut removed = Vec::new();
                for quad in quads {
                    self.store.remove(quad.as_ref())?;
                    push_graph(&mut touched_graphs, &quad);
                    removed.push(quad.object);
                }
                if !removed.is_empty() {
                    any = true;
                    self.notify(uri, property, &[], &removed)?;
                }
            }
            if !any {
                continue;
            }
            // a resource reduced to bare bookkeeping disappears
            if self.collect_if_empty(uri)? {
                continue;
            }
            self.touch(uri)?;
        }
        self.registry
            .remove_trailing_graphs(&self.store, &touched_graphs)?;
        Ok(())
    }

    /// Removes a resource whose last data statement just went away, as long
    /// as nothing references it.
    fn collect_if_empty(&self, uri: &NamedNode) -> Result<bool> {
        let has_incoming = self
            .store
            .quads_for_pattern(None, None, Some(uri.as_ref().into()), None)
            .next()
            .transpose()?
            .is_some();
        if has_incoming {
            return Ok(false);
        }
        let outgoing = self.outgoing_quads(uri)?;
        let has_data = outgoing.iter().any(|q| {
            let p = q.predicate.as_ref();
            !consts::is_metadata_property(p) && p != consts::NIE_URL
        });
        if has_data {
            return Ok(false);
        }
        for quad in outgoing {
            self.store.remove(quad.as_ref())?;
        }
        debug!("collected empty resource {}", uri.as_str());
        self.watcher.resource_removed(uri, &[]);
        Ok(true)
    }

    /// The canonical-URL write path shared by add and set. A set call on a
    /// resource that already has a URL performs a move, updating the file
    /// name, containment, and the URLs of contained resources.
    fn attach_url(
        &self,
        resources: &[&str],
        values: &[Variant],
        app: &str,
        replace: bool,
    ) -> Result<()> {
        let scalars: Vec<&Scalar> = values.iter().flat_map(|v| v.as_slice()).collect();
        if resources.len() != 1 || scalars.len() != 1 {
            return Err(Error::invalid(
                "the canonical URL is set one resource and one value at a time",
            ));
        }
        let url = match scalars[0] {
            Scalar::Url(u) => NamedNode::new(u.as_str())?,
            Scalar::Resource(n) => n.clone(),
            Scalar::String(s) => {
                let parsed = Url::parse(s)
                    .map_err(|_| Error::invalid(format!("not a valid URL: {s}")))?;
                NamedNode::new(parsed.as_str())?
            }
            other => {
                return Err(Error::invalid(format!(
                    "the canonical URL must be a URL, got {:?}",
                    other.kind()
                )))
            }
        };
        let resource = NamedNode::new(resources[0])?;
        let uri = match self
            .resolver
            .resolve(&self.store, &self.schema, resource.as_ref(), true)?
        {
            Some(u) => u,
            None => return Err(Error::not_found(format!("unknown resource {resource}"))),
        };
        self.check_resource_target(uri.as_ref())?;

        // one URL names one resource
        if let Some(holder) = self.resolver.lookup_url(&self.store, url.as_ref())? {
            if holder != uri {
                return Err(Error::conflict(format!(
                    "{} is already the URL of {}",
                    url.as_str(),
                    holder.as_str()
                )));
            }
        }
        let old = self.property_quads(&uri, &consts::NIE_URL.into_owned())?;
        let old_url: Option<NamedNode> = old.iter().find_map(|q| match &q.object {
            Term::NamedNode(n) => Some(n.clone()),
            _ => None,
        });
        if old_url.as_ref() == Some(&url) {
            return Ok(());
        }
        if !replace && !old.is_empty() {
            return Err(Error::conflict(format!(
                "{} already has a canonical URL",
                uri.as_str()
            )));
        }
        for quad in &old {
            self.store.remove(quad.as_ref())?;
        }
        self.store.insert(QuadRef::new(
            uri.as_ref(),
            consts::NIE_URL,
            TermRef::NamedNode(url.as_ref()),
            consts::SYSTEM_GRAPH,
        ))?;
        if replace {
            if let Some(old_url) = &old_url {
                self.relocate(&uri, old_url, &url, app)?;
            }
        }
        self.touch(&uri)?;
        let added = [Term::from(url)];
        let removed: Vec<Term> = old_url.into_iter().map(Term::from).collect();
        self.notify(&uri, &consts::NIE_URL.into_owned(), &added, &removed)?;
        Ok(())
    }

    /// The move cascade for file URLs: the file name and containment follow
    /// the new URL, and resources contained in a moved folder keep their
    /// URLs consistent.
    fn relocate(
        &self,
        uri: &NamedNode,
        old_url: &NamedNode,
        new_url: &NamedNode,
        app: &str,
    ) -> Result<()> {
        let Ok(parsed) = Url::parse(new_url.as_str()) else {
            return Ok(());
        };
        if parsed.scheme() != "file" {
            return Ok(());
        }
        debug!("moving {} to {}", old_url.as_str(), new_url.as_str());

        if let Some(name) = last_segment(new_url.as_str()) {
            let old_names = self.property_quads(uri, &consts::NFO_FILE_NAME.into_owned())?;
            let target_graph = match old_names.first() {
                Some(q) => q.graph_name.clone(),
                None => self
                    .registry
                    .fetch_graph(&self.store, app, false)?
                    .into(),
            };
            for quad in &old_names {
                self.store.remove(quad.as_ref())?;
            }
            let lit = oxigraph::model::Literal::new_simple_literal(name);
            let quad = Quad::new(
                uri.clone(),
                consts::NFO_FILE_NAME.into_owned(),
                lit,
                target_graph,
            );
            self.store.insert(quad.as_ref())?;
        }

        if let Some(parent) = parent_url(new_url.as_str()) {
            let old_parts = self.property_quads(uri, &consts::NIE_IS_PART_OF.into_owned())?;
            let target_graph = match old_parts.first() {
                Some(q) => q.graph_name.clone(),
                None => consts::SYSTEM_GRAPH.into_owned().into(),
            };
            for quad in &old_parts {
                self.store.remove(quad.as_ref())?;
            }
            let parent_node = NamedNode::new(parent)?;
            if let Some(folder) = self.resolver.lookup_url(&self.store, parent_node.as_ref())? {
                let quad = Quad::new(
                    uri.clone(),
                    consts::NIE_IS_PART_OF.into_owned(),
                    folder,
                    target_graph,
                );
                self.store.insert(quad.as_ref())?;
            }
        }

        // contained resources of a moved folder
        let old_prefix = format!("{}/", old_url.as_str().trim_end_matches('/'));
        let new_base = new_url.as_str().trim_end_matches('/').to_string();
        let mut children: Vec<Quad> = Vec::new();
        for quad in self
            .store
            .quads_for_pattern(None, Some(consts::NIE_URL), None, None)
        {
            let quad = quad?;
            if let Term::NamedNode(child_url) = &quad.object {
                if child_url.as_str().starts_with(&old_prefix) {
                    children.push(quad);
                }
            }
        }
        for quad in children {
            let (Subject::NamedNode(child), Term::NamedNode(child_url)) =
                (&quad.subject, &quad.object)
            else {
                continue;
            };
            let suffix = &child_url.as_str()[old_prefix.len()..];
            let rewritten = NamedNode::new(format!("{new_base}/{suffix}"))?;
            self.store.remove(quad.as_ref())?;
            let moved = Quad::new(
                child.clone(),
                consts::NIE_URL.into_owned(),
                rewritten.clone(),
                quad.graph_name.clone(),
            );
            self.store.insert(moved.as_ref())?;
            self.touch(child)?;
            self.notify(
                child,
                &consts::NIE_URL.into_owned(),
                &[rewritten.into()],
                &[child_url.clone().into()],
            )?;
        }
        Ok(())
    }

    /// Grows a removal set along the sub-resource relation. A sub-resource
    /// joins only while nothing outside the set references it; the loop
    /// re-checks until the set is stable.
    fn expand_sub_resources(&self, seeds: &[NamedNode]) -> Result<Vec<NamedNode>> {
        let mut out: Vec<NamedNode> = seeds.to_vec();
        let mut set: HashSet<NamedNode> = seeds.iter().cloned().collect();
        loop {
            let mut added = false;
            let current: Vec<NamedNode> = out.clone();
            for uri in &current {
                for quad in self.store.quads_for_pattern(
                    Some(uri.as_ref().into()),
                    Some(consts::NAO_HAS_SUB_RESOURCE),
                    None,
                    None,
                ) {
                    let quad = quad?;
                    let Term::NamedNode(child) = quad.object else {
                        continue;
                    };
                    if set.contains(&child) {
                        continue;
                    }
                    if self.externally_referenced(&child, &set)? {
                        continue;
                    }
                    set.insert(child.clone());
                    out.push(child);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        Ok(out)
    }

    fn externally_referenced(&self, uri: &NamedNode, set: &HashSet<NamedNode>) -> Result<bool> {
        for quad in self
            .store
            .quads_for_pattern(None, None, Some(uri.as_ref().into()), None)
        {
            let quad = quad?;
            let Subject::NamedNode(s) = &quad.subject else {
                continue;
            };
            if s == uri || set.contains(s) {
                continue;
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn property_quads(&self, uri: &NamedNode, property: &NamedNode) -> Result<Vec<Quad>> {
        let mut out = Vec::new();
        for quad in self.store.quads_for_pattern(
            Some(uri.as_ref().into()),
            Some(property.as_ref()),
            None,
            None,
        ) {
            out.push(quad?);
        }
        Ok(out)
    }

    fn outgoing_quads(&self, uri: &NamedNode) -> Result<Vec<Quad>> {
        let mut out = Vec::new();
        for quad in self
            .store
            .quads_for_pattern(Some(uri.as_ref().into()), None, None, None)
        {
            out.push(quad?);
        }
        Ok(out)
    }

    fn incoming_quads(&self, uri: &NamedNode) -> Result<Vec<Quad>> {
        let mut out = Vec::new();
        for quad in self
            .store
            .quads_for_pattern(None, None, Some(uri.as_ref().into()), None)
        {
            out.push(quad?);
        }
        Ok(out)
    }

    /// The resource's stored types together with their superclasses, as the
    /// watcher matches on inferred types.
    fn event_types(&self, uri: &NamedNode) -> Result<Vec<NamedNode>> {
        let mut direct = Vec::new();
        for quad in self
            .store
            .quads_for_pattern(Some(uri.as_ref().into()), Some(rdf::TYPE), None, None)
        {
            let quad = quad?;
            if let Term::NamedNode(t) = quad.object {
                direct.push(t);
            }
        }
        Ok(self.type_closure(&direct))
    }

    fn type_closure(&self, types: &[NamedNode]) -> Vec<NamedNode> {
        let mut out: Vec<NamedNode> = Vec::new();
        for t in types {
            if !out.contains(t) {
                out.push(t.clone());
            }
            for parent in self.schema.all_parents(t.as_ref()) {
                if !out.contains(&parent) {
                    out.push(parent);
                }
            }
        }
        out
    }

    fn touch(&self, uri: &NamedNode) -> Result<()> {
        touch_resource(&self.store, uri.as_ref(), Utc::now())
    }

    fn notify(
        &self,
        resource: &NamedNode,
        property: &NamedNode,
        added: &[Term],
        removed: &[Term],
    ) -> Result<()> {
        if self.watcher.is_empty() {
            return Ok(());
        }
        let types = if self.watcher.has_type_watches() || property.as_ref() == rdf::TYPE {
            self.event_types(resource)?
        } else {
            Vec::new()
        };
        self.watcher
            .change_property(resource, &types, property, added, removed);
        Ok(())
    }
}

fn parse_nodes(strs: &[&str]) -> Result<Vec<NamedNode>> {
    strs.iter()
        .map(|s| NamedNode::new(*s).map_err(Error::from))
        .collect()
}

fn push_graph(graphs: &mut Vec<NamedNode>, quad: &Quad) {
    if let oxigraph::model::GraphName::NamedNode(g) = &quad.graph_name {
        if !graphs.contains(g) {
            graphs.push(g.clone());
        }
    }
}

/// The last path segment of a URL, for deriving file names.
fn last_segment(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The parent of a URL path, or `None` at the root.
fn parent_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let parent = &trimmed[..idx];
    if parent.ends_with('/') || !parent.contains('/') {
        return None;
    }
    Some(parent.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_path_helpers() {
        assert_eq!(
            last_segment("file:///home/u/docs/a.txt").as_deref(),
            Some("a.txt")
        );
        assert_eq!(last_segment("file:///dir/").as_deref(), Some("dir"));
        assert_eq!(
            parent_url("file:///home/u/docs/a.txt").as_deref(),
            Some("file:///home/u/docs")
        );
        assert_eq!(parent_url("file:///a").as_deref(), None);
    }
}
