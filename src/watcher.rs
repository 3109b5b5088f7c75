//! The change-notification hub. Subscriptions filter on any combination of
//! resources, properties, and types; matching events are fanned out through
//! bounded per-subscriber queues so the engine never blocks on delivery.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use oxigraph::model::vocab::rdf;
use oxigraph::model::{NamedNode, Term};

pub type WatchId = u64;

/// A mutation event as seen by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    PropertyChanged {
        resource: NamedNode,
        property: NamedNode,
        added: Vec<Term>,
        removed: Vec<Term>,
    },
    ResourceCreated {
        resource: NamedNode,
        types: Vec<NamedNode>,
    },
    ResourceRemoved {
        resource: NamedNode,
        types: Vec<NamedNode>,
    },
    TypesAdded {
        resource: NamedNode,
        types: Vec<NamedNode>,
    },
    TypesRemoved {
        resource: NamedNode,
        types: Vec<NamedNode>,
    },
}

struct WatchState {
    resources: HashSet<NamedNode>,
    properties: HashSet<NamedNode>,
    types: HashSet<NamedNode>,
    tx: SyncSender<ChangeEvent>,
}

impl WatchState {
    fn is_watch_all(&self) -> bool {
        self.resources.is_empty() && self.properties.is_empty() && self.types.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    next_id: WatchId,
    watches: HashMap<WatchId, WatchState>,
    by_resource: HashMap<NamedNode, HashSet<WatchId>>,
    by_property: HashMap<NamedNode, HashSet<WatchId>>,
    by_type: HashMap<NamedNode, HashSet<WatchId>>,
    watch_all: HashSet<WatchId>,
}

/// The receiving end of one watch.
pub struct Subscription {
    id: WatchId,
    rx: Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn try_next(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains everything currently queued.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            out.push(ev);
        }
        out
    }
}

pub struct WatcherHub {
    inner: Mutex<Inner>,
    queue_capacity: usize,
}

impl WatcherHub {
    pub fn new(queue_capacity: usize) -> WatcherHub {
        WatcherHub {
            inner: Mutex::new(Inner::default()),
            queue_capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a subscription. Empty axes mean "any"; all-empty joins the
    /// watch-all set.
    pub fn subscribe(
        &self,
        resources: Vec<NamedNode>,
        properties: Vec<NamedNode>,
        types: Vec<NamedNode>,
    ) -> Subscription {
        let (tx, rx) = std::sync::mpsc::sync_channel(self.queue_capacity);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let state = WatchState {
            resources: resources.into_iter().collect(),
            properties: properties.into_iter().collect(),
            types: types.into_iter().collect(),
            tx,
        };
        index_watch(&mut inner, id, &state);
        inner.watches.insert(id, state);
        debug!("watch {id} registered");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: WatchId) {
        let mut inner = self.lock();
        if let Some(state) = inner.watches.remove(&id) {
            unindex_watch(&mut inner, id, &state);
        }
    }

    pub fn set_resources(&self, id: WatchId, resources: Vec<NamedNode>) {
        self.mutate_axis(id, |s| s.resources = resources.iter().cloned().collect());
    }

    pub fn add_resource(&self, id: WatchId, resource: NamedNode) {
        self.mutate_axis(id, |s| {
            s.resources.insert(resource.clone());
        });
    }

    pub fn remove_resource(&self, id: WatchId, resource: &NamedNode) {
        self.mutate_axis(id, |s| {
            s.resources.remove(resource);
        });
    }

    pub fn set_properties(&self, id: WatchId, properties: Vec<NamedNode>) {
        self.mutate_axis(id, |s| s.properties = properties.iter().cloned().collect());
    }

    pub fn add_property(&self, id: WatchId, property: NamedNode) {
        self.mutate_axis(id, |s| {
            s.properties.insert(property.clone());
        });
    }

    pub fn remove_property(&self, id: WatchId, property: &NamedNode) {
        self.mutate_axis(id, |s| {
            s.properties.remove(property);
        });
    }

    pub fn set_types(&self, id: WatchId, types: Vec<NamedNode>) {
        self.mutate_axis(id, |s| s.types = types.iter().cloned().collect());
    }

    pub fn add_type(&self, id: WatchId, ty: NamedNode) {
        self.mutate_axis(id, |s| {
            s.types.insert(ty.clone());
        });
    }

    pub fn remove_type(&self, id: WatchId, ty: &NamedNode) {
        self.mutate_axis(id, |s| {
            s.types.remove(ty);
        });
    }

    fn mutate_axis(&self, id: WatchId, f: impl Fn(&mut WatchState)) {
        let mut inner = self.lock();
        let Some(mut state) = inner.watches.remove(&id) else {
            return;
        };
        unindex_watch(&mut inner, id, &state);
        f(&mut state);
        index_watch(&mut inner, id, &state);
        inner.watches.insert(id, state);
    }

    /// Whether any subscription constrains on types; lets the engine skip
    /// the type lookup on the hot path.
    pub fn has_type_watches(&self) -> bool {
        !self.lock().by_type.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().watches.is_empty()
    }

    /// Dispatches a property mutation. `types` carries the resource's
    /// inferred types; pass them when `has_type_watches` is true or the
    /// property is rdf:type.
    pub fn change_property(
        &self,
        resource: &NamedNode,
        types: &[NamedNode],
        property: &NamedNode,
        added: &[Term],
        removed: &[Term],
    ) {
        {
            let inner = self.lock();
            let matched = matching_watches(&inner, Some(resource), Some(property), types);
            let ev = ChangeEvent::PropertyChanged {
                resource: resource.clone(),
                property: property.clone(),
                added: added.to_vec(),
                removed: removed.to_vec(),
            };
            deliver(&inner, &matched, ev);
        }
        // type mutations additionally surface on the type axis
        if property.as_ref() == rdf::TYPE {
            self.change_types(resource, types, added, removed);
        }
    }

    fn change_types(
        &self,
        resource: &NamedNode,
        types: &[NamedNode],
        added: &[Term],
        removed: &[Term],
    ) {
        let inner = self.lock();
        let rdf_type = rdf::TYPE.into_owned();
        let matched = matching_watches(&inner, Some(resource), Some(&rdf_type), types);
        let to_nodes = |terms: &[Term]| {
            terms
                .iter()
                .filter_map(|t| match t {
                    Term::NamedNode(n) => Some(n.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        if !added.is_empty() {
            deliver(
                &inner,
                &matched,
                ChangeEvent::TypesAdded {
                    resource: resource.clone(),
                    types: to_nodes(added),
                },
            );
        }
        if !removed.is_empty() {
            deliver(
                &inner,
                &matched,
                ChangeEvent::TypesRemoved {
                    resource: resource.clone(),
                    types: to_nodes(removed),
                },
            );
        }
    }

    /// Dispatches a creation; matches type-axis subscribers and watch-all.
    pub fn resource_created(&self, resource: &NamedNode, types: &[NamedNode]) {
        let inner = self.lock();
        let matched = lifecycle_watches(&inner, None, types);
        deliver(
            &inner,
            &matched,
            ChangeEvent::ResourceCreated {
                resource: resource.clone(),
                types: types.to_vec(),
            },
        );
    }

    /// Dispatches a removal; matches by resource or by type.
    pub fn resource_removed(&self, resource: &NamedNode, types: &[NamedNode]) {
        let inner = self.lock();
        let matched = lifecycle_watches(&inner, Some(resource), types);
        deliver(
            &inner,
            &matched,
            ChangeEvent::ResourceRemoved {
                resource: resource.clone(),
                types: types.to_vec(),
            },
        );
    }
}

fn index_watch(inner: &mut Inner, id: WatchId, state: &WatchState) {
    if state.is_watch_all() {
        inner.watch_all.insert(id);
        return;
    }
    for r in &state.resources {
        inner.by_resource.entry(r.clone()).or_default().insert(id);
    }
    for p in &state.properties {
        inner.by_property.entry(p.clone()).or_default().insert(id);
    }
    for t in &state.types {
        inner.by_type.entry(t.clone()).or_default().insert(id);
    }
}

fn unindex_watch(inner: &mut Inner, id: WatchId, state: &WatchState) {
    inner.watch_all.remove(&id);
    for (map, keys) in [
        (&mut inner.by_resource, &state.resources),
        (&mut inner.by_property, &state.properties),
        (&mut inner.by_type, &state.types),
    ] {
        for k in keys {
            if let Some(set) = map.get_mut(k) {
                set.remove(&id);
                if set.is_empty() {
                    map.remove(k);
                }
            }
        }
    }
}

/// Candidate watches come from the per-axis indexes and watch-all; each
/// candidate is then verified against its full conjunctive filter.
fn matching_watches(
    inner: &Inner,
    resource: Option<&NamedNode>,
    property: Option<&NamedNode>,
    types: &[NamedNode],
) -> Vec<WatchId> {
    let mut candidates: HashSet<WatchId> = inner.watch_all.clone();
    if let Some(r) = resource {
        if let Some(set) = inner.by_resource.get(r) {
            candidates.extend(set.iter().copied());
        }
    }
    if let Some(p) = property {
        if let Some(set) = inner.by_property.get(p) {
            candidates.extend(set.iter().copied());
        }
    }
    for t in types {
        if let Some(set) = inner.by_type.get(t) {
            candidates.extend(set.iter().copied());
        }
    }
    let mut matched: Vec<WatchId> = candidates
        .into_iter()
        .filter(|id| {
            let Some(state) = inner.watches.get(id) else {
                return false;
            };
            let res_ok = state.resources.is_empty()
                || resource.is_some_and(|r| state.resources.contains(r));
            let prop_ok = state.properties.is_empty()
                || property.is_some_and(|p| state.properties.contains(p));
            let type_ok =
                state.types.is_empty() || types.iter().any(|t| state.types.contains(t));
            res_ok && prop_ok && type_ok
        })
        .collect();
    matched.sort();
    matched
}

/// Lifecycle events (created/removed) match by union: watch-all, the
/// resource itself, or any of its types. The property axis does not apply.
fn lifecycle_watches(
    inner: &Inner,
    resource: Option<&NamedNode>,
    types: &[NamedNode],
) -> Vec<WatchId> {
    let mut matched: HashSet<WatchId> = inner.watch_all.clone();
    if let Some(r) = resource {
        if let Some(set) = inner.by_resource.get(r) {
            matched.extend(set.iter().copied());
        }
    }
    for t in types {
        if let Some(set) = inner.by_type.get(t) {
            matched.extend(set.iter().copied());
        }
    }
    let mut matched: Vec<WatchId> = matched.into_iter().collect();
    matched.sort();
    matched
}

fn deliver(inner: &Inner, targets: &[WatchId], event: ChangeEvent) {
    for id in targets {
        let Some(state) = inner.watches.get(id) else {
            continue;
        };
        match state.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("watch {id} queue full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                // subscriber went away; the watch is cleaned up on the next
                // unsubscribe or left inert
                debug!("watch {id} disconnected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(s: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{s}")).unwrap()
    }

    #[test]
    fn watch_all_sees_everything() {
        let hub = WatcherHub::new(16);
        let sub = hub.subscribe(vec![], vec![], vec![]);
        hub.change_property(&node("r"), &[], &node("p"), &[node("v").into()], &[]);
        hub.resource_created(&node("r2"), &[node("T")]);
        let events = sub.drain();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn conjunction_across_axes() {
        let hub = WatcherHub::new(16);
        let sub = hub.subscribe(vec![node("r")], vec![node("p")], vec![]);
        // wrong property: no event
        hub.change_property(&node("r"), &[], &node("q"), &[node("v").into()], &[]);
        assert!(sub.try_next().is_none());
        // both match
        hub.change_property(&node("r"), &[], &node("p"), &[node("v").into()], &[]);
        assert!(matches!(
            sub.try_next(),
            Some(ChangeEvent::PropertyChanged { .. })
        ));
    }

    #[test]
    fn type_watch_matches_created_and_changed() {
        let hub = WatcherHub::new(16);
        let sub = hub.subscribe(vec![], vec![], vec![node("T")]);
        assert!(hub.has_type_watches());
        hub.resource_created(&node("r"), &[node("T")]);
        hub.change_property(&node("r"), &[node("T")], &node("p"), &[node("v").into()], &[]);
        hub.change_property(&node("x"), &[node("U")], &node("p"), &[node("v").into()], &[]);
        let events = sub.drain();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn rdf_type_changes_emit_property_and_type_events() {
        let hub = WatcherHub::new(16);
        let sub = hub.subscribe(vec![node("r")], vec![], vec![]);
        let rdf_type = rdf::TYPE.into_owned();
        hub.change_property(&node("r"), &[], &rdf_type, &[node("T").into()], &[]);
        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ChangeEvent::PropertyChanged { property, .. } if property.as_ref() == rdf::TYPE
        ));
        assert!(matches!(&events[1], ChangeEvent::TypesAdded { .. }));

        hub.change_property(&node("r"), &[], &rdf_type, &[], &[node("T").into()]);
        let events = sub.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, ChangeEvent::TypesRemoved { .. })));
    }

    #[test]
    fn axis_mutation_moves_in_and_out_of_watch_all() {
        let hub = WatcherHub::new(16);
        let sub = hub.subscribe(vec![node("r")], vec![], vec![]);
        hub.change_property(&node("other"), &[], &node("p"), &[], &[]);
        assert!(sub.try_next().is_none());
        // clearing the last axis re-enters watch-all
        hub.set_resources(sub.id(), vec![]);
        hub.change_property(&node("other"), &[], &node("p"), &[], &[]);
        assert!(sub.try_next().is_some());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = WatcherHub::new(16);
        let sub = hub.subscribe(vec![], vec![], vec![]);
        hub.unsubscribe(sub.id());
        hub.resource_created(&node("r"), &[]);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let hub = WatcherHub::new(1);
        let sub = hub.subscribe(vec![], vec![], vec![]);
        hub.resource_created(&node("a"), &[]);
        hub.resource_created(&node("b"), &[]); // dropped
        let events = sub.drain();
        assert_eq!(events.len(), 1);
    }
}
