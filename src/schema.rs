//! The class-and-property schema cache. Answers constant-time questions
//! about every declared class and property: parent chains, cardinality,
//! domain, range, defining/identifying flags, and performs the schema-aware
//! conversion of typed values into RDF nodes.
//!
//! The cache is rebuilt in one pass from the store whenever ontologies may
//! have changed; readers keep answering against the previous snapshot while
//! a rebuild is in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use log::{debug, warn};
use oxigraph::model::vocab::{rdf, rdfs, xsd};
use oxigraph::model::{Literal, NamedNode, NamedNodeRef, Subject, Term};
use oxigraph::store::Store;

use crate::consts;
use crate::errors::{Error, Result};
use crate::variant::{Scalar, Variant};

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

#[derive(Debug, Clone)]
struct Entry {
    is_property: bool,
    direct_parents: HashSet<NamedNode>,
    all_parents: HashSet<NamedNode>,
    max_cardinality: u32,
    user_visible: bool,
    domain: Option<NamedNode>,
    range: Option<NamedNode>,
    literal_range: Option<NamedNode>,
    defining: bool,
}

impl Entry {
    fn new(is_property: bool) -> Entry {
        Entry {
            is_property,
            direct_parents: HashSet::new(),
            all_parents: HashSet::new(),
            max_cardinality: 0,
            user_visible: true,
            domain: None,
            range: None,
            literal_range: None,
            defining: false,
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: HashMap<NamedNode, Entry>,
}

impl Snapshot {
    fn entry(&self, uri: NamedNodeRef<'_>) -> Option<&Entry> {
        self.entries.get(&uri.into_owned())
    }
}

#[derive(Debug)]
pub struct SchemaTree {
    snap: RwLock<Arc<Snapshot>>,
}

impl Default for SchemaTree {
    fn default() -> Self {
        SchemaTree::new()
    }
}

impl SchemaTree {
    pub fn new() -> SchemaTree {
        SchemaTree {
            snap: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snap
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Rebuilds the cache from every graph in the store. Readers are only
    /// blocked for the final snapshot swap.
    pub fn rebuild(&self, store: &Store) -> Result<()> {
        let snap = build_snapshot(store)?;
        debug!("schema rebuilt: {} entries", snap.entries.len());
        *self.snap.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snap);
        Ok(())
    }

    pub fn is_known_class(&self, uri: NamedNodeRef<'_>) -> bool {
        self.snapshot()
            .entry(uri)
            .is_some_and(|e| !e.is_property)
    }

    pub fn is_known_property(&self, uri: NamedNodeRef<'_>) -> bool {
        self.snapshot()
            .entry(uri)
            .is_some_and(|e| e.is_property)
    }

    /// The full transitive set of super-classes (or super-properties).
    pub fn all_parents(&self, uri: NamedNodeRef<'_>) -> HashSet<NamedNode> {
        self.snapshot()
            .entry(uri)
            .map(|e| e.all_parents.clone())
            .unwrap_or_default()
    }

    /// True when `a` equals `b` or `b` is a transitive parent of `a`.
    pub fn is_child_of(&self, a: NamedNodeRef<'_>, b: NamedNodeRef<'_>) -> bool {
        if a == b {
            return true;
        }
        self.snapshot()
            .entry(a)
            .is_some_and(|e| e.all_parents.contains(&b.into_owned()))
    }

    /// Positive cardinality bound, or 0 for unlimited.
    pub fn max_cardinality(&self, prop: NamedNodeRef<'_>) -> u32 {
        self.snapshot()
            .entry(prop)
            .map(|e| e.max_cardinality)
            .unwrap_or(0)
    }

    pub fn property_domain(&self, prop: NamedNodeRef<'_>) -> Option<NamedNode> {
        self.snapshot()
            .entry(prop)
            .and_then(|e| e.domain.clone())
    }

    /// The resource range of a property, when it has one.
    pub fn property_range(&self, prop: NamedNodeRef<'_>) -> Option<NamedNode> {
        self.snapshot()
            .entry(prop)
            .and_then(|e| e.range.clone())
    }

    /// The literal datatype of a property's range, when it has one.
    /// `rdfs:Literal` denotes an untyped literal range.
    pub fn literal_range_type(&self, prop: NamedNodeRef<'_>) -> Option<NamedNode> {
        self.snapshot()
            .entry(prop)
            .and_then(|e| e.literal_range.clone())
    }

    pub fn has_literal_range(&self, prop: NamedNodeRef<'_>) -> bool {
        self.literal_range_type(prop).is_some()
    }

    pub fn is_user_visible(&self, uri: NamedNodeRef<'_>) -> bool {
        self.snapshot()
            .entry(uri)
            .map(|e| e.user_visible)
            .unwrap_or(true)
    }

    /// Whether a property must be part of any faithful description of a
    /// resource. Unknown properties are treated as defining so that no data
    /// gets silently dropped.
    pub fn is_defining_property(&self, prop: NamedNodeRef<'_>) -> bool {
        self.snapshot()
            .entry(prop)
            .map(|e| e.defining)
            .unwrap_or(true)
    }

    /// Whether a value of this property may serve to recognize a resource.
    /// Resource metadata never identifies anything.
    pub fn is_identifying_property(&self, prop: NamedNodeRef<'_>) -> bool {
        !consts::is_metadata_property(prop) && self.is_defining_property(prop)
    }

    /// Reduces a set of types to the minimal antichain under sub-class:
    /// every type that is a super-class of another member is dropped.
    pub fn reduce_types(&self, types: &[NamedNode]) -> Vec<NamedNode> {
        let mut out: Vec<NamedNode> = Vec::new();
        for t in types {
            if types
                .iter()
                .any(|o| o != t && self.is_child_of(o.as_ref(), t.as_ref()))
            {
                continue;
            }
            if !out.contains(t) {
                out.push(t.clone());
            }
        }
        out
    }

    /// Converts a typed value to an RDF node using the property's range.
    pub fn variant_to_node(&self, value: &Scalar, prop: NamedNodeRef<'_>) -> Result<Term> {
        let snap = self.snapshot();
        let entry = snap
            .entry(prop)
            .filter(|e| e.is_property)
            .ok_or_else(|| Error::invalid(format!("unknown property {}", prop.as_str())))?;
        if let Some(lr) = &entry.literal_range {
            coerce_literal(value, lr.as_ref(), prop)
        } else if entry.range.is_some() {
            match value {
                Scalar::Url(u) => Ok(NamedNode::new(u.as_str())?.into()),
                Scalar::Resource(n) => Ok(n.clone().into()),
                Scalar::String(s) => {
                    let url = url::Url::parse(s).map_err(|_| {
                        Error::invalid(format!(
                            "{} expects a resource value, got string {s:?}",
                            prop.as_str()
                        ))
                    })?;
                    Ok(NamedNode::new(url.as_str())?.into())
                }
                other => Err(Error::invalid(format!(
                    "{} expects a resource value, got {:?}",
                    prop.as_str(),
                    other.kind()
                ))),
            }
        } else {
            Err(Error::invalid(format!(
                "{} is an abstract property without a range",
                prop.as_str()
            )))
        }
    }

    /// Converts a sequence of values; the result is deduplicated while
    /// preserving first-seen order.
    pub fn variant_list_to_node_set(
        &self,
        values: &[Variant],
        prop: NamedNodeRef<'_>,
    ) -> Result<Vec<Term>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for variant in values {
            for scalar in variant.as_slice() {
                let node = self.variant_to_node(scalar, prop)?;
                if seen.insert(node.clone()) {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }
}

fn object_node(term: &Term) -> Option<NamedNode> {
    match term {
        Term::NamedNode(n) => Some(n.clone()),
        _ => None,
    }
}

fn subject_node(subject: &Subject) -> Option<NamedNode> {
    match subject {
        Subject::NamedNode(n) => Some(n.clone()),
        _ => None,
    }
}

fn build_snapshot(store: &Store) -> Result<Snapshot> {
    let mut entries: HashMap<NamedNode, Entry> = HashMap::new();

    // declared classes and properties
    for (class_marker, is_property) in [(rdfs::CLASS, false), (rdf::PROPERTY, true)] {
        for quad in store.quads_for_pattern(None, Some(rdf::TYPE), Some(class_marker.into()), None)
        {
            let quad = quad?;
            if let Some(uri) = subject_node(&quad.subject) {
                entries.entry(uri).or_insert_with(|| Entry::new(is_property));
            }
        }
    }

    // sub-class / sub-property edges; undeclared participants are adopted
    for (pred, is_property) in [(rdfs::SUB_CLASS_OF, false), (rdfs::SUB_PROPERTY_OF, true)] {
        for quad in store.quads_for_pattern(None, Some(pred), None, None) {
            let quad = quad?;
            let (Some(child), Some(parent)) =
                (subject_node(&quad.subject), object_node(&quad.object))
            else {
                continue;
            };
            entries
                .entry(parent.clone())
                .or_insert_with(|| Entry::new(is_property));
            entries
                .entry(child)
                .or_insert_with(|| Entry::new(is_property))
                .direct_parents
                .insert(parent);
        }
    }

    // property annotations
    let prop_uris: Vec<NamedNode> = entries
        .iter()
        .filter(|(_, e)| e.is_property)
        .map(|(u, _)| u.clone())
        .collect();
    let mut explicit_defining: HashMap<NamedNode, bool> = HashMap::new();
    for uri in &prop_uris {
        let mut max_card: u32 = 0;
        for pred in [consts::NRL_MAX_CARDINALITY, consts::NRL_CARDINALITY] {
            for quad in store.quads_for_pattern(Some(uri.as_ref().into()), Some(pred), None, None) {
                let quad = quad?;
                if let Term::Literal(lit) = &quad.object {
                    match lit.value().parse::<u32>() {
                        Ok(c) => max_card = max_card.max(c),
                        Err(_) => warn!(
                            "ignoring malformed cardinality {} on {}",
                            lit.value(),
                            uri.as_str()
                        ),
                    }
                }
            }
        }

        let domain = first_object(store, uri.as_ref(), rdfs::DOMAIN)?;
        let range = first_object(store, uri.as_ref(), rdfs::RANGE)?;
        // the agent identifier is always a plain string, no matter what the
        // ontology says
        let range = if uri.as_ref() == consts::NAO_IDENTIFIER {
            Some(NamedNode::from(xsd::STRING))
        } else {
            range
        };

        for quad in store.quads_for_pattern(Some(uri.as_ref().into()), Some(rdf::TYPE), None, None)
        {
            let quad = quad?;
            if let Some(t) = object_node(&quad.object) {
                if t.as_ref() == consts::NRL_DEFINING_PROPERTY {
                    explicit_defining.insert(uri.clone(), true);
                } else if t.as_ref() == consts::NRL_NON_DEFINING_PROPERTY {
                    explicit_defining.insert(uri.clone(), false);
                }
            }
        }

        if let Some(entry) = entries.get_mut(uri) {
            entry.max_cardinality = max_card;
            entry.domain = domain;
            if let Some(r) = range {
                if r.as_str().starts_with(XSD_NS) || r.as_ref() == rdfs::LITERAL {
                    entry.literal_range = Some(r);
                } else {
                    entry.range = Some(r);
                }
            }
        }
    }

    // visibility annotations apply to classes and properties alike
    let all_uris: Vec<NamedNode> = entries.keys().cloned().collect();
    for uri in &all_uris {
        for quad in store.quads_for_pattern(
            Some(uri.as_ref().into()),
            Some(consts::NAO_USER_VISIBLE),
            None,
            None,
        ) {
            let quad = quad?;
            if let Term::Literal(lit) = &quad.object {
                if let Some(entry) = entries.get_mut(uri) {
                    entry.user_visible = lit.value() != "false";
                }
            }
        }
    }

    // every top-level class sits under rdfs:Resource
    let resource_class = NamedNode::from(rdfs::RESOURCE);
    entries
        .entry(resource_class.clone())
        .or_insert_with(|| Entry::new(false));
    let top_level: Vec<NamedNode> = entries
        .iter()
        .filter(|(u, e)| {
            !e.is_property && e.direct_parents.is_empty() && **u != resource_class
        })
        .map(|(u, _)| u.clone())
        .collect();
    for uri in top_level {
        if let Some(e) = entries.get_mut(&uri) {
            e.direct_parents.insert(resource_class.clone());
        }
    }

    // transitive parent closure, cycle-safe
    let keys: Vec<NamedNode> = entries.keys().cloned().collect();
    for uri in &keys {
        let mut all = HashSet::new();
        let mut stack: Vec<NamedNode> = entries[uri].direct_parents.iter().cloned().collect();
        while let Some(p) = stack.pop() {
            if !all.insert(p.clone()) {
                continue;
            }
            if let Some(pe) = entries.get(&p) {
                stack.extend(pe.direct_parents.iter().cloned());
            }
        }
        if let Some(e) = entries.get_mut(uri) {
            e.all_parents = all;
        }
    }

    // defining flags: explicit marker wins; otherwise inherited from a
    // defining parent; otherwise literal-ranged properties are defining
    let mut memo: HashMap<NamedNode, bool> = HashMap::new();
    for uri in &prop_uris {
        let defining = resolve_defining(uri, &entries, &explicit_defining, &mut memo, &mut HashSet::new());
        if let Some(e) = entries.get_mut(uri) {
            e.defining = defining;
        }
    }

    Ok(Snapshot { entries })
}

fn resolve_defining(
    uri: &NamedNode,
    entries: &HashMap<NamedNode, Entry>,
    explicit: &HashMap<NamedNode, bool>,
    memo: &mut HashMap<NamedNode, bool>,
    visiting: &mut HashSet<NamedNode>,
) -> bool {
    if let Some(v) = memo.get(uri) {
        return *v;
    }
    if let Some(v) = explicit.get(uri) {
        memo.insert(uri.clone(), *v);
        return *v;
    }
    if uri.as_ref() == rdf::TYPE || uri.as_ref() == consts::NAO_HAS_SUB_RESOURCE {
        memo.insert(uri.clone(), true);
        return true;
    }
    if !visiting.insert(uri.clone()) {
        return false;
    }
    let entry = match entries.get(uri) {
        Some(e) => e,
        None => return true,
    };
    let mut defining = entry
        .direct_parents
        .iter()
        .filter(|p| entries.get(*p).is_some_and(|e| e.is_property))
        .any(|p| resolve_defining(p, entries, explicit, memo, visiting));
    if !defining {
        defining = entry.literal_range.is_some();
    }
    visiting.remove(uri);
    memo.insert(uri.clone(), defining);
    defining
}

fn first_object(
    store: &Store,
    subject: NamedNodeRef<'_>,
    pred: NamedNodeRef<'_>,
) -> Result<Option<NamedNode>> {
    for quad in store.quads_for_pattern(Some(subject.into()), Some(pred), None, None) {
        let quad = quad?;
        if let Some(n) = object_node(&quad.object) {
            return Ok(Some(n));
        }
    }
    Ok(None)
}

/// Coerces a scalar to a literal of the target datatype. Strings are parsed
/// leniently where the target makes the intent unambiguous: fractions for
/// floating-point ranges, bare years for date-times, and unsigned integers
/// for durations.
fn coerce_literal(value: &Scalar, target: NamedNodeRef<'_>, prop: NamedNodeRef<'_>) -> Result<Term> {
    let mismatch = || {
        Error::invalid(format!(
            "value {:?} does not fit the range {} of {}",
            value.value_string(),
            target.as_str(),
            prop.as_str()
        ))
    };

    if target == rdfs::LITERAL {
        return Ok(Literal::new_simple_literal(value.value_string()).into());
    }
    if target == xsd::STRING {
        return match value {
            Scalar::String(s) => Ok(Literal::new_simple_literal(s).into()),
            Scalar::Url(u) => Ok(Literal::new_simple_literal(u.as_str()).into()),
            _ => Ok(Literal::new_simple_literal(value.value_string()).into()),
        };
    }
    if target == xsd::BOOLEAN {
        return match value {
            Scalar::Bool(b) => Ok(Literal::new_typed_literal(b.to_string(), target).into()),
            Scalar::String(s) if s == "true" || s == "false" => {
                Ok(Literal::new_typed_literal(s, target).into())
            }
            _ => Err(mismatch()),
        };
    }
    if target == xsd::DOUBLE || target == xsd::FLOAT || target == xsd::DECIMAL {
        let parsed: f64 = match value {
            Scalar::Double(d) => *d,
            Scalar::Int(v) => *v as f64,
            Scalar::UInt(v) => *v as f64,
            Scalar::Long(v) => *v as f64,
            Scalar::ULong(v) => *v as f64,
            Scalar::String(s) => parse_fraction_or_float(s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        };
        return Ok(Literal::new_typed_literal(parsed.to_string(), target).into());
    }
    if target == xsd::DATE_TIME {
        return match value {
            Scalar::DateTime(dt) => {
                Ok(Literal::new_typed_literal(dt.to_rfc3339(), target).into())
            }
            // a bare year is common in file metadata
            Scalar::Int(y) if (0..=9999).contains(y) => Ok(Literal::new_typed_literal(
                format!("{y:04}-01-01T00:00:00Z"),
                target,
            )
            .into()),
            Scalar::String(s) => {
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                    Ok(Literal::new_typed_literal(
                        dt.with_timezone(&chrono::Utc).to_rfc3339(),
                        target,
                    )
                    .into())
                } else if let Ok(y) = s.parse::<u32>() {
                    if y <= 9999 {
                        Ok(
                            Literal::new_typed_literal(format!("{y:04}-01-01T00:00:00Z"), target)
                                .into(),
                        )
                    } else {
                        Err(mismatch())
                    }
                } else {
                    Err(mismatch())
                }
            }
            _ => Err(mismatch()),
        };
    }
    if target == xsd::DATE {
        return match value {
            Scalar::Date(d) => Ok(Literal::new_typed_literal(d.to_string(), target).into()),
            Scalar::String(s) => {
                let d: chrono::NaiveDate = s.parse().map_err(|_| mismatch())?;
                Ok(Literal::new_typed_literal(d.to_string(), target).into())
            }
            _ => Err(mismatch()),
        };
    }
    if target == xsd::TIME {
        return match value {
            Scalar::Time(t) => Ok(Literal::new_typed_literal(t.to_string(), target).into()),
            Scalar::String(s) => {
                let t: chrono::NaiveTime = s.parse().map_err(|_| mismatch())?;
                Ok(Literal::new_typed_literal(t.to_string(), target).into())
            }
            _ => Err(mismatch()),
        };
    }
    if target == xsd::DURATION {
        // durations are carried as unsigned second counts
        let seconds: u64 = match value {
            Scalar::UInt(v) => *v as u64,
            Scalar::ULong(v) => *v,
            Scalar::Int(v) if *v >= 0 => *v as u64,
            Scalar::Long(v) if *v >= 0 => *v as u64,
            Scalar::String(s) => s.parse().map_err(|_| mismatch())?,
            _ => return Err(mismatch()),
        };
        return Ok(Literal::new_typed_literal(seconds.to_string(), target).into());
    }
    if target == xsd::ANY_URI {
        return match value {
            Scalar::Url(u) => Ok(Literal::new_typed_literal(u.as_str(), target).into()),
            Scalar::String(s) => {
                let u = url::Url::parse(s).map_err(|_| mismatch())?;
                Ok(Literal::new_typed_literal(u.as_str(), target).into())
            }
            _ => Err(mismatch()),
        };
    }
    // the integer family
    if is_integer_datatype(target) {
        let lexical = match value {
            Scalar::Int(v) => v.to_string(),
            Scalar::UInt(v) => v.to_string(),
            Scalar::Long(v) => v.to_string(),
            Scalar::ULong(v) => v.to_string(),
            Scalar::String(s) => {
                let v: i64 = s.parse().map_err(|_| mismatch())?;
                v.to_string()
            }
            _ => return Err(mismatch()),
        };
        if target.as_str().contains("nsigned") || target == xsd::NON_NEGATIVE_INTEGER {
            if lexical.starts_with('-') {
                return Err(mismatch());
            }
        }
        return Ok(Literal::new_typed_literal(lexical, target).into());
    }
    // unknown datatype: keep the lexical form and trust the ontology
    Ok(Literal::new_typed_literal(value.value_string(), target).into())
}

fn is_integer_datatype(dt: NamedNodeRef<'_>) -> bool {
    dt == xsd::INT
        || dt == xsd::INTEGER
        || dt == xsd::LONG
        || dt == xsd::SHORT
        || dt == xsd::BYTE
        || dt == xsd::UNSIGNED_INT
        || dt == xsd::UNSIGNED_LONG
        || dt == xsd::UNSIGNED_SHORT
        || dt == xsd::UNSIGNED_BYTE
        || dt == xsd::NON_NEGATIVE_INTEGER
        || dt == xsd::POSITIVE_INTEGER
}

fn parse_fraction_or_float(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    s.parse().ok()
}
