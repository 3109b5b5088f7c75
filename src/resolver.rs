//! Classification and resolution of external identifiers. File URLs and
//! other supported URLs are mapped onto internal resource URIs keyed by the
//! canonical URL property; internal URIs pass through; everything else is
//! honored only when the store already knows it.

use std::collections::HashMap;

use chrono::Utc;
use log::debug;
use oxigraph::model::vocab::rdf;
use oxigraph::model::{NamedNode, NamedNodeRef, QuadRef, Term, TermRef};
use oxigraph::store::Store;
use url::Url;
use uuid::Uuid;

use crate::consts;
use crate::errors::{Error, Result};
use crate::schema::SchemaTree;
use crate::util::datetime_literal;

/// URL schemes the engine accepts as canonical URLs beyond `file`.
const SUPPORTED_SCHEMES: [&str; 8] = [
    "http", "https", "ftp", "ftps", "sftp", "smb", "dav", "davs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriState {
    /// An internal resource or graph URI.
    NepomukUri,
    /// A within-request blank identifier.
    BlankUri,
    /// A class or property URI; never a valid write target.
    OntologyUri,
    /// A file URL whose target exists on disk (or stat is disabled).
    ExistingFileUrl,
    /// A file URL with no file behind it.
    NonExistingFileUrl,
    /// A non-file URL with a scheme the engine accepts.
    SupportedUrl,
    /// Anything else; only honored when already present in the store.
    OtherUri,
}

/// Mints a resource URI that is unused in the store.
pub fn fresh_resource_uri(store: &Store) -> Result<NamedNode> {
    fresh_uri(store, consts::RESOURCE_NS)
}

/// Mints a graph URI that is unused in the store.
pub fn fresh_graph_uri(store: &Store) -> Result<NamedNode> {
    fresh_uri(store, consts::GRAPH_NS)
}

fn fresh_uri(store: &Store, ns: &str) -> Result<NamedNode> {
    loop {
        let candidate = NamedNode::new(format!("{ns}{}", Uuid::new_v4()))?;
        if !uri_in_store(store, candidate.as_ref())? {
            return Ok(candidate);
        }
    }
}

/// Whether a URI occurs anywhere: as subject, object, or graph name.
pub fn uri_in_store(store: &Store, uri: NamedNodeRef<'_>) -> Result<bool> {
    if store
        .quads_for_pattern(Some(uri.into()), None, None, None)
        .next()
        .transpose()?
        .is_some()
    {
        return Ok(true);
    }
    if store
        .quads_for_pattern(None, None, Some(uri.into()), None)
        .next()
        .transpose()?
        .is_some()
    {
        return Ok(true);
    }
    Ok(store
        .quads_for_pattern(None, None, None, Some(uri.into()))
        .next()
        .transpose()?
        .is_some())
}

/// Whether a URI has any outgoing statement.
pub fn resource_exists(store: &Store, uri: NamedNodeRef<'_>) -> Result<bool> {
    Ok(store
        .quads_for_pattern(Some(uri.into()), None, None, None)
        .next()
        .transpose()?
        .is_some())
}

#[derive(Debug)]
pub struct UriResolver {
    stat_local_files: bool,
}

impl UriResolver {
    pub fn new(stat_local_files: bool) -> UriResolver {
        UriResolver { stat_local_files }
    }

    /// Classifies one URI. Blank identifiers are classified by the caller
    /// before the URI ever reaches here.
    pub fn classify(&self, schema: &SchemaTree, uri: NamedNodeRef<'_>) -> UriState {
        let s = uri.as_str();
        if s.starts_with("nepomuk:/") {
            return UriState::NepomukUri;
        }
        if schema.is_known_class(uri) || schema.is_known_property(uri) {
            return UriState::OntologyUri;
        }
        let Ok(url) = Url::parse(s) else {
            return UriState::OtherUri;
        };
        if url.scheme() == "file" {
            if !self.stat_local_files {
                return UriState::ExistingFileUrl;
            }
            return match url.to_file_path() {
                Ok(path) if path.exists() => UriState::ExistingFileUrl,
                _ => UriState::NonExistingFileUrl,
            };
        }
        if SUPPORTED_SCHEMES.contains(&url.scheme()) {
            UriState::SupportedUrl
        } else {
            UriState::OtherUri
        }
    }

    /// Looks up the internal URI holding the given canonical URL.
    pub fn lookup_url(&self, store: &Store, url: NamedNodeRef<'_>) -> Result<Option<NamedNode>> {
        for quad in store.quads_for_pattern(
            None,
            Some(consts::NIE_URL),
            Some(TermRef::NamedNode(url)),
            None,
        ) {
            let quad = quad?;
            if let oxigraph::model::Subject::NamedNode(n) = quad.subject {
                return Ok(Some(n));
            }
        }
        Ok(None)
    }

    /// Resolves one URI per the rules of its class. With `create` set, a
    /// previously unknown file or supported URL allocates a new resource;
    /// without it, the unknown URL resolves to `None`.
    pub fn resolve(
        &self,
        store: &Store,
        schema: &SchemaTree,
        uri: NamedNodeRef<'_>,
        create: bool,
    ) -> Result<Option<NamedNode>> {
        match self.classify(schema, uri) {
            UriState::NepomukUri => Ok(Some(uri.into_owned())),
            UriState::OntologyUri => Ok(Some(uri.into_owned())),
            UriState::BlankUri => Err(Error::invalid(format!(
                "blank identifier {} cannot be resolved directly",
                uri.as_str()
            ))),
            UriState::NonExistingFileUrl => Err(Error::invalid(format!(
                "cannot create resource for non-existing file {}",
                uri.as_str()
            ))),
            UriState::ExistingFileUrl | UriState::SupportedUrl => {
                if let Some(existing) = self.lookup_url(store, uri)? {
                    return Ok(Some(existing));
                }
                if !create {
                    return Ok(None);
                }
                Ok(Some(self.create_for_url(store, uri)?))
            }
            UriState::OtherUri => {
                if uri_in_store(store, uri)? {
                    Ok(Some(uri.into_owned()))
                } else {
                    Err(Error::invalid(format!(
                        "unknown URI with unsupported scheme: {}",
                        uri.as_str()
                    )))
                }
            }
        }
    }

    /// Batched resolution; preserves order, and identical URLs within one
    /// batch map onto the same allocation.
    pub fn resolve_all(
        &self,
        store: &Store,
        schema: &SchemaTree,
        uris: &[NamedNode],
        create: bool,
    ) -> Result<Vec<Option<NamedNode>>> {
        let mut seen: HashMap<NamedNode, Option<NamedNode>> = HashMap::new();
        let mut out = Vec::with_capacity(uris.len());
        for uri in uris {
            let resolved = match seen.get(uri) {
                Some(r) => r.clone(),
                None => {
                    let r = self.resolve(store, schema, uri.as_ref(), create)?;
                    seen.insert(uri.clone(), r.clone());
                    r
                }
            };
            out.push(resolved);
        }
        Ok(out)
    }

    /// Allocates a resource for a new canonical URL. File URLs are tagged
    /// with the file class (and the folder class for directories); the URL
    /// and timestamps go into the system graph.
    pub fn create_for_url(&self, store: &Store, url: NamedNodeRef<'_>) -> Result<NamedNode> {
        let uri = fresh_resource_uri(store)?;
        debug!("allocating {} for URL {}", uri.as_str(), url.as_str());
        let now: Term = datetime_literal(Utc::now()).into();
        let g = consts::SYSTEM_GRAPH;
        store.insert(QuadRef::new(
            uri.as_ref(),
            consts::NIE_URL,
            TermRef::NamedNode(url),
            g,
        ))?;
        if let Ok(parsed) = Url::parse(url.as_str()) {
            if parsed.scheme() == "file" {
                store.insert(QuadRef::new(
                    uri.as_ref(),
                    rdf::TYPE,
                    TermRef::NamedNode(consts::NFO_FILE_DATA_OBJECT),
                    g,
                ))?;
                if let Ok(path) = parsed.to_file_path() {
                    if path.is_dir() {
                        store.insert(QuadRef::new(
                            uri.as_ref(),
                            rdf::TYPE,
                            TermRef::NamedNode(consts::NFO_FOLDER),
                            g,
                        ))?;
                    }
                }
            }
        }
        store.insert(QuadRef::new(
            uri.as_ref(),
            consts::NAO_CREATED,
            now.as_ref(),
            g,
        ))?;
        store.insert(QuadRef::new(
            uri.as_ref(),
            consts::NAO_LAST_MODIFIED,
            now.as_ref(),
            g,
        ))?;
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::vocab::rdfs;
    use oxigraph::model::Quad;

    fn schema_with_class() -> (Store, SchemaTree) {
        let store = Store::new().unwrap();
        store
            .insert(
                Quad::new(
                    NamedNode::new("http://example.org/onto#Thing").unwrap(),
                    rdf::TYPE,
                    rdfs::CLASS,
                    oxigraph::model::GraphName::DefaultGraph,
                )
                .as_ref(),
            )
            .unwrap();
        let schema = SchemaTree::new();
        schema.rebuild(&store).unwrap();
        (store, schema)
    }

    #[test]
    fn classification() {
        let (_, schema) = schema_with_class();
        let resolver = UriResolver::new(true);
        let class = |s: &str| {
            let n = NamedNode::new(s).unwrap();
            resolver.classify(&schema, n.as_ref())
        };
        assert_eq!(class("nepomuk:/res/abc"), UriState::NepomukUri);
        assert_eq!(class("http://example.org/onto#Thing"), UriState::OntologyUri);
        assert_eq!(class("https://example.org/page"), UriState::SupportedUrl);
        assert_eq!(class("urn:isbn:12345"), UriState::OtherUri);
        assert_eq!(
            class("file:///surely/not/here/x.txt"),
            UriState::NonExistingFileUrl
        );
    }

    #[test]
    fn stat_disabled_accepts_missing_files() {
        let (_, schema) = schema_with_class();
        let resolver = UriResolver::new(false);
        let n = NamedNode::new("file:///surely/not/here/x.txt").unwrap();
        assert_eq!(
            resolver.classify(&schema, n.as_ref()),
            UriState::ExistingFileUrl
        );
    }

    #[test]
    fn existing_file_resolves_and_allocates_once() {
        let (store, schema) = schema_with_class();
        let resolver = UriResolver::new(true);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let url = NamedNode::new(Url::from_file_path(&path).unwrap().as_str()).unwrap();

        let first = resolver
            .resolve(&store, &schema, url.as_ref(), true)
            .unwrap()
            .unwrap();
        assert!(first.as_str().starts_with(consts::RESOURCE_NS));
        // second resolution finds the same resource
        let second = resolver
            .resolve(&store, &schema, url.as_ref(), true)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        // tagged as a file
        assert!(store
            .quads_for_pattern(
                Some(first.as_ref().into()),
                Some(rdf::TYPE),
                Some(TermRef::NamedNode(consts::NFO_FILE_DATA_OBJECT)),
                None
            )
            .next()
            .is_some());
    }

    #[test]
    fn missing_file_with_stat_fails() {
        let (store, schema) = schema_with_class();
        let resolver = UriResolver::new(true);
        let url = NamedNode::new("file:///surely/not/here/x.txt").unwrap();
        assert!(resolver
            .resolve(&store, &schema, url.as_ref(), true)
            .is_err());
    }

    #[test]
    fn unknown_other_uri_fails_known_passes() {
        let (store, schema) = schema_with_class();
        let resolver = UriResolver::new(true);
        let urn = NamedNode::new("urn:isbn:12345").unwrap();
        assert!(resolver
            .resolve(&store, &schema, urn.as_ref(), true)
            .is_err());
        // once the store mentions the URI, it is honored
        store
            .insert(QuadRef::new(
                urn.as_ref(),
                consts::NAO_PREF_LABEL,
                TermRef::Literal(oxigraph::model::LiteralRef::new_simple_literal("x")),
                consts::SYSTEM_GRAPH,
            ))
            .unwrap();
        assert_eq!(
            resolver
                .resolve(&store, &schema, urn.as_ref(), true)
                .unwrap(),
            Some(urn)
        );
    }
}
