//! Constant NamedNodeRefs for the desktop-ontology terms the engine relies
//! on, primarily from the NAO, NIE, NFO, NRL, and PIMO vocabularies, plus the
//! internal URI namespaces.

use oxigraph::model::NamedNodeRef;

// internal URI spaces
pub const RESOURCE_NS: &str = "nepomuk:/res/";
pub const GRAPH_NS: &str = "nepomuk:/ctx/";

/// The engine-owned graph holding resource metadata (timestamps, canonical
/// URLs, visibility). Its name is stable for the lifetime of a database.
pub const SYSTEM_GRAPH: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("nepomuk:/ctx/metadata");

/// The self resource, bootstrapped as a pimo:Person on first start.
pub const ME: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("nepomuk:/me");

// nao
pub const NAO_CREATED: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nao#created");
pub const NAO_LAST_MODIFIED: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#lastModified",
);
pub const NAO_CREATOR: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nao#creator");
pub const NAO_USER_VISIBLE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#userVisible",
);
pub const NAO_IDENTIFIER: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#identifier",
);
pub const NAO_PREF_LABEL: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#prefLabel",
);
pub const NAO_DESCRIPTION: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#description",
);
pub const NAO_HAS_SUB_RESOURCE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#hasSubResource",
);
pub const NAO_MAINTAINED_BY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nao#maintainedBy",
);
pub const NAO_AGENT: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nao#Agent");

// nie
pub const NIE_URL: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/01/19/nie#url");
pub const NIE_IS_PART_OF: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/01/19/nie#isPartOf",
);
pub const NIE_DATA_OBJECT: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/01/19/nie#DataObject",
);

// nfo
pub const NFO_FILE_DATA_OBJECT: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#FileDataObject",
);
pub const NFO_FOLDER: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Folder");
pub const NFO_FILE_NAME: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#fileName",
);

// nrl
pub const NRL_MAX_CARDINALITY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#maxCardinality",
);
pub const NRL_CARDINALITY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#cardinality",
);
pub const NRL_INSTANCE_BASE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#InstanceBase",
);
pub const NRL_DISCARDABLE_INSTANCE_BASE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#DiscardableInstanceBase",
);
pub const NRL_GRAPH: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#Graph");
pub const NRL_GRAPH_METADATA: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#GraphMetadata",
);
pub const NRL_CORE_GRAPH_METADATA_FOR: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#coreGraphMetadataFor",
);
pub const NRL_ONTOLOGY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#Ontology",
);
pub const NRL_DEFINING_PROPERTY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#DefiningProperty",
);
pub const NRL_NON_DEFINING_PROPERTY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#NonDefiningProperty",
);

// pimo
pub const PIMO_PERSON: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/11/01/pimo#Person",
);

/// Resource metadata written by the engine itself. These properties live in
/// the system graph and are never a valid direct target of an add/set call.
pub const METADATA_PROPERTIES: [NamedNodeRef<'_>; 4] = [
    NAO_CREATED,
    NAO_CREATOR,
    NAO_LAST_MODIFIED,
    NAO_USER_VISIBLE,
];

pub fn is_metadata_property(p: NamedNodeRef<'_>) -> bool {
    METADATA_PROPERTIES.contains(&p)
}
