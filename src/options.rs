//! Shared option types for the engine API, replacing loose boolean and
//! bitfield parameters.

/// Controls how removeResources and removeDataByApplication treat
/// sub-resources.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RemovalFlags {
    /// Also remove resources reachable via the sub-resource relation, as
    /// long as nothing outside the removal closure references them.
    pub remove_sub_resources: bool,
}

impl RemovalFlags {
    pub fn sub_resources() -> Self {
        RemovalFlags {
            remove_sub_resources: true,
        }
    }
}

/// Controls which incoming resources storeResources tries to match against
/// existing store content.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum IdentificationMode {
    /// Only resources without an explicit URI (blank nodes) are identified.
    #[default]
    IdentifyNew,
    /// No identification at all; every blank node becomes a new resource.
    IdentifyNone,
}

/// Behavior tweaks for the storeResources pipeline.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct StoreFlags {
    /// Drop excess values instead of failing a max-cardinality check.
    pub lazy_cardinalities: bool,
    /// For max-cardinality-1 properties, replace the existing value instead
    /// of failing.
    pub overwrite_properties: bool,
    /// Replace existing values of every property present in the input.
    pub overwrite_all_properties: bool,
    /// Collapse input resources that are identical except for their URI
    /// before identification.
    pub merge_duplicates: bool,
}

/// Controls the shape of describeResources / exportResources output.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DescribeFlags {
    /// Do not pull in resources related via defining properties.
    pub exclude_related: bool,
    /// Skip statements stored in discardable graphs (resource metadata is
    /// always retained).
    pub exclude_discardable: bool,
    /// Replace internal URIs with per-export blank node identifiers in the
    /// serialized output.
    pub anonymize: bool,
}
