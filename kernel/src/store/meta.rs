//! JSON metadata records persisted alongside each variable and at the store root.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{AttrValue, Encoding};

/// Persisted as `<var>/.zarray` (shape/dtype/chunking) plus `<var>/.zattrs`
/// (user attributes + `_ARRAY_DIMENSIONS`, the xarray-on-zarr convention for
/// recording dimension names that Zarr itself does not natively track).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableMeta {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub encoding: Encoding,
    pub attrs: IndexMap<String, AttrValue>,
}

impl VariableMeta {
    pub fn append_dim_index(&self, append_dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == append_dim)
    }

    pub fn append_dim_len(&self, append_dim: &str) -> Option<usize> {
        self.append_dim_index(append_dim).map(|i| self.shape[i])
    }
}

/// Persisted as the store root's `.zattrs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMeta {
    pub attrs: IndexMap<String, AttrValue>,
    /// The dimension this store was created with as its append dimension. Recorded so
    /// a store can later be reopened as input (the round-trip case, spec §4.2) without
    /// the caller having to guess which dimension was chunked one-slice-at-a-time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_dim: Option<String>,
}
