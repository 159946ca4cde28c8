//! The in-memory dataset model: an ordered mapping of named variables plus top-level
//! attributes. See spec §3 ("Data Model").

use std::sync::Arc;

use arrow_array::ArrayRef;
use indexmap::IndexMap;

use crate::error::{ArzipError, ArzipResult};

/// A scalar or list-valued attribute, as recognized by the store's metadata encoding
/// (netCDF/Zarr attributes are either scalars or lists of scalars, never nested maps).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

pub type Attrs = IndexMap<String, AttrValue>;

/// Serialization hints attached to a variable for write-out (spec §3 "Encoding").
///
/// On create the writer passes these through to the target store; on append they are
/// inherited from the existing store.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Encoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<AttrValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Encoding {
    /// Merge `self` (computed/source encoding) with a user-supplied encoding map.
    /// User keys win on conflict except `chunks`, which is taken from `self` when present
    /// (spec §4.4 step 4).
    pub fn merged_with_user(&self, user: &Encoding) -> Encoding {
        Encoding {
            chunks: self.chunks.clone().or_else(|| user.chunks.clone()),
            compressor: user.compressor.clone().or_else(|| self.compressor.clone()),
            fill_value: user.fill_value.clone().or_else(|| self.fill_value.clone()),
            dtype: user.dtype.clone().or_else(|| self.dtype.clone()),
            filters: user.filters.clone().or_else(|| self.filters.clone()),
            calendar: user.calendar.clone().or_else(|| self.calendar.clone()),
            units: user.units.clone().or_else(|| self.units.clone()),
        }
    }
}

/// A named N-D array: an ordered list of dimension names, a shape, a scalar element
/// type, optional chunking, attributes, and an encoding.
///
/// `data` holds the variable's values flattened in row-major order over `shape`. This
/// mirrors how a Zarr/NetCDF backend ultimately serializes chunks as flat byte runs;
/// keeping it flat here means rechunking is a metadata-only operation (spec §4.4) and
/// the store layer (§3 "Store") decides how to lay bytes out on disk.
#[derive(Debug, Clone)]
pub struct Variable {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub data: ArrayRef,
    pub chunks: Option<Vec<usize>>,
    pub attrs: Attrs,
    pub encoding: Encoding,
}

impl Variable {
    pub fn new(dims: impl Into<Vec<String>>, shape: impl Into<Vec<usize>>, data: ArrayRef) -> Self {
        Self {
            dims: dims.into(),
            shape: shape.into(),
            data,
            chunks: None,
            attrs: Attrs::new(),
            encoding: Encoding::default(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// A variable is a coordinate if it has exactly one dimension and that dimension's
    /// name equals the variable's own name -- callers pass the candidate name in since
    /// `Variable` itself is not keyed (see [`Dataset`]).
    pub fn is_coordinate_for(&self, name: &str) -> bool {
        self.dims.len() == 1 && self.dims[0] == name
    }

    pub fn dim_index(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }
}

/// An ordered mapping of named variables, plus a top-level attribute mapping.
///
/// Invariant: variables that share a dimension name agree on its length (checked by
/// [`Dataset::dim_size`] / [`Dataset::check_dim_consistency`]).
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub variables: IndexMap<String, Variable>,
    pub attrs: Attrs,
    /// Best-effort provenance: the input path this dataset was opened from, if any.
    /// Used by the preprocessor's filename-based time synthesis (spec §4.3 step 3).
    pub source_path: Option<String>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, var: Variable) {
        self.variables.insert(name.into(), var);
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.variables.shift_remove(name)
    }

    pub fn contains_dim(&self, dim: &str) -> bool {
        self.variables.values().any(|v| v.dims.iter().any(|d| d == dim))
            || self.variables.contains_key(dim)
    }

    /// Data variables are all variables that are not coordinates (i.e. not a 1-D
    /// variable named after its sole dimension).
    pub fn data_var_names(&self) -> Vec<String> {
        self.variables
            .iter()
            .filter(|(name, var)| !var.is_coordinate_for(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn coordinate_names(&self) -> Vec<String> {
        self.variables
            .iter()
            .filter(|(name, var)| var.is_coordinate_for(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        self.variables.values().find_map(|v| {
            v.dim_index(dim).map(|i| v.shape[i])
        })
    }

    /// Check that every variable's claimed shape along each dimension matches the size
    /// already established by other variables sharing that dimension.
    pub fn check_dim_consistency(&self) -> ArzipResult<()> {
        let mut sizes: IndexMap<String, usize> = IndexMap::new();
        for (name, var) in &self.variables {
            for (i, dim) in var.dims.iter().enumerate() {
                let size = var.shape[i];
                if let Some(existing) = sizes.get(dim) {
                    if *existing != size {
                        return Err(ArzipError::config(format!(
                            "variable {name:?} has dimension {dim:?} of size {size}, \
                             but another variable already established size {existing}"
                        )));
                    }
                } else {
                    sizes.insert(dim.clone(), size);
                }
            }
        }
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(var) = self.variables.shift_remove(from) {
            // rename the dimension everywhere it is used, then reinsert the variable
            for v in self.variables.values_mut() {
                for d in v.dims.iter_mut() {
                    if d == from {
                        *d = to.to_string();
                    }
                }
            }
            let mut var = var;
            for d in var.dims.iter_mut() {
                if d == from {
                    *d = to.to_string();
                }
            }
            self.variables.insert(to.to_string(), var);
        }
    }
}

/// Wrap an [`ArrayRef`] so callers constructing test fixtures do not need to depend on
/// `arrow_array` directly in every call site.
pub fn array_ref(array: impl arrow_array::Array + 'static) -> ArrayRef {
    Arc::new(array)
}
