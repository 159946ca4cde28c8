//! Synchronous facade over an [`ObjectStore`], implementing the store-layout
//! operations the rest of the crate needs: open/describe, materialize a slice, write
//! (including append along a dimension), delete, and consolidate (spec §9).

use std::sync::Arc;

use bytes::Bytes;
use futures::executor::block_on;
use indexmap::IndexMap;
use object_store::path::Path as ObjPath;
use object_store::{ObjectStore, PutPayload};
use serde_json::Value as Json;

use crate::error::{ArzipError, ArzipResult};
use crate::model::{Dataset, Encoding, Variable};

use super::codec::{array_to_json, dtype_from_name, dtype_name, json_to_array};
use super::meta::{GroupMeta, VariableMeta};

/// One chunk blob: a flat, row-major JSON encoding of the values covered by that
/// chunk, plus the chunk's own shape (needed to reconstitute multi-dimensional
/// variables whose outer dimension is not the append dimension).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ChunkBlob {
    shape: Vec<usize>,
    values: Vec<Json>,
}

/// Cheap to clone -- `store` is an `Arc` and `root` is a small path value -- so the
/// same logical store can be handed to both a [`crate::writer::Writer`] (which takes
/// ownership to drive writes) and a [`crate::finalizer::Finalizer`] call afterward.
#[derive(Clone)]
pub struct ArrayStore {
    store: Arc<dyn ObjectStore>,
    root: ObjPath,
}

impl ArrayStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: ObjPath) -> Self {
        Self { store, root }
    }

    /// The path this store is rooted at, e.g. for asserting how a configured output
    /// location was resolved into a store root.
    pub fn root_path(&self) -> &ObjPath {
        &self.root
    }

    fn group_attrs_path(&self) -> ObjPath {
        self.root.child(".zattrs")
    }

    fn consolidated_path(&self) -> ObjPath {
        self.root.child(".zmetadata")
    }

    fn var_dir(&self, var: &str) -> ObjPath {
        self.root.child(var)
    }

    fn var_array_path(&self, var: &str) -> ObjPath {
        self.var_dir(var).child(".zarray")
    }

    fn var_attrs_path(&self, var: &str) -> ObjPath {
        self.var_dir(var).child(".zattrs")
    }

    fn chunk_path(&self, var: &str, index: usize) -> ObjPath {
        self.var_dir(var).child(format!("c.{index}"))
    }

    fn get_opt(&self, path: &ObjPath) -> ArzipResult<Option<Bytes>> {
        match block_on(self.store.get(path)) {
            Ok(result) => Ok(Some(block_on(result.bytes()).map_err(|e| ArzipError::StoreIoError(e.to_string()))?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(ArzipError::StoreIoError(e.to_string())),
        }
    }

    fn put(&self, path: &ObjPath, bytes: Vec<u8>) -> ArzipResult<()> {
        block_on(self.store.put(path, PutPayload::from(bytes)))
            .map(|_| ())
            .map_err(|e| ArzipError::StoreIoError(e.to_string()))
    }

    fn delete(&self, path: &ObjPath) -> ArzipResult<()> {
        match block_on(self.store.delete(path)) {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(ArzipError::StoreIoError(e.to_string())),
        }
    }

    /// Whether the store exists (spec §4.5: `(-1, create)` when it does not).
    pub fn exists(&self) -> ArzipResult<bool> {
        Ok(self.get_opt(&self.group_attrs_path())?.is_some())
    }

    /// Remove every object under the store root (used by `overwrite`).
    pub fn delete_all(&self) -> ArzipResult<()> {
        let prefix = self.root.clone();
        let listing = block_on(async {
            use futures::TryStreamExt;
            self.store.list(Some(&prefix)).try_collect::<Vec<_>>().await
        })
        .map_err(|e| ArzipError::StoreIoError(e.to_string()))?;
        for meta in listing {
            self.delete(&meta.location)?;
        }
        Ok(())
    }

    pub fn list_variable_names(&self) -> ArzipResult<Vec<String>> {
        let result = block_on(self.store.list_with_delimiter(Some(&self.root)))
            .map_err(|e| ArzipError::StoreIoError(e.to_string()))?;
        let mut names: Vec<String> = result
            .common_prefixes
            .into_iter()
            .filter_map(|p| p.parts().last().map(|part| part.as_ref().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn read_group_attrs(&self) -> ArzipResult<GroupMeta> {
        match self.get_opt(&self.group_attrs_path())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(GroupMeta::default()),
        }
    }

    pub fn write_group_attrs(&self, meta: &GroupMeta) -> ArzipResult<()> {
        self.put(&self.group_attrs_path(), serde_json::to_vec_pretty(meta)?)
    }

    pub fn read_var_meta(&self, var: &str) -> ArzipResult<VariableMeta> {
        let array_bytes = self
            .get_opt(&self.var_array_path(var))?
            .ok_or_else(|| ArzipError::config(format!("variable {var:?} not found in store")))?;
        let mut meta: VariableMeta = serde_json::from_slice(&array_bytes)?;
        if let Some(attr_bytes) = self.get_opt(&self.var_attrs_path(var))? {
            let group: GroupMeta = serde_json::from_slice(&attr_bytes)?;
            meta.attrs = group.attrs;
        }
        Ok(meta)
    }

    fn write_var_meta(&self, var: &str, meta: &VariableMeta) -> ArzipResult<()> {
        self.put(&self.var_array_path(var), serde_json::to_vec_pretty(meta)?)?;
        self.put(
            &self.var_attrs_path(var),
            serde_json::to_vec_pretty(&GroupMeta { attrs: meta.attrs.clone(), append_dim: None })?,
        )
    }

    /// Create the store from scratch with the full encoding (spec §4.6 "create").
    pub fn create(&self, ds: &Dataset, encodings: &IndexMap<String, Encoding>, append_dim: &str) -> ArzipResult<()> {
        self.write_group_attrs(&GroupMeta { attrs: ds.attrs.clone(), append_dim: Some(append_dim.to_string()) })?;
        for (name, var) in &ds.variables {
            let encoding = encodings.get(name).cloned().unwrap_or_else(|| var.encoding.clone());
            self.write_variable_full(name, var, &encoding, append_dim)?;
        }
        Ok(())
    }

    /// Write every chunk of a (new) variable, splitting along `append_dim` if present.
    fn write_variable_full(
        &self,
        name: &str,
        var: &Variable,
        encoding: &Encoding,
        append_dim: &str,
    ) -> ArzipResult<()> {
        let meta = VariableMeta {
            dims: var.dims.clone(),
            shape: var.shape.clone(),
            dtype: dtype_name(var.data.data_type()),
            encoding: encoding.clone(),
            attrs: var.attrs.clone(),
        };
        self.write_var_meta(name, &meta)?;

        match var.dim_index(append_dim) {
            Some(0) => {
                let n = var.shape[0];
                let per_slice = var.shape[1..].iter().product::<usize>().max(1);
                for i in 0..n {
                    let slice = var.data.slice(i * per_slice, per_slice);
                    let blob = ChunkBlob {
                        shape: std::iter::once(1).chain(var.shape[1..].iter().copied()).collect(),
                        values: array_to_json(&slice)?,
                    };
                    self.put(&self.chunk_path(name, i), serde_json::to_vec(&blob)?)?;
                }
            }
            Some(_) => {
                return Err(ArzipError::AppendDimNotFirst {
                    var: name.to_string(),
                    dim: append_dim.to_string(),
                })
            }
            None => {
                let blob = ChunkBlob { shape: var.shape.clone(), values: array_to_json(&var.data)? };
                self.put(&self.chunk_path(name, 0), serde_json::to_vec(&blob)?)?;
            }
        }
        Ok(())
    }

    fn read_chunk(&self, var: &str, index: usize) -> ArzipResult<Option<ChunkBlob>> {
        match self.get_opt(&self.chunk_path(var, index))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read the full coordinate variable for `dim` as numeric values (datetimes are
    /// stored as epoch-millisecond integers -- see [`crate::preprocess`]).
    pub fn read_coord(&self, dim: &str) -> ArzipResult<Vec<f64>> {
        let meta = self.read_var_meta(dim)?;
        let len = meta.shape.first().copied().unwrap_or(0);
        let mut values = Vec::with_capacity(len);
        for i in 0..len {
            let chunk = self
                .read_chunk(dim, i)?
                .ok_or_else(|| ArzipError::config(format!("missing chunk {i} for coordinate {dim:?}")))?;
            let v = chunk.values.first().cloned().unwrap_or(Json::Null);
            values.push(v.as_f64().unwrap_or(f64::NAN));
        }
        Ok(values)
    }

    /// Append one or more slices along `append_dim` to the end of the store (spec
    /// §4.6 plain append; used by `all`/`no_overlap`/`newer` and the `append` arm of
    /// `replace`/`retain`).
    pub fn append(&self, ds: &Dataset, append_dim: &str) -> ArzipResult<()> {
        for (name, var) in &ds.variables {
            let Some(0) = var.dim_index(append_dim) else { continue };
            let mut meta = self.read_var_meta(name)?;
            let old_len = meta.shape.first().copied().unwrap_or(0);
            let n = var.shape[0];
            let per_slice = var.shape[1..].iter().product::<usize>().max(1);
            for i in 0..n {
                let slice = var.data.slice(i * per_slice, per_slice);
                let blob = ChunkBlob {
                    shape: std::iter::once(1).chain(var.shape[1..].iter().copied()).collect(),
                    values: array_to_json(&slice)?,
                };
                self.put(&self.chunk_path(name, old_len + i), serde_json::to_vec(&blob)?)?;
            }
            meta.shape[0] = old_len + n;
            self.write_var_meta(name, &meta)?;
        }
        Ok(())
    }

    /// Insert a one-length slice at `index`, shifting everything from `index` onward
    /// up by one (spec §4.6 "insert"). Requires `append_dim` to be the first
    /// dimension of every append-dim-bearing variable.
    pub fn insert_at(&self, ds: &Dataset, index: usize, append_dim: &str) -> ArzipResult<()> {
        for (name, var) in &ds.variables {
            match var.dim_index(append_dim) {
                Some(0) | None => {}
                Some(_) => {
                    return Err(ArzipError::AppendDimNotFirst {
                        var: name.to_string(),
                        dim: append_dim.to_string(),
                    })
                }
            }
        }
        for (name, var) in &ds.variables {
            let Some(0) = var.dim_index(append_dim) else { continue };
            let mut meta = self.read_var_meta(name)?;
            let old_len = meta.shape.first().copied().unwrap_or(0);

            // (b) extend by one empty step, (c) shift from the end down to `index`.
            for i in (index..old_len).rev() {
                let chunk = self
                    .read_chunk(name, i)?
                    .ok_or_else(|| ArzipError::config(format!("missing chunk {i} for variable {name:?}")))?;
                self.put(&self.chunk_path(name, i + 1), serde_json::to_vec(&chunk)?)?;
            }

            // (d) overwrite position `index` with the new slice.
            let blob = ChunkBlob {
                shape: std::iter::once(1).chain(var.shape[1..].iter().copied()).collect(),
                values: array_to_json(&var.data)?,
            };
            self.put(&self.chunk_path(name, index), serde_json::to_vec(&blob)?)?;

            meta.shape[0] = old_len + 1;
            self.write_var_meta(name, &meta)?;
        }
        Ok(())
    }

    /// Overwrite the slice at `index` in place (spec §4.6 "replace"), no shift.
    pub fn replace_at(&self, ds: &Dataset, index: usize, append_dim: &str) -> ArzipResult<()> {
        for (name, var) in &ds.variables {
            let Some(0) = var.dim_index(append_dim) else { continue };
            let blob = ChunkBlob {
                shape: std::iter::once(1).chain(var.shape[1..].iter().copied()).collect(),
                values: array_to_json(&var.data)?,
            };
            self.put(&self.chunk_path(name, index), serde_json::to_vec(&blob)?)?;
        }
        Ok(())
    }

    /// Materialize the whole store back into a [`Dataset`] (used by tests, by the
    /// `zarr` input engine for the round-trip case, and by the finalizer to inspect
    /// `time`/`time_bnds`). The append dimension is read back from the store's own
    /// root attributes (recorded by [`ArrayStore::create`]), falling back to `"time"`
    /// for a store this crate did not create itself.
    pub fn read_dataset(&self) -> ArzipResult<Dataset> {
        let group = self.read_group_attrs()?;
        let append_dim = group.append_dim.clone().unwrap_or_else(|| "time".to_string());
        let mut ds = Dataset::new();
        ds.attrs = group.attrs;
        for name in self.list_variable_names()? {
            let meta = self.read_var_meta(&name)?;
            let dtype = dtype_from_name(&meta.dtype)?;
            let is_append = meta.dims.first().map(|d| *d == append_dim).unwrap_or(false);
            let n_chunks = if is_append { meta.shape.first().copied().unwrap_or(0) } else { 1 };
            let mut all_values = Vec::new();
            for i in 0..n_chunks {
                let chunk = self.read_chunk(&name, i)?.unwrap_or(ChunkBlob { shape: vec![], values: vec![] });
                all_values.extend(chunk.values);
            }
            let array = json_to_array(&all_values, &dtype)?;
            let mut var = Variable::new(meta.dims.clone(), meta.shape.clone(), array);
            var.encoding = meta.encoding;
            var.attrs = meta.attrs;
            ds.insert(name, var);
        }
        Ok(ds)
    }

    pub fn is_consolidated(&self) -> bool {
        self.get_opt(&self.consolidated_path()).ok().flatten().is_some()
    }

    /// Write a fresh consolidated metadata snapshot: every `.zarray`/`.zattrs` plus
    /// the root `.zattrs`, gathered into one `.zmetadata` JSON (spec §4.7 step 4).
    pub fn consolidate(&self) -> ArzipResult<()> {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            ".zattrs".to_string(),
            serde_json::to_value(self.read_group_attrs()?)?,
        );
        for name in self.list_variable_names()? {
            let meta = self.read_var_meta(&name)?;
            metadata.insert(format!("{name}/.zarray"), serde_json::to_value(&meta)?);
            metadata.insert(
                format!("{name}/.zattrs"),
                serde_json::to_value(GroupMeta { attrs: meta.attrs, append_dim: None })?,
            );
        }
        let consolidated = serde_json::json!({
            "zarr_consolidated_format": 1,
            "metadata": metadata,
        });
        self.put(&self.consolidated_path(), serde_json::to_vec_pretty(&consolidated)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::array_ref;
    use arrow_array::{Float64Array, Int32Array};
    use object_store::memory::InMemory;

    fn new_store() -> ArrayStore {
        ArrayStore::new(Arc::new(InMemory::new()), ObjPath::from("out.zarr"))
    }

    fn one_slice(time_ms: f64, value: i32) -> Dataset {
        let mut ds = Dataset::new();
        ds.insert(
            "time",
            Variable::new(vec!["time".to_string()], vec![1], array_ref(Float64Array::from(vec![time_ms]))),
        );
        ds.insert(
            "r_i32",
            Variable::new(vec!["time".to_string()], vec![1], array_ref(Int32Array::from(vec![value]))),
        );
        ds
    }

    #[test]
    fn create_then_append_round_trips() {
        let store = new_store();
        assert!(!store.exists().unwrap());
        let mut encodings = IndexMap::new();
        encodings.insert("time".to_string(), Encoding::default());
        encodings.insert("r_i32".to_string(), Encoding::default());
        store.create(&one_slice(0.0, 10), &encodings, "time").unwrap();
        assert!(store.exists().unwrap());

        store.append(&one_slice(1000.0, 20), "time").unwrap();
        store.append(&one_slice(2000.0, 30), "time").unwrap();

        let coords = store.read_coord("time").unwrap();
        assert_eq!(coords, vec![0.0, 1000.0, 2000.0]);

        let ds = store.read_dataset().unwrap();
        let r = ds.get("r_i32").unwrap();
        let arr = r.data.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(arr.values(), &[10, 20, 30]);
    }

    #[test]
    fn insert_shifts_and_replace_overwrites() {
        let store = new_store();
        let mut encodings = IndexMap::new();
        encodings.insert("time".to_string(), Encoding::default());
        encodings.insert("r_i32".to_string(), Encoding::default());
        store.create(&one_slice(0.0, 1), &encodings, "time").unwrap();
        store.append(&one_slice(2000.0, 3), "time").unwrap();

        // insert at index 1 -> [0, 1000, 2000]
        store.insert_at(&one_slice(1000.0, 2), 1, "time").unwrap();
        assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0, 2000.0]);

        // replace index 1 in place -> length unchanged
        store.replace_at(&one_slice(1000.0, 99), 1, "time").unwrap();
        assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0, 2000.0]);
        let ds = store.read_dataset().unwrap();
        let arr = ds.get("r_i32").unwrap().data.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(arr.values(), &[1, 99, 3]);
    }

    #[test]
    fn consolidate_writes_zmetadata() {
        let store = new_store();
        let mut encodings = IndexMap::new();
        encodings.insert("time".to_string(), Encoding::default());
        encodings.insert("r_i32".to_string(), Encoding::default());
        store.create(&one_slice(0.0, 1), &encodings, "time").unwrap();
        assert!(!store.is_consolidated());
        store.consolidate().unwrap();
        assert!(store.is_consolidated());
    }
}
