//! The target array store: a persistent, directory-like key->bytes map (spec §3
//! "Store"). Entities inside a store: a root group attribute block, per-variable
//! arrays (chunked), and an optional consolidated metadata file (spec §6
//! "Store layout").
//!
//! Access goes through [`object_store::ObjectStore`] (the teacher's pluggable
//! key-value mapper dependency), wrapped synchronously the way
//! `kernel/src/client/sync/mod.rs`'s `SyncEngineInterface` wraps engine I/O: the
//! writer must "block until the write completes" (spec §5), so [`ArrayStore`]'s
//! public methods are all synchronous and drive the async `ObjectStore` API with
//! `futures::executor::block_on`.
//!
//! A store's on-disk layout here is a simplified Zarr-like format: one
//! `<var>/.zarray` + `<var>/.zattrs` metadata pair per variable, one JSON-encoded
//! blob per append-dimension index (this crate's chunk granularity is always one
//! slice along the append dimension -- see [`DESIGN.md`](../../../DESIGN.md) for why),
//! a root `.zattrs`, and an optional root `.zmetadata` consolidated snapshot.

mod array_store;
mod codec;
mod meta;

pub use array_store::ArrayStore;
pub use meta::{GroupMeta, VariableMeta};

/// Re-exported for the `json` input engine (spec §4.2), which needs the same
/// dtype-name and flat-JSON-array conventions the store itself uses for chunk blobs.
pub(crate) use codec::{array_to_json, dtype_from_name, json_to_array};
