//! Locates where a one-length slice along the append dimension belongs relative to an
//! existing store (spec §4.5).
//!
//! Grounded directly in `examples/original_source/nc2zarr/dataslice.py`'s `find_slice`:
//! a linear scan over the existing coordinate values, `DEFAULT_EPSILON` of one
//! millisecond for datetime coordinates (the unit this crate's synthesized `time`
//! variable always uses, see [`crate::preprocess`]).

use crate::error::ArzipResult;
use crate::store::ArrayStore;

/// One millisecond, the default equality tolerance for datetime coordinates (spec
/// §4.5, `nc2zarr/dataslice.py`'s `DEFAULT_EPSILON`).
pub const DEFAULT_EPSILON: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SliceAction {
    /// `(-1, create)`: the store does not exist yet.
    Create,
    /// `(i, replace)`: `|v - coord[i]| < epsilon`.
    Replace(usize),
    /// `(i, insert)`: `v < coord[i]`, with no replace match before it.
    Insert(usize),
    /// `(-1, append)`: `v` is strictly greater than every existing coordinate.
    Append,
}

pub struct SliceLocator {
    epsilon: f64,
}

impl SliceLocator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Locate where coordinate value `v` along `append_dim` belongs in `store` (spec
    /// §4.5's table), via a linear scan over the existing coordinate.
    pub fn locate(&self, store: &ArrayStore, append_dim: &str, v: f64) -> ArzipResult<SliceAction> {
        if !store.exists()? {
            return Ok(SliceAction::Create);
        }
        let coords = store.read_coord(append_dim)?;
        for (i, &c) in coords.iter().enumerate() {
            if (v - c).abs() < self.epsilon {
                return Ok(SliceAction::Replace(i));
            }
            if v < c {
                return Ok(SliceAction::Insert(i));
            }
        }
        Ok(SliceAction::Append)
    }
}

impl Default for SliceLocator {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}
