//! Conversion between [`ArrayRef`] and a flat, row-major `Vec<serde_json::Value>` --
//! this crate's wire format for a chunk blob. A real Zarr backend would use typed
//! binary chunks with a compressor; this converter's Non-goal is "rewriting the
//! underlying array-store ... formats" (spec §1), so we settle for a simple,
//! inspectable, self-describing JSON encoding keyed by the variable's declared dtype.

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray, UInt16Array,
};
use arrow_schema::DataType;
use serde_json::Value as Json;

use crate::error::{ArzipError, ArzipResult};

pub fn dtype_name(dtype: &DataType) -> String {
    match dtype {
        DataType::Int32 => "i4".to_string(),
        DataType::Int64 => "i8".to_string(),
        DataType::UInt16 => "u2".to_string(),
        DataType::Float32 => "f4".to_string(),
        DataType::Float64 => "f8".to_string(),
        DataType::Boolean => "bool".to_string(),
        DataType::Utf8 => "str".to_string(),
        other => format!("{other:?}"),
    }
}

pub fn array_to_json(array: &ArrayRef) -> ArzipResult<Vec<Json>> {
    macro_rules! to_json {
        ($ty:ty, $arr:expr, $conv:expr) => {{
            let a = $arr.as_any().downcast_ref::<$ty>().unwrap();
            (0..a.len())
                .map(|i| if a.is_null(i) { Json::Null } else { $conv(a.value(i)) })
                .collect()
        }};
    }
    let values = match array.data_type() {
        DataType::Int32 => to_json!(Int32Array, array, |v: i32| Json::from(v)),
        DataType::Int64 => to_json!(Int64Array, array, |v: i64| Json::from(v)),
        DataType::UInt16 => to_json!(UInt16Array, array, |v: u16| Json::from(v)),
        DataType::Float32 => to_json!(Float32Array, array, |v: f32| Json::from(v as f64)),
        DataType::Float64 => to_json!(Float64Array, array, |v: f64| Json::from(v)),
        DataType::Boolean => to_json!(BooleanArray, array, |v: bool| Json::from(v)),
        DataType::Utf8 => to_json!(StringArray, array, |v: &str| Json::from(v)),
        other => {
            return Err(ArzipError::config(format!(
                "unsupported element type for store codec: {other:?}"
            )))
        }
    };
    Ok(values)
}

/// Inverse of [`dtype_name`], used when re-reading a variable's `.zarray` metadata.
pub fn dtype_from_name(name: &str) -> ArzipResult<DataType> {
    match name {
        "i4" => Ok(DataType::Int32),
        "i8" => Ok(DataType::Int64),
        "u2" => Ok(DataType::UInt16),
        "f4" => Ok(DataType::Float32),
        "f8" => Ok(DataType::Float64),
        "bool" => Ok(DataType::Boolean),
        "str" => Ok(DataType::Utf8),
        other => Err(ArzipError::config(format!("unrecognized stored dtype {other:?}"))),
    }
}

pub fn json_to_array(values: &[Json], dtype: &DataType) -> ArzipResult<ArrayRef> {
    let array: ArrayRef = match dtype {
        DataType::Int32 => Arc::new(Int32Array::from(
            values.iter().map(|v| v.as_i64().map(|n| n as i32)).collect::<Vec<_>>(),
        )),
        DataType::Int64 => Arc::new(Int64Array::from(
            values.iter().map(|v| v.as_i64()).collect::<Vec<_>>(),
        )),
        DataType::UInt16 => Arc::new(UInt16Array::from(
            values.iter().map(|v| v.as_u64().map(|n| n as u16)).collect::<Vec<_>>(),
        )),
        DataType::Float32 => Arc::new(Float32Array::from(
            values.iter().map(|v| v.as_f64().map(|n| n as f32)).collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            values.iter().map(|v| v.as_f64()).collect::<Vec<_>>(),
        )),
        DataType::Boolean => Arc::new(BooleanArray::from(
            values.iter().map(|v| v.as_bool()).collect::<Vec<_>>(),
        )),
        DataType::Utf8 => Arc::new(StringArray::from(
            values.iter().map(|v| v.as_str().map(|s| s.to_string())).collect::<Vec<_>>(),
        )),
        other => {
            return Err(ArzipError::config(format!(
                "unsupported element type for store codec: {other:?}"
            )))
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::array_ref;

    #[test]
    fn round_trips_i32() {
        let arr = array_ref(Int32Array::from(vec![1, 2, 3]));
        let json = array_to_json(&arr).unwrap();
        let back = json_to_array(&json, &DataType::Int32).unwrap();
        assert_eq!(back.as_ref(), arr.as_ref());
    }

    #[test]
    fn round_trips_f64_with_null() {
        let arr: ArrayRef = Arc::new(Float64Array::from(vec![Some(1.5), None, Some(3.5)]));
        let json = array_to_json(&arr).unwrap();
        let back = json_to_array(&json, &DataType::Float64).unwrap();
        assert_eq!(back.as_ref(), arr.as_ref());
    }
}
