//! `arzip_kernel` turns a set of self-describing scientific array files into a single
//! chunked, cloud-friendly array store, concatenated along one designated dimension
//! (by default `time`).
//!
//! The pipeline is: [`path_resolver`] -> [`opener`] -> [`preprocess`] -> [`process`] ->
//! ([`slice_locator`] ->) [`writer`] -> [`finalizer`], orchestrated by [`converter`].

pub mod config;
pub mod converter;
pub mod error;
pub mod finalizer;
pub mod hooks;
pub mod model;
pub mod opener;
pub mod path_resolver;
pub mod preprocess;
pub mod process;
pub mod slice_locator;
pub mod store;
pub mod time;
pub mod writer;

pub use config::Config;
pub use converter::Converter;
pub use error::{ArzipError, ArzipResult};
pub use model::{AttrValue, Dataset, Encoding, Variable};
