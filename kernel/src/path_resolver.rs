//! Expands user paths, globs, and sort rules into an ordered input list (spec §4.1).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::glob;

use crate::error::{ArzipError, ArzipResult};

const OBJECT_STORE_SCHEMES: &[&str] = &["s3://", "gs://", "az://", "abfs://", "abfss://"];

fn is_object_store_url(path: &str) -> bool {
    OBJECT_STORE_SCHEMES.iter().any(|scheme| path.starts_with(scheme))
}

fn has_wildcard(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

fn expand_home(path: &str) -> ArzipResult<String> {
    Ok(shellexpand::tilde(path).into_owned())
}

/// Lists objects for a remote (object-store) URL prefix that may contain wildcards.
/// The default resolver has no network access; callers that need remote expansion
/// (e.g. the CLI wired to a real `object_store` backend) inject their own lister.
pub trait RemoteLister {
    fn list(&self, url_pattern: &str) -> ArzipResult<Vec<String>>;
}

/// A [`RemoteLister`] that always reports no matches; used when no remote backend has
/// been configured. Any remote wildcard then fails with `NoInputsForWildcard`, and any
/// remote literal path fails with `InputNotFound`, matching spec §4.1's rules for local
/// paths.
pub struct NullRemoteLister;
impl RemoteLister for NullRemoteLister {
    fn list(&self, _url_pattern: &str) -> ArzipResult<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct PathResolver<'a> {
    remote_lister: &'a dyn RemoteLister,
}

impl<'a> PathResolver<'a> {
    pub fn new(remote_lister: &'a dyn RemoteLister) -> Self {
        Self { remote_lister }
    }

    pub fn with_local() -> PathResolverOwned {
        PathResolverOwned { remote_lister: Box::new(NullRemoteLister) }
    }

    /// Resolve a single path string or an ordered sequence of strings into an ordered,
    /// deduplicated sequence of paths.
    pub fn resolve(&self, paths: &[String], sort_by: Option<&str>) -> ArzipResult<Vec<String>> {
        let mut resolved = Vec::new();
        for raw in paths {
            resolved.extend(self.resolve_one(raw)?);
        }

        match sort_by {
            None => Ok(dedup_preserve_order(resolved)),
            Some(s) if s == "path" => {
                let mut v = dedup_preserve_order(resolved);
                v.sort();
                Ok(v)
            }
            Some(s) if s == "name" => {
                let mut v = dedup_preserve_order(resolved);
                v.sort_by(|a, b| basename(a).cmp(basename(b)));
                Ok(v)
            }
            Some(s) => Err(ArzipError::InvalidSortBy(s.to_string())),
        }
    }

    fn resolve_one(&self, raw: &str) -> ArzipResult<Vec<String>> {
        if is_object_store_url(raw) {
            let matches = self.remote_lister.list(raw)?;
            if has_wildcard(raw) {
                if matches.is_empty() {
                    return Err(ArzipError::NoInputsForWildcard(raw.to_string()));
                }
                return Ok(matches);
            }
            if matches.is_empty() {
                return Err(ArzipError::InputNotFound(raw.to_string()));
            }
            return Ok(matches);
        }

        let expanded = expand_home(raw)?;

        if has_wildcard(&expanded) {
            let mut matches: Vec<String> = glob(&expanded)?
                .filter_map(Result::ok)
                .map(|p: PathBuf| p.to_string_lossy().into_owned())
                .collect();
            matches.sort();
            if matches.is_empty() {
                return Err(ArzipError::NoInputsForWildcard(raw.to_string()));
            }
            Ok(matches)
        } else {
            if !Path::new(&expanded).exists() {
                return Err(ArzipError::InputNotFound(raw.to_string()));
            }
            Ok(vec![expanded])
        }
    }
}

pub struct PathResolverOwned {
    remote_lister: Box<dyn RemoteLister>,
}

impl PathResolverOwned {
    pub fn resolve(&self, paths: &[String], sort_by: Option<&str>) -> ArzipResult<Vec<String>> {
        PathResolver::new(self.remote_lister.as_ref()).resolve(paths, sort_by)
    }
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(std::path::MAIN_SEPARATOR);
    trimmed.rsplit(std::path::MAIN_SEPARATOR).next().unwrap_or(trimmed)
}

fn dedup_preserve_order(paths: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(paths.len());
    for p in paths {
        if seen.insert(p.clone()) {
            out.push(p);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn literal_path_missing_fails() {
        let resolver = PathResolver::new(&NullRemoteLister);
        let err = resolver
            .resolve(&["/no/such/file-xyz.nc".to_string()], None)
            .unwrap_err();
        assert!(matches!(err, ArzipError::InputNotFound(_)));
    }

    #[test]
    fn wildcard_with_no_matches_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.nc", dir.path().display());
        let resolver = PathResolver::new(&NullRemoteLister);
        let err = resolver.resolve(&[pattern], None).unwrap_err();
        assert!(matches!(err, ArzipError::NoInputsForWildcard(_)));
    }

    #[test]
    fn sort_by_path_dedupes_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.nc", "a.nc", "c.nc"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let pattern = format!("{}/*.nc", dir.path().display());
        let resolver = PathResolver::new(&NullRemoteLister);
        let result = resolver.resolve(&[pattern.clone(), pattern], Some("path")).unwrap();
        assert_eq!(result.len(), 3);
        let mut sorted = result.clone();
        sorted.sort();
        assert_eq!(result, sorted);
    }

    #[test]
    fn invalid_sort_by_fails() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.nc")).unwrap();
        let pattern = format!("{}/a.nc", dir.path().display());
        let resolver = PathResolver::new(&NullRemoteLister);
        let err = resolver.resolve(&[pattern], Some("bogus")).unwrap_err();
        assert!(matches!(err, ArzipError::InvalidSortBy(_)));
    }

    #[test]
    fn first_seen_order_preserved_without_sort_by() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["z.nc", "a.nc"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let z = dir.path().join("z.nc").to_string_lossy().into_owned();
        let a = dir.path().join("a.nc").to_string_lossy().into_owned();
        let resolver = PathResolver::new(&NullRemoteLister);
        let result = resolver.resolve(&[z.clone(), a.clone()], None).unwrap();
        assert_eq!(result, vec![z, a]);
    }
}
