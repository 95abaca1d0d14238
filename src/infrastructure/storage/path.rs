//! Built-in on-disk layouts.

use std::path::PathBuf;

use chrono::{Datelike, Utc};

use crate::domain::entities::ResourceKey;
use crate::domain::ports::PathProvider;

/// Default layout: every entry directly under the root as `{key}.{ext}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatPathProvider;

impl PathProvider for FlatPathProvider {
    fn relative_path(&self, _url: &str, key: &ResourceKey, extension: &str) -> PathBuf {
        PathBuf::from(format!("{key}.{extension}"))
    }

    fn parent_dirs(&self, _url: &str) -> Vec<PathBuf> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "flat"
    }
}

/// Groups entries by URL host: `{host}/{key}.{ext}`.
///
/// URLs without a parseable host land in an `unknown-host` directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomainPathProvider;

impl DomainPathProvider {
    fn host_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown-host".to_owned())
    }
}

impl PathProvider for DomainPathProvider {
    fn relative_path(&self, url: &str, key: &ResourceKey, extension: &str) -> PathBuf {
        PathBuf::from(Self::host_of(url)).join(format!("{key}.{extension}"))
    }

    fn parent_dirs(&self, url: &str) -> Vec<PathBuf> {
        vec![PathBuf::from(Self::host_of(url))]
    }

    fn name(&self) -> &'static str {
        "by-domain"
    }
}

/// Groups entries by ingest date: `yyyy/mm/dd/{key}.{ext}`.
///
/// Paths are resolved against the current UTC date on every operation, so
/// this layout suits write-once pipelines where reads happen the same day
/// the entry was stored (or where the store is treated as append-only).
#[derive(Debug, Default, Clone, Copy)]
pub struct DatePathProvider;

impl DatePathProvider {
    fn today_dirs() -> PathBuf {
        let now = Utc::now();
        PathBuf::from(format!("{:04}", now.year()))
            .join(format!("{:02}", now.month()))
            .join(format!("{:02}", now.day()))
    }
}

impl PathProvider for DatePathProvider {
    fn relative_path(&self, _url: &str, key: &ResourceKey, extension: &str) -> PathBuf {
        Self::today_dirs().join(format!("{key}.{extension}"))
    }

    fn parent_dirs(&self, _url: &str) -> Vec<PathBuf> {
        vec![Self::today_dirs()]
    }

    fn name(&self) -> &'static str {
        "by-date"
    }
}
