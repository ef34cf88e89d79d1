//! Vector-store collection naming.
//!
//! Collections are namespaced `{tenant}.learning.data.{version}.{path…}` so
//! multiple deployments can share one store. Segments are sanitized to
//! `[a-z0-9_.-]`.

use crate::config::NamespaceConfig;

const GLOBAL_DATA: &str = "learning.data";

#[derive(Debug, Clone)]
pub struct NamespaceBuilder {
    tenant: String,
    version: String,
}

impl NamespaceBuilder {
    pub fn new(config: &NamespaceConfig) -> Self {
        Self {
            tenant: config.tenant.clone(),
            version: config.version.clone(),
        }
    }

    /// Collection name for globally shared data under the given path, e.g.
    /// `global_data(&["scout", "crawler"])` → `com.learning.data.v1.scout.crawler`.
    pub fn global_data(&self, path: &[&str]) -> String {
        let mut parts = vec![
            sanitize(&self.tenant),
            sanitize(GLOBAL_DATA),
            self.version.clone(),
        ];
        for segment in path {
            parts.push(sanitize(segment));
        }
        parts.join(".")
    }
}

fn sanitize(value: &str) -> String {
    let lowered: String = value
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    lowered.trim_matches('.').to_string()
}
