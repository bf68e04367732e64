//! Tool-filter application and catalog assembly.
//!
//! Turns each upstream's raw `tools/list` into filtered, namespaced
//! [`ToolCatalogEntry`] values and resolves cross-upstream name conflicts,
//! producing the flat catalog the router publishes as a lock-free snapshot.

use std::collections::HashMap;

use hatago_client::RemoteTool;
use hatago_core::config::NamespaceConfig;
use hatago_core::upstream::{
    ConflictResolution, NamespaceStrategy, ToolCatalogEntry, ToolFilter, UpstreamId,
};

use crate::error::ProxyError;

/// The unioned, namespaced tool catalog. Cheap to clone (published behind
/// an `arc_swap::ArcSwap` by the registry so readers never block a writer
/// mid-refresh).
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolCatalogEntry>,
}

impl ToolCatalog {
    pub fn entries(&self) -> &[ToolCatalogEntry] {
        &self.entries
    }

    pub fn find(&self, exposed_name: &str) -> Option<&ToolCatalogEntry> {
        self.entries.iter().find(|e| e.exposed_name == exposed_name)
    }
}

/// Apply include/exclude globs and the rename map to one upstream's raw
/// tool list, producing `(original_name, exposed_local_name)` pairs before
/// namespacing.
fn apply_filter<'a>(tools: &'a [RemoteTool], filter: &ToolFilter) -> Vec<&'a RemoteTool> {
    tools
        .iter()
        .filter(|t| {
            let included = filter.include.is_empty()
                || filter.include.iter().any(|pat| glob_match(pat, &t.name));
            let excluded = filter.exclude.iter().any(|pat| glob_match(pat, &t.name));
            included && !excluded
        })
        .collect()
}

fn local_name(tool: &RemoteTool, filter: &ToolFilter) -> String {
    filter
        .rename
        .get(&tool.name)
        .cloned()
        .unwrap_or_else(|| tool.name.clone())
}

fn namespaced_name(
    strategy: NamespaceStrategy,
    namespace: &NamespaceConfig,
    upstream: &UpstreamId,
    local: &str,
) -> String {
    match strategy {
        NamespaceStrategy::Flat => local.to_string(),
        NamespaceStrategy::Prefix => format!("{}{}{}", upstream.0, namespace.separator, local),
    }
}

/// Build the unioned catalog from every upstream's filtered tool list, in
/// upstream registration order (the order conflict resolution's
/// `first-wins` depends on).
pub fn build_catalog(
    per_upstream: &[(UpstreamId, Vec<RemoteTool>, ToolFilter)],
    strategy: NamespaceStrategy,
    namespace: &NamespaceConfig,
    conflict: ConflictResolution,
) -> Result<ToolCatalog, ProxyError> {
    let mut entries: Vec<ToolCatalogEntry> = Vec::new();
    let mut owners: HashMap<String, UpstreamId> = HashMap::new();

    for (upstream_id, tools, filter) in per_upstream {
        let filtered = apply_filter(tools, filter);
        for tool in filtered {
            let local = local_name(tool, filter);
            let mut exposed = namespaced_name(strategy, namespace, upstream_id, &local);

            if let Some(existing_owner) = owners.get(&exposed) {
                match conflict {
                    ConflictResolution::Error => {
                        return Err(ProxyError::NameConflict {
                            name: exposed,
                            first: existing_owner.0.clone(),
                            second: upstream_id.0.clone(),
                        });
                    }
                    ConflictResolution::FirstWins => continue,
                    ConflictResolution::Rename => {
                        let index = entries
                            .iter()
                            .filter(|e| e.original_name == tool.name)
                            .count();
                        exposed = namespace
                            .auto_prefix
                            .format
                            .replace("{server}", &upstream_id.0)
                            .replace("{index}", &index.to_string());
                        if !namespace.auto_prefix.enabled {
                            exposed = format!("{}_{}", local, index);
                        }
                    }
                }
            }

            owners.insert(exposed.clone(), upstream_id.clone());
            entries.push(ToolCatalogEntry {
                owner: upstream_id.clone(),
                original_name: tool.name.clone(),
                exposed_name: exposed,
                title: tool.title.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            });
        }
    }

    Ok(ToolCatalog { entries })
}

/// Minimal glob matcher: supports `*` (any run of characters) with literal
/// matching otherwise. Covers the include/exclude pattern shapes a tool
/// filter needs without pulling in a dedicated glob crate for something
/// this narrow.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], text) || (!text.is_empty() && inner(pattern, &text[1..]))
            }
            (Some(p), Some(t)) if p == t => inner(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tool(name: &str) -> RemoteTool {
        RemoteTool {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: json!({}),
        }
    }

    #[test]
    fn glob_matches_prefix_and_suffix_wildcards() {
        assert!(glob_match("fs_*", "fs_read"));
        assert!(glob_match("*_write", "fs_write"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("fs_*", "db_read"));
    }

    #[test]
    fn prefix_strategy_namespaces_with_separator() {
        let namespace = NamespaceConfig::default();
        let per_upstream = vec![(
            UpstreamId("fs".into()),
            vec![tool("read")],
            ToolFilter::default(),
        )];
        let catalog = build_catalog(
            &per_upstream,
            NamespaceStrategy::Prefix,
            &namespace,
            ConflictResolution::Error,
        )
        .unwrap();
        assert_eq!(catalog.entries()[0].exposed_name, "fs:read");
    }

    #[test]
    fn flat_strategy_conflict_errors_by_default() {
        let namespace = NamespaceConfig::default();
        let per_upstream = vec![
            (
                UpstreamId("fs".into()),
                vec![tool("read")],
                ToolFilter::default(),
            ),
            (
                UpstreamId("db".into()),
                vec![tool("read")],
                ToolFilter::default(),
            ),
        ];
        let result = build_catalog(
            &per_upstream,
            NamespaceStrategy::Flat,
            &namespace,
            ConflictResolution::Error,
        );
        assert!(matches!(result, Err(ProxyError::NameConflict { .. })));
    }

    #[test]
    fn first_wins_keeps_earlier_upstream() {
        let namespace = NamespaceConfig::default();
        let per_upstream = vec![
            (
                UpstreamId("fs".into()),
                vec![tool("read")],
                ToolFilter::default(),
            ),
            (
                UpstreamId("db".into()),
                vec![tool("read")],
                ToolFilter::default(),
            ),
        ];
        let catalog = build_catalog(
            &per_upstream,
            NamespaceStrategy::Flat,
            &namespace,
            ConflictResolution::FirstWins,
        )
        .unwrap();
        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(catalog.entries()[0].owner.0, "fs");
    }

    #[test]
    fn exclude_filters_out_matching_tools() {
        let namespace = NamespaceConfig::default();
        let filter = ToolFilter {
            exclude: vec!["danger_*".to_string()],
            ..ToolFilter::default()
        };
        let per_upstream = vec![(
            UpstreamId("fs".into()),
            vec![tool("danger_delete"), tool("read")],
            filter,
        )];
        let catalog = build_catalog(
            &per_upstream,
            NamespaceStrategy::Flat,
            &namespace,
            ConflictResolution::Error,
        )
        .unwrap();
        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(catalog.entries()[0].original_name, "read");
    }
}
