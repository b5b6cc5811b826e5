//! Chart-of-accounts hierarchy resolution.
//!
//! Builds the parent -> children index over account rows and answers
//! descendant-closure queries: given a roll-up node name, return every
//! leaf-level (postable) account code beneath it. The parent column mixes
//! account codes and human-readable labels; both are treated uniformly as
//! node identifiers.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

/// One row of the chart-of-accounts table.
#[derive(Debug, Clone)]
pub struct AccountNode {
    pub code: String,
    pub parent: Option<String>,
    pub description: Option<String>,
}

/// Immutable parent/descendant index over one snapshot of account data.
///
/// Read-only after construction; shared across requests behind an `Arc`.
pub struct AccountHierarchy {
    children: HashMap<String, Vec<String>>,
    /// Memoized node -> leaf-code closure, computed once at build time.
    closures: HashMap<String, BTreeSet<String>>,
    parents_of: HashMap<String, String>,
}

impl AccountHierarchy {
    /// Build the index from a full account snapshot. Malformed data
    /// (duplicate codes with conflicting parents, cycles) degrades to a
    /// best-effort index with warnings; it never fails hard.
    pub fn build(nodes: &[AccountNode]) -> Self {
        if nodes.is_empty() {
            warn!("account table is empty, hierarchy will resolve nothing");
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut parents_of: HashMap<String, String> = HashMap::new();

        for node in nodes {
            let Some(parent) = node.parent.as_deref() else {
                continue;
            };
            if parent.trim().is_empty() {
                continue;
            }
            if let Some(existing) = parents_of.get(&node.code) {
                if existing != parent {
                    warn!(
                        code = %node.code,
                        first = %existing,
                        second = %parent,
                        "duplicate account code with conflicting parents"
                    );
                }
            }
            parents_of.insert(node.code.clone(), parent.to_string());
            let siblings = children.entry(parent.to_string()).or_default();
            if !siblings.contains(&node.code) {
                siblings.push(node.code.clone());
            }
        }

        // Closure roots: every name that appears as a parent or as a code.
        let mut roots: BTreeSet<String> = children.keys().cloned().collect();
        roots.extend(nodes.iter().map(|n| n.code.clone()));

        let mut closures = HashMap::new();
        for root in &roots {
            let mut visited = HashSet::new();
            let mut leaves = BTreeSet::new();
            Self::collect_leaves(&children, root, &mut visited, &mut leaves);
            if !leaves.is_empty() {
                closures.insert(root.clone(), leaves);
            }
        }

        debug!(
            parents = children.len(),
            closures = closures.len(),
            "account hierarchy built"
        );

        Self {
            children,
            closures,
            parents_of,
        }
    }

    fn collect_leaves(
        children: &HashMap<String, Vec<String>>,
        node: &str,
        visited: &mut HashSet<String>,
        out: &mut BTreeSet<String>,
    ) {
        // Revisiting a node within one traversal means the data is cyclic;
        // it contributes no further descendants.
        if !visited.insert(node.to_string()) {
            warn!(node, "cycle detected in account hierarchy");
            return;
        }
        let Some(kids) = children.get(node) else {
            return;
        };
        for child in kids {
            if children.contains_key(child) {
                Self::collect_leaves(children, child, visited, out);
            } else {
                out.insert(child.clone());
            }
        }
    }

    /// Leaf codes beneath `node_name`. Empty set means "no data", not an
    /// error: unknown names and childless nodes both land here.
    pub fn descendants_of(&self, node_name: &str) -> BTreeSet<String> {
        self.closures.get(node_name).cloned().unwrap_or_default()
    }

    /// All roll-up node names, for substring fallback lookups.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(|s| s.as_str())
    }

    /// The parent label recorded for an account code.
    pub fn parent_of(&self, code: &str) -> Option<&str> {
        self.parents_of.get(code).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Process-lifetime hierarchy cache with change-token invalidation.
///
/// Rebuilds happen fully off-lock; publication swaps the `Arc`, so
/// concurrent readers only ever see a complete index.
pub struct HierarchyCache {
    inner: RwLock<Option<CacheEntry>>,
}

struct CacheEntry {
    token: Option<String>,
    hierarchy: Arc<AccountHierarchy>,
}

impl HierarchyCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Return the cached index if the change token still matches.
    pub fn get(&self, token: Option<&str>) -> Option<Arc<AccountHierarchy>> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(entry) if entry.token.as_deref() == token => Some(Arc::clone(&entry.hierarchy)),
            _ => None,
        }
    }

    /// Publish a freshly built index for the given token.
    pub fn store(&self, token: Option<String>, hierarchy: AccountHierarchy) -> Arc<AccountHierarchy> {
        let arc = Arc::new(hierarchy);
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(CacheEntry {
            token,
            hierarchy: Arc::clone(&arc),
        });
        arc
    }

    pub fn invalidate(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    pub fn is_built(&self) -> bool {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.is_some()
    }
}

impl Default for HierarchyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(code: &str, parent: Option<&str>) -> AccountNode {
        AccountNode {
            code: code.to_string(),
            parent: parent.map(|p| p.to_string()),
            description: None,
        }
    }

    fn sample() -> Vec<AccountNode> {
        vec![
            node("Operating Income", None),
            node("Sales", Some("Operating Income")),
            node("4000", Some("Sales")),
            node("4010", Some("Sales")),
            node("Cost of Sales", Some("Operating Income")),
            node("5000", Some("Cost of Sales")),
        ]
    }

    #[test]
    fn test_descendants_are_leaves_only() {
        let h = AccountHierarchy::build(&sample());
        let leaves = h.descendants_of("Operating Income");
        assert_eq!(
            leaves,
            ["4000", "4010", "5000"].iter().map(|s| s.to_string()).collect()
        );
        // No branch label leaks into the closure.
        assert!(!leaves.contains("Sales"));
        assert!(!leaves.contains("Cost of Sales"));
    }

    #[test]
    fn test_unknown_root_is_empty_not_error() {
        let h = AccountHierarchy::build(&sample());
        assert!(h.descendants_of("nonexistent").is_empty());
    }

    #[test]
    fn test_leaf_queried_as_root_is_empty() {
        let h = AccountHierarchy::build(&sample());
        assert!(h.descendants_of("4000").is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let mut nodes = sample();
        // a <-> b mutual reference plus a self-loop
        nodes.push(node("a", Some("b")));
        nodes.push(node("b", Some("a")));
        nodes.push(node("loop", Some("loop")));
        let h = AccountHierarchy::build(&nodes);
        // Must terminate and return finite sets.
        let _ = h.descendants_of("a");
        let _ = h.descendants_of("b");
        let _ = h.descendants_of("loop");
        assert_eq!(
            h.descendants_of("Sales"),
            ["4000", "4010"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn test_empty_input_builds() {
        let h = AccountHierarchy::build(&[]);
        assert!(h.is_empty());
        assert!(h.descendants_of("anything").is_empty());
    }

    #[test]
    fn test_cache_token_invalidation() {
        let cache = HierarchyCache::new();
        assert!(cache.get(Some("v1")).is_none());

        cache.store(Some("v1".to_string()), AccountHierarchy::build(&sample()));
        assert!(cache.get(Some("v1")).is_some());
        // A different token means the underlying table changed.
        assert!(cache.get(Some("v2")).is_none());

        cache.invalidate();
        assert!(cache.get(Some("v1")).is_none());
    }
}
