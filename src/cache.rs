//! Cached read views and their invalidation.
//!
//! Read endpoints store their rendered JSON keyed by (user, path). A mutation
//! reports what kind of data changed and the cache drops every path that
//! could show it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Categories of mutations that affect cached views.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mutation {
    /// A task's fields or settings changed.
    TaskChanged { agent_id: String },
    /// A dependency was created, promoted, or resolved.
    DependencyChanged { agent_id: String },
    /// An agent was created or its status changed.
    AgentChanged { agent_id: String },
    /// A task reached history. Also touches the site root.
    Completed { agent_id: String },
}

/// Path of an agent's page.
pub fn agent_path(agent_id: &str) -> String {
    format!("/agents/{}", agent_id)
}

impl Mutation {
    /// Paths whose cached views may be stale after this mutation.
    pub fn affected_paths(&self) -> Vec<String> {
        match self {
            Mutation::TaskChanged { agent_id } => vec![agent_path(agent_id)],
            Mutation::DependencyChanged { agent_id } => vec![
                "/dashboard".to_string(),
                "/dependencies".to_string(),
                agent_path(agent_id),
            ],
            Mutation::AgentChanged { agent_id } => {
                vec!["/dashboard".to_string(), agent_path(agent_id)]
            }
            Mutation::Completed { agent_id } => vec![
                "/dashboard".to_string(),
                "/dependencies".to_string(),
                agent_path(agent_id),
                "/".to_string(),
            ],
        }
    }
}

#[derive(Default)]
struct Entries {
    views: HashMap<(String, String), Value>,
    /// Bumped by every invalidation, including ones that removed nothing.
    generation: u64,
}

/// In-memory view cache.
///
/// Thread-safe: uses an internal `Mutex` so it can be shared across request
/// handlers without requiring `&mut self`.
#[derive(Default)]
pub struct ViewCache {
    entries: Mutex<Entries>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &str, path: &str) -> Option<Value> {
        let entries = self.entries.lock().ok()?;
        entries.views.get(&(user.to_string(), path.to_string())).cloned()
    }

    /// Current invalidation generation. Read it before building a view.
    pub fn generation(&self) -> u64 {
        self.entries.lock().map(|e| e.generation).unwrap_or(0)
    }

    /// Store a view built at `generation`, unless an invalidation has run
    /// since. Returns whether the view was stored.
    pub fn insert_if_current(&self, user: &str, path: &str, view: Value, generation: u64) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        if entries.generation != generation {
            debug!(path, "Dropping view built before an invalidation");
            return false;
        }
        entries.views.insert((user.to_string(), path.to_string()), view);
        true
    }

    /// Drop the given paths for every user. Returns how many entries were removed.
    pub fn invalidate<S: AsRef<str>>(&self, paths: &[S]) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        entries.generation = entries.generation.wrapping_add(1);
        let before = entries.views.len();
        entries
            .views
            .retain(|(_, path), _| !paths.iter().any(|p| p.as_ref() == path));
        let removed = before - entries.views.len();
        if removed > 0 {
            debug!(removed, "Invalidated cached views");
        }
        removed
    }

    /// Invalidate everything a set of mutations could have made stale.
    pub fn apply(&self, mutations: &[Mutation]) -> usize {
        let mut paths: Vec<String> = mutations.iter().flat_map(Mutation::affected_paths).collect();
        paths.sort();
        paths.dedup();
        self.invalidate(&paths)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.views.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
