//! Dependency graph between attribute keys.
//!
//! An edge `dependency -> target` means the derived rule for `target` must be
//! re-evaluated when `dependency` is stored. Edges are only added if they keep
//! the graph acyclic, so cascades always terminate.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::CycleError;
use crate::rules::AttributeKey;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// key -> derived targets consuming it, in registration order
    consumers: HashMap<AttributeKey, Vec<AttributeKey>>,
    /// derived target -> its dependencies
    dependencies: HashMap<AttributeKey, Vec<AttributeKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edges of a derived rule, refusing edges that would close a
    /// cycle.
    pub fn add(&mut self, target: &AttributeKey, dependencies: &[AttributeKey]) -> Result<(), CycleError> {
        for dep in dependencies {
            if let Some(path) = self.find_path(target, dep) {
                // path runs target -> ... -> dep; the new edge closes it back to target
                let mut cycle: Vec<String> = path.iter().map(|k| k.to_string()).collect();
                cycle.push(target.to_string());
                return Err(CycleError { path: cycle });
            }
        }

        for dep in dependencies {
            let consumers = self.consumers.entry(dep.clone()).or_default();
            if !consumers.contains(target) {
                consumers.push(target.clone());
            }
        }
        self.dependencies
            .entry(target.clone())
            .or_default()
            .extend(dependencies.iter().cloned());
        Ok(())
    }

    /// Path from `from` to `to` following consumer edges, if one exists.
    fn find_path(&self, from: &AttributeKey, to: &AttributeKey) -> Option<Vec<AttributeKey>> {
        if from == to {
            return Some(vec![from.clone()]);
        }
        let mut previous: HashMap<&AttributeKey, &AttributeKey> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for next in self.consumers_of(current) {
                if next == from || previous.contains_key(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == to {
                    let mut path = vec![next.clone()];
                    let mut cursor = next;
                    while let Some(prev) = previous.get(cursor) {
                        path.push((*prev).clone());
                        cursor = *prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Derived targets that consume `key`.
    pub fn consumers_of(&self, key: &AttributeKey) -> &[AttributeKey] {
        self.consumers.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn dependencies_of(&self, key: &AttributeKey) -> &[AttributeKey] {
        self.dependencies.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Check if `key` depends on `dependency` (directly or indirectly).
    pub fn depends_on(&self, key: &AttributeKey, dependency: &AttributeKey) -> bool {
        key != dependency && self.find_path(dependency, key).is_some()
    }

    /// Group every key into levels using Kahn's algorithm: level 0 holds keys
    /// with no dependencies, level `n` keys whose deepest dependency is at
    /// level `n - 1`. Keys within a level are sorted.
    pub fn levels(&self) -> Vec<Vec<AttributeKey>> {
        let mut in_degree: BTreeMap<&AttributeKey, usize> = BTreeMap::new();
        for (dep, consumers) in &self.consumers {
            in_degree.entry(dep).or_insert(0);
            for consumer in consumers {
                *in_degree.entry(consumer).or_insert(0) += 1;
            }
        }

        let mut current: BTreeSet<&AttributeKey> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(key, _)| *key)
            .collect();

        let mut levels = Vec::new();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for key in &current {
                for consumer in self.consumers_of(key) {
                    if let Some(degree) = in_degree.get_mut(consumer) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(consumer);
                        }
                    }
                }
            }
            levels.push(current.into_iter().cloned().collect());
            current = next;
        }
        levels
    }

    /// Number of edges on the longest dependency chain. A single put cascades
    /// at most this many levels deep.
    pub fn max_chain_length(&self) -> usize {
        self.levels().len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}
