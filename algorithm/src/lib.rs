// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Module load-order resolution, kept free of I/O and async so it can be
//! exercised as a pure function of module metadata. Grounded on the
//! `ResolveState` algorithm in
//! `examples/original_source/builtin/loader/loader.cpp`: modules are
//! promoted into the result list in two passes, first following optional
//! dependencies, then without, so that an optional dependency which turns
//! out to be unavailable doesn't block the modules that only wanted it if
//! present.

use common::module_meta::ModuleMeta;
use std::collections::{BTreeMap, BTreeSet};

/// Everything the resolver needs to know about one candidate module.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub meta: ModuleMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// A required dependency never became available, even after following
    /// every reverse-dependency and optional-dependency edge reachable from
    /// the requested set.
    #[error("cannot resolve module '{module}': missing required dependency '{missing}'")]
    MissingDependency { module: String, missing: String },
}

/// A module that declared an optional dependency which never became
/// available, so resolution proceeded without it (spec §8 boundary
/// behavior: "single module requiring a missing optional dependency:
/// succeeds with that module present").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOptional {
    pub module: String,
    pub missing: String,
}

/// Successful resolution: the load order plus every optional dependency
/// that was skipped along the way, so the caller can warn about it
/// (spec §8 scenario S4: "a log at level WARN mentions missing optional").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub order: Vec<String>,
    pub skipped_optional: Vec<SkippedOptional>,
}

/// Resolves `requested` against `candidates` and returns a load order such
/// that every module is preceded by all of its non-optional dependencies,
/// forward or reverse.
///
/// `candidates` need not all be required: a candidate that nothing ends up
/// depending on is simply left out of the result. Ordering among modules
/// with no dependency relationship is the order they first became
/// promotable, which is deterministic given a deterministic `candidates`
/// map (hence `BTreeMap`, not `HashMap`).
pub fn resolve(
    requested: &BTreeSet<String>,
    candidates: &BTreeMap<String, Candidate>,
) -> Result<Resolution, ResolveError> {
    let mut state = ResolveState::new(candidates);
    for name in requested {
        state.require(name);
    }
    state.step_through()
}

/// One dependency edge, after a reverse-dependency declaration has been
/// folded into its equivalent forward-dependency shape.
#[derive(Debug, Clone)]
struct Edge {
    module: String,
    optional: bool,
}

struct ResolveState<'a> {
    candidates: &'a BTreeMap<String, Candidate>,
    /// `name`'s declared forward dependencies plus every edge injected by
    /// some other module's `reverse_dependencies` entry naming `name`: a
    /// module M that declares a reverse dependency on X is, for ordering
    /// purposes, exactly as if X had declared a forward dependency on M.
    /// This lets a module be slotted in front of another without either
    /// editing that module's own `meta.txt`.
    effective_deps: BTreeMap<String, Vec<Edge>>,
    /// Modules that must end up in the result, in the order they were
    /// first requested or pulled in transitively.
    promised: Vec<String>,
    promised_set: BTreeSet<String>,
    /// Modules already placed into the load order.
    resolved: Vec<String>,
    resolved_set: BTreeSet<String>,
}

impl<'a> ResolveState<'a> {
    fn new(candidates: &'a BTreeMap<String, Candidate>) -> Self {
        let mut effective_deps: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        for (name, candidate) in candidates {
            let entry = effective_deps.entry(name.clone()).or_default();
            for dep in &candidate.meta.dependencies {
                entry.push(Edge {
                    module: dep.module.clone(),
                    optional: dep.optional,
                });
            }
        }
        for (name, candidate) in candidates {
            for rdep in &candidate.meta.reverse_dependencies {
                effective_deps
                    .entry(rdep.module.clone())
                    .or_default()
                    .push(Edge {
                        module: name.clone(),
                        optional: rdep.optional,
                    });
            }
        }

        ResolveState {
            candidates,
            effective_deps,
            promised: Vec::new(),
            promised_set: BTreeSet::new(),
            resolved: Vec::new(),
            resolved_set: BTreeSet::new(),
        }
    }

    fn promise(&mut self, name: &str) -> bool {
        if self.promised_set.contains(name) {
            return false;
        }
        self.promised_set.insert(name.to_string());
        self.promised.push(name.to_string());
        true
    }

    /// Adds `name` to the promised set, then recursively promises:
    /// - every forward dependency of `name` that is itself a known
    ///   candidate (so it actually gets loaded, not just waited for);
    ///   a missing *required* dependency is still promised by name alone,
    ///   so `step_through` can report the correct missing-dependency chain;
    /// - every module that declares a reverse dependency on `name`, since
    ///   that relationship only matters once `name` is actually in play.
    fn require(&mut self, name: &str) {
        if !self.promise(name) {
            return;
        }

        let forward: Vec<(String, bool)> = self
            .candidates
            .get(name)
            .map(|c| {
                c.meta
                    .dependencies
                    .iter()
                    .map(|d| (d.module.clone(), d.optional))
                    .collect()
            })
            .unwrap_or_default();
        for (dep_name, optional) in forward {
            if self.candidates.contains_key(&dep_name) {
                self.require(&dep_name);
            } else if !optional {
                self.promise(&dep_name);
            }
        }

        let reverse_dependents: Vec<String> = self
            .candidates
            .iter()
            .filter(|(other_name, candidate)| {
                other_name.as_str() != name
                    && candidate
                        .meta
                        .reverse_dependencies
                        .iter()
                        .any(|d| d.module == name)
            })
            .map(|(other_name, _)| other_name.clone())
            .collect();
        for other_name in reverse_dependents {
            self.require(&other_name);
        }
    }

    /// A single promotion pass: scans the promised set in order and moves
    /// the first not-yet-resolved module whose dependencies are all
    /// already resolved into the result. Optional dependencies are only
    /// treated as a precondition when `follow_optional` is set and the
    /// dependency is itself a candidate at all; a missing optional
    /// dependency is otherwise simply skipped.
    ///
    /// Returns `true` if it promoted something, so the caller knows to
    /// keep looping.
    fn step(&mut self, follow_optional: bool) -> bool {
        for name in self.promised.clone() {
            if self.resolved_set.contains(&name) {
                continue;
            }
            // No entry means `name` was promised (pulled in as someone's
            // dependency) but never actually found among the candidates;
            // it can never become ready, so leave it for `step_through`
            // to report as the missing dependency.
            let Some(edges) = self.effective_deps.get(&name) else {
                continue;
            };
            let ready = edges.iter().all(|edge| {
                if self.resolved_set.contains(&edge.module) {
                    return true;
                }
                if edge.optional {
                    if follow_optional && self.candidates.contains_key(&edge.module) {
                        return false;
                    }
                    return true;
                }
                false
            });
            if ready {
                self.resolved_set.insert(name.clone());
                self.resolved.push(name);
                return true;
            }
        }
        false
    }

    /// Runs `step` to a fixed point, first following optional dependencies
    /// (pass A), then without (pass B) so modules blocked only by a
    /// missing optional dependency still get placed.
    fn step_through(mut self) -> Result<Resolution, ResolveError> {
        while self.step(true) {}
        while self.step(false) {}

        if self.resolved_set.len() < self.promised_set.len() {
            let missing_module = self
                .promised
                .iter()
                .find(|name| !self.resolved_set.contains(*name))
                .expect("promised.len() > resolved.len() implies an unresolved entry exists")
                .clone();
            let missing_dep = self
                .effective_deps
                .get(&missing_module)
                .and_then(|edges| edges.iter().find(|e| !self.resolved_set.contains(&e.module)))
                .map(|edge| edge.module.clone())
                .unwrap_or_else(|| missing_module.clone());
            return Err(ResolveError::MissingDependency {
                module: missing_module,
                missing: missing_dep,
            });
        }

        let skipped_optional = self.skipped_optionals();
        Ok(Resolution { order: self.resolved, skipped_optional })
    }

    /// Every resolved module's optional edge that points at a dependency
    /// which never itself got resolved — i.e. was genuinely unavailable,
    /// not just ordered differently.
    fn skipped_optionals(&self) -> Vec<SkippedOptional> {
        let mut skipped = Vec::new();
        for name in &self.resolved {
            let Some(edges) = self.effective_deps.get(name) else { continue };
            for edge in edges {
                if edge.optional && !self.resolved_set.contains(&edge.module) {
                    skipped.push(SkippedOptional { module: name.clone(), missing: edge.module.clone() });
                }
            }
        }
        skipped
    }
}

#[cfg(test)]
mod tests;
