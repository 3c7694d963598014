//! Dependency-aware wave scheduling.
//!
//! A wave is a set of jobs with no dependency edge between them. Waves run in
//! order; every in-set dependency of a job sits in a strictly earlier wave.

use adsync_core::{ConfigError, JobConfig, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Builds the dependency graph for a job set and levels it into waves.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    /// job -> in-set dependencies
    graph: HashMap<String, BTreeSet<String>>,
    /// job -> in-set dependents, in input order
    reverse: HashMap<String, Vec<String>>,
    /// Input order
    order: Vec<String>,
    /// Priority per job
    priority: HashMap<String, i32>,
    /// Waves from the latest successful schedule
    waves: Vec<Vec<String>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for `jobs` and partition it into waves.
    ///
    /// Dependencies on jobs outside `jobs` are treated as satisfied.
    pub fn schedule(&mut self, jobs: &[JobConfig]) -> Result<Vec<Vec<String>>> {
        self.build_graph(jobs)?;
        self.detect_cycles()?;

        let waves = self.level();
        let scheduled: usize = waves.iter().map(Vec::len).sum();
        if scheduled != self.order.len() {
            return Err(ConfigError::UnscheduledJobs {
                expected: self.order.len(),
                scheduled,
            });
        }

        debug!(jobs = scheduled, waves = waves.len(), "Scheduled jobs into waves");
        self.waves = waves.clone();
        Ok(waves)
    }

    fn build_graph(&mut self, jobs: &[JobConfig]) -> Result<()> {
        self.graph.clear();
        self.reverse.clear();
        self.order.clear();
        self.priority.clear();
        self.waves.clear();

        for job in jobs {
            if job.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if self.priority.insert(job.name.clone(), job.priority).is_some() {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
            self.order.push(job.name.clone());
        }

        for job in jobs {
            let deps: BTreeSet<String> = job
                .dependencies
                .iter()
                .filter(|d| self.priority.contains_key(d.as_str()))
                .cloned()
                .collect();

            for dep in &deps {
                self.reverse.entry(dep.clone()).or_default().push(job.name.clone());
            }
            self.graph.insert(job.name.clone(), deps);
        }

        Ok(())
    }

    /// Depth-first search with an explicit recursion stack.
    fn detect_cycles(&self) -> Result<()> {
        let mut visited: HashSet<&str> = HashSet::new();

        for root in &self.order {
            if visited.contains(root.as_str()) {
                continue;
            }

            // (node, its dependencies, index of the next one to visit)
            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            stack.push((root.as_str(), self.deps_of(root), 0));
            on_stack.insert(root.as_str());

            while let Some((node, deps, next)) = stack.last_mut() {
                if let Some(&dep) = deps.get(*next) {
                    *next += 1;
                    if on_stack.contains(dep) {
                        let start = stack.iter().position(|(n, _, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(n, _, _)| n.to_string()).collect();
                        path.push(dep.to_string());
                        return Err(ConfigError::DependencyCycle {
                            job: dep.to_string(),
                            path,
                        });
                    }
                    if !visited.contains(dep) {
                        on_stack.insert(dep);
                        stack.push((dep, self.deps_of(dep), 0));
                    }
                } else {
                    let done = *node;
                    on_stack.remove(done);
                    visited.insert(done);
                    stack.pop();
                }
            }
        }

        Ok(())
    }

    fn deps_of(&self, name: &str) -> Vec<&str> {
        self.graph
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Kahn leveling: each pass drains the whole ready queue as one wave.
    fn level(&self) -> Vec<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), self.graph.get(name).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: Vec<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        let mut waves = Vec::new();
        while !ready.is_empty() {
            let mut wave = std::mem::take(&mut ready);
            wave.sort_by_key(|name| self.priority.get(*name).copied().unwrap_or_default());

            for name in &wave {
                for dependent in self.reverse.get(*name).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(dependent.as_str());
                        }
                    }
                }
            }

            waves.push(wave.into_iter().map(str::to_string).collect());
        }

        waves
    }

    /// In-set dependencies of a job.
    pub fn get_dependencies(&self, name: &str) -> BTreeSet<String> {
        self.graph.get(name).cloned().unwrap_or_default()
    }

    /// In-set jobs that depend on `name`.
    pub fn get_dependents(&self, name: &str) -> Vec<String> {
        self.reverse.get(name).cloned().unwrap_or_default()
    }

    /// In-set dependencies of `name` that are not in `completed`.
    pub fn unmet_dependencies(&self, name: &str, completed: &HashSet<String>) -> Vec<String> {
        self.graph
            .get(name)
            .map(|deps| deps.iter().filter(|d| !completed.contains(*d)).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether every in-set dependency of `name` has completed.
    pub fn can_execute(&self, name: &str, completed: &HashSet<String>) -> bool {
        self.unmet_dependencies(name, completed).is_empty()
    }

    /// Waves of the latest schedule flattened into one run order.
    pub fn execution_order(&self) -> Vec<String> {
        self.waves.iter().flatten().cloned().collect()
    }

    /// Reject caller-supplied groups where a member depends on another member.
    ///
    /// Checked against the graph of the latest schedule.
    pub fn validate_parallel_groups(&self, groups: &[Vec<String>]) -> Result<()> {
        for (index, group) in groups.iter().enumerate() {
            let members: HashSet<&str> = group.iter().map(String::as_str).collect();
            for job in group {
                if !self.graph.contains_key(job) {
                    return Err(ConfigError::UnknownGroupMember {
                        group: index,
                        job: job.clone(),
                    });
                }
                if let Some(dep) = self.deps_of(job).into_iter().find(|d| members.contains(d)) {
                    return Err(ConfigError::InvalidParallelGroup {
                        group: index,
                        job: job.clone(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, deps: &[&str]) -> JobConfig {
        JobConfig::new(name).with_dependencies(deps.iter().copied())
    }

    fn names(wave: &[&str]) -> Vec<String> {
        wave.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let mut scheduler = Scheduler::new();
        let waves = scheduler
            .schedule(&[job("a", &[]), job("b", &["a"]), job("c", &["b"])])
            .unwrap();

        assert_eq!(waves, vec![names(&["a"]), names(&["b"]), names(&["c"])]);
        assert_eq!(scheduler.execution_order(), names(&["a", "b", "c"]));
    }

    #[test]
    fn test_diamond() {
        let mut scheduler = Scheduler::new();
        let waves = scheduler
            .schedule(&[
                job("root", &[]),
                job("left", &["root"]),
                job("right", &["root"]),
                job("join", &["left", "right"]),
            ])
            .unwrap();

        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], names(&["root"]));
        assert_eq!(waves[1], names(&["left", "right"]));
        assert_eq!(waves[2], names(&["join"]));
        assert_eq!(scheduler.get_dependents("root"), names(&["left", "right"]));
    }

    #[test]
    fn test_priority_tie_break_is_stable() {
        let mut scheduler = Scheduler::new();
        let waves = scheduler
            .schedule(&[
                JobConfig::new("x").with_priority(3),
                JobConfig::new("y").with_priority(1),
                JobConfig::new("z").with_priority(3),
                JobConfig::new("w").with_priority(1),
            ])
            .unwrap();

        assert_eq!(waves, vec![names(&["y", "w", "x", "z"])]);
    }

    #[test]
    fn test_out_of_set_dependency_is_satisfied() {
        let mut scheduler = Scheduler::new();
        let waves = scheduler.schedule(&[job("b", &["a"])]).unwrap();

        assert_eq!(waves, vec![names(&["b"])]);
        assert!(scheduler.get_dependencies("b").is_empty());
        assert!(scheduler.can_execute("b", &HashSet::new()));
    }

    #[test]
    fn test_two_node_cycle() {
        let mut scheduler = Scheduler::new();
        let err = scheduler
            .schedule(&[job("a", &["b"]), job("b", &["a"])])
            .unwrap_err();

        match err {
            ConfigError::DependencyCycle { job, path } => {
                assert!(job == "a" || job == "b");
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_long_cycle_behind_acyclic_prefix() {
        let mut scheduler = Scheduler::new();
        let err = scheduler
            .schedule(&[
                job("start", &[]),
                job("p", &["start", "r"]),
                job("q", &["p"]),
                job("r", &["q"]),
            ])
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::DependencyCycle { ref job, .. } if ["p", "q", "r"].contains(&job.as_str())
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut scheduler = Scheduler::new();
        assert!(matches!(
            scheduler.schedule(&[job("a", &[]), job("a", &[])]),
            Err(ConfigError::DuplicateJob(name)) if name == "a"
        ));
    }

    #[test]
    fn test_can_execute() {
        let mut scheduler = Scheduler::new();
        scheduler
            .schedule(&[job("a", &[]), job("b", &[]), job("c", &["a", "b"])])
            .unwrap();

        let mut completed = HashSet::new();
        assert!(scheduler.can_execute("a", &completed));
        assert!(!scheduler.can_execute("c", &completed));

        completed.insert("a".to_string());
        assert_eq!(scheduler.unmet_dependencies("c", &completed), names(&["b"]));

        completed.insert("b".to_string());
        assert!(scheduler.can_execute("c", &completed));
    }

    #[test]
    fn test_parallel_group_with_dependency_rejected() {
        let mut scheduler = Scheduler::new();
        scheduler
            .schedule(&[job("a", &[]), job("b", &["a"]), job("c", &[])])
            .unwrap();

        assert!(scheduler
            .validate_parallel_groups(&[names(&["a", "c"])])
            .is_ok());
        assert!(matches!(
            scheduler.validate_parallel_groups(&[names(&["a", "c"]), names(&["c", "b", "a"])]),
            Err(ConfigError::InvalidParallelGroup { group: 1, ref job, ref dependency })
                if job == "b" && dependency == "a"
        ));
    }

    #[test]
    fn test_empty_input() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.schedule(&[]).unwrap().is_empty());
    }
}
