//! Static catalog of agents, their capabilities and dependencies.
//!
//! The registry owns every [`AgentDescriptor`] for the lifetime of the process.
//! It answers capability queries, computes the execution plan and keeps light
//! runtime statistics per agent.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agents::Agent;
use crate::error::{AgentError, Result};

/// Closed set of agent kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Gathers raw profile data from an external collaborator
    Collector,
    /// Turns collected data into a component score
    Scorer,
    /// Judges, compares or combines scores
    Evaluator,
}

/// Immutable description of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent id
    pub id: String,
    /// Execution kind
    pub kind: AgentKind,
    /// Capability tags used for discovery
    pub capabilities: BTreeSet<String>,
    /// Ids of agents that must reach a terminal status first
    pub dependencies: BTreeSet<String>,
    /// A failed required agent fails the whole run
    pub required: bool,
    /// Human-readable description
    pub description: String,
    /// Agent version string
    pub version: String,
}

impl AgentDescriptor {
    /// Creates a required descriptor with no capabilities or dependencies
    pub fn new(id: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            capabilities: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            required: true,
            description: String::new(),
            version: "1.0.0".to_string(),
        }
    }

    /// Adds capability tags
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(caps.into_iter().map(Into::into));
        self
    }

    /// Adds dependency ids
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Sets the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the agent optional: its failure never fails the run
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Whether the agent declares the capability
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Health classification derived from runtime stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    /// Success rate of at least 95%
    Healthy,
    /// Success rate of at least 80%
    Degraded,
    /// Success rate below 80%
    Unhealthy,
    /// No executions yet
    Unknown,
}

/// Runtime execution statistics for one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    /// Executions recorded
    pub total: u64,
    /// Executions that succeeded
    pub succeeded: u64,
    /// Executions that failed
    pub failed: u64,
    /// Running mean execution time in milliseconds
    pub mean_duration_ms: f64,
    /// Time of the most recent execution
    pub last_execution: Option<DateTime<Utc>>,
}

impl AgentStats {
    /// Fraction of successful executions, zero when nothing ran
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    /// Derived health classification
    pub fn health(&self) -> AgentHealth {
        if self.total == 0 {
            return AgentHealth::Unknown;
        }
        let rate = self.success_rate();
        if rate >= 0.95 {
            AgentHealth::Healthy
        } else if rate >= 0.80 {
            AgentHealth::Degraded
        } else {
            AgentHealth::Unhealthy
        }
    }

    fn record(&mut self, success: bool, duration: Duration) {
        self.total += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        let ms = duration.as_secs_f64() * 1000.0;
        self.mean_duration_ms += (ms - self.mean_duration_ms) / self.total as f64;
        self.last_execution = Some(Utc::now());
    }
}

/// Listing entry combining descriptor, enablement and stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// The registered descriptor
    pub descriptor: AgentDescriptor,
    /// Whether the agent is scheduled normally
    pub enabled: bool,
    /// Whether an executable implementation is bound
    pub has_handler: bool,
    /// Runtime stats
    pub stats: AgentStats,
    /// Health derived from the stats
    pub health: AgentHealth,
}

/// A dependency that points at no registered agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// Agent declaring the dependency
    pub agent: String,
    /// Unresolved dependency id
    pub dependency: String,
}

/// Registry-wide diagnostics; never fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Registered agents
    pub agent_count: usize,
    /// Agents currently enabled
    pub enabled_count: usize,
    /// Number of agents declaring each capability
    pub capability_histogram: BTreeMap<String, usize>,
    /// Number of agents per kind
    pub kind_histogram: BTreeMap<String, usize>,
    /// Dependencies that resolve to nothing
    pub missing_dependencies: Vec<MissingDependency>,
    /// A dependency cycle, if one exists
    pub cycle: Option<Vec<String>>,
    /// Agents whose runtime health is unhealthy
    pub unhealthy_agents: Vec<String>,
    /// True when the plan can be built
    pub plannable: bool,
}

struct RegistryEntry {
    descriptor: AgentDescriptor,
    handler: Option<Arc<dyn Agent>>,
    enabled: bool,
    stats: AgentStats,
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

/// Catalog of agents shared by the orchestrator and the service layer
#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

impl AgentRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor without an executable implementation
    pub fn register(&self, descriptor: AgentDescriptor) -> Result<()> {
        self.insert(descriptor, None)
    }

    /// Registers an executable agent under its own descriptor
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let descriptor = agent.descriptor().clone();
        self.insert(descriptor, Some(agent))
    }

    fn insert(&self, descriptor: AgentDescriptor, handler: Option<Arc<dyn Agent>>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&descriptor.id) {
            return Err(AgentError::DuplicateId(descriptor.id));
        }
        debug!("Registering agent {} ({:?})", descriptor.id, descriptor.kind);
        let position = inner.entries.len();
        inner.index.insert(descriptor.id.clone(), position);
        inner.entries.push(RegistryEntry {
            descriptor,
            handler,
            enabled: true,
            stats: AgentStats::default(),
        });
        Ok(())
    }

    /// Removes every registration
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.index.clear();
        info!("Agent registry reset");
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor for an id
    pub fn get(&self, id: &str) -> Option<AgentDescriptor> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&i| inner.entries[i].descriptor.clone())
    }

    /// Executable implementation bound to an id
    pub fn handler(&self, id: &str) -> Option<Arc<dyn Agent>> {
        let inner = self.inner.read();
        inner.index.get(id).and_then(|&i| inner.entries[i].handler.clone())
    }

    /// All descriptors in registration order
    pub fn list(&self) -> Vec<AgentDescriptor> {
        self.inner.read().entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Descriptors, enablement and runtime stats in registration order
    pub fn list_info(&self) -> Vec<AgentInfo> {
        self.inner.read().entries.iter().map(Self::info_of).collect()
    }

    /// Listing entry for one agent
    pub fn agent_info(&self, id: &str) -> Option<AgentInfo> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&i| Self::info_of(&inner.entries[i]))
    }

    fn info_of(entry: &RegistryEntry) -> AgentInfo {
        AgentInfo {
            descriptor: entry.descriptor.clone(),
            enabled: entry.enabled,
            has_handler: entry.handler.is_some(),
            stats: entry.stats.clone(),
            health: entry.stats.health(),
        }
    }

    /// Descriptors declaring the capability, in registration order
    pub fn discover(&self, capability: &str) -> Vec<AgentDescriptor> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.descriptor.has_capability(capability))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Ids of agents that declare `id` as a dependency
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.descriptor.dependencies.contains(id))
            .map(|e| e.descriptor.id.clone())
            .collect()
    }

    /// Enables or disables an agent; disabled agents end skipped
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let i = *inner.index.get(id).ok_or_else(|| AgentError::UnknownAgent(id.to_string()))?;
        inner.entries[i].enabled = enabled;
        info!("Agent {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Whether the agent is enabled; unknown ids are not
    pub fn is_enabled(&self, id: &str) -> bool {
        let inner = self.inner.read();
        inner.index.get(id).map_or(false, |&i| inner.entries[i].enabled)
    }

    /// Records one execution in the agent's runtime stats
    pub fn record_execution(&self, id: &str, success: bool, duration: Duration) {
        let mut inner = self.inner.write();
        if let Some(&i) = inner.index.get(id) {
            inner.entries[i].stats.record(success, duration);
        }
    }

    /// Runtime stats for one agent
    pub fn stats(&self, id: &str) -> Option<AgentStats> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&i| inner.entries[i].stats.clone())
    }

    /// Topological order of every registered agent
    ///
    /// Each dependency precedes its dependents. Among agents that are ready at
    /// the same time, the one registered first goes first, so the same
    /// registrations always yield the same plan.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        if let Some(missing) = Self::missing_dependencies(&inner).into_iter().next() {
            return Err(AgentError::MissingDependency {
                agent: missing.agent,
                dependency: missing.dependency,
            });
        }
        if let Some(cycle) = Self::find_cycle(&inner) {
            return Err(AgentError::CyclicDependency(cycle));
        }

        let n = inner.entries.len();
        let mut pending: Vec<usize> = inner.entries.iter().map(|e| e.descriptor.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, entry) in inner.entries.iter().enumerate() {
            for dep in &entry.descriptor.dependencies {
                dependents[inner.index[dep]].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..n).filter(|&i| pending[i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(inner.entries[i].descriptor.id.clone());
            for &d in &dependents[i] {
                pending[d] -= 1;
                if pending[d] == 0 {
                    ready.push(Reverse(d));
                }
            }
        }
        Ok(order)
    }

    /// Summarizes the registry without failing
    pub fn health_report(&self) -> HealthReport {
        let inner = self.inner.read();
        let mut capability_histogram = BTreeMap::new();
        let mut kind_histogram = BTreeMap::new();
        for entry in &inner.entries {
            for cap in &entry.descriptor.capabilities {
                *capability_histogram.entry(cap.clone()).or_insert(0) += 1;
            }
            let kind = format!("{:?}", entry.descriptor.kind).to_lowercase();
            *kind_histogram.entry(kind).or_insert(0) += 1;
        }
        let missing_dependencies = Self::missing_dependencies(&inner);
        let cycle = Self::find_cycle(&inner);
        HealthReport {
            agent_count: inner.entries.len(),
            enabled_count: inner.entries.iter().filter(|e| e.enabled).count(),
            capability_histogram,
            kind_histogram,
            plannable: missing_dependencies.is_empty() && cycle.is_none(),
            missing_dependencies,
            cycle,
            unhealthy_agents: inner
                .entries
                .iter()
                .filter(|e| e.stats.health() == AgentHealth::Unhealthy)
                .map(|e| e.descriptor.id.clone())
                .collect(),
        }
    }

    fn missing_dependencies(inner: &RegistryInner) -> Vec<MissingDependency> {
        inner
            .entries
            .iter()
            .flat_map(|e| {
                e.descriptor
                    .dependencies
                    .iter()
                    .filter(|d| !inner.index.contains_key(*d))
                    .map(|d| MissingDependency {
                        agent: e.descriptor.id.clone(),
                        dependency: d.clone(),
                    })
            })
            .collect()
    }

    /// Depth-first search with white/gray/black marking. Returns the first
    /// cycle found as a closed path, e.g. `[a, b, a]`.
    fn find_cycle(inner: &RegistryInner) -> Option<Vec<String>> {
        let n = inner.entries.len();
        let mut color = vec![Color::White; n];
        let mut stack = Vec::new();
        for start in 0..n {
            if color[start] == Color::White {
                if let Some(cycle) = Self::visit(inner, start, &mut color, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        inner: &RegistryInner,
        node: usize,
        color: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        color[node] = Color::Gray;
        stack.push(node);

        let mut deps: Vec<usize> = inner.entries[node]
            .descriptor
            .dependencies
            .iter()
            .filter_map(|d| inner.index.get(d).copied())
            .collect();
        deps.sort_unstable();

        for dep in deps {
            match color[dep] {
                Color::Gray => {
                    let from = stack.iter().position(|&s| s == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[from..]
                        .iter()
                        .map(|&i| inner.entries[i].descriptor.id.clone())
                        .collect();
                    path.push(inner.entries[dep].descriptor.id.clone());
                    return Some(path);
                }
                Color::White => {
                    if let Some(cycle) = Self::visit(inner, dep, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        color[node] = Color::Black;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn scorer(id: &str, deps: &[&str]) -> AgentDescriptor {
        AgentDescriptor::new(id, AgentKind::Scorer)
            .with_capabilities(["scoring"])
            .with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = AgentRegistry::new();
        registry.register(scorer("a", &[])).unwrap();
        let err = registry.register(scorer("a", &[])).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateId(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_discover_uses_registration_order() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::new("z_collector", AgentKind::Collector).with_capabilities(["data_collection"]))
            .unwrap();
        registry.register(scorer("b", &[])).unwrap();
        registry
            .register(AgentDescriptor::new("a_collector", AgentKind::Collector).with_capabilities(["data_collection"]))
            .unwrap();

        let found: Vec<String> = registry.discover("data_collection").into_iter().map(|d| d.id).collect();
        assert_eq!(found, vec!["z_collector", "a_collector"]);
        assert!(registry.discover("nothing").is_empty());
    }

    #[test]
    fn test_ties_broken_by_registration_order() {
        let registry = AgentRegistry::new();
        registry.register(scorer("aggregate", &["skill", "github"])).unwrap();
        registry.register(scorer("github", &[])).unwrap();
        registry.register(scorer("skill", &["form"])).unwrap();
        registry.register(scorer("form", &[])).unwrap();

        let order = registry.execution_order().unwrap();
        assert_eq!(order, vec!["github", "form", "skill", "aggregate"]);
        assert_eq!(registry.execution_order().unwrap(), order);
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let registry = AgentRegistry::new();
        registry.register(scorer("a", &["b"])).unwrap();
        registry.register(scorer("b", &["a"])).unwrap();

        match registry.execution_order() {
            Err(AgentError::CyclicDependency(path)) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
        let report = registry.health_report();
        assert!(!report.plannable);
        assert!(report.cycle.is_some());
    }

    #[test]
    fn test_missing_dependency_reported() {
        let registry = AgentRegistry::new();
        registry.register(scorer("a", &["ghost"])).unwrap();

        assert!(matches!(
            registry.execution_order(),
            Err(AgentError::MissingDependency { ref dependency, .. }) if dependency == "ghost"
        ));
        let report = registry.health_report();
        assert_eq!(report.missing_dependencies.len(), 1);
        assert_eq!(report.agent_count, 1);
    }

    #[test]
    fn test_health_report_histograms_and_stats() {
        let registry = AgentRegistry::new();
        registry.register(scorer("a", &[])).unwrap();
        registry.register(scorer("b", &["a"]).with_capabilities(["github"])).unwrap();
        for _ in 0..3 {
            registry.record_execution("b", false, Duration::from_millis(10));
        }

        let report = registry.health_report();
        assert_eq!(report.capability_histogram.get("scoring"), Some(&2));
        assert_eq!(report.capability_histogram.get("github"), Some(&1));
        assert_eq!(report.kind_histogram.get("scorer"), Some(&2));
        assert_eq!(report.unhealthy_agents, vec!["b"]);
        assert_eq!(registry.stats("a").map(|s| s.health()), Some(AgentHealth::Unknown));
        assert_eq!(registry.dependents("a"), vec!["b"]);
    }

    #[test]
    fn test_reset_clears_registrations() {
        let registry = AgentRegistry::new();
        registry.register(scorer("a", &[])).unwrap();
        registry.reset();
        assert!(registry.is_empty());
        registry.register(scorer("a", &[])).unwrap();
    }

    proptest! {
        // Random DAGs: agent i may only depend on agents registered before it,
        // then registration order is shuffled by reversing it.
        #[test]
        fn prop_dependencies_precede_dependents(edges in proptest::collection::vec((0usize..12, 0usize..12), 0..40)) {
            let n = 12;
            let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
            for (a, b) in edges {
                if a > b {
                    deps[a].insert(b);
                }
            }
            let registry = AgentRegistry::new();
            for i in (0..n).rev() {
                let names: Vec<String> = deps[i].iter().map(|d| format!("agent{}", d)).collect();
                registry.register(scorer(&format!("agent{}", i), &[])
                    .with_dependencies(names)).unwrap();
            }
            let order = registry.execution_order().unwrap();
            prop_assert_eq!(order.len(), n);
            let position: HashMap<&String, usize> = order.iter().enumerate().map(|(i, id)| (id, i)).collect();
            for descriptor in registry.list() {
                for dep in &descriptor.dependencies {
                    prop_assert!(position[dep] < position[&descriptor.id]);
                }
            }
            prop_assert_eq!(registry.execution_order().unwrap(), order);
        }

        #[test]
        fn prop_ring_cycles_always_detected(len in 2usize..8) {
            let registry = AgentRegistry::new();
            for i in 0..len {
                let next = format!("agent{}", (i + 1) % len);
                registry.register(scorer(&format!("agent{}", i), &[]).with_dependencies([next])).unwrap();
            }
            prop_assert!(matches!(registry.execution_order(), Err(AgentError::CyclicDependency(_))));
        }
    }
}
