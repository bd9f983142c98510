use fairfound_agents::registry::{AgentDescriptor, AgentKind, AgentRegistry};
use fairfound_agents::AgentError;
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::HashMap;

fn agent_id(i: usize) -> String {
    format!("agent-{:02}", i)
}

/// Edges point from a node to nodes with smaller indices, registered in a shuffled order
fn dag() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
    (1usize..14).prop_flat_map(|n| {
        let edges = vec(vec(any::<bool>(), n), n).prop_map(|mask| {
            mask.iter()
                .enumerate()
                .map(|(i, row)| (0..i).filter(|&j| row[j]).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        });
        (edges, Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    })
}

fn build(edges: &[Vec<usize>], registration: &[usize]) -> AgentRegistry {
    let registry = AgentRegistry::new();
    for &i in registration {
        registry
            .register(
                AgentDescriptor::new(agent_id(i), AgentKind::Scorer)
                    .with_dependencies(edges[i].iter().map(|&j| agent_id(j))),
            )
            .unwrap();
    }
    registry
}

proptest! {
    #[test]
    fn plan_respects_every_dependency((edges, registration) in dag()) {
        let registry = build(&edges, &registration);
        let order = registry.execution_order().unwrap();
        prop_assert_eq!(order.len(), edges.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(p, id)| (id.as_str(), p)).collect();
        for (i, deps) in edges.iter().enumerate() {
            for &j in deps {
                prop_assert!(position[agent_id(j).as_str()] < position[agent_id(i).as_str()]);
            }
        }
    }

    #[test]
    fn plan_is_deterministic((edges, registration) in dag()) {
        let first = build(&edges, &registration).execution_order().unwrap();
        let second = build(&edges, &registration).execution_order().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn ring_is_reported_as_cycle(n in 2usize..10) {
        let registry = AgentRegistry::new();
        for i in 0..n {
            registry
                .register(
                    AgentDescriptor::new(agent_id(i), AgentKind::Evaluator)
                        .with_dependencies([agent_id((i + 1) % n)]),
                )
                .unwrap();
        }
        match registry.execution_order() {
            Err(AgentError::CyclicDependency(path)) => prop_assert!(path.len() >= n),
            other => prop_assert!(false, "expected a cycle, got {:?}", other),
        }
        prop_assert!(registry.health_report().cycle.is_some());
        prop_assert!(!registry.health_report().plannable);
    }
}

#[test]
fn test_independent_agents_keep_registration_order() {
    let registry = AgentRegistry::new();
    for id in ["b", "a", "c"] {
        registry.register(AgentDescriptor::new(id, AgentKind::Collector)).unwrap();
    }
    assert_eq!(registry.execution_order().unwrap(), vec!["b", "a", "c"]);
}

#[test]
fn test_unknown_dependency_blocks_planning() {
    let registry = AgentRegistry::new();
    registry
        .register(AgentDescriptor::new("scorer", AgentKind::Scorer).with_dependencies(["collector"]))
        .unwrap();
    assert!(matches!(
        registry.execution_order(),
        Err(AgentError::MissingDependency { ref dependency, .. }) if dependency == "collector"
    ));
    assert_eq!(registry.health_report().missing_dependencies.len(), 1);
}
