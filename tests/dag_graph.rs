// tests/dag_graph.rs

mod common;

use dagmaster::dag::{DependencyGraph, GraphEdge, GraphSnapshot};
use dagmaster::errors::GraphError;

fn diamond() -> DependencyGraph<u32> {
    // A -> B -> D, A -> C -> D
    let g = DependencyGraph::new();
    for (i, n) in ["A", "B", "C", "D"].iter().enumerate() {
        g.add_node(*n, i as u32);
    }
    assert!(g.add_edge("A", "B", (), false));
    assert!(g.add_edge("A", "C", (), false));
    assert!(g.add_edge("B", "D", (), false));
    assert!(g.add_edge("C", "D", (), false));
    g
}

#[test]
fn begin_and_end_nodes_of_a_diamond() {
    common::init_tracing();
    let g = diamond();

    assert_eq!(g.begin_nodes(), vec!["A"]);
    assert_eq!(g.end_nodes(), vec!["D"]);
    assert_eq!(g.previous_nodes("D"), vec!["B", "C"]);
    assert_eq!(g.subsequent_nodes("A"), vec!["B", "C"]);
    assert_eq!(g.indegree("D"), 2);
    assert_eq!(g.outdegree("D"), 0);
    assert_eq!(g.descendants("A"), vec!["B", "C", "D"]);
}

#[test]
fn topological_sort_respects_edges() {
    let g = diamond();
    let order = g.topological_sort().unwrap();
    let pos = |n: &str| order.iter().position(|x| x == n).unwrap();

    assert_eq!(order.len(), 4);
    assert!(pos("A") < pos("B"));
    assert!(pos("A") < pos("C"));
    assert!(pos("B") < pos("D"));
    assert!(pos("C") < pos("D"));
}

#[test]
fn cycle_closing_edge_is_rejected_and_graph_unchanged() {
    let g = diamond();
    let before = g.snapshot();

    assert!(!g.add_edge("D", "A", (), false));
    assert!(!g.add_edge("B", "B", (), false));

    assert!(!g.contains_edge("D", "A"));
    assert!(!g.has_cycle());
    assert_eq!(g.node_count(), 4);
    assert_eq!(
        before.nodes, g.snapshot().nodes,
        "rejected edges must not touch the node table"
    );
}

#[test]
fn missing_endpoints_are_created_only_on_request() {
    let g: DependencyGraph<u32> = DependencyGraph::new();
    g.add_node("A", 1);

    assert!(!g.add_edge("A", "X", (), false));
    assert!(!g.contains_node("X"));

    assert!(g.add_edge("A", "X", (), true));
    assert!(g.contains_node("X"));
    assert_eq!(g.node("X"), Some(0));
}

#[test]
fn remove_edge_frees_the_successor() {
    let g = diamond();
    assert!(g.remove_edge("B", "D"));
    assert!(!g.remove_edge("B", "D"));
    assert_eq!(g.previous_nodes("D"), vec!["C"]);
    assert_eq!(g.end_nodes(), vec!["B", "D"]);
    assert_eq!(g.edge_count(), 3);
}

#[test]
fn snapshot_rebuilds_the_same_graph() {
    let g = diamond();
    let snap = g.snapshot();
    let json = serde_json::to_string(&snap).unwrap();
    let back: GraphSnapshot<u32, ()> = serde_json::from_str(&json).unwrap();

    let rebuilt = DependencyGraph::from_snapshot(back).unwrap();
    assert_eq!(rebuilt.snapshot(), snap);
}

#[test]
fn cyclic_snapshot_is_refused() {
    let snap = GraphSnapshot {
        nodes: vec![("A".to_string(), 0u32), ("B".to_string(), 1)],
        edges: vec![
            GraphEdge { from: "A".into(), to: "B".into(), info: () },
            GraphEdge { from: "B".into(), to: "A".into(), info: () },
        ],
    };
    assert_eq!(
        DependencyGraph::from_snapshot(snap).unwrap_err(),
        GraphError::CycleDetected
    );

    let dangling = GraphSnapshot {
        nodes: vec![("A".to_string(), 0u32)],
        edges: vec![GraphEdge { from: "A".into(), to: "Z".into(), info: () }],
    };
    assert_eq!(
        DependencyGraph::from_snapshot(dangling).unwrap_err(),
        GraphError::UnknownNode("Z".to_string())
    );
}

#[test]
fn graph_is_shareable_across_threads() {
    let g = std::sync::Arc::new(DependencyGraph::<u32>::new());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let g = g.clone();
            std::thread::spawn(move || {
                for i in 0..25u32 {
                    g.add_node(format!("n{t}_{i}"), i);
                    if i > 0 {
                        g.add_edge(&format!("n{t}_{}", i - 1), &format!("n{t}_{i}"), (), false);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(g.node_count(), 100);
    assert_eq!(g.edge_count(), 96);
    assert!(!g.has_cycle());
}
