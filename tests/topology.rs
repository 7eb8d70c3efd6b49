use numabind::{CpuMask, Error, Topology, LOCAL_DISTANCE};

#[test]
fn every_node_reports_consistent_memory() {
    let topology = Topology::system();
    for node in topology.nodes() {
        let size = topology.node_size(node).unwrap();
        let free = topology.free_size(node).unwrap();
        assert!(free <= size, "node {} has {} free of {}", node, free, size);
    }
}

#[test]
fn distances_are_local_on_the_diagonal_and_symmetric() {
    let topology = Topology::system();
    let nodes = topology.nodes();
    for &a in &nodes {
        assert_eq!(topology.distance(a, a).unwrap(), LOCAL_DISTANCE);
        for &b in &nodes {
            let there = topology.distance(a, b).unwrap();
            let back = topology.distance(b, a).unwrap();
            assert_eq!(there, back, "distance {}->{} differs from {}->{}", a, b, b, a);
            if a != b {
                assert!(there > LOCAL_DISTANCE);
            }
        }
    }
}

#[test]
fn node_cpu_sets_are_disjoint() {
    let topology = Topology::system();
    let masks: Vec<CpuMask> = topology
        .nodes()
        .into_iter()
        .map(|node| {
            let mut mask = CpuMask::system();
            let stored = topology.node_to_cpus(node, &mut mask).unwrap();
            assert_eq!(stored, mask.count());
            mask
        })
        .collect();

    for (i, a) in masks.iter().enumerate() {
        for b in &masks[i + 1..] {
            assert!(a.is_disjoint(b), "{} overlaps {}", a, b);
        }
    }
}

#[test]
fn nodes_above_the_maximum_do_not_exist() {
    let topology = Topology::system();
    let missing = topology.max_node() + 1;
    assert!(!topology.node_exists(missing));
    assert!(matches!(topology.node_size(missing), Err(Error::InvalidNode(node)) if node == missing));
    assert!(matches!(topology.distance(0, missing), Err(Error::InvalidNode(_))));
    assert_eq!(topology.num_nodes(), missing as usize);
}
