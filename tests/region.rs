use std::fs;
use std::thread;

use numabind::{Error, NodeId, RegionOptions, Topology};

/// Memory nodes this process may allocate from, or every node on hosts
/// without NUMA.
fn placeable_nodes(topology: &Topology) -> Vec<NodeId> {
    let allowed: Option<Vec<NodeId>> = fs::read_to_string("/proc/self/status").ok().and_then(|status| {
        let list = status.lines().find_map(|line| line.strip_prefix("Mems_allowed_list:"))?;
        let mut nodes = Vec::new();
        for part in list.trim().split(',').filter(|part| !part.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => nodes.extend(start.parse::<NodeId>().ok()?..=end.parse::<NodeId>().ok()?),
                None => nodes.push(part.parse().ok()?),
            }
        }
        Some(nodes)
    });

    let nodes: Vec<NodeId> = topology
        .nodes()
        .into_iter()
        .filter(|&node| topology.node_size(node).map_or(false, |size| size > 0))
        .filter(|node| allowed.as_ref().map_or(true, |allowed| allowed.contains(node)))
        .collect();
    if nodes.is_empty() {
        topology.nodes()
    } else {
        nodes
    }
}

#[test]
fn zero_sized_regions_are_empty() {
    let region = numabind::alloc_default(0).unwrap();
    assert!(region.is_empty());
    numabind::free(region).unwrap();

    let region = RegionOptions::new().fallback(true).alloc_interleaved(0).unwrap();
    assert_eq!(region.len(), 0);
    numabind::free(region).unwrap();
}

#[test]
fn oversized_requests_are_out_of_memory() {
    let err = numabind::alloc_default(usize::MAX / 2).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { size, .. } if size == usize::MAX / 2));
}

#[test]
fn regions_on_every_node_are_writable() {
    let topology = Topology::system();
    let options = RegionOptions::new().fallback(true);
    for node in topology.nodes() {
        let mut region = options.alloc_on_node(1 << 20, node).unwrap();
        assert_eq!(region.len(), 1 << 20);
        region.as_mut_slice().fill(0x5A);
        assert!(region.as_slice().iter().all(|&byte| byte == 0x5A));
        numabind::free(region).unwrap();
    }
}

#[test]
fn placement_without_numa_is_reported() {
    if Topology::system().is_available() {
        return;
    }
    assert!(matches!(numabind::alloc_local(4096), Err(Error::NumaUnavailable)));
    assert!(matches!(numabind::alloc_interleaved(4096), Err(Error::NumaUnavailable)));
}

#[test]
fn existing_buffers_can_be_moved_to_a_node() {
    let options = RegionOptions::new().fallback(true).move_pages(true);
    let mut buffer = vec![7u8; 3 * 4096 + 100];
    options.to_node_memory(&mut buffer[10..], 0).unwrap();
    assert!(buffer.iter().all(|&byte| byte == 7));

    let missing = Topology::system().max_node() + 1;
    assert!(matches!(
        options.to_node_memory(&mut buffer, missing),
        Err(Error::InvalidNode(node)) if node == missing
    ));
}

#[test]
fn owned_regions_release_themselves() {
    let mut owned = RegionOptions::new().fallback(true).alloc_local(8192).unwrap().into_owned();
    owned[0] = 1;
    owned[8191] = 2;
    assert_eq!(owned.iter().map(|&byte| byte as u32).sum::<u32>(), 3);
}

#[test]
fn regions_can_cross_threads() {
    let handles: Vec<_> = (0..2)
        .map(|i| {
            thread::spawn(move || {
                for _ in 0..16 {
                    let mut region = numabind::alloc_default(64 * 1024).unwrap();
                    region.as_mut_slice().fill(i as u8);
                    let region = thread::spawn(move || {
                        assert!(region.as_slice().iter().all(|&byte| byte == i as u8));
                        region
                    })
                    .join()
                    .unwrap();
                    numabind::free(region).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn threads_allocate_on_their_own_nodes() {
    let topology = Topology::system();
    let available = topology.is_available();
    let nodes = placeable_nodes(topology);

    let handles: Vec<_> = (0..2usize)
        .map(|i| {
            let node = nodes[i % nodes.len()];
            thread::spawn(move || {
                let options = RegionOptions::new().fallback(!available);
                for round in 0..50u8 {
                    let fill = round ^ i as u8;
                    let mut region = options.alloc_on_node(1 << 16, node).unwrap();
                    region.as_mut_slice().fill(fill);
                    assert!(region.as_slice().iter().all(|&byte| byte == fill));
                    if available {
                        assert_eq!(numabind::node_of_address(region.as_ptr()).unwrap(), node);
                    }
                    numabind::free(region).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn interleaved_regions_spread_over_nodes() {
    let topology = Topology::system();
    let available = topology.is_available();
    let nodes = placeable_nodes(topology);
    let page = numabind::utils::page_size();
    let pages = 4 * nodes.len();

    let mut region = RegionOptions::new().fallback(!available).alloc_interleaved(pages * page).unwrap();
    assert_eq!(region.len(), pages * page);
    region.as_mut_slice().fill(0xC3);
    assert!(region.as_slice().iter().all(|&byte| byte == 0xC3));

    if available {
        let mut seen: Vec<NodeId> = (0..pages)
            .map(|index| numabind::node_of_address(region.as_ptr().wrapping_add(index * page)).unwrap())
            .collect();
        assert!(seen.iter().all(|node| nodes.contains(node)), "pages landed on {:?}", seen);
        seen.sort_unstable();
        seen.dedup();
        if nodes.len() > 1 {
            assert!(seen.len() > 1, "all pages landed on {:?}", seen);
        }
    }

    numabind::free(region).unwrap();
}

#[test]
fn unmapped_addresses_have_no_node() {
    if !Topology::system().is_available() {
        return;
    }
    let err = numabind::node_of_address(std::ptr::null()).unwrap_err();
    assert!(matches!(err, Error::SystemCallFailed(_)));
    assert_eq!(err.os_code(), Some(libc::EFAULT));
}
