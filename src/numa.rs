// src/numa.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NUMA topology detection, CPU pinning info, and weighted page binding.
//!
//! Topology detection via `hwlocality`, with a fallback to a single
//! synthetic UMA node when no NUMA nodes are reported. `bind_area_to_node`
//! is used by `arena::Arena::bind_weighted` to realize weighted-NUMA
//! binding page by page.

use std::ffi::c_void;

use anyhow::Result;
use hwlocality::{object::types::ObjectType, Topology};

/// NUMA node information.
#[derive(Debug, Clone)]
pub struct NumaNode {
    pub node_id: usize,
    pub cpus: Vec<usize>,
}

/// System NUMA topology.
pub struct NumaTopology {
    pub num_nodes: usize,
    pub physical_cores: usize,
    pub logical_cpus: usize,
    pub nodes: Vec<NumaNode>,
    pub is_uma: bool,
    topology: Topology,
}

impl NumaTopology {
    /// Detect NUMA topology from the system using hwlocality.
    pub fn detect() -> Result<Self> {
        tracing::debug!("Detecting NUMA topology via hwlocality...");

        let topology = Topology::new()?;
        let numa_nodes: Vec<_> = topology.objects_with_type(ObjectType::NUMANode).collect();

        let num_nodes = numa_nodes.len().max(1);
        let is_uma = num_nodes == 1;
        tracing::info!("Detected {} NUMA node(s)", num_nodes);

        let nodes: Vec<NumaNode> = if numa_nodes.is_empty() {
            vec![NumaNode {
                node_id: 0,
                cpus: (0..num_cpus::get()).collect(),
            }]
        } else {
            numa_nodes
                .iter()
                .filter_map(|node| {
                    let node_id = node.os_index()?;
                    let cpuset = node.cpuset()?;
                    let cpus: Vec<usize> = (0..topology.objects_with_type(ObjectType::PU).count())
                        .filter(|&cpu_id| cpuset.is_set(cpu_id))
                        .collect();
                    Some(NumaNode { node_id, cpus })
                })
                .collect()
        };

        let physical_cores = num_cpus::get_physical();
        let logical_cpus = num_cpus::get();

        Ok(Self {
            num_nodes,
            physical_cores,
            logical_cpus,
            nodes,
            is_uma,
            topology,
        })
    }

    pub fn should_enable_numa_pinning(&self) -> bool {
        self.num_nodes > 1
    }

    pub fn deployment_type(&self) -> &str {
        if self.is_uma {
            "UMA (single NUMA node - cloud VM or workstation)"
        } else {
            "NUMA (multi-socket system or large cloud VM)"
        }
    }

    pub fn cpus_for_node(&self, node_id: usize) -> Option<&[usize]> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| n.cpus.as_slice())
    }

    /// Bind the `len`-byte region starting at `addr` (already-mapped memory,
    /// not a fresh allocation) to the given NUMA node.
    ///
    /// Used page-by-page by the weighted-NUMA arena binding path, which
    /// needs a single contiguous mmap whose pages can each be steered to a
    /// different node, rather than one `hwlocality`-managed allocation per
    /// node (which `numa.rs`'s original `allocate_numa_buffer` used for the
    /// single-node case).
    pub fn bind_area_to_node(&self, addr: *mut c_void, len: usize, node_id: usize) -> Result<()> {
        use hwlocality::memory::binding::{MemoryBindingFlags, MemoryBindingPolicy};

        if !self.nodes.iter().any(|n| n.node_id == node_id) {
            anyhow::bail!("NUMA node {node_id} not present in topology");
        }

        let numa_obj = self
            .topology
            .objects_with_type(ObjectType::NUMANode)
            .find(|o| o.os_index() == Some(node_id))
            .ok_or_else(|| anyhow::anyhow!("NUMA node {node_id} has no hwloc object"))?;
        let nodeset = numa_obj
            .nodeset()
            .ok_or_else(|| anyhow::anyhow!("NUMA node {node_id} has no nodeset"))?;

        self.topology
            .bind_memory_area(
                addr,
                len,
                nodeset,
                MemoryBindingPolicy::Bind,
                MemoryBindingFlags::ASSUME_SINGLE_THREAD,
            )
            .map_err(|e| anyhow::anyhow!("binding area to NUMA node {node_id} failed: {e}"))?;
        Ok(())
    }
}

/// Parse a `-W` weight list: `node:weight,node:weight,...`.
pub fn parse_weight_list(s: &str) -> std::result::Result<Vec<(usize, u64)>, String> {
    s.split(',')
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            let (node, weight) = tok
                .split_once(':')
                .ok_or_else(|| format!("expected node:weight, got {tok:?}"))?;
            let node: usize = node
                .parse()
                .map_err(|_| format!("bad NUMA node id {node:?}"))?;
            let weight: u64 = weight
                .parse()
                .map_err(|_| format!("bad NUMA weight {weight:?}"))?;
            Ok((node, weight))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_topology() {
        if let Ok(topology) = NumaTopology::detect() {
            assert!(topology.num_nodes >= 1);
            assert!(topology.physical_cores >= 1);
            assert!(topology.logical_cpus >= topology.physical_cores);
        }
    }

    #[test]
    fn parses_weight_list() {
        let w = parse_weight_list("0:3,1:1").unwrap();
        assert_eq!(w, vec![(0, 3), (1, 1)]);
    }

    #[test]
    fn rejects_malformed_weight_list() {
        assert!(parse_weight_list("0-3").is_err());
        assert!(parse_weight_list("x:3").is_err());
    }
}
