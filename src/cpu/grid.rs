// background grid: every field is an atomic accumulator so particle kernels
// can scatter into shared nodes through `&GridPool`
use glam::Vec3;
use rayon::prelude::*;

use crate::config::GridDescriptor;
use crate::cpu::atomic::{AtomicF32, AtomicVec3};

#[derive(Debug, Default)]
pub struct GridNode {
    pub mass: AtomicF32,
    /// Momentum during P2G, normalized into velocity by the gravity kernel.
    pub v_old: AtomicVec3,
    pub v_new: AtomicVec3,
    pub force: AtomicVec3,
}

impl GridNode {
    fn clear(&self) {
        self.mass.store(0.0);
        self.v_old.store(Vec3::ZERO);
        self.v_new.store(Vec3::ZERO);
        self.force.store(Vec3::ZERO);
    }
}

#[derive(Debug)]
pub struct GridPool {
    pub desc: GridDescriptor,
    nodes: Vec<GridNode>,
}

impl GridPool {
    pub fn new(desc: GridDescriptor) -> Self {
        let nodes = (0..desc.num_nodes).map(|_| GridNode::default()).collect();
        Self { desc, nodes }
    }

    pub fn nodes(&self) -> &[GridNode] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, index: usize) -> &GridNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Zeroes every accumulator. Must run before any scatter in a substep.
    pub fn clear(&self) {
        self.nodes.par_iter().for_each(GridNode::clear);
    }

    pub fn total_mass(&self) -> f32 {
        self.nodes.iter().map(|n| n.mass.load()).sum()
    }

    /// Sum of `mass * v_old` over all nodes. Only meaningful straight after P2G.
    pub fn total_momentum(&self) -> Vec3 {
        self.nodes.iter().map(|n| n.v_old.load()).sum()
    }
}
