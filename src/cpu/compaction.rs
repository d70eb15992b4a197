//! Active-node list built with a work-efficient (Blelloch) exclusive scan.
//!
//! The buffers span the grid padded to a power of two. Padding slots always
//! carry a zero criteria bit and so never reach the compacted output.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::config::GridDescriptor;
use crate::cpu::grid::GridPool;

#[derive(Debug)]
pub struct Compaction {
    num_nodes: usize,
    criteria: Vec<u32>,
    scan: Vec<u32>,
    compact: Vec<AtomicU32>,
    /// Last sweep depth processed, for inspection.
    depth: u32,
    active: usize,
}

impl Compaction {
    pub fn new(num_nodes: usize) -> Self {
        let padded = num_nodes.max(1).next_power_of_two();
        Self {
            num_nodes,
            criteria: vec![0; padded],
            scan: vec![0; padded],
            compact: (0..padded).map(|_| AtomicU32::new(0)).collect(),
            depth: 0,
            active: 0,
        }
    }

    pub fn for_grid(desc: &GridDescriptor) -> Self {
        Self::new(desc.num_nodes as usize)
    }

    pub fn padded_len(&self) -> usize {
        self.criteria.len()
    }

    fn sweep_count(&self) -> u32 {
        self.padded_len().trailing_zeros()
    }

    pub fn clear(&mut self) {
        self.criteria.par_iter_mut().for_each(|c| *c = 0);
        self.scan.par_iter_mut().for_each(|s| *s = 0);
        self.compact.par_iter().for_each(|c| c.store(0, Ordering::Relaxed));
        self.depth = 0;
        self.active = 0;
    }

    /// Flags every real node holding mass. The scan starts from a copy of the flags.
    pub fn get_criteria(&mut self, grid: &GridPool) {
        let nodes = grid.nodes();
        self.criteria[..self.num_nodes]
            .par_iter_mut()
            .zip(self.scan[..self.num_nodes].par_iter_mut())
            .zip(nodes.par_iter())
            .for_each(|((c, s), node)| {
                *c = u32::from(node.mass.load() > 0.0);
                *s = *c;
            });
    }

    /// Loads an explicit flag array over the real nodes.
    pub fn set_criteria(&mut self, flags: &[u32]) {
        let n = flags.len().min(self.num_nodes);
        for (i, &flag) in flags[..n].iter().enumerate() {
            self.criteria[i] = u32::from(flag != 0);
            self.scan[i] = self.criteria[i];
        }
    }

    pub fn up_sweep(&mut self) {
        for d in 0..self.sweep_count() {
            let stride = 2usize << d;
            let half = stride / 2;
            self.scan.par_chunks_mut(stride).for_each(|chunk| {
                chunk[stride - 1] += chunk[half - 1];
            });
            self.depth = d;
        }
    }

    pub fn set_root_to_zero(&mut self) {
        if let Some(root) = self.scan.last_mut() {
            *root = 0;
        }
    }

    pub fn down_sweep(&mut self) {
        for d in (0..self.sweep_count()).rev() {
            let stride = 2usize << d;
            let half = stride / 2;
            self.scan.par_chunks_mut(stride).for_each(|chunk| {
                let left = chunk[half - 1];
                chunk[half - 1] = chunk[stride - 1];
                chunk[stride - 1] += left;
            });
            self.depth = d;
        }
    }

    /// Writes every flagged index into its scan slot and records the count.
    pub fn scatter(&mut self) {
        let compact = &self.compact;
        self.criteria[..self.num_nodes]
            .par_iter()
            .zip(self.scan[..self.num_nodes].par_iter())
            .enumerate()
            .for_each(|(i, (&c, &slot))| {
                if c == 1 {
                    compact[slot as usize].store(i as u32, Ordering::Relaxed);
                }
            });

        self.active = match self.num_nodes.checked_sub(1) {
            Some(last) => (self.scan[last] + self.criteria[last]) as usize,
            None => 0,
        };
        debug_assert!(self.active <= self.padded_len(), "active list overflow");
    }

    /// Runs every pass against the grid and returns the active node count.
    pub fn run(&mut self, grid: &GridPool) -> usize {
        self.clear();
        self.get_criteria(grid);
        self.up_sweep();
        self.set_root_to_zero();
        self.down_sweep();
        self.scatter();
        self.active
    }

    pub fn active_len(&self) -> usize {
        self.active
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Exclusive prefix sums of the criteria bits, padded slots included.
    pub fn scan(&self) -> &[u32] {
        &self.scan
    }

    /// Active node indices in ascending order.
    pub fn active(&self) -> impl IndexedParallelIterator<Item = usize> + '_ {
        self.compact[..self.active]
            .par_iter()
            .map(|slot| slot.load(Ordering::Relaxed) as usize)
    }

    pub fn active_vec(&self) -> Vec<usize> {
        self.active().collect()
    }
}
