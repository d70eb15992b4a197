// float accumulators shared by every particle thread that scatters into a node
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;

/// `f32` stored as raw bits so it can be updated with a CAS loop.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds `delta` and returns the previous value. Concurrent adds are never lost.
    #[inline]
    pub fn fetch_add(&self, delta: f32) -> f32 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(previous) => return f32::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Three independent [`AtomicF32`] lanes. Only each lane is atomic, not the vector.
#[derive(Debug, Default)]
pub struct AtomicVec3([AtomicF32; 3]);

impl AtomicVec3 {
    #[inline]
    pub fn load(&self) -> Vec3 {
        Vec3::new(self.0[0].load(), self.0[1].load(), self.0[2].load())
    }

    #[inline]
    pub fn store(&self, value: Vec3) {
        for (lane, v) in self.0.iter().zip(value.to_array()) {
            lane.store(v);
        }
    }

    #[inline]
    pub fn fetch_add(&self, delta: Vec3) {
        for (lane, d) in self.0.iter().zip(delta.to_array()) {
            if d != 0.0 {
                lane.fetch_add(d);
            }
        }
    }
}
