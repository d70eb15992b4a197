//! Material Point Method simulation of jello, snow and fluid.
//!
//! The solver runs as a fixed sequence of data-parallel kernels over a particle
//! pool and a background grid. [`cpu`] holds the reference implementation of
//! every kernel, [`gpu`] runs the same sequence as WGSL compute pipelines inside
//! Bevy's render graph.

pub mod config;
pub mod error;

pub mod cpu {
    pub mod atomic;
    pub mod compaction;
    pub mod constitutive;
    pub mod grid;
    pub mod interp;
    pub mod kernels;
    pub mod particles;
    pub mod scene;
    pub mod solver;
    pub mod svd;
}

pub mod gpu {
    pub mod buffers;
    pub mod ffi;
    pub mod pipeline;
    pub mod readback;
    pub mod timestamps;
}

pub use config::{GridDescriptor, SimConfig};
pub use cpu::particles::Material;
pub use cpu::solver::{MpmCpuPlugin, MpmSolver, StepReport};
pub use error::{ConfigError, Result};
pub use gpu::buffers::GpuMpmPlugin;
