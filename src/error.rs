use thiserror::Error;

/// Setup-time failures. Any of these means the simulation loop must not start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f32),

    #[error("grid cell width must be positive and finite, got {0}")]
    InvalidCellWidth(f32),

    #[error("grid bounds are degenerate on axis {axis}: min {min} >= max {max}")]
    DegenerateBounds { axis: usize, min: f32, max: f32 },

    #[error("grid of {dims:?} nodes is too small for a boundary band of {thickness} cells")]
    GridTooSmall { dims: [u32; 3], thickness: u32 },

    #[error("poisson ratio must lie in (-1, 0.5), got {0}")]
    InvalidPoissonRatio(f32),

    #[error("{name} must be positive and finite, got {value}")]
    NonPositiveParameter { name: &'static str, value: f32 },

    #[error("flip ratio must lie in [0, 1], got {0}")]
    InvalidFlipRatio(f32),

    #[error("substeps per frame must be at least 1")]
    ZeroSubsteps,

    #[error("point cloud has {0} floats, expected a multiple of 3")]
    MalformedPointCloud(usize),

    #[error("particle {index} at {position:?} lies outside the simulation domain")]
    ParticleOutsideDomain { index: usize, position: [f32; 3] },

    #[error("particle count mismatch: pool holds {expected}, got {actual}")]
    ParticleCountMismatch { expected: usize, actual: usize },

    #[error("particle {index} changed its {field}, which is fixed after setup")]
    FixedParticleFieldChanged { index: usize, field: &'static str },

    #[error("scene contains no particles")]
    EmptyScene,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
