//! Error types for mesh convolution.
//!
//! Structural problems with the inputs of a forward pass (wrong rank,
//! mismatched batch or channel counts, meshes larger than the padded vertex
//! axis) and invalid layer configurations are reported through
//! [`MeshConvError`]. Irregularities inside neighbor lists are repaired rather
//! than reported.

use thiserror::Error;

/// Main error type for mesh convolution operations.
///
/// # Examples
///
/// ```
/// use meshconv::error::MeshConvError;
///
/// let err = MeshConvError::DimensionMismatch {
///     expected: "[2, 3, 8]".to_string(),
///     actual: "[2, 4, 8]".to_string(),
/// };
/// assert!(err.to_string().contains("dimension mismatch"));
/// ```
#[derive(Debug, Error)]
pub enum MeshConvError {
    /// Tensor dimensions don't match what the operation expects.
    #[error("Tensor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape found
        actual: String,
    },

    /// Invalid hyperparameter value provided at construction.
    #[error("Invalid hyperparameter: {param} = {value}, expected {constraint}")]
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A mesh has more vertices than the padded vertex axis can hold.
    #[error("Mesh {mesh} has {vertices} vertices, exceeding the padded maximum of {max_vertices}")]
    VertexOverflow {
        /// Position of the mesh in the batch
        mesh: usize,
        /// Vertex count reported by the mesh
        vertices: usize,
        /// Size of the vertex axis of the feature tensor
        max_vertices: usize,
    },

    /// Number of meshes differs from the feature tensor's batch size.
    #[error("Batch mismatch: features have batch size {features}, got {meshes} meshes")]
    BatchMismatch {
        /// Batch size of the feature tensor
        features: usize,
        /// Number of adjacency entries supplied
        meshes: usize,
    },
}

/// Convenience type alias for `Result` with [`MeshConvError`].
pub type Result<T> = std::result::Result<T, MeshConvError>;
