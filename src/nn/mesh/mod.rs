//! Vertex neighborhood convolution on triangle meshes.
//!
//! [`VertexMeshConv`] turns per-vertex features of a batch of meshes into a
//! dense "neighborhood image" and convolves it with a `(1, width)` kernel:
//!
//! ```text
//! features (B, C, V)            meshes[b]: vertex -> neighbors
//!        │                             │
//!        │          PaddedAdjacency (V, 1 + K), sentinel = -1
//!        │                             │
//!        ├──── zero row + flatten ─────┤ GatherIndex (B·V·(1+K))
//!        ▼                             ▼
//!   (B·(V+1), C) ── index_select ──► (B, C, V, 1 + K)
//!                                      │ sum / statistics (optional)
//!                                      ▼
//!                        Conv2d (1, width) ──► (B, O, V)
//! ```
//!
//! Each mesh owns a block of `V + 1` rows in the flattened buffer whose first
//! row is zero, so missing neighbors and padded vertices read zeros and
//! gathers never cross mesh boundaries.
//!
//! # Modes
//!
//! | `n_neighbors` | order          | neighborhood image                        |
//! |---------------|----------------|-------------------------------------------|
//! | `0`           | any            | the features alone, width 1               |
//! | `-1`          | fixed / random | self plus mean of all neighbors, width 2  |
//! | `k`           | fixed          | self plus first `k` stored neighbors      |
//! | `k`           | random         | self plus `k` sampled neighbors           |
//! | `k`           | `*sum*`        | self plus sum of the `k` neighbor slots   |
//! | `k`           | aggregate      | four statistic slots, see [`NeighborhoodStatistics`] |
//!
//! # References
//!
//! - Hanocka, R., et al. (2019). `MeshCNN`: A Network with an Edge. SIGGRAPH.

mod adjacency;
mod config;
mod gather;

pub use adjacency::{MeshAdjacency, VertexAdjacency};
pub use config::{NeighborOrder, VertexConvConfig};
pub use gather::{flatten_index, GatherIndex, PaddedAdjacency, SENTINEL_INDEX};

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace, warn};

use super::conv::Conv2d;
use super::module::Module;
use crate::autograd::Tensor;
use crate::error::{MeshConvError, Result};

/// Reduces features over a mesh's symmetry group.
///
/// [`VertexMeshConv`] stores an operator and hands it back through
/// [`VertexMeshConv::symmetry_operator`]; the convolution itself never
/// applies it.
pub trait SymmetryOperator: Send + Sync {
    /// Map `(B, C, V)` features to their symmetry-reduced form.
    fn reduce(&self, features: &Tensor) -> Tensor;
}

/// Builds the four statistic slots of the aggregate orders
/// ([`NeighborOrder::MeanC`], [`NeighborOrder::GaussianC`],
/// [`NeighborOrder::MedianD`]).
pub trait NeighborhoodStatistics: Send + Sync {
    /// Turn a gathered `(B, C, V, 1 + K)` image into a `(B, C, V, 4)` one.
    ///
    /// # Errors
    ///
    /// Implementations report inputs they cannot summarize.
    fn build(&self, gathered: &Tensor, order: &NeighborOrder) -> Result<Tensor>;
}

/// Convolution over each vertex and its mesh neighbors.
///
/// # Shape
///
/// - Input: `(B, C_in, V)` or `(B, C_in, V, 1)`, plus one adjacency per mesh
///   with at most `V` vertices
/// - Output: `(B, C_out, V)`
///
/// # Example
///
/// ```
/// use meshconv::autograd::Tensor;
/// use meshconv::nn::mesh::{MeshAdjacency, NeighborOrder, VertexMeshConv};
///
/// let conv = VertexMeshConv::new(3, 8, true, 2, NeighborOrder::Fixed).unwrap();
/// let triangle = MeshAdjacency::from_edges(&[[0, 1], [1, 2], [2, 0]], 3);
///
/// // One triangle padded to four vertices.
/// let x = Tensor::ones(&[1, 3, 4]);
/// let y = conv.forward(&x, &[triangle]).unwrap();
/// assert_eq!(y.shape(), &[1, 8, 4]);
/// ```
pub struct VertexMeshConv {
    config: VertexConvConfig,
    conv: Conv2d,
    width: usize,
    sampler: Mutex<StdRng>,
    symmetry: Option<Arc<dyn SymmetryOperator>>,
    statistics: Option<Arc<dyn NeighborhoodStatistics>>,
}

impl VertexMeshConv {
    /// Create a layer from the usual mesh convolution arguments.
    ///
    /// # Errors
    ///
    /// See [`VertexConvConfig::validate`].
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        bias: bool,
        n_neighbors: i64,
        neighbor_order: NeighborOrder,
    ) -> Result<Self> {
        Self::from_config(
            VertexConvConfig::new(in_channels, out_channels)
                .with_bias(bias)
                .with_n_neighbors(n_neighbors)
                .with_neighbor_order(neighbor_order),
        )
    }

    /// Create a layer from a validated configuration.
    ///
    /// # Errors
    ///
    /// See [`VertexConvConfig::validate`].
    pub fn from_config(config: VertexConvConfig) -> Result<Self> {
        config.validate()?;

        let width = config.filter_width();
        let conv = Conv2d::with_seed(
            config.in_channels,
            config.out_channels,
            (1, width),
            config.bias,
            config.seed,
        );
        let sampler = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        debug!(
            in_channels = config.in_channels,
            out_channels = config.out_channels,
            n_neighbors = config.n_neighbors,
            order = %config.neighbor_order,
            width,
            "created vertex mesh convolution"
        );

        Ok(Self {
            config,
            conv,
            width,
            sampler: Mutex::new(sampler),
            symmetry: None,
            statistics: None,
        })
    }

    /// Attach a symmetry operator (stored, not applied).
    #[must_use]
    pub fn with_symmetry_operator(mut self, operator: Arc<dyn SymmetryOperator>) -> Self {
        self.symmetry = Some(operator);
        self
    }

    /// Attach the builder for aggregate-order statistic slots.
    #[must_use]
    pub fn with_statistics(mut self, statistics: Arc<dyn NeighborhoodStatistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    #[must_use]
    pub fn symmetry_operator(&self) -> Option<&Arc<dyn SymmetryOperator>> {
        self.symmetry.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &VertexConvConfig {
        &self.config
    }

    /// Kernel width along the neighborhood axis.
    #[must_use]
    pub fn filter_width(&self) -> usize {
        self.width
    }

    /// The `(1, width)` convolution applied to the neighborhood image.
    #[must_use]
    pub fn conv(&self) -> &Conv2d {
        &self.conv
    }

    pub fn conv_mut(&mut self) -> &mut Conv2d {
        &mut self.conv
    }

    /// Kernel weight, then bias when present.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        self.conv.parameters()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.conv.parameters_mut()
    }

    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.conv.num_parameters()
    }

    /// Convolve vertex features over their mesh neighborhoods.
    ///
    /// # Errors
    ///
    /// - [`MeshConvError::DimensionMismatch`] for inputs that are not
    ///   `(B, C_in, V[, 1])`, or when an aggregate order has no statistics
    ///   builder and the gathered image is not already 4 slots wide
    /// - [`MeshConvError::BatchMismatch`] when `meshes.len() != B`
    /// - [`MeshConvError::VertexOverflow`] when a mesh has more than `V`
    ///   vertices
    ///
    /// # Gradient tape
    ///
    /// While the parameters require gradients, every call records its
    /// operations on the thread-local tape until
    /// [`clear_graph`](crate::autograd::clear_graph) runs. Run inference
    /// inside [`no_grad`](crate::autograd::no_grad), or clear the graph
    /// between training steps.
    pub fn forward<A: VertexAdjacency>(&self, features: &Tensor, meshes: &[A]) -> Result<Tensor> {
        let x = self.squeeze_input(features)?;
        let image = self.neighborhood_image(&x, meshes)?;

        let slots = image.shape()[3];
        if slots != self.width {
            return Err(MeshConvError::DimensionMismatch {
                expected: format!("neighborhood width {}", self.width),
                actual: format!("neighborhood width {slots}"),
            });
        }

        let (batch, vertices) = (x.shape()[0], x.shape()[2]);
        if vertices == 0 {
            return Ok(Tensor::zeros(&[batch, self.config.out_channels, 0]));
        }
        Ok(self
            .conv
            .forward(&image)
            .view(&[batch, self.config.out_channels, vertices]))
    }

    /// Build the `(B, C, V, slots)` neighborhood image fed to the kernel.
    ///
    /// `features` must already be 3D. The slot count equals
    /// [`filter_width`](Self::filter_width) in every mode except the aggregate
    /// orders without a statistics builder, where it is `1 + k`.
    ///
    /// # Errors
    ///
    /// Same structural errors as [`forward`](Self::forward), plus whatever the
    /// attached [`NeighborhoodStatistics`] reports.
    pub fn neighborhood_image<A: VertexAdjacency>(
        &self,
        features: &Tensor,
        meshes: &[A],
    ) -> Result<Tensor> {
        self.check_batch(features, meshes)?;
        let (batch, channels, vertices) = (
            features.shape()[0],
            features.shape()[1],
            features.shape()[2],
        );
        debug!(
            batch,
            channels,
            vertices,
            n_neighbors = self.config.n_neighbors,
            order = %self.config.neighbor_order,
            "building neighborhood image"
        );

        if self.config.n_neighbors == 0 {
            return Ok(features.view(&[batch, channels, vertices, 1]));
        }
        if self.config.is_average() {
            return Ok(average_image(features, meshes));
        }

        let k = self.config.neighbor_slots();
        let tables = self.padded_tables(meshes, k, vertices);
        let index = GatherIndex::from_padded(&tables, vertices, 1 + k);
        let gathered = gather_neighborhoods(features, &index);

        let order = &self.config.neighbor_order;
        if order.is_sum() {
            let neighbors = gathered.narrow(3, 1, k).sum_dim(3, true);
            return Ok(Tensor::cat(&[gathered.narrow(3, 0, 1), neighbors], 3));
        }
        if order.is_aggregate() {
            if let Some(statistics) = &self.statistics {
                return statistics.build(&gathered, order);
            }
        }
        Ok(gathered)
    }

    fn squeeze_input(&self, features: &Tensor) -> Result<Tensor> {
        let shape = features.shape();
        let x = match *shape {
            [b, c, v] => features.view(&[b, c, v]),
            [b, c, v, 1] => features.view(&[b, c, v]),
            _ => {
                return Err(MeshConvError::DimensionMismatch {
                    expected: "(batch, in_channels, vertices[, 1])".to_string(),
                    actual: format!("{shape:?}"),
                })
            }
        };
        Ok(x)
    }

    fn check_batch<A: VertexAdjacency>(&self, features: &Tensor, meshes: &[A]) -> Result<()> {
        let shape = features.shape();
        if shape.len() != 3 || shape[1] != self.config.in_channels {
            return Err(MeshConvError::DimensionMismatch {
                expected: format!("(batch, {}, vertices)", self.config.in_channels),
                actual: format!("{shape:?}"),
            });
        }
        if meshes.len() != shape[0] {
            return Err(MeshConvError::BatchMismatch {
                features: shape[0],
                meshes: meshes.len(),
            });
        }
        for (mesh, adjacency) in meshes.iter().enumerate() {
            let count = adjacency.vertex_count();
            if count > shape[2] {
                return Err(MeshConvError::VertexOverflow {
                    mesh,
                    vertices: count,
                    max_vertices: shape[2],
                });
            }
        }
        Ok(())
    }

    fn padded_tables<A: VertexAdjacency>(
        &self,
        meshes: &[A],
        k: usize,
        rows: usize,
    ) -> Vec<PaddedAdjacency> {
        if self.config.neighbor_order.samples_neighbors() {
            let mut rng = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
            meshes
                .iter()
                .enumerate()
                .map(|(b, mesh)| {
                    trace!(mesh = b, vertices = mesh.vertex_count(), k, "sampling neighbors");
                    PaddedAdjacency::sampled(mesh, k, rows, &mut *rng)
                })
                .collect()
        } else {
            meshes
                .iter()
                .enumerate()
                .map(|(b, mesh)| {
                    trace!(mesh = b, vertices = mesh.vertex_count(), k, "padding neighbors");
                    PaddedAdjacency::exact(mesh, k, rows)
                })
                .collect()
        }
    }
}

/// Gather `(B, C, V)` features into a `(B, C, V, width)` image.
fn gather_neighborhoods(features: &Tensor, index: &GatherIndex) -> Tensor {
    let (batch, rows, width) = index.shape();
    let channels = features.shape()[1];

    // (B, C, 1 + V): each mesh block starts with its zero row
    let padded = Tensor::cat(&[Tensor::zeros(&[batch, channels, 1]), features.clone()], 2);
    let flat = padded
        .permute(&[0, 2, 1])
        .view(&[index.source_rows(), channels]);

    flat.index_select(index.as_slice())
        .view(&[batch, rows, width, channels])
        .permute(&[0, 3, 1, 2])
}

/// Self slot plus the mean over every in-range neighbor.
fn average_image<A: VertexAdjacency>(features: &Tensor, meshes: &[A]) -> Tensor {
    let (batch, channels, vertices) = (
        features.shape()[0],
        features.shape()[1],
        features.shape()[2],
    );

    let mut indices = Vec::new();
    let mut offsets = Vec::with_capacity(batch * vertices + 1);
    offsets.push(0);
    let mut dropped = 0usize;
    for (b, mesh) in meshes.iter().enumerate() {
        let count = mesh.vertex_count();
        for v in 0..vertices {
            if v < count {
                for &n in mesh.neighbors(v) {
                    if n < count {
                        indices.push(b * vertices + n);
                    } else {
                        dropped += 1;
                    }
                }
            }
            offsets.push(indices.len());
        }
    }
    if dropped > 0 {
        warn!(dropped, "out-of-range neighbors left out of the average");
    }

    let rows = features
        .permute(&[0, 2, 1])
        .view(&[batch * vertices, channels]);
    let mean = rows
        .segment_mean(&indices, &offsets)
        .view(&[batch, vertices, 1, channels])
        .permute(&[0, 3, 1, 2]);

    Tensor::cat(&[features.view(&[batch, channels, vertices, 1]), mean], 3)
}

impl fmt::Debug for VertexMeshConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexMeshConv")
            .field("config", &self.config)
            .field("width", &self.width)
            .field("conv", &self.conv)
            .field("symmetry", &self.symmetry.is_some())
            .field("statistics", &self.statistics.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
