//! Meshconv: vertex neighborhood convolution for learning on triangle meshes.
//!
//! Per-vertex features of a batch of meshes are gathered into a dense
//! neighborhood image (each vertex next to its neighbors) and convolved with
//! a learned `(1, width)` kernel. Missing neighbors, padded vertices and
//! out-of-range indices all read zeros, and the whole pipeline is
//! differentiable.
//!
//! # Quick Start
//!
//! ```
//! use meshconv::autograd::{clear_graph, get_grad, Tensor};
//! use meshconv::nn::mesh::{MeshAdjacency, NeighborOrder, VertexConvConfig};
//! use meshconv::nn::VertexMeshConv;
//!
//! let config = VertexConvConfig::new(3, 8)
//!     .with_n_neighbors(3)
//!     .with_neighbor_order(NeighborOrder::Fixed)
//!     .with_seed(0);
//! let conv = VertexMeshConv::from_config(config).unwrap();
//!
//! // A tetrahedron, padded to five vertices.
//! let faces = [[0, 1, 2], [0, 3, 1], [1, 3, 2], [2, 3, 0]];
//! let mesh = MeshAdjacency::from_faces(&faces, 4);
//!
//! clear_graph();
//! let x = Tensor::ones(&[1, 3, 5]).requires_grad();
//! let y = conv.forward(&x, &[mesh]).unwrap();
//! assert_eq!(y.shape(), &[1, 8, 5]);
//!
//! y.sum().backward();
//! assert!(get_grad(x.id()).is_some());
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tensors with tape-based reverse-mode differentiation
//! - [`nn`]: Layers, including the mesh convolution in [`nn::mesh`]
//! - [`error`]: The crate error type

pub mod autograd;
pub mod error;
pub mod nn;

pub use error::{MeshConvError, Result};
