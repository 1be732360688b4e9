//! Neural network layers for vertex features on triangle meshes.
//!
//! The [`Module`] trait covers layers with a single tensor input, such as
//! [`Conv2d`]. The mesh convolution in [`mesh`] also needs the adjacency of
//! every mesh in the batch, so it exposes its own `forward` and delegates the
//! learned transform to an inner [`Conv2d`].
//!
//! # Example
//!
//! ```
//! use meshconv::autograd::Tensor;
//! use meshconv::nn::mesh::{MeshAdjacency, NeighborOrder};
//! use meshconv::nn::VertexMeshConv;
//!
//! let conv = VertexMeshConv::new(2, 4, true, 3, NeighborOrder::from("sum")).unwrap();
//! let quad = MeshAdjacency::from_faces(&[[0, 1, 2], [0, 2, 3]], 4);
//! let y = conv.forward(&Tensor::ones(&[1, 2, 4]), &[quad]).unwrap();
//! assert_eq!(y.shape(), &[1, 4, 4]);
//! ```
//!
//! # References
//!
//! - Paszke, A., et al. (2019). `PyTorch`: An imperative style, high-performance
//!   deep learning library. `NeurIPS`.
//! - He, K., et al. (2015). Delving deep into rectifiers. ICCV.

mod conv;
mod init;
pub mod mesh;
mod module;

pub use conv::Conv2d;
pub use init::kaiming_uniform;
pub use mesh::{VertexConvConfig, VertexMeshConv};
pub use module::Module;
