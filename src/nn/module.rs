//! The [`Module`] trait shared by layers with a single tensor input.

use crate::autograd::Tensor;

/// A layer with learnable parameters and a single-input forward pass.
///
/// Layers whose forward pass needs more than a tensor (such as the mesh
/// adjacency of [`VertexMeshConv`](super::VertexMeshConv)) expose their own
/// `forward` and reuse `Module` only for their inner layers.
pub trait Module {
    /// Compute the output for `input`.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// Learnable parameters, in a stable order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable access to the learnable parameters, same order as `parameters`.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Total number of learnable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
