//! Gradient function trait and implementations.
//!
//! Each differentiable operation records a `GradFn` capturing what it needs
//! to route `grad_output` back to its inputs.

use super::kernels;
use super::ops::simd_matmul;
use super::tensor::Tensor;

/// Computes input gradients for one recorded operation.
pub trait GradFn: Send + Sync {
    /// Gradients with respect to each input, in the order the inputs were
    /// recorded.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// z = x + y (same shape)
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.detach(), grad_output.detach()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// z = x * y (same shape)
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x*y)/∂x = y, ∂(x*y)/∂y = x
        let g = grad_output.data();
        let grad_x: Vec<f32> = g.iter().zip(self.y.data()).map(|(&g, &y)| g * y).collect();
        let grad_y: Vec<f32> = g.iter().zip(self.x.data()).map(|(&g, &x)| g * x).collect();
        vec![
            Tensor::from_vec(grad_x, self.x.shape()),
            Tensor::from_vec(grad_y, self.y.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

// ============================================================================
// Reductions
// ============================================================================

/// z = sum(x)
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item();
        let numel: usize = self.input_shape.iter().product();
        vec![Tensor::from_vec(vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// z = x.sum_dim(dim)
pub(crate) struct SumDimBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) dim: usize,
}

impl GradFn for SumDimBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad = kernels::expand_dim(grad_output.data(), &self.input_shape, self.dim);
        vec![Tensor::from_vec(grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumDimBackward"
    }
}

/// z[s] = mean(x[indices[offsets[s]..offsets[s + 1]]]) over rows of a 2D x.
pub(crate) struct SegmentMeanBackward {
    pub(crate) indices: Vec<usize>,
    pub(crate) offsets: Vec<usize>,
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SegmentMeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let cols = self.input_shape[1];
        let g = grad_output.data();
        let mut grad = vec![0.0; self.input_shape.iter().product()];

        for (s, bounds) in self.offsets.windows(2).enumerate() {
            let members = &self.indices[bounds[0]..bounds[1]];
            if members.is_empty() {
                continue;
            }
            let scale = 1.0 / members.len() as f32;
            let g_row = &g[s * cols..(s + 1) * cols];
            for &row in members {
                for (acc, &gv) in grad[row * cols..(row + 1) * cols].iter_mut().zip(g_row) {
                    *acc += gv * scale;
                }
            }
        }

        vec![Tensor::from_vec(grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SegmentMeanBackward"
    }
}

// ============================================================================
// Shape and Indexing Operations
// ============================================================================

/// z = x.view(shape)
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

/// z = x.permute(dims)
pub(crate) struct PermuteBackward {
    pub(crate) dims: Vec<usize>,
}

impl GradFn for PermuteBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let inverse = kernels::inverse_permutation(&self.dims);
        let (grad, shape) = kernels::permute(grad_output.data(), grad_output.shape(), &inverse);
        vec![Tensor::from_vec(grad, &shape)]
    }

    fn name(&self) -> &'static str {
        "PermuteBackward"
    }
}

/// z = cat(xs, dim)
pub(crate) struct CatBackward {
    pub(crate) dim: usize,
    pub(crate) sizes: Vec<usize>,
}

impl GradFn for CatBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let mut start = 0;
        self.sizes
            .iter()
            .map(|&len| {
                let piece =
                    kernels::narrow(grad_output.data(), grad_output.shape(), self.dim, start, len);
                let mut shape = grad_output.shape().to_vec();
                shape[self.dim] = len;
                start += len;
                Tensor::from_vec(piece, &shape)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "CatBackward"
    }
}

/// z = x.narrow(dim, start, len)
pub(crate) struct NarrowBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) dim: usize,
    pub(crate) start: usize,
    pub(crate) len: usize,
}

impl GradFn for NarrowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad = kernels::unnarrow(
            grad_output.data(),
            &self.input_shape,
            self.dim,
            self.start,
            self.len,
        );
        vec![Tensor::from_vec(grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "NarrowBackward"
    }
}

/// z = x.index_select(index) along rows of a 2D x.
///
/// Rows picked several times receive the sum of their gradients.
pub(crate) struct IndexSelectBackward {
    pub(crate) index: Vec<usize>,
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for IndexSelectBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let cols = self.input_shape[1];
        let g = grad_output.data();
        let mut grad = vec![0.0; self.input_shape.iter().product()];

        for (out_row, &src_row) in self.index.iter().enumerate() {
            let dst = &mut grad[src_row * cols..(src_row + 1) * cols];
            for (acc, &gv) in dst.iter_mut().zip(&g[out_row * cols..(out_row + 1) * cols]) {
                *acc += gv;
            }
        }

        vec![Tensor::from_vec(grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "IndexSelectBackward"
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

/// z = x @ y
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂L/∂x = g @ yᵀ, ∂L/∂y = xᵀ @ g
        let (m, k) = (self.x.shape()[0], self.x.shape()[1]);
        let n = self.y.shape()[1];
        let g = grad_output.data();

        let y_t = kernels::transpose(self.y.data(), k, n);
        let grad_x = simd_matmul(g, &y_t, m, n, k);

        let x_t = kernels::transpose(self.x.data(), m, k);
        let grad_y = simd_matmul(&x_t, g, k, m, n);

        vec![
            Tensor::from_vec(grad_x, &[m, k]),
            Tensor::from_vec(grad_y, &[k, n]),
        ]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// z = xᵀ
pub(crate) struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (grad_output.shape()[0], grad_output.shape()[1]);
        let grad = kernels::transpose(grad_output.data(), rows, cols);
        vec![Tensor::from_vec(grad, &[cols, rows])]
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// z = matrix + row vector
pub(crate) struct BroadcastAddBackward {
    pub(crate) x_shape: Vec<usize>,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_y = kernels::sum_dim(grad_output.data(), &self.x_shape, 0);
        let cols = self.x_shape[1];
        vec![grad_output.detach(), Tensor::from_vec(grad_y, &[cols])]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}
