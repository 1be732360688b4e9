//! Differentiable operations for tensors.
//!
//! Each operation computes its forward result and, when gradient tracking is
//! enabled and any input requires gradients, records a `GradFn` on the tape.

use std::sync::Arc;

use super::grad_fn::{
    AddBackward, BroadcastAddBackward, CatBackward, GradFn, IndexSelectBackward, MatmulBackward,
    MulBackward, NarrowBackward, PermuteBackward, SegmentMeanBackward, SumBackward,
    SumDimBackward, TransposeBackward, ViewBackward,
};
use super::kernels;
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

/// Attach `grad_fn` to `result` and put the operation on the tape.
fn record(result: &mut Tensor, grad_fn: Arc<dyn GradFn>, inputs: &[&Tensor]) {
    if !is_grad_enabled() || !inputs.iter().any(|t| t.requires_grad_enabled()) {
        return;
    }

    result.requires_grad_(true);
    result.set_grad_fn(grad_fn.clone());

    with_graph(|graph| {
        for input in inputs {
            graph.register_tensor((*input).clone());
        }
        graph.record(
            result.id(),
            grad_fn,
            inputs.iter().map(|t| t.id()).collect(),
        );
    });
}

// ============================================================================
// Element-wise Operations
// ============================================================================

impl Tensor {
    /// Element-wise addition of two tensors of the same shape.
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape(), other.shape(), "add requires equal shapes");
        let data: Vec<f32> = self.data().iter().zip(other.data()).map(|(&a, &b)| a + b).collect();

        let mut result = Tensor::from_vec(data, self.shape());
        record(&mut result, Arc::new(AddBackward), &[self, other]);
        result
    }

    /// Element-wise multiplication of two tensors of the same shape.
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape(), other.shape(), "mul requires equal shapes");
        let data: Vec<f32> = self.data().iter().zip(other.data()).map(|(&a, &b)| a * b).collect();

        let mut result = Tensor::from_vec(data, self.shape());
        let grad_fn = Arc::new(MulBackward {
            x: self.detach(),
            y: other.detach(),
        });
        record(&mut result, grad_fn, &[self, other]);
        result
    }
}

// ============================================================================
// Reductions
// ============================================================================

impl Tensor {
    /// Sum of all elements, as a one-element tensor.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();

        let mut result = Tensor::new(&[total], &[1]);
        let grad_fn = Arc::new(SumBackward {
            input_shape: self.shape().to_vec(),
        });
        record(&mut result, grad_fn, &[self]);
        result
    }

    /// Sum along `dim`, keeping it as a size-1 axis when `keepdim` is set.
    ///
    /// # Panics
    ///
    /// Panics if `dim` is out of range.
    #[must_use]
    pub fn sum_dim(&self, dim: usize, keepdim: bool) -> Tensor {
        assert!(dim < self.ndim(), "sum_dim: dim {dim} out of range for {:?}", self.shape());

        let data = kernels::sum_dim(self.data(), self.shape(), dim);
        let mut shape = self.shape().to_vec();
        if keepdim {
            shape[dim] = 1;
        } else {
            shape.remove(dim);
        }

        let mut result = Tensor::from_vec(data, &shape);
        let grad_fn = Arc::new(SumDimBackward {
            input_shape: self.shape().to_vec(),
            dim,
        });
        record(&mut result, grad_fn, &[self]);
        result
    }

    /// Mean of groups of rows of a 2D tensor.
    ///
    /// Segment `s` averages the rows `indices[offsets[s]..offsets[s + 1]]`
    /// (CSR layout). Empty segments produce zero rows.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not 2D, `offsets` is empty, not monotone, or
    /// points past `indices`, or a row index is out of range.
    #[must_use]
    pub fn segment_mean(&self, indices: &[usize], offsets: &[usize]) -> Tensor {
        assert_eq!(self.ndim(), 2, "segment_mean requires a 2D tensor");
        assert!(!offsets.is_empty(), "segment_mean requires at least one offset");
        assert_eq!(
            offsets[offsets.len() - 1],
            indices.len(),
            "segment_mean: last offset must equal the number of indices"
        );

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let segments = offsets.len() - 1;
        let src = self.data();
        let mut data = vec![0.0; segments * cols];

        for (s, bounds) in offsets.windows(2).enumerate() {
            assert!(bounds[0] <= bounds[1], "segment_mean: offsets must be non-decreasing");
            let members = &indices[bounds[0]..bounds[1]];
            if members.is_empty() {
                continue;
            }
            let out_row = &mut data[s * cols..(s + 1) * cols];
            for &row in members {
                assert!(row < rows, "segment_mean: row {row} out of range for {rows} rows");
                for (acc, &v) in out_row.iter_mut().zip(&src[row * cols..(row + 1) * cols]) {
                    *acc += v;
                }
            }
            let scale = 1.0 / members.len() as f32;
            out_row.iter_mut().for_each(|v| *v *= scale);
        }

        let mut result = Tensor::from_vec(data, &[segments, cols]);
        let grad_fn = Arc::new(SegmentMeanBackward {
            indices: indices.to_vec(),
            offsets: offsets.to_vec(),
            input_shape: self.shape().to_vec(),
        });
        record(&mut result, grad_fn, &[self]);
        result
    }
}

// ============================================================================
// Shape and Indexing Operations
// ============================================================================

impl Tensor {
    /// Reshape without moving data. The element count must not change.
    #[must_use]
    pub fn view(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "view: number of elements must match ({} vs {new_numel})",
            self.numel()
        );

        let mut result = Tensor::new(self.data(), new_shape);
        let grad_fn = Arc::new(ViewBackward {
            input_shape: self.shape().to_vec(),
        });
        record(&mut result, grad_fn, &[self]);
        result
    }

    /// Reorder axes; output axis `i` is input axis `dims[i]`.
    ///
    /// ```
    /// use meshconv::autograd::Tensor;
    ///
    /// let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1, 2, 3]);
    /// let p = t.permute(&[0, 2, 1]);
    /// assert_eq!(p.shape(), &[1, 3, 2]);
    /// assert_eq!(p.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// ```
    #[must_use]
    pub fn permute(&self, dims: &[usize]) -> Tensor {
        assert_eq!(dims.len(), self.ndim(), "permute: expected {} dims", self.ndim());
        let mut seen = vec![false; dims.len()];
        for &d in dims {
            assert!(d < dims.len() && !seen[d], "permute: {dims:?} is not a permutation");
            seen[d] = true;
        }

        let (data, shape) = kernels::permute(self.data(), self.shape(), dims);
        let mut result = Tensor::from_vec(data, &shape);
        let grad_fn = Arc::new(PermuteBackward {
            dims: dims.to_vec(),
        });
        record(&mut result, grad_fn, &[self]);
        result
    }

    /// Concatenate tensors along `dim`. All other axes must agree.
    ///
    /// # Panics
    ///
    /// Panics if `tensors` is empty or the shapes are incompatible.
    #[must_use]
    pub fn cat(tensors: &[Tensor], dim: usize) -> Tensor {
        assert!(!tensors.is_empty(), "cat requires at least one tensor");
        let first = tensors[0].shape();
        assert!(dim < first.len(), "cat: dim {dim} out of range for {first:?}");
        for t in tensors {
            assert!(
                t.ndim() == first.len()
                    && t.shape()
                        .iter()
                        .zip(first)
                        .enumerate()
                        .all(|(axis, (a, b))| axis == dim || a == b),
                "cat: shape {:?} incompatible with {first:?} along dim {dim}",
                t.shape()
            );
        }

        let sizes: Vec<usize> = tensors.iter().map(|t| t.shape()[dim]).collect();
        let (outer, _, inner) = kernels::split_at_dim(first, dim);
        let total: usize = sizes.iter().sum();

        let mut data = Vec::with_capacity(outer * total * inner);
        for o in 0..outer {
            for (t, &len) in tensors.iter().zip(&sizes) {
                let chunk = len * inner;
                data.extend_from_slice(&t.data()[o * chunk..(o + 1) * chunk]);
            }
        }

        let mut shape = first.to_vec();
        shape[dim] = total;
        let mut result = Tensor::from_vec(data, &shape);
        let inputs: Vec<&Tensor> = tensors.iter().collect();
        record(&mut result, Arc::new(CatBackward { dim, sizes }), &inputs);
        result
    }

    /// Slice `len` entries along `dim` starting at `start`.
    #[must_use]
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Tensor {
        assert!(dim < self.ndim(), "narrow: dim {dim} out of range for {:?}", self.shape());
        assert!(
            start + len <= self.shape()[dim],
            "narrow: {start}..{} exceeds axis of size {}",
            start + len,
            self.shape()[dim]
        );

        let data = kernels::narrow(self.data(), self.shape(), dim, start, len);
        let mut shape = self.shape().to_vec();
        shape[dim] = len;

        let mut result = Tensor::from_vec(data, &shape);
        let grad_fn = Arc::new(NarrowBackward {
            input_shape: self.shape().to_vec(),
            dim,
            start,
            len,
        });
        record(&mut result, grad_fn, &[self]);
        result
    }

    /// Gather rows of a 2D tensor: output row `r` is input row `index[r]`.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not 2D or an index is out of range.
    #[must_use]
    pub fn index_select(&self, index: &[usize]) -> Tensor {
        assert_eq!(self.ndim(), 2, "index_select requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let src = self.data();

        let mut data = Vec::with_capacity(index.len() * cols);
        for &row in index {
            assert!(row < rows, "index_select: row {row} out of range for {rows} rows");
            data.extend_from_slice(&src[row * cols..(row + 1) * cols]);
        }

        let mut result = Tensor::from_vec(data, &[index.len(), cols]);
        let grad_fn = Arc::new(IndexSelectBackward {
            index: index.to_vec(),
            input_shape: self.shape().to_vec(),
        });
        record(&mut result, grad_fn, &[self]);
        result
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

/// `[m, k] @ [k, n] -> [m, n]` through trueno's SIMD matmul.
///
/// Empty operands skip the backend and yield an `[m, n]` block of zeros.
pub(crate) fn simd_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    if m == 0 || k == 0 || n == 0 {
        return vec![0.0; m * n];
    }

    let a_matrix = trueno::Matrix::from_vec(m, k, a.to_vec()).expect("valid matrix dimensions");
    let b_matrix = trueno::Matrix::from_vec(k, n, b.to_vec()).expect("valid matrix dimensions");
    let product = a_matrix.matmul(&b_matrix).expect("matmul should succeed");
    product.as_slice().to_vec()
}

impl Tensor {
    /// Matrix product of two 2D tensors.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");

        let (m, k1) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let data = simd_matmul(self.data(), other.data(), m, k1, n);
        let mut result = Tensor::from_vec(data, &[m, n]);
        let grad_fn = Arc::new(MatmulBackward {
            x: self.detach(),
            y: other.detach(),
        });
        record(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Transpose a 2D tensor.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let data = kernels::transpose(self.data(), rows, cols);
        let mut result = Tensor::from_vec(data, &[cols, rows]);
        record(&mut result, Arc::new(TransposeBackward), &[self]);
        result
    }

    /// Add a `[M]` vector to every row of a `[N, M]` matrix.
    #[must_use]
    pub fn broadcast_add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "broadcast_add requires 2D matrix");
        assert_eq!(other.ndim(), 1, "broadcast_add requires 1D vector");
        assert_eq!(
            self.shape()[1],
            other.shape()[0],
            "Matrix columns {} must match vector length {}",
            self.shape()[1],
            other.shape()[0]
        );

        let cols = self.shape()[1];
        let bias = other.data();
        let data: Vec<f32> = self
            .data()
            .iter()
            .enumerate()
            .map(|(i, &v)| v + bias[i % cols])
            .collect();

        let mut result = Tensor::from_vec(data, self.shape());
        let grad_fn = Arc::new(BroadcastAddBackward {
            x_shape: self.shape().to_vec(),
        });
        record(&mut result, grad_fn, &[self, other]);
        result
    }
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
