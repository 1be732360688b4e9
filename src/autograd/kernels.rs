//! Untracked array kernels shared by forward operations and their gradients.
//!
//! All buffers are dense row-major. Nothing here touches the computation
//! graph; the differentiable wrappers live in `ops.rs`.

/// Row-major strides for `shape`.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Split `shape` around `dim` into (outer, dim size, inner) element counts.
pub(crate) fn split_at_dim(shape: &[usize], dim: usize) -> (usize, usize, usize) {
    let outer: usize = shape[..dim].iter().product();
    let inner: usize = shape[dim + 1..].iter().product();
    (outer, shape[dim], inner)
}

/// Reorder axes so that output axis `i` is input axis `dims[i]`.
pub(crate) fn permute(data: &[f32], shape: &[usize], dims: &[usize]) -> (Vec<f32>, Vec<usize>) {
    let out_shape: Vec<usize> = dims.iter().map(|&d| shape[d]).collect();
    let in_strides = contiguous_strides(shape);
    let numel: usize = out_shape.iter().product();

    let mut out = vec![0.0; numel];
    for (pos, slot) in out.iter_mut().enumerate() {
        let mut rem = pos;
        let mut src = 0;
        for axis in (0..out_shape.len()).rev() {
            let i = rem % out_shape[axis];
            rem /= out_shape[axis];
            src += i * in_strides[dims[axis]];
        }
        *slot = data[src];
    }
    (out, out_shape)
}

/// Inverse of a permutation: `inverse_permutation(p)[p[i]] == i`.
pub(crate) fn inverse_permutation(dims: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; dims.len()];
    for (i, &d) in dims.iter().enumerate() {
        inverse[d] = i;
    }
    inverse
}

/// Copy `len` entries starting at `start` along `dim`.
pub(crate) fn narrow(data: &[f32], shape: &[usize], dim: usize, start: usize, len: usize) -> Vec<f32> {
    let (outer, size, inner) = split_at_dim(shape, dim);
    let mut out = Vec::with_capacity(outer * len * inner);
    for o in 0..outer {
        let base = o * size * inner + start * inner;
        out.extend_from_slice(&data[base..base + len * inner]);
    }
    out
}

/// Place a narrowed block back into a zero buffer of the full `shape`.
pub(crate) fn unnarrow(block: &[f32], shape: &[usize], dim: usize, start: usize, len: usize) -> Vec<f32> {
    let (outer, size, inner) = split_at_dim(shape, dim);
    let mut out = vec![0.0; outer * size * inner];
    for o in 0..outer {
        let base = o * size * inner + start * inner;
        let src = o * len * inner;
        out[base..base + len * inner].copy_from_slice(&block[src..src + len * inner]);
    }
    out
}

/// Sum over `dim`; the result has that axis removed (or kept at size 1).
pub(crate) fn sum_dim(data: &[f32], shape: &[usize], dim: usize) -> Vec<f32> {
    let (outer, size, inner) = split_at_dim(shape, dim);
    let mut out = vec![0.0; outer * inner];
    for o in 0..outer {
        for d in 0..size {
            let base = (o * size + d) * inner;
            for i in 0..inner {
                out[o * inner + i] += data[base + i];
            }
        }
    }
    out
}

/// Repeat a reduced buffer `size` times along `dim` of `shape`.
pub(crate) fn expand_dim(reduced: &[f32], shape: &[usize], dim: usize) -> Vec<f32> {
    let (outer, size, inner) = split_at_dim(shape, dim);
    let mut out = Vec::with_capacity(outer * size * inner);
    for o in 0..outer {
        let row = &reduced[o * inner..(o + 1) * inner];
        for _ in 0..size {
            out.extend_from_slice(row);
        }
    }
    out
}

/// Transpose a `[rows, cols]` matrix.
pub(crate) fn transpose(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = data[i * cols + j];
        }
    }
    out
}
