//! Tape-based reverse-mode automatic differentiation.
//!
//! The mesh convolution is built entirely from differentiable tensor
//! operations (concatenation, permutation, row gathers, reductions and a
//! matrix product), so gradients reach both the input features and the
//! convolution weights without any hand-written backward for the operator
//! itself.
//!
//! # Architecture
//!
//! - Operations are recorded to a thread-local tape during the forward pass
//! - `backward` walks the tape in reverse and accumulates gradients
//! - Leaf tensors that require gradients receive them; look them up with
//!   [`get_grad`] by [`TensorId`]
//!
//! # Example
//!
//! ```
//! use meshconv::autograd::{clear_graph, get_grad, Tensor};
//!
//! clear_graph();
//! let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).requires_grad();
//! let picked = x.index_select(&[1, 1, 0]);
//! picked.sum().backward();
//!
//! let grad = get_grad(x.id()).expect("x is a leaf that requires grad");
//! assert_eq!(grad.data(), &[1.0, 1.0, 2.0, 2.0]);
//! ```

pub(crate) mod grad_fn;
mod graph;
pub(crate) mod kernels;
mod ops;
mod tensor;

pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

use std::cell::RefCell;

thread_local! {
    /// Computation graph for the current thread.
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    /// Gradient tracking switch (disabled inside `no_grad`).
    static GRAD_ENABLED: RefCell<bool> = const { RefCell::new(true) };
}

/// Execute a closure without gradient tracking.
///
/// ```
/// use meshconv::autograd::{no_grad, Tensor};
///
/// let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
/// let y = no_grad(|| x.mul(&x).sum());
/// assert!(!y.requires_grad_enabled());
/// ```
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    GRAD_ENABLED.with(|enabled| {
        let prev = *enabled.borrow();
        *enabled.borrow_mut() = false;
        let result = f();
        *enabled.borrow_mut() = prev;
        result
    })
}

/// Check if gradient tracking is currently enabled.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| *enabled.borrow())
}

pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Clear the computation graph of the current thread.
pub fn clear_graph() {
    GRAPH.with(|graph| graph.borrow_mut().clear());
}

/// Get the accumulated gradient of a leaf tensor by ID.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}

/// Clear the gradient of a specific tensor by ID.
pub fn clear_grad(id: TensorId) {
    with_graph(|graph| graph.clear_grad(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_grad_context() {
        assert!(is_grad_enabled());

        no_grad(|| {
            assert!(!is_grad_enabled());
        });

        assert!(is_grad_enabled());
    }

    #[test]
    fn test_nested_no_grad() {
        no_grad(|| {
            no_grad(|| {
                assert!(!is_grad_enabled());
            });
            assert!(!is_grad_enabled());
        });

        assert!(is_grad_enabled());
    }

    #[test]
    fn test_no_grad_skips_recording() {
        clear_graph();
        let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        no_grad(|| {
            let _ = x.sum();
        });
        assert!(with_graph(|graph| graph.is_empty()));
    }

    #[test]
    fn test_clear_grad_removes_gradient() {
        clear_graph();
        let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        x.sum().backward();
        assert!(get_grad(x.id()).is_some());

        clear_grad(x.id());
        assert!(get_grad(x.id()).is_none());
    }
}
