//! 2D convolution expressed through differentiable tensor operations.
//!
//! The forward pass is an im2col built from a row gather: input pixels are
//! flattened to rows, every kernel tap becomes a gathered row, and the
//! patches are multiplied with the flattened kernel. Gradients reach both the
//! input and the parameters.
//!
//! # References
//!
//! - `LeCun`, Y., et al. (1998). Gradient-based learning applied to document
//!   recognition. Proceedings of the IEEE.

use super::init::{kaiming_uniform, zeros};
use super::module::Module;
use crate::autograd::Tensor;

/// 2D convolution with unit stride and no padding.
///
/// # Shape
///
/// - Input: `(N, C_in, H, W)`
/// - Output: `(N, C_out, H - kernel_h + 1, W - kernel_w + 1)`
///
/// # Example
///
/// ```
/// use meshconv::autograd::Tensor;
/// use meshconv::nn::{Conv2d, Module};
///
/// // A (1, 4) kernel spans the whole last axis: one output column.
/// let conv = Conv2d::new(3, 8, (1, 4), true);
/// let x = Tensor::zeros(&[2, 3, 10, 4]);
/// assert_eq!(conv.forward(&x).shape(), &[2, 8, 10, 1]);
/// ```
pub struct Conv2d {
    /// Weight tensor, shape: [`out_channels`, `in_channels`, `kernel_h`, `kernel_w`]
    weight: Tensor,
    /// Bias tensor, shape: [`out_channels`], or None
    bias: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
}

impl Conv2d {
    /// Create a Conv2d layer with a `(height, width)` kernel.
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize), bias: bool) -> Self {
        Self::with_seed(in_channels, out_channels, kernel_size, bias, None)
    }

    /// Create a Conv2d layer with a fixed initialization seed.
    ///
    /// # Panics
    ///
    /// Panics if a kernel dimension is zero.
    #[must_use]
    pub fn with_seed(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        bias: bool,
        seed: Option<u64>,
    ) -> Self {
        let (kernel_h, kernel_w) = kernel_size;
        assert!(kernel_h > 0 && kernel_w > 0, "Conv2d kernel must be non-empty");

        let fan_in = in_channels * kernel_h * kernel_w;
        let weight = kaiming_uniform(
            &[out_channels, in_channels, kernel_h, kernel_w],
            fan_in,
            seed,
        )
        .requires_grad();

        let bias = bias.then(|| zeros(&[out_channels]).requires_grad());

        Self {
            weight,
            bias,
            in_channels,
            out_channels,
            kernel_h,
            kernel_w,
        }
    }

    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Kernel size as (height, width).
    #[must_use]
    pub fn kernel_size(&self) -> (usize, usize) {
        (self.kernel_h, self.kernel_w)
    }

    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[must_use]
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Replace the weight, e.g. with pre-trained values.
    ///
    /// # Panics
    ///
    /// Panics if the shape differs from the current weight.
    pub fn set_weight(&mut self, weight: Tensor) {
        assert_eq!(weight.shape(), self.weight.shape(), "Conv2d weight shape mismatch");
        self.weight = weight;
    }

    /// Replace the bias.
    ///
    /// # Panics
    ///
    /// Panics if the length differs from `out_channels`.
    pub fn set_bias(&mut self, bias: Tensor) {
        assert_eq!(bias.shape(), &[self.out_channels], "Conv2d bias shape mismatch");
        self.bias = Some(bias);
    }

    fn output_size(&self, in_h: usize, in_w: usize) -> (usize, usize) {
        assert!(
            in_h >= self.kernel_h && in_w >= self.kernel_w,
            "Conv2d kernel {:?} larger than input ({in_h}, {in_w})",
            self.kernel_size()
        );
        (in_h - self.kernel_h + 1, in_w - self.kernel_w + 1)
    }

    /// Row of the flattened input read by every kernel tap,
    /// ordered (batch, out_y, out_x, tap_y, tap_x).
    fn patch_rows(&self, batch: usize, in_h: usize, in_w: usize, out_h: usize, out_w: usize) -> Vec<usize> {
        let mut rows = Vec::with_capacity(batch * out_h * out_w * self.kernel_h * self.kernel_w);
        for n in 0..batch {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    for kh in 0..self.kernel_h {
                        for kw in 0..self.kernel_w {
                            rows.push((n * in_h + oh + kh) * in_w + ow + kw);
                        }
                    }
                }
            }
        }
        rows
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.ndim(),
            4,
            "Conv2d expects 4D input [N, C, H, W], got {}D",
            input.ndim()
        );
        let shape = input.shape();
        let (batch, channels, in_h, in_w) = (shape[0], shape[1], shape[2], shape[3]);
        assert_eq!(
            channels, self.in_channels,
            "Expected {} input channels, got {}",
            self.in_channels, channels
        );

        let (out_h, out_w) = self.output_size(in_h, in_w);
        let taps = self.kernel_h * self.kernel_w;

        let pixels = input
            .permute(&[0, 2, 3, 1])
            .view(&[batch * in_h * in_w, channels]);

        let patches = pixels
            .index_select(&self.patch_rows(batch, in_h, in_w, out_h, out_w))
            .view(&[batch * out_h * out_w, taps * channels]);

        // [out, in, kh, kw] -> [kh * kw * in, out], matching the patch column order
        let kernel = self
            .weight
            .permute(&[0, 2, 3, 1])
            .view(&[self.out_channels, taps * channels])
            .transpose();

        let mut output = patches.matmul(&kernel);
        if let Some(ref bias) = self.bias {
            output = output.broadcast_add(bias);
        }

        output
            .view(&[batch, out_h, out_w, self.out_channels])
            .permute(&[0, 3, 1, 2])
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match &mut self.bias {
            Some(b) => vec![&mut self.weight, b],
            None => vec![&mut self.weight],
        }
    }
}

impl std::fmt::Debug for Conv2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conv2d")
            .field("in_channels", &self.in_channels)
            .field("out_channels", &self.out_channels)
            .field("kernel_size", &(self.kernel_h, self.kernel_w))
            .field("bias", &self.bias.is_some())
            .finish_non_exhaustive()
    }
}
