//! Construction-time configuration of [`VertexMeshConv`](super::VertexMeshConv).

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MeshConvError, Result};

/// How each vertex's neighbors are chosen and combined before the transform.
///
/// Labels round-trip through [`FromStr`] and [`Display`](fmt::Display). Any
/// label containing `"sum"` is a sum order and keeps its spelling, so
/// `"random_sum"` and `"sum"` stay distinguishable. Unrecognized labels select
/// the default fixed order.
///
/// ```
/// use meshconv::nn::mesh::NeighborOrder;
///
/// let order: NeighborOrder = "random_sum".parse().unwrap();
/// assert!(order.is_sum());
/// assert!(order.samples_neighbors());
/// assert_eq!(order.to_string(), "random_sum");
/// assert_eq!("whatever".parse::<NeighborOrder>().unwrap(), NeighborOrder::Fixed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NeighborOrder {
    /// Neighbors in the order the mesh stores them.
    #[default]
    Fixed,
    /// Uniform sample of `k` neighbors per vertex, redrawn every forward.
    Random,
    /// Neighbor slots collapsed into one summed slot.
    Sum(String),
    /// Self plus three aggregate statistics (mean-centered).
    MeanC,
    /// Self plus three aggregate statistics (Gaussian-centered).
    GaussianC,
    /// Self plus three aggregate statistics (median distance).
    MedianD,
}

impl NeighborOrder {
    /// Whether neighbor slots are summed into a single slot.
    #[must_use]
    pub fn is_sum(&self) -> bool {
        matches!(self, Self::Sum(_))
    }

    /// Whether the order needs four aggregate-statistic slots.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::MeanC | Self::GaussianC | Self::MedianD)
    }

    /// Whether neighbors are drawn at random instead of taken in order.
    #[must_use]
    pub fn samples_neighbors(&self) -> bool {
        match self {
            Self::Random => true,
            Self::Sum(label) => label.contains("random"),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fixed => "fixed",
            Self::Random => "random",
            Self::Sum(label) => label,
            Self::MeanC => "mean_c",
            Self::GaussianC => "gaussian_c",
            Self::MedianD => "median_d",
        }
    }
}

impl FromStr for NeighborOrder {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            _ if s.contains("sum") => Self::Sum(s.to_string()),
            "random" => Self::Random,
            "mean_c" => Self::MeanC,
            "gaussian_c" => Self::GaussianC,
            "median_d" => Self::MedianD,
            _ => Self::Fixed,
        })
    }
}

impl fmt::Display for NeighborOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for NeighborOrder {
    fn from(label: String) -> Self {
        match label.parse() {
            Ok(order) => order,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for NeighborOrder {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

impl From<NeighborOrder> for String {
    fn from(order: NeighborOrder) -> Self {
        match order {
            NeighborOrder::Sum(label) => label,
            other => other.as_str().to_string(),
        }
    }
}

/// Configuration for [`VertexMeshConv`](super::VertexMeshConv).
///
/// `n_neighbors` keeps the signed encoding used by mesh convolution
/// configs: `0` convolves each vertex alone, `-1` averages over every
/// neighbor, and `k > 0` gathers `k` neighbor slots.
///
/// The default gathers 6 randomly sampled neighbors per vertex. A label that
/// fails to parse still means [`NeighborOrder::Fixed`].
///
/// ```
/// use meshconv::nn::mesh::{NeighborOrder, VertexConvConfig};
///
/// let config = VertexConvConfig::new(3, 16)
///     .with_n_neighbors(6)
///     .with_neighbor_order(NeighborOrder::from("sum"));
/// assert!(config.validate().is_ok());
/// assert_eq!(config.filter_width(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub bias: bool,
    pub n_neighbors: i64,
    pub neighbor_order: NeighborOrder,
    /// Seeds both the weight initializer and the neighbor sampler.
    pub seed: Option<u64>,
}

impl Default for VertexConvConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 1,
            bias: true,
            n_neighbors: 6,
            neighbor_order: NeighborOrder::Random,
            seed: None,
        }
    }
}

impl VertexConvConfig {
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    #[must_use]
    pub fn with_n_neighbors(mut self, n_neighbors: i64) -> Self {
        self.n_neighbors = n_neighbors;
        self
    }

    #[must_use]
    pub fn with_neighbor_order(mut self, order: impl Into<NeighborOrder>) -> Self {
        self.neighbor_order = order.into();
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether every neighbor is averaged into one slot.
    #[must_use]
    pub fn is_average(&self) -> bool {
        self.n_neighbors == -1
    }

    /// Neighbor slots gathered per vertex, excluding the vertex itself.
    ///
    /// Zero in isolated and average modes, which never read neighbor tables.
    #[must_use]
    pub fn neighbor_slots(&self) -> usize {
        usize::try_from(self.n_neighbors).unwrap_or(0)
    }

    /// Width of the convolution kernel along the neighborhood axis.
    ///
    /// | `n_neighbors` | order         | width   |
    /// |---------------|---------------|---------|
    /// | `0`           | any           | 1       |
    /// | `-1`          | fixed/random  | 2       |
    /// | `k`           | sum variant   | 2       |
    /// | `k`           | aggregate     | 4       |
    /// | `k`           | fixed/random  | `1 + k` |
    #[must_use]
    pub fn filter_width(&self) -> usize {
        if self.n_neighbors == 0 {
            1
        } else if self.is_average() || self.neighbor_order.is_sum() {
            2
        } else if self.neighbor_order.is_aggregate() {
            4
        } else {
            1 + self.neighbor_slots()
        }
    }

    /// Check the construction rules.
    ///
    /// # Errors
    ///
    /// Returns [`MeshConvError::InvalidHyperparameter`] for zero channel
    /// counts, `n_neighbors < -1`, or average mode combined with a sum or
    /// aggregate order.
    pub fn validate(&self) -> Result<()> {
        let invalid = |param: &str, value: String, constraint: &str| {
            Err(MeshConvError::InvalidHyperparameter {
                param: param.to_string(),
                value,
                constraint: constraint.to_string(),
            })
        };

        if self.in_channels == 0 {
            return invalid("in_channels", "0".into(), "> 0");
        }
        if self.out_channels == 0 {
            return invalid("out_channels", "0".into(), "> 0");
        }
        if self.n_neighbors < -1 {
            return invalid("n_neighbors", self.n_neighbors.to_string(), ">= -1");
        }
        if self.is_average()
            && (self.neighbor_order.is_sum() || self.neighbor_order.is_aggregate())
        {
            return invalid(
                "neighbor_order",
                self.neighbor_order.to_string(),
                "fixed or random order when n_neighbors = -1",
            );
        }
        Ok(())
    }
}
