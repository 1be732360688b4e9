//! Index arithmetic that turns ragged adjacency into one batched row gather.
//!
//! Two stages:
//!
//! 1. [`PaddedAdjacency`] fixes each mesh's neighborhoods to a `(rows, 1 + k)`
//!    table of local indices: column 0 is the vertex itself, the remaining
//!    columns are neighbors, and every unused cell holds [`SENTINEL_INDEX`].
//! 2. [`GatherIndex`] shifts every local index by one and offsets it by the
//!    mesh's block in a batch-flattened buffer of `batch * (rows + 1)` rows
//!    whose first row per block is all zeros. Sentinels land on that zero row.

use rand::Rng;
use tracing::warn;

use super::adjacency::VertexAdjacency;

/// Local index of a missing neighbor (underflow, padding row, repaired entry).
///
/// Resolves to the zero row of the mesh's block, so a missing neighbor
/// contributes exactly zero, indistinguishable from a neighbor whose
/// features are zero.
pub const SENTINEL_INDEX: i64 = -1;

/// Global row in the batch-flattened, zero-prefixed feature buffer.
///
/// Mesh `batch_index` owns rows `batch_index * (rows + 1) ..` of the buffer;
/// the first of them is the zero row, and local vertex `v` sits at `v + 1`.
///
/// ```
/// use meshconv::nn::mesh::{flatten_index, SENTINEL_INDEX};
///
/// assert_eq!(flatten_index(0, SENTINEL_INDEX, 4), 0);
/// assert_eq!(flatten_index(0, 0, 4), 1);
/// assert_eq!(flatten_index(2, 3, 4), 2 * 5 + 4);
/// ```
#[must_use]
pub fn flatten_index(batch_index: usize, local: i64, rows: usize) -> usize {
    debug_assert!(local >= SENTINEL_INDEX, "local index {local} below sentinel");
    debug_assert!(local < rows as i64, "local index {local} outside {rows} rows");
    batch_index * (rows + 1) + (local - SENTINEL_INDEX) as usize
}

/// One mesh's neighborhood table: `rows` rows of `1 + k` local indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedAdjacency {
    rows: usize,
    width: usize,
    indices: Vec<i64>,
}

impl PaddedAdjacency {
    /// Take each vertex's first `k` neighbors in stored order.
    ///
    /// Shorter lists are padded with the sentinel, longer ones truncated, and
    /// neighbors outside the mesh replaced by the sentinel.
    ///
    /// # Panics
    ///
    /// Panics if the mesh has more than `rows` vertices.
    #[must_use]
    pub fn exact<A: VertexAdjacency + ?Sized>(mesh: &A, k: usize, rows: usize) -> Self {
        let mut table = Self::with_self_column(mesh, k, rows);
        let count = mesh.vertex_count();
        let (mut truncated, mut repaired) = (0usize, 0usize);

        for v in 0..count {
            let neighbors = mesh.neighbors(v);
            if neighbors.len() > k {
                truncated += 1;
            }
            let row = table.row_mut(v);
            for (slot, &n) in row[1..].iter_mut().zip(neighbors) {
                if n < count {
                    *slot = n as i64;
                } else {
                    repaired += 1;
                }
            }
        }

        if truncated > 0 || repaired > 0 {
            warn!(
                truncated,
                repaired, k, "neighbor lists repaired while padding adjacency"
            );
        }
        table
    }

    /// Draw `k` neighbors per vertex uniformly without replacement.
    ///
    /// Vertices with at most `k` valid neighbors keep all of them, in stored
    /// order, followed by sentinels. Neighbors outside the mesh are never
    /// drawn.
    ///
    /// # Panics
    ///
    /// Panics if the mesh has more than `rows` vertices.
    #[must_use]
    pub fn sampled<A, R>(mesh: &A, k: usize, rows: usize, rng: &mut R) -> Self
    where
        A: VertexAdjacency + ?Sized,
        R: Rng + ?Sized,
    {
        let mut table = Self::with_self_column(mesh, k, rows);
        let count = mesh.vertex_count();
        let mut repaired = 0usize;

        for v in 0..count {
            let candidates: Vec<usize> = mesh
                .neighbors(v)
                .iter()
                .copied()
                .filter(|&n| n < count)
                .collect();
            repaired += mesh.neighbors(v).len() - candidates.len();

            let row = table.row_mut(v);
            if candidates.len() > k {
                let picks = rand::seq::index::sample(rng, candidates.len(), k);
                for (slot, pick) in row[1..].iter_mut().zip(picks.iter()) {
                    *slot = candidates[pick] as i64;
                }
            } else {
                for (slot, &n) in row[1..].iter_mut().zip(&candidates) {
                    *slot = n as i64;
                }
            }
        }

        if repaired > 0 {
            warn!(repaired, k, "out-of-range neighbors dropped before sampling");
        }
        table
    }

    /// All-sentinel table with column 0 set for the mesh's real vertices.
    fn with_self_column<A: VertexAdjacency + ?Sized>(mesh: &A, k: usize, rows: usize) -> Self {
        let count = mesh.vertex_count();
        assert!(
            count <= rows,
            "mesh has {count} vertices but the table only has {rows} rows"
        );

        let width = 1 + k;
        let mut indices = vec![SENTINEL_INDEX; rows * width];
        for v in 0..count {
            indices[v * width] = v as i64;
        }
        Self {
            rows,
            width,
            indices,
        }
    }

    fn row_mut(&mut self, vertex: usize) -> &mut [i64] {
        &mut self.indices[vertex * self.width..(vertex + 1) * self.width]
    }

    /// Number of rows (the batch's padded vertex count).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Columns per row: self plus `k` neighbor slots.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn row(&self, vertex: usize) -> &[i64] {
        &self.indices[vertex * self.width..(vertex + 1) * self.width]
    }

    /// Row-major view of the whole table.
    #[must_use]
    pub fn as_slice(&self) -> &[i64] {
        &self.indices
    }
}

/// Flattened global gather index for a whole batch, ordered
/// (mesh, vertex, slot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherIndex {
    batch: usize,
    rows: usize,
    width: usize,
    indices: Vec<usize>,
}

impl GatherIndex {
    /// Stack per-mesh tables and map every entry through [`flatten_index`].
    ///
    /// # Panics
    ///
    /// Panics if a table's shape differs from `(rows, width)`.
    #[must_use]
    pub fn from_padded(tables: &[PaddedAdjacency], rows: usize, width: usize) -> Self {
        let mut indices = Vec::with_capacity(tables.len() * rows * width);
        for (b, table) in tables.iter().enumerate() {
            assert_eq!(
                (table.rows(), table.width()),
                (rows, width),
                "table {b} has the wrong shape"
            );
            indices.extend(
                table
                    .as_slice()
                    .iter()
                    .map(|&local| flatten_index(b, local, rows)),
            );
        }

        Self {
            batch: tables.len(),
            rows,
            width,
            indices,
        }
    }

    /// `(batch, rows, width)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.rows, self.width)
    }

    /// Rows in the flattened source buffer this index addresses.
    #[must_use]
    pub fn source_rows(&self) -> usize {
        self.batch * (self.rows + 1)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }
}
