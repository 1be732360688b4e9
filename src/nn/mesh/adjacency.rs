//! Per-vertex neighbor lists consumed by the mesh convolution.

use std::collections::BTreeSet;

/// Read access to one mesh's vertex neighborhoods.
///
/// Neighbor indices are local to the mesh. Lists may be ragged; the
/// convolution pads or samples them to its configured width.
pub trait VertexAdjacency {
    /// Number of real vertices in the mesh.
    fn vertex_count(&self) -> usize;

    /// Neighbors of `vertex`, in the order the mesh stores them.
    ///
    /// Only called for `vertex < vertex_count()`.
    fn neighbors(&self, vertex: usize) -> &[usize];
}

impl<T: VertexAdjacency + ?Sized> VertexAdjacency for &T {
    fn vertex_count(&self) -> usize {
        (**self).vertex_count()
    }

    fn neighbors(&self, vertex: usize) -> &[usize] {
        (**self).neighbors(vertex)
    }
}

/// Ragged vertex adjacency stored as one neighbor list per vertex.
///
/// # Example
///
/// ```
/// use meshconv::nn::mesh::{MeshAdjacency, VertexAdjacency};
///
/// // A single triangle.
/// let adj = MeshAdjacency::from_edges(&[[0, 1], [1, 2], [2, 0]], 3);
/// assert_eq!(adj.vertex_count(), 3);
/// assert_eq!(adj.neighbors(0), &[1, 2]);
/// assert_eq!(adj.max_degree(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshAdjacency {
    neighbors: Vec<Vec<usize>>,
}

impl MeshAdjacency {
    /// Wrap explicit neighbor lists; `neighbors.len()` is the vertex count.
    #[must_use]
    pub fn new(neighbors: Vec<Vec<usize>>) -> Self {
        Self { neighbors }
    }

    /// Build undirected adjacency from edge pairs.
    ///
    /// Each edge is added in both directions. Duplicate edges, self-loops and
    /// endpoints `>= num_vertices` are dropped. Neighbor lists are sorted.
    #[must_use]
    pub fn from_edges(edges: &[[usize; 2]], num_vertices: usize) -> Self {
        let mut sets = vec![BTreeSet::new(); num_vertices];
        for &[a, b] in edges {
            if a == b || a >= num_vertices || b >= num_vertices {
                continue;
            }
            sets[a].insert(b);
            sets[b].insert(a);
        }

        Self {
            neighbors: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
        }
    }

    /// Build undirected adjacency from triangle faces.
    #[must_use]
    pub fn from_faces(faces: &[[usize; 3]], num_vertices: usize) -> Self {
        let edges: Vec<[usize; 2]> = faces
            .iter()
            .flat_map(|&[a, b, c]| [[a, b], [b, c], [c, a]])
            .collect();
        Self::from_edges(&edges, num_vertices)
    }

    /// Largest neighbor-list length (0 for an empty mesh).
    #[must_use]
    pub fn max_degree(&self) -> usize {
        self.neighbors.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Iterate over the neighbor lists in vertex order.
    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.neighbors.iter().map(Vec::as_slice)
    }
}

impl VertexAdjacency for MeshAdjacency {
    fn vertex_count(&self) -> usize {
        self.neighbors.len()
    }

    fn neighbors(&self, vertex: usize) -> &[usize] {
        &self.neighbors[vertex]
    }
}

impl From<Vec<Vec<usize>>> for MeshAdjacency {
    fn from(neighbors: Vec<Vec<usize>>) -> Self {
        Self::new(neighbors)
    }
}
