/// The unit grid shared by every patch of a terrain.
///
/// The grid spans `patch_dim` cells on each side. Vertices sit on the integer lattice and
/// are scaled and offset per instance in the vertex shader.
#[derive(Clone, Debug, PartialEq)]
pub struct GridMesh {
    patch_dim: u32,
    vertices: Vec<[f32; 2]>,
    indices: Vec<u16>,
}

impl GridMesh {
    /// Builds the grid. `patch_dim` has to be below 256 for the indices to fit into 16 bit.
    pub fn new(patch_dim: u32) -> Self {
        let vertex_count = patch_dim + 1;

        let vertices = (0..vertex_count)
            .flat_map(|y| (0..vertex_count).map(move |x| [x as f32, y as f32]))
            .collect();

        let mut indices = Vec::with_capacity(6 * (patch_dim * patch_dim) as usize);

        for y in 0..patch_dim {
            for x in 0..patch_dim {
                let v0 = (y * vertex_count + x) as u16;
                let v1 = v0 + 1;
                let v2 = v0 + vertex_count as u16;
                let v3 = v2 + 1;

                // flip the diagonal of every other cell to avoid a directional bias
                if (x + y) % 2 == 0 {
                    indices.extend_from_slice(&[v0, v2, v1, v1, v2, v3]);
                } else {
                    indices.extend_from_slice(&[v2, v3, v0, v0, v3, v1]);
                }
            }
        }

        Self {
            patch_dim,
            vertices,
            indices,
        }
    }

    #[inline]
    pub fn patch_dim(&self) -> u32 {
        self.patch_dim
    }

    pub fn vertices(&self) -> &[[f32; 2]] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn grid_sizes() {
        for patch_dim in [1, 2, 8, 255] {
            let grid = GridMesh::new(patch_dim);

            assert_eq!(grid.vertices().len(), ((patch_dim + 1) * (patch_dim + 1)) as usize);
            assert_eq!(grid.index_count(), 6 * patch_dim * patch_dim);
            assert!(grid
                .indices()
                .iter()
                .all(|&index| (index as usize) < grid.vertices().len()));
        }
    }

    #[test]
    fn vertices_lie_on_the_lattice() {
        let grid = GridMesh::new(4);

        assert_eq!(grid.vertices()[0], [0.0, 0.0]);
        assert_eq!(grid.vertices()[4], [4.0, 0.0]);
        assert_eq!(grid.vertices()[5], [0.0, 1.0]);
        assert_eq!(*grid.vertices().last().unwrap(), [4.0, 4.0]);
    }

    #[test]
    fn triangles_share_one_winding() {
        let grid = GridMesh::new(8);

        for (a, b, c) in grid.indices().iter().tuples() {
            let [a, b, c] = [a, b, c].map(|&i| grid.vertices()[i as usize]);
            let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);

            assert_eq!(cross, -1.0);
        }
    }

    #[test]
    fn diagonals_alternate() {
        let grid = GridMesh::new(2);
        let cells = grid.indices().chunks(6).collect::<Vec<_>>();

        // first cell splits along v1-v2, its neighbour along v0-v3
        assert_eq!(cells[0], &[0, 3, 1, 1, 3, 4]);
        assert_eq!(cells[1], &[4, 5, 1, 1, 5, 2]);
        assert_eq!(cells[2], &[6, 7, 3, 3, 7, 4]);
    }
}
