use std::cmp::Reverse;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Neighbours already visited in raster order.
const PRIOR_NEIGHBOURS: [(isize, isize, isize); 13] = [
    (-1, -1, -1),
    (-1, -1, 0),
    (-1, -1, 1),
    (-1, 0, -1),
    (-1, 0, 0),
    (-1, 0, 1),
    (-1, 1, -1),
    (-1, 1, 0),
    (-1, 1, 1),
    (0, -1, -1),
    (0, -1, 0),
    (0, -1, 1),
    (0, 0, -1),
];

struct DisjointSet {
    parent: Vec<u32>,
}

impl DisjointSet {
    fn new() -> Self {
        Self { parent: vec![0] }
    }

    fn make(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        label
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child as usize] = root;
        }
    }
}

/// A labeled array and the number of components in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Labeling<A> {
    pub labels: A,
    pub count: u32,
}

impl<A> Labeling<A> {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Label a 3D volume with 26-connectivity. Neighbours connect when they
/// carry the same non-zero value; `0` is background and keeps label `0`.
/// Labels are numbered by first appearance in raster order.
pub fn label_3d(volume: &ArrayView3<'_, u8>) -> Labeling<Array3<u32>> {
    let (depth, height, width) = volume.dim();
    let mut labels = Array3::<u32>::zeros((depth, height, width));
    let mut sets = DisjointSet::new();

    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                let value = volume[[z, y, x]];
                if value == 0 {
                    continue;
                }
                let mut current = 0u32;
                for &(dz, dy, dx) in &PRIOR_NEIGHBOURS {
                    let (nz, ny, nx) = (z as isize + dz, y as isize + dy, x as isize + dx);
                    if nz < 0 || ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                        continue;
                    }
                    let idx = [nz as usize, ny as usize, nx as usize];
                    if volume[idx] != value {
                        continue;
                    }
                    let neighbour = labels[idx];
                    if current == 0 {
                        current = neighbour;
                    } else if neighbour != current {
                        sets.union(current, neighbour);
                    }
                }
                labels[[z, y, x]] = if current == 0 { sets.make() } else { current };
            }
        }
    }

    let mut relabel = vec![0u32; sets.parent.len()];
    let mut count = 0u32;
    for provisional in labels.iter_mut().filter(|l| **l != 0) {
        let root = sets.find(*provisional) as usize;
        if relabel[root] == 0 {
            count += 1;
            relabel[root] = count;
        }
        *provisional = relabel[root];
    }

    Labeling { labels, count }
}

/// Label a 2D image with 8-connectivity.
pub fn label_2d(image: &ArrayView2<'_, u8>) -> Labeling<Array2<u32>> {
    let Labeling { labels, count } = label_3d(&image.view().insert_axis(Axis(0)));
    Labeling {
        labels: labels.index_axis_move(Axis(0), 0),
        count,
    }
}

/// Voxel count per label; index 0 counts background.
pub fn component_sizes<'a>(labels: impl IntoIterator<Item = &'a u32>, count: u32) -> Vec<usize> {
    let mut sizes = vec![0usize; count as usize + 1];
    for &label in labels {
        sizes[label as usize] += 1;
    }
    sizes
}

/// The non-background label with the most voxels. Ties go to the lowest
/// label, i.e. the component seen first in raster order.
pub fn largest_label<'a>(labels: impl IntoIterator<Item = &'a u32>, count: u32) -> Option<u32> {
    let sizes = component_sizes(labels, count);
    (1..=count).max_by_key(|&label| (sizes[label as usize], Reverse(label)))
}
