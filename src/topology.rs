use log::debug;

use crate::config::{Layout, RunConfig};
use crate::error::{Error, Result};




/**
 * One of the two neighbors of a process along a grid axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Decrement,
    Increment,
}

impl Side {
    fn displacement(self) -> isize {
        match self {
            Side::Decrement => -1,
            Side::Increment => 1,
        }
    }
}




/**
 * Return the slot index of the neighbor on the given side of the given axis:
 * `2 * axis` for the decrement neighbor, `2 * axis + 1` for the increment
 * neighbor. Send and receive call sites both index buffers and requests
 * this way.
 */
pub fn slot(axis: usize, side: Side) -> usize {
    match side {
        Side::Decrement => 2 * axis,
        Side::Increment => 2 * axis + 1,
    }
}




/**
 * Split `procs` evenly over `dims` axes, the last axis absorbing the
 * remainder. The result is not guaranteed to multiply back to `procs`.
 */
pub fn even_extents(procs: usize, dims: usize) -> Vec<usize> {
    if dims == 0 {
        return Vec::new();
    }
    let mut extents = vec![procs / dims; dims];
    extents[dims - 1] += procs % dims;
    extents
}




/**
 * Factor `procs` into `dims` extents as close to each other as possible,
 * largest first. Prime factors are handed out largest first, each to the
 * currently smallest extent.
 */
pub fn balanced_extents(procs: usize, dims: usize) -> Vec<usize> {
    if dims == 0 {
        return Vec::new();
    }
    let mut extents = vec![1; dims];

    if procs == 0 {
        extents[dims - 1] = 0;
        return extents;
    }

    let mut factors = prime_factors(procs);
    factors.sort_unstable_by(|a, b| b.cmp(a));

    for factor in factors {
        let smallest = (0..dims).min_by_key(|&i| extents[i]).unwrap_or(0);
        extents[smallest] *= factor;
    }
    extents.sort_unstable_by(|a, b| b.cmp(a));
    extents
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}




/**
 * A periodic Cartesian grid of processes, as seen from one member
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid {
    extents: Vec<usize>,
    coords: Vec<usize>,
    grid_rank: usize,
    neighbors: Vec<usize>,
}

impl Grid {

    /**
     * Place the process at flat rank `rank` on a periodic grid with the given
     * extents. Ranks are laid out row-major (last axis fastest) without
     * reordering.
     */
    pub fn new(rank: usize, extents: Vec<usize>) -> Self {
        let coords = coords_of(rank, &extents);
        let grid_rank = rank_of(&coords, &extents);

        let mut neighbors = vec![0; 2 * extents.len()];
        for axis in 0..extents.len() {
            for side in [Side::Decrement, Side::Increment] {
                neighbors[slot(axis, side)] = shift(&coords, &extents, axis, side);
            }
        }

        Self {
            extents,
            coords,
            grid_rank,
            neighbors,
        }
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn dimensions(&self) -> usize {
        self.extents.len()
    }

    /**
     * Every axis wraps around.
     */
    pub fn is_periodic(&self) -> bool {
        true
    }

    pub fn coords(&self) -> &[usize] {
        &self.coords
    }

    pub fn grid_rank(&self) -> usize {
        self.grid_rank
    }

    /**
     * Return the rank of the neighbor behind the given slot.
     */
    pub fn neighbor(&self, slot: usize) -> usize {
        self.neighbors[slot]
    }

    /**
     * Return the neighbor ranks indexed by slot.
     */
    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }
}

fn coords_of(mut rank: usize, extents: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; extents.len()];
    for axis in (0..extents.len()).rev() {
        coords[axis] = rank % extents[axis];
        rank /= extents[axis];
    }
    coords
}

fn rank_of(coords: &[usize], extents: &[usize]) -> usize {
    coords
        .iter()
        .zip(extents)
        .fold(0, |rank, (&c, &e)| rank * e + c)
}

fn shift(coords: &[usize], extents: &[usize], axis: usize, side: Side) -> usize {
    let e = extents[axis] as isize;
    let mut target = coords.to_vec();
    target[axis] = (coords[axis] as isize + side.displacement()).rem_euclid(e) as usize;
    rank_of(&target, extents)
}




/**
 * The process topology of a run. A zero-dimensional run has no grid at all,
 * rather than a grid without axes: there are no neighbors and no grid rank.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    Degenerate,
    Grid(Grid),
}

impl Topology {

    /**
     * Build the topology for process `rank` of a group of `procs`. Fails if
     * the requested dimensionality cannot be laid out over the group; the
     * dimensionality is never reduced to make it fit.
     */
    pub fn new(rank: usize, procs: usize, config: &RunConfig) -> Result<Self> {
        let dims = config.dimensions;

        if dims == 0 {
            debug!("[{}] zero-dimensional run, no grid", rank);
            return Ok(Topology::Degenerate);
        }

        // More axes than processes: every even split has a zero extent, and a
        // balanced split only adds axes of extent one.
        if dims > procs {
            return Err(match config.layout {
                Layout::Even => Error::Topology {
                    procs,
                    dims,
                    extents: Vec::new(),
                },
                Layout::Balanced => Error::Config(format!(
                    "a balanced grid of {} processes has at most {} axes, {} requested",
                    procs, procs, dims
                )),
            });
        }

        let extents = match config.layout {
            Layout::Even => even_extents(procs, dims),
            Layout::Balanced => balanced_extents(procs, dims),
        };

        if extents.contains(&0) || extents.iter().product::<usize>() != procs {
            return Err(Error::Topology {
                procs,
                dims,
                extents,
            });
        }

        let grid = Grid::new(rank, extents);
        debug!(
            "[{}] grid extents {:?}, coords {:?}, neighbors {:?}",
            rank,
            grid.extents(),
            grid.coords(),
            grid.neighbors()
        );
        Ok(Topology::Grid(grid))
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Topology::Degenerate => 0,
            Topology::Grid(grid) => grid.dimensions(),
        }
    }

    pub fn num_slots(&self) -> usize {
        2 * self.dimensions()
    }

    pub fn grid_rank(&self) -> Option<usize> {
        match self {
            Topology::Degenerate => None,
            Topology::Grid(grid) => Some(grid.grid_rank()),
        }
    }

    pub fn grid(&self) -> Option<&Grid> {
        match self {
            Topology::Degenerate => None,
            Topology::Grid(grid) => Some(grid),
        }
    }
}




#[cfg(test)]
mod test {

    use super::*;

    fn config(dimensions: usize, layout: Layout) -> RunConfig {
        RunConfig {
            dimensions,
            layout,
            ..RunConfig::default()
        }
    }

    #[test]
    fn even_extents_put_the_remainder_on_the_last_axis() {
        assert_eq!(even_extents(7, 3), vec![2, 2, 3]);
        assert_eq!(even_extents(4, 1), vec![4]);
        assert_eq!(even_extents(4, 2), vec![2, 2]);
        assert!(even_extents(5, 0).is_empty());
    }

    #[test]
    fn accepted_topologies_cover_the_whole_group() {
        for procs in 1..=64 {
            for dims in 1..=4 {
                for layout in [Layout::Even, Layout::Balanced] {
                    if let Ok(Topology::Grid(grid)) = Topology::new(0, procs, &config(dims, layout)) {
                        assert_eq!(grid.extents().iter().product::<usize>(), procs);
                        assert_eq!(grid.dimensions(), dims);
                    }
                }
            }
        }
    }

    #[test]
    fn even_layout_differs_only_on_the_last_axis() {
        for procs in 1..=64 {
            for dims in 1..=4 {
                if let Ok(Topology::Grid(grid)) = Topology::new(0, procs, &config(dims, Layout::Even)) {
                    let e = grid.extents();
                    assert!(e[..dims - 1].iter().all(|&x| x == e[0]));
                    assert_eq!(e[dims - 1] - e[0], procs % dims);
                }
            }
        }
    }

    #[test]
    fn balanced_layout_always_fits() {
        for procs in 1..=64 {
            for dims in 1..=4 {
                let extents = balanced_extents(procs, dims);
                assert_eq!(extents.iter().product::<usize>(), procs);
                assert!(extents.windows(2).all(|w| w[0] >= w[1]));
            }
        }
        assert_eq!(balanced_extents(12, 2), vec![4, 3]);
        assert_eq!(balanced_extents(8, 3), vec![2, 2, 2]);
    }

    #[test]
    fn three_dimensions_over_two_processes_is_a_configuration_error() {
        let result = Topology::new(0, 2, &config(3, Layout::Even));
        match result {
            Err(Error::Topology { procs, dims, extents }) => {
                assert_eq!(procs, 2);
                assert_eq!(dims, 3);
                assert!(extents.is_empty());
            }
            other => panic!("expected a topology error, got {:?}", other),
        }
    }

    #[test]
    fn uneven_product_is_rejected_not_reduced() {
        assert!(matches!(
            Topology::new(0, 6, &config(2, Layout::Even)),
            Err(Error::Topology { .. })
        ));
    }

    #[test]
    fn more_axes_than_processes_is_rejected_before_allocating() {
        assert!(matches!(
            Topology::new(0, 4, &config(1 << 40, Layout::Even)),
            Err(Error::Topology { dims, procs: 4, .. }) if dims == 1 << 40
        ));
        assert!(matches!(
            Topology::new(0, 4, &config(1 << 40, Layout::Balanced)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Topology::new(0, 2, &config(3, Layout::Balanced)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn balanced_layout_pads_with_unit_axes() {
        let topology = Topology::new(0, 6, &config(3, Layout::Balanced)).unwrap();
        assert_eq!(topology.grid().unwrap().extents(), &[3, 2, 1]);
        assert_eq!(topology.num_slots(), 6);
    }

    #[test]
    fn zero_dimensions_has_no_grid() {
        let topology = Topology::new(3, 5, &config(0, Layout::Even)).unwrap();
        assert_eq!(topology, Topology::Degenerate);
        assert_eq!(topology.num_slots(), 0);
        assert_eq!(topology.grid_rank(), None);
    }

    #[test]
    fn ring_neighbors_wrap_around() {
        let grid = Grid::new(0, vec![4]);
        assert_eq!(grid.neighbor(slot(0, Side::Decrement)), 3);
        assert_eq!(grid.neighbor(slot(0, Side::Increment)), 1);

        let grid = Grid::new(3, vec![4]);
        assert_eq!(grid.neighbors(), &[2, 0]);
    }

    #[test]
    fn ring_of_four_never_lists_itself() {
        for rank in 0..4 {
            let grid = Grid::new(rank, vec![4]);
            assert!(grid.neighbors().iter().all(|&n| n != rank));
        }
    }

    #[test]
    fn two_dimensional_neighbors_are_row_major() {
        // 2 x 3 grid:
        // 0 1 2
        // 3 4 5
        let grid = Grid::new(4, vec![2, 3]);
        assert_eq!(grid.coords(), &[1, 1]);
        assert_eq!(grid.grid_rank(), 4);
        assert_eq!(grid.neighbors(), &[1, 1, 3, 5]);

        let grid = Grid::new(0, vec![2, 3]);
        assert_eq!(grid.neighbors(), &[3, 3, 2, 1]);
    }
}
