//! Strategies for property-based testing with `proptest`.
use crate::basis::Kernel;
use crate::differential::MultiIndex;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use ::proptest::sample::select;
use nalgebra::{Point2, Point3};

impl Arbitrary for Kernel {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        select(Kernel::ALL.to_vec()).boxed()
    }
}

/// Multi-indices of the given dimension with total order at most `max_order`.
pub fn multi_index(dim: usize, max_order: usize) -> impl Strategy<Value = MultiIndex> {
    vec(0..=max_order, dim)
        .prop_filter("total order too large", move |orders| orders.iter().sum::<usize>() <= max_order)
        .prop_map(MultiIndex::new)
}

/// Nodes of a jittered `n x n` grid in the unit square, with `2 <= n <= max_per_axis`.
///
/// Each node is displaced by at most 30% of the grid spacing per axis, so the nodes are
/// distinct and reasonably well separated.
pub fn jittered_grid_2d(max_per_axis: usize) -> impl Strategy<Value = Vec<Point2<f64>>> {
    (2..=max_per_axis.max(2))
        .prop_flat_map(|n| (Just(n), vec([-0.3..0.3, -0.3..0.3], n * n)))
        .prop_map(|(n, jitter)| {
            let h = 1.0 / (n - 1) as f64;
            jitter
                .into_iter()
                .enumerate()
                .map(|(idx, [dx, dy])| {
                    let (i, j) = (idx % n, idx / n);
                    Point2::new((i as f64 + dx) * h, (j as f64 + dy) * h)
                })
                .collect()
        })
}

/// Nodes of a jittered `n x n x n` grid in the unit cube, with `2 <= n <= max_per_axis`.
pub fn jittered_grid_3d(max_per_axis: usize) -> impl Strategy<Value = Vec<Point3<f64>>> {
    (2..=max_per_axis.max(2))
        .prop_flat_map(|n| (Just(n), vec([-0.3..0.3, -0.3..0.3, -0.3..0.3], n * n * n)))
        .prop_map(|(n, jitter)| {
            let h = 1.0 / (n - 1) as f64;
            jitter
                .into_iter()
                .enumerate()
                .map(|(idx, [dx, dy, dz])| {
                    let (i, j, k) = (idx % n, (idx / n) % n, idx / (n * n));
                    Point3::new((i as f64 + dx) * h, (j as f64 + dy) * h, (k as f64 + dz) * h)
                })
                .collect()
        })
}
