//! Node sets and helpers shared by tests and benchmarks.
use nalgebra::allocator::Allocator;
use nalgebra::{DVector, DefaultAllocator, DimName, OPoint, Point1, Point2, Point3};
use nalgebra_sparse::CsrMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// `n` equispaced nodes on `[a, b]`.
pub fn uniform_nodes_1d(n: usize, a: f64, b: f64) -> Vec<Point1<f64>> {
    assert!(n >= 2, "Need at least two nodes");
    let h = (b - a) / (n - 1) as f64;
    (0..n).map(|i| Point1::new(a + i as f64 * h)).collect()
}

/// An `n x n` grid on the unit square with each node displaced by up to `jitter` times the
/// grid spacing per axis.
///
/// The displacement is pseudo-random but fully determined by `seed`.
pub fn jittered_grid_2d(n: usize, jitter: f64, seed: u64) -> Vec<Point2<f64>> {
    assert!(n >= 2, "Need at least two nodes per axis");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let h = 1.0 / (n - 1) as f64;
    let mut nodes = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let dx = jitter_offset(&mut rng, jitter);
            let dy = jitter_offset(&mut rng, jitter);
            nodes.push(Point2::new((i as f64 + dx) * h, (j as f64 + dy) * h));
        }
    }
    nodes
}

/// An `n x n x n` grid on the unit cube, jittered like [`jittered_grid_2d`].
pub fn jittered_grid_3d(n: usize, jitter: f64, seed: u64) -> Vec<Point3<f64>> {
    assert!(n >= 2, "Need at least two nodes per axis");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let h = 1.0 / (n - 1) as f64;
    let mut nodes = Vec::with_capacity(n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let dx = jitter_offset(&mut rng, jitter);
                let dy = jitter_offset(&mut rng, jitter);
                let dz = jitter_offset(&mut rng, jitter);
                nodes.push(Point3::new((i as f64 + dx) * h, (j as f64 + dy) * h, (k as f64 + dz) * h));
            }
        }
    }
    nodes
}

fn jitter_offset(rng: &mut ChaCha8Rng, jitter: f64) -> f64 {
    if jitter > 0.0 {
        rng.gen_range(-jitter..jitter)
    } else {
        0.0
    }
}

/// Samples `f` at the given points.
pub fn sample<D>(points: &[OPoint<f64, D>], f: impl Fn(&OPoint<f64, D>) -> f64) -> DVector<f64>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    DVector::from_iterator(points.len(), points.iter().map(f))
}

/// Applies a sparse operator to the samples of `f` at the nodes.
pub fn apply_operator<D>(operator: &CsrMatrix<f64>, nodes: &[OPoint<f64, D>], f: impl Fn(&OPoint<f64, D>) -> f64) -> DVector<f64>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    assert_eq!(operator.ncols(), nodes.len(), "Operator columns must match nodes");
    operator * sample(nodes, f)
}

/// `x^exponent = Π_i x_i^(exponent_i)`
pub fn monomial(x: &[f64], exponent: &[usize]) -> f64 {
    x.iter()
        .zip(exponent)
        .map(|(x_i, &e_i)| x_i.powi(e_i as i32))
        .product()
}

/// Largest absolute entry of `a - b`.
pub fn max_abs_diff(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (a - b).amax()
}
