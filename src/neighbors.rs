//! Nearest-neighbor queries on node sets, backed by an R-tree.
use crate::error::RbfFdError;
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, OPoint, OVector};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::{PointDistance, RTree};

/// Point stored in the R-tree.
///
/// `rstar` requires at least two dimensions, so points of dimension one are embedded in
/// the plane with a zero second coordinate.
#[derive(Debug, Clone, PartialEq)]
struct RTreePoint<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    coords: OPoint<f64, D>,
    padding: f64,
}

impl<D> RTreePoint<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    fn from_point<T: Real>(point: &OPoint<T, D>) -> Self
    where
        DefaultAllocator: Allocator<T, D>,
    {
        Self {
            coords: point.map(|x_i| x_i.to_subset().unwrap()),
            padding: 0.0,
        }
    }
}

impl<D> rstar::Point for RTreePoint<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    type Scalar = f64;
    const DIMENSIONS: usize = if D::USIZE < 2 { 2 } else { D::USIZE };

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        let coords = OVector::<f64, D>::from_fn(|i, _| generator(i)).into();
        let padding = if D::USIZE < 2 { generator(D::USIZE) } else { 0.0 };
        Self { coords, padding }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        if index < D::USIZE {
            self.coords[index]
        } else {
            self.padding
        }
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        if index < D::USIZE {
            &mut self.coords[index]
        } else {
            &mut self.padding
        }
    }
}

/// An immutable spatial index over a set of reference nodes.
///
/// Query results are deterministic: neighbors are sorted by ascending distance, and nodes
/// at the same distance are sorted by ascending index.
pub struct NeighborIndex<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    tree: RTree<GeomWithData<RTreePoint<D>, usize>>,
    num_points: usize,
}

impl<D> std::fmt::Debug for NeighborIndex<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighborIndex")
            .field("num_points", &self.num_points)
            .finish()
    }
}

impl<D> NeighborIndex<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    pub fn from_points<T: Real>(points: &[OPoint<T, D>]) -> Self
    where
        DefaultAllocator: Allocator<T, D>,
    {
        let geometries = points
            .iter()
            .enumerate()
            .map(|(i, point)| GeomWithData::new(RTreePoint::from_point(point), i))
            .collect();
        Self {
            tree: RTree::bulk_load(geometries),
            num_points: points.len(),
        }
    }

    /// The number of reference nodes.
    pub fn len(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Returns the indices of the `k` reference nodes closest to `point`.
    pub fn query<T: Real>(&self, point: &OPoint<T, D>, k: usize) -> Result<Vec<usize>, RbfFdError>
    where
        DefaultAllocator: Allocator<T, D>,
    {
        let mut neighbors = Vec::with_capacity(k);
        self.query_into(point, k, &mut neighbors)?;
        Ok(neighbors)
    }

    /// Same as [`query`](Self::query), but writes the result into the given buffer.
    pub fn query_into<T: Real>(&self, point: &OPoint<T, D>, k: usize, neighbors: &mut Vec<usize>) -> Result<(), RbfFdError>
    where
        DefaultAllocator: Allocator<T, D>,
    {
        neighbors.clear();
        if k > self.num_points {
            return Err(RbfFdError::InsufficientNeighbors {
                requested: k,
                available: self.num_points,
            });
        }
        if k == 0 {
            return Ok(());
        }

        // Collect every node up to and including the distance of the k-th nearest node, so
        // that ties at the boundary are resolved by index rather than by tree layout
        let query_point = RTreePoint::from_point(point);
        let mut candidates = Vec::with_capacity(k + 1);
        let mut kth_distance = None;
        for geom in self.tree.nearest_neighbor_iter(&query_point) {
            let dist2 = geom.distance_2(&query_point);
            if let Some(kth_distance) = kth_distance {
                if dist2 > kth_distance {
                    break;
                }
            }
            candidates.push((OrderedFloat(dist2), geom.data));
            if candidates.len() == k {
                kth_distance = Some(dist2);
            }
        }
        candidates.sort_unstable();
        neighbors.extend(candidates.iter().take(k).map(|&(_, index)| index));
        Ok(())
    }

    /// Distance from `point` to the closest reference node at nonzero distance.
    ///
    /// Returns `None` if every reference node coincides with `point`.
    pub fn nearest_spacing<T: Real>(&self, point: &OPoint<T, D>) -> Option<T>
    where
        DefaultAllocator: Allocator<T, D>,
    {
        let query_point = RTreePoint::from_point(point);
        self.tree
            .nearest_neighbor_iter(&query_point)
            .map(|geom| geom.distance_2(&query_point))
            .find(|&dist2| dist2 > 0.0)
            .map(|dist2| T::from_f64(dist2.sqrt()).unwrap())
    }
}

impl<D> NeighborIndex<D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
    <DefaultAllocator as Allocator<f64, D>>::Buffer: Sync + Send,
{
    /// Queries the `k` nearest reference nodes of every point in parallel.
    pub fn query_many<T: Real>(&self, points: &[OPoint<T, D>], k: usize) -> Result<Vec<Vec<usize>>, RbfFdError>
    where
        DefaultAllocator: Allocator<T, D>,
        <DefaultAllocator as Allocator<T, D>>::Buffer: Sync,
    {
        points
            .par_iter()
            .map(|point| self.query(point, k))
            .collect()
    }
}
