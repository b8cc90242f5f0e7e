//! Assembly of global sparse RBF-FD operators.
//!
//! Stencils of all centers are computed in parallel. Each center produces one row of the
//! operator, and rows are written into disjoint, pre-sized regions of the CSR arrays.
use crate::allocators::NodeAllocator;
use crate::basis::{Kernel, RadialBasis};
use crate::differential::DifferentialOperator;
use crate::error::RbfFdError;
use crate::neighbors::NeighborIndex;
use crate::policy::{
    resolve_polynomial_degree, resolve_shape_parameters, resolve_stencil_sizes, ShapeParameter, StencilSize,
};
use crate::stencil::{solve_many, AppliedFallback, Fallback, Stencil, StencilSettings};
use crate::Real;
use log::{debug, info, warn};
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DefaultAllocator, DimName, OPoint, Scalar};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::mem;
use std::slice;
use thread_local::ThreadLocal;

/// The points at which operators are evaluated, i.e. the rows of the operator.
#[derive(Debug, Clone)]
pub enum Centers<'a, T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// Every node is a center.
    Nodes,
    /// A subset of the nodes, given by node index.
    Rows(&'a [usize]),
    /// Arbitrary points, which need not coincide with any node.
    Points(&'a [OPoint<T, D>]),
}

/// A fallback applied to the stencil of a specific row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub row: usize,
    pub fallback: AppliedFallback,
}

/// Summary of an operator build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub num_rows: usize,
    pub num_columns: usize,
    /// Number of stored entries of each operator.
    pub nnz: usize,
    /// The polynomial degree requested for all stencils.
    pub polynomial_degree: i32,
    /// The largest condition number among all stencil systems.
    pub max_condition_number: f64,
    /// Fallbacks in ascending row order.
    pub fallbacks: Vec<FallbackEvent>,
}

/// Builds sparse RBF-FD operators on a node set.
///
/// By default every node is a center, the basis is [`Kernel::Phs3`], the stencil size and
/// the polynomial degree are chosen automatically and the shape parameter is `1`.
#[derive(Debug, Clone)]
pub struct OperatorBuilder<'a, T, D, B = Kernel>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    nodes: &'a [OPoint<T, D>],
    centers: Centers<'a, T, D>,
    basis: B,
    stencil_size: StencilSize,
    degree: Option<i32>,
    shape: ShapeParameter<T>,
    settings: StencilSettings,
}

impl<'a, T, D> OperatorBuilder<'a, T, D, Kernel>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn new(nodes: &'a [OPoint<T, D>]) -> Self {
        Self {
            nodes,
            centers: Centers::Nodes,
            basis: Kernel::default(),
            stencil_size: StencilSize::default(),
            degree: None,
            shape: ShapeParameter::default(),
            settings: StencilSettings::default(),
        }
    }
}

impl<'a, T, D, B> OperatorBuilder<'a, T, D, B>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn with_basis<B2>(self, basis: B2) -> OperatorBuilder<'a, T, D, B2> {
        OperatorBuilder {
            nodes: self.nodes,
            centers: self.centers,
            basis,
            stencil_size: self.stencil_size,
            degree: self.degree,
            shape: self.shape,
            settings: self.settings,
        }
    }

    /// Only builds the rows of the given nodes, in the given order.
    pub fn with_rows(self, rows: &'a [usize]) -> Self {
        Self {
            centers: Centers::Rows(rows),
            ..self
        }
    }

    /// Builds one row per given point instead of one per node.
    pub fn with_centers(self, centers: &'a [OPoint<T, D>]) -> Self {
        Self {
            centers: Centers::Points(centers),
            ..self
        }
    }

    pub fn with_stencil_size(self, stencil_size: StencilSize) -> Self {
        Self { stencil_size, ..self }
    }

    pub fn with_polynomial_degree(self, degree: i32) -> Self {
        Self {
            degree: Some(degree),
            ..self
        }
    }

    pub fn with_shape_parameter(self, shape: ShapeParameter<T>) -> Self {
        Self { shape, ..self }
    }

    pub fn with_settings(self, settings: StencilSettings) -> Self {
        Self { settings, ..self }
    }

    pub fn nodes(&self) -> &'a [OPoint<T, D>] {
        self.nodes
    }

    pub fn basis(&self) -> &B {
        &self.basis
    }

    pub fn num_centers(&self) -> usize {
        match self.centers {
            Centers::Nodes => self.nodes.len(),
            Centers::Rows(rows) => rows.len(),
            Centers::Points(points) => points.len(),
        }
    }

    fn center(&self, index: usize) -> &OPoint<T, D> {
        match self.centers {
            Centers::Nodes => &self.nodes[index],
            Centers::Rows(rows) => &self.nodes[rows[index]],
            Centers::Points(points) => &points[index],
        }
    }
}

/// Per-thread buffers for neighbor queries.
struct StencilWorkspace<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    neighbor_indices: Vec<usize>,
    neighbor_points: Vec<OPoint<T, D>>,
}

impl<T, D> Default for StencilWorkspace<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn default() -> Self {
        Self {
            neighbor_indices: Vec::new(),
            neighbor_points: Vec::new(),
        }
    }
}

/// The stencil of a single row, with one column of weights per operator.
#[derive(Debug)]
struct RowStencil<T: Scalar> {
    neighbors: Vec<usize>,
    weights: DMatrix<T>,
    condition_number: f64,
    fallbacks: Vec<AppliedFallback>,
}

struct RowStencils<T: Scalar> {
    rows: Vec<RowStencil<T>>,
    degree: i32,
}

impl<'a, T, D, B> OperatorBuilder<'a, T, D, B>
where
    T: Real,
    D: DimName,
    B: RadialBasis<T>,
    DefaultAllocator: NodeAllocator<T, D>,
    <DefaultAllocator as Allocator<T, D>>::Buffer: Send + Sync,
    <DefaultAllocator as Allocator<f64, D>>::Buffer: Send + Sync,
{
    /// Builds the sparse matrix of a single operator.
    pub fn build(&self, operator: &DifferentialOperator<T>) -> Result<CsrMatrix<T>, RbfFdError> {
        let mut matrices = self.build_many(slice::from_ref(operator))?;
        Ok(matrices
            .pop()
            .expect("Internal error: one matrix is built per operator"))
    }

    /// Builds the sparse matrices of several operators.
    ///
    /// Neighbor queries and stencil factorizations are shared between the operators, and
    /// all matrices have the same sparsity pattern.
    pub fn build_many(&self, operators: &[DifferentialOperator<T>]) -> Result<Vec<CsrMatrix<T>>, RbfFdError> {
        self.build_with_report(operators)
            .map(|(matrices, _)| matrices)
    }

    /// Same as [`build_many`](Self::build_many), but also reports condition numbers and
    /// applied fallbacks.
    pub fn build_with_report(
        &self,
        operators: &[DifferentialOperator<T>],
    ) -> Result<(Vec<CsrMatrix<T>>, BuildReport), RbfFdError> {
        let RowStencils { rows, degree } = self.compute_row_stencils(operators)?;

        debug!("Assembling {} operator(s) from {} stencils", operators.len(), rows.len());
        let matrices = assemble_csr(&rows, operators.len(), self.nodes.len());

        let report = BuildReport {
            num_rows: rows.len(),
            num_columns: self.nodes.len(),
            nnz: matrices.first().map(|matrix| matrix.nnz()).unwrap_or(0),
            polynomial_degree: degree,
            max_condition_number: rows
                .iter()
                .map(|row| row.condition_number)
                .fold(0.0, f64::max),
            fallbacks: rows
                .iter()
                .enumerate()
                .flat_map(|(row, stencil)| {
                    stencil
                        .fallbacks
                        .iter()
                        .map(move |&fallback| FallbackEvent { row, fallback })
                })
                .collect(),
        };
        info!(
            "Assembled {} RBF-FD operator(s): {} x {} with {} nonzeros, max condition number {:e}, {} fallback(s)",
            matrices.len(),
            report.num_rows,
            report.num_columns,
            report.nnz,
            report.max_condition_number,
            report.fallbacks.len()
        );
        Ok((matrices, report))
    }

    /// Computes the stencils of every center without assembling them.
    ///
    /// The outer vector has one entry per operator, the inner one entry per center.
    pub fn stencils(&self, operators: &[DifferentialOperator<T>]) -> Result<Vec<Vec<Stencil<T>>>, RbfFdError> {
        let RowStencils { rows, .. } = self.compute_row_stencils(operators)?;
        let stencils = (0..operators.len())
            .map(|q| {
                rows.iter()
                    .enumerate()
                    .map(|(center, row)| Stencil {
                        center,
                        neighbors: row.neighbors.clone(),
                        weights: row.weights.column(q).iter().copied().collect(),
                    })
                    .collect()
            })
            .collect();
        Ok(stencils)
    }

    fn validate(&self, operators: &[DifferentialOperator<T>]) -> Result<(), RbfFdError> {
        if self.nodes.is_empty() {
            return Err(RbfFdError::invalid_input("node set is empty"));
        }
        if let Some(i) = self
            .nodes
            .iter()
            .position(|x| x.coords.iter().any(|x_i| !x_i.is_finite()))
        {
            return Err(RbfFdError::invalid_input(format!("node {} has non-finite coordinates", i)));
        }
        if operators.is_empty() {
            return Err(RbfFdError::invalid_input("no operators to build"));
        }
        for operator in operators {
            operator.validate(D::dim())?;
        }
        match self.centers {
            Centers::Nodes => {}
            Centers::Rows(rows) => {
                if let Some(&row) = rows.iter().find(|&&row| row >= self.nodes.len()) {
                    return Err(RbfFdError::invalid_input(format!(
                        "row {} is out of bounds for {} nodes",
                        row,
                        self.nodes.len()
                    )));
                }
            }
            Centers::Points(points) => {
                if let Some(i) = points
                    .iter()
                    .position(|x| x.coords.iter().any(|x_i| !x_i.is_finite()))
                {
                    return Err(RbfFdError::invalid_input(format!("center {} has non-finite coordinates", i)));
                }
            }
        }
        Ok(())
    }

    fn compute_row_stencils(&self, operators: &[DifferentialOperator<T>]) -> Result<RowStencils<T>, RbfFdError> {
        self.validate(operators)?;

        let num_centers = self.num_centers();
        let max_order = operators
            .iter()
            .map(|operator| operator.max_order())
            .max()
            .unwrap_or(0);
        let degree = resolve_polynomial_degree(self.degree, self.basis.min_polynomial_degree(), max_order)?;
        let sizes = resolve_stencil_sizes(&self.stencil_size, num_centers, D::dim(), degree, self.nodes.len())?;

        debug!("Building neighbor index for {} nodes", self.nodes.len());
        let index = NeighborIndex::from_points(self.nodes);
        let shapes = resolve_shape_parameters(&self.shape, num_centers, |i| index.nearest_spacing(self.center(i)))?;

        debug!(
            "Computing {} stencils with basis {} and polynomial degree {}",
            num_centers,
            self.basis.name(),
            degree
        );
        let workspace: ThreadLocal<RefCell<StencilWorkspace<T, D>>> = ThreadLocal::new();
        let results: Vec<_> = (0..num_centers)
            .into_par_iter()
            .map(|row| {
                let ws = &mut *workspace.get_or_default().borrow_mut();
                self.compute_row_stencil(row, sizes[row], shapes[row], degree, operators, &index, ws)
                    .map_err(|err| err.at_center(row))
            })
            .collect();
        // Report the lowest failing row regardless of scheduling
        let rows = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        Ok(RowStencils { rows, degree })
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_row_stencil(
        &self,
        row: usize,
        initial_size: usize,
        shape: T,
        degree: i32,
        operators: &[DifferentialOperator<T>],
        index: &NeighborIndex<D>,
        ws: &mut StencilWorkspace<T, D>,
    ) -> Result<RowStencil<T>, RbfFdError> {
        let center = self.center(row);
        let max_size = match self.settings.fallback {
            Fallback::GrowStencil { max_size } => max_size.min(index.len()),
            _ => initial_size,
        };

        let mut size = initial_size;
        loop {
            index.query_into(center, size, &mut ws.neighbor_indices)?;
            ws.neighbor_points.clear();
            ws.neighbor_points
                .extend(ws.neighbor_indices.iter().map(|&j| self.nodes[j].clone()));

            match solve_many(
                &self.basis,
                center,
                &ws.neighbor_points,
                operators,
                degree,
                shape,
                &self.settings,
            ) {
                Ok(solved) => {
                    let mut fallbacks = Vec::new();
                    if size > initial_size {
                        fallbacks.push(AppliedFallback::GrewStencil {
                            from: initial_size,
                            to: size,
                        });
                    }
                    fallbacks.extend(solved.fallback);
                    for fallback in &fallbacks {
                        warn!(
                            "Stencil of center {} is ill-conditioned, applied fallback {:?} (condition number {:e})",
                            row, fallback, solved.condition_number
                        );
                    }
                    return Ok(RowStencil {
                        neighbors: ws.neighbor_indices.clone(),
                        weights: solved.weights,
                        condition_number: solved.condition_number,
                        fallbacks,
                    });
                }
                Err(RbfFdError::IllConditionedStencil { condition_number, .. }) if size < max_size => {
                    debug!(
                        "Stencil of center {} with {} neighbors has condition number {:e}, adding a neighbor",
                        row, size, condition_number
                    );
                    size += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Builds a sparse operator for a single differential operator on a node set, with every
/// node as a center.
///
/// A `degree` of `None` selects the polynomial degree automatically, see
/// [`resolve_polynomial_degree`].
pub fn build_operator<T, D, B>(
    nodes: &[OPoint<T, D>],
    operator: &DifferentialOperator<T>,
    basis: B,
    stencil_size: StencilSize,
    degree: Option<i32>,
    shape: ShapeParameter<T>,
) -> Result<CsrMatrix<T>, RbfFdError>
where
    T: Real,
    D: DimName,
    B: RadialBasis<T>,
    DefaultAllocator: NodeAllocator<T, D>,
    <DefaultAllocator as Allocator<T, D>>::Buffer: Send + Sync,
    <DefaultAllocator as Allocator<f64, D>>::Buffer: Send + Sync,
{
    let builder = OperatorBuilder {
        degree,
        ..OperatorBuilder::new(nodes)
            .with_basis(basis)
            .with_stencil_size(stencil_size)
            .with_shape_parameter(shape)
    };
    builder.build(operator)
}

/// Sorted, unique columns of a row, and the position of each stencil neighbor among them.
struct RowPattern {
    columns: Vec<usize>,
    slots: Vec<usize>,
}

impl RowPattern {
    fn from_neighbors(neighbors: &[usize]) -> Self {
        let mut columns = neighbors.to_vec();
        columns.sort_unstable();
        columns.dedup();
        let slots = neighbors
            .iter()
            .map(|j| {
                columns
                    .binary_search(j)
                    .expect("Internal error: every neighbor must be a column")
            })
            .collect();
        Self { columns, slots }
    }
}

fn assemble_csr<T: Real>(rows: &[RowStencil<T>], num_operators: usize, num_columns: usize) -> Vec<CsrMatrix<T>> {
    let patterns: Vec<_> = rows
        .par_iter()
        .map(|row| RowPattern::from_neighbors(&row.neighbors))
        .collect();

    let mut offsets = Vec::with_capacity(rows.len() + 1);
    offsets.push(0);
    for pattern in &patterns {
        offsets.push(offsets.last().copied().unwrap_or(0) + pattern.columns.len());
    }
    let nnz = offsets.last().copied().unwrap_or(0);

    let mut column_indices = vec![0; nnz];
    split_rows_mut(&mut column_indices, &offsets)
        .into_par_iter()
        .zip(&patterns)
        .for_each(|(row_columns, pattern)| row_columns.copy_from_slice(&pattern.columns));

    (0..num_operators)
        .map(|q| {
            let mut values = vec![T::zero(); nnz];
            split_rows_mut(&mut values, &offsets)
                .into_par_iter()
                .zip(rows.par_iter().zip(&patterns))
                .for_each(|(row_values, (row, pattern))| {
                    // Duplicate columns accumulate into the same slot
                    for (j, &slot) in pattern.slots.iter().enumerate() {
                        row_values[slot] += row.weights[(j, q)];
                    }
                });
            CsrMatrix::try_from_csr_data(rows.len(), num_columns, offsets.clone(), column_indices.clone(), values)
                .expect("Internal error: assembled CSR data must be valid")
        })
        .collect()
}

/// Splits `data` into consecutive disjoint rows, where row `i` spans
/// `offsets[i]..offsets[i + 1]`.
fn split_rows_mut<'a, X>(mut data: &'a mut [X], offsets: &[usize]) -> Vec<&'a mut [X]> {
    let mut rows = Vec::with_capacity(offsets.len().saturating_sub(1));
    for window in offsets.windows(2) {
        let (row, rest) = mem::take(&mut data).split_at_mut(window[1] - window[0]);
        rows.push(row);
        data = rest;
    }
    rows
}
