use matrixcompare::{assert_matrix_eq, assert_scalar_eq, prop_assert_scalar_eq};
use nalgebra::{DMatrix, Point2};
use paste::paste;
use proptest::prelude::*;
use rbf_fd::basis::{evaluate, CenterShapes, Kernel, RadialBasis};
use rbf_fd::differential::MultiIndex;
use rbf_fd::RbfFdError;
use std::str::FromStr;

/// Compares every derivative of total order 1..=4 at a fixed displacement with central
/// differences of the derivative one order lower.
fn check_derivatives_against_finite_differences(kernel: Kernel, shape: f64) {
    let d = [0.3, -0.4];
    let h = 1e-5;
    let orders = [[0, 0], [1, 0], [0, 1], [2, 0], [1, 1], [0, 2], [3, 0], [2, 1], [1, 2], [0, 3]];
    for alpha in orders {
        for axis in 0..2 {
            let mut raised = alpha;
            raised[axis] += 1;
            let mut d_plus = d;
            d_plus[axis] += h;
            let mut d_minus = d;
            d_minus[axis] -= h;

            let alpha = MultiIndex::from(alpha);
            let f_plus = kernel.derivative(&alpha, &d_plus, shape).unwrap();
            let f_minus = kernel.derivative(&alpha, &d_minus, shape).unwrap();
            let fd = (f_plus - f_minus) / (2.0 * h);
            let exact = kernel
                .derivative(&MultiIndex::from(raised), &d, shape)
                .unwrap();
            assert_scalar_eq!(exact, fd, comp = abs, tol = 1e-6 * exact.abs().max(1.0));
        }
    }
}

macro_rules! kernel_derivative_tests {
    ($($kernel:ident),*) => {
        paste! {
            $(
                #[test]
                fn [<$kernel:lower _derivatives_match_finite_differences>]() {
                    check_derivatives_against_finite_differences(Kernel::$kernel, 1.3);
                }
            )*
        }
    };
}

kernel_derivative_tests!(Phs1, Phs2, Phs3, Phs4, Phs5, Phs6, Phs7, Phs8, Mq, Imq, Iq, Ga, Exp, Se, Mat32, Mat52);

#[test]
fn kernel_values() {
    let eps = 0.5;
    let r = 2.0;
    let er: f64 = eps * r;
    assert_scalar_eq!(Kernel::Phs1.value(r, eps), er, comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Phs2.value(r, eps), 0.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Phs3.value(r, 2.0), 64.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(Kernel::Phs4.value(r, 1.0), 16.0 * 2.0f64.ln(), comp = abs, tol = 1e-12);
    assert_scalar_eq!(Kernel::Mq.value(r, eps), 2.0f64.sqrt(), comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Imq.value(r, eps), 1.0 / 2.0f64.sqrt(), comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Iq.value(r, eps), 0.5, comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Ga.value(r, eps), (-1.0f64).exp(), comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Exp.value(r, eps), (-4.0f64).exp(), comp = abs, tol = 1e-14);
    assert_scalar_eq!(Kernel::Se.value(r, eps), (-8.0f64).exp(), comp = abs, tol = 1e-14);

    let a = 3.0f64.sqrt() / eps;
    assert_scalar_eq!(Kernel::Mat32.value(r, eps), (1.0 + a * r) * (-a * r).exp(), comp = abs, tol = 1e-14);
    let a = 5.0f64.sqrt() / eps;
    let expected = (1.0 + a * r + a * a * r * r / 3.0) * (-a * r).exp();
    assert_scalar_eq!(Kernel::Mat52.value(r, eps), expected, comp = abs, tol = 1e-14);
}

#[test]
fn kernel_values_at_zero_separation() {
    for kernel in Kernel::ALL {
        let expected = if kernel.name().starts_with("phs") { 0.0 } else { 1.0 };
        assert_eq!(kernel.value(0.0, 1.5), expected, "kernel {}", kernel);
    }
}

#[test]
fn zero_separation_limits() {
    let eps = 2.0f64;
    let zero = [0.0];
    let d = |kernel: Kernel, order: usize| kernel.derivative(&MultiIndex::from([order]), &zero, eps);

    assert_scalar_eq!(d(Kernel::Mat52, 4).unwrap(), 25.0 / eps.powi(4), comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Mat52, 2).unwrap(), -5.0 / (3.0 * eps * eps), comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Mat32, 2).unwrap(), -3.0 / (eps * eps), comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Ga, 2).unwrap(), -2.0 * eps * eps, comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Ga, 4).unwrap(), 12.0 * eps.powi(4), comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Se, 2).unwrap(), -1.0 / (eps * eps), comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Mq, 2).unwrap(), eps * eps, comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Imq, 2).unwrap(), -eps * eps, comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Iq, 2).unwrap(), -2.0 * eps * eps, comp = abs, tol = 1e-12);
    assert_scalar_eq!(d(Kernel::Exp, 0).unwrap(), 1.0, comp = abs, tol = 1e-14);

    // Odd orders vanish by symmetry
    assert_eq!(d(Kernel::Phs3, 1).unwrap(), 0.0);
    assert_eq!(d(Kernel::Mat32, 1).unwrap(), 0.0);
    assert_eq!(d(Kernel::Phs2, 1).unwrap(), 0.0);
    assert_eq!(d(Kernel::Phs3, 2).unwrap(), 0.0);
}

#[test]
fn zero_separation_limits_of_mixed_derivatives() {
    let eps = 1.5f64;
    let zero = [0.0, 0.0];
    let ga_xxyy = Kernel::Ga
        .derivative(&MultiIndex::from([2, 2]), &zero, eps)
        .unwrap();
    assert_scalar_eq!(ga_xxyy, 4.0 * eps.powi(4), comp = abs, tol = 1e-12);

    let mat52_xy = Kernel::Mat52
        .derivative(&MultiIndex::from([1, 1]), &zero, eps)
        .unwrap();
    assert_eq!(mat52_xy, 0.0);
}

#[test]
fn zero_separation_limits_match_nearby_values() {
    let eps = 1.2f64;
    let order = MultiIndex::from([2, 0]);
    for kernel in [Kernel::Ga, Kernel::Mq, Kernel::Imq, Kernel::Se, Kernel::Mat32, Kernel::Mat52] {
        let limit = kernel.derivative(&order, &[0.0, 0.0], eps).unwrap();
        let nearby = kernel.derivative(&order, &[1e-8, 0.0], eps).unwrap();
        assert_scalar_eq!(limit, nearby, comp = abs, tol = 1e-6 * limit.abs().max(1.0));
    }
}

#[test]
fn unsupported_derivatives_at_zero_separation() {
    let cases = [(Kernel::Phs3, 3), (Kernel::Phs2, 2), (Kernel::Phs1, 1), (Kernel::Exp, 1), (Kernel::Mat32, 3), (Kernel::Mat52, 5)];
    for (kernel, order) in cases {
        let result = kernel.derivative(&MultiIndex::from([order]), &[0.0], 1.0);
        assert_eq!(
            result,
            Err(RbfFdError::UnsupportedDerivative {
                kernel: kernel.name().to_string(),
                order,
                center: None,
            })
        );
    }
}

#[test]
fn zero_separation_uses_scaled_distance() {
    // r / ε is above the threshold for ε = 1e-12, so the closed form is used and an
    // odd derivative is nonzero
    let value = Kernel::Exp
        .derivative(&MultiIndex::from([1]), &[1e-11], 1e-12)
        .unwrap();
    assert!(value < 0.0);

    // ε r is below the threshold, so this is treated as coincident points
    let value = Kernel::Ga
        .derivative(&MultiIndex::from([1]), &[1e-11], 1.0)
        .unwrap();
    assert_eq!(value, 0.0);
}

#[test]
fn polyharmonic_zero_separation_ignores_shape() {
    // r is below the threshold, so a large ε does not move the cutoff
    let value = Kernel::Phs3
        .derivative(&MultiIndex::from([1]), &[1e-11], 1e3)
        .unwrap();
    assert_eq!(value, 0.0);

    // r is above the threshold while ε r is not, so the closed form 3 ε³ r x is used
    let value = Kernel::Phs3
        .derivative(&MultiIndex::from([1]), &[1e-9], 1e-3)
        .unwrap();
    assert_scalar_eq!(value, 3.0e-27, comp = abs, tol = 1e-36);
    assert_eq!(Kernel::Phs3.value(1e-11, 1e3), 0.0);
}

#[test]
fn derivative_dimension_mismatch_is_invalid_input() {
    let result = Kernel::Phs3.derivative(&MultiIndex::from([1, 0]), &[1.0], 1.0);
    assert!(matches!(result, Err(RbfFdError::InvalidInput { .. })));
}

#[test]
fn min_polynomial_degrees() {
    let expected = [
        (Kernel::Phs1, 0),
        (Kernel::Phs2, 1),
        (Kernel::Phs3, 1),
        (Kernel::Phs4, 2),
        (Kernel::Phs5, 2),
        (Kernel::Phs6, 3),
        (Kernel::Phs7, 3),
        (Kernel::Phs8, 4),
        (Kernel::Mq, 0),
        (Kernel::Imq, -1),
        (Kernel::Iq, -1),
        (Kernel::Ga, -1),
        (Kernel::Exp, -1),
        (Kernel::Se, -1),
        (Kernel::Mat32, -1),
        (Kernel::Mat52, -1),
    ];
    for (kernel, degree) in expected {
        assert_eq!(kernel.min_polynomial_degree(), degree, "kernel {}", kernel);
        assert_eq!(kernel.is_positive_definite(), degree < 0, "kernel {}", kernel);
        assert_eq!(RadialBasis::<f64>::min_polynomial_degree(&kernel), degree);
    }
}

#[test]
fn kernel_names_round_trip_through_from_str() {
    for kernel in Kernel::ALL {
        assert_eq!(Kernel::from_str(kernel.name()), Ok(kernel));
        assert_eq!(kernel.to_string(), kernel.name());
    }
    assert_eq!("PHS3".parse::<Kernel>(), Ok(Kernel::Phs3));
    assert!(matches!("phs9".parse::<Kernel>(), Err(RbfFdError::InvalidInput { .. })));
}

#[test]
fn evaluate_builds_kernel_matrix() {
    let eval_points = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
    let centers = [Point2::new(0.0, 0.0), Point2::new(0.0, 2.0), Point2::new(1.0, 1.0)];
    let matrix = evaluate(&Kernel::Phs3, &eval_points, &centers, &MultiIndex::zeros(2), CenterShapes::Uniform(1.0)).unwrap();
    let sqrt5_cubed = 5.0f64.powf(1.5);
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 3, &[
        0.0, 8.0,         2.0f64.powf(1.5),
        1.0, sqrt5_cubed, 1.0,
    ]);
    assert_matrix_eq!(matrix, expected, comp = abs, tol = 1e-12);

    // ∂x r³ = 3 r x, with x the first component of the displacement from the center
    let dx = evaluate(&Kernel::Phs3, &eval_points, &centers, &MultiIndex::from([1, 0]), CenterShapes::Uniform(1.0)).unwrap();
    assert_scalar_eq!(dx[(1, 1)], 3.0 * 5.0f64.sqrt() * 1.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(dx[(0, 2)], 3.0 * 2.0f64.sqrt() * -1.0, comp = abs, tol = 1e-12);

    let result = evaluate(&Kernel::Phs3, &eval_points, &centers, &MultiIndex::from([1]), CenterShapes::Uniform(1.0));
    assert!(matches!(result, Err(RbfFdError::InvalidInput { .. })));
}

#[test]
fn evaluate_with_shape_per_center() {
    let eval_points = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
    let centers = [Point2::new(0.0, 1.0), Point2::new(1.0, 1.0), Point2::new(2.0, 0.0)];
    let shapes = [0.5, 1.0, 2.0];
    let order = MultiIndex::zeros(2);
    let matrix = evaluate(&Kernel::Ga, &eval_points, &centers, &order, CenterShapes::PerCenter(&shapes)).unwrap();
    for (i, x) in eval_points.iter().enumerate() {
        for (j, c) in centers.iter().enumerate() {
            let expected = Kernel::Ga.value((x - c).norm(), shapes[j]);
            assert_scalar_eq!(matrix[(i, j)], expected, comp = abs, tol = 1e-14);
        }
    }

    // Equal per-center values reproduce the uniform shape
    let uniform = evaluate(&Kernel::Ga, &eval_points, &centers, &order, CenterShapes::Uniform(2.0)).unwrap();
    let repeated = evaluate(&Kernel::Ga, &eval_points, &centers, &order, CenterShapes::PerCenter(&[2.0; 3])).unwrap();
    assert_eq!(uniform, repeated);
}

#[test]
fn evaluate_rejects_wrong_number_of_shapes() {
    let eval_points = [Point2::new(0.0, 0.0)];
    let centers = [Point2::new(0.0, 1.0), Point2::new(1.0, 1.0)];
    let result = evaluate(
        &Kernel::Mq,
        &eval_points,
        &centers,
        &MultiIndex::zeros(2),
        CenterShapes::PerCenter(&[1.0, 2.0, 3.0]),
    );
    assert!(matches!(result, Err(RbfFdError::InvalidPolicy { .. })));
}

proptest! {
    #[test]
    fn zero_order_derivative_is_value(kernel in any::<Kernel>(), x in -2.0..2.0, y in -2.0..2.0, shape in 0.5..2.0) {
        let r = f64::sqrt(x * x + y * y);
        prop_assume!(r > 1e-3);
        let value = kernel.value(r, shape);
        let derivative = kernel.derivative(&MultiIndex::zeros(2), &[x, y], shape).unwrap();
        prop_assert_scalar_eq!(value, derivative, comp = abs, tol = 1e-12 * value.abs().max(1.0));
    }

    #[test]
    fn derivatives_have_parity_of_their_order(
        kernel in any::<Kernel>(),
        order in rbf_fd::proptest::multi_index(2, 3),
        x in -2.0f64..2.0,
        y in -2.0f64..2.0,
    ) {
        prop_assume!(x * x + y * y > 1e-3);
        let shape = 0.8;
        let d = kernel.derivative(&order, &[x, y], shape).unwrap();
        let d_reflected = kernel.derivative(&order, &[-x, -y], shape).unwrap();
        let sign = if order.total_order() % 2 == 0 { 1.0 } else { -1.0 };
        prop_assert_scalar_eq!(d, sign * d_reflected, comp = abs, tol = 1e-10 * d.abs().max(1.0));
    }
}
