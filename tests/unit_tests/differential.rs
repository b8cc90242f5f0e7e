use rbf_fd::differential::{DifferentialOperator, MultiIndex, Term};
use rbf_fd::RbfFdError;

#[test]
fn multi_index_basics() {
    let alpha = MultiIndex::from([2, 0, 1]);
    assert_eq!(alpha.dim(), 3);
    assert_eq!(alpha.total_order(), 3);
    assert_eq!(alpha[0], 2);
    assert_eq!(alpha[2], 1);
    assert!(!alpha.is_zero());
    assert_eq!(alpha.as_slice(), &[2, 0, 1]);
    assert_eq!(alpha.to_string(), "(2, 0, 1)");

    assert!(MultiIndex::zeros(2).is_zero());
    assert_eq!(MultiIndex::unit(3, 1, 2), MultiIndex::from(vec![0, 2, 0]));
    assert_eq!(MultiIndex::new(vec![1, 1]), MultiIndex::from([1, 1]));
}

#[test]
#[should_panic]
fn multi_index_unit_out_of_bounds() {
    MultiIndex::unit(2, 2, 1);
}

#[test]
fn laplacian_has_one_term_per_axis() {
    let laplacian = DifferentialOperator::<f64>::laplacian(3);
    assert_eq!(laplacian.terms().len(), 3);
    assert_eq!(laplacian.max_order(), 2);
    for term in laplacian.terms() {
        assert_eq!(term.coefficient, 1.0);
        assert_eq!(term.order.total_order(), 2);
        assert_eq!(term.order.iter().filter(|&&a| a == 2).count(), 1);
    }
}

#[test]
fn gradient_has_one_operator_per_axis() {
    let gradient = DifferentialOperator::<f64>::gradient(2);
    assert_eq!(gradient.len(), 2);
    assert_eq!(gradient[0], DifferentialOperator::partial([1, 0]));
    assert_eq!(gradient[1], DifferentialOperator::partial([0, 1]));
}

#[test]
fn terms_with_same_multi_index_are_merged() {
    let mut op = DifferentialOperator::new()
        .with_term([0, 2], 1.5)
        .with_term([2, 0], 1.0)
        .with_term([0, 0], -2.0);
    op.add_term([0, 2], 0.5);

    let expected = vec![
        Term {
            order: MultiIndex::from([0, 0]),
            coefficient: -2.0,
        },
        Term {
            order: MultiIndex::from([0, 2]),
            coefficient: 2.0,
        },
        Term {
            order: MultiIndex::from([2, 0]),
            coefficient: 1.0,
        },
    ];
    assert_eq!(op.terms(), expected.as_slice());

    // Insertion order does not matter
    let reordered = DifferentialOperator::new()
        .with_term([0, 0], -2.0)
        .with_term([2, 0], 1.0)
        .with_term([0, 2], 2.0);
    assert_eq!(op, reordered);
}

#[test]
fn identity_and_empty_operators() {
    let identity = DifferentialOperator::<f64>::identity(2);
    assert_eq!(identity.terms().len(), 1);
    assert!(identity.terms()[0].order.is_zero());
    assert_eq!(identity.max_order(), 0);

    let empty = DifferentialOperator::<f64>::new();
    assert!(empty.is_empty());
    assert_eq!(empty.max_order(), 0);
}

#[test]
fn validate_rejects_malformed_operators() {
    assert!(DifferentialOperator::<f64>::laplacian(2).validate(2).is_ok());

    let invalid = |op: DifferentialOperator<f64>, dim| matches!(op.validate(dim), Err(RbfFdError::InvalidInput { .. }));
    assert!(invalid(DifferentialOperator::new(), 2));
    assert!(invalid(DifferentialOperator::laplacian(2), 3));
    assert!(invalid(DifferentialOperator::partial([1, 0]).with_term([1], 1.0), 2));
    assert!(invalid(DifferentialOperator::new().with_term([1, 0], f64::NAN), 2));
}
