use ndarray::prelude::*;

use seldonian::data::SupervisedData;
use seldonian::measures::{MeasureFunction, MeasureRegistry, Regime, Sampler, SubRegime};
use seldonian::models::SupervisedModel;
use seldonian::tree::parser::tokenize;
use seldonian::tree::{leaf_requirements, BoundsNeeded, Constraint, Node};
use seldonian::ParseError;


fn classification() -> Regime {
    Regime::SupervisedLearning(SubRegime::Classification)
}

fn columns() -> Vec<String> {
    vec!["M".to_string(), "F".to_string()]
}

#[test]
fn fairness_constraints() {
    let cases = [
        ("abs((PR | [M]) - (PR | [F])) <= 0.15", 2),
        ("0.8 - min((PR | [M]) / (PR | [F]), (PR | [F]) / (PR | [M]))", 2),
        ("abs((FNR | [M]) - (FNR | [F])) + abs((FPR | [M]) - (FPR | [F])) <= 0.2", 4),
        ("max(abs((TPR | [M]) - (TPR | [F])), abs((TNR | [M]) - (TNR | [F]))) <= 0.1", 4),
        ("Error - 0.2", 1),
    ];

    for &(s, n_leaves) in &cases {
        let c = Constraint::parse(s, 0.05, classification(), &columns()).unwrap();

        assert_eq!(c.tree().distinct_base_nodes().len(), n_leaves, "{}", s);
        assert_eq!(c.expression(), s);
    }
}

/// Verify that the leaves of a ratio constraint need both bounds, since
/// division is not monotone.
#[test]
fn ratio_needs_both_sides() {
    let c = Constraint::parse("0.8 - min((PR | [M]) / (PR | [F]), (PR | [F]) / (PR | [M]))",
                              0.05, classification(), &columns()).unwrap();

    let reqs = leaf_requirements(c.tree(), BoundsNeeded::UPPER);

    assert_eq!(reqs.len(), 2);
    assert!(reqs.iter().all(|&(_, n)| n == BoundsNeeded::BOTH));
}

#[test]
fn error_messages() {
    let err = Constraint::parse("PR <= 0.1 >= 0", 0.05, classification(), &[]).unwrap_err();
    assert_eq!(err.to_string(), "a constraint may contain at most one inequality, found 2");

    let err = Constraint::parse("J_pi_new <= 0", 0.05, classification(), &[]).unwrap_err();
    assert_eq!(err.to_string(),
               "'J_pi_new' is not a measure function of the supervised classification regime");

    let err = Constraint::parse("PR ^ 2", 0.05, classification(), &[]).unwrap_err();
    assert_eq!(err, ParseError::UnexpectedChar { found: '^', offset: 3 });
}

#[test]
fn tokens_carry_offsets() {
    let offsets = tokenize("  PR <=  0.5").unwrap()
                                          .iter()
                                          .map(|t| t.offset)
                                          .collect::<Vec<_>>();

    assert_eq!(offsets, vec![2, 5, 9]);
}

#[test]
fn reinforcement_learning_constraints() {
    let c = Constraint::parse("-0.25 - J_pi_new", 0.05, Regime::ReinforcementLearning, &[])
                      .unwrap();

    assert_eq!(c.tree().to_string(), "(-0.25 - J_pi_new)");
    assert!(Constraint::parse("PR <= 0.5", 0.05, Regime::ReinforcementLearning, &[]).is_err());
}

fn absolute_error(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    (model.predict(theta, data.features()) - &data.labels()).mapv(f64::abs)
}

/// Verify that a measure added to a custom registry can be parsed, and only
/// with that registry.
#[test]
fn custom_registry() {
    let regression = Regime::SupervisedLearning(SubRegime::Regression);
    let mut registry = MeasureRegistry::builtin();
    registry.insert(MeasureFunction::new("Mean_Absolute_Error", regression,
                                         Sampler::Supervised(absolute_error), None));

    let c = Constraint::parse_with_registry("Mean_Absolute_Error <= 1", 0.1, regression, &[],
                                            &registry).unwrap();

    match c.tree() {
        Node::Operator { children, .. } => assert!(matches!(children[0], Node::Base(_))),
        other => panic!("unexpected tree {}", other),
    }
    assert!(Constraint::parse("Mean_Absolute_Error <= 1", 0.1, regression, &[]).is_err());
}
