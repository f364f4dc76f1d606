//! Expression trees of behavioral constraints.
//!
//! A constraint string such as `abs((PR | [M]) - (PR | [F])) <= 0.15` is
//! compiled into a tree of operators, constants and base nodes, in the
//! canonical form "satisfied iff the tree's value is <= 0". A base node is
//! a measure function, optionally restricted to the rows whose sensitive
//! attributes match a filter.
//!
//! Trees are immutable once built. Evaluating a bound never stores
//! anything on the tree: see `bounds`.
pub mod parser;

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;

use crate::error::ParseError;
use crate::measures::{Measure, MeasureRegistry, Regime};

pub use self::parser::Parser;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Abs,
    Exp,
}

impl OperatorKind {
    /// Name of a function-call operator, `None` for infix operators.
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            OperatorKind::Min => Some("min"),
            OperatorKind::Max => Some("max"),
            OperatorKind::Abs => Some("abs"),
            OperatorKind::Exp => Some("exp"),
            _ => None,
        }
    }

    pub fn from_function_name(name: &str) -> Option<OperatorKind> {
        match name {
            "min" => Some(OperatorKind::Min),
            "max" => Some(OperatorKind::Max),
            "abs" => Some(OperatorKind::Abs),
            "exp" => Some(OperatorKind::Exp),
            _ => None,
        }
    }

    /// Checks that `n` children are allowed: one for `abs` and `exp`, at
    /// least two for `min` and `max`, exactly two otherwise.
    fn check_arity(&self, n: usize) -> Result<(), ParseError> {
        let (ok, expected) = match self {
            OperatorKind::Abs | OperatorKind::Exp => (n == 1, "1"),
            OperatorKind::Min | OperatorKind::Max => (n >= 2, "at least 2"),
            _ => (n == 2, "2"),
        };
        if ok {
            Ok(())
        } else {
            Err(ParseError::Arity {
                name: self.to_string(),
                expected: expected.to_string(),
                found: n,
            })
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let symbol = match self {
            OperatorKind::Add => "+",
            OperatorKind::Sub => "-",
            OperatorKind::Mul => "*",
            OperatorKind::Div => "/",
            other => other.function_name().unwrap_or("?"),
        };
        write!(f, "{}", symbol)
    }
}

/// A leaf estimated from data: a measure function, optionally restricted
/// to rows whose sensitive attributes in `filter` are all 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseNode {
    pub measure: Measure,
    pub filter: Option<BTreeSet<String>>,
}

impl BaseNode {
    pub fn new(measure: Measure) -> BaseNode {
        BaseNode { measure, filter: None }
    }

    pub fn filtered(measure: Measure, filter: BTreeSet<String>) -> BaseNode {
        BaseNode { measure, filter: Some(filter) }
    }

    /// Renders the filter as `[A,B]`, or `[]` without a filter.
    pub fn filter_label(&self) -> String {
        match self.filter {
            Some(ref cols) => format!("[{}]", cols.iter().join(",")),
            None => "[]".to_string(),
        }
    }
}

impl fmt::Display for BaseNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.filter {
            Some(_) => write!(f, "({} | {})", self.measure.name(), self.filter_label()),
            None => write!(f, "{}", self.measure.name()),
        }
    }
}

/// A node of an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Operator { kind: OperatorKind, children: Vec<Node> },
    Constant(f64),
    Base(BaseNode),
}

impl Node {
    /// Builds an operator node, checking its arity.
    pub fn operator(kind: OperatorKind, children: Vec<Node>) -> Result<Node, ParseError> {
        kind.check_arity(children.len())?;
        Ok(Node::Operator { kind, children })
    }

    /// `lhs - rhs`.
    pub fn sub(lhs: Node, rhs: Node) -> Node {
        Node::Operator { kind: OperatorKind::Sub, children: vec![lhs, rhs] }
    }

    /// Base nodes in pre-order, duplicates included.
    pub fn base_nodes(&self) -> Vec<&BaseNode> {
        let mut out = vec![];
        self.collect_base_nodes(&mut out);
        out
    }

    fn collect_base_nodes<'a>(&'a self, out: &mut Vec<&'a BaseNode>) {
        match self {
            Node::Operator { children, .. } =>
                children.iter().for_each(|c| c.collect_base_nodes(out)),
            Node::Base(b) => out.push(b),
            Node::Constant(_) => {},
        }
    }

    /// Distinct base nodes, in order of first appearance.
    pub fn distinct_base_nodes(&self) -> Vec<&BaseNode> {
        self.base_nodes()
            .into_iter()
            .unique()
            .collect()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Node::Constant(c) => write!(f, "{}", c),
            Node::Base(b) => write!(f, "{}", b),
            Node::Operator { kind, children } => match kind.function_name() {
                Some(name) => write!(f, "{}({})", name, children.iter().join(", ")),
                None => write!(f, "({} {} {})", children[0], kind, children[1]),
            },
        }
    }
}

/// Which ends of an interval a node must be bounded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundsNeeded {
    pub lower: bool,
    pub upper: bool,
}

impl BoundsNeeded {
    pub const BOTH: BoundsNeeded = BoundsNeeded { lower: true, upper: true };
    pub const UPPER: BoundsNeeded = BoundsNeeded { lower: false, upper: true };
    pub const LOWER: BoundsNeeded = BoundsNeeded { lower: true, upper: false };

    /// The need of a child whose value enters with a negative sign.
    pub fn mirrored(self) -> BoundsNeeded {
        BoundsNeeded { lower: self.upper, upper: self.lower }
    }

    pub fn union(self, other: BoundsNeeded) -> BoundsNeeded {
        BoundsNeeded { lower: self.lower || other.lower, upper: self.upper || other.upper }
    }

    pub fn is_two_sided(self) -> bool {
        self.lower && self.upper
    }
}

/// Walks the tree from `node`, which must be bounded on `needed`, and
/// reports the ends each base node must be bounded on.
///
/// `add`, `exp`, `min` and `max` are monotone increasing in every child,
/// so the need passes through; `sub` mirrors it on its right child. The
/// other operators need both ends of every child.
pub fn leaf_requirements<'a>(node: &'a Node, needed: BoundsNeeded)
        -> Vec<(&'a BaseNode, BoundsNeeded)> {
    let mut out: Vec<(&BaseNode, BoundsNeeded)> = vec![];
    requirements_helper(node, needed, &mut out);
    out
}

fn requirements_helper<'a>(node: &'a Node, needed: BoundsNeeded,
                           out: &mut Vec<(&'a BaseNode, BoundsNeeded)>) {
    match node {
        Node::Constant(_) => {},
        Node::Base(b) => match out.iter_mut().find(|(other, _)| *other == b) {
            Some((_, n)) => *n = n.union(needed),
            None => out.push((b, needed)),
        },
        Node::Operator { kind, children } => {
            for (i, child) in children.iter().enumerate() {
                let child_needed = match kind {
                    OperatorKind::Add | OperatorKind::Exp
                        | OperatorKind::Min | OperatorKind::Max => needed,
                    OperatorKind::Sub if i == 0 => needed,
                    OperatorKind::Sub => needed.mirrored(),
                    OperatorKind::Mul | OperatorKind::Div | OperatorKind::Abs =>
                        BoundsNeeded::BOTH,
                };
                requirements_helper(child, child_needed, out);
            }
        },
    }
}

/// A behavioral constraint: satisfied iff the value of `tree` is <= 0,
/// to be guaranteed with probability at least `1 - delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    expression: String,
    tree: Node,
    delta: f64,
}

impl Constraint {
    /// Parses a constraint string against the process-wide measure
    /// registry.
    ///
    /// # Arguments
    ///
    /// * `expression` - Constraint string, e.g. `Mean_Squared_Error <= 2.0`.
    /// * `delta` - Confidence parameter in (0, 1).
    /// * `regime` - Regime whose measure functions may appear.
    /// * `sensitive_columns` - Columns that filters may reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use seldonian::measures::{Regime, SubRegime};
    /// use seldonian::tree::Constraint;
    ///
    /// let regime = Regime::SupervisedLearning(SubRegime::Classification);
    /// let columns = vec!["M".to_string(), "F".to_string()];
    /// let c = Constraint::parse("abs((PR | [M]) - (PR | [F])) <= 0.15", 0.05,
    ///                           regime, &columns).unwrap();
    ///
    /// assert_eq!(c.tree().to_string(), "(abs(((PR | [M]) - (PR | [F]))) - 0.15)");
    /// ```
    pub fn parse(expression: &str, delta: f64, regime: Regime, sensitive_columns: &[String])
            -> Result<Constraint, ParseError> {
        Constraint::parse_with_registry(expression, delta, regime, sensitive_columns,
                                        MeasureRegistry::global())
    }

    /// Parses a constraint string against a custom measure registry.
    pub fn parse_with_registry(expression: &str, delta: f64, regime: Regime,
                               sensitive_columns: &[String], registry: &MeasureRegistry)
            -> Result<Constraint, ParseError> {
        if !(delta > 0. && delta < 1.) {
            return Err(ParseError::InvalidDelta(delta));
        }
        let tree = Parser::new(regime, sensitive_columns, registry).parse(expression)?;

        Ok(Constraint { expression: expression.to_string(), tree, delta })
    }

    /// The constraint string as written by the user.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::measures::SubRegime;

    fn classification() -> Regime {
        Regime::SupervisedLearning(SubRegime::Classification)
    }

    fn columns() -> Vec<String> {
        vec!["M".to_string(), "F".to_string()]
    }

    /// Verify the bounds needed on each leaf of a fairness constraint.
    #[test]
    fn requirements() {
        let c = Constraint::parse("FPR - 2 * (FNR | [M]) + exp(TPR) - 0.1", 0.05,
                                  classification(), &columns()).unwrap();
        let reqs = leaf_requirements(c.tree(), BoundsNeeded::UPPER);
        let names = reqs.iter()
                        .map(|(b, n)| (b.to_string(), *n))
                        .collect::<Vec<_>>();

        assert_eq!(names, vec![("FPR".to_string(), BoundsNeeded::UPPER),
                               ("(FNR | [M])".to_string(), BoundsNeeded::BOTH),
                               ("TPR".to_string(), BoundsNeeded::UPPER)]);
    }

    #[test]
    fn mirrored_requirements() {
        let c = Constraint::parse("0.8 - min(PR, NR)", 0.05, classification(), &[])
                          .unwrap();
        let reqs = leaf_requirements(c.tree(), BoundsNeeded::UPPER);

        assert!(reqs.iter().all(|&(_, n)| n == BoundsNeeded::LOWER));
    }

    /// Verify that duplicate leaves are merged, both for the delta split
    /// and for the ends they need.
    #[test]
    fn duplicates_share_delta() {
        let c = Constraint::parse("PR - PR + (PR | [M])", 0.06, classification(), &columns())
                          .unwrap();

        assert_eq!(c.tree().base_nodes().len(), 3);
        assert_eq!(c.tree().distinct_base_nodes().len(), 2);

        let reqs = leaf_requirements(c.tree(), BoundsNeeded::UPPER);
        assert_eq!(reqs[0].1, BoundsNeeded::BOTH);
    }

    #[test]
    fn invalid_delta() {
        assert_eq!(Constraint::parse("PR", 1.5, classification(), &[]),
                   Err(ParseError::InvalidDelta(1.5)));
    }
}
