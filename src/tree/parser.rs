//! Constraint string parser.
//!
//! Strings are tokenized with `nom`, checked for the errors that can be
//! seen on the token list alone (empty input, unbalanced parentheses,
//! comparisons), and then parsed by recursive descent:
//!
//! ```text
//! constraint := expr [ ("<=" | ">=") expr ]
//! expr       := term { ("+" | "-") term }
//! term       := unary { ("*" | "/") unary }
//! unary      := "-" unary | primary
//! primary    := NUMBER | "e" | MEASURE
//!             | FUNCTION "(" expr { "," expr } ")"
//!             | "(" MEASURE "|" "[" COLUMN { "," COLUMN } "]" ")"
//!             | "(" expr ")"
//! ```
use std::collections::BTreeSet;
use std::f64::consts::E;
use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, one_of},
    combinator::{map, map_res, opt, recognize},
    multi::many0_count,
    sequence::{pair, tuple},
    IResult,
};

use crate::error::ParseError;
use crate::measures::{MeasureRegistry, Regime};
use crate::tree::{BaseNode, Node, OperatorKind};


#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Pipe,
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    Le,
    Ge,
    /// `<`, `>`, `=`, `==` or `!=`: recognized only to be rejected.
    BareComparison(String),
    Number(f64),
    Ident(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Power => write!(f, "**"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::BareComparison(s) => write!(f, "{}", s),
            TokenKind::Number(x) => write!(f, "{}", x),
            TokenKind::Ident(s) => write!(f, "{}", s),
        }
    }
}

/// A token and its byte offset in the constraint string.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

fn number(input: &str) -> IResult<&str, TokenKind> {
    let exponent = tuple((one_of("eE"), opt(one_of("+-")), digit1));
    let mantissa = alt((
        recognize(pair(digit1, opt(pair(char('.'), digit0)))),
        recognize(pair(char('.'), digit1)),
    ));

    map_res(recognize(pair(mantissa, opt(exponent))),
            |s: &str| s.parse::<f64>().map(TokenKind::Number))(input)
}

fn ident(input: &str) -> IResult<&str, TokenKind> {
    map(recognize(pair(alt((alpha1, tag("_"))),
                       many0_count(alt((alphanumeric1, tag("_")))))),
        |s: &str| TokenKind::Ident(s.to_string()))(input)
}

fn comparison(input: &str) -> IResult<&str, TokenKind> {
    alt((
        map(tag("<="), |_| TokenKind::Le),
        map(tag(">="), |_| TokenKind::Ge),
        map(alt((tag("=="), tag("!="), tag("<"), tag(">"), tag("="))),
            |s: &str| TokenKind::BareComparison(s.to_string())),
    ))(input)
}

fn punctuation(input: &str) -> IResult<&str, TokenKind> {
    alt((
        map(tag("**"), |_| TokenKind::Power),
        map(one_of("()[],|+-*/"), |c| match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '|' => TokenKind::Pipe,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            _ => TokenKind::Slash,
        }),
    ))(input)
}

fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((number, ident, comparison, punctuation))(input)
}

/// Splits a constraint string into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = vec![];
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let offset = input.len() - rest.len();
        match token(rest) {
            Ok((r, kind)) => {
                tokens.push(Token { kind, offset });
                rest = r;
            },
            Err(_) => {
                let found = rest.chars().next().unwrap_or(' ');
                return Err(ParseError::UnexpectedChar { found, offset });
            },
        }
    }
    Ok(tokens)
}

/// Rejects token lists that cannot form a constraint, whatever their
/// structure.
fn check_tokens(tokens: &[Token]) -> Result<(), ParseError> {
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let inequalities = tokens.iter()
                             .filter(|t| matches!(t.kind, TokenKind::Le | TokenKind::Ge))
                             .count();
    if inequalities > 1 {
        return Err(ParseError::MultipleInequalities(inequalities));
    }

    let mut depth = 0i64;
    for t in tokens {
        match t.kind {
            TokenKind::BareComparison(ref s) => {
                return Err(ParseError::InvalidComparison(s.clone()));
            },
            TokenKind::Power => {
                return Err(ParseError::UnsupportedOperator("**".to_string()));
            },
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError::UnbalancedParentheses);
                }
            },
            _ => {},
        }
    }
    if depth != 0 {
        return Err(ParseError::UnbalancedParentheses);
    }
    Ok(())
}

/// Parses constraint strings of one regime into canonical trees.
pub struct Parser<'a> {
    regime: Regime,
    sensitive_columns: &'a [String],
    registry: &'a MeasureRegistry,
}

impl<'a> Parser<'a> {
    pub fn new(regime: Regime, sensitive_columns: &'a [String], registry: &'a MeasureRegistry)
            -> Parser<'a> {
        Parser { regime, sensitive_columns, registry }
    }

    /// Parses `input` into a tree whose value is <= 0 exactly when the
    /// constraint holds: `A <= B` becomes `A - B`, `A >= B` becomes
    /// `B - A`, and a string without inequality is taken as is.
    pub fn parse(&self, input: &str) -> Result<Node, ParseError> {
        let tokens = tokenize(input)?;
        check_tokens(&tokens)?;

        let mut cursor = Cursor { parser: self, tokens: &tokens, pos: 0 };
        let lhs = cursor.expr()?;
        let tree = match cursor.peek() {
            Some(TokenKind::Le) => {
                cursor.pos += 1;
                Node::sub(lhs, cursor.expr()?)
            },
            Some(TokenKind::Ge) => {
                cursor.pos += 1;
                Node::sub(cursor.expr()?, lhs)
            },
            _ => lhs,
        };
        cursor.finish()?;

        Ok(tree)
    }

    fn base_node(&self, name: &str) -> Result<BaseNode, ParseError> {
        self.registry
            .get(self.regime, name)
            .map(BaseNode::new)
            .ok_or_else(|| ParseError::UnknownMeasure {
                name: name.to_string(),
                regime: self.regime.to_string(),
            })
    }
}

struct Cursor<'p, 'a> {
    parser: &'p Parser<'a>,
    tokens: &'p [Token],
    pos: usize,
}

impl<'p, 'a> Cursor<'p, 'a> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn unexpected(&self) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(t) => ParseError::UnexpectedToken { found: t.kind.to_string(), offset: t.offset },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            },
            _ => Err(self.unexpected()),
        }
    }

    fn finish(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn expr(&mut self) -> Result<Node, ParseError> {
        let mut node = self.term()?;

        loop {
            let kind = match self.peek() {
                Some(TokenKind::Plus) => OperatorKind::Add,
                Some(TokenKind::Minus) => OperatorKind::Sub,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.term()?;
            node = Node::Operator { kind, children: vec![node, rhs] };
        }
    }

    fn term(&mut self) -> Result<Node, ParseError> {
        let mut node = self.unary()?;

        loop {
            let kind = match self.peek() {
                Some(TokenKind::Star) => OperatorKind::Mul,
                Some(TokenKind::Slash) => OperatorKind::Div,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            node = Node::Operator { kind, children: vec![node, rhs] };
        }
    }

    fn unary(&mut self) -> Result<Node, ParseError> {
        if self.peek() != Some(&TokenKind::Minus) {
            return self.primary();
        }
        self.pos += 1;

        Ok(match self.unary()? {
            Node::Constant(c) => Node::Constant(-c),
            other => Node::sub(Node::Constant(0.), other),
        })
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(TokenKind::Number(x)) => {
                let x = *x;
                self.pos += 1;
                Ok(Node::Constant(x))
            },
            Some(TokenKind::Ident(_)) => {
                let name = self.ident()?;
                match OperatorKind::from_function_name(&name) {
                    Some(kind) if self.peek() == Some(&TokenKind::LParen) => self.call(kind),
                    _ if name == "e" => Ok(Node::Constant(E)),
                    _ => Ok(Node::Base(self.parser.base_node(&name)?)),
                }
            },
            Some(TokenKind::LParen) => {
                let is_filter = matches!(self.peek_at(1), Some(TokenKind::Ident(_)))
                                && self.peek_at(2) == Some(&TokenKind::Pipe);
                if is_filter {
                    self.filtered()
                } else {
                    self.pos += 1;
                    let node = self.expr()?;
                    self.expect(TokenKind::RParen)?;
                    Ok(node)
                }
            },
            _ => Err(self.unexpected()),
        }
    }

    /// `FUNCTION ( expr, ... )`, with the function name already consumed.
    fn call(&mut self, kind: OperatorKind) -> Result<Node, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut args = vec![self.expr()?];
        while self.peek() == Some(&TokenKind::Comma) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect(TokenKind::RParen)?;

        Node::operator(kind, args)
    }

    /// `( MEASURE | [ COLUMN, ... ] )`.
    fn filtered(&mut self) -> Result<Node, ParseError> {
        if !self.parser.regime.is_supervised() {
            return Err(ParseError::FilterOutsideSupervised);
        }
        self.expect(TokenKind::LParen)?;
        let name = self.ident()?;
        self.expect(TokenKind::Pipe)?;
        self.expect(TokenKind::LBracket)?;

        let mut columns = BTreeSet::new();
        loop {
            let column = self.ident()?;
            if !self.parser.sensitive_columns.contains(&column) {
                return Err(ParseError::UnknownSensitiveAttribute(column));
            }
            columns.insert(column);
            match self.peek() {
                Some(TokenKind::Comma) => self.pos += 1,
                _ => break,
            }
        }
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::RParen)?;

        let base = self.parser.base_node(&name)?;
        Ok(Node::Base(BaseNode::filtered(base.measure, columns)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::measures::SubRegime;

    fn parse(s: &str) -> Result<Node, ParseError> {
        let columns = vec!["M".to_string(), "F".to_string()];
        Parser::new(Regime::SupervisedLearning(SubRegime::Classification), &columns,
                    MeasureRegistry::global())
            .parse(s)
    }

    #[test]
    fn tokens() {
        let tokens = tokenize("abs((PR | [M]) - 1.5e-1)<=0").unwrap()
                                                            .into_iter()
                                                            .map(|t| t.kind)
                                                            .collect::<Vec<_>>();

        assert_eq!(tokens[0], TokenKind::Ident("abs".to_string()));
        assert_eq!(tokens[4], TokenKind::Pipe);
        assert_eq!(tokens[9], TokenKind::Minus);
        assert_eq!(tokens[10], TokenKind::Number(0.15));
        assert_eq!(tokens[12], TokenKind::Le);
        assert_eq!(tokens.len(), 14);
    }

    #[test]
    fn unexpected_char() {
        assert_eq!(tokenize("PR # 2"),
                   Err(ParseError::UnexpectedChar { found: '#', offset: 3 }));
    }

    #[test]
    fn precedence() {
        assert_eq!(parse("PR + 2 * NR - 1").unwrap().to_string(), "((PR + (2 * NR)) - 1)");
        assert_eq!(parse("(PR + 2) * NR").unwrap().to_string(), "((PR + 2) * NR)");
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(parse("FPR <= 0.2").unwrap().to_string(), "(FPR - 0.2)");
        assert_eq!(parse("0.2 >= FPR").unwrap().to_string(), "(FPR - 0.2)");
        assert_eq!(parse("FPR >= 0.2").unwrap().to_string(), "(0.2 - FPR)");
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(parse("max(PR, NR, 0.5) - exp(-1)").unwrap().to_string(),
                   "(max(PR, NR, 0.5) - exp(-1))");
        assert_eq!(parse("e").unwrap(), Node::Constant(E));
        assert_eq!(parse("-PR").unwrap().to_string(), "(0 - PR)");
    }

    #[test]
    fn filters() {
        let node = parse("(TPR | [F, M])").unwrap();

        assert_eq!(node.to_string(), "(TPR | [F,M])");
    }

    #[test]
    fn rejections() {
        assert_eq!(parse("PR <= 0.5 <= 1"), Err(ParseError::MultipleInequalities(2)));
        assert_eq!(parse("PR < 0.5"), Err(ParseError::InvalidComparison("<".to_string())));
        assert_eq!(parse("PR = 0.5"), Err(ParseError::InvalidComparison("=".to_string())));
        assert_eq!(parse("PR ** 2"), Err(ParseError::UnsupportedOperator("**".to_string())));
        assert_eq!(parse("(PR - 0.5"), Err(ParseError::UnbalancedParentheses));
        assert_eq!(parse("PR) - (0.5"), Err(ParseError::UnbalancedParentheses));
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("PR -"), Err(ParseError::UnexpectedEnd));
        assert_eq!(parse("(PR | [R2])"),
                   Err(ParseError::UnknownSensitiveAttribute("R2".to_string())));
        assert!(matches!(parse("Mean_Squared_Error"), Err(ParseError::UnknownMeasure { .. })));
        assert!(matches!(parse("abs(PR, NR)"), Err(ParseError::Arity { found: 2, .. })));
        assert!(matches!(parse("min(PR)"), Err(ParseError::Arity { found: 1, .. })));
        assert!(matches!(parse("PR NR"), Err(ParseError::UnexpectedToken { offset: 3, .. })));
    }

    #[test]
    fn filter_outside_supervised() {
        let parser = Parser::new(Regime::ReinforcementLearning, &[], MeasureRegistry::global());

        assert_eq!(parser.parse("(J_pi_new | [M]) >= 0.5"),
                   Err(ParseError::FilterOutsideSupervised));
        assert!(parser.parse("-0.25 - J_pi_new").is_ok());
    }

    /// Verify that parsing is deterministic.
    #[test]
    fn deterministic() {
        let s = "abs((PR | [M]) - (PR | [F])) - 0.15";

        assert_eq!(parse(s).unwrap(), parse(s).unwrap());
    }
}
