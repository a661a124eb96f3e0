//! Typed expression tree consumed by the compiler.
//!
//! There is no surface syntax here: a parser (or a test) builds these nodes
//! directly. A [`FlworExpr`] validates its clause chain on construction and
//! is immutable afterwards.

use crate::engine::runtime::{EmptyOrder, Error, Result};
use crate::item::{Item, Name};
use crate::types::SingleType;
use crate::types::arithmetic::ArithmeticOp;
use crate::types::comparison::{ComparisonKind, ComparisonOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Item),
    /// Comma operator: concatenation of the operands' sequences.
    Sequence(Vec<Expr>),
    VarRef(Name),
    Comparison {
        kind: ComparisonKind,
        op: ComparisonOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Cast {
        expr: Box<Expr>,
        target: SingleType,
    },
    Castable {
        expr: Box<Expr>,
        target: SingleType,
    },
    /// `[ expr ]`; `None` builds the empty array.
    ArrayConstructor(Option<Box<Expr>>),
    /// `{ "k" : expr, ... }`
    ObjectConstructor(Vec<(Name, Expr)>),
    /// `expr[]`
    ArrayUnbox(Box<Expr>),
    /// `expr.key`
    ObjectLookup {
        expr: Box<Expr>,
        key: Name,
    },
    Flwor(Box<FlworExpr>),
    /// Source whose items live in the distributed substrate.
    Parallelize {
        expr: Box<Expr>,
        partitions: Option<usize>,
    },
}

impl Expr {
    pub fn literal(item: impl Into<Item>) -> Self {
        Expr::Literal(item.into())
    }

    pub fn integer(i: i64) -> Self {
        Expr::Literal(Item::Integer(i))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Literal(Item::String(s.into()))
    }

    pub fn empty() -> Self {
        Expr::Sequence(Vec::new())
    }

    pub fn sequence(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Sequence(items.into_iter().collect())
    }

    /// `(1, 2, ..., n)` from a range of integers.
    pub fn integers(range: impl IntoIterator<Item = i64>) -> Self {
        Expr::Sequence(range.into_iter().map(Expr::integer).collect())
    }

    pub fn var(name: impl Into<Name>) -> Self {
        Expr::VarRef(name.into())
    }

    pub fn value_cmp(op: ComparisonOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Comparison {
            kind: ComparisonKind::Value,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn general_cmp(op: ComparisonOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Comparison {
            kind: ComparisonKind::General,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn arithmetic(op: ArithmeticOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Arithmetic {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::Logic {
            op: LogicOp::And,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::Logic {
            op: LogicOp::Or,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn cast(expr: Expr, target: SingleType) -> Self {
        Expr::Cast {
            expr: Box::new(expr),
            target,
        }
    }

    pub fn castable(expr: Expr, target: SingleType) -> Self {
        Expr::Castable {
            expr: Box::new(expr),
            target,
        }
    }

    pub fn array(content: Expr) -> Self {
        Expr::ArrayConstructor(Some(Box::new(content)))
    }

    pub fn object<K: Into<Name>>(entries: impl IntoIterator<Item = (K, Expr)>) -> Self {
        Expr::ObjectConstructor(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn unbox(expr: Expr) -> Self {
        Expr::ArrayUnbox(Box::new(expr))
    }

    pub fn lookup(expr: Expr, key: impl Into<Name>) -> Self {
        Expr::ObjectLookup {
            expr: Box::new(expr),
            key: key.into(),
        }
    }

    pub fn flwor(flwor: FlworExpr) -> Self {
        Expr::Flwor(Box::new(flwor))
    }

    pub fn parallelize(expr: Expr, partitions: Option<usize>) -> Self {
        Expr::Parallelize {
            expr: Box::new(expr),
            partitions,
        }
    }

    /// Whether this node builds an object or array.
    pub fn is_constructor(&self) -> bool {
        matches!(self, Expr::ArrayConstructor(_) | Expr::ObjectConstructor(_))
    }
}

/// One `group by` grouping variable, optionally with its key expression.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub var: Name,
    pub expr: Option<Expr>,
}

impl GroupSpec {
    /// `group by $var`: group on an already bound variable.
    pub fn var(var: impl Into<Name>) -> Self {
        Self {
            var: var.into(),
            expr: None,
        }
    }

    /// `group by $var := expr`
    pub fn keyed(var: impl Into<Name>, expr: Expr) -> Self {
        Self {
            var: var.into(),
            expr: Some(expr),
        }
    }
}

/// One `order by` key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub expr: Expr,
    pub descending: bool,
    /// `None` falls back to the engine default.
    pub empty_order: Option<EmptyOrder>,
}

impl OrderSpec {
    pub fn ascending(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
            empty_order: None,
        }
    }

    pub fn descending(expr: Expr) -> Self {
        Self {
            expr,
            descending: true,
            empty_order: None,
        }
    }

    pub fn empty(mut self, order: EmptyOrder) -> Self {
        self.empty_order = Some(order);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For {
        var: Name,
        at: Option<Name>,
        allowing_empty: bool,
        expr: Expr,
    },
    Let {
        var: Name,
        expr: Expr,
    },
    Where(Expr),
    GroupBy(Vec<GroupSpec>),
    OrderBy(Vec<OrderSpec>),
    Count(Name),
    Return(Expr),
}

impl Clause {
    pub fn for_in(var: impl Into<Name>, expr: Expr) -> Self {
        Clause::For {
            var: var.into(),
            at: None,
            allowing_empty: false,
            expr,
        }
    }

    /// `for $var at $at in expr`
    pub fn for_at(var: impl Into<Name>, at: impl Into<Name>, expr: Expr) -> Self {
        Clause::For {
            var: var.into(),
            at: Some(at.into()),
            allowing_empty: false,
            expr,
        }
    }

    /// `for $var allowing empty in expr`
    pub fn for_allowing_empty(var: impl Into<Name>, expr: Expr) -> Self {
        Clause::For {
            var: var.into(),
            at: None,
            allowing_empty: true,
            expr,
        }
    }

    pub fn let_bind(var: impl Into<Name>, expr: Expr) -> Self {
        Clause::Let {
            var: var.into(),
            expr,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Clause::For { .. } => "for",
            Clause::Let { .. } => "let",
            Clause::Where(_) => "where",
            Clause::GroupBy(_) => "group by",
            Clause::OrderBy(_) => "order by",
            Clause::Count(_) => "count",
            Clause::Return(_) => "return",
        }
    }
}

/// A validated clause chain: a `for` or `let` first, exactly one `return`,
/// and that `return` last.
#[derive(Debug, Clone, PartialEq)]
pub struct FlworExpr {
    body: Vec<Clause>,
    ret: Expr,
}

impl FlworExpr {
    pub fn new(mut clauses: Vec<Clause>) -> Result<Self> {
        match clauses.first() {
            None => return Err(Error::semantic("FLWOR expression has no clauses")),
            Some(Clause::For { .. } | Clause::Let { .. }) => {}
            Some(other) => {
                return Err(Error::semantic(format!(
                    "FLWOR clause must start with a for or a let, found {}",
                    other.keyword()
                )));
            }
        }
        let ret = match clauses.pop() {
            Some(Clause::Return(expr)) => expr,
            _ if clauses.iter().any(|c| matches!(c, Clause::Return(_))) => {
                return Err(Error::semantic("return must be the last clause of a FLWOR expression"));
            }
            _ => return Err(Error::semantic("FLWOR expression has no return clause")),
        };
        if clauses.iter().any(|c| matches!(c, Clause::Return(_))) {
            return Err(Error::semantic("FLWOR expression has more than one return clause"));
        }
        Ok(Self { body: clauses, ret })
    }

    /// Every clause but the terminal `return`; never empty.
    pub fn body(&self) -> &[Clause] {
        &self.body
    }

    pub fn return_expr(&self) -> &Expr {
        &self.ret
    }
}
