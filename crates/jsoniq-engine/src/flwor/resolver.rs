//! Execution-mode resolution over a FLWOR clause chain.
//!
//! Modes are decided bottom-up, once, at compile time:
//!
//! * a start `for` is delegated when its source is delegated (and delegation
//!   is enabled); a start `let` is local;
//! * `let`, `where` and `return` inherit a delegated upstream (they are
//!   per-tuple maps and filters);
//! * any later `for`, `group by`, `order by` and `count` is local, and the
//!   delegated collection feeding it is collected into an ordered local
//!   stream at that boundary.

use tracing::debug;

use crate::engine::iterator::ExecutionMode;
use crate::engine::runtime::EngineConfig;
use crate::flwor::ast::{Clause, Expr, FlworExpr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// One mode per clause before the return clause.
    pub clause_modes: Vec<ExecutionMode>,
    pub return_mode: ExecutionMode,
    /// Length of the leading run of delegated clauses.
    pub delegated_prefix: usize,
}

/// Mode an expression's iterator reports.
pub fn expr_mode(expr: &Expr, config: &EngineConfig) -> ExecutionMode {
    match expr {
        Expr::Parallelize { .. } if config.delegation => ExecutionMode::Delegated,
        Expr::Flwor(flwor) => resolve(flwor, config).return_mode,
        _ => ExecutionMode::Local,
    }
}

pub fn resolve(flwor: &FlworExpr, config: &EngineConfig) -> Resolution {
    let mut clause_modes = Vec::with_capacity(flwor.body().len());
    let mut upstream = ExecutionMode::Unset;
    for (i, clause) in flwor.body().iter().enumerate() {
        let mode = match clause {
            Clause::For { expr, .. } if i == 0 => expr_mode(expr, config),
            Clause::Let { .. } | Clause::Where(_) if upstream == ExecutionMode::Delegated => ExecutionMode::Delegated,
            _ => {
                if upstream == ExecutionMode::Delegated {
                    debug!(clause = clause.keyword(), position = i, "delegated collection materialized locally");
                }
                ExecutionMode::Local
            }
        };
        clause_modes.push(mode);
        upstream = mode;
    }
    let return_mode = if upstream == ExecutionMode::Delegated {
        ExecutionMode::Delegated
    } else {
        ExecutionMode::Local
    };
    let delegated_prefix = clause_modes
        .iter()
        .take_while(|m| **m == ExecutionMode::Delegated)
        .count();
    debug!(?clause_modes, ?return_mode, delegated_prefix, "resolved FLWOR execution modes");
    Resolution {
        clause_modes,
        return_mode,
        delegated_prefix,
    }
}
