//! AST to iterator-tree compilation.
//!
//! [`check`] runs the static scope check over the whole tree first; [`build`]
//! then wires one iterator per node, consulting the execution-mode resolver
//! for every FLWOR expression it meets.

use std::sync::Arc;

use crate::engine::expr::{
    Arithmetic, ArrayConstructor, ArrayUnbox, BoxedIterator, Cast, Castable, Comparison, ConcatIterator, Literal,
    Logic, Not, ObjectConstructor, ObjectLookup, Parallelize, VarRef, buffered,
};
use crate::engine::iterator::ExecutionMode;
use crate::engine::runtime::{EmptyOrder, EngineConfig, Error, ErrorCode, Result};
use crate::flwor::ast::{Clause, Expr, FlworExpr};
use crate::flwor::clauses::{
    BoxedTupleIterator, CountIterator, FlworIterator, ForIterator, GroupByIterator, GroupingKey, LetIterator,
    OrderByIterator, ReturnIterator, SeedIterator, SortKey, WhereIterator,
};
use crate::flwor::delegated::{DelegatedPlan, DelegatedReturnIterator, DelegatedTupleIterator};
use crate::flwor::resolver;
use crate::item::Name;

/// Static scope check. `in_scope` holds the variables visible at `expr`;
/// it is restored before returning.
pub(crate) fn check(expr: &Expr, in_scope: &mut Vec<Name>) -> Result<()> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::VarRef(name) => {
            if in_scope.iter().any(|v| v == name) {
                Ok(())
            } else {
                Err(Error::from_code(
                    ErrorCode::XPST0008,
                    format!("Uninitialized variable reference: ${name}"),
                ))
            }
        }
        Expr::Sequence(items) => items.iter().try_for_each(|e| check(e, in_scope)),
        Expr::Comparison { lhs, rhs, .. } | Expr::Arithmetic { lhs, rhs, .. } | Expr::Logic { lhs, rhs, .. } => {
            check(lhs, in_scope)?;
            check(rhs, in_scope)
        }
        Expr::Not(e)
        | Expr::Cast { expr: e, .. }
        | Expr::Castable { expr: e, .. }
        | Expr::ArrayUnbox(e)
        | Expr::ObjectLookup { expr: e, .. }
        | Expr::Parallelize { expr: e, .. } => check(e, in_scope),
        Expr::ArrayConstructor(content) => content.as_deref().map_or(Ok(()), |e| check(e, in_scope)),
        Expr::ObjectConstructor(entries) => entries.iter().try_for_each(|(_, e)| check(e, in_scope)),
        Expr::Flwor(flwor) => {
            let mark = in_scope.len();
            let outcome = check_flwor(flwor, in_scope);
            in_scope.truncate(mark);
            outcome
        }
    }
}

fn check_flwor(flwor: &FlworExpr, in_scope: &mut Vec<Name>) -> Result<()> {
    for clause in flwor.body() {
        match clause {
            Clause::For { var, at, expr, .. } => {
                check(expr, in_scope)?;
                in_scope.push(var.clone());
                in_scope.extend(at.iter().cloned());
            }
            Clause::Let { var, expr } => {
                check(expr, in_scope)?;
                in_scope.push(var.clone());
            }
            Clause::Where(expr) => check(expr, in_scope)?,
            Clause::GroupBy(specs) => {
                for spec in specs {
                    match &spec.expr {
                        Some(key) if key.is_constructor() => {
                            return Err(Error::semantic(format!(
                                "group by key for ${} can not be an object or array constructor",
                                spec.var
                            )));
                        }
                        Some(key) => {
                            check(key, in_scope)?;
                            in_scope.push(spec.var.clone());
                        }
                        None if in_scope.contains(&spec.var) => {}
                        None => {
                            return Err(Error::semantic(format!(
                                "group by variable ${} is not declared by an earlier clause",
                                spec.var
                            )));
                        }
                    }
                }
            }
            Clause::OrderBy(specs) => {
                for spec in specs {
                    if spec.expr.is_constructor() {
                        return Err(Error::semantic("order by key can not be an object or array constructor"));
                    }
                    check(&spec.expr, in_scope)?;
                }
            }
            Clause::Count(var) => in_scope.push(var.clone()),
            Clause::Return(_) => return Err(Error::semantic("return must be the last clause of a FLWOR expression")),
        }
    }
    check(flwor.return_expr(), in_scope)
}

fn build_all(exprs: &[Expr], config: &EngineConfig) -> Result<Vec<BoxedIterator>> {
    exprs.iter().map(|e| build(e, config)).collect()
}

pub(crate) fn build(expr: &Expr, config: &EngineConfig) -> Result<BoxedIterator> {
    Ok(match expr {
        Expr::Literal(item) => buffered(Literal(vec![item.clone()])),
        Expr::Sequence(items) => Box::new(ConcatIterator::new(build_all(items, config)?)),
        Expr::VarRef(name) => buffered(VarRef(name.clone())),
        Expr::Comparison { kind, op, lhs, rhs } => buffered(Comparison {
            kind: *kind,
            op: *op,
            lhs: build(lhs, config)?,
            rhs: build(rhs, config)?,
        }),
        Expr::Arithmetic { op, lhs, rhs } => buffered(Arithmetic {
            op: *op,
            lhs: build(lhs, config)?,
            rhs: build(rhs, config)?,
        }),
        Expr::Logic { op, lhs, rhs } => buffered(Logic {
            op: *op,
            lhs: build(lhs, config)?,
            rhs: build(rhs, config)?,
        }),
        Expr::Not(e) => buffered(Not(build(e, config)?)),
        Expr::Cast { expr, target } => buffered(Cast {
            child: build(expr, config)?,
            target: *target,
        }),
        Expr::Castable { expr, target } => buffered(Castable {
            child: build(expr, config)?,
            target: *target,
        }),
        Expr::ArrayConstructor(content) => buffered(ArrayConstructor(
            content.as_deref().map(|e| build(e, config)).transpose()?,
        )),
        Expr::ObjectConstructor(entries) => buffered(ObjectConstructor(
            entries
                .iter()
                .map(|(key, e)| Ok((key.clone(), build(e, config)?)))
                .collect::<Result<_>>()?,
        )),
        Expr::ArrayUnbox(e) => buffered(ArrayUnbox(build(e, config)?)),
        Expr::ObjectLookup { expr, key } => buffered(ObjectLookup {
            child: build(expr, config)?,
            key: key.clone(),
        }),
        Expr::Flwor(flwor) => build_flwor(flwor, config)?,
        Expr::Parallelize { expr, partitions } => buffered(Parallelize {
            child: build(expr, config)?,
            partitions: partitions.unwrap_or(config.default_partitions).max(1),
            config: config.clone(),
        }),
    })
}

fn build_flwor(flwor: &FlworExpr, config: &EngineConfig) -> Result<BoxedIterator> {
    let resolution = resolver::resolve(flwor, config);
    let body = flwor.body();
    let prefix = resolution.delegated_prefix;

    if resolution.return_mode == ExecutionMode::Delegated {
        let plan = DelegatedPlan::new(body, config)?;
        let ret = DelegatedReturnIterator::new(plan, Arc::new(flwor.return_expr().clone()));
        return Ok(Box::new(FlworIterator::new(Box::new(ret))));
    }

    let mut upstream: BoxedTupleIterator = if prefix > 0 {
        Box::new(DelegatedTupleIterator::new(DelegatedPlan::new(&body[..prefix], config)?))
    } else {
        Box::new(SeedIterator::new())
    };
    for clause in &body[prefix..] {
        upstream = build_clause(clause, upstream, config)?;
    }
    let ret = ReturnIterator::new(build(flwor.return_expr(), config)?, upstream);
    Ok(Box::new(FlworIterator::new(Box::new(ret))))
}

fn build_clause(clause: &Clause, upstream: BoxedTupleIterator, config: &EngineConfig) -> Result<BoxedTupleIterator> {
    Ok(match clause {
        Clause::For {
            var,
            at,
            allowing_empty,
            expr,
        } => Box::new(ForIterator::new(
            var.clone(),
            at.clone(),
            *allowing_empty,
            build(expr, config)?,
            upstream,
        )),
        Clause::Let { var, expr } => Box::new(LetIterator::new(var.clone(), build(expr, config)?, upstream)),
        Clause::Where(expr) => Box::new(WhereIterator::new(build(expr, config)?, upstream)),
        Clause::GroupBy(specs) => {
            let keys = specs
                .iter()
                .map(|spec| {
                    Ok(GroupingKey {
                        var: spec.var.clone(),
                        expr: spec.expr.as_ref().map(|e| build(e, config)).transpose()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Box::new(GroupByIterator::new(keys, upstream))
        }
        Clause::OrderBy(specs) => {
            let keys = specs
                .iter()
                .map(|spec| {
                    Ok(SortKey {
                        expr: build(&spec.expr, config)?,
                        descending: spec.descending,
                        empty_greatest: spec.empty_order.unwrap_or(config.empty_order) == EmptyOrder::Greatest,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Box::new(OrderByIterator::new(keys, upstream))
        }
        Clause::Count(var) => Box::new(CountIterator::new(var.clone(), upstream)),
        Clause::Return(_) => return Err(Error::semantic("return must be the last clause of a FLWOR expression")),
    })
}
