//! Delegated FLWOR prefix: a start `for` followed by `let`/`where` clauses
//! (and possibly the `return`) executed on the configured [`Substrate`].
//!
//! Each work unit is self-contained. It owns its tuple, shares the clause
//! expression through an `Arc`, builds a private [`DynamicContext`] and
//! iterator tree, and evaluates with delegation turned off, so nothing
//! mutable is shared between workers.
//!
//! [`Substrate`]: crate::engine::substrate::Substrate

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::compiler;
use crate::engine::context::{DynamicContext, ScopeId, Tuple};
use crate::engine::expr::BoxedIterator;
use crate::engine::iterator::{ExecutionMode, Lifecycle, RuntimeIterator, TupleIterator};
use crate::engine::runtime::{EngineConfig, Error, Result};
use crate::engine::substrate::{TupleFn, TuplePredicate};
use crate::flwor::ast::{Clause, Expr};
use crate::item::{Item, Name, Sequence, sequence_ebv};

/// Binding that carries a delegated return clause's output.
const RESULT_BINDING: &str = "#result";

enum Stage {
    Let { var: Name, expr: Arc<Expr> },
    Where(Arc<Expr>),
}

pub struct DelegatedPlan {
    var: Name,
    at: Option<Name>,
    allowing_empty: bool,
    source: BoxedIterator,
    partitions: usize,
    stages: Vec<Stage>,
    config: EngineConfig,
}

impl DelegatedPlan {
    /// Plan for `clauses`, which must start with the delegated `for` and
    /// continue with `let`/`where` clauses only.
    pub(crate) fn new(clauses: &[Clause], config: &EngineConfig) -> Result<Self> {
        let Some((Clause::For { var, at, allowing_empty, expr }, rest)) = clauses.split_first() else {
            return Err(Error::semantic("a delegated FLWOR prefix must start with a for clause"));
        };
        let (source, partitions) = match expr {
            Expr::Parallelize { expr, partitions } => (
                compiler::build(expr, config)?,
                partitions.unwrap_or(config.default_partitions),
            ),
            other => (compiler::build(other, config)?, config.default_partitions),
        };
        let stages = rest
            .iter()
            .map(|clause| match clause {
                Clause::Let { var, expr } => Ok(Stage::Let {
                    var: var.clone(),
                    expr: Arc::new(expr.clone()),
                }),
                Clause::Where(expr) => Ok(Stage::Where(Arc::new(expr.clone()))),
                other => Err(Error::semantic(format!(
                    "{} clause can not run in a delegated FLWOR prefix",
                    other.keyword()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            var: var.clone(),
            at: at.clone(),
            allowing_empty: *allowing_empty,
            source,
            partitions: partitions.max(1),
            stages,
            config: config.clone(),
        })
    }

    fn source_tuple(&self, value: Sequence, position: i64) -> Tuple {
        let mut tuple = Tuple::new().with(self.var.clone(), value);
        if let Some(at) = &self.at {
            tuple.bind(at.clone(), vec![Item::Integer(position)]);
        }
        tuple
    }

    /// Evaluate the source locally, number it, ship it, run every stage and
    /// bring the tuples back in order.
    fn run(&mut self, ctx: &mut DynamicContext, scope: ScopeId, ret: Option<&Arc<Expr>>) -> Result<Vec<Tuple>> {
        let items = self.source.materialize(ctx, scope)?;
        let env = Arc::new(ctx.environment(scope)?);
        // positions are fixed before the items are spread over partitions
        let mut tuples: Vec<Tuple> = items
            .into_iter()
            .zip(1..)
            .map(|(item, position)| self.source_tuple(vec![item], position))
            .collect();
        if tuples.is_empty() && self.allowing_empty {
            tuples.push(self.source_tuple(Vec::new(), 0));
        }

        let substrate = Arc::clone(&self.config.substrate);
        let unit_config = self.config.local_only();
        debug!(
            substrate = substrate.name(),
            tuples = tuples.len(),
            partitions = self.partitions,
            stages = self.stages.len(),
            delegated_return = ret.is_some(),
            "handing FLWOR prefix to substrate"
        );
        let mut data = substrate.distribute(tuples, self.partitions)?;
        for stage in &self.stages {
            data = match stage {
                Stage::Let { var, expr } => substrate.map(
                    data,
                    let_unit(var.clone(), Arc::clone(expr), Arc::clone(&env), unit_config.clone()),
                )?,
                Stage::Where(expr) => substrate.filter(
                    data,
                    where_unit(Arc::clone(expr), Arc::clone(&env), unit_config.clone()),
                )?,
            };
        }
        if let Some(ret) = ret {
            data = substrate.map(data, return_unit(Arc::clone(ret), env, unit_config))?;
        }
        substrate.collect(data)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        self.source.close(ctx);
    }
}

/// Evaluate `expr` for one tuple in a private context.
fn evaluate_unit(env: &Tuple, tuple: &Tuple, expr: &Expr, config: &EngineConfig) -> Result<Sequence> {
    let mut ctx = DynamicContext::new();
    let root = ctx.root();
    let outer = ctx.scope_from_tuple(root, env)?;
    let scope = ctx.scope_from_tuple(outer, tuple)?;
    let mut iter = compiler::build(expr, config)?;
    iter.materialize(&mut ctx, scope)
}

fn let_unit(var: Name, expr: Arc<Expr>, env: Arc<Tuple>, config: EngineConfig) -> TupleFn {
    Arc::new(move |mut tuple: Tuple| {
        let value = evaluate_unit(&env, &tuple, &expr, &config)?;
        tuple.bind(var.clone(), value);
        Ok(tuple)
    })
}

fn where_unit(expr: Arc<Expr>, env: Arc<Tuple>, config: EngineConfig) -> TuplePredicate {
    Arc::new(move |tuple: &Tuple| sequence_ebv(&evaluate_unit(&env, tuple, &expr, &config)?))
}

fn return_unit(expr: Arc<Expr>, env: Arc<Tuple>, config: EngineConfig) -> TupleFn {
    Arc::new(move |tuple: Tuple| {
        let value = evaluate_unit(&env, &tuple, &expr, &config)?;
        Ok(Tuple::new().with(RESULT_BINDING, value))
    })
}

/// Delegated prefix consumed by a local clause: the collected tuples are
/// replayed as scopes under the base scope.
pub struct DelegatedTupleIterator {
    plan: DelegatedPlan,
    pending: VecDeque<Tuple>,
    lc: Lifecycle<ScopeId>,
}

impl DelegatedTupleIterator {
    pub fn new(plan: DelegatedPlan) -> Self {
        Self {
            plan,
            pending: VecDeque::new(),
            lc: Lifecycle::new("DelegatedClauseIterator"),
        }
    }

    fn advance(&mut self, ctx: &mut DynamicContext, base: ScopeId) -> Result<Option<ScopeId>> {
        match self.pending.pop_front() {
            Some(tuple) => ctx.scope_from_tuple(base, &tuple).map(Some),
            None => Ok(None),
        }
    }
}

impl TupleIterator for DelegatedTupleIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        let first = self.plan.run(ctx, scope, None).and_then(|tuples| {
            self.pending = tuples.into();
            self.advance(ctx, scope)
        });
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<ScopeId> {
        let base = self.lc.scope()?;
        let out = self.lc.take()?;
        let following = self.advance(ctx, base);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if let Some(parked) = self.lc.end() {
            if let Some(scope) = parked {
                ctx.release(scope);
            }
            self.pending.clear();
            self.plan.close(ctx);
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Delegated
    }
}

/// A FLWOR whose return clause is delegated too: the whole pipeline runs on
/// the substrate and only the output items come back.
pub struct DelegatedReturnIterator {
    plan: DelegatedPlan,
    ret: Arc<Expr>,
    buf: std::vec::IntoIter<Item>,
    lc: Lifecycle<Item>,
}

impl DelegatedReturnIterator {
    pub fn new(plan: DelegatedPlan, ret: Arc<Expr>) -> Self {
        Self {
            plan,
            ret,
            buf: Vec::new().into_iter(),
            lc: Lifecycle::new("DelegatedReturnClauseIterator"),
        }
    }
}

impl RuntimeIterator for DelegatedReturnIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        let first = self.plan.run(ctx, scope, Some(&self.ret)).map(|tuples| {
            self.buf = tuples
                .into_iter()
                .flat_map(|mut t| t.remove(RESULT_BINDING).unwrap_or_default())
                .collect::<Vec<_>>()
                .into_iter();
            self.buf.next()
        });
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, _ctx: &mut DynamicContext) -> Result<Item> {
        let out = self.lc.take()?;
        let following = self.buf.next();
        self.lc.prime(Ok(following));
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if self.lc.end().is_some() {
            self.buf = Vec::new().into_iter();
            self.plan.close(ctx);
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Delegated
    }
}
