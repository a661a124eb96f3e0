//! Front door: compile an expression once, evaluate it against any number of
//! dynamic contexts.

use std::sync::Arc;

use tracing::debug;

use crate::compiler;
use crate::engine::context::DynamicContext;
use crate::engine::expr::BoxedIterator;
use crate::engine::iterator::ExecutionMode;
use crate::engine::runtime::{EngineConfig, Result};
use crate::flwor::ast::Expr;
use crate::flwor::resolver;
use crate::item::{Item, Sequence};

/// A statically checked expression together with the configuration its
/// execution modes were resolved against.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    expr: Arc<Expr>,
    config: EngineConfig,
    mode: ExecutionMode,
}

impl CompiledQuery {
    /// Mode reported by the root iterator.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn instantiate(&self) -> Result<BoxedIterator> {
        compiler::build(&self.expr, &self.config)
    }
}

pub fn compile(expr: &Expr, config: &EngineConfig) -> Result<CompiledQuery> {
    let mut in_scope = config.external_variables.clone();
    compiler::check(expr, &mut in_scope)?;
    let mode = resolver::expr_mode(expr, config);
    debug!(?mode, delegation = config.delegation, "compiled query");
    Ok(CompiledQuery {
        expr: Arc::new(expr.clone()),
        config: config.clone(),
        mode,
    })
}

/// Evaluate to a fully materialized sequence. `ctx` is not modified.
pub fn evaluate(query: &CompiledQuery, ctx: &DynamicContext) -> Result<Sequence> {
    let mut ctx = ctx.clone();
    let root = ctx.root();
    let mut iter = query.instantiate()?;
    iter.materialize(&mut ctx, root)
}

/// Evaluate lazily. Items are pulled on demand; dropping the stream closes
/// the iterator tree.
pub fn evaluate_stream(query: &CompiledQuery, ctx: &DynamicContext) -> Result<ResultStream> {
    let mut ctx = ctx.clone();
    let root = ctx.root();
    let mut iter = query.instantiate()?;
    if let Err(e) = iter.open(&mut ctx, root) {
        iter.close(&mut ctx);
        return Err(e);
    }
    Ok(ResultStream {
        ctx,
        iter,
        done: false,
    })
}

pub struct ResultStream {
    ctx: DynamicContext,
    iter: BoxedIterator,
    done: bool,
}

impl ResultStream {
    /// Stop early. Idempotent; also done on drop.
    pub fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.iter.close(&mut self.ctx);
        }
    }

    /// Frames still allocated in the stream's private context; the root
    /// frame alone once the stream is closed.
    pub fn live_scopes(&self) -> usize {
        self.ctx.live_scopes()
    }
}

impl Iterator for ResultStream {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.iter.has_next() {
            self.close();
            return None;
        }
        let out = self.iter.next(&mut self.ctx);
        if out.is_err() {
            self.close();
        }
        Some(out)
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.close();
    }
}
