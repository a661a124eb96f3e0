//! Pull-based runtime iterator protocol.
//!
//! Expression iterators yield items, clause iterators yield tuples (scope
//! handles). Both follow the same lifecycle: `open` against a scope, pull
//! with `has_next`/`next` until exhausted, then `close`. Closing releases
//! every upstream iterator and every scope the iterator still holds, whether
//! or not it was drained.

use tracing::trace;

use crate::engine::context::{DynamicContext, ScopeId};
use crate::engine::runtime::{Error, ErrorCode, Result};
use crate::item::{Item, Sequence};

/// Where an iterator's work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// Not decided for this node; see [`RuntimeIterator::effective_mode`].
    #[default]
    Unset,
    Local,
    /// Handed off to the configured substrate.
    Delegated,
}

pub trait RuntimeIterator {
    /// Start producing for the bindings visible from `scope`. Opening an open
    /// iterator is a protocol violation.
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()>;

    fn has_next(&self) -> bool;

    /// Yield exactly one item. Fails with err:ENGN0001 when closed or
    /// exhausted.
    fn next(&mut self, ctx: &mut DynamicContext) -> Result<Item>;

    /// Idempotent.
    fn close(&mut self, ctx: &mut DynamicContext);

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    /// Mode reported to callers. Differs from [`execution_mode`] only for
    /// nodes whose own mode is unset.
    ///
    /// [`execution_mode`]: RuntimeIterator::execution_mode
    fn effective_mode(&self) -> ExecutionMode {
        self.execution_mode()
    }

    /// Open, drain and close.
    fn materialize(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        if let Err(e) = self.open(ctx, scope) {
            self.close(ctx);
            return Err(e);
        }
        let mut out = Vec::new();
        while self.has_next() {
            match self.next(ctx) {
                Ok(item) => out.push(item),
                Err(e) => {
                    self.close(ctx);
                    return Err(e);
                }
            }
        }
        self.close(ctx);
        Ok(out)
    }
}

/// Clause iterator. Every scope handed out by `next` is owned by the caller,
/// which must release it.
pub trait TupleIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()>;

    fn has_next(&self) -> bool;

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<ScopeId>;

    fn close(&mut self, ctx: &mut DynamicContext);

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Producing,
    Exhausted,
}

/// Lifecycle state machine with a single lookahead slot.
///
/// An iterator computes its next output eagerly and parks it here with
/// [`Lifecycle::prime`], which is what makes `has_next` a pure query. Errors
/// are parked like values and surface on the following `next`.
#[derive(Debug)]
pub struct Lifecycle<T> {
    name: &'static str,
    state: State,
    slot: Option<Result<T>>,
    scope: Option<ScopeId>,
}

impl<T> Lifecycle<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: State::Closed,
            slot: None,
            scope: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_open(&self) -> bool {
        self.state != State::Closed
    }

    /// Scope the iterator was opened against.
    pub fn scope(&self) -> Result<ScopeId> {
        self.scope.ok_or_else(|| Error::iterator_flow(self.name))
    }

    /// Transition `Closed -> Producing`.
    pub fn begin(&mut self, scope: ScopeId) -> Result<()> {
        if self.is_open() {
            return Err(Error::from_code(
                ErrorCode::ENGN0001,
                format!("{}: open() called on an iterator that is already open", self.name),
            ));
        }
        trace!(iterator = self.name, "open");
        self.state = State::Producing;
        self.scope = Some(scope);
        self.slot = None;
        Ok(())
    }

    /// Park the outcome of computing the next output. `Ok(None)` means the
    /// iterator is exhausted.
    pub fn prime(&mut self, produced: Result<Option<T>>) {
        if self.state == State::Closed {
            return;
        }
        match produced.transpose() {
            Some(outcome) => {
                self.slot = Some(outcome);
                self.state = State::Producing;
            }
            None => {
                self.slot = None;
                self.state = State::Exhausted;
            }
        }
    }

    pub fn has_next(&self) -> bool {
        self.state == State::Producing && self.slot.is_some()
    }

    /// Hand out the parked output. A parked error ends production.
    pub fn take(&mut self) -> Result<T> {
        match (self.state, self.slot.take()) {
            (State::Producing, Some(Ok(value))) => Ok(value),
            (State::Producing, Some(Err(e))) => {
                self.state = State::Exhausted;
                Err(e)
            }
            _ => Err(Error::iterator_flow(self.name)),
        }
    }

    /// Transition to `Closed`. Returns `None` when already closed, otherwise
    /// the parked output (if any) so the caller can release what it holds.
    pub fn end(&mut self) -> Option<Option<T>> {
        if !self.is_open() {
            return None;
        }
        trace!(iterator = self.name, "close");
        self.state = State::Closed;
        self.scope = None;
        Some(self.slot.take().and_then(|r| r.ok()))
    }
}

/// Computes a whole output sequence when opened and streams it out.
///
/// Used by expressions that must see all of their operands before producing
/// anything (comparisons, constructors, casts).
pub(crate) trait SequenceProducer {
    fn name(&self) -> &'static str;

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence>;

    /// Close any child left open by a failed `produce`.
    fn close_children(&mut self, _ctx: &mut DynamicContext) {}

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }
}

pub(crate) struct Buffered<P> {
    producer: P,
    lc: Lifecycle<Item>,
    buf: std::vec::IntoIter<Item>,
}

impl<P: SequenceProducer> Buffered<P> {
    pub(crate) fn new(producer: P) -> Self {
        let lc = Lifecycle::new(producer.name());
        Self {
            producer,
            lc,
            buf: Vec::new().into_iter(),
        }
    }
}

impl<P: SequenceProducer> RuntimeIterator for Buffered<P> {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        match self.producer.produce(ctx, scope) {
            Ok(seq) => {
                self.buf = seq.into_iter();
                let first = self.buf.next();
                self.lc.prime(Ok(first));
            }
            Err(e) => self.lc.prime(Err(e)),
        }
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
        if self.lc.end().is_none() {
            return;
        }
        self.producer.close_children(ctx);
        self.buf = Vec::new().into_iter();
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.producer.execution_mode()
    }
}
