//! Local tuple iterators, one per FLWOR clause kind.
//!
//! Every clause pulls scopes from its upstream and hands out scopes it
//! owns; a scope received from upstream is released as soon as the clause
//! has derived its own scopes from it. `group by` and `order by` are
//! blocking: they drain the upstream into owned [`Tuple`]s on open and
//! rebuild scopes from them on the way out.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use crate::engine::context::{DynamicContext, ScopeId, Tuple};
use crate::engine::expr::BoxedIterator;
use crate::engine::iterator::{ExecutionMode, Lifecycle, RuntimeIterator, TupleIterator};
use crate::engine::runtime::Result;
use crate::item::{Item, Name, Sequence, sequence_ebv};
use crate::types::comparison::{GroupKey, check_sort_column, compare_sort_keys, single_atomic};

pub type BoxedTupleIterator = Box<dyn TupleIterator>;

/// Child of `parent` holding `bindings`. The child is released again if a
/// binding fails.
fn bind_child(
    ctx: &mut DynamicContext,
    parent: ScopeId,
    bindings: Vec<(&Name, Sequence)>,
    position: Option<i64>,
) -> Result<ScopeId> {
    let child = ctx.child_scope(parent)?;
    let mut outcome = Ok(());
    for (name, value) in bindings {
        outcome = ctx.bind(child, name.clone(), value);
        if outcome.is_err() {
            break;
        }
    }
    if let (Ok(()), Some(pos)) = (&outcome, position) {
        outcome = ctx.set_position(child, pos);
    }
    match outcome {
        Ok(()) => Ok(child),
        Err(e) => {
            ctx.release(child);
            Err(e)
        }
    }
}

/// Close the lifecycle and release a parked scope. `false` when the
/// iterator was already closed.
fn end_tuples(lc: &mut Lifecycle<ScopeId>, ctx: &mut DynamicContext) -> bool {
    match lc.end() {
        None => false,
        Some(parked) => {
            if let Some(scope) = parked {
                ctx.release(scope);
            }
            true
        }
    }
}

/// Upstream of a start clause: yields the scope it was opened with, once.
pub struct SeedIterator {
    lc: Lifecycle<ScopeId>,
}

impl Default for SeedIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedIterator {
    pub fn new() -> Self {
        Self {
            lc: Lifecycle::new("SeedTupleIterator"),
        }
    }
}

impl TupleIterator for SeedIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        let seed = ctx.retain(scope).map(|()| Some(scope));
        self.lc.prime(seed);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, _ctx: &mut DynamicContext) -> Result<ScopeId> {
        let out = self.lc.take()?;
        self.lc.prime(Ok(None));
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        end_tuples(&mut self.lc, ctx);
    }
}

pub struct ForIterator {
    var: Name,
    at: Option<Name>,
    allowing_empty: bool,
    expr: BoxedIterator,
    upstream: BoxedTupleIterator,
    current: Option<ScopeId>,
    position: i64,
    lc: Lifecycle<ScopeId>,
}

impl ForIterator {
    pub fn new(
        var: impl Into<Name>,
        at: Option<Name>,
        allowing_empty: bool,
        expr: BoxedIterator,
        upstream: BoxedTupleIterator,
    ) -> Self {
        Self {
            var: var.into(),
            at,
            allowing_empty,
            expr,
            upstream,
            current: None,
            position: 0,
            lc: Lifecycle::new("ForClauseIterator"),
        }
    }

    fn emit(&self, ctx: &mut DynamicContext, up: ScopeId, value: Sequence) -> Result<ScopeId> {
        let child = bind_child(ctx, up, vec![(&self.var, value)], Some(self.position))?;
        if let Some(at) = &self.at {
            let position = ctx.position(child).into_iter().map(Item::Integer).collect();
            if let Err(e) = ctx.bind(child, at.clone(), position) {
                ctx.release(child);
                return Err(e);
            }
        }
        Ok(child)
    }

    fn advance(&mut self, ctx: &mut DynamicContext) -> Result<Option<ScopeId>> {
        loop {
            if let Some(up) = self.current {
                if self.expr.has_next() {
                    let item = self.expr.next(ctx)?;
                    self.position += 1;
                    return self.emit(ctx, up, vec![item]).map(Some);
                }
                self.expr.close(ctx);
                self.current = None;
                let empty = (self.allowing_empty && self.position == 0).then(|| self.emit(ctx, up, Vec::new()));
                ctx.release(up);
                if let Some(tuple) = empty {
                    return tuple.map(Some);
                }
            }
            if !self.upstream.has_next() {
                return Ok(None);
            }
            let up = self.upstream.next(ctx)?;
            self.current = Some(up);
            self.position = 0;
            self.expr.open(ctx, up)?;
        }
    }
}

impl TupleIterator for ForIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.upstream.open(ctx, scope)?;
        let first = self.advance(ctx);
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<ScopeId> {
        let out = self.lc.take()?;
        let following = self.advance(ctx);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if !end_tuples(&mut self.lc, ctx) {
            return;
        }
        if let Some(up) = self.current.take() {
            self.expr.close(ctx);
            ctx.release(up);
        }
        self.upstream.close(ctx);
    }
}

pub struct LetIterator {
    var: Name,
    expr: BoxedIterator,
    upstream: BoxedTupleIterator,
    lc: Lifecycle<ScopeId>,
}

impl LetIterator {
    pub fn new(var: impl Into<Name>, expr: BoxedIterator, upstream: BoxedTupleIterator) -> Self {
        Self {
            var: var.into(),
            expr,
            upstream,
            lc: Lifecycle::new("LetClauseIterator"),
        }
    }

    fn advance(&mut self, ctx: &mut DynamicContext) -> Result<Option<ScopeId>> {
        if !self.upstream.has_next() {
            return Ok(None);
        }
        let up = self.upstream.next(ctx)?;
        let bound = self
            .expr
            .materialize(ctx, up)
            .and_then(|value| bind_child(ctx, up, vec![(&self.var, value)], None));
        ctx.release(up);
        bound.map(Some)
    }
}

impl TupleIterator for LetIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.upstream.open(ctx, scope)?;
        let first = self.advance(ctx);
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<ScopeId> {
        let out = self.lc.take()?;
        let following = self.advance(ctx);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if end_tuples(&mut self.lc, ctx) {
            self.expr.close(ctx);
            self.upstream.close(ctx);
        }
    }
}

pub struct WhereIterator {
    predicate: BoxedIterator,
    upstream: BoxedTupleIterator,
    lc: Lifecycle<ScopeId>,
}

impl WhereIterator {
    pub fn new(predicate: BoxedIterator, upstream: BoxedTupleIterator) -> Self {
        Self {
            predicate,
            upstream,
            lc: Lifecycle::new("WhereClauseIterator"),
        }
    }

    fn advance(&mut self, ctx: &mut DynamicContext) -> Result<Option<ScopeId>> {
        while self.upstream.has_next() {
            let up = self.upstream.next(ctx)?;
            let keep = self
                .predicate
                .materialize(ctx, up)
                .and_then(|value| sequence_ebv(&value));
            match keep {
                Ok(true) => return Ok(Some(up)),
                Ok(false) => ctx.release(up),
                Err(e) => {
                    ctx.release(up);
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}

impl TupleIterator for WhereIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.upstream.open(ctx, scope)?;
        let first = self.advance(ctx);
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<ScopeId> {
        let out = self.lc.take()?;
        let following = self.advance(ctx);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if end_tuples(&mut self.lc, ctx) {
            self.predicate.close(ctx);
            self.upstream.close(ctx);
        }
    }
}

pub struct CountIterator {
    var: Name,
    upstream: BoxedTupleIterator,
    counter: i64,
    lc: Lifecycle<ScopeId>,
}

impl CountIterator {
    pub fn new(var: impl Into<Name>, upstream: BoxedTupleIterator) -> Self {
        Self {
            var: var.into(),
            upstream,
            counter: 0,
            lc: Lifecycle::new("CountClauseIterator"),
        }
    }

    fn advance(&mut self, ctx: &mut DynamicContext) -> Result<Option<ScopeId>> {
        if !self.upstream.has_next() {
            return Ok(None);
        }
        let up = self.upstream.next(ctx)?;
        self.counter += 1;
        let counted = bind_child(ctx, up, vec![(&self.var, vec![Item::Integer(self.counter)])], None);
        ctx.release(up);
        counted.map(Some)
    }
}

impl TupleIterator for CountIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.counter = 0;
        self.upstream.open(ctx, scope)?;
        let first = self.advance(ctx);
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<ScopeId> {
        let out = self.lc.take()?;
        let following = self.advance(ctx);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if end_tuples(&mut self.lc, ctx) {
            self.upstream.close(ctx);
        }
    }
}

/// Re-materializes owned tuples as scopes under the clause's base scope.
struct Replay {
    pending: VecDeque<Tuple>,
}

impl Replay {
    fn next(&mut self, ctx: &mut DynamicContext, base: ScopeId) -> Result<Option<ScopeId>> {
        match self.pending.pop_front() {
            Some(tuple) => ctx.scope_from_tuple(base, &tuple).map(Some),
            None => Ok(None),
        }
    }
}

/// One grouping variable; without a key expression the variable's current
/// binding is the key.
pub struct GroupingKey {
    pub var: Name,
    pub expr: Option<BoxedIterator>,
}

pub struct GroupByIterator {
    keys: Vec<GroupingKey>,
    upstream: BoxedTupleIterator,
    replay: Replay,
    lc: Lifecycle<ScopeId>,
}

type GroupIdentity = SmallVec<[GroupKey; 2]>;

impl GroupByIterator {
    pub fn new(keys: Vec<GroupingKey>, upstream: BoxedTupleIterator) -> Self {
        Self {
            keys,
            upstream,
            replay: Replay {
                pending: VecDeque::new(),
            },
            lc: Lifecycle::new("GroupByClauseIterator"),
        }
    }

    fn key_values(&mut self, ctx: &mut DynamicContext, up: ScopeId) -> Result<Vec<Option<Item>>> {
        let mut values = Vec::with_capacity(self.keys.len());
        for key in &mut self.keys {
            let seq = match &mut key.expr {
                Some(expr) => expr.materialize(ctx, up)?,
                None => ctx.lookup(up, &key.var)?.clone(),
            };
            values.push(single_atomic(seq, "a group by key")?);
        }
        Ok(values)
    }

    fn group(&mut self, ctx: &mut DynamicContext, base: ScopeId) -> Result<VecDeque<Tuple>> {
        let mut index: HashMap<GroupIdentity, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Option<Item>>, Vec<Tuple>)> = Vec::new();
        while self.upstream.has_next() {
            let up = self.upstream.next(ctx)?;
            let row = self
                .key_values(ctx, up)
                .and_then(|keys| Ok((keys, ctx.snapshot(up, base)?)));
            ctx.release(up);
            let (keys, tuple) = row?;
            let identity = keys
                .iter()
                .map(|k| GroupKey::from_key(k.as_ref()))
                .collect::<Result<GroupIdentity>>()?;
            match index.entry(identity) {
                Entry::Occupied(slot) => groups[*slot.get()].1.push(tuple),
                Entry::Vacant(slot) => {
                    slot.insert(groups.len());
                    groups.push((keys, vec![tuple]));
                }
            }
        }
        self.upstream.close(ctx);
        Ok(groups
            .into_iter()
            .map(|(keys, members)| self.merge(keys, members))
            .collect())
    }

    /// Grouping variables take the shared key; every other variable the
    /// concatenation of its per-tuple values in input order.
    fn merge(&self, keys: Vec<Option<Item>>, members: Vec<Tuple>) -> Tuple {
        let mut out = Tuple::new();
        if let Some(first) = members.first() {
            for (name, _) in first.iter() {
                let merged: Sequence = members
                    .iter()
                    .flat_map(|t| t.get(name).cloned().unwrap_or_default())
                    .collect();
                out.bind(name.clone(), merged);
            }
        }
        for (key, value) in self.keys.iter().zip(keys) {
            out.bind(key.var.clone(), value.into_iter().collect());
        }
        out
    }
}

impl TupleIterator for GroupByIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.upstream.open(ctx, scope)?;
        let first = self.group(ctx, scope).and_then(|pending| {
            self.replay.pending = pending;
            self.replay.next(ctx, scope)
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
        let following = self.replay.next(ctx, base);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if end_tuples(&mut self.lc, ctx) {
            self.replay.pending.clear();
            for key in &mut self.keys {
                if let Some(expr) = &mut key.expr {
                    expr.close(ctx);
                }
            }
            self.upstream.close(ctx);
        }
    }
}

pub struct SortKey {
    pub expr: BoxedIterator,
    pub descending: bool,
    pub empty_greatest: bool,
}

pub struct OrderByIterator {
    keys: Vec<SortKey>,
    upstream: BoxedTupleIterator,
    replay: Replay,
    lc: Lifecycle<ScopeId>,
}

impl OrderByIterator {
    pub fn new(keys: Vec<SortKey>, upstream: BoxedTupleIterator) -> Self {
        Self {
            keys,
            upstream,
            replay: Replay {
                pending: VecDeque::new(),
            },
            lc: Lifecycle::new("OrderByClauseIterator"),
        }
    }

    fn key_values(&mut self, ctx: &mut DynamicContext, up: ScopeId) -> Result<Vec<Option<Item>>> {
        let mut values = Vec::with_capacity(self.keys.len());
        for key in &mut self.keys {
            let seq = key.expr.materialize(ctx, up)?;
            values.push(single_atomic(seq, "an order by key")?);
        }
        Ok(values)
    }

    fn sort(&mut self, ctx: &mut DynamicContext, base: ScopeId) -> Result<VecDeque<Tuple>> {
        let mut rows: Vec<(Vec<Option<Item>>, Tuple)> = Vec::new();
        while self.upstream.has_next() {
            let up = self.upstream.next(ctx)?;
            let row = self
                .key_values(ctx, up)
                .and_then(|keys| Ok((keys, ctx.snapshot(up, base)?)));
            ctx.release(up);
            rows.push(row?);
        }
        self.upstream.close(ctx);

        let specs: Vec<(bool, bool)> = self.keys.iter().map(|k| (k.descending, k.empty_greatest)).collect();
        for column in 0..specs.len() {
            check_sort_column(rows.iter().map(|(keys, _)| keys[column].as_ref()))?;
        }
        rows.sort_by(|(a, _), (b, _)| {
            specs
                .iter()
                .enumerate()
                .map(|(i, (descending, empty_greatest))| {
                    let ord = compare_sort_keys(a[i].as_ref(), b[i].as_ref(), *empty_greatest);
                    if *descending { ord.reverse() } else { ord }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(core::cmp::Ordering::Equal)
        });
        Ok(rows.into_iter().map(|(_, tuple)| tuple).collect())
    }
}

impl TupleIterator for OrderByIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.upstream.open(ctx, scope)?;
        let first = self.sort(ctx, scope).and_then(|pending| {
            self.replay.pending = pending;
            self.replay.next(ctx, scope)
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
        let following = self.replay.next(ctx, base);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if end_tuples(&mut self.lc, ctx) {
            self.replay.pending.clear();
            for key in &mut self.keys {
                key.expr.close(ctx);
            }
            self.upstream.close(ctx);
        }
    }
}

/// Terminal clause: evaluates its expression once per tuple and streams the
/// items out.
pub struct ReturnIterator {
    expr: BoxedIterator,
    upstream: BoxedTupleIterator,
    current: Option<ScopeId>,
    lc: Lifecycle<Item>,
}

impl ReturnIterator {
    pub fn new(expr: BoxedIterator, upstream: BoxedTupleIterator) -> Self {
        Self {
            expr,
            upstream,
            current: None,
            lc: Lifecycle::new("ReturnClauseIterator"),
        }
    }

    fn advance(&mut self, ctx: &mut DynamicContext) -> Result<Option<Item>> {
        loop {
            if let Some(up) = self.current {
                if self.expr.has_next() {
                    return self.expr.next(ctx).map(Some);
                }
                self.expr.close(ctx);
                self.current = None;
                ctx.release(up);
            }
            if !self.upstream.has_next() {
                return Ok(None);
            }
            let up = self.upstream.next(ctx)?;
            self.current = Some(up);
            self.expr.open(ctx, up)?;
        }
    }
}

impl RuntimeIterator for ReturnIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.upstream.open(ctx, scope)?;
        let first = self.advance(ctx);
        self.lc.prime(first);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.lc.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<Item> {
        let out = self.lc.take()?;
        let following = self.advance(ctx);
        self.lc.prime(following);
        Ok(out)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        if self.lc.end().is_none() {
            return;
        }
        if let Some(up) = self.current.take() {
            self.expr.close(ctx);
            ctx.release(up);
        }
        self.upstream.close(ctx);
    }
}

/// A FLWOR expression as seen by its parent. Its own mode is unset; callers
/// see the mode of its return clause.
pub struct FlworIterator {
    ret: BoxedIterator,
}

impl FlworIterator {
    pub fn new(ret: BoxedIterator) -> Self {
        Self { ret }
    }
}

impl RuntimeIterator for FlworIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.ret.open(ctx, scope)
    }

    fn has_next(&self) -> bool {
        self.ret.has_next()
    }

    fn next(&mut self, ctx: &mut DynamicContext) -> Result<Item> {
        self.ret.next(ctx)
    }

    fn close(&mut self, ctx: &mut DynamicContext) {
        self.ret.close(ctx);
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Unset
    }

    fn effective_mode(&self) -> ExecutionMode {
        self.ret.execution_mode()
    }
}
