//! Runtime iterators for non-FLWOR expressions.

use tracing::debug;

use crate::engine::context::{DynamicContext, ScopeId, Tuple};
use crate::engine::iterator::{Buffered, ExecutionMode, Lifecycle, RuntimeIterator, SequenceProducer};
use crate::engine::runtime::{EngineConfig, Error, Result};
use crate::flwor::ast::LogicOp;
use crate::item::{Item, Name, Sequence, sequence_ebv};
use crate::types::SingleType;
use crate::types::arithmetic::{ArithmeticOp, arithmetic};
use crate::types::casting::{cast_as, castable_as, invalid_target_error};
use crate::types::comparison::{ComparisonKind, ComparisonOp, compare_sequences};
use crate::types::AtomicType;

pub type BoxedIterator = Box<dyn RuntimeIterator>;

pub(crate) struct Literal(pub(crate) Sequence);

impl SequenceProducer for Literal {
    fn name(&self) -> &'static str {
        "LiteralIterator"
    }

    fn produce(&mut self, _ctx: &mut DynamicContext, _scope: ScopeId) -> Result<Sequence> {
        Ok(self.0.clone())
    }
}

pub(crate) struct VarRef(pub(crate) Name);

impl SequenceProducer for VarRef {
    fn name(&self) -> &'static str {
        "VariableReferenceIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        ctx.lookup(scope, &self.0).cloned()
    }
}

/// Comma operator. Streams each operand in turn without buffering.
pub struct ConcatIterator {
    children: Vec<BoxedIterator>,
    current: usize,
    lc: Lifecycle<Item>,
}

impl ConcatIterator {
    pub fn new(children: Vec<BoxedIterator>) -> Self {
        Self {
            children,
            current: 0,
            lc: Lifecycle::new("CommaExpressionIterator"),
        }
    }

    fn advance(&mut self, ctx: &mut DynamicContext) -> Result<Option<Item>> {
        let scope = self.lc.scope()?;
        while let Some(child) = self.children.get_mut(self.current) {
            if child.has_next() {
                return child.next(ctx).map(Some);
            }
            child.close(ctx);
            self.current += 1;
            if let Some(following) = self.children.get_mut(self.current) {
                following.open(ctx, scope)?;
            }
        }
        Ok(None)
    }
}

impl RuntimeIterator for ConcatIterator {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<()> {
        self.lc.begin(scope)?;
        self.current = 0;
        if let Some(first) = self.children.first_mut() {
            first.open(ctx, scope)?;
        }
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
        for child in &mut self.children {
            child.close(ctx);
        }
    }
}

pub(crate) struct Comparison {
    pub(crate) kind: ComparisonKind,
    pub(crate) op: ComparisonOp,
    pub(crate) lhs: BoxedIterator,
    pub(crate) rhs: BoxedIterator,
}

impl SequenceProducer for Comparison {
    fn name(&self) -> &'static str {
        "ComparisonOperationIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let lhs = self.lhs.materialize(ctx, scope)?;
        let rhs = self.rhs.materialize(ctx, scope)?;
        compare_sequences(lhs, rhs, self.op, self.kind)
    }
}

pub(crate) struct Arithmetic {
    pub(crate) op: ArithmeticOp,
    pub(crate) lhs: BoxedIterator,
    pub(crate) rhs: BoxedIterator,
}

impl SequenceProducer for Arithmetic {
    fn name(&self) -> &'static str {
        "AdditiveOperationIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let lhs = self.lhs.materialize(ctx, scope)?;
        let rhs = self.rhs.materialize(ctx, scope)?;
        arithmetic(lhs, rhs, self.op)
    }
}

/// `and` / `or` over effective boolean values; the right operand is only
/// evaluated when it can change the outcome.
pub(crate) struct Logic {
    pub(crate) op: LogicOp,
    pub(crate) lhs: BoxedIterator,
    pub(crate) rhs: BoxedIterator,
}

impl SequenceProducer for Logic {
    fn name(&self) -> &'static str {
        match self.op {
            LogicOp::And => "AndOperationIterator",
            LogicOp::Or => "OrOperationIterator",
        }
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let left = sequence_ebv(&self.lhs.materialize(ctx, scope)?)?;
        let value = match (self.op, left) {
            (LogicOp::And, false) => false,
            (LogicOp::Or, true) => true,
            _ => sequence_ebv(&self.rhs.materialize(ctx, scope)?)?,
        };
        Ok(vec![Item::Boolean(value)])
    }
}

pub(crate) struct Not(pub(crate) BoxedIterator);

impl SequenceProducer for Not {
    fn name(&self) -> &'static str {
        "NotOperationIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let value = sequence_ebv(&self.0.materialize(ctx, scope)?)?;
        Ok(vec![Item::Boolean(!value)])
    }
}

/// Pull at most two items from `child`, closing it before returning.
fn pull_at_most_two(
    child: &mut BoxedIterator,
    ctx: &mut DynamicContext,
    scope: ScopeId,
) -> Result<(Option<Item>, bool)> {
    child.open(ctx, scope)?;
    let first = if child.has_next() {
        Some(child.next(ctx)?)
    } else {
        None
    };
    let more = first.is_some() && child.has_next();
    child.close(ctx);
    Ok((first, more))
}

pub(crate) struct Cast {
    pub(crate) child: BoxedIterator,
    pub(crate) target: SingleType,
}

impl SequenceProducer for Cast {
    fn name(&self) -> &'static str {
        "CastIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let (first, more) = pull_at_most_two(&mut self.child, ctx, scope)?;
        if more {
            return Err(Error::type_mismatch(format!(
                "a sequence of more than one item can not be cast to type {}",
                self.target
            )));
        }
        match first {
            None if self.target.allows_empty => Ok(Vec::new()),
            None => Err(Error::type_mismatch(format!(
                "the empty sequence can not be cast to type {}",
                self.target
            ))),
            Some(item) => Ok(vec![cast_as(&item, self.target.atomic)?]),
        }
    }

    fn close_children(&mut self, ctx: &mut DynamicContext) {
        self.child.close(ctx);
    }
}

/// `castable as`: never fails because of the value, only because of an
/// invalid target.
pub(crate) struct Castable {
    pub(crate) child: BoxedIterator,
    pub(crate) target: SingleType,
}

impl SequenceProducer for Castable {
    fn name(&self) -> &'static str {
        "CastableIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let (first, more) = pull_at_most_two(&mut self.child, ctx, scope)?;
        let answer = match first {
            _ if more => false,
            None => self.target.allows_empty,
            Some(_) if self.target.atomic == AtomicType::Atomic => return Err(invalid_target_error()),
            Some(item) => castable_as(&item, self.target.atomic),
        };
        Ok(vec![Item::Boolean(answer)])
    }

    fn close_children(&mut self, ctx: &mut DynamicContext) {
        self.child.close(ctx);
    }
}

pub(crate) struct ArrayConstructor(pub(crate) Option<BoxedIterator>);

impl SequenceProducer for ArrayConstructor {
    fn name(&self) -> &'static str {
        "ArrayRuntimeIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let members = match &mut self.0 {
            Some(content) => content.materialize(ctx, scope)?,
            None => Vec::new(),
        };
        Ok(vec![Item::Array(members)])
    }
}

/// An empty value becomes null and a multi-item value is wrapped in an
/// array.
pub(crate) struct ObjectConstructor(pub(crate) Vec<(Name, BoxedIterator)>);

impl SequenceProducer for ObjectConstructor {
    fn name(&self) -> &'static str {
        "ObjectConstructorRuntimeIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let mut entries = Vec::with_capacity(self.0.len());
        for (key, value) in &mut self.0 {
            let mut seq = value.materialize(ctx, scope)?;
            let value = match seq.len() {
                0 => Item::Null,
                1 => seq.remove(0),
                _ => Item::Array(seq),
            };
            entries.push((key.clone(), value));
        }
        Ok(vec![Item::object(entries)?])
    }
}

/// `$a[]`: members of every array in the input; other items contribute
/// nothing.
pub(crate) struct ArrayUnbox(pub(crate) BoxedIterator);

impl SequenceProducer for ArrayUnbox {
    fn name(&self) -> &'static str {
        "ArrayUnboxingIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        Ok(self
            .0
            .materialize(ctx, scope)?
            .into_iter()
            .flat_map(|item| match item {
                Item::Array(members) => members,
                _ => Vec::new(),
            })
            .collect())
    }
}

/// `$o.key`: the value under `key` in every object of the input.
pub(crate) struct ObjectLookup {
    pub(crate) child: BoxedIterator,
    pub(crate) key: Name,
}

impl SequenceProducer for ObjectLookup {
    fn name(&self) -> &'static str {
        "ObjectLookupIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        Ok(self
            .child
            .materialize(ctx, scope)?
            .iter()
            .filter_map(|item| item.get(&self.key).cloned())
            .collect())
    }
}

const ITEM_BINDING: &str = "#item";

/// `parallelize(expr)` consumed by a local parent: the items make a round
/// trip through the substrate and come back in order.
pub(crate) struct Parallelize {
    pub(crate) child: BoxedIterator,
    pub(crate) partitions: usize,
    pub(crate) config: EngineConfig,
}

impl SequenceProducer for Parallelize {
    fn name(&self) -> &'static str {
        "ParallelizeIterator"
    }

    fn produce(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> Result<Sequence> {
        let items = self.child.materialize(ctx, scope)?;
        if !self.config.delegation {
            return Ok(items);
        }
        let substrate = &self.config.substrate;
        debug!(substrate = substrate.name(), items = items.len(), partitions = self.partitions, "parallelize");
        let tuples = items
            .into_iter()
            .map(|item| Tuple::new().with(ITEM_BINDING, vec![item]))
            .collect();
        let data = substrate.distribute(tuples, self.partitions)?;
        Ok(substrate
            .collect(data)?
            .into_iter()
            .flat_map(|mut t| t.remove(ITEM_BINDING).unwrap_or_default())
            .collect())
    }

    fn execution_mode(&self) -> ExecutionMode {
        if self.config.delegation {
            ExecutionMode::Delegated
        } else {
            ExecutionMode::Local
        }
    }
}

pub(crate) fn buffered<P: SequenceProducer + 'static>(producer: P) -> BoxedIterator {
    Box::new(Buffered::new(producer))
}
