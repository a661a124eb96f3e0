use std::cell::Cell;
use std::rc::Rc;

use jsoniq_engine::flwor::clauses::{ForIterator, ReturnIterator, SeedIterator};
use jsoniq_engine::{
    Clause, DynamicContext, EngineConfig, Error, ErrorCode, Expr, FlworExpr, Item, RuntimeIterator, ScopeId,
    TupleIterator, compile, evaluate_stream,
};
use rstest::rstest;

#[derive(Default)]
struct Stats {
    opens: Cell<usize>,
    closes: Cell<usize>,
}

/// Yields a fixed sequence and records lifecycle calls.
struct Instrumented {
    items: Vec<Item>,
    pos: usize,
    open: bool,
    stats: Rc<Stats>,
}

impl Instrumented {
    fn boxed(items: Vec<Item>, stats: &Rc<Stats>) -> Box<dyn RuntimeIterator> {
        Box::new(Self {
            items,
            pos: 0,
            open: false,
            stats: Rc::clone(stats),
        })
    }
}

impl RuntimeIterator for Instrumented {
    fn open(&mut self, _ctx: &mut DynamicContext, _scope: ScopeId) -> jsoniq_engine::Result<()> {
        if self.open {
            return Err(Error::from_code(ErrorCode::ENGN0001, "instrumented iterator opened twice"));
        }
        self.open = true;
        self.pos = 0;
        self.stats.opens.set(self.stats.opens.get() + 1);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.open && self.pos < self.items.len()
    }

    fn next(&mut self, _ctx: &mut DynamicContext) -> jsoniq_engine::Result<Item> {
        if !self.has_next() {
            return Err(Error::iterator_flow("Instrumented"));
        }
        self.pos += 1;
        Ok(self.items[self.pos - 1].clone())
    }

    fn close(&mut self, _ctx: &mut DynamicContext) {
        self.stats.closes.set(self.stats.closes.get() + 1);
        self.open = false;
    }
}

/// Returns the current binding of a variable.
struct Binding {
    name: &'static str,
    value: Vec<Item>,
}

impl RuntimeIterator for Binding {
    fn open(&mut self, ctx: &mut DynamicContext, scope: ScopeId) -> jsoniq_engine::Result<()> {
        self.value = ctx.lookup(scope, self.name)?.clone();
        Ok(())
    }

    fn has_next(&self) -> bool {
        !self.value.is_empty()
    }

    fn next(&mut self, _ctx: &mut DynamicContext) -> jsoniq_engine::Result<Item> {
        if self.value.is_empty() {
            return Err(Error::iterator_flow("Binding"));
        }
        Ok(self.value.remove(0))
    }

    fn close(&mut self, _ctx: &mut DynamicContext) {
        self.value.clear();
    }
}

fn pipeline(stats: &Rc<Stats>) -> ReturnIterator {
    let source = Instrumented::boxed((1..=3).map(Item::Integer).collect(), stats);
    let for_clause = ForIterator::new("x", None, false, source, Box::new(SeedIterator::new()));
    ReturnIterator::new(
        Box::new(Binding {
            name: "x",
            value: Vec::new(),
        }),
        Box::new(for_clause),
    )
}

#[rstest]
fn early_close_closes_upstream_once_and_frees_scopes() {
    let stats = Rc::new(Stats::default());
    let mut ret = pipeline(&stats);
    let mut ctx = DynamicContext::new();
    let root = ctx.root();

    ret.open(&mut ctx, root).unwrap();
    assert_eq!(ret.next(&mut ctx).unwrap(), Item::Integer(1));
    assert!(ret.has_next());
    ret.close(&mut ctx);
    ret.close(&mut ctx);

    assert_eq!(stats.opens.get(), 1);
    assert_eq!(stats.closes.get(), 1);
    assert_eq!(ctx.live_scopes(), 1);
}

#[rstest]
fn draining_closes_source_once() {
    let stats = Rc::new(Stats::default());
    let mut ret = pipeline(&stats);
    let mut ctx = DynamicContext::new();
    let root = ctx.root();

    let out = ret.materialize(&mut ctx, root).unwrap();
    assert_eq!(out, (1..=3).map(Item::Integer).collect::<Vec<_>>());
    assert_eq!(stats.closes.get(), 1);
    assert_eq!(ctx.live_scopes(), 1);
}

#[rstest]
fn iterator_can_be_reopened_after_close() {
    let stats = Rc::new(Stats::default());
    let mut ret = pipeline(&stats);
    let mut ctx = DynamicContext::new();
    let root = ctx.root();

    let first = ret.materialize(&mut ctx, root).unwrap();
    let second = ret.materialize(&mut ctx, root).unwrap();
    assert_eq!(first, second);
    assert_eq!(stats.opens.get(), 2);
}

#[rstest]
fn protocol_violations_are_reported() {
    let stats = Rc::new(Stats::default());
    let mut ret = pipeline(&stats);
    let mut ctx = DynamicContext::new();
    let root = ctx.root();

    assert_eq!(ret.next(&mut ctx).unwrap_err().code, ErrorCode::ENGN0001);
    ret.open(&mut ctx, root).unwrap();
    assert_eq!(ret.open(&mut ctx, root).unwrap_err().code, ErrorCode::ENGN0001);
    while ret.has_next() {
        ret.next(&mut ctx).unwrap();
    }
    assert_eq!(ret.next(&mut ctx).unwrap_err().code, ErrorCode::ENGN0001);
    ret.close(&mut ctx);
    assert_eq!(ctx.live_scopes(), 1);
}

#[rstest]
fn seed_yields_its_scope_once() {
    let mut ctx = DynamicContext::new();
    let root = ctx.root();
    let mut seed = SeedIterator::new();
    seed.open(&mut ctx, root).unwrap();
    let scope = seed.next(&mut ctx).unwrap();
    assert_eq!(scope, root);
    assert!(!seed.has_next());
    ctx.release(scope);
    seed.close(&mut ctx);
    assert_eq!(ctx.live_scopes(), 1);
}

#[rstest]
fn dropped_stream_releases_everything() {
    let flwor = FlworExpr::new(vec![
        Clause::for_in("x", Expr::integers(1..=100)),
        Clause::let_bind("y", Expr::var("x")),
        Clause::Return(Expr::var("y")),
    ])
    .unwrap();
    let query = compile(&Expr::flwor(flwor), &EngineConfig::default()).unwrap();
    let mut stream = evaluate_stream(&query, &DynamicContext::default()).unwrap();
    let head: Vec<Item> = stream.by_ref().take(2).map(Result::unwrap).collect();
    assert_eq!(head, vec![Item::Integer(1), Item::Integer(2)]);
    assert!(stream.live_scopes() > 1);
    stream.close();
    assert_eq!(stream.live_scopes(), 1);
    assert!(stream.next().is_none());
}

#[rstest]
fn stream_stops_after_an_error() {
    let flwor = FlworExpr::new(vec![
        Clause::for_in("x", Expr::integers(0..=2)),
        Clause::Return(Expr::arithmetic(
            jsoniq_engine::types::arithmetic::ArithmeticOp::Div,
            Expr::integer(1),
            Expr::var("x"),
        )),
    ])
    .unwrap();
    let query = compile(&Expr::flwor(flwor), &EngineConfig::default()).unwrap();
    let mut stream = evaluate_stream(&query, &DynamicContext::default()).unwrap();
    assert_eq!(stream.next().unwrap().unwrap_err().code, ErrorCode::FOAR0001);
    assert!(stream.next().is_none());
    assert_eq!(stream.live_scopes(), 1);
}
