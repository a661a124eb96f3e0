pub mod compiler;
pub mod engine;
pub mod evaluator;
pub mod flwor;
pub mod item;
pub mod types;

pub use engine::context::{DynamicContext, DynamicContextBuilder, ScopeId, Tuple};
pub use engine::iterator::{ExecutionMode, RuntimeIterator, TupleIterator};
pub use engine::runtime::{EmptyOrder, EngineConfig, EngineConfigBuilder, Error, ErrorCode, ErrorKind, Result};
pub use engine::substrate::{InlineSubstrate, Partitioned, RayonSubstrate, Substrate};
pub use evaluator::{CompiledQuery, ResultStream, compile, evaluate, evaluate_stream};
pub use flwor::ast::{Clause, Expr, FlworExpr, GroupSpec, LogicOp, OrderSpec};
pub use item::{Item, Name, Sequence};
pub use types::{AtomicType, SingleType};
