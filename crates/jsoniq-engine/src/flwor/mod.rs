//! FLWOR expressions: the typed clause chain, its local tuple iterators,
//! the execution-mode resolver and the delegated pipeline.

pub mod ast;
pub mod clauses;
pub mod delegated;
pub mod resolver;
