pub mod context;
pub mod expr;
pub mod iterator;
pub mod runtime;
pub mod substrate;
