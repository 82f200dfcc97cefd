pub mod engine;
pub mod index;
pub mod policy;
pub mod tuple;
