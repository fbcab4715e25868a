pub mod runtime;
pub mod strategy;

pub use runtime::*;
pub use strategy::*;
