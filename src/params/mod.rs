//! Parameter expansion and run selection

mod expander;
mod selector;

pub use expander::{expand, validate};
pub use selector::{Selection, Selector};
