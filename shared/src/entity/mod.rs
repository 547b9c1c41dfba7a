mod bindable;
pub(crate) mod core;
mod error;
pub(crate) mod nested;

pub use bindable::{bind_top_level, BindState, RdBindable, RdDynamic, RdReactive};
pub use error::EntityError;
