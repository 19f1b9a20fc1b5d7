//! Conformance tests every storage implementation has to pass.

mod store_builder;
mod suite;

pub use store_builder::StoreBuilder;
pub use store_builder::Stores;
pub use suite::Suite;
