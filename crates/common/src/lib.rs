//! Identifier types shared by every crate in the workspace.

mod types;

pub use types::{ProductId, SellerId, partition_key};
