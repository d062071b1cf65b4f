pub mod error;
pub mod memory;
pub mod postgres;
pub mod product;
pub mod store;

pub use common::{ProductId, SellerId};
pub use error::{Result, StoreError};
pub use memory::InMemoryProductStore;
pub use postgres::PostgresProductStore;
pub use product::{InvalidProduct, NewProduct, Product, ProductPatch};
pub use store::ProductStore;
