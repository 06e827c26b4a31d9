//! Order, balance and user storage
//!
//! Services depend on the traits only; `PostgresStore` backs production and
//! `MemoryStore` backs tests and the in-memory run mode.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{LedgerStore, OrderStore, UserStore};
