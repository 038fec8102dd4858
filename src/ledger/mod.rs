pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use memory::MemoryLedgerStore;
pub use repository::PgLedgerStore;
pub use store::LedgerStore;

#[cfg(test)]
pub mod testing;
