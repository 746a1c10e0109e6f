pub mod db;
pub mod ledger;

pub use db::{open_pool, Backend, Credentials, DbPool, LedgerLocation, StorageError};
pub use ledger::{Book, LedgerAccount};
