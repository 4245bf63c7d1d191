//! Asynchronous MySQL client using Tokio.

mod conn;
mod pool;
mod result;
mod stream;
mod transaction;

pub use conn::Conn;
pub use pool::{Pool, PoolManager, PooledConn};
pub use result::QueryResult;
pub use transaction::Transaction;
