//! Transaction token for asynchronous connections.

use super::Conn;
use crate::error::{Error, Result};

/// An open transaction on an asynchronous [`Conn`].
///
/// The connection is passed to `commit` and `rollback` to run the statement.
pub struct Transaction {
    connection_id: u32,
}

impl Transaction {
    pub(crate) fn new(connection_id: u32) -> Self {
        Self { connection_id }
    }

    fn check(&self, conn: &Conn) -> Result<()> {
        let actual = conn.connection_id();
        if self.connection_id != actual {
            return Err(Error::InvalidUsage(format!(
                "connection mismatch: expected {}, got {}",
                self.connection_id, actual
            )));
        }
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if `conn` is not the connection that
    /// started the transaction.
    pub async fn commit(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        conn.query_drop("COMMIT").await?;
        Ok(())
    }

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if `conn` is not the connection that
    /// started the transaction.
    pub async fn rollback(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        conn.query_drop("ROLLBACK").await?;
        Ok(())
    }

    pub async fn savepoint(&self, conn: &mut Conn, name: &str) -> Result<()> {
        self.check(conn)?;
        conn.query_drop(&format!("SAVEPOINT `{}`", name.replace('`', "``")))
            .await?;
        Ok(())
    }

    pub async fn rollback_to(&self, conn: &mut Conn, name: &str) -> Result<()> {
        self.check(conn)?;
        conn.query_drop(&format!("ROLLBACK TO SAVEPOINT `{}`", name.replace('`', "``")))
            .await?;
        Ok(())
    }
}
