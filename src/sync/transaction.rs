//! Transaction token for synchronous connections.

use super::Conn;
use crate::error::{Error, Result};

/// An open transaction on a [`Conn`].
///
/// The token only remembers which connection started it; the connection is
/// passed to `commit` and `rollback` to run the statement.
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
    pub fn commit(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        conn.query_drop("COMMIT")?;
        Ok(())
    }

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if `conn` is not the connection that
    /// started the transaction.
    pub fn rollback(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        conn.query_drop("ROLLBACK")?;
        Ok(())
    }

    /// Set a named savepoint inside the transaction.
    pub fn savepoint(&self, conn: &mut Conn, name: &str) -> Result<()> {
        self.check(conn)?;
        conn.query_drop(&format!("SAVEPOINT `{}`", name.replace('`', "``")))?;
        Ok(())
    }

    /// Roll back to a savepoint, keeping the transaction open.
    pub fn rollback_to(&self, conn: &mut Conn, name: &str) -> Result<()> {
        self.check(conn)?;
        conn.query_drop(&format!("ROLLBACK TO SAVEPOINT `{}`", name.replace('`', "``")))?;
        Ok(())
    }
}
