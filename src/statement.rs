//! Prepared statements and the statement references accepted by `exec*` methods.

use crate::protocol::column::ColumnInfo;

/// A server-side prepared statement.
///
/// Statements belong to the connection that prepared them. Close them with
/// `Conn::close_statement` to free server resources; they are also freed when
/// the connection closes or is reset.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) id: u32,
    pub(crate) connection_id: u32,
    pub(crate) params: Vec<ColumnInfo>,
    pub(crate) columns: Vec<ColumnInfo>,
}

impl PreparedStatement {
    /// Server-side statement id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Id of the connection the statement was prepared on.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Number of `?` placeholders.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Parameter metadata reported by the server.
    pub fn params(&self) -> &[ColumnInfo] {
        &self.params
    }

    /// Result column metadata reported at prepare time (empty for statements without rows).
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }
}

/// Sealed trait for types that can be used as statement references in exec_* methods.
///
/// Raw SQL is prepared, executed and closed again in one call.
pub trait IntoStatement: private::Sealed {
    /// Get the SQL string if this is raw SQL.
    fn as_sql(&self) -> Option<&str>;

    /// Get the prepared statement if this is a prepared statement reference.
    fn as_prepared(&self) -> Option<&PreparedStatement>;
}

mod private {
    use super::PreparedStatement;

    pub trait Sealed {}

    impl Sealed for &PreparedStatement {}
    impl Sealed for &str {}
    impl Sealed for &String {}
}

impl IntoStatement for &PreparedStatement {
    fn as_sql(&self) -> Option<&str> {
        None
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        Some(self)
    }
}

impl IntoStatement for &str {
    fn as_sql(&self) -> Option<&str> {
        Some(self)
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}

impl IntoStatement for &String {
    fn as_sql(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}
