//! Pool pieces shared by the sync and tokio pools.

use std::time::Instant;

use crate::opts::Opts;

/// Opaque id of an external transaction a pooled connection is enlisted in.
///
/// While enlisted, a released connection is held by its pool instead of
/// going back to the idle set, and is handed out again to checkouts for the
/// same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// True if a connection opened at `created_at` outlived `Opts::connection_lifetime`.
pub(crate) fn is_expired(opts: &Opts, created_at: Instant) -> bool {
    opts.connection_lifetime
        .is_some_and(|lifetime| created_at.elapsed() > lifetime)
}
