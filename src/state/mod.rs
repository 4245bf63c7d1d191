//! Sans-I/O state machines for the MySQL protocol.
//!
//! Each machine writes its request into a [`BufferSet`](crate::BufferSet) when
//! constructed and then tells the driver which I/O to perform through
//! [`Action`]s. The sync and tokio drivers share them unchanged.

pub mod action;
pub mod command;
pub mod connection;
pub mod execute;
pub mod prepare;
pub mod query;
pub mod result;

pub use action::{Action, StateMachine};
