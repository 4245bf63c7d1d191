//! MySQL wire protocol implementation.
//!
//! This module contains the low-level protocol encoding and decoding. Nothing
//! here performs I/O except the `Read`-based helpers in [`packet`] used by the
//! blocking stream.
//!
//! # Structure
//!
//! - `codec`: little-endian and length-encoded primitives
//! - `packet`: 4-byte packet framing, splitting and reassembly
//! - `compress`: compressed frames (zlib)
//! - `handshake`, `auth`: connection phase
//! - `response`, `column`, `row`: server responses
//! - `command`: COM_* requests
//! - `server_version`: version -> feature table

pub mod auth;
pub mod codec;
pub mod column;
pub mod command;
pub mod compress;
pub mod handshake;
pub mod packet;
pub mod response;
pub mod row;
pub mod server_version;

// Re-export commonly used types
pub use column::{ColumnDefinition, ColumnDefs, ColumnInfo};
pub use response::OkPacket;
pub use row::{BinaryRow, TextRow};
