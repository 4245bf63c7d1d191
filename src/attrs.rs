//! Client connection attributes sent in the handshake response.
//!
//! The attributes describe the process, so they are computed once.

use std::sync::LazyLock;

use crate::protocol::codec::{write_lenenc_bytes, write_lenenc_int};

/// Process-wide connection attributes.
pub static CONNECT_ATTRS: LazyLock<ConnectAttrs> = LazyLock::new(ConnectAttrs::collect);

/// Key/value pairs reported to the server (`performance_schema.session_connect_attrs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttrs {
    attrs: Vec<(&'static str, String)>,
}

impl ConnectAttrs {
    fn collect() -> Self {
        Self {
            attrs: vec![
                ("_client_name", env!("CARGO_PKG_NAME").to_string()),
                ("_client_version", env!("CARGO_PKG_VERSION").to_string()),
                ("_os", std::env::consts::OS.to_string()),
                ("_platform", std::env::consts::ARCH.to_string()),
                ("_pid", std::process::id().to_string()),
            ],
        }
    }

    /// Attribute pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Append the length-prefixed attribute block.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut block = Vec::new();
        for (key, value) in self.iter() {
            write_lenenc_bytes(&mut block, key.as_bytes());
            write_lenenc_bytes(&mut block, value.as_bytes());
        }
        write_lenenc_int(out, block.len() as u64);
        out.extend_from_slice(&block);
    }
}
