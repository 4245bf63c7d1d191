//! Connection handshake and authentication state machine.
//!
//! ```text
//! server                              client
//!   greeting (nonce, caps, plugin) ->
//!                                  <- [SSLRequest, TLS handshake]
//!                                  <- HandshakeResponse41 (plugin response)
//!   OK | ERR                       ->
//!   auth switch (plugin, nonce)    ->  <- new plugin response
//!   auth more data                 ->  <- plugin specific reply
//! ```
//!
//! COM_CHANGE_USER reuses the same authentication loop over the open
//! connection.

use tracing::debug;

use crate::attrs::CONNECT_ATTRS;
use crate::buffer_set::BufferSet;
use crate::constant::{CapabilityFlags, MAX_ALLOWED_PACKET, StatusFlags};
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::auth::{self, AuthPlugin, caching_sha2};
use crate::protocol::handshake::{
    AuthSwitchRequest, HandshakeResponse, InitialHandshake, parse_auth_more_data,
    write_auth_data, write_change_user, write_handshake_response, write_ssl_request,
};
use crate::protocol::response::{EOF_HEADER, ERR_HEADER, OK_HEADER, OkPacket, server_error};
use crate::protocol::server_version::ServerFeatures;

use super::action::{Action, StateMachine};

/// Negotiated state of an authenticated connection.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Connection (thread) id, the target of `KILL QUERY`
    pub connection_id: u32,
    /// Server version string from the greeting
    pub server_version: String,
    /// Version-derived feature set
    pub features: ServerFeatures,
    /// Capabilities both sides agreed on
    pub capabilities: CapabilityFlags,
    /// Status flags of the last OK packet
    pub status_flags: StatusFlags,
    /// Auth plugin that completed the exchange
    pub auth_plugin: AuthPlugin,
    /// Nonce of the greeting, reused by COM_CHANGE_USER
    pub(crate) nonce: Vec<u8>,
}

impl ServerInfo {
    /// True if `CLIENT_COMPRESS` was negotiated.
    pub fn compression(&self) -> bool {
        self.capabilities.has(CapabilityFlags::CLIENT_COMPRESS)
    }
}

/// Connection state during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingGreeting,
    TlsUpgraded,
    WaitingAuthResult,
    WaitingPublicKey,
    ChangeUserPending,
    Finished,
}

/// Connection startup (and change-user) state machine.
pub struct ConnectionStateMachine {
    state: State,
    opts: Opts,
    tls_available: bool,
    secure: bool,
    capabilities: CapabilityFlags,
    plugin: AuthPlugin,
    nonce: Vec<u8>,
    info: Option<ServerInfo>,
}

impl ConnectionStateMachine {
    /// Create a state machine for a fresh connection.
    ///
    /// `tls_available` tells whether the driver can upgrade the stream to TLS.
    pub fn new(buffer_set: &mut BufferSet, opts: Opts, tls_available: bool) -> Self {
        buffer_set.start_command();
        Self {
            state: State::Initial,
            opts,
            tls_available,
            secure: false,
            capabilities: CapabilityFlags::default(),
            plugin: AuthPlugin::NativePassword,
            nonce: Vec::new(),
            info: None,
        }
    }

    /// Create a state machine that re-authenticates an open connection with
    /// COM_CHANGE_USER using the credentials and database of `opts`.
    pub fn change_user(
        buffer_set: &mut BufferSet,
        opts: Opts,
        info: ServerInfo,
        secure: bool,
    ) -> Result<Self> {
        buffer_set.start_command();
        let mut sm = Self {
            state: State::ChangeUserPending,
            opts,
            tls_available: secure,
            secure,
            capabilities: info.capabilities,
            plugin: info.auth_plugin,
            nonce: info.nonce.clone(),
            info: Some(info),
        };
        let auth_response = sm.initial_response()?;
        let response = sm.response(&auth_response);
        write_change_user(
            &mut buffer_set.write_buffer,
            &mut buffer_set.sequence_id,
            &response,
        );
        Ok(sm)
    }

    /// Take the negotiated server info after completion.
    pub fn take_info(&mut self) -> Option<ServerInfo> {
        self.info.take()
    }

    /// True if the stream was upgraded to TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    fn password(&self) -> &str {
        self.opts.password.as_deref().unwrap_or_default()
    }

    fn initial_response(&self) -> Result<Vec<u8>> {
        self.plugin.initial_response(
            self.password(),
            &self.nonce,
            self.secure,
            self.opts.allow_cleartext_password,
        )
    }

    fn response<'a>(&'a self, auth_response: &'a [u8]) -> HandshakeResponse<'a> {
        HandshakeResponse {
            capability_flags: self.capabilities,
            max_packet_size: MAX_ALLOWED_PACKET,
            charset: self.opts.charset,
            user: &self.opts.user,
            auth_response,
            database: self.opts.database.as_deref(),
            auth_plugin_name: self.plugin.name(),
            attrs: self.opts.connection_attrs.then_some(&*CONNECT_ATTRS),
        }
    }

    fn client_capabilities(&self, use_tls: bool) -> CapabilityFlags {
        let mut caps = CapabilityFlags::new(
            CapabilityFlags::CLIENT_LONG_PASSWORD
                | CapabilityFlags::CLIENT_LONG_FLAG
                | CapabilityFlags::CLIENT_PROTOCOL_41
                | CapabilityFlags::CLIENT_TRANSACTIONS
                | CapabilityFlags::CLIENT_SECURE_CONNECTION
                | CapabilityFlags::CLIENT_MULTI_RESULTS
                | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
                | CapabilityFlags::CLIENT_PLUGIN_AUTH
                | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
                | CapabilityFlags::CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS,
        );
        if self.opts.connection_attrs {
            caps.set(CapabilityFlags::CLIENT_CONNECT_ATTRS);
        }
        if self.opts.database.is_some() {
            caps.set(CapabilityFlags::CLIENT_CONNECT_WITH_DB);
        }
        if self.opts.compress {
            caps.set(CapabilityFlags::CLIENT_COMPRESS);
        }
        if self.opts.multi_statements {
            caps.set(CapabilityFlags::CLIENT_MULTI_STATEMENTS);
        }
        if self.opts.allow_local_infile {
            caps.set(CapabilityFlags::CLIENT_LOCAL_FILES);
        }
        if use_tls {
            caps.set(CapabilityFlags::CLIENT_SSL);
        }
        caps
    }

    fn handle_greeting(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let handshake = InitialHandshake::parse(&buffer_set.read_buffer)?;
        let server_caps = handshake.capability_flags;
        if !server_caps.has(CapabilityFlags::CLIENT_PROTOCOL_41) {
            return Err(Error::Unsupported(
                "server does not speak protocol 4.1".into(),
            ));
        }

        let server_ssl = server_caps.has(CapabilityFlags::CLIENT_SSL);
        let use_tls = match self.opts.ssl_mode {
            SslMode::Disable => false,
            SslMode::Prefer => server_ssl && self.tls_available,
            SslMode::Require if !server_ssl => {
                return Err(Error::Unsupported(
                    "SSL required but the server does not support it".into(),
                ));
            }
            SslMode::Require if !self.tls_available => {
                return Err(Error::Unsupported(
                    "SSL required but TLS support is not compiled in".into(),
                ));
            }
            SslMode::Require => true,
        };

        self.capabilities = self.client_capabilities(use_tls).intersect(server_caps);
        self.plugin = if !server_caps.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            AuthPlugin::NativePassword
        } else if let Some(name) = &self.opts.auth_plugin {
            AuthPlugin::from_name(name)?
        } else {
            match &handshake.auth_plugin_name {
                // the server switches us to its plugin if it insists
                Some(name) => AuthPlugin::from_name(name).unwrap_or_else(|_| {
                    debug!(plugin = %name, "unknown default auth plugin, starting with native");
                    AuthPlugin::NativePassword
                }),
                None => AuthPlugin::NativePassword,
            }
        };
        self.nonce = handshake.auth_plugin_data.clone();
        debug!(
            connection_id = handshake.connection_id,
            server_version = %handshake.server_version,
            plugin = self.plugin.name(),
            tls = use_tls,
            "server greeting"
        );

        self.info = Some(ServerInfo {
            connection_id: handshake.connection_id,
            features: ServerFeatures::from_version_string(&handshake.server_version),
            server_version: handshake.server_version,
            capabilities: self.capabilities,
            status_flags: handshake.status_flags,
            auth_plugin: self.plugin,
            nonce: handshake.auth_plugin_data,
        });

        buffer_set.write_buffer.clear();
        if use_tls {
            write_ssl_request(
                &mut buffer_set.write_buffer,
                &mut buffer_set.sequence_id,
                self.capabilities,
                MAX_ALLOWED_PACKET,
                self.opts.charset,
            );
            self.state = State::TlsUpgraded;
            return Ok(Action::TlsHandshake);
        }
        self.write_handshake_response(buffer_set)
    }

    fn write_handshake_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let auth_response = self.initial_response()?;
        buffer_set.write_buffer.clear();
        let response = self.response(&auth_response);
        write_handshake_response(
            &mut buffer_set.write_buffer,
            &mut buffer_set.sequence_id,
            &response,
        );
        self.state = State::WaitingAuthResult;
        Ok(Action::WriteAndReadPacket)
    }

    fn reply(&mut self, buffer_set: &mut BufferSet, data: &[u8], next: State) -> Action {
        buffer_set.write_buffer.clear();
        write_auth_data(&mut buffer_set.write_buffer, &mut buffer_set.sequence_id, data);
        self.state = next;
        Action::WriteAndReadPacket
    }

    fn handle_auth_result(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match buffer_set.read_buffer.first().copied() {
            Some(OK_HEADER) => {
                let ok = OkPacket::parse(&buffer_set.read_buffer)?;
                if let Some(info) = &mut self.info {
                    info.status_flags = ok.status_flags;
                    info.auth_plugin = self.plugin;
                }
                debug!(plugin = self.plugin.name(), "authenticated");
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            Some(ERR_HEADER) => {
                self.state = State::Finished;
                Err(server_error(&buffer_set.read_buffer))
            }
            Some(EOF_HEADER) => {
                let switch = AuthSwitchRequest::parse(&buffer_set.read_buffer)?;
                self.plugin = AuthPlugin::from_name(switch.plugin_name)?;
                self.nonce = switch.plugin_data.to_vec();
                debug!(plugin = self.plugin.name(), "auth switch");
                let response = self.initial_response()?;
                let next = if self.plugin == AuthPlugin::Sha256Password && !self.secure {
                    State::WaitingPublicKey
                } else {
                    State::WaitingAuthResult
                };
                Ok(self.reply(buffer_set, &response, next))
            }
            Some(0x01) => self.handle_more_data(buffer_set),
            _ => Err(Error::Protocol(
                "unexpected packet during authentication".into(),
            )),
        }
    }

    fn handle_more_data(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let data = parse_auth_more_data(&buffer_set.read_buffer)?.to_vec();
        match self.plugin {
            AuthPlugin::CachingSha2Password => match data.as_slice() {
                [caching_sha2::FAST_AUTH_SUCCESS] => {
                    debug!("caching_sha2_password fast auth");
                    Ok(Action::ReadPacket)
                }
                [caching_sha2::PERFORM_FULL_AUTH] if self.secure => {
                    debug!("caching_sha2_password full auth over TLS");
                    let password = auth::cleartext(self.password());
                    Ok(self.reply(buffer_set, &password, State::WaitingAuthResult))
                }
                [caching_sha2::PERFORM_FULL_AUTH] => {
                    debug!("caching_sha2_password full auth, requesting public key");
                    Ok(self.reply(
                        buffer_set,
                        &[caching_sha2::REQUEST_PUBLIC_KEY],
                        State::WaitingPublicKey,
                    ))
                }
                _ => Err(Error::Protocol(
                    "unexpected caching_sha2_password status".into(),
                )),
            },
            AuthPlugin::Sha256Password => self.send_encrypted(buffer_set, &data),
            other => Err(Error::Protocol(format!(
                "unexpected auth more data for {}",
                other.name()
            ))),
        }
    }

    fn send_encrypted(&mut self, buffer_set: &mut BufferSet, public_key: &[u8]) -> Result<Action> {
        let encrypted = auth::encrypt_password_rsa(self.password(), &self.nonce, public_key)?;
        Ok(self.reply(buffer_set, &encrypted, State::WaitingAuthResult))
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                self.state = State::WaitingGreeting;
                Ok(Action::ReadPacket)
            }
            State::WaitingGreeting => self.handle_greeting(buffer_set),
            State::TlsUpgraded => {
                self.secure = true;
                self.write_handshake_response(buffer_set)
            }
            State::ChangeUserPending => {
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadPacket)
            }
            State::WaitingAuthResult => self.handle_auth_result(buffer_set),
            State::WaitingPublicKey => match buffer_set.read_buffer.first().copied() {
                Some(0x01) => {
                    let key = parse_auth_more_data(&buffer_set.read_buffer)?.to_vec();
                    self.send_encrypted(buffer_set, &key)
                }
                _ => self.handle_auth_result(buffer_set),
            },
            State::Finished => Err(Error::Protocol(
                "connection state machine already finished".into(),
            )),
        }
    }
}
