//! In-process mock MySQL server for the integration tests.
//!
//! Each accepted connection runs on its own thread: greeting, password check,
//! then a command loop that answers COM_QUERY and the prepared statement
//! commands through a per-test script.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use zero_mysql::constant::CapabilityFlags;
use zero_mysql::protocol::auth::{scramble_native, scramble_sha256};
use zero_mysql::protocol::compress::{
    COMPRESSED_HEADER_LEN, CompressedHeader, compress_frames, decompress_frame,
};
use zero_mysql::protocol::packet::write_packets;
use zero_mysql::{Opts, SslMode};

pub const USER: &str = "app";
pub const PASSWORD: &str = "secret";
const NONCE: &[u8; 20] = b"abcdefghijklmnopqrst";

pub const TYPE_LONGLONG: u8 = 0x08;
pub const TYPE_VAR_STRING: u8 = 0xfd;

const STATUS_AUTOCOMMIT: u16 = 0x0002;
const STATUS_CURSOR_EXISTS: u16 = 0x0040;
const STATUS_LAST_ROW_SENT: u16 = 0x0080;

/// The server's answer to one COM_QUERY.
pub enum Reply {
    Ok { affected_rows: u64 },
    Rows {
        columns: Vec<(&'static str, u8)>,
        rows: Vec<Vec<Option<String>>>,
    },
    Err { code: u16, state: &'static str, message: &'static str },
    /// Drop the socket without answering.
    Close,
    /// Hold the answer until `KILL QUERY <this connection>` arrives.
    WaitForKill,
    /// Send half a packet header and go quiet until the client hangs up.
    Stall,
    /// Ask the client for a local file, then answer OK with one affected
    /// row per received line.
    LocalInfile(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok { affected_rows: 0 }
    }

    pub fn single(name: &'static str, ty: u8, value: &str) -> Self {
        Reply::Rows {
            columns: vec![(name, ty)],
            rows: vec![vec![Some(value.to_owned())]],
        }
    }
}

#[derive(Clone, Copy)]
pub struct ServerConfig {
    /// Default plugin announced in the greeting. `None` leaves out
    /// `CLIENT_PLUGIN_AUTH` altogether.
    pub plugin: Option<&'static str>,
    pub compress: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            plugin: Some("mysql_native_password"),
            compress: false,
        }
    }
}

type Script = dyn Fn(&str) -> Reply + Send + Sync;

#[derive(Default)]
struct Shared {
    queries: Mutex<Vec<(u32, String)>>,
    statements: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Vec<u8>>>,
    plugins: Mutex<Vec<String>>,
    killed: Mutex<HashSet<u32>>,
    kill_signal: Condvar,
    next_id: AtomicU32,
    compressed: AtomicU32,
}

pub struct MockServer {
    port: u16,
    shared: Arc<Shared>,
}

impl MockServer {
    pub fn start(script: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self::with_config(ServerConfig::default(), script)
    }

    pub fn with_config(
        config: ServerConfig,
        script: impl Fn(&str) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared::default());
        let script: Arc<Script> = Arc::new(script);
        let accept_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let shared = Arc::clone(&accept_shared);
                let script = Arc::clone(&script);
                thread::spawn(move || {
                    let id = shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut session = Session {
                        stream,
                        id,
                        config,
                        shared,
                        compressed: false,
                        frame_seq: 0,
                        inflated: Vec::new(),
                        prepared: HashMap::new(),
                        next_statement: 0,
                        cursors: HashMap::new(),
                    };
                    // a client hanging up mid-exchange just ends the session
                    let _ = session.run(&*script);
                });
            }
        });
        Self { port, shared }
    }

    pub fn opts(&self) -> Opts {
        Opts {
            host: "127.0.0.1".into(),
            port: self.port,
            user: USER.into(),
            password: Some(PASSWORD.into()),
            ssl_mode: SslMode::Disable,
            connection_attrs: false,
            ..Opts::default()
        }
    }

    /// SQL received so far, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        self.shared
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// SQL received on one connection.
    pub fn queries_on(&self, connection_id: u32) -> Vec<String> {
        self.shared
            .queries
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == connection_id)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Prepared statement commands, e.g. `PREPARE <sql>`, `EXECUTE 1 [7]`,
    /// `FETCH 1 2` and `CLOSE 1`.
    pub fn statement_log(&self) -> Vec<String> {
        self.shared.statements.lock().unwrap().clone()
    }

    /// Bytes received for each LOCAL INFILE request.
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.shared.uploads.lock().unwrap().clone()
    }

    /// Plugin named in each handshake response that passed the password check.
    pub fn authenticated_plugins(&self) -> Vec<String> {
        self.shared.plugins.lock().unwrap().clone()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u32 {
        self.shared.next_id.load(Ordering::SeqCst)
    }

    /// Connections that switched to compressed frames.
    pub fn compressed_connections(&self) -> u32 {
        self.shared.compressed.load(Ordering::SeqCst)
    }
}

struct Cursor {
    columns: Vec<(&'static str, u8)>,
    rows: VecDeque<Vec<Option<String>>>,
}

struct Session {
    stream: TcpStream,
    id: u32,
    config: ServerConfig,
    shared: Arc<Shared>,
    compressed: bool,
    frame_seq: u8,
    inflated: Vec<u8>,
    /// statement id -> (sql, parameter count)
    prepared: HashMap<u32, (String, usize)>,
    next_statement: u32,
    cursors: HashMap<u32, Cursor>,
}

impl Session {
    fn server_caps(&self) -> u32 {
        let mut caps = CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_LONG_FLAG
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_TRANSACTIONS
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_MULTI_STATEMENTS
            | CapabilityFlags::CLIENT_MULTI_RESULTS
            | CapabilityFlags::CLIENT_PS_MULTI_RESULTS;
        if self.config.plugin.is_some() {
            caps |= CapabilityFlags::CLIENT_PLUGIN_AUTH
                | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
        }
        if self.config.compress {
            caps |= CapabilityFlags::CLIENT_COMPRESS;
        }
        caps
    }

    fn greeting(&self) -> Vec<u8> {
        let caps = self.server_caps();
        let mut out = vec![10];
        out.extend_from_slice(b"8.0.36\0");
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&NONCE[..8]);
        out.push(0);
        out.extend_from_slice(&(caps as u16).to_le_bytes());
        out.push(45);
        out.extend_from_slice(&STATUS_AUTOCOMMIT.to_le_bytes());
        out.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        out.push(21);
        out.extend_from_slice(&[0; 10]);
        out.extend_from_slice(&NONCE[8..]);
        out.push(0);
        if let Some(plugin) = self.config.plugin {
            out.extend_from_slice(plugin.as_bytes());
            out.push(0);
        }
        out
    }

    fn run(&mut self, script: &Script) -> std::io::Result<()> {
        let greeting = self.greeting();
        self.send(&greeting, 0)?;
        if !self.authenticate()? {
            return Ok(());
        }

        loop {
            let (_, payload) = self.read_packet()?;
            let Some((&command, body)) = payload.split_first() else {
                return Ok(());
            };
            match command {
                // COM_QUIT
                0x01 => return Ok(()),
                // COM_QUERY
                0x03 => {
                    let sql = String::from_utf8_lossy(body).into_owned();
                    self.shared
                        .queries
                        .lock()
                        .unwrap()
                        .push((self.id, sql.clone()));
                    if let Some(target) = sql.strip_prefix("KILL QUERY ") {
                        let target: u32 = target.trim().parse().unwrap_or(0);
                        self.shared.killed.lock().unwrap().insert(target);
                        self.shared.kill_signal.notify_all();
                        self.send_ok(0, 1)?;
                        continue;
                    }
                    match script(&sql) {
                        Reply::Ok { affected_rows } => self.send_ok(affected_rows, 1)?,
                        Reply::Rows { columns, rows } => self.send_rows(&columns, &rows, false)?,
                        Reply::Err {
                            code,
                            state,
                            message,
                        } => self.send_err(code, state, message, 1)?,
                        Reply::Close => return Ok(()),
                        Reply::WaitForKill => {
                            self.wait_for_kill();
                            self.send_err(1317, "70100", "Query execution was interrupted", 1)?;
                        }
                        Reply::Stall => return self.stall(),
                        Reply::LocalInfile(file) => self.local_infile(&file)?,
                    }
                }
                // COM_STMT_PREPARE
                0x16 => {
                    let sql = String::from_utf8_lossy(body).into_owned();
                    self.log_statement(format!("PREPARE {}", sql));
                    self.prepare(&sql, script)?;
                }
                // COM_STMT_EXECUTE
                0x17 => {
                    if !self.execute(body, script)? {
                        return Ok(());
                    }
                }
                // COM_STMT_FETCH
                0x1c => self.fetch(body)?,
                // COM_STMT_CLOSE: no response
                0x19 => {
                    let id = read_u32(body);
                    self.prepared.remove(&id);
                    self.cursors.remove(&id);
                    self.log_statement(format!("CLOSE {}", id));
                }
                // COM_STMT_RESET
                0x1a => {
                    let id = read_u32(body);
                    self.cursors.remove(&id);
                    self.log_statement(format!("RESET {}", id));
                    self.send_ok(0, 1)?;
                }
                // COM_INIT_DB, COM_PING, COM_RESET_CONNECTION
                0x02 | 0x0e | 0x1f => self.send_ok(0, 1)?,
                _ => self.send_err(1047, "08S01", "Unknown command", 1)?,
            }
        }
    }

    /// Check the handshake response. Returns false if access was denied.
    fn authenticate(&mut self) -> std::io::Result<bool> {
        let (_, response) = self.read_packet()?;
        let caps = u32::from_le_bytes([response[0], response[1], response[2], response[3]]);
        let rest = &response[32..];
        let user_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let user = &rest[..user_end];
        let rest = &rest[user_end + 1..];
        // auth responses here are always shorter than 251 bytes
        let len = usize::from(rest[0]);
        let auth = &rest[1..1 + len];
        let mut rest = &rest[1 + len..];
        if caps & CapabilityFlags::CLIENT_CONNECT_WITH_DB != 0 {
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            rest = &rest[(end + 1).min(rest.len())..];
        }
        let plugin = if caps & CapabilityFlags::CLIENT_PLUGIN_AUTH != 0 {
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            String::from_utf8_lossy(&rest[..end]).into_owned()
        } else {
            String::new()
        };

        let mut seq = 2;
        let expected = if plugin == "caching_sha2_password" {
            scramble_sha256(PASSWORD, NONCE)
        } else {
            scramble_native(PASSWORD, NONCE)
        };
        if user != USER.as_bytes() || auth != expected.as_slice() {
            self.send_err(1045, "28000", "Access denied", seq)?;
            return Ok(false);
        }
        if plugin == "caching_sha2_password" {
            // fast auth success
            self.send(&[0x01, 0x03], seq)?;
            seq += 1;
        }
        self.send_ok(0, seq)?;
        self.shared.plugins.lock().unwrap().push(plugin);

        if self.config.compress && caps & CapabilityFlags::CLIENT_COMPRESS != 0 {
            self.compressed = true;
            self.shared.compressed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(true)
    }

    fn log_statement(&self, entry: String) {
        self.shared.statements.lock().unwrap().push(entry);
    }

    fn prepare(&mut self, sql: &str, script: &Script) -> std::io::Result<()> {
        let num_params = sql.matches('?').count();
        let columns = match script(sql) {
            Reply::Rows { columns, .. } => columns,
            Reply::Err {
                code,
                state,
                message,
            } => return self.send_err(code, state, message, 1),
            _ => Vec::new(),
        };
        self.next_statement += 1;
        let id = self.next_statement;
        self.prepared.insert(id, (sql.to_owned(), num_params));

        let mut seq = 1u8;
        let mut wire = Vec::new();
        let mut ok = vec![0x00];
        ok.extend_from_slice(&id.to_le_bytes());
        ok.extend_from_slice(&(columns.len() as u16).to_le_bytes());
        ok.extend_from_slice(&(num_params as u16).to_le_bytes());
        ok.push(0);
        ok.extend_from_slice(&0u16.to_le_bytes());
        write_packets(&mut wire, &ok, &mut seq);
        if num_params > 0 {
            for _ in 0..num_params {
                write_packets(&mut wire, &column_definition("?", TYPE_VAR_STRING), &mut seq);
            }
            write_packets(&mut wire, &eof(STATUS_AUTOCOMMIT), &mut seq);
        }
        if !columns.is_empty() {
            for (name, ty) in &columns {
                write_packets(&mut wire, &column_definition(name, *ty), &mut seq);
            }
            write_packets(&mut wire, &eof(STATUS_AUTOCOMMIT), &mut seq);
        }
        self.write_wire(&wire)
    }

    /// Answer COM_STMT_EXECUTE. Returns false if the session should end.
    fn execute(&mut self, body: &[u8], script: &Script) -> std::io::Result<bool> {
        let id = read_u32(body);
        let Some((sql, num_params)) = self.prepared.get(&id).cloned() else {
            self.send_err(1243, "HY000", "Unknown prepared statement handler", 1)?;
            return Ok(true);
        };
        let cursor = body[4] & 0x01 != 0;
        let params = decode_params(&body[9..], num_params);
        self.log_statement(format!("EXECUTE {} [{}]", id, params.join(", ")));

        match script(&sql) {
            Reply::Ok { affected_rows } => self.send_ok(affected_rows, 1)?,
            Reply::Rows { columns, rows } if cursor => {
                let mut seq = 1u8;
                let mut wire = Vec::new();
                let mut count = Vec::new();
                push_lenenc_int(&mut count, columns.len() as u64);
                write_packets(&mut wire, &count, &mut seq);
                for (name, ty) in &columns {
                    write_packets(&mut wire, &column_definition(name, *ty), &mut seq);
                }
                write_packets(
                    &mut wire,
                    &eof(STATUS_AUTOCOMMIT | STATUS_CURSOR_EXISTS),
                    &mut seq,
                );
                self.write_wire(&wire)?;
                self.cursors.insert(
                    id,
                    Cursor {
                        columns,
                        rows: rows.into(),
                    },
                );
            }
            Reply::Rows { columns, rows } => self.send_rows(&columns, &rows, true)?,
            Reply::Err {
                code,
                state,
                message,
            } => self.send_err(code, state, message, 1)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn fetch(&mut self, body: &[u8]) -> std::io::Result<()> {
        let id = read_u32(body);
        let num_rows = read_u32(&body[4..]) as usize;
        self.log_statement(format!("FETCH {} {}", id, num_rows));
        let Some(cursor) = self.cursors.get_mut(&id) else {
            return self.send_err(1421, "HY000", "Statement has no open cursor", 1);
        };
        let mut seq = 1u8;
        let mut wire = Vec::new();
        let take = num_rows.min(cursor.rows.len());
        for row in cursor.rows.drain(..take) {
            write_packets(&mut wire, &binary_row(&cursor.columns, &row), &mut seq);
        }
        let mut status = STATUS_AUTOCOMMIT | STATUS_CURSOR_EXISTS;
        if cursor.rows.is_empty() {
            status |= STATUS_LAST_ROW_SENT;
        }
        write_packets(&mut wire, &eof(status), &mut seq);
        self.write_wire(&wire)
    }

    fn stall(&mut self) -> std::io::Result<()> {
        self.write_wire(&[0x05, 0x00])?;
        let mut sink = [0u8; 64];
        while self.stream.read(&mut sink)? > 0 {}
        Ok(())
    }

    fn local_infile(&mut self, file: &str) -> std::io::Result<()> {
        let mut request = vec![0xFB];
        request.extend_from_slice(file.as_bytes());
        self.send(&request, 1)?;
        let mut data = Vec::new();
        let last_seq = loop {
            let (seq, chunk) = self.read_packet()?;
            if chunk.is_empty() {
                break seq;
            }
            data.extend_from_slice(&chunk);
        };
        let lines = data.iter().filter(|&&b| b == b'\n').count() as u64;
        self.shared.uploads.lock().unwrap().push(data);
        self.send_ok(lines, last_seq.wrapping_add(1))
    }

    fn wait_for_kill(&self) {
        let mut killed = self.shared.killed.lock().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !killed.contains(&self.id) {
            let now = std::time::Instant::now();
            if now >= deadline {
                return;
            }
            killed = self.shared.kill_signal.wait_timeout(killed, deadline - now).unwrap().0;
        }
        killed.remove(&self.id);
    }

    fn send_ok(&mut self, affected_rows: u64, seq: u8) -> std::io::Result<()> {
        let mut payload = vec![0x00];
        push_lenenc_int(&mut payload, affected_rows);
        push_lenenc_int(&mut payload, 0);
        payload.extend_from_slice(&STATUS_AUTOCOMMIT.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        self.send(&payload, seq)
    }

    fn send_err(&mut self, code: u16, state: &str, message: &str, seq: u8) -> std::io::Result<()> {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&code.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(state.as_bytes());
        payload.extend_from_slice(message.as_bytes());
        self.send(&payload, seq)
    }

    fn send_rows(
        &mut self,
        columns: &[(&str, u8)],
        rows: &[Vec<Option<String>>],
        binary: bool,
    ) -> std::io::Result<()> {
        let mut seq = 1u8;
        let mut wire = Vec::new();
        let mut count = Vec::new();
        push_lenenc_int(&mut count, columns.len() as u64);
        write_packets(&mut wire, &count, &mut seq);
        for (name, ty) in columns {
            write_packets(&mut wire, &column_definition(name, *ty), &mut seq);
        }
        write_packets(&mut wire, &eof(STATUS_AUTOCOMMIT), &mut seq);
        for row in rows {
            let payload = if binary {
                binary_row(columns, row)
            } else {
                text_row(row)
            };
            write_packets(&mut wire, &payload, &mut seq);
        }
        write_packets(&mut wire, &eof(STATUS_AUTOCOMMIT), &mut seq);
        self.write_wire(&wire)
    }

    fn send(&mut self, payload: &[u8], seq: u8) -> std::io::Result<()> {
        let mut wire = Vec::new();
        let mut seq = seq;
        write_packets(&mut wire, payload, &mut seq);
        self.write_wire(&wire)
    }

    fn write_wire(&mut self, wire: &[u8]) -> std::io::Result<()> {
        if self.compressed {
            let mut frames = Vec::new();
            compress_frames(wire, &mut self.frame_seq, &mut frames)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            self.stream.write_all(&frames)?;
        } else {
            self.stream.write_all(wire)?;
        }
        self.stream.flush()
    }

    fn read_logical(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        if !self.compressed {
            return self.stream.read_exact(buf);
        }
        while self.inflated.len() < buf.len() {
            let mut header = [0u8; COMPRESSED_HEADER_LEN];
            self.stream.read_exact(&mut header)?;
            let header = *CompressedHeader::parse(&header)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let mut body = vec![0u8; header.compressed_length()];
            self.stream.read_exact(&mut body)?;
            self.frame_seq = header.sequence_id.wrapping_add(1);
            decompress_frame(&header, &body, &mut self.inflated)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        buf.copy_from_slice(&self.inflated[..buf.len()]);
        self.inflated.drain(..buf.len());
        Ok(())
    }

    fn read_packet(&mut self) -> std::io::Result<(u8, Vec<u8>)> {
        let mut header = [0u8; 4];
        self.read_logical(&mut header)?;
        let len = usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
        let mut payload = vec![0u8; len];
        self.read_logical(&mut payload)?;
        Ok((header[3], payload))
    }
}

fn push_lenenc_int(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=250 => out.push(value as u8),
        251..=0xFFFF => {
            out.push(0xFC);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xFF_FFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
        }
        _ => {
            out.push(0xFE);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

fn column_definition(name: &str, ty: u8) -> Vec<u8> {
    let mut out = Vec::new();
    for field in ["def", "", "", "", name, name] {
        push_lenenc_int(&mut out, field.len() as u64);
        out.extend_from_slice(field.as_bytes());
    }
    out.push(0x0c);
    out.extend_from_slice(&33u16.to_le_bytes());
    out.extend_from_slice(&1024u32.to_le_bytes());
    out.push(ty);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&[0, 0]);
    out
}

fn eof(status: u16) -> Vec<u8> {
    let mut out = vec![0xFE];
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&status.to_le_bytes());
    out
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn text_row(row: &[Option<String>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for value in row {
        match value {
            Some(v) => {
                push_lenenc_int(&mut payload, v.len() as u64);
                payload.extend_from_slice(v.as_bytes());
            }
            None => payload.push(0xFB),
        }
    }
    payload
}

fn binary_row(columns: &[(&str, u8)], row: &[Option<String>]) -> Vec<u8> {
    let mut payload = vec![0x00];
    let bitmap_start = payload.len();
    payload.resize(bitmap_start + (columns.len() + 7 + 2) / 8, 0);
    for (i, ((_, ty), value)) in columns.iter().zip(row).enumerate() {
        match value {
            None => payload[bitmap_start + (i + 2) / 8] |= 1 << ((i + 2) % 8),
            Some(v) if *ty == TYPE_LONGLONG => {
                let n: i64 = v.parse().unwrap();
                payload.extend_from_slice(&n.to_le_bytes());
            }
            Some(v) => {
                push_lenenc_int(&mut payload, v.len() as u64);
                payload.extend_from_slice(v.as_bytes());
            }
        }
    }
    payload
}

fn read_lenenc_int(bytes: &[u8]) -> (u64, &[u8]) {
    match bytes[0] {
        0xFC => (u64::from(u16::from_le_bytes([bytes[1], bytes[2]])), &bytes[3..]),
        0xFD => (
            u64::from(u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0])),
            &bytes[4..],
        ),
        0xFE => {
            let mut n = [0u8; 8];
            n.copy_from_slice(&bytes[1..9]);
            (u64::from_le_bytes(n), &bytes[9..])
        }
        n => (u64::from(n), &bytes[1..]),
    }
}

/// Render COM_STMT_EXECUTE parameters as text, `NULL` for nulls.
fn decode_params(body: &[u8], num_params: usize) -> Vec<String> {
    if num_params == 0 {
        return Vec::new();
    }
    let bitmap = &body[..num_params.div_ceil(8)];
    let rest = &body[bitmap.len()..];
    // new-params-bound flag, then two type bytes per parameter
    let types = &rest[1..1 + 2 * num_params];
    let mut values = &rest[1 + 2 * num_params..];
    let mut out = Vec::with_capacity(num_params);
    for i in 0..num_params {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            out.push("NULL".to_owned());
            continue;
        }
        let unsigned = types[2 * i + 1] & 0x80 != 0;
        let width = match types[2 * i] {
            0x01 => 1,
            0x02 => 2,
            0x03 => 4,
            0x08 => 8,
            _ => 0,
        };
        if width > 0 {
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(&values[..width]);
            // sign-extend signed values
            if !unsigned && values[width - 1] & 0x80 != 0 {
                raw[width..].fill(0xFF);
            }
            let text = if unsigned {
                u64::from_le_bytes(raw).to_string()
            } else {
                i64::from_le_bytes(raw).to_string()
            };
            out.push(text);
            values = &values[width..];
        } else {
            let (len, rest) = read_lenenc_int(values);
            let len = len as usize;
            out.push(String::from_utf8_lossy(&rest[..len]).into_owned());
            values = &rest[len..];
        }
    }
    out
}

/// Answers shared by most tests.
pub fn standard_script(sql: &str) -> Reply {
    match sql {
        "SELECT 1" => Reply::single("1", TYPE_LONGLONG, "1"),
        "SELECT 1/0" => Reply::Err {
            code: 1365,
            state: "22012",
            message: "Division by 0",
        },
        "SELECT SLEEP(10)" => Reply::WaitForKill,
        "BOOM" => Reply::Close,
        "SELECT REPEAT('a', 10000)" => Reply::single("r", TYPE_VAR_STRING, &"a".repeat(10_000)),
        "SELECT id, name FROM users" | "SELECT id, name FROM users WHERE id > ?" => Reply::Rows {
            columns: vec![("id", TYPE_LONGLONG), ("name", TYPE_VAR_STRING)],
            rows: vec![
                vec![Some("1".into()), Some("alice".into())],
                vec![Some("2".into()), None],
            ],
        },
        "UPDATE users SET name = ? WHERE id = ?" => Reply::Ok { affected_rows: 1 },
        "STALL" => Reply::Stall,
        _ => Reply::ok(),
    }
}
