//! MariaDB replication client.
//!
//! Implements the slice of the MySQL wire protocol a replica needs: the
//! handshake with `mysql_native_password`, COM_QUERY with text result sets
//! for the catalog queries, COM_REGISTER_SLAVE and COM_BINLOG_DUMP, and the
//! framing and decoding of the binlog event stream.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use secrecy::ExposeSecret;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use cdc_config::shared::MariadbConfig;

use crate::codec::Reader;
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::source::{ReplicationConnector, ReplicationStream, session_setup};
use crate::types::{
    Event, EventData, GtidEvent, GtidList, QueryEvent, RowsEvent, RowsKind, TableMapEvent,
    XidEvent,
};
use crate::{bail, cdc_error};

const COM_QUERY: u8 = 0x03;
const COM_REGISTER_SLAVE: u8 = 0x15;
const COM_BINLOG_DUMP: u8 = 0x12;

/// Binlog event type codes consumed by the replicator. MariaDB's GTID event
/// lives in its private type range.
const QUERY_EVENT: u8 = 0x02;
const FORMAT_DESCRIPTION_EVENT: u8 = 0x0f;
const XID_EVENT: u8 = 0x10;
const TABLE_MAP_EVENT: u8 = 0x13;
const WRITE_ROWS_EVENT_V1: u8 = 0x17;
const UPDATE_ROWS_EVENT_V1: u8 = 0x18;
const DELETE_ROWS_EVENT_V1: u8 = 0x19;
const MARIADB_GTID_EVENT: u8 = 0xa2;

const EVENT_HEADER_LEN: usize = 19;
const MAX_PACKET_PAYLOAD: usize = 0xff_ffff;

const NATIVE_AUTH_PLUGIN: &str = "mysql_native_password";

/// CLIENT_PROTOCOL_41, CLIENT_LONG_PASSWORD, CLIENT_LONG_FLAG,
/// CLIENT_TRANSACTIONS, CLIENT_SECURE_CONNECTION and CLIENT_PLUGIN_AUTH.
/// Notably not CLIENT_DEPRECATE_EOF: result sets keep their EOF delimiters,
/// which the text-protocol reader relies on.
const CLIENT_CAPABILITIES: u32 = 0x0000_0001 | 0x0000_0004 | 0x0000_0200 | 0x0000_2000
    | 0x0000_8000
    | 0x0008_0000;

/// [`ReplicationConnector`] for a MariaDB primary.
///
/// Catalog queries share one lazily opened control connection; each
/// replication channel gets a dedicated connection that is consumed by the
/// binlog dump.
pub struct MariaDbConnector {
    config: MariadbConfig,
    control: Mutex<Option<Connection>>,
}

impl MariaDbConnector {
    pub fn new(config: MariadbConfig) -> Self {
        Self {
            config,
            control: Mutex::new(None),
        }
    }

    async fn control_query(&self, sql: &str) -> CdcResult<Vec<Vec<Option<String>>>> {
        let mut guard = self.control.lock().await;

        if guard.is_none() {
            *guard = Some(Connection::connect(&self.config).await?);
        }
        let Some(conn) = guard.as_mut() else {
            bail!(ErrorKind::ConnectionFailed, "control connection unavailable");
        };

        match conn.query_rows(sql).await {
            Ok(rows) => Ok(rows),
            Err(err) => {
                // Drop the connection so the next catalog query reconnects.
                *guard = None;
                Err(err)
            }
        }
    }
}

impl ReplicationConnector for MariaDbConnector {
    type Stream = MariaDbStream;

    async fn list_binlogs(&self) -> CdcResult<Vec<String>> {
        let rows = self.control_query("SHOW BINARY LOGS").await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                if row.is_empty() {
                    None
                } else {
                    row.swap_remove(0)
                }
            })
            .collect())
    }

    async fn gtid_pos_at(&self, binlog: &str) -> CdcResult<GtidList> {
        let escaped = binlog.replace('\'', "''");
        let sql = format!("SELECT BINLOG_GTID_POS('{escaped}', 4)");
        let rows = self.control_query(&sql).await?;

        let position = rows
            .first()
            .and_then(|row| row.first())
            .and_then(|value| value.as_deref())
            .unwrap_or_default();

        position.parse().map_err(|_| {
            cdc_error!(
                ErrorKind::ProtocolViolation,
                "upstream returned an unparsable gtid position",
                format!("`{position}` for binlog {binlog}")
            )
        })
    }

    async fn start_replication(&self, start: &GtidList) -> CdcResult<Self::Stream> {
        let mut conn = Connection::connect(&self.config).await?;

        for statement in session_setup(start) {
            conn.query_drop(&statement).await?;
        }

        conn.register_slave(self.config.server_id).await?;
        conn.binlog_dump(self.config.server_id).await?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            start = %start,
            "replication channel open"
        );

        Ok(MariaDbStream {
            conn,
            checksummed: false,
        })
    }
}

/// An open binlog dump connection.
pub struct MariaDbStream {
    conn: Connection,
    /// Whether events carry a CRC32 trailer; learned from the format
    /// description event.
    checksummed: bool,
}

impl ReplicationStream for MariaDbStream {
    async fn fetch_event(&mut self) -> CdcResult<Option<Event>> {
        let Some(frame) = self.conn.read_event_frame().await? else {
            return Ok(None);
        };

        if frame.len() < EVENT_HEADER_LEN {
            bail!(
                ErrorKind::ProtocolViolation,
                "binlog event shorter than its header",
                frame.len()
            );
        }

        let event_type = frame[4];
        let server_id = u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]);
        let mut payload = frame.slice(EVENT_HEADER_LEN..);

        if event_type == FORMAT_DESCRIPTION_EVENT {
            // The byte before the format description's own CRC32 announces
            // the checksum algorithm for the rest of the stream.
            if payload.len() >= 5 {
                self.checksummed = payload[payload.len() - 5] == 0x01;
            }
            debug!(checksummed = self.checksummed, "format description received");
            return Ok(Some(Event::new(server_id, EventData::Other)));
        }

        if self.checksummed && payload.len() >= 4 {
            payload = payload.slice(..payload.len() - 4);
        }

        let data = decode_event(event_type, payload)?;
        Ok(Some(Event::new(server_id, data)))
    }
}

fn decode_event(event_type: u8, payload: Bytes) -> CdcResult<EventData> {
    match event_type {
        MARIADB_GTID_EVENT => decode_gtid(payload),
        XID_EVENT => decode_xid(payload),
        QUERY_EVENT => decode_query(payload),
        TABLE_MAP_EVENT => decode_table_map(payload),
        WRITE_ROWS_EVENT_V1 => decode_rows(payload, RowsKind::Write),
        UPDATE_ROWS_EVENT_V1 => decode_rows(payload, RowsKind::Update),
        DELETE_ROWS_EVENT_V1 => decode_rows(payload, RowsKind::Delete),
        _ => Ok(EventData::Other),
    }
}

fn decode_gtid(payload: Bytes) -> CdcResult<EventData> {
    let mut reader = Reader::new(&payload);
    let sequence_nr = reader.u64_le()?;
    let domain_id = reader.u32_le()?;
    let flags = reader.u8()?;

    Ok(EventData::Gtid(GtidEvent {
        domain_id,
        sequence_nr,
        flags,
    }))
}

fn decode_xid(payload: Bytes) -> CdcResult<EventData> {
    let mut reader = Reader::new(&payload);
    let transaction_nr = reader.u64_le()?;

    Ok(EventData::Xid(XidEvent { transaction_nr }))
}

fn decode_query(payload: Bytes) -> CdcResult<EventData> {
    let mut reader = Reader::new(&payload);
    let _thread_id = reader.u32_le()?;
    let _exec_time = reader.u32_le()?;
    let schema_len = reader.u8()? as usize;
    let _error_code = reader.u16_le()?;
    let status_len = reader.u16_le()? as usize;
    reader.skip(status_len)?;
    let database = reader.string(schema_len)?;
    reader.skip(1)?;
    let statement = reader.rest_string();

    Ok(EventData::Query(QueryEvent {
        database,
        statement,
    }))
}

fn decode_table_map(payload: Bytes) -> CdcResult<EventData> {
    let mut reader = Reader::new(&payload);
    let table_id = reader.u48_le()?;
    let _flags = reader.u16_le()?;

    let schema_len = reader.u8()? as usize;
    let database = reader.string(schema_len)?;
    reader.skip(1)?;

    let table_len = reader.u8()? as usize;
    let table = reader.string(table_len)?;
    reader.skip(1)?;

    let column_count = reader.lenenc_int()? as usize;
    let column_types = reader.bytes(column_count)?.to_vec();

    let metadata_len = reader.lenenc_int()? as usize;
    let column_metadata = Bytes::copy_from_slice(reader.bytes(metadata_len)?);
    // The trailing null bitmap is not needed for routing or decoding.

    Ok(EventData::TableMap(TableMapEvent {
        table_id,
        database,
        table,
        column_types,
        column_metadata,
    }))
}

fn decode_rows(payload: Bytes, kind: RowsKind) -> CdcResult<EventData> {
    let mut reader = Reader::new(&payload);
    let table_id = reader.u48_le()?;
    let _flags = reader.u16_le()?;

    // Everything from the column count onwards stays encoded; the table
    // writer owns the schema needed to decode it.
    let rows = payload.slice(payload.len() - reader.remaining()..);

    let data = RowsEvent {
        table_id,
        kind,
        payload: rows,
    };

    Ok(match kind {
        RowsKind::Write => EventData::WriteRows(data),
        RowsKind::Update => EventData::UpdateRows(data),
        RowsKind::Delete => EventData::DeleteRows(data),
    })
}

/// One MySQL-protocol connection.
struct Connection {
    stream: BufReader<TcpStream>,
    sequence: u8,
}

impl Connection {
    async fn connect(config: &MariadbConfig) -> CdcResult<Self> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|err| {
                cdc_error!(
                    ErrorKind::ConnectionFailed,
                    "failed to reach the upstream server",
                    format!("{}:{}", config.host, config.port)
                )
                .with_source(err)
            })?;

        let mut conn = Self {
            stream: BufReader::new(stream),
            sequence: 0,
        };

        let handshake_packet = conn.read_packet().await?;
        let handshake = Handshake::parse(&handshake_packet)?;
        debug!(
            server_version = %handshake.server_version,
            auth_plugin = %handshake.auth_plugin,
            "handshake received"
        );

        conn.authenticate(config, &handshake).await?;

        Ok(conn)
    }

    async fn authenticate(
        &mut self,
        config: &MariadbConfig,
        handshake: &Handshake,
    ) -> CdcResult<()> {
        let password = config.password.expose_secret();
        let scrambled = scramble_native_password(password, &handshake.auth_data);

        let mut response = BytesMut::with_capacity(128);
        response.put_u32_le(CLIENT_CAPABILITIES);
        response.put_u32_le(MAX_PACKET_PAYLOAD as u32);
        // latin1, matching the session setup issued before replication.
        response.put_u8(8);
        response.put_slice(&[0u8; 23]);
        response.put_slice(config.user.as_bytes());
        response.put_u8(0);
        response.put_u8(scrambled.len() as u8);
        response.put_slice(&scrambled);
        response.put_slice(NATIVE_AUTH_PLUGIN.as_bytes());
        response.put_u8(0);

        self.write_packet(&response).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(0x00) => Ok(()),
            Some(0xfe) => {
                // Auth switch request. Re-scramble against the new nonce if
                // the server still wants the native plugin.
                let (plugin, nonce) = parse_auth_switch(&reply)?;
                if plugin != NATIVE_AUTH_PLUGIN {
                    bail!(
                        ErrorKind::AuthenticationFailed,
                        "upstream requires an unsupported auth plugin",
                        plugin
                    );
                }

                let scrambled = scramble_native_password(password, &nonce);
                self.write_packet(&scrambled).await?;

                let reply = self.read_packet().await?;
                match reply.first() {
                    Some(0x00) => Ok(()),
                    Some(0xff) => Err(server_error(&reply, ErrorKind::AuthenticationFailed)),
                    _ => Err(cdc_error!(
                        ErrorKind::ProtocolViolation,
                        "unexpected auth switch reply"
                    )),
                }
            }
            Some(0xff) => Err(server_error(&reply, ErrorKind::AuthenticationFailed)),
            _ => Err(cdc_error!(
                ErrorKind::ProtocolViolation,
                "unexpected authentication reply"
            )),
        }
    }

    /// Runs a statement, draining any result set it produces.
    async fn query_drop(&mut self, sql: &str) -> CdcResult<()> {
        self.send_command(COM_QUERY, sql.as_bytes()).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(0x00) => Ok(()),
            Some(0xff) => Err(server_error(&reply, ErrorKind::QueryFailed)),
            _ => {
                self.drain_result_set(&reply).await?;
                Ok(())
            }
        }
    }

    /// Runs a statement and collects its text-protocol result rows. `None`
    /// cells are SQL NULLs.
    async fn query_rows(&mut self, sql: &str) -> CdcResult<Vec<Vec<Option<String>>>> {
        self.send_command(COM_QUERY, sql.as_bytes()).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(0x00) => Ok(Vec::new()),
            Some(0xff) => Err(server_error(&reply, ErrorKind::QueryFailed)),
            _ => {
                let mut reader = Reader::new(&reply);
                let column_count = reader.lenenc_int()? as usize;
                self.skip_column_definitions(column_count).await?;

                let mut rows = Vec::new();
                loop {
                    let packet = self.read_packet().await?;
                    if is_eof_packet(&packet) {
                        break;
                    }
                    if packet.first() == Some(&0xff) {
                        return Err(server_error(&packet, ErrorKind::QueryFailed));
                    }
                    rows.push(parse_text_row(&packet, column_count)?);
                }

                Ok(rows)
            }
        }
    }

    async fn skip_column_definitions(&mut self, column_count: usize) -> CdcResult<()> {
        for _ in 0..column_count {
            self.read_packet().await?;
        }
        // The EOF packet that terminates the column definitions.
        let packet = self.read_packet().await?;
        if !is_eof_packet(&packet) {
            bail!(
                ErrorKind::ProtocolViolation,
                "expected eof after column definitions"
            );
        }
        Ok(())
    }

    async fn drain_result_set(&mut self, first: &Bytes) -> CdcResult<()> {
        let mut reader = Reader::new(first);
        let column_count = reader.lenenc_int()? as usize;
        self.skip_column_definitions(column_count).await?;

        loop {
            let packet = self.read_packet().await?;
            if is_eof_packet(&packet) {
                return Ok(());
            }
            if packet.first() == Some(&0xff) {
                return Err(server_error(&packet, ErrorKind::QueryFailed));
            }
        }
    }

    async fn register_slave(&mut self, server_id: u32) -> CdcResult<()> {
        let mut payload = BytesMut::with_capacity(17);
        payload.put_u32_le(server_id);
        payload.put_u8(0); // hostname length
        payload.put_u8(0); // user length
        payload.put_u8(0); // password length
        payload.put_u16_le(0); // port
        payload.put_u32_le(0); // replication rank
        payload.put_u32_le(0); // master id

        self.send_command(COM_REGISTER_SLAVE, &payload).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(0x00) => Ok(()),
            Some(0xff) => Err(server_error(&reply, ErrorKind::QueryFailed)),
            _ => Err(cdc_error!(
                ErrorKind::ProtocolViolation,
                "unexpected reply to slave registration"
            )),
        }
    }

    /// Requests the binlog dump. The position is fixed at 4 (right after the
    /// file magic) and the file name is left empty: the GTID connect state
    /// set during session setup selects the actual position.
    async fn binlog_dump(&mut self, server_id: u32) -> CdcResult<()> {
        let mut payload = BytesMut::with_capacity(11);
        payload.put_u32_le(4);
        payload.put_u16_le(0);
        payload.put_u32_le(server_id);

        self.send_command(COM_BINLOG_DUMP, &payload).await
    }

    /// Reads one frame of the binlog stream. `None` means the upstream
    /// terminated the dump.
    async fn read_event_frame(&mut self) -> CdcResult<Option<Bytes>> {
        let packet = self.read_packet().await?;

        match packet.first() {
            Some(0x00) => Ok(Some(packet.slice(1..))),
            Some(0xfe) if packet.len() < 9 => Ok(None),
            Some(0xff) => Err(server_error(&packet, ErrorKind::ProtocolViolation)),
            _ => Err(cdc_error!(
                ErrorKind::ProtocolViolation,
                "unexpected frame in binlog stream"
            )),
        }
    }

    async fn send_command(&mut self, command: u8, payload: &[u8]) -> CdcResult<()> {
        self.sequence = 0;
        let mut packet = BytesMut::with_capacity(payload.len() + 1);
        packet.put_u8(command);
        packet.put_slice(payload);
        self.write_packet(&packet).await
    }

    async fn read_packet(&mut self) -> CdcResult<Bytes> {
        let mut payload = BytesMut::new();

        loop {
            let mut header = [0u8; 4];
            self.stream
                .read_exact(&mut header)
                .await
                .map_err(connection_lost)?;

            let len = usize::from(header[0])
                | usize::from(header[1]) << 8
                | usize::from(header[2]) << 16;
            self.sequence = header[3].wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .await
                .map_err(connection_lost)?;

            // Payloads of exactly 16MB - 1 continue in the next packet.
            if len < MAX_PACKET_PAYLOAD {
                return Ok(payload.freeze());
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) -> CdcResult<()> {
        if payload.len() >= MAX_PACKET_PAYLOAD {
            bail!(
                ErrorKind::ProtocolViolation,
                "outgoing packet exceeds the protocol limit",
                payload.len()
            );
        }

        let mut packet = BytesMut::with_capacity(payload.len() + 4);
        packet.put_u8((payload.len() & 0xff) as u8);
        packet.put_u8(((payload.len() >> 8) & 0xff) as u8);
        packet.put_u8(((payload.len() >> 16) & 0xff) as u8);
        packet.put_u8(self.sequence);
        packet.put_slice(payload);

        self.stream
            .get_mut()
            .write_all(&packet)
            .await
            .map_err(connection_lost)?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(connection_lost)?;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(())
    }
}

fn connection_lost(err: io::Error) -> CdcError {
    cdc_error!(ErrorKind::ConnectionLost, "upstream connection dropped").with_source(err)
}

fn server_error(packet: &Bytes, kind: ErrorKind) -> CdcError {
    // ERR packet: 0xff, code u16, '#' + 5-byte sql state, message.
    let code = if packet.len() >= 3 {
        u16::from_le_bytes([packet[1], packet[2]])
    } else {
        0
    };
    let message = if packet.len() > 9 {
        String::from_utf8_lossy(&packet[9..]).into_owned()
    } else {
        String::new()
    };

    cdc_error!(kind, "upstream reported an error", format!("{code}: {message}"))
}

fn is_eof_packet(packet: &Bytes) -> bool {
    packet.first() == Some(&0xfe) && packet.len() < 9
}

struct Handshake {
    server_version: String,
    auth_plugin: String,
    auth_data: Vec<u8>,
}

impl Handshake {
    fn parse(packet: &Bytes) -> CdcResult<Self> {
        let mut reader = Reader::new(packet);

        let protocol_version = reader.u8()?;
        if protocol_version != 10 {
            bail!(
                ErrorKind::ProtocolViolation,
                "unsupported handshake protocol version",
                protocol_version
            );
        }

        let server_version = reader.null_terminated_string()?;
        let _connection_id = reader.u32_le()?;
        let mut auth_data = reader.bytes(8)?.to_vec();
        reader.skip(1)?; // filler
        let _capabilities_low = reader.u16_le()?;
        let _character_set = reader.u8()?;
        let _status = reader.u16_le()?;
        let _capabilities_high = reader.u16_le()?;
        let auth_data_len = reader.u8()? as usize;
        reader.skip(10)?; // reserved

        // The second half of the nonce, null-terminated.
        let part2_len = auth_data_len.saturating_sub(8).max(13);
        let mut part2 = reader.bytes(part2_len)?.to_vec();
        if let Some(null) = part2.iter().position(|&b| b == 0) {
            part2.truncate(null);
        }
        auth_data.extend_from_slice(&part2);

        let auth_plugin = reader.null_terminated_string().unwrap_or_default();

        Ok(Self {
            server_version,
            auth_plugin,
            auth_data,
        })
    }
}

fn parse_auth_switch(packet: &Bytes) -> CdcResult<(String, Vec<u8>)> {
    let mut reader = Reader::new(packet);
    reader.skip(1)?;
    let plugin = reader.null_terminated_string()?;
    let mut nonce = reader.rest().to_vec();
    if nonce.last() == Some(&0) {
        nonce.pop();
    }

    Ok((plugin, nonce))
}

/// `SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))`, the
/// `mysql_native_password` scramble. Empty passwords send an empty reply.
fn scramble_native_password(password: &str, nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

fn parse_text_row(packet: &Bytes, column_count: usize) -> CdcResult<Vec<Option<String>>> {
    let mut reader = Reader::new(packet);
    let mut row = Vec::with_capacity(column_count);

    for _ in 0..column_count {
        if reader.peek() == Some(0xfb) {
            reader.skip(1)?;
            row.push(None);
        } else {
            let len = reader.lenenc_int()? as usize;
            row.push(Some(reader.string(len)?));
        }
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_scramble_has_sha1_width() {
        let nonce = b"aaaaaaaabbbbbbbbbbbb";

        assert_eq!(scramble_native_password("secret", nonce).len(), 20);
        assert!(scramble_native_password("", nonce).is_empty());
        // Different nonces must yield different scrambles.
        assert_ne!(
            scramble_native_password("secret", b"aaaaaaaabbbbbbbbbbbb"),
            scramble_native_password("secret", b"ccccccccdddddddddddd"),
        );
    }

    #[test]
    fn gtid_event_decodes_domain_sequence_and_flags() {
        let mut payload = BytesMut::new();
        payload.put_u64_le(42);
        payload.put_u32_le(3);
        payload.put_u8(0x01);

        let data = decode_event(MARIADB_GTID_EVENT, payload.freeze()).unwrap();

        let EventData::Gtid(gtid) = data else {
            panic!("expected a gtid event");
        };
        assert_eq!(gtid.sequence_nr, 42);
        assert_eq!(gtid.domain_id, 3);
        assert!(gtid.is_implicit_commit());
    }

    #[test]
    fn query_event_decodes_schema_and_statement() {
        let mut payload = BytesMut::new();
        payload.put_u32_le(7); // thread id
        payload.put_u32_le(0); // exec time
        payload.put_u8(2); // schema length
        payload.put_u16_le(0); // error code
        payload.put_u16_le(3); // status vars length
        payload.put_slice(&[0, 0, 0]); // status vars
        payload.put_slice(b"db");
        payload.put_u8(0);
        payload.put_slice(b"CREATE TABLE t1 (id INT)");

        let data = decode_event(QUERY_EVENT, payload.freeze()).unwrap();

        let EventData::Query(query) = data else {
            panic!("expected a query event");
        };
        assert_eq!(query.database, "db");
        assert_eq!(query.statement, "CREATE TABLE t1 (id INT)");
    }

    #[test]
    fn table_map_event_decodes_identity_and_schema() {
        let mut payload = BytesMut::new();
        payload.put_slice(&[10, 0, 0, 0, 0, 0]); // table id
        payload.put_u16_le(1); // flags
        payload.put_u8(2);
        payload.put_slice(b"db");
        payload.put_u8(0);
        payload.put_u8(2);
        payload.put_slice(b"t1");
        payload.put_u8(0);
        payload.put_u8(2); // column count
        payload.put_slice(&[0x03, 0x0f]); // LONG, VARCHAR
        payload.put_u8(2); // metadata length
        payload.put_slice(&[0xff, 0x00]); // varchar max length 255
        payload.put_u8(0); // null bitmap

        let data = decode_event(TABLE_MAP_EVENT, payload.freeze()).unwrap();

        let EventData::TableMap(map) = data else {
            panic!("expected a table map event");
        };
        assert_eq!(map.table_id, 10);
        assert_eq!(map.database, "db");
        assert_eq!(map.table, "t1");
        assert_eq!(map.column_types, vec![0x03, 0x0f]);
        assert_eq!(&map.column_metadata[..], &[0xff, 0x00]);
    }

    #[test]
    fn rows_event_keeps_the_images_encoded() {
        let mut payload = BytesMut::new();
        payload.put_slice(&[10, 0, 0, 0, 0, 0]); // table id
        payload.put_u16_le(1); // flags
        payload.put_slice(&[0x01, 0xff, 0x00, 0x2a]); // opaque row body

        let data = decode_event(WRITE_ROWS_EVENT_V1, payload.freeze()).unwrap();

        let EventData::WriteRows(rows) = data else {
            panic!("expected a write rows event");
        };
        assert_eq!(rows.table_id, 10);
        assert_eq!(rows.kind, RowsKind::Write);
        assert_eq!(&rows.payload[..], &[0x01, 0xff, 0x00, 0x2a]);
    }

    #[test]
    fn unknown_event_types_are_opaque() {
        let data = decode_event(0x1b, Bytes::from_static(&[1, 2, 3])).unwrap();

        assert_eq!(data, EventData::Other);
    }

    #[test]
    fn truncated_events_are_protocol_violations() {
        let err = decode_event(MARIADB_GTID_EVENT, Bytes::from_static(&[1, 2])).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn text_rows_decode_nulls_and_values() {
        let mut packet = BytesMut::new();
        packet.put_u8(0x07);
        packet.put_slice(b"bin.001");
        packet.put_u8(0xfb);

        let row = parse_text_row(&packet.freeze(), 2).unwrap();

        assert_eq!(row[0].as_deref(), Some("bin.001"));
        assert_eq!(row[1], None);
    }

    #[test]
    fn eof_packets_are_recognized() {
        assert!(is_eof_packet(&Bytes::from_static(&[0xfe, 0, 0, 2, 0])));
        assert!(!is_eof_packet(&Bytes::from_static(&[0x00, 0, 0])));
        // A large packet starting with 0xfe is a row, not an EOF.
        assert!(!is_eof_packet(&Bytes::from_static(&[
            0xfe, 1, 2, 3, 4, 5, 6, 7, 8, 9
        ])));
    }
}
