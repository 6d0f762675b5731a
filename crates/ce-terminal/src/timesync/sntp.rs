//! Minimal SNTP (RFC 4330) client

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use ce_core::error::SyncFailure;
use ce_core::time::current_time_millis;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

const PACKET_LEN: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client)
const CLIENT_HEADER: u8 = 0x23;

const MODE_SERVER: u8 = 4;

const DEFAULT_PORT: u16 = 123;

/// Something that can tell how far the local clock is off
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Offset in milliseconds to add to the local clock
    async fn offset(&self, server: &str, timeout: Duration) -> Result<i64, SyncFailure>;
}

/// SNTP over UDP
#[derive(Debug, Clone)]
pub struct SntpClient {
    port: u16,
}

impl Default for SntpClient {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl SntpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a non-standard port for servers given without one
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }

    fn address(&self, server: &str) -> String {
        if server.contains(':') {
            server.to_string()
        } else {
            format!("{}:{}", server, self.port)
        }
    }
}

#[async_trait]
impl TimeSource for SntpClient {
    async fn offset(&self, server: &str, timeout: Duration) -> Result<i64, SyncFailure> {
        let io_error = |source| SyncFailure::Io {
            server: server.to_string(),
            source,
        };

        let address = self.address(server);
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(io_error)?;

        let exchange = async {
            socket.connect(&address).await?;
            let sent_at = current_time_millis();
            socket.send(&request_packet(sent_at)).await?;
            let mut reply = [0u8; PACKET_LEN];
            let len = socket.recv(&mut reply).await?;
            Ok::<_, std::io::Error>((sent_at, reply, len, current_time_millis()))
        };

        let (sent_at, reply, len, received_at) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| SyncFailure::Timeout {
                server: server.to_string(),
            })?
            .map_err(io_error)?;

        parse_reply(&reply[..len], sent_at, received_at).map_err(|reason| SyncFailure::Malformed {
            server: server.to_string(),
            reason,
        })
    }
}

fn unix_millis_to_ntp(millis: u64) -> (u32, u32) {
    let secs = (millis / 1000) as i64 + NTP_UNIX_OFFSET_SECS;
    let frac = ((millis % 1000) << 32) / 1000;
    (secs as u32, frac as u32)
}

fn ntp_to_unix_millis(secs: u32, frac: u32) -> i64 {
    (secs as i64 - NTP_UNIX_OFFSET_SECS) * 1000 + (((frac as u64) * 1000) >> 32) as i64
}

fn read_timestamp(packet: &[u8], at: usize) -> (u32, u32) {
    let word = |i: usize| u32::from_be_bytes([packet[i], packet[i + 1], packet[i + 2], packet[i + 3]]);
    (word(at), word(at + 4))
}

/// Client request carrying `sent_at` as transmit timestamp
pub(crate) fn request_packet(sent_at: u64) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    let (secs, frac) = unix_millis_to_ntp(sent_at);
    packet[40..44].copy_from_slice(&secs.to_be_bytes());
    packet[44..48].copy_from_slice(&frac.to_be_bytes());
    packet
}

/// Clock offset from a server reply: `((T2 - T1) + (T3 - T4)) / 2`.
///
/// The reply must echo our transmit timestamp as its originate timestamp;
/// anything else is a late answer to an earlier request or forged.
pub(crate) fn parse_reply(packet: &[u8], sent_at: u64, received_at: u64) -> Result<i64, String> {
    if packet.len() < PACKET_LEN {
        return Err(format!("short packet ({} bytes)", packet.len()));
    }
    if read_timestamp(packet, 24) != unix_millis_to_ntp(sent_at) {
        return Err("originate timestamp does not match request".to_string());
    }
    let mode = packet[0] & 0x07;
    if mode != MODE_SERVER {
        return Err(format!("unexpected mode {}", mode));
    }
    if packet[1] == 0 {
        return Err("kiss-of-death (stratum 0)".to_string());
    }

    let (rx_secs, rx_frac) = read_timestamp(packet, 32);
    let (tx_secs, tx_frac) = read_timestamp(packet, 40);
    if tx_secs == 0 {
        return Err("missing transmit timestamp".to_string());
    }

    let t1 = sent_at as i64;
    let t2 = ntp_to_unix_millis(rx_secs, rx_frac);
    let t3 = ntp_to_unix_millis(tx_secs, tx_frac);
    let t4 = received_at as i64;
    Ok(((t2 - t1) + (t3 - t4)) / 2)
}
