//! # Credential Retrieval Module
//!
//! Recovers the robot's MQTT password through an undocumented TLS side
//! channel on the MQTT port. The robot only releases the credential while it
//! sits on its dock in pairing mode (HOME button held until the tone series
//! plays), so every failure mode here — refused connection, timeout, the
//! cloud-only sentinel — is an expected outcome, reported as `None` rather
//! than an error. Callers fall back to manual credential entry.
//!
//! Wire protocol, reverse-engineered:
//!
//! ```text
//! -> f0 05 ef cc 3b 29 00                           (fixed request magic)
//! <- [0: reserved][1: remaining length N][2..7: header][7..: password, NUL padded]
//! <- f0 05 ef cc 3b 29 03                           (cloud-only sentinel)
//! ```

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use rumqttc::tokio_rustls::rustls::{ClientConnection, Stream};
use tracing::{debug, warn};

use crate::tls::device_tls_config;

/// TLS port the credential listener shares with the MQTT broker.
const CREDENTIAL_PORT: u16 = 8883;
/// Socket timeout covering connect, write and every read.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed request magic.
const CREDENTIAL_REQUEST: [u8; 7] = [0xf0, 0x05, 0xef, 0xcc, 0x3b, 0x29, 0x00];
/// Response meaning "this model only hands out its credential via cloud".
const UNSUPPORTED_SENTINEL: [u8; 7] = [0xf0, 0x05, 0xef, 0xcc, 0x3b, 0x29, 0x03];
/// Protocol bytes preceding the password in a normal response.
const HEADER_LEN: usize = 7;

/// One-shot client for the credential exchange against a known robot IP.
pub struct CredentialClient {
    ip: String,
}

impl CredentialClient {
    pub fn new(ip: &str) -> Self {
        Self { ip: ip.to_string() }
    }

    /// Runs the exchange and returns the robot's MQTT password.
    ///
    /// `None` covers every way the exchange can come up empty: robot not in
    /// pairing mode (connection refused), socket timeout or I/O failure
    /// (logged), a cloud-only model, or an undecodable response. Callers
    /// must treat a missing credential as normal and ask the user instead.
    pub fn retrieve(&self) -> Option<String> {
        let raw = match self.exchange() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("robot {} refused the credential connection", self.ip);
                return None;
            }
            Err(e) => {
                warn!("credential exchange with {} failed: {}", self.ip, e);
                return None;
            }
        };
        decode_credential(&raw)
    }

    /// Opens the TLS connection, sends the magic and accumulates the
    /// response. `Ok(None)` is connection refused; other socket failures
    /// bubble up as errors for the caller to log.
    fn exchange(&self) -> std::io::Result<Option<Vec<u8>>> {
        let ip = self
            .ip
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let addr = SocketAddr::new(ip, CREDENTIAL_PORT);

        let mut sock = match TcpStream::connect_timeout(&addr, EXCHANGE_TIMEOUT) {
            Ok(sock) => sock,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
            Err(e) => return Err(e),
        };
        sock.set_read_timeout(Some(EXCHANGE_TIMEOUT))?;
        sock.set_write_timeout(Some(EXCHANGE_TIMEOUT))?;
        debug!("connected to robot {}:{}", self.ip, CREDENTIAL_PORT);

        let server_name = self
            .ip
            .clone()
            .try_into()
            .map_err(std::io::Error::other)?;
        let mut conn = ClientConnection::new(device_tls_config(), server_name)
            .map_err(std::io::Error::other)?;
        let mut tls = Stream::new(&mut conn, &mut sock);

        tls.write_all(&CREDENTIAL_REQUEST)?;
        debug!("credential request sent to {}", self.ip);

        let mut raw: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(declared) = raw.get(1).map(|b| usize::from(*b)) {
                if raw.len() >= declared + 2 {
                    break;
                }
            }
            let n = tls.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        Ok(Some(raw))
    }
}

/// Extracts the password from an accumulated response.
///
/// The cloud-only sentinel, responses too short to carry a password, and
/// non-UTF-8 payloads all decode to `None`.
fn decode_credential(raw: &[u8]) -> Option<String> {
    if raw == UNSUPPORTED_SENTINEL {
        debug!("robot only releases its credential through the cloud");
        return None;
    }
    if raw.len() <= HEADER_LEN {
        return None;
    }
    let password = std::str::from_utf8(&raw[HEADER_LEN..]).ok()?;
    Some(password.trim_end_matches('\0').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_sentinel_yields_absent() {
        assert_eq!(decode_credential(&UNSUPPORTED_SENTINEL), None);
    }

    #[test]
    fn short_response_yields_absent() {
        assert_eq!(decode_credential(&[]), None);
        assert_eq!(decode_credential(&[0xf0, 0x05, 0xef]), None);
        assert_eq!(decode_credential(&CREDENTIAL_REQUEST), None);
    }

    #[test]
    fn strips_header_and_nul_padding() {
        let mut raw = vec![0xf0, 0x23, 0xef, 0xcc, 0x3b, 0x29, 0x00];
        raw.extend_from_slice(b":1:1651241111:AbCdEfGhIjKlMnOp");
        raw.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert_eq!(
            decode_credential(&raw),
            Some(":1:1651241111:AbCdEfGhIjKlMnOp".to_string())
        );
    }

    #[test]
    fn non_utf8_payload_yields_absent() {
        let mut raw = vec![0xf0, 0x0a, 0xef, 0xcc, 0x3b, 0x29, 0x00];
        raw.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        assert_eq!(decode_credential(&raw), None);
    }
}
