//! # Robot Discovery Module
//!
//! Locates robots on the local broadcast domain without prior IP knowledge.
//! The robots answer a fixed ASCII magic token sent over UDP with a JSON
//! blob describing themselves; everything else that arrives on the port —
//! router chatter, our own looped-back broadcasts, half-configured IoT
//! devices — is noise and gets dropped silently. Discovery therefore never
//! fails on malformed peer input, it only finds fewer robots.

pub mod device_info;

use std::collections::HashSet;
use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use tracing::{debug, info};

use device_info::{validate_hostname, DeviceInfo};

/// UDP port the robots listen on for discovery probes.
const DISCOVERY_PORT: u16 = 5678;
/// ASCII magic token the robots respond to.
const PROBE_MAGIC: &str = "irobotmcs";
/// Number of broadcast probes per enumeration round. Repeated sends paper
/// over UDP loss on busy WiFi.
const BROADCAST_COUNT: usize = 5;
/// Idle timeout terminating the response wait loop.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// UDP discovery service.
///
/// One bound broadcast socket per instance; both queries are synchronous and
/// bounded by [`RESPONSE_TIMEOUT`] of idle time.
pub struct Discovery {
    socket: UdpSocket,
}

impl Discovery {
    /// Binds the discovery socket with broadcast enabled and the read
    /// timeout that terminates the wait loops.
    pub fn new() -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", DISCOVERY_PORT))?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        debug!("discovery socket bound on port {}", DISCOVERY_PORT);
        Ok(Self { socket })
    }

    /// Enumerates every robot on the broadcast domain.
    ///
    /// Broadcasts the probe magic [`BROADCAST_COUNT`] times, then collects
    /// responses until the socket sits idle for the full timeout. The result
    /// set is deduplicated by MAC address, so robots that answered several
    /// probes appear once.
    pub fn query_all(&self) -> io::Result<HashSet<DeviceInfo>> {
        for attempt in 0..BROADCAST_COUNT {
            self.socket
                .send_to(PROBE_MAGIC.as_bytes(), ("255.255.255.255", DISCOVERY_PORT))?;
            debug!("broadcast probe sent: {}", attempt);
        }

        let mut robots = HashSet::new();
        let mut buf = [0u8; 1024];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    debug!("received {} bytes from {}", len, addr);
                    if let Some(robot) = decode_response(&buf[..len]) {
                        robots.insert(robot);
                    }
                }
                Err(e) if is_timeout(&e) => {
                    info!("discovery window closed, {} robot(s) found", robots.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(robots)
    }

    /// Probes a single known address.
    ///
    /// Sends one directed probe and waits for the first datagram whose
    /// source matches `ip` and decodes to a valid descriptor. `None` when
    /// the timeout elapses first.
    pub fn query_one(&self, ip: &str) -> io::Result<Option<DeviceInfo>> {
        self.socket
            .send_to(PROBE_MAGIC.as_bytes(), (ip, DISCOVERY_PORT))?;
        debug!("directed probe sent to {}", ip);

        let mut buf = [0u8; 1024];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    if addr.ip().to_string() != ip {
                        continue;
                    }
                    debug!("received {} bytes from {}", len, addr);
                    if let Some(robot) = decode_response(&buf[..len]) {
                        return Ok(Some(robot));
                    }
                }
                Err(e) if is_timeout(&e) => {
                    info!("no response from {}", ip);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read-timeout detection; the kind differs across platforms.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Decodes one inbound datagram into a descriptor, or `None` for noise.
///
/// Dropped without comment: non-UTF-8 bytes (routers answer the broadcast
/// port with binary junk), our own looped-back probe magic, invalid JSON,
/// JSON missing required fields, and hostnames that fail validation.
fn decode_response(raw: &[u8]) -> Option<DeviceInfo> {
    let text = std::str::from_utf8(raw).ok()?;
    if text == PROBE_MAGIC {
        return None;
    }
    let robot: DeviceInfo = serde_json::from_str(text).ok()?;
    validate_hostname(&robot.hostname).ok()?;
    Some(robot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE_TEMPLATE: &str = r#"
    {
        "hostname": "hostname_placeholder",
        "sw": "1.2.3",
        "ip": "192.168.0.2",
        "mac": "aa:bb:cc:dd:ee:ff",
        "robotname": "test",
        "sku": "123",
        "cap": {}
    }
    "#;

    fn response_with_hostname(hostname: &str) -> String {
        RESPONSE_TEMPLATE.replace("hostname_placeholder", hostname)
    }

    #[test]
    fn skips_garbage() {
        assert_eq!(decode_response(b"\x0f\x00\xff\xf0"), None);
    }

    #[test]
    fn skips_own_probe_magic() {
        assert_eq!(decode_response(PROBE_MAGIC.as_bytes()), None);
    }

    #[test]
    fn skips_broken_json() {
        assert_eq!(decode_response(b"{\"test\": 1"), None);
    }

    #[test]
    fn skips_json_without_required_fields() {
        assert_eq!(decode_response(b"{\"test\": 1}"), None);
    }

    #[test]
    fn skips_unknown_hostname() {
        assert_eq!(decode_response(b"{\"hostname\": \"test\"}"), None);
        assert_eq!(
            decode_response(response_with_hostname("test").as_bytes()),
            None
        );
    }

    #[test]
    fn skips_hostname_without_blid() {
        assert_eq!(
            decode_response(response_with_hostname("iRobot-").as_bytes()),
            None
        );
    }

    #[test]
    fn decodes_approved_hostnames() {
        for hostname in ["Roomba-test", "iRobot-test"] {
            let decoded = decode_response(response_with_hostname(hostname).as_bytes())
                .expect("valid response should decode");
            assert_eq!(decoded.hostname, hostname);
            assert_eq!(decoded.blid(), "test");
            assert_eq!(decoded.firmware, "1.2.3");
            assert_eq!(decoded.robot_name, "test");
        }
    }
}
