//! rumqttc-backed transport implementation.
//!
//! The synchronous rumqttc client only does network work while its
//! `Connection` is being polled, so `connect` drives the connection by hand
//! until the broker's CONNACK arrives (that is the moment the robot accepts
//! or refuses the credentials), then hands the `Connection` to a dedicated
//! delivery thread that pumps publishes and disconnects into the
//! [`EventHooks`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, Incoming, MqttOptions, QoS, RecvTimeoutError,
    TlsConfiguration, Transport,
};
use tracing::{debug, warn};

use super::error::TransportError;
use super::{Backend, EventHooks};
use crate::tls::device_tls_config;

const KEEP_ALIVE: Duration = Duration::from_secs(5);
/// How long `connect` waits for the broker's CONNACK verdict.
const CONNACK_TIMEOUT: Duration = Duration::from_secs(30);
/// Poll interval of the delivery loop; bounds stop latency.
const DELIVERY_POLL: Duration = Duration::from_millis(500);
const EVENT_QUEUE_CAPACITY: usize = 64;

/// MQTT session to one robot over the shared TLS configuration.
pub struct MqttBackend {
    options: MqttOptions,
    hooks: Arc<EventHooks>,
    client: Option<Client>,
    delivery: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl MqttBackend {
    /// The robot's broker requires the BLID as both client id and username.
    pub fn new(address: &str, blid: &str, password: &str, port: u16, hooks: Arc<EventHooks>) -> Self {
        let mut options = MqttOptions::new(blid, address, port);
        options
            .set_credentials(blid, password)
            .set_keep_alive(KEEP_ALIVE)
            .set_transport(Transport::Tls(TlsConfiguration::Rustls(device_tls_config())));

        Self {
            options,
            hooks,
            client: None,
            delivery: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn start_delivery_loop(&mut self, connection: Connection) -> Result<(), TransportError> {
        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();
        let hooks = self.hooks.clone();
        let handle = thread::Builder::new()
            .name("vaclink-delivery".to_string())
            .spawn(move || delivery_loop(connection, hooks, stop))
            .map_err(|e| TransportError::Network(e.to_string()))?;
        self.delivery = Some(handle);
        Ok(())
    }

    fn stop_delivery_loop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.delivery.take() {
            let _ = handle.join();
        }
    }
}

impl Backend for MqttBackend {
    fn connect(&mut self) -> Result<(), TransportError> {
        let (client, mut connection) = Client::new(self.options.clone(), EVENT_QUEUE_CAPACITY);

        let deadline = Instant::now() + CONNACK_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Network(
                    "timed out waiting for broker acknowledgement".to_string(),
                ));
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Incoming::ConnAck(ack)))) => {
                    let error = TransportError::from_reason_code(reason_code(ack.code));
                    debug!(
                        "broker acknowledged connection, code {:?}, error {:?}",
                        ack.code, error
                    );
                    self.hooks.connect_event(error.as_ref());
                    return match error {
                        None => {
                            self.client = Some(client);
                            self.start_delivery_loop(connection)
                        }
                        Some(e) => Err(e),
                    };
                }
                Ok(Ok(event)) => debug!("event before CONNACK: {:?}", event),
                Ok(Err(e)) => return Err(TransportError::Network(e.to_string())),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Network("event loop closed".to_string()))
                }
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.stop_delivery_loop();
        self.client = None;
        self.connect()
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        self.stop_delivery_loop();
        self.hooks.disconnect_event(None);
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Network("not connected".to_string()))?
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: String) -> Result<(), TransportError> {
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Network("not connected".to_string()))?
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

impl Drop for MqttBackend {
    fn drop(&mut self) {
        self.stop_delivery_loop();
    }
}

/// Numeric reason code for a v4 CONNACK, matching the translation table in
/// [`TransportError::from_reason_code`].
fn reason_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

fn delivery_loop(mut connection: Connection, hooks: Arc<EventHooks>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match connection.recv_timeout(DELIVERY_POLL) {
            Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                hooks.message_event(&publish.topic, &publish.payload);
            }
            Ok(Ok(Event::Incoming(Incoming::Disconnect))) => {
                debug!("broker closed the session");
                hooks.disconnect_event(None);
                return;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("transport failure in delivery loop: {}", e);
                hooks.disconnect_event(Some(&TransportError::Network(e.to_string())));
                return;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
    debug!("delivery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connack_codes_match_the_translation_table() {
        assert_eq!(reason_code(ConnectReturnCode::Success), 0);
        assert_eq!(
            TransportError::from_reason_code(reason_code(
                ConnectReturnCode::BadUserNamePassword
            )),
            Some(TransportError::BadCredentials)
        );
        assert_eq!(
            TransportError::from_reason_code(reason_code(ConnectReturnCode::NotAuthorized)),
            Some(TransportError::NotAuthorized)
        );
    }
}
