//! # Transport Adapter Module
//!
//! A thin, retrying wrapper around the MQTT session to the robot. The robot
//! runs its broker on-device behind the same TLS quirks as the credential
//! listener, drops connections freely, and keeps server-side session state
//! across them — so the adapter distinguishes a first connection from a
//! reconnection, retries a fixed number of times, and translates the
//! broker's numeric reason codes into the typed
//! [`TransportError`](error::TransportError) taxonomy before anything
//! reaches a callback.
//!
//! The actual wire client sits behind the [`Backend`] trait:
//! [`MqttBackend`](mqtt_backend::MqttBackend) is the rumqttc implementation,
//! tests substitute doubles.

pub mod error;
pub mod mqtt_backend;

use std::sync::{Arc, RwLock};

use tracing::{error, info};

use error::TransportError;

/// Connection attempts per [`RemoteClient::connect`] call.
pub const MAX_CONNECTION_RETRIES: u32 = 3;

pub type ConnectCallback = Box<dyn Fn(Option<&TransportError>) + Send + Sync>;
pub type DisconnectCallback = Box<dyn Fn(Option<&TransportError>) + Send + Sync>;
pub type RawMessageCallback = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Registration surface for the transport's connect, disconnect and message
/// events. Dispatch happens synchronously from the delivery context.
#[derive(Default)]
pub struct EventHooks {
    on_connect: RwLock<Option<ConnectCallback>>,
    on_disconnect: RwLock<Option<DisconnectCallback>>,
    on_message: RwLock<Option<RawMessageCallback>>,
}

impl EventHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_on_connect(&self, callback: ConnectCallback) {
        *self.on_connect.write().expect("hook lock poisoned") = Some(callback);
    }

    pub fn set_on_disconnect(&self, callback: DisconnectCallback) {
        *self.on_disconnect.write().expect("hook lock poisoned") = Some(callback);
    }

    pub fn set_on_message(&self, callback: RawMessageCallback) {
        *self.on_message.write().expect("hook lock poisoned") = Some(callback);
    }

    pub fn connect_event(&self, error: Option<&TransportError>) {
        if let Some(callback) = &*self.on_connect.read().expect("hook lock poisoned") {
            callback(error);
        }
    }

    pub fn disconnect_event(&self, error: Option<&TransportError>) {
        if let Some(callback) = &*self.on_disconnect.read().expect("hook lock poisoned") {
            callback(error);
        }
    }

    pub fn message_event(&self, topic: &str, payload: &[u8]) {
        if let Some(callback) = &*self.on_message.read().expect("hook lock poisoned") {
            callback(topic, payload);
        }
    }
}

/// The wire-client seam.
///
/// `connect` performs full connection setup and starts message delivery;
/// `reconnect` is the lighter path for a session the robot may still know
/// about (stop local delivery, reconnect, restart delivery).
pub trait Backend: Send {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn reconnect(&mut self) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    fn publish(&mut self, topic: &str, payload: String) -> Result<(), TransportError>;
}

/// Retrying connection adapter over a [`Backend`].
pub struct RemoteClient<B: Backend> {
    address: String,
    backend: B,
    was_connected: bool,
}

impl<B: Backend> RemoteClient<B> {
    pub fn new(backend: B, address: &str) -> Self {
        Self {
            address: address.to_string(),
            backend,
            was_connected: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Attempts to connect, up to [`MAX_CONNECTION_RETRIES`] times.
    ///
    /// Returns `true` on the first attempt that succeeds. After exhausting
    /// the retries it reports failure and makes no further attempts within
    /// this call. The first successful connection marks the session; later
    /// calls take the backend's reconnect path instead of repeating full
    /// setup.
    pub fn connect(&mut self) -> bool {
        let mut attempt = 1;
        while attempt <= MAX_CONNECTION_RETRIES {
            info!(
                "connecting to {}, attempt {} of {}",
                self.address, attempt, MAX_CONNECTION_RETRIES
            );
            match self.open_connection() {
                Ok(()) => return true,
                Err(e) => error!("can't connect to {}: {}", self.address, e),
            }
            attempt += 1;
        }

        error!("unable to connect to {}", self.address);
        false
    }

    fn open_connection(&mut self) -> Result<(), TransportError> {
        if !self.was_connected {
            self.backend.connect()?;
            self.was_connected = true;
            Ok(())
        } else {
            self.backend.reconnect()
        }
    }

    pub fn disconnect(&mut self) {
        self.backend.disconnect();
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.backend.subscribe(topic)
    }

    pub fn publish(&mut self, topic: &str, payload: String) -> Result<(), TransportError> {
        self.backend.publish(topic, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend double that fails the first `failures` connection attempts
    /// and records how the adapter drives it.
    #[derive(Default)]
    struct ScriptedBackend {
        failures: u32,
        connect_calls: u32,
        reconnect_calls: u32,
    }

    impl ScriptedBackend {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }
    }

    impl Backend for ScriptedBackend {
        fn connect(&mut self) -> Result<(), TransportError> {
            self.connect_calls += 1;
            if self.connect_calls <= self.failures {
                return Err(TransportError::ConnectionRefused);
            }
            Ok(())
        }

        fn reconnect(&mut self) -> Result<(), TransportError> {
            self.reconnect_calls += 1;
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn subscribe(&mut self, _topic: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn publish(&mut self, _topic: &str, _payload: String) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn always_failing_backend_is_tried_exactly_three_times() {
        let mut client = RemoteClient::new(ScriptedBackend::failing(u32::MAX), "127.0.0.1");
        assert!(!client.connect());
        assert_eq!(client.backend.connect_calls, 3);
    }

    #[test]
    fn success_on_second_attempt_makes_no_third() {
        let mut client = RemoteClient::new(ScriptedBackend::failing(1), "127.0.0.1");
        assert!(client.connect());
        assert_eq!(client.backend.connect_calls, 2);
    }

    #[test]
    fn later_connects_take_the_reconnect_path() {
        let mut client = RemoteClient::new(ScriptedBackend::failing(0), "127.0.0.1");
        assert!(client.connect());
        assert!(client.connect());
        assert_eq!(client.backend.connect_calls, 1);
        assert_eq!(client.backend.reconnect_calls, 1);
    }
}
