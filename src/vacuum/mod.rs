//! # Vacuum Engine Module
//!
//! Ties the transport adapter and the state reconstructor together into one
//! per-robot engine. The engine owns the connection lifecycle (continuous or
//! periodic), feeds every inbound telemetry message through the
//! [`StateModel`], and fans the results out to registered observers.
//!
//! ## Threading Model
//!
//! The transport's delivery thread is the sole writer of the state model;
//! all mutation is serialized in message-arrival order because merge order
//! determines the final tree. Observers run synchronously on that same
//! thread, in registration order, with panics contained — a broken observer
//! is logged and skipped, never allowed to take the reconstruction path
//! down. Reads from other threads get snapshots through a reader-writer
//! lock.
//!
//! Periodic mode runs one dedicated reconnect thread per engine instance
//! with a single-flight start guard and a cooperative stop flag, so
//! shutdown latency is bounded by one delay interval.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::state::machine::MissionState;
use crate::state::{decode_payload, Fragment, Position, StateModel};
use crate::transport::error::TransportError;
use crate::transport::mqtt_backend::MqttBackend;
use crate::transport::{Backend, EventHooks, RemoteClient};

/// Wildcard subscription covering all robot state reports.
const STATE_TOPIC: &str = "#";
/// Command channel.
const COMMAND_TOPIC: &str = "cmd";
/// Preference/settings channel.
const PREFERENCE_TOPIC: &str = "delta";

pub type MessageCallback = Box<dyn Fn(&Fragment) + Send + Sync>;
pub type TopicCallback = Box<dyn Fn(&str, &Value) + Send + Sync>;
pub type DisconnectCallback = Box<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum VacuumError {
    /// All connection attempts were exhausted.
    #[error("unable to connect to robot at {0}")]
    ConnectionFailed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Connection behavior for one [`Vacuum`] instance.
#[derive(Clone, Debug)]
pub struct VacuumSettings {
    /// `true`: one synchronous connection held for the engine's lifetime.
    /// `false`: a background loop owns the connection and re-establishes it
    /// every `delay`.
    pub continuous: bool,
    /// Sleep between periodic reconnect rounds; also bounds stop latency.
    pub delay: Duration,
    /// Robot-side MQTT port.
    pub port: u16,
}

impl Default for VacuumSettings {
    fn default() -> Self {
        Self {
            continuous: true,
            delay: Duration::from_secs(1),
            port: 8883,
        }
    }
}

/// State shared between the engine surface and the delivery context.
struct VacuumShared {
    address: String,
    model: RwLock<StateModel>,
    connected: AtomicBool,
    client_error: Mutex<Option<TransportError>>,
    message_callbacks: Mutex<Vec<MessageCallback>>,
    topic_callbacks: Mutex<Vec<TopicCallback>>,
    disconnect_callbacks: Mutex<Vec<DisconnectCallback>>,
}

impl VacuumShared {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            model: RwLock::new(StateModel::new()),
            connected: AtomicBool::new(false),
            client_error: Mutex::new(None),
            message_callbacks: Mutex::new(Vec::new()),
            topic_callbacks: Mutex::new(Vec::new()),
            disconnect_callbacks: Mutex::new(Vec::new()),
        }
    }

    fn handle_connect(&self, error: Option<&TransportError>) {
        *self.client_error.lock().expect("error lock poisoned") = error.cloned();
        match error {
            Some(error) => error!("robot {} connection error: {}", self.address, error),
            None => {
                self.connected.store(true, Ordering::SeqCst);
                info!("connected to robot {}", self.address);
            }
        }
    }

    fn handle_disconnect(&self, error: Option<&TransportError>) {
        self.connected.store(false, Ordering::SeqCst);
        *self.client_error.lock().expect("error lock poisoned") = error.cloned();
        match error {
            Some(error) => {
                warn!(
                    "unexpectedly disconnected from robot {}: {}",
                    self.address, error
                );
                let callbacks = self
                    .disconnect_callbacks
                    .lock()
                    .expect("callback lock poisoned");
                for callback in callbacks.iter() {
                    isolate(|| callback(error));
                }
            }
            None => info!("disconnected from robot {}", self.address),
        }
    }

    /// The message path: decode, merge, flatten, notify. Malformed payloads
    /// are logged and dropped with the tree untouched; nothing here may
    /// escape into the delivery thread.
    fn handle_raw_message(&self, topic: &str, payload: &[u8]) {
        let Some(fragment) = decode_payload(payload) else {
            warn!(
                "got malformed message from {} on topic {}",
                self.address, topic
            );
            return;
        };
        debug!("received message from {} on topic {}", self.address, topic);

        let (topics, full_republish) = {
            let mut model = self.model.write().expect("state lock poisoned");
            let result = model.apply(&fragment, None);
            let full = result.republish.then(|| model.flatten_all());
            (result.topics, full)
        };

        self.dispatch_topics(&topics);
        if let Some(all) = full_republish {
            debug!("re-publishing full state tree of {}", self.address);
            self.dispatch_topics(&all);
        }

        let callbacks = self
            .message_callbacks
            .lock()
            .expect("callback lock poisoned");
        for callback in callbacks.iter() {
            isolate(|| callback(&fragment));
        }
    }

    fn dispatch_topics(&self, topics: &[(String, Value)]) {
        let callbacks = self.topic_callbacks.lock().expect("callback lock poisoned");
        if callbacks.is_empty() {
            return;
        }
        for (key, value) in topics {
            for callback in callbacks.iter() {
                isolate(|| callback(key, value));
            }
        }
    }
}

/// Runs an observer with panic containment.
fn isolate(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("observer callback panicked; continuing delivery");
    }
}

/// Live engine for one robot.
pub struct Vacuum<B: Backend = MqttBackend> {
    client: Arc<Mutex<RemoteClient<B>>>,
    shared: Arc<VacuumShared>,
    continuous: bool,
    delay: Duration,
    periodic_stop: Arc<AtomicBool>,
    periodic_running: Arc<AtomicBool>,
}

impl Vacuum<MqttBackend> {
    /// Engine over the real MQTT transport. The BLID doubles as username
    /// and client id; both usually come out of [`crate::Discovery`] and
    /// [`crate::CredentialClient`].
    pub fn new(address: &str, blid: &str, password: &str, settings: Option<VacuumSettings>) -> Self {
        let settings = settings.unwrap_or_default();
        let hooks = EventHooks::new();
        let backend = MqttBackend::new(address, blid, password, settings.port, hooks.clone());
        Self::with_backend(backend, address, &hooks, settings)
    }
}

impl<B: Backend + 'static> Vacuum<B> {
    /// Engine over an arbitrary transport backend; the seam tests use.
    pub fn with_backend(
        backend: B,
        address: &str,
        hooks: &Arc<EventHooks>,
        settings: VacuumSettings,
    ) -> Self {
        let shared = Arc::new(VacuumShared::new(address));

        let on_connect = shared.clone();
        hooks.set_on_connect(Box::new(move |error| on_connect.handle_connect(error)));
        let on_disconnect = shared.clone();
        hooks.set_on_disconnect(Box::new(move |error| on_disconnect.handle_disconnect(error)));
        let on_message = shared.clone();
        hooks.set_on_message(Box::new(move |topic, payload| {
            on_message.handle_raw_message(topic, payload)
        }));

        if settings.continuous {
            debug!("CONTINUOUS connection to {}", address);
        } else {
            debug!("PERIODIC connection to {}", address);
        }

        Self {
            client: Arc::new(Mutex::new(RemoteClient::new(backend, address))),
            shared,
            continuous: settings.continuous,
            delay: settings.delay,
            periodic_stop: Arc::new(AtomicBool::new(false)),
            periodic_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Establishes the connection according to the configured mode.
    ///
    /// A no-op while already connected or while a periodic loop is active.
    /// In continuous mode the retry sequence runs synchronously and failure
    /// is reported here; in periodic mode the call only starts the loop and
    /// failures surface through the disconnect observers.
    pub fn connect(&self) -> Result<(), VacuumError> {
        if self.connected() || self.periodic_running() {
            return Ok(());
        }
        if self.continuous {
            self.connect_once()
        } else {
            self.start_periodic();
            Ok(())
        }
    }

    fn connect_once(&self) -> Result<(), VacuumError> {
        let mut client = self.client.lock().expect("client lock poisoned");
        if !client.connect() {
            return Err(VacuumError::ConnectionFailed(client.address().to_string()));
        }
        client.subscribe(STATE_TOPIC)?;
        Ok(())
    }

    /// Starts the periodic reconnect loop; `false` when one is already
    /// running (single-flight guard).
    fn start_periodic(&self) -> bool {
        if self.periodic_running.swap(true, Ordering::SeqCst) {
            debug!("periodic connection loop already running");
            return false;
        }
        self.periodic_stop.store(false, Ordering::SeqCst);

        let client = self.client.clone();
        let shared = self.shared.clone();
        let stop = self.periodic_stop.clone();
        let running = self.periodic_running.clone();
        let delay = self.delay;
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let connected = {
                    let mut client = client.lock().expect("client lock poisoned");
                    let connected = client.connect();
                    if connected {
                        let _ = client.subscribe(STATE_TOPIC);
                    }
                    connected
                };
                if !connected {
                    running.store(false, Ordering::SeqCst);
                    warn!("periodic connection to {} lost", shared.address);
                    shared.handle_disconnect(Some(&TransportError::ConnectionRefused));
                    return;
                }
                thread::sleep(delay);
            }
            client.lock().expect("client lock poisoned").disconnect();
            running.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Continuous mode disconnects outright; periodic mode raises the stop
    /// flag and lets the loop wind down within one delay interval.
    pub fn disconnect(&self) {
        if self.continuous {
            self.client.lock().expect("client lock poisoned").disconnect();
        } else {
            self.periodic_stop.store(true, Ordering::SeqCst);
        }
    }

    /// Publishes a command on the `cmd` channel, stamped with the current
    /// unix time and the local-app initiator.
    pub fn send_command(
        &self,
        command: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<(), VacuumError> {
        let payload = command_payload(command, chrono::Utc::now().timestamp(), params)?;
        debug!("publishing robot command: {}", payload);
        self.client
            .lock()
            .expect("client lock poisoned")
            .publish(COMMAND_TOPIC, payload)?;
        Ok(())
    }

    /// Publishes a preference change on the `delta` channel. String
    /// `"true"`/`"false"` values are coerced to booleans first, matching
    /// what the firmware expects.
    pub fn set_preference(&self, preference: &str, setting: Value) -> Result<(), VacuumError> {
        let payload = preference_payload(preference, setting)?;
        debug!("publishing robot preference: {}", payload);
        self.client
            .lock()
            .expect("client lock poisoned")
            .publish(PREFERENCE_TOPIC, payload)?;
        Ok(())
    }

    pub fn register_on_message_callback(&self, callback: impl Fn(&Fragment) + Send + Sync + 'static) {
        self.shared
            .message_callbacks
            .lock()
            .expect("callback lock poisoned")
            .push(Box::new(callback));
    }

    /// Observer for individual flattened signals, called once per derived
    /// topic per message (and for the whole tree on a full re-publish).
    pub fn register_on_topic_callback(
        &self,
        callback: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) {
        self.shared
            .topic_callbacks
            .lock()
            .expect("callback lock poisoned")
            .push(Box::new(callback));
    }

    pub fn register_on_disconnect_callback(
        &self,
        callback: impl Fn(&TransportError) + Send + Sync + 'static,
    ) {
        self.shared
            .disconnect_callbacks
            .lock()
            .expect("callback lock poisoned")
            .push(Box::new(callback));
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn periodic_running(&self) -> bool {
        self.periodic_running.load(Ordering::SeqCst)
    }

    /// Last connect/disconnect failure, if any.
    pub fn client_error(&self) -> Option<TransportError> {
        self.shared
            .client_error
            .lock()
            .expect("error lock poisoned")
            .clone()
    }

    /// Snapshot of the authoritative state tree.
    pub fn state(&self) -> Value {
        self.shared
            .model
            .read()
            .expect("state lock poisoned")
            .tree()
            .clone()
    }

    pub fn mission_state(&self) -> MissionState {
        self.shared
            .model
            .read()
            .expect("state lock poisoned")
            .mission_state()
    }

    pub fn previous_phase(&self) -> String {
        self.shared
            .model
            .read()
            .expect("state lock poisoned")
            .previous_phase()
            .to_string()
    }

    pub fn position(&self) -> Position {
        self.shared
            .model
            .read()
            .expect("state lock poisoned")
            .position()
    }

    pub fn bin_full(&self) -> bool {
        self.shared
            .model
            .read()
            .expect("state lock poisoned")
            .bin_full()
    }

    pub fn last_error(&self) -> Option<(i64, String)> {
        self.shared
            .model
            .read()
            .expect("state lock poisoned")
            .last_error()
            .map(|(code, message)| (code, message.to_string()))
    }
}

fn command_payload(
    command: &str,
    time: i64,
    params: Option<Map<String, Value>>,
) -> Result<String, serde_json::Error> {
    let mut body = Map::new();
    body.insert("command".to_string(), Value::String(command.to_string()));
    body.insert("time".to_string(), Value::from(time));
    body.insert("initiator".to_string(), Value::String("localApp".to_string()));
    if let Some(params) = params {
        for (key, value) in params {
            body.insert(key, value);
        }
    }
    serde_json::to_string(&body)
}

fn preference_payload(preference: &str, setting: Value) -> Result<String, serde_json::Error> {
    let setting = match &setting {
        Value::String(text) if text.eq_ignore_ascii_case("true") => Value::Bool(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Value::Bool(false),
        _ => setting,
    };
    let mut state = Map::new();
    state.insert(preference.to_string(), setting);
    let mut body = Map::new();
    body.insert("state".to_string(), Value::Object(state));
    serde_json::to_string(&body)
}
