//! # vaclink
//!
//! Client-side protocol engine for WiFi vacuum robots on the local network.
//! The robots speak three undocumented protocols, all reverse-engineered:
//! a UDP broadcast discovery exchange, a one-shot TLS credential handshake,
//! and a stream of partial JSON telemetry fragments over MQTT. This crate
//! turns those into three things a consuming application can actually use:
//!
//! - [`Discovery`] enumerates robots on the broadcast domain and returns
//!   validated [`DeviceInfo`] descriptors, no prior IP knowledge required.
//! - [`CredentialClient`] recovers the robot's MQTT password through the
//!   device's TLS side channel (robot must be docked and in pairing mode).
//! - [`Vacuum`] maintains a live connection, merges the out-of-order
//!   telemetry fragments into one authoritative state tree, derives flattened
//!   per-signal topics from it, and reconstructs the high-level
//!   mission-progress state machine ([`MissionState`]).
//!
//! ## Module Architecture
//!
//! ```text
//! vaclink/
//! ├── discovery/   - UDP probe broadcast and response decoding
//! ├── credential/  - TLS credential retrieval protocol
//! ├── tls          - shared process-wide TLS client configuration
//! ├── transport/   - retrying MQTT connection adapter and error taxonomy
//! ├── state/       - telemetry merge, topic flattening, mission machine
//! └── vacuum/      - the per-robot engine tying it all together
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vaclink::{CredentialClient, Discovery, Vacuum};
//!
//! let discovery = Discovery::new()?;
//! for robot in discovery.query_all()? {
//!     let password = CredentialClient::new(&robot.ip).retrieve();
//!     if let Some(password) = password {
//!         let vacuum = Vacuum::new(&robot.ip, robot.blid(), &password, None);
//!         vacuum.register_on_message_callback(|fragment| {
//!             println!("{fragment:?}");
//!         });
//!         vacuum.connect()?;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod credential;
pub mod discovery;
pub mod state;
pub mod tls;
pub mod transport;
pub mod vacuum;

pub use credential::CredentialClient;
pub use discovery::device_info::{DeviceInfo, HostnameError};
pub use discovery::Discovery;
pub use state::machine::MissionState;
pub use state::{Position, StateModel};
pub use transport::error::TransportError;
pub use vacuum::{Vacuum, VacuumError, VacuumSettings};
