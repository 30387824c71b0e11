//! # State Reconstruction Module
//!
//! The robot never sends its full state. It publishes partial, out-of-order
//! JSON fragments — one message may carry the battery level, the next a pose
//! update, a third half of the cleaning schedule. This module merges those
//! fragments into one authoritative state tree, derives flattened per-signal
//! topics from each fragment, extracts a handful of frequently needed
//! scalars on the way past, and drives the mission state machine in
//! [`machine`].
//!
//! All mutation happens through [`StateModel::apply`], invoked once per
//! inbound message from the transport's delivery context. Merge order
//! determines the final tree, so the caller must not reorder messages.

pub mod codes;
pub mod machine;

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use machine::{advance, MissionState, PhaseInput};

/// Every topic derived from telemetry starts with this wrapper path, so it
/// carries no information and is stripped.
const REDUNDANT_PREFIX: &str = "state_reported_";
/// Default interval after which the whole tree is re-flattened and
/// re-emitted, keeping slow-changing fields visible to topic listeners.
const FULL_PUBLISH_INTERVAL: Duration = Duration::from_secs(300);

/// A decoded telemetry fragment: always a JSON object.
pub type Fragment = Map<String, Value>;

/// Position estimate in the adapter's coordinate convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i64,
    pub y: i64,
    pub theta: i64,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 0, y: 0, theta: 180 }
    }
}

/// What one [`StateModel::apply`] produced.
pub struct ApplyResult {
    /// Flattened topics derived from this fragment, in walk order.
    pub topics: Vec<(String, Value)>,
    /// The caller should additionally emit [`StateModel::flatten_all`].
    pub republish: bool,
}

/// The authoritative device state and everything derived from it.
///
/// Grows monotonically by recursive merge; never replaced wholesale. The
/// derived scalars (position, bin flag, last error, mission state) are
/// caches — the tree remains canonical.
pub struct StateModel {
    tree: Value,
    position: Position,
    bin_full: bool,
    phase: String,
    previous_phase: String,
    current_state: MissionState,
    error_code: Option<i64>,
    error_message: Option<String>,
    last_full_publish: Instant,
    full_publish_interval: Duration,
}

impl Default for StateModel {
    fn default() -> Self {
        Self::new()
    }
}

impl StateModel {
    pub fn new() -> Self {
        Self {
            tree: Value::Object(Map::new()),
            position: Position::default(),
            bin_full: false,
            phase: String::new(),
            previous_phase: String::new(),
            current_state: MissionState::Unknown,
            error_code: None,
            error_message: None,
            last_full_publish: Instant::now(),
            full_publish_interval: FULL_PUBLISH_INTERVAL,
        }
    }

    /// Folds one fragment into the model.
    ///
    /// Merges the fragment into the tree, flattens it into topics, absorbs
    /// the side-channel scalars, then advances the mission machine once.
    /// `override_state`, when given, unconditionally replaces the computed
    /// state afterwards (manual correction and testing).
    pub fn apply(
        &mut self,
        fragment: &Fragment,
        override_state: Option<MissionState>,
    ) -> ApplyResult {
        if let Some(tree) = self.tree.as_object_mut() {
            merge(tree, fragment);
        }

        let topics = flatten(fragment);
        for (key, value) in &topics {
            self.absorb(key, value);
        }

        let mut republish = false;
        // The phase is sticky across fragments; before the first phase
        // arrives there is nothing for the machine to chew on.
        if !self.phase.is_empty() {
            let transition = advance(&PhaseInput {
                current: self.current_state,
                phase: &self.phase,
                bin_full: self.bin_full,
                no_active_mission: self.no_active_mission(),
            });
            if transition.next != self.current_state {
                debug!("mission state updated to: {}", transition.next);
            }
            self.current_state = transition.next;
            republish = transition.republish;
        }
        if let Some(forced) = override_state {
            debug!("mission state overridden to: {}", forced);
            self.current_state = forced;
        }

        if self.last_full_publish.elapsed() >= self.full_publish_interval {
            republish = true;
        }
        if republish {
            self.last_full_publish = Instant::now();
        }

        ApplyResult { topics, republish }
    }

    /// Re-derives every flattened topic from the whole tree.
    pub fn flatten_all(&self) -> Vec<(String, Value)> {
        self.tree.as_object().map(flatten).unwrap_or_default()
    }

    fn no_active_mission(&self) -> bool {
        self.tree
            .pointer("/state/reported/cleanMissionStatus/mssnM")
            .and_then(Value::as_str)
            == Some("none")
    }

    /// Side-channel extraction by exact flattened key.
    fn absorb(&mut self, key: &str, value: &Value) {
        match key {
            "pose_theta" => {
                if let Some(theta) = value.as_i64() {
                    self.position.theta = theta;
                }
            }
            // The robot reports x and y swapped relative to our convention.
            "pose_point_x" => {
                if let Some(x) = value.as_i64() {
                    self.position.y = x;
                }
            }
            "pose_point_y" => {
                if let Some(y) = value.as_i64() {
                    self.position.x = y;
                }
            }
            "bin_full" => {
                if let Some(full) = value.as_bool() {
                    self.bin_full = full;
                }
            }
            "cleanMissionStatus_error" => {
                if let Some(code) = value.as_i64() {
                    self.error_code = Some(code);
                    self.error_message = Some(match codes::error_message(code) {
                        Some(message) => message.to_string(),
                        None => {
                            warn!("unknown mission error code: {}", code);
                            format!("Unknown Error number: {code}")
                        }
                    });
                }
            }
            "cleanMissionStatus_phase" => {
                if let Some(phase) = value.as_str() {
                    self.previous_phase = std::mem::replace(&mut self.phase, phase.to_string());
                }
            }
            _ => {}
        }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn mission_state(&self) -> MissionState {
        self.current_state
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn previous_phase(&self) -> &str {
        &self.previous_phase
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn bin_full(&self) -> bool {
        self.bin_full
    }

    /// Last reported error code with its resolved message.
    pub fn last_error(&self) -> Option<(i64, &str)> {
        match (self.error_code, &self.error_message) {
            (Some(code), Some(message)) => Some((code, message.as_str())),
            _ => None,
        }
    }
}

/// Decodes an inbound payload into a fragment.
///
/// Non-UTF-8 bytes, invalid JSON and JSON that is not an object all decode
/// to `None`; the caller logs and drops the message, leaving the tree
/// untouched.
pub fn decode_payload(raw: &[u8]) -> Option<Fragment> {
    match serde_json::from_slice(raw).ok()? {
        Value::Object(fragment) => Some(fragment),
        _ => None,
    }
}

/// Recursive left-biased merge of `fragment` into `tree`.
///
/// Mappings on both sides merge pairwise; any other pairing replaces the
/// existing value wholesale, including scalar-for-mapping swaps in either
/// direction. Keys absent from the fragment are left untouched.
fn merge(tree: &mut Map<String, Value>, fragment: &Map<String, Value>) {
    for (key, incoming) in fragment {
        match (tree.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge(existing, nested),
            _ => {
                tree.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Flattens a fragment into `_`-joined key paths.
///
/// List leaves are projected: object elements explode into `[key, value]`
/// pairs, scalar elements pass through unchanged.
fn flatten(fragment: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut topics = Vec::new();
    flatten_into(fragment, None, &mut topics);
    topics
}

fn flatten_into(state: &Map<String, Value>, prefix: Option<&str>, out: &mut Vec<(String, Value)>) {
    for (key, value) in state {
        let path = match prefix {
            Some(prefix) => format!("{prefix}_{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(inner, Some(&path), out),
            Value::Array(items) => out.push((strip_redundant(&path), project_list(items))),
            other => out.push((strip_redundant(&path), other.clone())),
        }
    }
}

fn strip_redundant(path: &str) -> String {
    path.replace(REDUNDANT_PREFIX, "")
}

fn project_list(items: &[Value]) -> Value {
    let mut projected = Vec::new();
    for item in items {
        match item {
            Value::Object(pairs) => {
                for (key, value) in pairs {
                    projected.push(Value::Array(vec![
                        Value::String(key.clone()),
                        value.clone(),
                    ]));
                }
            }
            other => projected.push(other.clone()),
        }
    }
    Value::Array(projected)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fragment(value: Value) -> Fragment {
        match value {
            Value::Object(fragment) => fragment,
            other => panic!("test fragment must be an object, got {other}"),
        }
    }

    #[test]
    fn decode_skips_garbage() {
        assert!(decode_payload(b"\x00").is_none());
        assert!(decode_payload(b"\xff\xfe").is_none());
    }

    #[test]
    fn decode_skips_broken_json() {
        assert!(decode_payload(b"[").is_none());
        assert!(decode_payload(b"{").is_none());
    }

    #[test]
    fn decode_skips_non_object_json() {
        assert!(decode_payload(b"[]").is_none());
        assert!(decode_payload(b"12").is_none());
    }

    #[test]
    fn decode_allows_empty_and_valid_objects() {
        assert_eq!(decode_payload(b"{}"), Some(Map::new()));
        let decoded = decode_payload(
            br#"{"state": {"reported": {"signal": {"rssi": -45, "snr": 18, "noise": -63}}}}"#,
        )
        .expect("valid object should decode");
        assert_eq!(
            Value::Object(decoded),
            json!({"state": {"reported": {"signal": {"rssi": -45, "snr": 18, "noise": -63}}}})
        );
    }

    #[test]
    fn merge_is_left_biased_and_preserves_siblings() {
        let mut model = StateModel::new();
        model.apply(&fragment(json!({"a": {"x": 1}})), None);
        model.apply(&fragment(json!({"a": {"y": 2}})), None);
        assert_eq!(model.tree().pointer("/a/x"), Some(&json!(1)));
        assert_eq!(model.tree().pointer("/a/y"), Some(&json!(2)));

        model.apply(&fragment(json!({"a": {"x": 7}})), None);
        assert_eq!(model.tree().pointer("/a/x"), Some(&json!(7)));
        assert_eq!(model.tree().pointer("/a/y"), Some(&json!(2)));
    }

    #[test]
    fn merge_replaces_scalar_with_mapping_and_back() {
        let mut model = StateModel::new();
        model.apply(&fragment(json!({"a": 1})), None);
        model.apply(&fragment(json!({"a": {"x": 1}})), None);
        assert_eq!(model.tree().pointer("/a"), Some(&json!({"x": 1})));

        model.apply(&fragment(json!({"a": 5})), None);
        assert_eq!(model.tree().pointer("/a"), Some(&json!(5)));
    }

    #[test]
    fn flattening_strips_the_redundant_prefix() {
        let mut model = StateModel::new();
        let result = model.apply(
            &fragment(json!({
                "state": {"reported": {"bin": {"present": true, "full": false}, "batPct": 100}}
            })),
            None,
        );

        let topics: Vec<&str> = result.topics.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(topics, vec!["batPct", "bin_full", "bin_present"]);
        assert_eq!(model.tree().pointer("/state/reported/batPct"), Some(&json!(100)));
        assert_eq!(
            model.tree().pointer("/state/reported/bin/present"),
            Some(&json!(true))
        );
        assert_eq!(
            model.tree().pointer("/state/reported/bin/full"),
            Some(&json!(false))
        );
        assert!(!model.bin_full());
    }

    #[test]
    fn list_leaves_are_projected() {
        let mut model = StateModel::new();
        let result = model.apply(
            &fragment(json!({"langs": [{"en-US": 0}, "plain", 3]})),
            None,
        );
        assert_eq!(
            result.topics,
            vec![(
                "langs".to_string(),
                json!([["en-US", 0], "plain", 3])
            )]
        );
    }

    #[test]
    fn pose_side_channel_swaps_x_and_y() {
        let mut model = StateModel::new();
        model.apply(
            &fragment(json!({
                "state": {"reported": {"pose": {"theta": 90, "point": {"x": 10, "y": 20}}}}
            })),
            None,
        );
        assert_eq!(
            model.position(),
            Position { x: 20, y: 10, theta: 90 }
        );
    }

    #[test]
    fn error_side_channel_resolves_known_and_unknown_codes() {
        let mut model = StateModel::new();
        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"error": 14}}}
            })),
            None,
        );
        assert_eq!(model.last_error(), Some((14, "Bin missing")));

        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"error": 9999}}}
            })),
            None,
        );
        assert_eq!(model.last_error(), Some((9999, "Unknown Error number: 9999")));
    }

    #[test]
    fn phase_updates_retain_the_previous_value() {
        let mut model = StateModel::new();
        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"phase": "charge"}}}
            })),
            None,
        );
        assert_eq!(model.phase(), "charge");
        assert_eq!(model.previous_phase(), "");
        assert_eq!(model.mission_state(), MissionState::Charge);

        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"phase": "run"}}}
            })),
            None,
        );
        assert_eq!(model.phase(), "run");
        assert_eq!(model.previous_phase(), "charge");
        assert_eq!(model.mission_state(), MissionState::New);
    }

    #[test]
    fn phase_is_sticky_across_fragments_without_one() {
        let mut model = StateModel::new();
        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"phase": "charge"}}}
            })),
            None,
        );
        model.apply(&fragment(json!({"state": {"reported": {"batPct": 80}}})), None);
        assert_eq!(model.phase(), "charge");
        assert_eq!(model.mission_state(), MissionState::Charge);
    }

    #[test]
    fn override_replaces_the_computed_state() {
        let mut model = StateModel::new();
        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"phase": "charge"}}}
            })),
            Some(MissionState::Stuck),
        );
        assert_eq!(model.mission_state(), MissionState::Stuck);
    }

    #[test]
    fn lost_mission_cancels_a_paused_robot() {
        let mut model = StateModel::new();
        for phase in ["charge", "run", "hmMidMsn", "charge", "run"] {
            model.apply(
                &fragment(json!({
                    "state": {"reported": {"cleanMissionStatus": {"phase": phase}}}
                })),
                None,
            );
        }
        assert_eq!(model.mission_state(), MissionState::Pause);

        model.apply(
            &fragment(json!({
                "state": {"reported": {"cleanMissionStatus": {"phase": "charge", "mssnM": "none"}}}
            })),
            None,
        );
        assert_eq!(model.mission_state(), MissionState::Cancelled);
    }

    #[test]
    fn full_publish_timer_requests_a_republish() {
        let mut model = StateModel::new();
        model.full_publish_interval = Duration::ZERO;
        let result = model.apply(&fragment(json!({"a": 1})), None);
        assert!(result.republish);
    }

    #[test]
    fn held_charge_requests_a_republish() {
        let mut model = StateModel::new();
        let charge = fragment(json!({
            "state": {"reported": {"cleanMissionStatus": {"phase": "charge"}}}
        }));
        model.apply(&charge, None);
        let result = model.apply(&charge, None);
        assert!(result.republish);
        assert_eq!(model.mission_state(), MissionState::Charge);
    }

    #[test]
    fn flatten_all_covers_the_whole_tree() {
        let mut model = StateModel::new();
        model.apply(
            &fragment(json!({"state": {"reported": {"batPct": 100}}})),
            None,
        );
        model.apply(
            &fragment(json!({"state": {"reported": {"bin": {"full": true}}}})),
            None,
        );
        let flat = model.flatten_all();
        let all: Vec<&str> = flat
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert!(all.contains(&"batPct"));
        assert!(all.contains(&"bin_full"));
        assert!(model.bin_full());
    }
}
