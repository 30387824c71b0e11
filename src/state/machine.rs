//! Mission-progress state machine.
//!
//! The robot reports only a raw `phase` token, which by itself does not say
//! whether the robot is, say, recharging mid-mission or done for the day.
//! The machine reconstructs that: transitions are an ordered rule table over
//! the previous state and the fresh phase, evaluated strictly top to bottom
//! with the first match winning. The order is load-bearing — several rules
//! shadow later ones on purpose — so new rules must be inserted, never
//! appended blindly.
//!
//! A normal mission runs `charge -> run -> hmPostMsn -> charge`; a
//! mid-mission recharge inserts `hmMidMsn -> charge -> run`. Some rules
//! transition nowhere but still ask the caller to re-emit the full state
//! tree, which keeps slow-changing values visible downstream.

use std::fmt;

use tracing::warn;

/// Reconstructed mission state; a superset of the raw phase tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissionState {
    /// Nothing decodable reported yet, or an unrecognized phase token.
    #[default]
    Unknown,
    Charge,
    /// A fresh mission just started.
    New,
    Run,
    /// Heading to the dock mid-mission.
    Dock,
    /// Docking after a finished mission.
    DockEnd,
    /// Mid-mission recharge.
    Recharge,
    Stuck,
    /// User pressed the dock button.
    UserDock,
    /// Returning to the dock, mission complete.
    PostMissionDock,
    Completed,
    Cancelled,
    Stop,
    Pause,
    /// Base station is emptying the bin.
    Evac,
}

impl MissionState {
    /// Direct mapping from a raw phase token, `None` for unknown tokens.
    pub fn from_phase(token: &str) -> Option<Self> {
        Some(match token {
            "charge" => Self::Charge,
            "new" => Self::New,
            "run" | "resume" => Self::Run,
            "hmMidMsn" | "dock" => Self::Dock,
            "dockend" => Self::DockEnd,
            "recharge" => Self::Recharge,
            "stuck" => Self::Stuck,
            "hmUsrDock" => Self::UserDock,
            "hmPostMsn" => Self::PostMissionDock,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "stop" => Self::Stop,
            "pause" => Self::Pause,
            "evac" => Self::Evac,
            _ => return None,
        })
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "Unknown",
            Self::Charge => "Charging",
            Self::New => "New Mission",
            Self::Run => "Running",
            Self::Dock => "Docking",
            Self::DockEnd => "Docking - End Mission",
            Self::Recharge => "Recharging",
            Self::Stuck => "Stuck",
            Self::UserDock => "User Docking",
            Self::PostMissionDock => "End Mission",
            Self::Completed => "Mission Completed",
            Self::Cancelled => "Cancelled",
            Self::Stop => "Stopped",
            Self::Pause => "Paused",
            Self::Evac => "Emptying bin",
        };
        f.write_str(label)
    }
}

/// Everything one transition decision looks at.
pub struct PhaseInput<'a> {
    pub current: MissionState,
    /// Raw phase token from the latest telemetry.
    pub phase: &'a str,
    pub bin_full: bool,
    /// Status payload reports no active mission (`mssnM == "none"`).
    pub no_active_mission: bool,
}

/// Result of one machine step.
#[derive(Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: MissionState,
    /// The caller should re-emit the full state tree.
    pub republish: bool,
}

#[derive(Clone, Copy)]
enum Outcome {
    Goto(MissionState),
    GotoAndRepublish(MissionState),
    HoldAndRepublish,
}

struct Rule {
    matches: fn(&PhaseInput) -> bool,
    outcome: Outcome,
}

/// Ordered transition rules; first match wins.
const RULES: &[Rule] = &[
    // A paused or recharging robot whose mission disappeared was cancelled
    // remotely. Takes precedence over everything below.
    Rule {
        matches: |i: &PhaseInput| {
            matches!(i.current, MissionState::Pause | MissionState::Recharge)
                && i.no_active_mission
                && i.phase == "charge"
        },
        outcome: Outcome::Goto(MissionState::Cancelled),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Charge && i.phase == "run",
        outcome: Outcome::Goto(MissionState::New),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Run && i.phase == "hmMidMsn",
        outcome: Outcome::Goto(MissionState::Dock),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Dock && i.phase == "charge",
        outcome: Outcome::Goto(MissionState::Recharge),
    },
    Rule {
        matches: |i: &PhaseInput| {
            i.current == MissionState::Recharge && i.phase == "charge" && i.bin_full
        },
        outcome: Outcome::Goto(MissionState::Pause),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Run && i.phase == "charge",
        outcome: Outcome::Goto(MissionState::Recharge),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Recharge && i.phase == "run",
        outcome: Outcome::Goto(MissionState::Pause),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Pause && i.phase == "charge",
        outcome: Outcome::GotoAndRepublish(MissionState::Pause),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::Charge && i.phase == "charge",
        outcome: Outcome::HoldAndRepublish,
    },
    Rule {
        matches: |i: &PhaseInput| {
            matches!(i.current, MissionState::Stop | MissionState::Pause)
                && i.phase == "hmUsrDock"
        },
        outcome: Outcome::Goto(MissionState::Cancelled),
    },
    Rule {
        matches: |i: &PhaseInput| {
            matches!(
                i.current,
                MissionState::UserDock | MissionState::Cancelled | MissionState::PostMissionDock
            ) && i.phase == "charge"
        },
        outcome: Outcome::Goto(MissionState::DockEnd),
    },
    Rule {
        matches: |i: &PhaseInput| i.current == MissionState::DockEnd && i.phase == "charge",
        outcome: Outcome::Goto(MissionState::Charge),
    },
];

/// Advances the machine one step.
///
/// Falls through the rule table to the direct phase-token mapping; an
/// unrecognized token is logged and lands in [`MissionState::Unknown`]
/// rather than failing, so reconstruction survives new firmware.
pub fn advance(input: &PhaseInput) -> Transition {
    for rule in RULES {
        if (rule.matches)(input) {
            return match rule.outcome {
                Outcome::Goto(next) => Transition {
                    next,
                    republish: false,
                },
                Outcome::GotoAndRepublish(next) => Transition {
                    next,
                    republish: true,
                },
                Outcome::HoldAndRepublish => Transition {
                    next: input.current,
                    republish: true,
                },
            };
        }
    }

    match MissionState::from_phase(input.phase) {
        Some(next) => Transition {
            next,
            republish: false,
        },
        None => {
            warn!("unrecognized mission phase: {:?}", input.phase);
            Transition {
                next: MissionState::Unknown,
                republish: false,
            }
        }
    }
}
