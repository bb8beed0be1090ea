//! Round-trip state machine.
//!
//! The automation script running inside Blender prints one marker line per
//! step (`ARX_ROUNDTRIP <event> [detail]`). Replaying those markers through
//! [`RoundTripMachine`] classifies how far the round trip got and whether the
//! export went through the UI operator or the direct serializer fallback.

use std::fmt;

use serde::Serialize;

use crate::error::{RtError, RtResult};

pub const MARKER_PREFIX: &str = "ARX_ROUNDTRIP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundTripState {
    Idle,
    Importing,
    Exporting,
    Fallback,
    Done,
}

impl RoundTripState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Importing => "importing",
            Self::Exporting => "exporting",
            Self::Fallback => "fallback",
            Self::Done => "done",
        }
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Importing)
                | (Self::Importing, Self::Exporting)
                | (Self::Importing, Self::Done)
                | (Self::Exporting, Self::Done)
                | (Self::Exporting, Self::Fallback)
                | (Self::Fallback, Self::Done)
        )
    }
}

impl fmt::Display for RoundTripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerEvent {
    Ready,
    ReadyTimeout,
    ImportBegin,
    ImportOk,
    ImportFailed,
    ExportBegin,
    ExportOk,
    ExportFailed,
    FallbackBegin,
    FallbackOk,
    FallbackFailed,
    Quit,
}

impl MarkerEvent {
    pub const ALL: [Self; 12] = [
        Self::Ready,
        Self::ReadyTimeout,
        Self::ImportBegin,
        Self::ImportOk,
        Self::ImportFailed,
        Self::ExportBegin,
        Self::ExportOk,
        Self::ExportFailed,
        Self::FallbackBegin,
        Self::FallbackOk,
        Self::FallbackFailed,
        Self::Quit,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::ReadyTimeout => "ready_timeout",
            Self::ImportBegin => "import_begin",
            Self::ImportOk => "import_ok",
            Self::ImportFailed => "import_failed",
            Self::ExportBegin => "export_begin",
            Self::ExportOk => "export_ok",
            Self::ExportFailed => "export_failed",
            Self::FallbackBegin => "fallback_begin",
            Self::FallbackOk => "fallback_ok",
            Self::FallbackFailed => "fallback_failed",
            Self::Quit => "quit",
        }
    }

    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub event: MarkerEvent,
    pub detail: Option<String>,
}

/// Parse one output line. Lines without the marker prefix, or with an
/// unknown event, yield `None`.
#[must_use]
pub fn parse_marker(line: &str) -> Option<Marker> {
    let rest = line.trim().strip_prefix(MARKER_PREFIX)?;
    let rest = rest.strip_prefix(' ')?.trim_start();
    let (token, detail) = match rest.split_once(' ') {
        Some((token, detail)) => (token, Some(detail.trim())),
        None => (rest, None),
    };
    Some(Marker {
        event: MarkerEvent::parse(token)?,
        detail: detail.filter(|d| !d.is_empty()).map(str::to_owned),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundTripOutcome {
    ExportedViaUi,
    ExportedViaFallback,
    FallbackFailed,
    ImportFailed,
    ContextNotReady,
    Incomplete,
}

impl RoundTripOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExportedViaUi => "exported_via_ui",
            Self::ExportedViaFallback => "exported_via_fallback",
            Self::FallbackFailed => "fallback_failed",
            Self::ImportFailed => "import_failed",
            Self::ContextNotReady => "context_not_ready",
            Self::Incomplete => "incomplete",
        }
    }

    /// A level file was written by one of the two export paths.
    #[must_use]
    pub const fn exported(self) -> bool {
        matches!(self, Self::ExportedViaUi | Self::ExportedViaFallback)
    }
}

impl fmt::Display for RoundTripOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: RoundTripState,
    pub to: RoundTripState,
    pub event: MarkerEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTripTrace {
    pub outcome: RoundTripOutcome,
    pub final_state: RoundTripState,
    pub ui_ready: bool,
    pub transitions: Vec<Transition>,
    /// Detail text attached to failure markers, in order.
    pub failures: Vec<String>,
    /// Markers that arrived in a state where they make no sense.
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RoundTripMachine {
    state: RoundTripState,
    ui_ready: bool,
    ready_timed_out: bool,
    import_failed: bool,
    fallback_succeeded: Option<bool>,
    transitions: Vec<Transition>,
    failures: Vec<String>,
}

impl Default for RoundTripMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundTripMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RoundTripState::Idle,
            ui_ready: false,
            ready_timed_out: false,
            import_failed: false,
            fallback_succeeded: None,
            transitions: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> RoundTripState {
        self.state
    }

    fn transition(&mut self, next: RoundTripState, event: MarkerEvent) -> RtResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(RtError::InvalidTransition {
                from: self.state.as_str().to_owned(),
                to: next.as_str().to_owned(),
            });
        }
        tracing::debug!(from = %self.state, to = %next, event = event.as_str(), "round-trip transition");
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            event,
        });
        self.state = next;
        Ok(())
    }

    fn require(&self, expected: RoundTripState, event: MarkerEvent) -> RtResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RtError::InvalidTransition {
                from: self.state.as_str().to_owned(),
                to: format!("{} ({})", expected.as_str(), event.as_str()),
            })
        }
    }

    /// Feed one marker. Illegal orderings are rejected without changing state.
    pub fn apply(&mut self, marker: &Marker) -> RtResult<()> {
        use MarkerEvent as E;
        use RoundTripState as S;

        match marker.event {
            E::Ready => {
                self.require(S::Idle, marker.event)?;
                self.ui_ready = true;
            }
            E::ReadyTimeout => {
                self.require(S::Idle, marker.event)?;
                self.ready_timed_out = true;
            }
            E::ImportBegin => self.transition(S::Importing, marker.event)?,
            E::ImportOk => self.require(S::Importing, marker.event)?,
            E::ImportFailed => {
                self.transition(S::Done, marker.event)?;
                self.import_failed = true;
            }
            E::ExportBegin => self.transition(S::Exporting, marker.event)?,
            E::ExportOk => {
                self.require(S::Exporting, marker.event)?;
                self.transition(S::Done, marker.event)?;
            }
            E::ExportFailed => {
                self.require(S::Exporting, marker.event)?;
                self.transition(S::Fallback, marker.event)?;
            }
            E::FallbackBegin => self.require(S::Fallback, marker.event)?,
            E::FallbackOk | E::FallbackFailed => {
                self.require(S::Fallback, marker.event)?;
                self.transition(S::Done, marker.event)?;
                self.fallback_succeeded = Some(marker.event == E::FallbackOk);
            }
            E::Quit => {}
        }

        if matches!(
            marker.event,
            E::ImportFailed | E::ExportFailed | E::FallbackFailed | E::ReadyTimeout
        ) {
            let detail = marker.detail.as_deref().unwrap_or("no detail");
            self.failures.push(format!("{}: {detail}", marker.event.as_str()));
        }
        Ok(())
    }

    #[must_use]
    pub fn outcome(&self) -> RoundTripOutcome {
        if self.state == RoundTripState::Done {
            if self.import_failed {
                return RoundTripOutcome::ImportFailed;
            }
            return match self.fallback_succeeded {
                None => RoundTripOutcome::ExportedViaUi,
                Some(true) => RoundTripOutcome::ExportedViaFallback,
                Some(false) => RoundTripOutcome::FallbackFailed,
            };
        }
        if self.ready_timed_out {
            RoundTripOutcome::ContextNotReady
        } else {
            RoundTripOutcome::Incomplete
        }
    }

    #[must_use]
    pub fn finish(self, anomalies: Vec<String>) -> RoundTripTrace {
        RoundTripTrace {
            outcome: self.outcome(),
            final_state: self.state,
            ui_ready: self.ui_ready,
            transitions: self.transitions,
            failures: self.failures,
            anomalies,
        }
    }
}

/// Replay every marker found in `output`. Out-of-order markers are recorded
/// as anomalies and skipped.
#[must_use]
pub fn replay(output: &str) -> RoundTripTrace {
    let mut machine = RoundTripMachine::new();
    let mut anomalies = Vec::new();
    for marker in output.lines().filter_map(parse_marker) {
        if let Err(error) = machine.apply(&marker) {
            tracing::warn!(event = marker.event.as_str(), %error, "ignoring out-of-order marker");
            anomalies.push(format!("{}: {error}", marker.event.as_str()));
        }
    }
    machine.finish(anomalies)
}
