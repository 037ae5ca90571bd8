//! Status resolution policy.
//!
//! Combines a fresh classifier result, an explicit user choice, or a
//! remote record with the job's current state, and decides what to show
//! and what to write.
//!
//! ```text
//! NoData ──lookup miss──▶ Detecting ──classified──▶ Resolved(x)
//!                             ▲                        │ mark y
//!                             │ auto                   ▼
//!                             └──────────────── Overridden(y)
//!
//! any ──fresher remote record──▶ Resolved(x) | Overridden(x)
//! ```
//!
//! [`step`] is pure; the service layer performs the returned [`Action`].

use serde::Serialize;

use crate::models::{Classification, StatusRecord, StatusSource, WriteOrigin};

/// Where a job sits in the resolution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "has_pms", rename_all = "snake_case")]
pub enum ResolutionState {
    NoData,
    Detecting,
    Resolved(bool),
    Overridden(bool),
}

impl ResolutionState {
    /// State implied by a cached record (or its absence).
    pub fn of(record: Option<&StatusRecord>) -> Self {
        match record {
            None => Self::NoData,
            Some(r) => match r.source {
                StatusSource::Detected => Self::Resolved(r.has_pms),
                StatusSource::UserOverride => Self::Overridden(r.has_pms),
            },
        }
    }

    pub fn classification(self) -> Classification {
        match self {
            Self::NoData | Self::Detecting => Classification::Unknown,
            Self::Resolved(x) | Self::Overridden(x) => Classification::from_flag(x),
        }
    }
}

/// Whether a classifier run was asked for by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Passive,
    Explicit,
}

impl Trigger {
    pub fn origin(self) -> WriteOrigin {
        match self {
            Self::Passive => WriteOrigin::PassiveScan,
            Self::Explicit => WriteOrigin::ExplicitDetect,
        }
    }
}

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Neither the local cache nor the remote store knows the job.
    LookupMiss,
    /// The classifier produced a result.
    Classified { has_pms: bool, trigger: Trigger },
    /// The user marked the job "Has PMS" / "No PMS".
    Mark(bool),
    /// The user pressed "Auto".
    Auto,
    /// A remote read returned a record fresher than the local one.
    Remote(StatusRecord),
}

/// What the caller must do to complete a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    /// Run the classifier over the job's text and feed back `Classified`.
    RunClassifier,
    /// Write locally and push to the remote store.
    Persist { has_pms: bool, origin: WriteOrigin },
    /// Store the remote record locally without pushing it back.
    Adopt(StatusRecord),
    /// A passive detection was dropped because a user override exists.
    Suppress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: ResolutionState,
    pub action: Action,
}

impl Transition {
    fn to(next: ResolutionState, action: Action) -> Self {
        Self { next, action }
    }

    fn stay(state: ResolutionState) -> Self {
        Self::to(state, Action::None)
    }
}

/// Advance the state machine by one event.
pub fn step(state: ResolutionState, event: Event) -> Transition {
    use ResolutionState::*;

    match (state, event) {
        (NoData, Event::LookupMiss) => Transition::to(Detecting, Action::RunClassifier),
        (_, Event::LookupMiss) => Transition::stay(state),

        (Overridden(y), Event::Classified { trigger: Trigger::Passive, .. }) => {
            Transition::to(Overridden(y), Action::Suppress)
        }
        (_, Event::Classified { has_pms, trigger }) => Transition::to(
            Resolved(has_pms),
            Action::Persist {
                has_pms,
                origin: trigger.origin(),
            },
        ),

        (_, Event::Mark(y)) => Transition::to(
            Overridden(y),
            Action::Persist {
                has_pms: y,
                origin: WriteOrigin::UserOverride,
            },
        ),

        (_, Event::Auto) => Transition::to(Detecting, Action::RunClassifier),

        (_, Event::Remote(record)) => {
            Transition::to(ResolutionState::of(Some(&record)), Action::Adopt(record))
        }
    }
}

/// Whether a remote record should replace the local one.
///
/// Remote wins on cold start (nothing local) or when it is strictly newer
/// than a local record that was not written in this session.
pub fn should_adopt_remote(
    local: Option<&StatusRecord>,
    local_is_session_write: bool,
    remote: &StatusRecord,
) -> bool {
    match local {
        None => true,
        Some(_) if local_is_session_write => false,
        Some(l) => remote.updated_at > l.updated_at,
    }
}
