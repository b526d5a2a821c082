//! Session state machine
//!
//! Tracks a connection from upgrade to close:
//!
//! ```text
//! Unauthenticated ──auth──► Viewer | Controller ──► Closed
//! ```
//!
//! There is no way back to `Unauthenticated` once a role has been granted.

use std::fmt;

use serde::Deserialize;

/// Role requested in an `auth` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Receives frames only
    #[default]
    Viewer,
    /// May start, stop and record the stream
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Viewer => write!(f, "viewer"),
            Role::Controller => write!(f, "controller"),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Upgraded, waiting for a valid `auth`
    Unauthenticated,
    /// Authenticated as a viewer
    Viewer,
    /// Authenticated as the controller
    Controller,
    /// Socket closed
    Closed,
}

impl SessionPhase {
    /// Phase entered after authenticating with `role`
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Viewer => SessionPhase::Viewer,
            Role::Controller => SessionPhase::Controller,
        }
    }

    /// Granted role, if any
    pub fn role(&self) -> Option<Role> {
        match self {
            SessionPhase::Viewer => Some(Role::Viewer),
            SessionPhase::Controller => Some(Role::Controller),
            SessionPhase::Unauthenticated | SessionPhase::Closed => None,
        }
    }

    /// Whether any role has been granted
    pub fn is_authenticated(&self) -> bool {
        self.role().is_some()
    }

    /// Whether privileged stream commands are allowed
    pub fn is_controller(&self) -> bool {
        *self == SessionPhase::Controller
    }

    /// Apply a successful authentication
    ///
    /// Only an unauthenticated session changes phase; an authenticated one
    /// keeps the role it already holds.
    pub fn authenticate(&mut self, role: Role) -> SessionPhase {
        if *self == SessionPhase::Unauthenticated {
            *self = SessionPhase::for_role(role);
        }
        *self
    }

    /// Mark the session closed, returning the phase it was in
    pub fn close(&mut self) -> SessionPhase {
        std::mem::replace(self, SessionPhase::Closed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Unauthenticated => write!(f, "unauthenticated"),
            SessionPhase::Viewer => write!(f, "viewer"),
            SessionPhase::Controller => write!(f, "controller"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}
