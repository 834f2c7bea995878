//! Session module for ClearKey CDM sessions.
//!
//! A session owns no key material itself; its keys live in the
//! [`SessionKeyStore`](crate::key::SessionKeyStore) under the session id.
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// EME session type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionType {
    #[default]
    Temporary,
    PersistentLicense,
}

impl SessionType {
    /// Name used in license requests and key sets.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Temporary => "temporary",
            SessionType::PersistentLicense => "persistent-license",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "temporary" => Ok(SessionType::Temporary),
            "persistent-license" => Ok(SessionType::PersistentLicense),
            other => Err(Error::Other(format!("Unknown session type: {}", other))),
        }
    }
}

/// Session lifecycle state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    Closed,
}

/// A ClearKey CDM session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session number (1-indexed, per CDM instance).
    pub number: u32,
    /// Session identifier handed to the application.
    pub id: String,
    pub session_type: SessionType,
    pub state: SessionState,
}

impl Session {
    /// Create a session; its id is the decimal session number.
    pub fn new(number: u32, session_type: SessionType) -> Self {
        Self {
            number,
            id: number.to_string(),
            session_type,
            state: SessionState::Uninitialized,
        }
    }

    pub fn activate(&mut self) {
        if self.state == SessionState::Uninitialized {
            self.state = SessionState::Active;
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}
