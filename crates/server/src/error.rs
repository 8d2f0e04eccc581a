// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical server error kinds with stable wire strings.
//!
//! The RPC transport carries errors as plain strings. Every layer that
//! receives one can promote it back to the canonical kind via [`ServerError::decode`];
//! strings that match no kind are preserved as opaque errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of error kinds the server returns on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoSimForControllerToken,
    InvalidControllerToken,
    ControllerAlreadySignedIn,
    DuplicateSimName,
    NoNamedSim,
    InvalidPassword,
    InvalidSimConfiguration,
    InvalidCommandSyntax,
    TcwAlreadyOccupied,
    RpcTimeout,
    RpcVersionMismatch,
    ServerDisconnected,
    WeatherUnavailable,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        Self::NoSimForControllerToken,
        Self::InvalidControllerToken,
        Self::ControllerAlreadySignedIn,
        Self::DuplicateSimName,
        Self::NoNamedSim,
        Self::InvalidPassword,
        Self::InvalidSimConfiguration,
        Self::InvalidCommandSyntax,
        Self::TcwAlreadyOccupied,
        Self::RpcTimeout,
        Self::RpcVersionMismatch,
        Self::ServerDisconnected,
        Self::WeatherUnavailable,
    ];

    /// Stable textual form. Changing any of these breaks wire compatibility
    /// with deployed clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSimForControllerToken => "no sim for controller token",
            Self::InvalidControllerToken => "invalid controller token",
            Self::ControllerAlreadySignedIn => "controller already signed in",
            Self::DuplicateSimName => "sim with that name already exists",
            Self::NoNamedSim => "no sim with that name",
            Self::InvalidPassword => "invalid password",
            Self::InvalidSimConfiguration => "invalid sim configuration",
            Self::InvalidCommandSyntax => "invalid command syntax",
            Self::TcwAlreadyOccupied => "TCW already occupied",
            Self::RpcTimeout => "RPC call timed out",
            Self::RpcVersionMismatch => "RPC protocol version mismatch",
            Self::ServerDisconnected => "server disconnected",
            Self::WeatherUnavailable => "weather data unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error as seen by RPC callers: either one of the canonical kinds or an
/// opaque pass-through (simulator- and navigation-level errors travel as
/// their message text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerError {
    Kind(ErrorKind),
    Opaque(String),
}

impl ServerError {
    /// Rehydrate an error received over the wire. Known strings map back to
    /// the canonical kind; everything else stays opaque.
    pub fn decode(s: &str) -> ServerError {
        for kind in ErrorKind::ALL {
            if kind.as_str() == s {
                return ServerError::Kind(kind);
            }
        }
        ServerError::Opaque(s.to_owned())
    }

    pub fn opaque(msg: impl Into<String>) -> ServerError {
        ServerError::Opaque(msg.into())
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Kind(k) => Some(*k),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(k) => f.write_str(k.as_str()),
            Self::Opaque(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        ServerError::Kind(kind)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
