// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{ErrorKind, ServerError};

#[test]
fn every_kind_round_trips_through_its_wire_string() {
    for kind in ErrorKind::ALL {
        let decoded = ServerError::decode(kind.as_str());
        assert_eq!(decoded, ServerError::Kind(kind), "kind {kind:?}");
    }
}

#[test]
fn unknown_strings_stay_opaque() {
    let decoded = ServerError::decode("aircraft AAL123 not found");
    assert_eq!(decoded, ServerError::Opaque("aircraft AAL123 not found".to_owned()));
    assert_eq!(decoded.to_string(), "aircraft AAL123 not found");
    assert_eq!(decoded.kind(), None);
}

#[test]
fn wire_strings_are_distinct() {
    for a in ErrorKind::ALL {
        for b in ErrorKind::ALL {
            if a != b {
                assert_ne!(a.as_str(), b.as_str(), "{a:?} vs {b:?}");
            }
        }
    }
}

#[yare::parameterized(
    token = { ErrorKind::NoSimForControllerToken, "no sim for controller token" },
    occupied = { ErrorKind::TcwAlreadyOccupied, "TCW already occupied" },
    version = { ErrorKind::RpcVersionMismatch, "RPC protocol version mismatch" },
    weather = { ErrorKind::WeatherUnavailable, "weather data unavailable" },
    timeout = { ErrorKind::RpcTimeout, "RPC call timed out" },
)]
fn stable_strings(kind: ErrorKind, expected: &str) {
    assert_eq!(kind.as_str(), expected);
    assert_eq!(kind.to_string(), expected);
}

#[test]
fn display_matches_wire_string_for_kinds() {
    let err = ServerError::from(ErrorKind::DuplicateSimName);
    assert_eq!(err.to_string(), "sim with that name already exists");
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateSimName));
}
