// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Aircraft-command mini-language.
//!
//! A transmission is a whitespace-separated list of short tokens, parsed
//! greedily in order. Each token's first letter selects a family; the rest is
//! digits, fixes, slash-separated sub-options, or fixed keywords. Parsing is
//! short-circuiting: the first token that fails stops the run and everything
//! from that token onward is reported back as remaining input. Commands that
//! already succeeded are not rolled back.

use serde::{Deserialize, Serialize};

use crate::sim::Simulator;

/// One parsed command, as handed to the simulator. The variant is the typed
/// call; the acting TCW and callsign travel alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AircraftCommand {
    /// Altitude in feet (token values are hundreds).
    AssignAltitude { altitude: i32, after_speed: bool },
    AltitudeOurDiscretion,
    AtFixClearedApproach { fix: String, approach: String },
    CrossFixAt { fix: String, altitude: Option<AltitudeRestriction>, speed: Option<i32> },
    CancelApproachClearance,
    ClimbViaSid,
    DescendViaStar,
    ClearedStraightIn { approach: String },
    ContactController { position: String },
    ClearedApproach { approach: String },
    DepartFixDirect { fix: String, next: String },
    DepartFixHeading { fix: String, heading: i32 },
    DirectFix { fix: String },
    ExpediteClimb,
    ExpediteDescent,
    ExpectApproach { approach: String },
    ContactTrackingController,
    FlyPresentHeading,
    FlyHeading { heading: i32 },
    InterceptLocalizer,
    Ident,
    TurnLeft { degrees: i32 },
    TurnRight { degrees: i32 },
    TurnLeftHeading { heading: i32 },
    TurnRightHeading { heading: i32 },
    ResumeOwnNavigation,
    RadarServicesTerminated,
    CancelSpeedRestrictions,
    AssignSpeed { speed: i32, after_altitude: bool },
    MaintainSlowestPractical,
    MaintainMaximumForward,
    SaySpeed,
    SayHeading,
    SayAltitude,
    SquawkStandby,
    SquawkAltitude,
    SquawkOn,
    Squawk { code: u16 },
    ContactTower,
    DeleteAircraft,
}

/// Closed altitude range in feet. A zero endpoint means unbounded on that
/// side: `120+` -> [12000, 0], `120-` -> [0, 12000], `80-120` -> [8000, 12000].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltitudeRestriction {
    pub range: [i32; 2],
}

/// Outcome of one transmission. `error_message` is empty on full success;
/// otherwise `remaining_input` holds the failing token and everything after
/// it. This travels inside the reply struct, never as an RPC error, because
/// the transport discards reply payloads when the method errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRun {
    pub error_message: String,
    pub remaining_input: String,
}

impl CommandRun {
    pub fn ok(&self) -> bool {
        self.error_message.is_empty()
    }
}

/// Parse and apply a full transmission against the simulator, greedily.
/// Simulator rejections stop the run exactly like parse failures.
pub fn run_commands(sim: &dyn Simulator, tcw: &str, callsign: &str, input: &str) -> CommandRun {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        let result = parse_token(token)
            .and_then(|cmd| sim.aircraft_command(tcw, callsign, cmd).map_err(|e| e.to_string()));
        if let Err(message) = result {
            return CommandRun {
                error_message: message,
                remaining_input: tokens[i..].join(" "),
            };
        }
    }
    CommandRun::default()
}

/// Parse a single command token. Case-sensitive.
pub fn parse_token(token: &str) -> Result<AircraftCommand, String> {
    let mut chars = token.chars();
    let family = chars.next().ok_or_else(|| "empty command".to_owned())?;
    let rest = chars.as_str();

    match family {
        'A' => parse_altitude_family(token, rest),
        'C' => parse_cleared_family(token, rest),
        'D' => parse_depart_family(token, rest),
        'E' => parse_expedite_family(token, rest),
        'F' => match token {
            "FC" => Ok(AircraftCommand::ContactTrackingController),
            _ => Err(format!("{token}: unknown command")),
        },
        'H' => {
            if rest.is_empty() {
                Ok(AircraftCommand::FlyPresentHeading)
            } else {
                let heading = parse_heading(rest).map_err(|e| format!("{token}: {e}"))?;
                Ok(AircraftCommand::FlyHeading { heading })
            }
        }
        'I' => match token {
            "I" => Ok(AircraftCommand::InterceptLocalizer),
            "ID" => Ok(AircraftCommand::Ident),
            _ => Err(format!("{token}: unknown command")),
        },
        'L' => parse_turn(token, rest, TurnDirection::Left),
        'R' => match token {
            "RON" => Ok(AircraftCommand::ResumeOwnNavigation),
            "RST" => Ok(AircraftCommand::RadarServicesTerminated),
            _ => parse_turn(token, rest, TurnDirection::Right),
        },
        'S' => parse_speed_family(token, rest),
        'T' => parse_then_family(token, rest),
        'X' => match token {
            "X" => Ok(AircraftCommand::DeleteAircraft),
            _ => Err(format!("{token}: unknown command")),
        },
        _ => Err(format!("{token}: unknown command")),
    }
}

enum TurnDirection {
    Left,
    Right,
}

// A            altitude our discretion
// A<digits>    assign altitude (hundreds of feet)
// A<fix>/C<ap> at fix, cleared approach
fn parse_altitude_family(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    if rest.is_empty() {
        return Ok(AircraftCommand::AltitudeOurDiscretion);
    }
    if let Some(altitude) = parse_all_digits(rest) {
        return Ok(AircraftCommand::AssignAltitude { altitude: altitude * 100, after_speed: false });
    }
    if let Some((fix, after)) = rest.split_once('/') {
        if let Some(approach) = after.strip_prefix('C') {
            if fix.is_empty() || approach.is_empty() {
                return Err(format!("{token}: expected A<fix>/C<approach>"));
            }
            return Ok(AircraftCommand::AtFixClearedApproach {
                fix: fix.to_owned(),
                approach: approach.to_owned(),
            });
        }
        return Err(format!("{token}: expected A<fix>/C<approach>"));
    }
    Err(format!("{token}: expected an altitude or A<fix>/C<approach>"))
}

// CAC / CVS / CSI<ap> / CT<ctrl> / C<digits> / C<fix>/A..[/S..] / C<ap>
fn parse_cleared_family(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    match token {
        "CAC" => return Ok(AircraftCommand::CancelApproachClearance),
        "CVS" => return Ok(AircraftCommand::ClimbViaSid),
        _ => {}
    }
    if let Some(approach) = rest.strip_prefix("SI") {
        if !approach.is_empty() {
            return Ok(AircraftCommand::ClearedStraightIn { approach: approach.to_owned() });
        }
    }
    if let Some(position) = rest.strip_prefix('T') {
        if !position.is_empty() {
            return Ok(AircraftCommand::ContactController { position: position.to_owned() });
        }
    }
    if let Some(altitude) = parse_all_digits(rest) {
        return Ok(AircraftCommand::AssignAltitude { altitude: altitude * 100, after_speed: false });
    }
    if rest.contains('/') {
        return parse_cross_fix(token, rest);
    }
    if rest.is_empty() {
        return Err(format!("{token}: expected an approach, altitude, or fix"));
    }
    Ok(AircraftCommand::ClearedApproach { approach: rest.to_owned() })
}

// C<fix>/A<restriction>[/S<speed>]; the A and S components may come in
// either order but each appears at most once.
fn parse_cross_fix(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    let mut parts = rest.split('/');
    let fix = parts.next().unwrap_or_default();
    if fix.is_empty() {
        return Err(format!("{token}: missing fix"));
    }
    let mut altitude: Option<AltitudeRestriction> = None;
    let mut speed: Option<i32> = None;
    for part in parts {
        if let Some(spec) = part.strip_prefix('A') {
            if altitude.is_some() {
                return Err(format!("{token}: duplicate altitude restriction"));
            }
            altitude = Some(parse_altitude_restriction(spec).map_err(|e| format!("{token}: {e}"))?);
        } else if let Some(spec) = part.strip_prefix('S') {
            if speed.is_some() {
                return Err(format!("{token}: duplicate speed restriction"));
            }
            let kts =
                parse_all_digits(spec).ok_or_else(|| format!("{token}: invalid speed {spec:?}"))?;
            speed = Some(kts);
        } else {
            return Err(format!("{token}: expected /A<altitude> or /S<speed>"));
        }
    }
    if altitude.is_none() && speed.is_none() {
        return Err(format!("{token}: expected /A<altitude> or /S<speed>"));
    }
    Ok(AircraftCommand::CrossFixAt { fix: fix.to_owned(), altitude, speed })
}

// N / N+ / N- / N-M, endpoints in hundreds of feet, 0 = unbounded side.
fn parse_altitude_restriction(spec: &str) -> Result<AltitudeRestriction, String> {
    if let Some(lo) = spec.strip_suffix('+').and_then(parse_all_digits) {
        return Ok(AltitudeRestriction { range: [lo * 100, 0] });
    }
    if let Some(hi) = spec.strip_suffix('-').and_then(parse_all_digits) {
        return Ok(AltitudeRestriction { range: [0, hi * 100] });
    }
    if let Some((lo, hi)) = spec.split_once('-') {
        let lo = parse_all_digits(lo).ok_or_else(|| format!("invalid altitude {spec:?}"))?;
        let hi = parse_all_digits(hi).ok_or_else(|| format!("invalid altitude {spec:?}"))?;
        if lo > hi {
            return Err(format!("altitude range is inverted: {spec:?}"));
        }
        return Ok(AltitudeRestriction { range: [lo * 100, hi * 100] });
    }
    let at = parse_all_digits(spec).ok_or_else(|| format!("invalid altitude {spec:?}"))?;
    Ok(AltitudeRestriction { range: [at * 100, at * 100] })
}

// DVS / D<digits> / D<fix>/D<fix2> / D<fix>/H<hdg> / D<3-5 chars>
fn parse_depart_family(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    if token == "DVS" {
        return Ok(AircraftCommand::DescendViaStar);
    }
    if let Some(altitude) = parse_all_digits(rest) {
        return Ok(AircraftCommand::AssignAltitude { altitude: altitude * 100, after_speed: false });
    }
    if let Some((fix, after)) = rest.split_once('/') {
        if fix.is_empty() {
            return Err(format!("{token}: missing fix"));
        }
        if let Some(next) = after.strip_prefix('D') {
            if !next.is_empty() {
                return Ok(AircraftCommand::DepartFixDirect {
                    fix: fix.to_owned(),
                    next: next.to_owned(),
                });
            }
        }
        if let Some(hdg) = after.strip_prefix('H') {
            let heading = parse_heading(hdg).map_err(|e| format!("{token}: {e}"))?;
            return Ok(AircraftCommand::DepartFixHeading { fix: fix.to_owned(), heading });
        }
        return Err(format!("{token}: expected D<fix>/D<fix> or D<fix>/H<heading>"));
    }
    if (3..=5).contains(&rest.len()) && rest.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(AircraftCommand::DirectFix { fix: rest.to_owned() });
    }
    Err(format!("{token}: invalid fix {rest:?}"))
}

// EC / ED / E<ap>
fn parse_expedite_family(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    match token {
        "EC" => return Ok(AircraftCommand::ExpediteClimb),
        "ED" => return Ok(AircraftCommand::ExpediteDescent),
        _ => {}
    }
    if rest.is_empty() {
        return Err(format!("{token}: expected an approach"));
    }
    Ok(AircraftCommand::ExpectApproach { approach: rest.to_owned() })
}

// L<deg>D / L<hdg>, and the R mirror via `dir`.
fn parse_turn(token: &str, rest: &str, dir: TurnDirection) -> Result<AircraftCommand, String> {
    if let Some(deg) = rest.strip_suffix('D').and_then(parse_all_digits) {
        if !(1..=360).contains(&deg) {
            return Err(format!("{token}: turn must be 1-360 degrees"));
        }
        return Ok(match dir {
            TurnDirection::Left => AircraftCommand::TurnLeft { degrees: deg },
            TurnDirection::Right => AircraftCommand::TurnRight { degrees: deg },
        });
    }
    let heading = parse_heading(rest).map_err(|e| format!("{token}: {e}"))?;
    Ok(match dir {
        TurnDirection::Left => AircraftCommand::TurnLeftHeading { heading },
        TurnDirection::Right => AircraftCommand::TurnRightHeading { heading },
    })
}

// S / SMIN / SMAX / SS / SH / SA / SQS / SQA / SQON / SQ<4 octal> / S<kts>
fn parse_speed_family(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    match token {
        "S" => return Ok(AircraftCommand::CancelSpeedRestrictions),
        "SMIN" => return Ok(AircraftCommand::MaintainSlowestPractical),
        "SMAX" => return Ok(AircraftCommand::MaintainMaximumForward),
        "SS" => return Ok(AircraftCommand::SaySpeed),
        "SH" => return Ok(AircraftCommand::SayHeading),
        "SA" => return Ok(AircraftCommand::SayAltitude),
        "SQS" => return Ok(AircraftCommand::SquawkStandby),
        "SQA" => return Ok(AircraftCommand::SquawkAltitude),
        "SQON" => return Ok(AircraftCommand::SquawkOn),
        _ => {}
    }
    if let Some(code) = rest.strip_prefix('Q') {
        let code = parse_squawk(code).map_err(|e| format!("{token}: {e}"))?;
        return Ok(AircraftCommand::Squawk { code });
    }
    if let Some(speed) = parse_all_digits(rest) {
        return Ok(AircraftCommand::AssignSpeed { speed, after_altitude: false });
    }
    Err(format!("{token}: unknown command"))
}

// TO / TS<kts> / TA<alt> / TC<alt> / TD<alt> / T<deg>L / T<deg>R
fn parse_then_family(token: &str, rest: &str) -> Result<AircraftCommand, String> {
    if token == "TO" {
        return Ok(AircraftCommand::ContactTower);
    }
    if let Some(spec) = rest.strip_prefix('S') {
        let speed =
            parse_all_digits(spec).ok_or_else(|| format!("{token}: invalid speed {spec:?}"))?;
        return Ok(AircraftCommand::AssignSpeed { speed, after_altitude: true });
    }
    for prefix in ['A', 'C', 'D'] {
        if let Some(spec) = rest.strip_prefix(prefix) {
            let altitude = parse_all_digits(spec)
                .ok_or_else(|| format!("{token}: invalid altitude {spec:?}"))?;
            return Ok(AircraftCommand::AssignAltitude {
                altitude: altitude * 100,
                after_speed: true,
            });
        }
    }
    if let Some(deg) = rest.strip_suffix('L').and_then(parse_all_digits) {
        if !(1..=360).contains(&deg) {
            return Err(format!("{token}: turn must be 1-360 degrees"));
        }
        return Ok(AircraftCommand::TurnLeft { degrees: deg });
    }
    if let Some(deg) = rest.strip_suffix('R').and_then(parse_all_digits) {
        if !(1..=360).contains(&deg) {
            return Err(format!("{token}: turn must be 1-360 degrees"));
        }
        return Ok(AircraftCommand::TurnRight { degrees: deg });
    }
    Err(format!("{token}: unknown command"))
}

fn parse_heading(s: &str) -> Result<i32, String> {
    let heading = parse_all_digits(s).ok_or_else(|| format!("invalid heading {s:?}"))?;
    if (1..=360).contains(&heading) {
        Ok(heading)
    } else {
        Err(format!("heading must be 1-360, got {heading}"))
    }
}

fn parse_squawk(s: &str) -> Result<u16, String> {
    if s.len() != 4 || !s.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(format!("invalid squawk code {s:?}"));
    }
    u16::from_str_radix(s, 8).map_err(|e| format!("invalid squawk code {s:?}: {e}"))
}

fn parse_all_digits(s: &str) -> Option<i32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
