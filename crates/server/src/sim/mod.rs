// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simulator seam: the interface the coordination core consumes from the
//! simulation proper, plus the wire types shared with clients.
//!
//! The simulator owns its own interior locking; all methods take `&self` and
//! may be called from any worker. The core never holds a session lock across
//! a simulator call.

pub mod local;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commands::AircraftCommand;
use crate::error::ServerError;

/// Opaque world-state snapshot from the simulator, tagged with a monotonic
/// generation index. Clients discard updates whose generation is lower than
/// one already applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimStateUpdate {
    pub generation: u64,
    pub payload: Vec<u8>,
}

/// The state update the dispatcher hands back on mutating RPCs: the
/// simulator snapshot wrapped with the session's active TCWs and the pending
/// events for the calling connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    pub sim: SimStateUpdate,
    pub active_tcws: Vec<String>,
    pub events: Vec<SimEvent>,
}

/// Events the simulator (or the manager, for broadcasts) posts into
/// per-connection subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    StatusMessage { text: String },
    ErrorMessage { text: String },
    ServerBroadcast { text: String },
    ContactRequest { callsign: String, tcp: String, text: String, voice: String, kind: String },
}

/// Handle for one connection's event subscription. Released on sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSub(pub u64);

/// Spoken readback returned to the issuing client for local TTS playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readback {
    pub text: String,
    pub voice: String,
}

/// A pending pilot contact popped by `Sim.RequestContact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub callsign: String,
    pub text: String,
    pub voice: String,
    pub kind: String,
}

/// What the session/dispatch core requires of a simulator implementation.
///
/// Mutations are serialized by the simulator's interior locking; the core
/// makes at most one simulator call per RPC.
pub trait Simulator: Send + Sync {
    /// Sign a primary controller on at a TCW and open its event subscription.
    fn sign_on(&self, tcw: &str) -> Result<EventSub, ServerError>;

    /// Release a primary controller's hold on a TCW.
    fn sign_off(&self, tcw: &str) -> Result<(), ServerError>;

    /// Open a subscription without occupying a position (relief joiners).
    fn subscribe(&self) -> EventSub;

    /// Release a subscription and drop its queued events.
    fn release(&self, sub: EventSub);

    /// Drain pending events for one subscription, in posting order.
    fn drain_events(&self, sub: EventSub) -> Vec<SimEvent>;

    /// Post an event to every open subscription.
    fn post_event(&self, ev: SimEvent);

    /// Advance the world one tick.
    fn update(&self);

    fn state_update(&self) -> SimStateUpdate;

    /// Pause gate: set when no human occupies any TCW.
    fn set_paused_by_server(&self, paused: bool);
    fn paused_by_server(&self) -> bool;

    fn toggle_pause(&self, tcw: &str) -> Result<(), ServerError>;
    fn set_sim_rate(&self, tcw: &str, rate: f32) -> Result<(), ServerError>;

    /// Time since the last human interaction; drives the 4 h teardown.
    fn idle_time(&self) -> Duration;

    /// Runtime mapping from each TCW to the TCPs consolidated under it.
    fn consolidation(&self) -> BTreeMap<String, Vec<String>>;

    /// Snapshot suitable for transport (`SimManager.GetSerializeSim`).
    fn serialize(&self) -> Result<Vec<u8>, ServerError>;

    /// A randomized readback error that pre-empts the real command, if the
    /// simulator decides one fires for this transmission.
    fn pilot_mixup(&self, callsign: &str) -> Option<Readback>;

    /// The spoken readback for the most recent command run against `callsign`.
    fn readback(&self, callsign: &str) -> Option<Readback>;

    /// Pop the next pending contact for any of the given TCPs.
    fn next_contact(&self, tcps: &[String]) -> Option<Contact>;

    fn has_aircraft(&self, callsign: &str) -> bool;

    /// Apply one parsed aircraft command as the acting TCW.
    fn aircraft_command(
        &self,
        tcw: &str,
        callsign: &str,
        command: AircraftCommand,
    ) -> Result<(), ServerError>;

    fn delete_aircraft(&self, tcw: &str, callsign: &str) -> Result<(), ServerError>;

    /// Final teardown; the session is being destroyed.
    fn shutdown(&self);
}

/// One scenario as advertised in the catalog returned by `Connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    /// The TCW the session creator is signed on at.
    pub root_tcw: String,
    /// TCW -> consolidated TCPs at scenario start.
    pub tcws: BTreeMap<String, Vec<String>>,
}

/// Catalog of available scenarios, grouped, in load order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioCatalog {
    pub groups: indexmap::IndexMap<String, Vec<ScenarioInfo>>,
}

impl ScenarioCatalog {
    pub fn lookup(&self, group: &str, scenario: &str) -> Option<&ScenarioInfo> {
        self.groups.get(group)?.iter().find(|s| s.name == scenario)
    }
}

/// Everything `NewSim` hands the factory to build a simulator.
#[derive(Debug, Clone)]
pub struct SimSetup {
    pub scenario_group: String,
    pub scenario: String,
    pub local: bool,
}

/// Builds simulators for new sessions and owns the scenario catalog.
pub trait SimFactory: Send + Sync {
    fn catalog(&self) -> ScenarioCatalog;

    /// Construct a simulator for a validated setup. Unknown group/scenario
    /// combinations fail with `InvalidSimConfiguration`.
    fn build(&self, setup: &SimSetup) -> Result<Arc<dyn Simulator>, ServerError>;
}
