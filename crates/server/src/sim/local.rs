// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process reference simulator.
//!
//! Tracks enough world state to exercise the coordination core end to end:
//! aircraft with assigned altitude/heading/speed, per-subscription event
//! queues, the pause gate, a monotonic state generation, and pending pilot
//! contacts. Flight dynamics and radar modelling live in the full simulator,
//! not here.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::commands::AircraftCommand;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::sim::{
    Contact, EventSub, Readback, ScenarioCatalog, ScenarioInfo, SimFactory, SimSetup, SimEvent,
    SimStateUpdate, Simulator,
};

/// Minimal per-aircraft record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Aircraft {
    altitude: i32,
    heading: i32,
    speed: i32,
    squawk: u16,
}

struct World {
    aircraft: HashMap<String, Aircraft>,
    /// TCW -> consolidated TCPs.
    consolidation: BTreeMap<String, Vec<String>>,
    /// Primary sign-ons, by TCW.
    occupied: BTreeMap<String, EventSub>,
    subs: HashMap<u64, VecDeque<SimEvent>>,
    contacts: VecDeque<(String, Contact)>,
    last_readback: HashMap<String, Readback>,
    last_activity: Instant,
    sim_rate: f32,
    paused: bool,
}

impl Default for World {
    fn default() -> World {
        World {
            aircraft: HashMap::new(),
            consolidation: BTreeMap::new(),
            occupied: BTreeMap::new(),
            subs: HashMap::new(),
            contacts: VecDeque::new(),
            last_readback: HashMap::new(),
            last_activity: Instant::now(),
            sim_rate: 1.0,
            paused: false,
        }
    }
}

pub struct LocalSim {
    state: Mutex<World>,
    generation: AtomicU64,
    next_sub: AtomicU64,
    paused_by_server: AtomicBool,
}

impl LocalSim {
    pub fn new(scenario: &ScenarioInfo) -> Arc<LocalSim> {
        let world = World { consolidation: scenario.tcws.clone(), ..World::default() };
        Arc::new(LocalSim {
            state: Mutex::new(world),
            generation: AtomicU64::new(0),
            next_sub: AtomicU64::new(1),
            paused_by_server: AtomicBool::new(true),
        })
    }

    /// Seed an aircraft (scenario traffic, or tests).
    pub fn spawn_aircraft(&self, callsign: &str) {
        let mut world = self.state.lock();
        world.aircraft.insert(callsign.to_owned(), Aircraft::default());
        drop(world);
        self.bump();
    }

    /// Queue a pilot contact for a TCP (scenario traffic, or tests).
    pub fn push_contact(&self, tcp: &str, contact: Contact) {
        self.state.lock().contacts.push_back((tcp.to_owned(), contact));
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    fn open_sub(&self) -> EventSub {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.state.lock().subs.insert(id, VecDeque::new());
        EventSub(id)
    }

    fn require_aircraft(world: &World, callsign: &str) -> Result<(), ServerError> {
        if world.aircraft.contains_key(callsign) {
            Ok(())
        } else {
            Err(ServerError::opaque(format!("unknown aircraft {callsign}")))
        }
    }
}

impl Simulator for LocalSim {
    fn sign_on(&self, tcw: &str) -> Result<EventSub, ServerError> {
        let sub = self.open_sub();
        let mut world = self.state.lock();
        if world.occupied.contains_key(tcw) {
            world.subs.remove(&sub.0);
            return Err(crate::error::ErrorKind::ControllerAlreadySignedIn.into());
        }
        world.occupied.insert(tcw.to_owned(), sub);
        world.last_activity = Instant::now();
        Ok(sub)
    }

    fn sign_off(&self, tcw: &str) -> Result<(), ServerError> {
        let mut world = self.state.lock();
        world
            .occupied
            .remove(tcw)
            .map(|_| ())
            .ok_or_else(|| ServerError::opaque(format!("TCW {tcw} not signed on")))
    }

    fn subscribe(&self) -> EventSub {
        self.open_sub()
    }

    fn release(&self, sub: EventSub) {
        self.state.lock().subs.remove(&sub.0);
    }

    fn drain_events(&self, sub: EventSub) -> Vec<SimEvent> {
        let mut world = self.state.lock();
        match world.subs.get_mut(&sub.0) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn post_event(&self, ev: SimEvent) {
        let mut world = self.state.lock();
        for queue in world.subs.values_mut() {
            queue.push_back(ev.clone());
        }
    }

    fn update(&self) {
        let world = self.state.lock();
        if world.paused || self.paused_by_server.load(Ordering::Acquire) {
            return;
        }
        drop(world);
        self.bump();
    }

    fn state_update(&self) -> SimStateUpdate {
        let world = self.state.lock();
        let payload = rmp_serde::to_vec_named(&world.aircraft).unwrap_or_default();
        drop(world);
        SimStateUpdate { generation: self.generation.load(Ordering::Acquire), payload }
    }

    fn set_paused_by_server(&self, paused: bool) {
        self.paused_by_server.store(paused, Ordering::Release);
    }

    fn paused_by_server(&self) -> bool {
        self.paused_by_server.load(Ordering::Acquire)
    }

    fn toggle_pause(&self, _tcw: &str) -> Result<(), ServerError> {
        let mut world = self.state.lock();
        world.paused = !world.paused;
        world.last_activity = Instant::now();
        Ok(())
    }

    fn set_sim_rate(&self, _tcw: &str, rate: f32) -> Result<(), ServerError> {
        if !(0.1..=10.0).contains(&rate) {
            return Err(ServerError::opaque(format!("invalid sim rate {rate}")));
        }
        let mut world = self.state.lock();
        world.sim_rate = rate;
        world.last_activity = Instant::now();
        Ok(())
    }

    fn idle_time(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    fn consolidation(&self) -> BTreeMap<String, Vec<String>> {
        self.state.lock().consolidation.clone()
    }

    fn serialize(&self) -> Result<Vec<u8>, ServerError> {
        let world = self.state.lock();
        rmp_serde::to_vec_named(&world.aircraft)
            .map_err(|e| ServerError::opaque(format!("serialize sim: {e}")))
    }

    fn pilot_mixup(&self, _callsign: &str) -> Option<Readback> {
        // The full simulator rolls dice here; the reference world never
        // garbles a readback.
        None
    }

    fn readback(&self, callsign: &str) -> Option<Readback> {
        self.state.lock().last_readback.get(callsign).cloned()
    }

    fn next_contact(&self, tcps: &[String]) -> Option<Contact> {
        let mut world = self.state.lock();
        while let Some(idx) = world.contacts.iter().position(|(tcp, _)| tcps.contains(tcp)) {
            let (_, contact) = world.contacts.remove(idx)?;
            if world.aircraft.contains_key(&contact.callsign) {
                return Some(contact);
            }
            // Aircraft vanished since the contact queued; skip it.
        }
        None
    }

    fn has_aircraft(&self, callsign: &str) -> bool {
        self.state.lock().aircraft.contains_key(callsign)
    }

    fn aircraft_command(
        &self,
        _tcw: &str,
        callsign: &str,
        command: AircraftCommand,
    ) -> Result<(), ServerError> {
        let mut world = self.state.lock();
        Self::require_aircraft(&world, callsign)?;
        world.last_activity = Instant::now();
        let readback = match &command {
            AircraftCommand::AssignAltitude { altitude, .. } => {
                if let Some(ac) = world.aircraft.get_mut(callsign) {
                    ac.altitude = *altitude;
                }
                format!("maintain {altitude}")
            }
            AircraftCommand::FlyHeading { heading } => {
                if let Some(ac) = world.aircraft.get_mut(callsign) {
                    ac.heading = *heading;
                }
                format!("fly heading {heading}")
            }
            AircraftCommand::TurnLeftHeading { heading } => {
                if let Some(ac) = world.aircraft.get_mut(callsign) {
                    ac.heading = *heading;
                }
                format!("turn left heading {heading}")
            }
            AircraftCommand::TurnRightHeading { heading } => {
                if let Some(ac) = world.aircraft.get_mut(callsign) {
                    ac.heading = *heading;
                }
                format!("turn right heading {heading}")
            }
            AircraftCommand::AssignSpeed { speed, .. } => {
                if let Some(ac) = world.aircraft.get_mut(callsign) {
                    ac.speed = *speed;
                }
                format!("maintain {speed} knots")
            }
            AircraftCommand::Squawk { code } => {
                if let Some(ac) = world.aircraft.get_mut(callsign) {
                    ac.squawk = *code;
                }
                format!("squawk {code:04o}")
            }
            AircraftCommand::DeleteAircraft => {
                world.aircraft.remove(callsign);
                String::new()
            }
            other => format!("wilco {other:?}"),
        };
        if !readback.is_empty() {
            world
                .last_readback
                .insert(callsign.to_owned(), Readback { text: readback, voice: "pilot-1".to_owned() });
        }
        drop(world);
        self.bump();
        Ok(())
    }

    fn delete_aircraft(&self, _tcw: &str, callsign: &str) -> Result<(), ServerError> {
        let mut world = self.state.lock();
        let removed = world.aircraft.remove(callsign).is_some();
        drop(world);
        self.bump();
        if removed {
            Ok(())
        } else {
            Err(ServerError::opaque(format!("unknown aircraft {callsign}")))
        }
    }

    fn shutdown(&self) {
        let mut world = self.state.lock();
        world.subs.clear();
        world.occupied.clear();
    }
}

/// Factory over the built-in catalog plus any `--extra-scenario` files.
pub struct LocalSimFactory {
    catalog: ScenarioCatalog,
}

impl LocalSimFactory {
    pub fn new(config: &ServerConfig) -> LocalSimFactory {
        let mut catalog = builtin_catalog();
        for path in &config.extra_scenarios {
            match load_scenario_file(path) {
                Ok((group, scenarios)) => {
                    catalog.groups.entry(group).or_default().extend(scenarios);
                }
                Err(e) => {
                    // Broken optional scenarios are reported but never fail
                    // startup.
                    tracing::warn!(path = %path.display(), err = %e, "skipping extra scenario");
                }
            }
        }
        LocalSimFactory { catalog }
    }
}

impl SimFactory for LocalSimFactory {
    fn catalog(&self) -> ScenarioCatalog {
        self.catalog.clone()
    }

    fn build(&self, setup: &SimSetup) -> Result<Arc<dyn Simulator>, ServerError> {
        let scenario = self
            .catalog
            .lookup(&setup.scenario_group, &setup.scenario)
            .ok_or(crate::error::ErrorKind::InvalidSimConfiguration)?;
        let sim = LocalSim::new(scenario);
        // A handful of starter aircraft so a fresh session is not empty.
        for callsign in ["AAL123", "DAL10", "UAL2270"] {
            sim.spawn_aircraft(callsign);
        }
        Ok(sim)
    }
}

/// On-disk form of an `--extra-scenario` file.
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    group: String,
    scenarios: Vec<ScenarioInfo>,
}

fn load_scenario_file(path: &std::path::Path) -> anyhow::Result<(String, Vec<ScenarioInfo>)> {
    let contents = std::fs::read_to_string(path)?;
    let file: ScenarioFile = serde_json::from_str(&contents)?;
    if file.scenarios.is_empty() {
        anyhow::bail!("no scenarios defined");
    }
    Ok((file.group, file.scenarios))
}

fn builtin_catalog() -> ScenarioCatalog {
    let mut catalog = ScenarioCatalog::default();
    catalog.groups.insert(
        "ZNY".to_owned(),
        vec![ScenarioInfo {
            name: "JFK Departure".to_owned(),
            root_tcw: "2J".to_owned(),
            tcws: BTreeMap::from([
                ("2J".to_owned(), vec!["JFK_DEP".to_owned(), "LGA_DEP".to_owned()]),
                ("17".to_owned(), vec!["JFK_APP".to_owned()]),
                ("23".to_owned(), vec!["CAMRN".to_owned()]),
            ]),
        }],
    );
    catalog
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
