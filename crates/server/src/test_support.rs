// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures: a scripted simulator that records every typed call,
//! and builders for a manager wired to it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::commands::AircraftCommand;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::manager::SimManager;
use crate::providers::{ProviderGate, ProviderSet};
use crate::sim::{
    Contact, EventSub, Readback, ScenarioCatalog, ScenarioInfo, SimFactory, SimSetup, SimEvent,
    SimStateUpdate, Simulator,
};

/// A typed simulator call as observed by [`ScriptedSim`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub tcw: String,
    pub callsign: String,
    pub command: AircraftCommand,
}

#[derive(Default)]
struct ScriptedState {
    commands: Vec<RecordedCommand>,
    occupied: BTreeMap<String, EventSub>,
    subs: HashMap<u64, VecDeque<SimEvent>>,
    contacts: VecDeque<(String, Contact)>,
    vanished: Vec<String>,
    mixup: Option<Readback>,
    reject_commands: Option<String>,
    reject_delete: Option<String>,
    deleted: Vec<String>,
}

/// Simulator double that records calls and can be scripted to fail.
pub struct ScriptedSim {
    state: Mutex<ScriptedState>,
    consolidation: BTreeMap<String, Vec<String>>,
    generation: AtomicU64,
    next_sub: AtomicU64,
    paused_by_server: AtomicBool,
    created_at: Instant,
}

impl ScriptedSim {
    pub fn new() -> Arc<ScriptedSim> {
        Arc::new(ScriptedSim {
            state: Mutex::new(ScriptedState::default()),
            consolidation: test_consolidation(),
            generation: AtomicU64::new(0),
            next_sub: AtomicU64::new(1),
            paused_by_server: AtomicBool::new(true),
            created_at: Instant::now(),
        })
    }

    /// The typed calls observed so far, in order.
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Script the next `pilot_mixup` query to fire.
    pub fn set_mixup(&self, readback: Readback) {
        self.state.lock().mixup = Some(readback);
    }

    /// Make every subsequent `aircraft_command` fail with this message.
    pub fn reject_commands(&self, message: &str) {
        self.state.lock().reject_commands = Some(message.to_owned());
    }

    /// Make every subsequent `delete_aircraft` fail with this message.
    pub fn reject_delete(&self, message: &str) {
        self.state.lock().reject_delete = Some(message.to_owned());
    }

    pub fn push_contact(&self, tcp: &str, contact: Contact) {
        self.state.lock().contacts.push_back((tcp.to_owned(), contact));
    }

    /// Mark a callsign as vanished so queued contacts for it are skipped.
    pub fn vanish_aircraft(&self, callsign: &str) {
        self.state.lock().vanished.push(callsign.to_owned());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    fn open_sub(&self) -> EventSub {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.state.lock().subs.insert(id, VecDeque::new());
        EventSub(id)
    }
}

impl Simulator for ScriptedSim {
    fn sign_on(&self, tcw: &str) -> Result<EventSub, ServerError> {
        let sub = self.open_sub();
        let mut state = self.state.lock();
        if state.occupied.contains_key(tcw) {
            state.subs.remove(&sub.0);
            return Err(crate::error::ErrorKind::ControllerAlreadySignedIn.into());
        }
        state.occupied.insert(tcw.to_owned(), sub);
        Ok(sub)
    }

    fn sign_off(&self, tcw: &str) -> Result<(), ServerError> {
        self.state
            .lock()
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
        let mut state = self.state.lock();
        match state.subs.get_mut(&sub.0) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn post_event(&self, ev: SimEvent) {
        let mut state = self.state.lock();
        for queue in state.subs.values_mut() {
            queue.push_back(ev.clone());
        }
    }

    fn update(&self) {
        if !self.paused_by_server.load(Ordering::Acquire) {
            self.generation.fetch_add(1, Ordering::Release);
        }
    }

    fn state_update(&self) -> SimStateUpdate {
        SimStateUpdate {
            generation: self.generation.load(Ordering::Acquire),
            payload: Vec::new(),
        }
    }

    fn set_paused_by_server(&self, paused: bool) {
        self.paused_by_server.store(paused, Ordering::Release);
    }

    fn paused_by_server(&self) -> bool {
        self.paused_by_server.load(Ordering::Acquire)
    }

    fn toggle_pause(&self, _tcw: &str) -> Result<(), ServerError> {
        Ok(())
    }

    fn set_sim_rate(&self, _tcw: &str, _rate: f32) -> Result<(), ServerError> {
        Ok(())
    }

    fn idle_time(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn consolidation(&self) -> BTreeMap<String, Vec<String>> {
        self.consolidation.clone()
    }

    fn serialize(&self) -> Result<Vec<u8>, ServerError> {
        Ok(vec![0xde, 0xad])
    }

    fn pilot_mixup(&self, _callsign: &str) -> Option<Readback> {
        self.state.lock().mixup.take()
    }

    fn readback(&self, callsign: &str) -> Option<Readback> {
        let state = self.state.lock();
        state.commands.iter().rev().find(|c| c.callsign == callsign).map(|_| Readback {
            text: format!("roger, {callsign}"),
            voice: "pilot-1".to_owned(),
        })
    }

    fn next_contact(&self, tcps: &[String]) -> Option<Contact> {
        let mut state = self.state.lock();
        while let Some(idx) = state.contacts.iter().position(|(tcp, _)| tcps.contains(tcp)) {
            let (_, contact) = state.contacts.remove(idx)?;
            if !state.vanished.contains(&contact.callsign) {
                return Some(contact);
            }
        }
        None
    }

    fn has_aircraft(&self, callsign: &str) -> bool {
        !self.state.lock().vanished.contains(&callsign.to_owned())
    }

    fn aircraft_command(
        &self,
        tcw: &str,
        callsign: &str,
        command: AircraftCommand,
    ) -> Result<(), ServerError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.reject_commands {
            return Err(ServerError::opaque(message.clone()));
        }
        state.commands.push(RecordedCommand {
            tcw: tcw.to_owned(),
            callsign: callsign.to_owned(),
            command,
        });
        drop(state);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn delete_aircraft(&self, _tcw: &str, callsign: &str) -> Result<(), ServerError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.reject_delete {
            return Err(ServerError::opaque(message.clone()));
        }
        state.deleted.push(callsign.to_owned());
        drop(state);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.subs.clear();
        state.occupied.clear();
    }
}

/// Factory that hands out [`ScriptedSim`]s and remembers the last one built.
pub struct ScriptedFactory {
    last: Mutex<Option<Arc<ScriptedSim>>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<ScriptedFactory> {
        Arc::new(ScriptedFactory { last: Mutex::new(None) })
    }

    pub fn last_sim(&self) -> Option<Arc<ScriptedSim>> {
        self.last.lock().clone()
    }
}

impl SimFactory for ScriptedFactory {
    fn catalog(&self) -> ScenarioCatalog {
        test_catalog()
    }

    fn build(&self, setup: &SimSetup) -> Result<Arc<dyn Simulator>, ServerError> {
        if test_catalog().lookup(&setup.scenario_group, &setup.scenario).is_none() {
            return Err(crate::error::ErrorKind::InvalidSimConfiguration.into());
        }
        let sim = ScriptedSim::new();
        *self.last.lock() = Some(Arc::clone(&sim));
        Ok(sim)
    }
}

pub fn test_consolidation() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        ("2J".to_owned(), vec!["JFK_DEP".to_owned()]),
        ("17".to_owned(), vec!["JFK_APP".to_owned()]),
        ("23".to_owned(), vec!["CAMRN".to_owned()]),
    ])
}

pub fn test_catalog() -> ScenarioCatalog {
    let mut catalog = ScenarioCatalog::default();
    catalog.groups.insert(
        "TEST".to_owned(),
        vec![ScenarioInfo {
            name: "Default".to_owned(),
            root_tcw: "2J".to_owned(),
            tcws: test_consolidation(),
        }],
    );
    catalog
}

/// A manager over the scripted factory, provider gate already closed empty.
pub fn test_manager() -> (Arc<SimManager>, Arc<ScriptedFactory>) {
    test_manager_with(ServerConfig::default(), ProviderSet::default())
}

pub fn test_manager_with(
    config: ServerConfig,
    providers: ProviderSet,
) -> (Arc<SimManager>, Arc<ScriptedFactory>) {
    let factory = ScriptedFactory::new();
    let manager =
        SimManager::new(config, Arc::clone(&factory) as Arc<dyn SimFactory>, ProviderGate::ready(providers));
    (manager, factory)
}

/// `NewSim` with boilerplate filled in; returns the join reply.
pub fn join_new_sim(
    manager: &Arc<SimManager>,
    name: &str,
    initials: &str,
) -> Result<crate::manager::SimJoinReply, ServerError> {
    manager.new_sim(crate::manager::NewSimArgs {
        name: name.to_owned(),
        scenario_group: "TEST".to_owned(),
        scenario: "Default".to_owned(),
        initials: initials.to_owned(),
        password: None,
        prespawn: false,
    })
}
