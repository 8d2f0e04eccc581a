// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-simulation session: the connection table, the pause gate, idle
//! culling, and the state-update plumbing.
//!
//! The session mutex guards only the connection table and is never held
//! across a simulator call; the simulator serializes itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ErrorKind, ServerError};
use crate::sim::{Contact, EventSub, SimEvent, Simulator, StateUpdate};

/// Silence thresholds for human controllers.
pub const SILENCE_WARN: Duration = Duration::from_secs(5);
pub const SILENCE_SIGN_OFF: Duration = Duration::from_secs(15);

/// Sessions with no humans are torn down after this much simulator idle time
/// (never applied to local sessions).
pub const SESSION_IDLE_MAX: Duration = Duration::from_secs(4 * 60 * 60);

/// One signed-in human at one TCW.
struct Connection {
    tcw: String,
    initials: String,
    sub: EventSub,
    relief: bool,
    last_heartbeat: Instant,
    warned_silent: bool,
    /// Queued synthesized readbacks, drained by the update loop once a
    /// speech WebSocket is attached.
    pending_speech: Vec<SpeechPacket>,
    speech_tx: Option<mpsc::UnboundedSender<SpeechPacket>>,
}

/// A synthesized transmission pushed over the speech WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechPacket {
    pub callsign: String,
    pub text: String,
    pub audio: Vec<u8>,
}

/// Byte counters shared between a transport connection and its session, for
/// the status page.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl TrafficCounters {
    pub fn add_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }
}

/// Result of a sign-off, for the manager's post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct SignOffReport {
    pub tcw: String,
    pub initials: String,
    pub remaining_at_tcw: usize,
}

/// Tokens to evict, gathered by a cull pass. The actual sign-off happens
/// after the session lock is released (it re-takes the manager lock).
#[derive(Debug, Default)]
pub struct CullReport {
    pub evict: Vec<String>,
}

/// TCW occupancy row for `GetRunningSims` and `GetCurrentConsolidation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationEntry {
    pub tcw: String,
    pub tcps: Vec<String>,
    pub initials: Vec<String>,
}

pub struct Session {
    pub name: String,
    pub scenario_group: String,
    pub scenario: String,
    pub local: bool,
    password: Option<String>,
    sim: Arc<dyn Simulator>,
    connections: Mutex<HashMap<String, Connection>>,
    /// Byte counters of every transport connection that ever joined this
    /// session. Closed connections keep contributing their totals.
    traffic: Mutex<Vec<Arc<TrafficCounters>>>,
}

impl Session {
    pub fn new(
        name: String,
        scenario_group: String,
        scenario: String,
        password: Option<String>,
        local: bool,
        sim: Arc<dyn Simulator>,
    ) -> Arc<Session> {
        Arc::new(Session {
            name,
            scenario_group,
            scenario,
            local,
            password,
            sim,
            connections: Mutex::new(HashMap::new()),
            traffic: Mutex::new(Vec::new()),
        })
    }

    pub fn sim(&self) -> &Arc<dyn Simulator> {
        &self.sim
    }

    /// Register a transport connection's byte counters for the status page.
    pub fn attach_traffic(&self, counters: Arc<TrafficCounters>) {
        let mut traffic = self.traffic.lock();
        if !traffic.iter().any(|t| Arc::ptr_eq(t, &counters)) {
            traffic.push(counters);
        }
    }

    /// Total bytes in/out across every connection that joined this session.
    pub fn traffic_totals(&self) -> (u64, u64) {
        let traffic = self.traffic.lock();
        traffic.iter().fold((0, 0), |(i, o), t| {
            (i + t.bytes_in.load(Ordering::Relaxed), o + t.bytes_out.load(Ordering::Relaxed))
        })
    }

    pub fn check_password(&self, supplied: Option<&str>) -> Result<(), ServerError> {
        match (&self.password, supplied) {
            (None, _) => Ok(()),
            (Some(expected), Some(got)) if expected == got => Ok(()),
            _ => Err(ErrorKind::InvalidPassword.into()),
        }
    }

    /// Whether a primary (non-relief) human occupies the TCW.
    pub fn tcw_occupied(&self, tcw: &str) -> bool {
        self.connections.lock().values().any(|c| !c.relief && c.tcw == tcw)
    }

    /// Record a signed-on human and recompute the pause gate. For non-relief
    /// joiners the simulator sign-on has already happened; relief joiners
    /// carry a bare subscription.
    pub fn add_human_controller(
        &self,
        token: &str,
        tcw: &str,
        initials: &str,
        sub: EventSub,
        relief: bool,
    ) {
        let mut connections = self.connections.lock();
        connections.insert(
            token.to_owned(),
            Connection {
                tcw: tcw.to_owned(),
                initials: initials.to_owned(),
                sub,
                relief,
                last_heartbeat: Instant::now(),
                warned_silent: false,
                pending_speech: Vec::new(),
                speech_tx: None,
            },
        );
        let any_position = connections.values().any(|c| !c.tcw.is_empty());
        drop(connections);
        self.sim.set_paused_by_server(!any_position);
    }

    /// Remove a connection, release its subscription, recompute the pause
    /// gate. Returns what the manager needs for status-message posting.
    pub fn sign_off(&self, token: &str) -> Option<SignOffReport> {
        let mut connections = self.connections.lock();
        let conn = connections.remove(token)?;
        let remaining_at_tcw =
            connections.values().filter(|c| !conn.tcw.is_empty() && c.tcw == conn.tcw).count();
        let any_position = connections.values().any(|c| !c.tcw.is_empty());
        drop(connections);
        if !conn.relief {
            let _ = self.sim.sign_off(&conn.tcw);
        }
        self.sim.release(conn.sub);
        self.sim.set_paused_by_server(!any_position);
        Some(SignOffReport { tcw: conn.tcw, initials: conn.initials, remaining_at_tcw })
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.connections.lock().keys().cloned().collect()
    }

    /// Scan for silent controllers. Warnings are posted here; tokens past
    /// the sign-off threshold are returned for the manager to evict once the
    /// session lock is back off.
    pub fn cull_idle_controllers(&self, now: Instant) -> CullReport {
        let mut report = CullReport::default();
        let mut warn: Vec<(String, String)> = Vec::new();
        {
            let mut connections = self.connections.lock();
            for (token, conn) in connections.iter_mut() {
                let silent = now.saturating_duration_since(conn.last_heartbeat);
                if silent > SILENCE_SIGN_OFF {
                    report.evict.push(token.clone());
                } else if silent > SILENCE_WARN && !conn.warned_silent {
                    conn.warned_silent = true;
                    warn.push((conn.initials.clone(), conn.tcw.clone()));
                }
            }
        }
        for (initials, tcw) in warn {
            self.sim.post_event(SimEvent::StatusMessage {
                text: format!("not heard from {initials} at {tcw}"),
            });
        }
        report
    }

    /// Heartbeat + state fetch for one connection. Clears a standing silence
    /// warning and reports the controller back online.
    pub fn get_state_update(&self, token: &str) -> Result<StateUpdate, ServerError> {
        let (sub, tcw, was_warned) = {
            let mut connections = self.connections.lock();
            let conn = connections
                .get_mut(token)
                .ok_or(ErrorKind::NoSimForControllerToken)?;
            conn.last_heartbeat = Instant::now();
            let was_warned = std::mem::take(&mut conn.warned_silent);
            (conn.sub, conn.tcw.clone(), was_warned)
        };
        if was_warned {
            self.sim
                .post_event(SimEvent::StatusMessage { text: format!("{tcw} is back online") });
        }
        let events = self.rewrite_events(self.sim.drain_events(sub), &tcw);
        Ok(StateUpdate {
            sim: self.sim.state_update(),
            active_tcws: self.active_tcws(),
            events,
        })
    }

    /// Contact events carry the posting TCP; rewrite them to the receiving
    /// TCW when that TCP is consolidated under it.
    fn rewrite_events(&self, mut events: Vec<SimEvent>, tcw: &str) -> Vec<SimEvent> {
        let consolidation = self.sim.consolidation();
        let owned = consolidation.get(tcw).cloned().unwrap_or_default();
        for ev in &mut events {
            if let SimEvent::ContactRequest { tcp, .. } = ev {
                if owned.contains(tcp) {
                    *tcp = tcw.to_owned();
                }
            }
        }
        events
    }

    /// Sorted, deduplicated TCWs across all connections.
    pub fn active_tcws(&self) -> Vec<String> {
        let connections = self.connections.lock();
        let mut tcws: Vec<String> =
            connections.values().filter(|c| !c.tcw.is_empty()).map(|c| c.tcw.clone()).collect();
        drop(connections);
        tcws.sort();
        tcws.dedup();
        tcws
    }

    /// The simulator's consolidation view, augmented with the initials of
    /// every human at each TCW.
    pub fn current_consolidation(&self) -> Vec<ConsolidationEntry> {
        let consolidation = self.sim.consolidation();
        let connections = self.connections.lock();
        consolidation
            .into_iter()
            .map(|(tcw, tcps)| {
                let mut initials: Vec<String> = connections
                    .values()
                    .filter(|c| c.tcw == tcw)
                    .map(|c| c.initials.clone())
                    .collect();
                initials.sort();
                ConsolidationEntry { tcw, tcps, initials }
            })
            .collect()
    }

    /// Pop the next pending contact for any position consolidated under the
    /// TCW. The simulator skips contacts whose aircraft have vanished.
    pub fn request_contact(&self, tcw: &str) -> Option<Contact> {
        let consolidation = self.sim.consolidation();
        let tcps = consolidation.get(tcw).cloned().unwrap_or_default();
        self.sim.next_contact(&tcps)
    }

    /// Queue a synthesized readback for the connection's speech channel.
    pub fn queue_speech(&self, token: &str, packet: SpeechPacket) {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get_mut(token) {
            conn.pending_speech.push(packet);
        }
    }

    /// Attach the speech WebSocket sender for a connection.
    pub fn attach_speech(&self, token: &str, tx: mpsc::UnboundedSender<SpeechPacket>) -> bool {
        let mut connections = self.connections.lock();
        match connections.get_mut(token) {
            Some(conn) => {
                conn.speech_tx = Some(tx);
                true
            }
            None => false,
        }
    }

    pub fn detach_speech(&self, token: &str) {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get_mut(token) {
            conn.speech_tx = None;
        }
    }

    /// Push queued readbacks to attached speech sockets. Returns bytes sent.
    pub fn send_pending_readbacks(&self) -> usize {
        let mut sent = 0;
        let mut connections = self.connections.lock();
        for conn in connections.values_mut() {
            let Some(tx) = conn.speech_tx.clone() else { continue };
            for packet in conn.pending_speech.drain(..) {
                sent += packet.audio.len();
                if tx.send(packet).is_err() {
                    conn.speech_tx = None;
                    break;
                }
            }
        }
        sent
    }

    /// Look up the pieces the dispatcher needs for one RPC.
    pub fn controller(&self, token: &str) -> Option<(String, String, EventSub)> {
        let connections = self.connections.lock();
        connections.get(token).map(|c| (c.tcw.clone(), c.initials.clone(), c.sub))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
