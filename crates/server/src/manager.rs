// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry and the `SimManager.*` RPC surface.
//!
//! One mutex guards the name and token maps together; it is held briefly
//! and always released before any call into a session or simulator.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorKind, ServerError};
use crate::providers::tts::{SynthesisReply, SynthesisRequest, VoicesReply};
use crate::providers::weather::{AtmosGridArgs, AtmosGridReply, PrecipUrlArgs, PrecipUrlReply};
use crate::providers::ProviderGate;
use crate::session::{ConsolidationEntry, Session, SESSION_IDLE_MAX};
use crate::sim::{
    EventSub, ScenarioCatalog, SimEvent, SimFactory, SimSetup, Simulator, StateUpdate,
};
use crate::transport::PROTOCOL_VERSION;

/// Per-client-IP cap on synthesized words, to bound abuse of the shared TTS
/// quota.
pub const TTS_WORD_BUDGET: u64 = 30_000;

/// Update-loop cadence.
const TICK: Duration = Duration::from_millis(100);

/// How many simulator ticks a prespawned session is warmed up by.
const PRESPAWN_TICKS: u32 = 600;

// -- RPC argument/reply types -------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectArgs {
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningSim {
    pub name: String,
    pub scenario_group: String,
    pub scenario: String,
    pub password_required: bool,
    pub consolidation: Vec<ConsolidationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReply {
    pub catalog: ScenarioCatalog,
    pub running: Vec<RunningSim>,
    pub tts_available: bool,
    pub weather_intervals: HashMap<String, (i64, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSimArgs {
    pub name: String,
    pub scenario_group: String,
    pub scenario: String,
    pub initials: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub prespawn: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectToSimArgs {
    pub name: String,
    pub tcw: String,
    pub initials: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub joining_as_relief: bool,
}

/// Reply to both `NewSim` and `ConnectToSim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimJoinReply {
    pub token: String,
    pub state: StateUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenArgs {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedSimReply {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastArgs {
    pub password: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportArgs {
    pub text: String,
}

// -- Status snapshot (HTTP side channel) --------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub name: String,
    pub scenario: String,
    pub controllers: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// CPU and memory of this process, read from procfs. Zero where procfs is
/// not available.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RuntimeStats {
    pub cpu_user_secs: u64,
    pub cpu_system_secs: u64,
    pub rss_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub runtime: RuntimeStats,
    pub sessions: Vec<SessionStats>,
    pub tts_words_by_client: HashMap<String, u64>,
}

/// Kernel USER_HZ; 100 on every supported target.
const CLOCK_TICKS_PER_SEC: u64 = 100;

fn runtime_stats() -> RuntimeStats {
    let mut stats = RuntimeStats::default();
    if let Ok(stat) = std::fs::read_to_string("/proc/self/stat") {
        if let Some((utime, stime)) = parse_proc_stat(&stat) {
            stats.cpu_user_secs = utime / CLOCK_TICKS_PER_SEC;
            stats.cpu_system_secs = stime / CLOCK_TICKS_PER_SEC;
        }
    }
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        if let Some(rss) = parse_vm_rss(&status) {
            stats.rss_bytes = rss;
        }
    }
    stats
}

/// utime and stime (clock ticks) from a `/proc/self/stat` line. The comm
/// field may itself contain spaces and parentheses, so fields are counted
/// from the last `") "`.
fn parse_proc_stat(stat: &str) -> Option<(u64, u64)> {
    let rest = stat.rsplit_once(") ")?.1;
    let mut fields = rest.split_whitespace();
    let utime = fields.nth(11)?.parse().ok()?;
    let stime = fields.next()?.parse().ok()?;
    Some((utime, stime))
}

/// Resident set size in bytes from `/proc/self/status` (`VmRSS:` is in kB).
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

// -- Controller context -------------------------------------------------------

/// Transient bundle resolved from a token for the duration of one RPC.
/// Never stored.
pub struct ControllerContext {
    pub token: String,
    pub tcw: String,
    pub initials: String,
    pub sub: EventSub,
    pub sim: Arc<dyn Simulator>,
    pub session: Arc<Session>,
}

// -- Manager ------------------------------------------------------------------

struct Registry {
    by_name: HashMap<String, Arc<Session>>,
    by_token: HashMap<String, Arc<Session>>,
    tts_words: HashMap<String, u64>,
}

pub struct SimManager {
    config: ServerConfig,
    factory: Arc<dyn SimFactory>,
    providers: ProviderGate,
    registry: Mutex<Registry>,
    started_at: Instant,
}

impl SimManager {
    pub fn new(
        config: ServerConfig,
        factory: Arc<dyn SimFactory>,
        providers: ProviderGate,
    ) -> Arc<SimManager> {
        Arc::new(SimManager {
            config,
            factory,
            providers,
            registry: Mutex::new(Registry {
                by_name: HashMap::new(),
                by_token: HashMap::new(),
                tts_words: HashMap::new(),
            }),
            started_at: Instant::now(),
        })
    }

    pub fn local(&self) -> bool {
        self.config.local
    }

    /// `SimManager.Connect` — the mandatory first RPC. Blocks on the
    /// provider gate so the reply can advertise TTS and weather coverage.
    pub async fn connect(&self, args: ConnectArgs) -> Result<ConnectReply, ServerError> {
        if args.version != PROTOCOL_VERSION {
            return Err(ErrorKind::RpcVersionMismatch.into());
        }
        let providers = self.providers.providers().await;
        Ok(ConnectReply {
            catalog: self.factory.catalog(),
            running: self.running_sims(),
            tts_available: providers.tts.is_some(),
            weather_intervals: providers.weather_intervals.clone(),
        })
    }

    /// `SimManager.NewSim` — create and register a session, sign the creator
    /// on at the scenario's root TCW, optionally prespawn traffic, and start
    /// the update loop.
    pub fn new_sim(self: &Arc<Self>, args: NewSimArgs) -> Result<SimJoinReply, ServerError> {
        if args.name.is_empty() && !self.config.local {
            return Err(ErrorKind::InvalidSimConfiguration.into());
        }
        let scenario = self
            .factory
            .catalog()
            .lookup(&args.scenario_group, &args.scenario)
            .cloned()
            .ok_or(ErrorKind::InvalidSimConfiguration)?;

        {
            let registry = self.registry.lock();
            if registry.by_name.contains_key(&args.name) {
                return Err(ErrorKind::DuplicateSimName.into());
            }
        }

        let setup = SimSetup {
            scenario_group: args.scenario_group.clone(),
            scenario: args.scenario.clone(),
            local: self.config.local,
        };
        let sim = self.factory.build(&setup)?;
        let session = Session::new(
            args.name.clone(),
            args.scenario_group,
            args.scenario,
            args.password.filter(|p| !p.is_empty()),
            self.config.local,
            sim,
        );

        let sub = session.sim().sign_on(&scenario.root_tcw)?;
        let token = new_controller_token();
        session.add_human_controller(&token, &scenario.root_tcw, &args.initials, sub, false);

        {
            let mut registry = self.registry.lock();
            // Re-check: another creator may have raced us while the
            // simulator was being built.
            if registry.by_name.contains_key(&args.name) {
                session.sign_off(&token);
                session.sim().shutdown();
                return Err(ErrorKind::DuplicateSimName.into());
            }
            registry.by_name.insert(args.name.clone(), Arc::clone(&session));
            registry.by_token.insert(token.clone(), Arc::clone(&session));
        }

        if args.prespawn {
            for _ in 0..PRESPAWN_TICKS {
                session.sim().update();
            }
        }

        self.spawn_update_loop(Arc::clone(&session));
        info!(session = %session.name, scenario = %session.scenario, "session created");

        let state = session.get_state_update(&token)?;
        Ok(SimJoinReply { token, state })
    }

    /// `SimManager.ConnectToSim` — join an existing session at a TCW.
    pub fn connect_to_sim(&self, args: ConnectToSimArgs) -> Result<SimJoinReply, ServerError> {
        let session = {
            let registry = self.registry.lock();
            registry.by_name.get(&args.name).cloned().ok_or(ErrorKind::NoNamedSim)?
        };
        session.check_password(args.password.as_deref())?;

        let token = new_controller_token();
        if args.joining_as_relief {
            // Relief shadows an existing primary; it never re-invokes the
            // simulator sign-on.
            if !session.tcw_occupied(&args.tcw) {
                return Err(ServerError::opaque(format!(
                    "no primary controller at {} to relieve",
                    args.tcw
                )));
            }
            let sub = session.sim().subscribe();
            session.add_human_controller(&token, &args.tcw, &args.initials, sub, true);
        } else {
            if session.tcw_occupied(&args.tcw) {
                return Err(ErrorKind::TcwAlreadyOccupied.into());
            }
            let sub = session.sim().sign_on(&args.tcw)?;
            session.add_human_controller(&token, &args.tcw, &args.initials, sub, false);
        }

        {
            let mut registry = self.registry.lock();
            registry.by_token.insert(token.clone(), Arc::clone(&session));
        }

        session.sim().post_event(SimEvent::StatusMessage {
            text: format!("{} signed on at {}", args.initials, args.tcw),
        });
        let state = session.get_state_update(&token)?;
        Ok(SimJoinReply { token, state })
    }

    /// `SimManager.SignOff`. Forced evictions go through the same path with
    /// a different status banner.
    pub fn sign_off(&self, token: &str) -> Result<(), ServerError> {
        self.sign_off_inner(token, false)
    }

    fn sign_off_inner(&self, token: &str, evicted: bool) -> Result<(), ServerError> {
        let session = {
            let mut registry = self.registry.lock();
            registry.by_token.remove(token).ok_or(ErrorKind::NoSimForControllerToken)?
        };
        let Some(report) = session.sign_off(token) else {
            return Err(ErrorKind::NoSimForControllerToken.into());
        };
        if !report.tcw.is_empty() && report.remaining_at_tcw == 0 {
            let text = if evicted {
                format!("{} at {} signed off (not heard from)", report.initials, report.tcw)
            } else {
                format!("{} has signed off at {}", report.initials, report.tcw)
            };
            session.sim().post_event(SimEvent::StatusMessage { text });

            // With the TCW unmanned, every TCP consolidated under it has no
            // controller.
            let uncovered: Vec<String> =
                session.sim().consolidation().remove(&report.tcw).unwrap_or_default();
            if !uncovered.is_empty() {
                session.sim().post_event(SimEvent::ErrorMessage {
                    text: format!("no controller covering {}", uncovered.join(", ")),
                });
            }
        }
        Ok(())
    }

    /// `SimManager.GetStateUpdate`.
    pub fn get_state_update(&self, token: &str) -> Result<StateUpdate, ServerError> {
        let session = self.session_for_token(token)?;
        session.get_state_update(token)
    }

    /// `SimManager.GetRunningSims`.
    pub fn running_sims(&self) -> Vec<RunningSim> {
        let sessions: Vec<Arc<Session>> = {
            let registry = self.registry.lock();
            registry.by_name.values().cloned().collect()
        };
        let mut running: Vec<RunningSim> = sessions
            .into_iter()
            .map(|s| RunningSim {
                name: s.name.clone(),
                scenario_group: s.scenario_group.clone(),
                scenario: s.scenario.clone(),
                password_required: s.check_password(None).is_err(),
                consolidation: s.current_consolidation(),
            })
            .collect();
        running.sort_by(|a, b| a.name.cmp(&b.name));
        running
    }

    /// `SimManager.GetSerializeSim`.
    pub fn get_serialize_sim(&self, token: &str) -> Result<SerializedSimReply, ServerError> {
        let session = self.session_for_token(token)?;
        Ok(SerializedSimReply { data: session.sim().serialize()? })
    }

    /// `SimManager.Broadcast` — admin message to every running session,
    /// authenticated against the on-disk password file.
    pub fn broadcast(&self, args: BroadcastArgs) -> Result<(), ServerError> {
        let expected = std::fs::read_to_string(&self.config.password_file)
            .map_err(|_| ErrorKind::InvalidPassword)?;
        if expected.trim_end_matches(['\r', '\n']) != args.password {
            return Err(ErrorKind::InvalidPassword.into());
        }
        let sessions: Vec<Arc<Session>> = {
            let registry = self.registry.lock();
            registry.by_name.values().cloned().collect()
        };
        info!(sessions = sessions.len(), "broadcasting server message");
        for session in sessions {
            session
                .sim()
                .post_event(SimEvent::ServerBroadcast { text: args.message.clone() });
        }
        Ok(())
    }

    /// `SimManager.TextToSpeech` — synthesize via the provider, charging the
    /// word count against the caller's per-IP budget.
    pub async fn text_to_speech(
        &self,
        args: SynthesisRequest,
    ) -> Result<SynthesisReply, ServerError> {
        let words = args.text.split_whitespace().count() as u64;
        {
            let mut registry = self.registry.lock();
            let used = registry.tts_words.entry(args.client_addr.clone()).or_insert(0);
            if *used + words > TTS_WORD_BUDGET {
                return Err(ServerError::opaque("TTS word budget exceeded"));
            }
            *used += words;
        }
        let providers = self.providers.providers().await;
        let Some(tts) = &providers.tts else {
            return Err(ServerError::opaque("TTS not available"));
        };
        let audio = tts.synthesize(&args.text, &args.voice).await?;
        Ok(SynthesisReply { audio })
    }

    /// `SimManager.GetAllVoices`.
    pub async fn get_all_voices(&self) -> Result<VoicesReply, ServerError> {
        let providers = self.providers.providers().await;
        let Some(tts) = &providers.tts else {
            return Err(ServerError::opaque("TTS not available"));
        };
        Ok(VoicesReply { voices: tts.voices().await? })
    }

    /// `SimManager.GetPrecipURL`.
    pub async fn get_precip_url(&self, args: PrecipUrlArgs) -> Result<PrecipUrlReply, ServerError> {
        let providers = self.providers.providers().await;
        let Some(weather) = &providers.weather else {
            return Err(ErrorKind::WeatherUnavailable.into());
        };
        let (url, next_refresh) = weather.precip_url(&args.facility, args.time).await?;
        Ok(PrecipUrlReply { url, next_refresh })
    }

    /// `SimManager.GetAtmosGrid`.
    pub async fn get_atmos_grid(&self, args: AtmosGridArgs) -> Result<AtmosGridReply, ServerError> {
        let providers = self.providers.providers().await;
        let Some(weather) = &providers.weather else {
            return Err(ErrorKind::WeatherUnavailable.into());
        };
        let (grid, next_refresh) =
            weather.atmos_grid(&args.facility, args.time, &args.primary_airport).await?;
        Ok(AtmosGridReply { grid, next_refresh })
    }

    /// `SimManager.ReportCrash` — written under the log directory.
    pub fn report_crash(&self, args: ReportArgs) -> Result<(), ServerError> {
        let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let path = self.config.log_dir.join(format!("client-crash-{stamp}.txt"));
        std::fs::write(&path, &args.text)
            .map_err(|e| ServerError::opaque(format!("write crash report: {e}")))?;
        warn!(path = %path.display(), "client crash report received");
        Ok(())
    }

    /// `SimManager.ReportSTTLog` / `ReportSTTBug` / `ReportSTTBenchmark` —
    /// unauthenticated log sinks.
    pub fn report_stt(&self, kind: &str, args: ReportArgs) {
        info!(kind, text = %args.text, "STT report");
    }

    /// Resolve a controller token to its transient context. The bundle must
    /// not outlive the RPC that requested it.
    pub fn lookup_controller(&self, token: &str) -> Option<ControllerContext> {
        let session = {
            let registry = self.registry.lock();
            registry.by_token.get(token).cloned()?
        };
        let (tcw, initials, sub) = session.controller(token)?;
        Some(ControllerContext {
            token: token.to_owned(),
            tcw,
            initials,
            sub,
            sim: Arc::clone(session.sim()),
            session,
        })
    }

    /// Snapshot for the status page and the debug counters endpoint.
    pub fn stats(&self) -> ServerStats {
        let registry = self.registry.lock();
        let sessions = registry
            .by_name
            .values()
            .map(|s| SessionStats {
                name: s.name.clone(),
                scenario: s.scenario.clone(),
                controllers: s.tokens().len(),
                bytes_in: s.traffic_totals().0,
                bytes_out: s.traffic_totals().1,
            })
            .collect();
        ServerStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            runtime: runtime_stats(),
            sessions,
            tts_words_by_client: registry.tts_words.clone(),
        }
    }

    /// The 10 Hz per-session loop: cull idle humans, tick the simulator,
    /// push queued speech, and tear the session down after the idle cap.
    fn spawn_update_loop(self: &Arc<Self>, session: Arc<Session>) {
        let manager: Weak<SimManager> = Arc::downgrade(self);
        let skip_culling = self.config.local || self.config.debug_hold;
        let local = self.config.local;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !skip_culling {
                    let report = session.cull_idle_controllers(Instant::now());
                    for token in report.evict {
                        let Some(manager) = manager.upgrade() else { return };
                        if let Err(e) = manager.sign_off_inner(&token, true) {
                            error!(err = %e, "evicting silent controller");
                        }
                    }
                }
                session.sim().update();
                session.send_pending_readbacks();
                if !local && session.sim().idle_time() > SESSION_IDLE_MAX {
                    info!(session = %session.name, "session idle limit reached");
                    break;
                }
            }
            let Some(manager) = manager.upgrade() else { return };
            manager.destroy_session(&session);
        });
    }

    fn destroy_session(&self, session: &Arc<Session>) {
        session.sim().shutdown();
        let mut registry = self.registry.lock();
        registry.by_token.retain(|_, s| !Arc::ptr_eq(s, session));
        registry.by_name.remove(&session.name);
        info!(session = %session.name, "session destroyed");
    }

    fn session_for_token(&self, token: &str) -> Result<Arc<Session>, ServerError> {
        let registry = self.registry.lock();
        registry.by_token.get(token).cloned().ok_or_else(|| ErrorKind::NoSimForControllerToken.into())
    }
}

/// 128 random bits, base64. Opaque to clients, unique process-wide, never
/// reused.
pub fn new_controller_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
