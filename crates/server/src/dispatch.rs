// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-RPC dispatch.
//!
//! Every mutating method is token-first: the token resolves to a transient
//! controller context, the acting TCW comes from that context (never from
//! the arguments), and replies that carry a state-update field are filled on
//! the success path. `DeleteAircraft` fills it even on failure so clients
//! can reconcile an already-gone aircraft; that choice is per-method and
//! explicit.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::commands::{run_commands, CommandRun};
use crate::error::{ErrorKind, ServerError};
use crate::manager::{
    BroadcastArgs, ConnectArgs, ConnectToSimArgs, NewSimArgs, ReportArgs, SimManager, TokenArgs,
};
use crate::providers::tts::SynthesisRequest;
use crate::providers::weather::{AtmosGridArgs, PrecipUrlArgs};
use crate::session::{ConsolidationEntry, TrafficCounters};
use crate::sim::{Contact, Readback, Simulator as _, StateUpdate};
use crate::transport::{decode, encode};

// -- Sim.* argument/reply types -----------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAircraftCommandsArgs {
    pub token: String,
    pub callsign: String,
    pub commands: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAircraftCommandsReply {
    pub error_message: String,
    pub remaining_input: String,
    /// Readback for the client's own TTS playback; the mix-up readback when
    /// the simulator pre-empted the command.
    pub readback: Option<Readback>,
    pub state: Option<StateUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAircraftArgs {
    pub token: String,
    pub callsign: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdateReply {
    pub state: Option<StateUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSimRateArgs {
    pub token: String,
    pub rate: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContactReply {
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReply {
    pub entries: Vec<ConsolidationEntry>,
}

/// Per-request context supplied by the transport.
pub struct RequestContext {
    pub peer: SocketAddr,
    pub traffic: Arc<TrafficCounters>,
    /// Set once `SimManager.Connect` succeeded on this connection.
    pub handshaken: bool,
}

pub struct Dispatcher {
    manager: Arc<SimManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<SimManager>) -> Dispatcher {
        Dispatcher { manager }
    }

    pub fn manager(&self) -> &Arc<SimManager> {
        &self.manager
    }

    /// Route one RPC by method name. Returns the messagepack-encoded reply.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        method: &str,
        params: &[u8],
    ) -> Result<Vec<u8>, ServerError> {
        // Until the version handshake has succeeded, nothing else is served.
        if !ctx.handshaken && method != "SimManager.Connect" {
            return Err(ErrorKind::RpcVersionMismatch.into());
        }
        match method {
            "SimManager.Connect" => {
                let args: ConnectArgs = decode(params)?;
                encode(&self.manager.connect(args).await?)
            }
            "SimManager.NewSim" => {
                let args: NewSimArgs = decode(params)?;
                let reply = self.manager.new_sim(args)?;
                self.adopt_traffic(ctx, &reply.token);
                encode(&reply)
            }
            "SimManager.ConnectToSim" => {
                let args: ConnectToSimArgs = decode(params)?;
                let reply = self.manager.connect_to_sim(args)?;
                self.adopt_traffic(ctx, &reply.token);
                encode(&reply)
            }
            "SimManager.SignOff" => {
                let args: TokenArgs = decode(params)?;
                self.manager.sign_off(&args.token)?;
                encode(&())
            }
            "SimManager.GetStateUpdate" => {
                let args: TokenArgs = decode(params)?;
                encode(&self.manager.get_state_update(&args.token)?)
            }
            "SimManager.GetRunningSims" => encode(&self.manager.running_sims()),
            "SimManager.GetSerializeSim" => {
                let args: TokenArgs = decode(params)?;
                encode(&self.manager.get_serialize_sim(&args.token)?)
            }
            "SimManager.Broadcast" => {
                let args: BroadcastArgs = decode(params)?;
                self.manager.broadcast(args)?;
                encode(&())
            }
            "SimManager.TextToSpeech" => {
                let mut args: SynthesisRequest = decode(params)?;
                // The accounting key is the observed peer address, never a
                // client-supplied field.
                args.client_addr = ctx.peer.ip().to_string();
                encode(&self.manager.text_to_speech(args).await?)
            }
            "SimManager.GetAllVoices" => encode(&self.manager.get_all_voices().await?),
            "SimManager.GetPrecipURL" => {
                let args: PrecipUrlArgs = decode(params)?;
                encode(&self.manager.get_precip_url(args).await?)
            }
            "SimManager.GetAtmosGrid" => {
                let args: AtmosGridArgs = decode(params)?;
                encode(&self.manager.get_atmos_grid(args).await?)
            }
            "SimManager.ReportCrash" => {
                let args: ReportArgs = decode(params)?;
                self.manager.report_crash(args)?;
                encode(&())
            }
            "SimManager.ReportSTTLog" => {
                let args: ReportArgs = decode(params)?;
                self.manager.report_stt("log", args);
                encode(&())
            }
            "SimManager.ReportSTTBug" => {
                let args: ReportArgs = decode(params)?;
                self.manager.report_stt("bug", args);
                encode(&())
            }
            "SimManager.ReportSTTBenchmark" => {
                let args: ReportArgs = decode(params)?;
                self.manager.report_stt("benchmark", args);
                encode(&())
            }

            "Sim.GetStateUpdate" => {
                let args: TokenArgs = decode(params)?;
                encode(&self.manager.get_state_update(&args.token)?)
            }
            "Sim.RunAircraftCommands" => {
                let args: RunAircraftCommandsArgs = decode(params)?;
                encode(&self.run_aircraft_commands(args)?)
            }
            "Sim.DeleteAircraft" => {
                let args: DeleteAircraftArgs = decode(params)?;
                self.delete_aircraft(args)
            }
            "Sim.TogglePause" => {
                let args: TokenArgs = decode(params)?;
                let c = self.controller(&args.token)?;
                c.sim.toggle_pause(&c.tcw)?;
                encode(&StateUpdateReply { state: c.session.get_state_update(&c.token).ok() })
            }
            "Sim.SetSimRate" => {
                let args: SetSimRateArgs = decode(params)?;
                let c = self.controller(&args.token)?;
                c.sim.set_sim_rate(&c.tcw, args.rate)?;
                encode(&StateUpdateReply { state: c.session.get_state_update(&c.token).ok() })
            }
            "Sim.RequestContact" => {
                let args: TokenArgs = decode(params)?;
                let c = self.controller(&args.token)?;
                encode(&RequestContactReply { contact: c.session.request_contact(&c.tcw) })
            }
            "Sim.GetCurrentConsolidation" => {
                let args: TokenArgs = decode(params)?;
                let c = self.controller(&args.token)?;
                encode(&ConsolidationReply { entries: c.session.current_consolidation() })
            }

            _ => Err(ServerError::opaque(format!("unknown method {method}"))),
        }
    }

    /// `Sim.RunAircraftCommands` — pilot mix-up pre-check, then the greedy
    /// parser run, then the readback for client-side playback. Syntax errors
    /// ride inside the reply; the RPC itself succeeds.
    fn run_aircraft_commands(
        &self,
        args: RunAircraftCommandsArgs,
    ) -> Result<RunAircraftCommandsReply, ServerError> {
        let c = self.controller(&args.token)?;
        if let Some(mixup) = c.sim.pilot_mixup(&args.callsign) {
            return Ok(RunAircraftCommandsReply {
                readback: Some(mixup),
                state: c.session.get_state_update(&c.token).ok(),
                ..RunAircraftCommandsReply::default()
            });
        }
        let run: CommandRun = run_commands(c.sim.as_ref(), &c.tcw, &args.callsign, &args.commands);
        let readback =
            if run.ok() { c.sim.readback(&args.callsign) } else { None };
        Ok(RunAircraftCommandsReply {
            error_message: run.error_message,
            remaining_input: run.remaining_input,
            readback,
            state: c.session.get_state_update(&c.token).ok(),
        })
    }

    /// `Sim.DeleteAircraft` — fills the state update before checking the
    /// result, so the fill happens even on failure. The transport drops the
    /// payload when an error travels, but the heartbeat side effect stands.
    fn delete_aircraft(&self, args: DeleteAircraftArgs) -> Result<Vec<u8>, ServerError> {
        let c = self.controller(&args.token)?;
        let result = c.sim.delete_aircraft(&c.tcw, &args.callsign);
        let reply = StateUpdateReply { state: c.session.get_state_update(&c.token).ok() };
        result?;
        encode(&reply)
    }

    fn controller(&self, token: &str) -> Result<crate::manager::ControllerContext, ServerError> {
        self.manager.lookup_controller(token).ok_or_else(|| ErrorKind::NoSimForControllerToken.into())
    }

    /// Associate this connection's byte counters with the session the caller
    /// just joined, for the status page.
    fn adopt_traffic(&self, ctx: &RequestContext, token: &str) {
        if let Some(c) = self.manager.lookup_controller(token) {
            c.session.attach_traffic(Arc::clone(&ctx.traffic));
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
