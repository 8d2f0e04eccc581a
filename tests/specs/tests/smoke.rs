// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end protocol tests: a real server on a real socket, driven through
//! the compressed messagepack RPC channel.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use towerline::dispatch::{RunAircraftCommandsArgs, RunAircraftCommandsReply};
use towerline::error::ErrorKind;
use towerline::manager::{ConnectArgs, ConnectReply, NewSimArgs, SimJoinReply, TokenArgs};
use towerline::session::SpeechPacket;
use towerline::sim::StateUpdate;
use towerline::transport::PROTOCOL_VERSION;
use towerline_specs::SpecServer;

fn new_sim_args(name: &str) -> NewSimArgs {
    NewSimArgs {
        name: name.to_owned(),
        scenario_group: "ZNY".to_owned(),
        scenario: "JFK Departure".to_owned(),
        initials: "AB".to_owned(),
        password: None,
        prespawn: false,
    }
}

#[tokio::test]
async fn version_mismatch_gates_the_whole_connection() -> anyhow::Result<()> {
    let server = SpecServer::start_default().await?;
    let mut client = server.dial().await?;

    let err = client
        .call::<_, ConnectReply>("SimManager.Connect", &ConnectArgs { version: PROTOCOL_VERSION + 1 })
        .await
        .err();
    assert_eq!(err.and_then(|e| e.kind()), Some(ErrorKind::RpcVersionMismatch));

    // Nothing else on this connection is processed after the failed
    // handshake.
    let err = client
        .call::<_, StateUpdate>("SimManager.GetStateUpdate", &TokenArgs { token: "x".to_owned() })
        .await
        .err();
    assert_eq!(err.and_then(|e| e.kind()), Some(ErrorKind::RpcVersionMismatch));
    Ok(())
}

#[tokio::test]
async fn connect_must_come_first() -> anyhow::Result<()> {
    let server = SpecServer::start_default().await?;
    let mut client = server.dial().await?;

    let err = client
        .call::<_, StateUpdate>("Sim.GetStateUpdate", &TokenArgs { token: "x".to_owned() })
        .await
        .err();
    assert_eq!(err.and_then(|e| e.kind()), Some(ErrorKind::RpcVersionMismatch));
    Ok(())
}

#[tokio::test]
async fn full_controller_session_over_the_wire() -> anyhow::Result<()> {
    let server = SpecServer::start_default().await?;
    let mut client = server.dial().await?;

    let hello: ConnectReply = client.connect_handshake().await.map_err(anyhow::Error::from)?;
    assert!(hello.catalog.lookup("ZNY", "JFK Departure").is_some());
    assert!(hello.running.is_empty());
    assert!(!hello.tts_available);

    let join: SimJoinReply =
        client.call("SimManager.NewSim", &new_sim_args("evening push")).await?;
    assert!(!join.token.is_empty());
    assert_eq!(join.state.active_tcws, vec!["2J".to_owned()]);

    // The altitude command applies and returns fresh state.
    let reply: RunAircraftCommandsReply = client
        .call(
            "Sim.RunAircraftCommands",
            &RunAircraftCommandsArgs {
                token: join.token.clone(),
                callsign: "AAL123".to_owned(),
                commands: "D80".to_owned(),
            },
        )
        .await?;
    assert_eq!(reply.error_message, "");
    assert_eq!(reply.remaining_input, "");
    let after_command = reply.state.as_ref().map(|s| s.sim.generation).unwrap_or(0);
    assert!(after_command >= join.state.sim.generation);

    // A malformed second token is reported in the reply, not as an RPC
    // error; the first command stays applied.
    let reply: RunAircraftCommandsReply = client
        .call(
            "Sim.RunAircraftCommands",
            &RunAircraftCommandsArgs {
                token: join.token.clone(),
                callsign: "AAL123".to_owned(),
                commands: "L270 D9Q".to_owned(),
            },
        )
        .await?;
    assert!(!reply.error_message.is_empty());
    assert_eq!(reply.remaining_input, "D9Q");

    // Generations never go backwards across repeated updates.
    let mut last = after_command;
    for _ in 0..5 {
        let update: StateUpdate = client
            .call("SimManager.GetStateUpdate", &TokenArgs { token: join.token.clone() })
            .await?;
        assert!(update.sim.generation >= last);
        last = update.sim.generation;
    }

    // Sign off; the token is dead everywhere afterwards.
    client.call::<_, ()>("SimManager.SignOff", &TokenArgs { token: join.token.clone() }).await?;
    let err = client
        .call::<_, StateUpdate>("SimManager.GetStateUpdate", &TokenArgs { token: join.token })
        .await
        .err();
    assert_eq!(err.and_then(|e| e.kind()), Some(ErrorKind::NoSimForControllerToken));
    Ok(())
}

#[tokio::test]
async fn weather_rpc_fails_cleanly_without_a_provider() -> anyhow::Result<()> {
    let server = SpecServer::start_default().await?;
    let mut client = server.dial().await?;
    let _: ConnectReply = client.connect_handshake().await?;

    #[derive(serde::Serialize)]
    struct Args {
        facility: String,
        time: i64,
    }
    let err = client
        .call::<_, serde_json::Value>(
            "SimManager.GetPrecipURL",
            &Args { facility: "ZNY".to_owned(), time: 1_700_000_000 },
        )
        .await
        .err();
    assert_eq!(err.and_then(|e| e.kind()), Some(ErrorKind::WeatherUnavailable));
    Ok(())
}

#[tokio::test]
async fn status_page_shows_the_session() -> anyhow::Result<()> {
    let server = SpecServer::start_default().await?;
    let mut client = server.dial().await?;
    let _: ConnectReply = client.connect_handshake().await?;
    let _: SimJoinReply = client.call("SimManager.NewSim", &new_sim_args("dogwatch")).await?;

    let body =
        reqwest::get(format!("http://{}/sup", server.http_addr)).await?.text().await?;
    assert!(body.contains("towerline"));
    assert!(body.contains("dogwatch"), "status page: {body}");
    Ok(())
}

#[tokio::test]
async fn speech_socket_delivers_queued_readbacks() -> anyhow::Result<()> {
    let server = SpecServer::start_default().await?;
    let mut client = server.dial().await?;
    let _: ConnectReply = client.connect_handshake().await?;
    let join: SimJoinReply = client.call("SimManager.NewSim", &new_sim_args("redeye")).await?;

    // Unauthenticated upgrades are refused.
    let bare = server.speech_url().into_client_request()?;
    assert!(tokio_tungstenite::connect_async(bare).await.is_err());

    // With the controller token as bearer, audio flows.
    let mut request = server.speech_url().into_client_request()?;
    request
        .headers_mut()
        .insert("authorization", format!("Bearer {}", join.token).parse()?);
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;

    let packet = SpeechPacket {
        callsign: "AAL123".to_owned(),
        text: "maintain 8000".to_owned(),
        audio: vec![0x1d, 0x2e, 0x3f],
    };
    let context = server.manager.lookup_controller(&join.token);
    let context = context.ok_or_else(|| anyhow::anyhow!("controller context"))?;
    context.session.queue_speech(&join.token, packet.clone());

    // The per-session update loop pushes pending readbacks on its next tick.
    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
    let Message::Binary(bytes) = frame else {
        anyhow::bail!("expected a binary frame, got {frame:?}");
    };
    let received: SpeechPacket = rmp_serde::from_slice(&bytes)?;
    assert_eq!(received, packet);
    Ok(())
}
