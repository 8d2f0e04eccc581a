// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{LocalSim, LocalSimFactory};
use crate::commands::AircraftCommand;
use crate::config::ServerConfig;
use crate::sim::{Contact, SimFactory, SimSetup, Simulator};
use crate::test_support::test_catalog;

fn scenario() -> crate::sim::ScenarioInfo {
    test_catalog().groups["TEST"][0].clone()
}

#[tokio::test]
async fn updates_only_advance_while_unpaused() {
    let sim = LocalSim::new(&scenario());
    let before = sim.state_update().generation;
    sim.update();
    assert_eq!(sim.state_update().generation, before, "paused by server at start");

    sim.set_paused_by_server(false);
    sim.update();
    sim.update();
    assert_eq!(sim.state_update().generation, before + 2);
}

#[tokio::test]
async fn commands_mutate_aircraft_and_bump_generation() {
    let sim = LocalSim::new(&scenario());
    sim.spawn_aircraft("AAL123");
    let before = sim.state_update().generation;

    let result = sim.aircraft_command(
        "17",
        "AAL123",
        AircraftCommand::AssignAltitude { altitude: 8000, after_speed: false },
    );
    assert!(result.is_ok());
    assert!(sim.state_update().generation > before);

    let err = sim
        .aircraft_command("17", "GHOST", AircraftCommand::FlyPresentHeading)
        .err()
        .map(|e| e.to_string());
    assert_eq!(err, Some("unknown aircraft GHOST".to_owned()));
}

#[tokio::test]
async fn delete_via_command_token_removes_the_aircraft() {
    let sim = LocalSim::new(&scenario());
    sim.spawn_aircraft("AAL123");
    assert!(sim.has_aircraft("AAL123"));

    let result = sim.aircraft_command("17", "AAL123", AircraftCommand::DeleteAircraft);
    assert!(result.is_ok());
    assert!(!sim.has_aircraft("AAL123"));

    assert!(sim.delete_aircraft("17", "AAL123").is_err(), "already gone");
}

#[tokio::test]
async fn sign_on_is_exclusive_per_tcw() {
    let sim = LocalSim::new(&scenario());
    let first = sim.sign_on("2J");
    assert!(first.is_ok());
    assert!(sim.sign_on("2J").is_err());

    assert!(sim.sign_off("2J").is_ok());
    assert!(sim.sign_on("2J").is_ok(), "freed after sign-off");
}

#[tokio::test]
async fn events_fan_out_to_all_subscriptions() {
    let sim = LocalSim::new(&scenario());
    let a = sim.subscribe();
    let b = sim.subscribe();
    sim.post_event(crate::sim::SimEvent::StatusMessage { text: "hello".to_owned() });

    assert_eq!(sim.drain_events(a).len(), 1);
    assert_eq!(sim.drain_events(a).len(), 0, "drained");
    assert_eq!(sim.drain_events(b).len(), 1);

    sim.release(b);
    sim.post_event(crate::sim::SimEvent::StatusMessage { text: "again".to_owned() });
    assert_eq!(sim.drain_events(b).len(), 0, "released subscription sees nothing");
}

#[tokio::test]
async fn contacts_skip_vanished_aircraft() {
    let sim = LocalSim::new(&scenario());
    sim.spawn_aircraft("AAL123");
    let contact = |callsign: &str| Contact {
        callsign: callsign.to_owned(),
        text: "with you".to_owned(),
        voice: "pilot-1".to_owned(),
        kind: "check-in".to_owned(),
    };
    sim.push_contact("JFK_APP", contact("GHOST"));
    sim.push_contact("JFK_APP", contact("AAL123"));

    let next = sim.next_contact(&["JFK_APP".to_owned()]);
    assert_eq!(next.map(|c| c.callsign), Some("AAL123".to_owned()));
}

#[tokio::test]
async fn readback_reflects_the_last_command() {
    let sim = LocalSim::new(&scenario());
    sim.spawn_aircraft("AAL123");
    let result = sim.aircraft_command(
        "17",
        "AAL123",
        AircraftCommand::AssignAltitude { altitude: 8000, after_speed: false },
    );
    assert!(result.is_ok());
    let readback = sim.readback("AAL123");
    assert_eq!(readback.map(|r| r.text), Some("maintain 8000".to_owned()));
}

#[tokio::test]
async fn factory_validates_scenarios_and_seeds_traffic() {
    let factory = LocalSimFactory::new(&ServerConfig::default());
    let catalog = factory.catalog();
    assert!(!catalog.groups.is_empty());

    let (group, scenarios) =
        catalog.groups.first().map(|(g, s)| (g.clone(), s.clone())).expect("catalog");
    let setup = SimSetup {
        scenario_group: group.clone(),
        scenario: scenarios[0].name.clone(),
        local: false,
    };
    let sim = factory.build(&setup).map_err(|e| e.to_string()).expect("build");
    assert!(sim.has_aircraft("AAL123"), "starter traffic present");

    let bad = SimSetup {
        scenario_group: group,
        scenario: "No Such Scenario".to_owned(),
        local: false,
    };
    assert!(factory.build(&bad).is_err());
}

#[tokio::test]
async fn broken_extra_scenarios_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let good = dir.path().join("good.json");
    let bad = dir.path().join("bad.json");
    std::fs::write(
        &good,
        serde_json::json!({
            "group": "XTRA",
            "scenarios": [{
                "name": "One",
                "root_tcw": "1A",
                "tcws": { "1A": ["A_DEP"] },
            }],
        })
        .to_string(),
    )
    .expect("write good");
    std::fs::write(&bad, "{ not json").expect("write bad");

    let config = ServerConfig {
        extra_scenarios: vec![bad, good],
        ..ServerConfig::default()
    };
    let factory = LocalSimFactory::new(&config);
    let catalog = factory.catalog();
    assert!(catalog.lookup("XTRA", "One").is_some(), "good file merged");
}
