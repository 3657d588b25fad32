use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mbe_runtime::clock::ManualClock;
use mbe_runtime::param::{Button, ParamValue};
use mbe_runtime::remote::{Pacing, RemoteController};
use mbe_runtime::{
    Connection, ConnectionConfig, MbeError, ParameterStore, RecipeSession, SessionConfig,
    SharedSimulator, ShutterState, VirtualMbe, VirtualServer,
};

const PASSWORD: &str = "lab";

fn server() -> VirtualServer {
    let simulator = SharedSimulator::new(VirtualMbe::new().with_chamber("D1"));
    VirtualServer::bind("127.0.0.1:0", simulator, PASSWORD).expect("bind virtual server")
}

fn connect(server: &VirtualServer, client: &str) -> Connection {
    let config = ConnectionConfig::new(server.local_addr().to_string(), PASSWORD)
        .with_client_name(client);
    Connection::connect(&config).expect("connect")
}

fn remote(server: &VirtualServer, client: &str) -> RemoteController {
    RemoteController::new(connect(server, client), Pacing::Simulated)
}

#[test]
fn handshake_reports_chamber_and_parameters() {
    let server = server();
    let conn = connect(&server, "recipe");
    assert_eq!(conn.chamber(), "D1");
    assert!(conn.description().starts_with("time:counter\n"));
    assert!(conn.description().contains("\nga.pv.tsp:float\n"));
    assert_eq!(conn.send_command("Get Manip.PV").expect("get"), "200");
    assert_eq!(conn.send_command("OK").expect("keep-alive"), "OK");
    server.shutdown();
}

#[test]
fn wrong_password_is_rejected() {
    let server = server();
    let config = ConnectionConfig::new(server.local_addr().to_string(), "guess");
    let err = Connection::connect(&config).expect_err("bad password");
    assert!(matches!(err, MbeError::Authentication), "{err:?}");
}

#[test]
fn error_replies_surface_as_protocol_errors() {
    let server = server();
    let conn = connect(&server, "recipe");
    let err = conn.send_command("Get Nope").expect_err("unknown");
    assert!(matches!(err, MbeError::Protocol(_)), "{err:?}");
    let err = conn.send_command("Teleport Ga").expect_err("unknown command");
    assert!(matches!(err, MbeError::Protocol(_)), "{err:?}");
}

#[test]
fn remote_store_drives_the_simulator() {
    let server = server();
    let store = remote(&server, "recipe");
    assert!(store.set_param("Ga.PV.Rate", "60").expect("set"));
    assert!(store.set_param("Ga.PV.TSP", "560").expect("set"));
    assert!(!store.set_param("Ga.PV.TSP", "warm").expect("rejected"));
    assert!(!store.set_param("Nope", "1").expect("unknown"));
    assert_eq!(store.get_param("Nope").expect("get"), None);

    store.wait(4.0).expect("wait");
    assert_eq!(store.elapsed().expect("elapsed"), 4.0);
    assert_eq!(
        store.get_param("Ga.PV").expect("get"),
        Some(ParamValue::Float(554.0))
    );
    assert_eq!(server.simulator().lock().ticks(), 4);

    assert!(store.set_shutter("Ga", ShutterState::Open).expect("open"));
    assert_eq!(
        store.get_param("Shutter.Ga").expect("get"),
        Some(ParamValue::from("open"))
    );
    assert!(store.press(Button::BfmIn).expect("press"));
    assert_eq!(store.get_f64("BFM.LT").expect("get"), Some(124.0));
    store.close().expect("close");
    assert!(store.connection().is_closed());
}

#[test]
fn only_one_client_can_claim_the_chamber() {
    let server = server();
    let clients: Vec<_> = (0..4)
        .map(|index| {
            let store = remote(&server, &format!("client{index}"));
            thread::spawn(move || store.try_start_recipe().expect("claim"))
        })
        .collect();
    let claimed = clients
        .into_iter()
        .map(|client| client.join().expect("client thread"))
        .filter(|claimed| *claimed)
        .count();
    assert_eq!(claimed, 1);
    assert_eq!(
        server.simulator().lock().get_param("this.recipesrunning"),
        Some(ParamValue::Float(1.0))
    );
}

#[test]
fn recipe_over_the_wire_ends_in_standby() {
    let server = server();
    {
        let mut recipe = RecipeSession::with_clock(
            remote(&server, "recipe"),
            SessionConfig::default(),
            Arc::new(ManualClock::new()),
        );
        recipe.start_recipe().expect("start");
        recipe.shutter(&["In"], &[true]).expect("open");
        recipe.set_param("Manip.PV.Rate", 60.0).expect("rate");
        recipe.set_param("Manip.PV.TSP", 230.0).expect("setpoint");
        let outcome = recipe
            .wait_to_reach_temp("Manip", None, None, true)
            .expect("ramp");
        assert!(outcome.is_reached(), "{outcome:?}");
        recipe.finish().expect("finish");
    }

    let mbe = server.simulator().lock();
    assert_eq!(mbe.get_param("this.recipesrunning"), Some(ParamValue::Float(0.0)));
    assert_eq!(mbe.get_param("Shutter.In"), Some("closed".into()));
    assert_eq!(mbe.get_param("Manip.PV.TSP"), Some(ParamValue::Float(200.0)));
}

#[test]
fn reset_command_restores_power_on_state() {
    let server = server();
    let conn = connect(&server, "recipe");
    conn.send_command("Set Ga.PV.TSP 600").expect("set");
    conn.send_command("Wait 3").expect("wait");
    conn.send_command("#reset_virt_mbe").expect("reset");
    assert_eq!(conn.send_command("Get Ga.PV.TSP").expect("get"), "550");
    assert_eq!(conn.send_command("Get time").expect("get"), "0");
    assert_eq!(conn.send_command("Get this.chamber").expect("get"), "D1");
}

#[test]
fn disconnected_clients_are_forgotten() {
    let server = server();
    for round in 0..5 {
        let conn = connect(&server, &format!("recipe-{round}"));
        assert_eq!(conn.send_command("Get Manip.PV").expect("get"), "200");
        conn.close().expect("close");
    }
    let held = connect(&server, "operator");
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.client_count() > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.client_count(), 1);
    held.close().expect("close");
    server.shutdown();
}
