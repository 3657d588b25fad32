use std::sync::Arc;

use mbe_runtime::clock::ManualClock;
use mbe_runtime::param::ParamValue;
use mbe_runtime::session::PressureSampling;
use mbe_runtime::{
    ControlMode, MbeError, ParameterStore, RecipeSession, SessionConfig, SharedSimulator,
    StartPolicy, VirtualMbe,
};

fn session_with(
    store: &SharedSimulator,
    config: SessionConfig,
) -> (RecipeSession<SharedSimulator>, ManualClock) {
    let clock = ManualClock::new();
    let session = RecipeSession::with_clock(store.clone(), config, Arc::new(clock.clone()));
    (session, clock)
}

fn session(store: &SharedSimulator) -> RecipeSession<SharedSimulator> {
    session_with(store, SessionConfig::default()).0
}

fn counter(store: &SharedSimulator) -> f64 {
    store
        .get_f64("this.recipesrunning")
        .expect("read")
        .expect("counter")
}

fn number(store: &SharedSimulator, name: &str) -> f64 {
    store.get_f64(name).expect("read").expect("number")
}

#[test]
fn counter_is_claimed_and_released() {
    let store = SharedSimulator::default();
    let mut recipe = session(&store);
    recipe.start_recipe().expect("start");
    assert!(recipe.is_started());
    assert_eq!(counter(&store), 1.0);
    assert_eq!(recipe.recipes_running().expect("count"), 1);
    recipe.finish().expect("finish");
    assert_eq!(counter(&store), 0.0);
}

#[test]
fn second_recipe_is_refused() {
    let store = SharedSimulator::default();
    let mut first = session(&store);
    first.start_recipe().expect("start");

    let mut second = session(&store);
    let err = second.start_recipe().expect_err("already running");
    assert!(matches!(err, MbeError::RecipeAlreadyRunning(1)), "{err:?}");
    // The refused session must not release a claim it never made.
    drop(second);
    assert_eq!(counter(&store), 1.0);

    first.finish().expect("finish");
    assert_eq!(counter(&store), 0.0);
}

#[test]
fn check_then_increment_policy_uses_inc_and_dec() {
    let store = SharedSimulator::default();
    let config = SessionConfig {
        start_policy: StartPolicy::CheckThenIncrement,
        ..SessionConfig::default()
    };
    let (mut recipe, _) = session_with(&store, config.clone());
    recipe.start_recipe().expect("start");
    assert_eq!(counter(&store), 1.0);

    let (mut other, _) = session_with(&store, config);
    assert!(matches!(
        other.start_recipe(),
        Err(MbeError::RecipeAlreadyRunning(1))
    ));
    drop(other);
    drop(recipe);
    assert_eq!(counter(&store), 0.0);
}

#[test]
fn failing_recipe_still_reaches_standby() {
    let store = SharedSimulator::default();
    let run = || -> Result<(), MbeError> {
        let mut recipe = session(&store);
        recipe.start_recipe()?;
        recipe.shutter(&["Ga", "As"], &[true, true])?;
        recipe.set_param("Manip.PV.Rate", 60.0)?;
        recipe.set_param("Manip.PV.TSP", 400.0)?;
        recipe.waiting(120.0)?;
        recipe.set_param("Nope.PV.TSP", 1.0)?;
        Ok(())
    };
    let err = run().expect_err("unknown parameter");
    assert!(matches!(err, MbeError::Verification { .. }), "{err:?}");

    assert_eq!(counter(&store), 0.0);
    assert_eq!(store.get_param("Shutter.Ga").expect("read"), Some("closed".into()));
    assert_eq!(store.get_param("Shutter.As").expect("read"), Some("closed".into()));
    assert_eq!(number(&store, "Manip.PV.TSP"), 200.0);
    assert_eq!(number(&store, "Manip.PV.Rate"), 100.0);
    assert_eq!(number(&store, "SUKO.OP.Rate"), 2.0);
}

#[test]
fn standby_can_be_skipped_at_exit() {
    let store = SharedSimulator::default();
    let config = SessionConfig {
        standby_at_exit: false,
        ..SessionConfig::default()
    };
    let (mut recipe, _) = session_with(&store, config);
    recipe.start_recipe().expect("start");
    recipe.shutter(&["In"], &[true]).expect("open");
    recipe.finish().expect("finish");
    assert_eq!(store.get_param("Shutter.In").expect("read"), Some("open".into()));
    assert_eq!(counter(&store), 0.0);
}

#[test]
fn setpoints_above_the_ceiling_are_capped() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    recipe.set_param("Manip.PV.TSP", 900.0).expect("set");
    assert_eq!(number(&store, "Manip.PV.TSP"), 850.0);
    recipe.set_param("Ga.PV.TSP", 800.0).expect("set");
    assert_eq!(number(&store, "Ga.PV.TSP"), 800.0);
}

#[test]
fn numeric_text_setpoints_are_capped() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    recipe.set_param("Manip.PV.TSP", "900").expect("set");
    assert_eq!(number(&store, "Manip.PV.TSP"), 850.0);
    recipe.set_param("In.PV.TSP", " 700 ").expect("set");
    assert_eq!(number(&store, "In.PV.TSP"), 700.0);
}

#[test]
fn modes_and_aliases_verify_through_readback() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    recipe.set_param("Ga.Mode", ControlMode::Manual).expect("mode");
    recipe.set_param("Ga.Mode", "PID").expect("pid alias");
    assert_eq!(store.get_param("Ga.Mode").expect("read"), Some("auto".into()));
    recipe.set_param("AsCracker.Valve.OP", 33.0).expect("valve");
    recipe.set_param("Manip.RS.RPM", 7.0).expect("rotation");
    assert_eq!(number(&store, "Manip.RS"), 7.0);
}

#[test]
fn rejected_value_fails_after_retries() {
    let store = SharedSimulator::default();
    let config = SessionConfig {
        verify_retries: 3,
        ..SessionConfig::default()
    };
    let (recipe, clock) = session_with(&store, config);
    let err = recipe.set_param("Ga.PV.TSP", "hot").expect_err("not a number");
    match err {
        MbeError::Verification {
            param,
            expected,
            actual,
        } => {
            assert_eq!(param, "Ga.PV.TSP");
            assert_eq!(expected, "hot");
            assert_eq!(actual, "550");
        }
        other => panic!("expected verification failure, got {other:?}"),
    }
    // Three readback delays plus two backoffs.
    assert_eq!(clock.sleep_calls(), 5);
}

#[test]
fn shutter_arguments_are_checked() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    let err = recipe.shutter(&["Ga", "In"], &[true]).expect_err("length mismatch");
    assert!(matches!(err, MbeError::InvalidCommand(_)), "{err:?}");
    let err = recipe.shutter(&["Nope"], &[true]).expect_err("no such shutter");
    assert!(matches!(err, MbeError::Verification { .. }), "{err:?}");
}

#[test]
fn timer_waits_only_for_the_remainder() {
    let store = SharedSimulator::default();
    let mut recipe = session(&store);
    recipe.waiting(5.0).expect("wait");
    recipe.timer_start().expect("timer");
    recipe.waiting(10.0).expect("wait");
    recipe.timer_wait(25.0).expect("timer wait");
    assert_eq!(store.elapsed().expect("elapsed"), 30.0);
    // Already past the mark: no extra wait.
    recipe.timer_wait(20.0).expect("timer wait");
    assert_eq!(store.elapsed().expect("elapsed"), 30.0);
}

#[test]
fn flux_monitor_moves_and_is_verified() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    recipe.bfm(true).expect("insert");
    assert_eq!(number(&store, "BFM.LT"), 124.0);
    assert_eq!(store.elapsed().expect("elapsed"), 30.0);
    // Already inserted: nothing to do.
    recipe.bfm(true).expect("insert again");
    assert_eq!(store.elapsed().expect("elapsed"), 30.0);
    recipe.bfm(false).expect("retract");
    assert_eq!(number(&store, "BFM.LT"), 0.0);
}

#[test]
fn steady_pressures_are_read_in_one_window() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    let reading = recipe
        .read_pressures(PressureSampling::default())
        .expect("pressures");
    assert!(!reading.timed_out);
    assert!((reading.bfm - 1.0e-9).abs() < 1.0e-15, "{reading:?}");
    assert!((reading.mbe - 1.0e-7).abs() < 1.0e-13, "{reading:?}");
    // Twenty samples, one second apart.
    assert_eq!(store.elapsed().expect("elapsed"), 19.0);
}

#[test]
fn pyrometer_reading_closes_its_shutter() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    let (mean, variance) = recipe.take_pyro_reading(4).expect("pyrometer");
    assert_eq!(mean, 90.0);
    assert_eq!(variance, 0.0);
    assert_eq!(
        store.get_param("Shutter.Pyrometer").expect("read"),
        Some("closed".into())
    );
}

#[test]
fn manipulator_offset_comes_from_the_pyrometer() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    assert_eq!(recipe.manip_offset(3).expect("offset"), 110.0);
    assert_eq!(store.elapsed().expect("elapsed"), 3.0);
}

#[test]
fn pyrometer_convergence_steers_the_manipulator() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    recipe.set_param("Manip.PV.Rate", 600.0).expect("rate");
    let setpoint = recipe.converge_to_temp(300.0, 2, 2).expect("converge");
    assert_eq!(setpoint, 410.0);
    assert_eq!(number(&store, "Manip.PV.TSP"), 410.0);
    assert_eq!(number(&store, "Manip.PV"), 410.0);
    assert_eq!(number(&store, "Pyrometer.T"), 300.0);

    let untouched = recipe.converge_to_temp(250.0, 0, 2).expect("no rounds");
    assert_eq!(untouched, 410.0);
}

#[test]
fn controller_log_is_exported_on_request() {
    let dir = std::env::temp_dir().join(format!("mbe-session-log-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create export dir");
    let store = SharedSimulator::new(VirtualMbe::new().with_export_dir(&dir));
    let recipe = session(&store);
    recipe.waiting(2.0).expect("wait");
    recipe.plot_log(Some("run42.txt")).expect("export");
    assert!(dir.join("run42.csv").exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn calibrated_setpoint_converges_with_the_monitor() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    let calibration = |flux: f64| 500.0 + flux * 1.0e11;
    let setpoint = recipe
        .converge_with_bfm("Ga.PV.TSP", &calibration, 1.0e-9, 1, PressureSampling::default(), true)
        .expect("converge");
    assert!((setpoint - 600.0).abs() < 1.0e-3, "setpoint {setpoint}");
    assert!((number(&store, "Ga.PV.TSP") - 600.0).abs() < 0.1);
    assert_eq!(number(&store, "BFM.LT"), 0.0);
}

#[test]
fn standby_check_flags_open_shutters() {
    let store = SharedSimulator::default();
    let recipe = session(&store);
    assert!(recipe.check_standby().expect("check"));
    recipe.shutter(&["Ga"], &[true]).expect("open");
    assert!(!recipe.check_standby().expect("check"));
    recipe.shutter(&["Ga"], &[false]).expect("close");
    recipe.set_param("Manip.PV", 400.0).expect("set");
    assert!(!recipe.check_standby().expect("check"));
    assert_eq!(
        recipe.get_param("Manip.PV").expect("read"),
        Some(ParamValue::Float(400.0))
    );
}
