use std::{
    env,
    ffi::{OsStr, OsString},
    fs,
    path::Path,
    sync::{Mutex, OnceLock},
};

use acses_pilot::config;
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("config env mutex poisoned")
}

fn snapshot_env(vars: &[&'static str]) -> Vec<(&'static str, Option<OsString>)> {
    vars.iter().map(|&name| (name, env::var_os(name))).collect()
}

fn restore_env(vars: Vec<(&'static str, Option<OsString>)>) {
    for (name, value) in vars {
        match value {
            Some(val) => set_var(name, val),
            None => remove_var(name),
        }
    }
}

fn write_model(path: &Path, model: &str) {
    fs::write(path, format!("[pilot]\nmodel = \"{model}\"\n")).expect("write config file");
}

fn set_var(name: &str, value: impl AsRef<OsStr>) {
    unsafe { env::set_var(name, value) }
}

fn remove_var(name: &str) {
    unsafe { env::remove_var(name) }
}

const TRACKED: [&str; 6] = [
    "HOME",
    "XDG_CONFIG_HOME",
    "ACSES_CONFIG_FILE",
    "ACSES__PILOT__MODEL",
    "ACSES__PILOT__N_RUNS",
    "ACSES__PILOT__TEMPERATURE",
];

#[test]
fn config_precedence_follows_documented_order() {
    let _guard = env_guard();
    let env_snapshot = snapshot_env(&TRACKED);
    let original_dir = env::current_dir().expect("capture current dir");

    let workspace = TempDir::new().expect("temp workspace");
    let workspace_path = workspace.path();
    let xdg_config_root = workspace_path.join("xdg_config");
    let local_config_dir = workspace_path.join("config");
    let override_path = workspace_path.join("override.toml");

    fs::create_dir_all(xdg_config_root.join("acses")).expect("create xdg dir");
    fs::create_dir_all(&local_config_dir).expect("create local config dir");

    env::set_current_dir(workspace_path).expect("change to workspace");
    set_var("HOME", workspace_path);
    set_var("XDG_CONFIG_HOME", &xdg_config_root);
    set_var("ACSES_CONFIG_FILE", &override_path);

    let xdg_path = xdg_config_root.join("acses").join("settings.toml");
    let local_path = local_config_dir.join("settings.toml");

    write_model(&xdg_path, "models/from-xdg");
    write_model(&local_path, "models/from-local");
    write_model(&override_path, "models/from-override");

    set_var("ACSES__PILOT__MODEL", "models/from-env");
    let config_env = config::load().expect("load config with env override");
    assert_eq!(config_env.pilot.model, "models/from-env");

    remove_var("ACSES__PILOT__MODEL");
    let config_override = config::load().expect("load config with override file");
    assert_eq!(config_override.pilot.model, "models/from-override");

    remove_var("ACSES_CONFIG_FILE");
    let config_local = config::load().expect("load config from local config");
    assert_eq!(config_local.pilot.model, "models/from-local");

    fs::remove_file(&local_path).expect("remove local config");
    let config_xdg = config::load().expect("load config from xdg config");
    assert_eq!(config_xdg.pilot.model, "models/from-xdg");

    fs::remove_file(&xdg_path).expect("remove xdg config");
    let config_default = config::load().expect("load built-in defaults");
    assert_eq!(config_default.pilot.model, "models/gemini-2.5-flash-lite");
    assert_eq!(config_default.pilot.n_runs, 3);

    env::set_current_dir(&original_dir).expect("restore current dir");
    restore_env(env_snapshot);
}

#[test]
fn numeric_env_overrides_are_parsed() {
    let _guard = env_guard();
    let env_snapshot = snapshot_env(&TRACKED);
    remove_var("ACSES_CONFIG_FILE");

    set_var("ACSES__PILOT__N_RUNS", "5");
    set_var("ACSES__PILOT__TEMPERATURE", "0.2");
    let cfg = config::load().expect("load config with numeric env overrides");
    assert_eq!(cfg.pilot.n_runs, 5);
    assert_eq!(cfg.generation_params().temperature, 0.2);

    set_var("ACSES__PILOT__N_RUNS", "0");
    assert!(config::load().is_err());

    restore_env(env_snapshot);
}
