use std::process::Command;

use eyre::Context as _;

fn registry_cmd(cfg_dir: &std::path::Path, data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("wallet-registry"));
    cmd.env("WALLET_REGISTRY_CONFIG_DIR", cfg_dir)
        .env("WALLET_REGISTRY_DATA_DIR", data_dir)
        .env_remove("WALLET_REGISTRY_DEFAULT_CONTRACTS");
    cmd
}

#[test]
fn doctor_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = registry_cmd(cfg_dir.path(), data_dir.path())
        .args(["doctor", "--json"])
        .output()
        .context("run wallet-registry doctor --json")?;

    assert!(
        out.status.success(),
        "doctor exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true), "ok flag");
    assert!(v.get("version").and_then(|x| x.as_str()).is_some(), "version missing");
    assert!(
        v.get("generated_at").and_then(|x| x.as_str()).is_some(),
        "generated_at missing"
    );
    assert!(v.get("paths").and_then(|x| x.as_object()).is_some(), "paths missing");
    assert_eq!(
        v.pointer("/config/exists").and_then(serde_json::Value::as_bool),
        Some(false),
        "fresh config dir should have no config.toml"
    );
    Ok(())
}

#[test]
fn config_creates_file_and_doctor_flags_bad_contracts() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = registry_cmd(cfg_dir.path(), data_dir.path())
        .arg("config")
        .output()
        .context("run wallet-registry config")?;
    assert!(out.status.success(), "config failed: {}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse config json")?;
    assert_eq!(
        v.pointer("/defaults/defaultNetworkId").and_then(serde_json::Value::as_u64),
        Some(1),
        "default network"
    );
    let cfg_path = cfg_dir.path().join("config.toml");
    assert!(cfg_path.exists(), "config.toml not written");

    std::fs::write(
        &cfg_path,
        "[defaults]\ndefault_contracts = [\"0xnot-hex\"]\nprovider_url = \"http://rpc.example\"\n",
    )?;
    let out = registry_cmd(cfg_dir.path(), data_dir.path())
        .args(["doctor", "--json"])
        .output()
        .context("run wallet-registry doctor --json")?;
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert_eq!(v.get("healthy").and_then(serde_json::Value::as_bool), Some(false), "healthy");
    let issues = v
        .pointer("/config/issues")
        .and_then(serde_json::Value::as_array)
        .map_or(0, Vec::len);
    assert_eq!(issues, 2, "expected provider and contract issues: {v}");
    Ok(())
}

#[test]
fn doctor_human_output_points_at_config_command() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    assert_cmd::Command::from_std(registry_cmd(cfg_dir.path(), data_dir.path()))
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicates::str::contains("wallet-registry doctor"))
        .stdout(predicates::str::contains("run `wallet-registry config` to create it"));
    Ok(())
}
