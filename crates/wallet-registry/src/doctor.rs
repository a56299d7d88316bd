use crate::{config::RegistryConfig, identity::Address, paths::RegistryPaths};
use eyre::Context as _;
use serde::Serialize;
use serde_json::json;
use std::{fs, path::Path, path::PathBuf};

const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<RegistryConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&s).context("parse config.toml")
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if host_port.starts_with('[') {
        return host_port.split_inclusive(']').next();
    }
    host_port.split(':').next()
}

/// Secure scheme required unless the endpoint is on this machine.
fn endpoint_issue(field: &str, url: &str, secure: &str, plain: &str) -> Option<String> {
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with(&format!("{secure}://")) {
        return None;
    }
    if lower.starts_with(&format!("{plain}://"))
        && host_of(&lower).is_some_and(|h| LOOPBACK_HOSTS.contains(&h))
    {
        return None;
    }
    Some(format!(
        "defaults.{field} must use {secure}:// (or {plain}:// on loopback): {url}"
    ))
}

/// Problems in an otherwise parseable config.
pub fn config_issues(cfg: &RegistryConfig) -> Vec<String> {
    let d = &cfg.defaults;
    let mut issues = Vec::new();
    if d.default_network_id == Some(0) {
        issues.push("defaults.default_network_id must not be 0".to_owned());
    }
    if let Some(u) = &d.provider_url {
        issues.extend(endpoint_issue("provider_url", u, "https", "http"));
    }
    if let Some(u) = &d.websocket_provider_url {
        issues.extend(endpoint_issue("websocket_provider_url", u, "wss", "ws"));
    }
    for raw in &d.default_contracts {
        if !Address::parse(raw).is_ok_and(|a| a.is_evm_hex()) {
            issues.push(format!(
                "defaults.default_contracts: not a 0x-prefixed 20-byte hex address: {raw:?}"
            ));
        }
    }
    if cfg.cache.label_ttl_seconds == 0 {
        issues.push("cache.label_ttl_seconds must be positive".to_owned());
    }
    if cfg.cache.label_capacity == 0 {
        issues.push("cache.label_capacity must be positive".to_owned());
    }
    issues
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    default_network_id: Option<u64>,
    access_permission: Option<String>,
    default_contract_count: usize,
    issues: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    version: &'static str,
    generated_at: String,
    paths: RegistryPaths,
    config: ConfigReport,
    env: serde_json::Value,
}

fn collect(paths: &RegistryPaths) -> DoctorReport {
    let path = paths.config_file();
    let exists = path.exists();
    let (parse_ok, error, cfg) = if exists {
        match try_parse_config(&path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    let env = json!({
      "WALLET_REGISTRY_CONFIG_DIR": env_opt("WALLET_REGISTRY_CONFIG_DIR"),
      "WALLET_REGISTRY_DATA_DIR": env_opt("WALLET_REGISTRY_DATA_DIR"),
      "WALLET_REGISTRY_DEFAULT_NETWORK_ID": env_opt("WALLET_REGISTRY_DEFAULT_NETWORK_ID"),
      "WALLET_REGISTRY_ACCESS_PERMISSION": env_opt("WALLET_REGISTRY_ACCESS_PERMISSION"),
      "RUST_LOG": env_opt("RUST_LOG"),
    });

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        generated_at: chrono::Utc::now().to_rfc3339(),
        paths: paths.clone(),
        config: ConfigReport {
            path,
            exists,
            parse_ok,
            error,
            default_network_id: cfg.as_ref().and_then(|c| c.defaults.default_network_id),
            access_permission: cfg.as_ref().and_then(|c| c.defaults.access_permission.clone()),
            default_contract_count: cfg.as_ref().map_or(0, |c| c.defaults.default_contracts.len()),
            issues: cfg.as_ref().map(config_issues).unwrap_or_default(),
        },
        env,
    }
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let mut v = serde_json::to_value(r).context("serialize doctor report")?;
    if let Some(obj) = v.as_object_mut() {
        obj.insert("ok".to_owned(), json!(true));
        obj.insert(
            "healthy".to_owned(),
            json!(r.config.error.is_none() && r.config.issues.is_empty()),
        );
    }
    let s = serde_json::to_string_pretty(&v).context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "wallet-registry doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (run `wallet-registry config` to create it)")
            .context("write config")?;
    } else if r.config.parse_ok {
        writeln!(
            out,
            "  status: ok (default_network_id={:?}, access_permission={:?}, default_contracts={})",
            r.config.default_network_id,
            r.config.access_permission,
            r.config.default_contract_count
        )
        .context("write config")?;
        for issue in &r.config.issues {
            writeln!(out, "  issue: {issue}").context("write config")?;
        }
    } else {
        writeln!(out, "  status: parse failed").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    Ok(())
}

pub fn run(as_json: bool) -> eyre::Result<()> {
    let paths = RegistryPaths::discover()?;
    let report = collect(&paths);
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)
    } else {
        print_human(&mut out, &report)
    }
}
