//! `provider-gateway doctor` - startup diagnostics.
//!
//! Validates configuration and probes local prerequisites so problems show
//! up before a page tries to connect. Each check reports pass/fail with
//! actionable guidance on failures.

use std::path::Path;

use crate::config::{Config, SessionStoreConfig};
use crate::settings::gateway_home;

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("Provider Gateway Doctor");
    println!("=======================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let config = Config::from_env_with_toml(config_path);

    check(
        "Configuration",
        match &config {
            Ok(config) => CheckResult::Pass(format!(
                "approval timeout {}s, queue capacity {}",
                config.gateway.approval_timeout.as_secs(),
                match config.gateway.queue_capacity {
                    0 => "unbounded".to_string(),
                    n => n.to_string(),
                }
            )),
            Err(e) => CheckResult::Fail(e.to_string()),
        },
        &mut passed,
        &mut failed,
    );

    check(
        "State directory",
        check_state_dir(&gateway_home()),
        &mut passed,
        &mut failed,
    );

    match &config {
        Ok(config) => {
            check(
                "Session store",
                check_session_store(config).await,
                &mut passed,
                &mut failed,
            );
            check(
                "Provider listen port",
                check_port_available(&config.server.host, config.server.port),
                &mut passed,
                &mut failed,
            );
        }
        Err(_) => {
            let reason = "configuration did not load".to_string();
            check("Session store", CheckResult::Skip(reason.clone()), &mut passed, &mut failed);
            check("Provider listen port", CheckResult::Skip(reason), &mut passed, &mut failed);
        }
    }

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Fix the listed checks before starting the gateway.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

#[derive(Debug)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_state_dir(dir: &Path) -> CheckResult {
    if dir.exists() {
        if dir.is_dir() {
            CheckResult::Pass(format!("{}", dir.display()))
        } else {
            CheckResult::Fail(format!("{} exists but is not a directory", dir.display()))
        }
    } else {
        CheckResult::Pass(format!("{} will be created on first run", dir.display()))
    }
}

async fn check_session_store(config: &Config) -> CheckResult {
    if let SessionStoreConfig::Memory = config.store {
        return CheckResult::Skip("in-memory store; sessions end with the process".to_string());
    }
    match super::open_session_store(config).await {
        Ok(store) => match store.list().await {
            Ok(records) => CheckResult::Pass(format!("{} live session(s)", records.len())),
            Err(e) => CheckResult::Fail(e.to_string()),
        },
        Err(e) => CheckResult::Fail(format!("{e:#}")),
    }
}

fn check_port_available(host: &str, port: u16) -> CheckResult {
    match std::net::TcpListener::bind((host, port)) {
        Ok(listener) => {
            drop(listener);
            CheckResult::Pass(format!("{host}:{port} is available"))
        }
        Err(error) => CheckResult::Fail(format!(
            "{host}:{port} is unavailable ({error}); free the port or change GATEWAY_PORT"
        )),
    }
}
