// ABOUTME: Batch application commands: start/stop/restart, status, ls, check.
// ABOUTME: Already-in-desired-state counts as success but is tallied separately.

use super::{Application, Selector, select_app_names};
use crate::context::HostContext;
use crate::error::Result;
use crate::process::Supervisor;
use crate::repo::HealthProbe;
use crate::report::align_columns;
use crate::tx::store::directory_size;
use serde::Serialize;
use std::collections::BTreeMap;

/// Start every selected application. Returns the number of apps that were
/// already running (non-transitions); this feeds the process exit status.
pub async fn start(ctx: &HostContext, selector: &Selector, acknowledged: bool) -> Result<i32> {
    let supervisor = Supervisor::new(ctx);
    let mut non_transitions = 0;
    for name in select_app_names(ctx, selector)? {
        let app = Application::load(ctx, &name)?;
        if app.is_running()? {
            println!("{name} already running");
            non_transitions += 1;
        } else {
            println!("Starting {name} ...");
            supervisor.start(&app, acknowledged).await?;
            println!("OK");
        }
    }
    Ok(non_transitions)
}

/// Stop every selected application. Returns the number of apps that were
/// already stopped.
pub async fn stop(ctx: &HostContext, selector: &Selector, acknowledged: bool) -> Result<i32> {
    let supervisor = Supervisor::new(ctx);
    let mut non_transitions = 0;
    for name in select_app_names(ctx, selector)? {
        let app = Application::load(ctx, &name)?;
        if !app.is_running()? {
            println!("{name} already stopped");
            non_transitions += 1;
        } else {
            println!("Stopping {name} ...");
            supervisor.stop(&app, acknowledged).await?;
            println!("OK");
        }
    }
    Ok(non_transitions)
}

/// Stop then start every selected application; the result is the sum of
/// both phases' non-transition counts.
pub async fn restart(ctx: &HostContext, selector: &Selector, acknowledged: bool) -> Result<i32> {
    let names = select_app_names(ctx, selector)?;
    let mut rc = 0;
    for name in names {
        let single = Selector {
            regex: Some(regex::escape(&name)),
            ..Default::default()
        };
        rc += stop(ctx, &single, acknowledged).await?;
        rc += start(ctx, &single, acknowledged).await?;
    }
    Ok(rc)
}

/// Report running state (and pids) of the selected applications.
pub fn status(ctx: &HostContext, selector: &Selector, json: bool) -> Result<()> {
    let names = select_app_names(ctx, selector)?;

    if json {
        let mut result: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for name in names {
            let app = Application::load(ctx, &name)?;
            result.insert(name, app.pids(true)?);
        }
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    for name in names {
        let app = Application::load(ctx, &name)?;
        let pids = app.pids(true)?;
        if pids.is_empty() {
            println!("{name} is stopped");
        } else {
            let wording = if pids.len() > 1 { "PIDs" } else { "PID" };
            let list = pids
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            println!("{name} is running ({wording} {list})");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct AppSummary {
    app_version: String,
    deploy_time: String,
    app_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    create_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deploy_user: Option<String>,
}

/// Tabulate the selected applications (version, size, deploy time; more
/// with `details`).
pub fn ls(ctx: &HostContext, selector: &Selector, details: bool, json: bool) -> Result<()> {
    let names = select_app_names(ctx, selector)?;

    let mut summaries: BTreeMap<String, AppSummary> = BTreeMap::new();
    for name in &names {
        let app = Application::load(ctx, name)?;
        let meta = |key: &str| app.meta.get(key).cloned().unwrap_or_default();
        summaries.insert(
            name.clone(),
            AppSummary {
                app_version: meta("app_version"),
                deploy_time: meta("deploy_time"),
                app_size: directory_size(&app.basedir),
                create_user: details.then(|| meta("create_user")),
                create_time: details.then(|| meta("create_time")),
                deploy_user: details.then(|| meta("deploy_user")),
            },
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let mut rows = Vec::new();
    if details {
        rows.push(
            ["NAME", "VERSION", "SIZE", "CRT_USER", "CRT_TIME", "DPL_USER", "DPL_TIME"]
                .map(String::from)
                .to_vec(),
        );
        for (name, s) in &summaries {
            rows.push(vec![
                name.clone(),
                s.app_version.clone(),
                s.app_size.to_string(),
                s.create_user.clone().unwrap_or_default(),
                s.create_time.clone().unwrap_or_default(),
                s.deploy_user.clone().unwrap_or_default(),
                s.deploy_time.clone(),
            ]);
        }
    } else {
        rows.push(["NAME", "VERSION", "SIZE", "DEPLOY_TIME"].map(String::from).to_vec());
        for (name, s) in &summaries {
            rows.push(vec![
                name.clone(),
                s.app_version.clone(),
                s.app_size.to_string(),
                s.deploy_time.clone(),
            ]);
        }
    }
    for line in align_columns(&rows) {
        println!("{line}");
    }
    Ok(())
}

/// Run every configured health check of the selected applications through
/// the probe. Returns 0 when all checks pass, 1 otherwise; a stopped app
/// counts as one failed check.
pub async fn check(
    ctx: &HostContext,
    selector: &Selector,
    probe: &dyn HealthProbe,
    details: bool,
) -> Result<i32> {
    let names = select_app_names(ctx, selector)?;

    let mut count = 0;
    let mut success = 0;
    for name in names {
        println!("Checking application {name} ...");
        let app = Application::load(ctx, &name)?;
        if !app.is_running()? {
            count += 1;
            println!("FAIL (app is stopped)");
            continue;
        }

        let checks: Vec<_> = app.descriptor.checks.iter().collect();
        let probes = checks.iter().map(|(check_name, spec)| {
            let url = spec.url();
            async move {
                println!(
                    "Check \"{check_name}\": Matching {url} with pattern \"{}\"",
                    spec.success
                );
                probe.matches(&url, &spec.success).await
            }
        });
        for ((_, spec), outcome) in checks.iter().zip(futures::future::join_all(probes).await) {
            count += 1;
            match outcome {
                Ok(true) => {
                    if details {
                        println!("\"{}\" found at {}", spec.success, spec.url());
                    }
                    println!("OK");
                    success += 1;
                }
                Ok(false) => println!("FAIL"),
                Err(e) => {
                    tracing::warn!("Problem with request: {e}");
                    println!("FAIL");
                }
            }
        }
    }

    println!("{count} checks executed, {} failed", count - success);
    if success == count {
        println!("Check result: OK");
        Ok(0)
    } else {
        println!("Check result: FAIL");
        Ok(1)
    }
}
