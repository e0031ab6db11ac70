// ABOUTME: Deployment orchestrator: activate, backout, deploy, diff.
// ABOUTME: Composes the transaction engine with the process supervisor.

use crate::app::{self, Application};
use crate::context::HostContext;
use crate::error::{Error, ErrorKind, Result};
use crate::knowhow::{self, SpecialInstructions};
use crate::process::Supervisor;
use crate::tx::{Closed, Transaction, diff_paths, store};

/// Move the deployed instance of an application into a fresh backout
/// transaction. The previously running bits stay restorable.
pub fn deactivate(ctx: &HostContext, app_name: &str) -> Result<String> {
    let app = Application::load(ctx, app_name)?;
    if app.is_running()? {
        return Err(Error::Execution(format!(
            "Cannot deactivate running app {app_name}"
        )));
    }

    let mut backout = Transaction::begin(ctx)?;
    println!(
        "Moving deployed instance of {} to backout transaction {}",
        app_name,
        backout.id()
    );

    for key in ["app_name", "app_version", "stage"] {
        let value = app.meta.get(key).ok_or_else(|| {
            Error::Execution(format!(
                "Cannot deactivate {app_name}: metadata \"{key}\" missing"
            ))
        })?;
        backout.set_meta(key, value);
    }
    backout.set_meta("tx_type", "backout");

    backout.import_entry(&app.basedir, "instance")?;
    for (artifact, path) in app_siblings(ctx, app_name)? {
        backout.import_entry(&path, &artifact)?;
    }

    let backout = backout.commit()?;
    Ok(backout.id().to_string())
}

/// Uninstall an application by moving it into a backout transaction.
pub fn rm_app(ctx: &HostContext, app_name: &str) -> Result<()> {
    if !app::all_app_names(ctx)?.iter().any(|n| n == app_name) {
        return Err(Error::Execution(format!(
            "No app found with name {app_name}"
        )));
    }
    deactivate(ctx, app_name)?;
    Ok(())
}

/// Deploy a committed transaction: back out any stopped prior deployment,
/// stamp deploy metadata, activate the content and start the application.
///
/// Returns 0 on success. A start failure returns 1 and deliberately leaves
/// the transaction in place for diagnosis; the activated content is not
/// rolled back.
pub async fn deploy(ctx: &HostContext, appname_or_txid: &str, acknowledged: bool) -> Result<i32> {
    let deploy_tx = resolve_transaction(ctx, appname_or_txid)?;
    let app_name = deploy_tx
        .meta()
        .get("app_name")
        .cloned()
        .expect("validated at load time");

    let mut do_deactivate = false;
    if app::all_app_names(ctx)?.iter().any(|n| n == &app_name) {
        if Application::load(ctx, &app_name)?.is_running()? {
            return Err(Error::Execution(format!(
                "Cannot deactivate running app {app_name}"
            )));
        }
        do_deactivate = true;
    }

    knowhow::acknowledge(
        deploy_tx.special_instructions(),
        "knowhow.tx.deploy",
        acknowledged,
    )?;

    if do_deactivate {
        deactivate(ctx, &app_name)?;
    }

    println!(
        "Deploying transaction {} (application {})",
        deploy_tx.id(),
        app_name
    );
    let mut open_tx = deploy_tx.open();
    open_tx.set_meta("deploy_user", &ctx.login_user());
    open_tx.set_meta("deploy_time", &ctx.timestamp());
    let deploy_tx = open_tx.commit()?;

    deploy_tx.activate(ctx)?;

    let app = Application::load(ctx, &app_name)?;
    println!("Starting {} ...", app.name);
    match Supervisor::new(ctx).start(&app, acknowledged).await {
        Ok(()) => {
            println!("OK");
            println!("Removing transaction {}", deploy_tx.id());
            deploy_tx.delete()?;
            Ok(0)
        }
        Err(e) if e.kind() == ErrorKind::Execution => {
            println!("Failed to start: {e}");
            println!("Preserving transaction {}", deploy_tx.id());
            Ok(1)
        }
        Err(e) => Err(e),
    }
}

/// Remove transactions by id or by application name. A raw id is removed
/// without loading so damaged transactions can still be cleaned up.
pub fn rm_transactions(ctx: &HostContext, specifiers: &[String]) -> Result<()> {
    for specifier in specifiers {
        if store::transaction_ids(ctx)?.iter().any(|id| id == specifier) {
            println!("Removing transaction {specifier}");
            std::fs::remove_dir_all(ctx.tx_basedir(specifier))
                .map_err(|e| Error::Transaction(e.to_string()))?;
            continue;
        }

        let matches = store::transactions_by_name(ctx, specifier)?;
        if matches.is_empty() {
            return Err(Error::Execution(format!(
                "No transaction matching appname or id {specifier} (no regex allowed)"
            )));
        }
        for tx in matches {
            println!(
                "Removing transaction {} (app {})",
                tx.id(),
                tx.meta().get("app_name").cloned().unwrap_or_default()
            );
            tx.delete()?;
        }
    }
    Ok(())
}

/// Compare a transaction against its deployed application, or two
/// transactions against each other. Returns the report lines.
pub fn diff(ctx: &HostContext, txid_1: &str, txid_2: Option<&str>) -> Result<Vec<String>> {
    if let Some(txid_2) = txid_2 {
        let tx1 = Transaction::load(ctx, txid_1)?;
        let tx2 = Transaction::load(ctx, txid_2)?;
        return diff_paths(tx1.basedir(), tx2.basedir(), tx1.id(), tx2.id());
    }

    let tx = Transaction::load(ctx, txid_1)?;
    let app_name = tx
        .meta()
        .get("app_name")
        .cloned()
        .expect("validated at load time");
    if !app::all_app_names(ctx)?.iter().any(|n| n == &app_name) {
        return Err(Error::Execution(format!(
            "Cannot diff {}. App {} not deployed.",
            tx.id(),
            app_name
        )));
    }
    let app = Application::load(ctx, &app_name)?;

    let mut report = diff_paths(
        &tx.basedir().join("instance"),
        &app.basedir,
        tx.id(),
        &app.name,
    )?;

    // tx-side artifacts against their <app>.<name> counterparts
    let mut tx_artifacts = Vec::new();
    for entry in std::fs::read_dir(tx.basedir())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "instance" {
            continue;
        }
        report.extend(diff_paths(
            &entry.path(),
            &app.sibling(&name),
            tx.id(),
            &app.name,
        )?);
        tx_artifacts.push(name);
    }

    // app-side artifacts the transaction does not carry at all
    for (artifact, path) in app_siblings(ctx, &app_name)? {
        if !tx_artifacts.contains(&artifact) {
            report.extend(diff_paths(
                &path,
                &tx.basedir().join(&artifact),
                &app.name,
                tx.id(),
            )?);
        }
    }

    Ok(report)
}

/// Resolve to exactly one closed transaction: direct id match first, then a
/// unique app-name match.
fn resolve_transaction(ctx: &HostContext, appname_or_txid: &str) -> Result<Transaction<Closed>> {
    if store::transaction_ids(ctx)?
        .iter()
        .any(|id| id == appname_or_txid)
    {
        return Transaction::load(ctx, appname_or_txid);
    }

    let mut matches = store::transactions_by_name(ctx, appname_or_txid)?;
    match matches.len() {
        0 => Err(Error::Execution(format!(
            "No transaction matching appname or id {appname_or_txid}"
        ))),
        1 => Ok(matches.remove(0)),
        _ => Err(Error::Execution(format!(
            "Multiple transactions matching {}: {}",
            appname_or_txid,
            matches
                .iter()
                .map(|tx| tx.id().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// The `<name>.<artifact>` siblings of an application, as (artifact, path).
fn app_siblings(ctx: &HostContext, app_name: &str) -> Result<Vec<(String, std::path::PathBuf)>> {
    let prefix = format!("{app_name}.");
    let mut siblings = Vec::new();
    for entry in std::fs::read_dir(ctx.apps_dir())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(artifact) = name.strip_prefix(&prefix) {
            siblings.push((artifact.to_string(), entry.path()));
        }
    }
    siblings.sort();
    Ok(siblings)
}
