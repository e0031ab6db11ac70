// ABOUTME: Integration tests for the process supervisor.
// ABOUTME: Real processes: daemon pidfiles, escalation, startup log capture.

mod support;

use berth::app::Application;
use berth::process::Supervisor;
use std::time::{Duration, Instant};
use support::Sandbox;

/// A daemon launcher: backgrounds a subshell (which itself spawns a sleep
/// child, so discovery sees descendants) and writes its pid.
const DAEMON_SCRIPT: &str = "#!/bin/sh\n( sleep 600 & wait ) &\necho $! > run.pid\n";

/// A daemon that shrugs off SIGTERM; only SIGKILL ends it.
const STUBBORN_SCRIPT: &str =
    "#!/bin/sh\n( trap '' TERM; while :; do sleep 0.2; done ) &\necho $! > run.pid\n";

const DAEMON_CONF: &str = "launcher.file=bin/daemon.sh\n\
                           launcher.daemon.pidfile=run.pid\n\
                           timeout.start=5\n\
                           timeout.stop=5\n";

const META: &str = "app_name=demo\napp_version=1.0.0\nstage=test\n\
                    create_user=tester\ncreate_time=2024-01-01 00:00:00\n";

fn install_daemon_app(sandbox: &Sandbox, name: &str, script: &str) {
    sandbox.install_app(name, DAEMON_CONF, META, &[("bin/daemon.sh", script)]);
}

#[tokio::test]
async fn daemon_start_discovers_pidfile_and_descendants() {
    let sandbox = Sandbox::new();
    install_daemon_app(&sandbox, "demo", DAEMON_SCRIPT);
    let app = Application::load(&sandbox.ctx, "demo").unwrap();
    let supervisor = Supervisor::new(&sandbox.ctx);

    supervisor.start(&app, true).await.unwrap();

    assert!(app.is_running().unwrap());
    let pidfile = app.basedir.join("run.pid");
    let master: i32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let pids = app.pids(true).unwrap();
    assert!(pids.contains(&master));
    assert!(pids.len() >= 2, "descendants included: {pids:?}");

    supervisor.stop(&app, true).await.unwrap();
    assert!(!pidfile.exists());
    assert!(!app.is_running().unwrap());
}

#[tokio::test]
async fn stop_escalates_to_sigkill_for_stubborn_daemons() {
    let sandbox = Sandbox::new();
    install_daemon_app(&sandbox, "stubborn", STUBBORN_SCRIPT);
    let app = Application::load(&sandbox.ctx, "stubborn").unwrap();
    let supervisor = Supervisor::new(&sandbox.ctx);

    supervisor.start(&app, true).await.unwrap();
    assert!(app.is_running().unwrap());

    let began = Instant::now();
    supervisor.stop(&app, true).await.unwrap();
    // the graceful phase must have run its full course first
    assert!(began.elapsed() >= Duration::from_secs(5));
    assert!(!app.is_running().unwrap());
    assert!(!app.basedir.join("run.pid").exists());
}

#[tokio::test]
async fn daemon_failing_fast_reports_the_exit_code() {
    let sandbox = Sandbox::new();
    install_daemon_app(&sandbox, "broken", "#!/bin/sh\necho no good >&2\nexit 2\n");
    let app = Application::load(&sandbox.ctx, "broken").unwrap();

    let err = Supervisor::new(&sandbox.ctx)
        .start(&app, true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("daemon exited with rc=2"));
    assert!(err.to_string().contains("startup.log"));

    let log = std::fs::read_to_string(app.basedir.join("log/startup.log")).unwrap();
    assert!(log.contains("application start"));
    assert!(log.contains("no good"));
}

#[tokio::test]
async fn daemon_without_pidfile_times_out() {
    let sandbox = Sandbox::new();
    // exits cleanly but never writes run.pid
    install_daemon_app(&sandbox, "silent", "#!/bin/sh\nexit 0\n");
    let app = Application::load(&sandbox.ctx, "silent").unwrap();

    let err = Supervisor::new(&sandbox.ctx)
        .start(&app, true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("did not create a pidfile"));
}

#[tokio::test]
async fn foreground_failure_references_the_startup_log() {
    let sandbox = Sandbox::new();
    sandbox.install_app(
        "fg",
        "launcher.file=bin/run.sh\nprocess.regex=never-matches-anything-xyzzy\ntimeout.start=5\n",
        META,
        &[("bin/run.sh", "#!/bin/sh\necho boom >&2\nexit 3\n")],
    );
    let app = Application::load(&sandbox.ctx, "fg").unwrap();

    let err = Supervisor::new(&sandbox.ctx)
        .start(&app, true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("application exited with rc=3"));
    assert!(err.to_string().contains("startup.log"));
}

#[tokio::test]
async fn foreground_app_running_at_timeout_is_a_successful_start() {
    let sandbox = Sandbox::new();
    // the unique basedir path in the command line doubles as the match token
    let basedir = sandbox.ctx.app_basedir("fgok");
    let conf = format!(
        "launcher.file=bin/run.sh\nprocess.regex={}\ntimeout.start=5\ntimeout.stop=5\n",
        regex::escape(&basedir.to_string_lossy())
    );
    sandbox.install_app(
        "fgok",
        &conf,
        META,
        &[("bin/run.sh", "#!/bin/sh\nwhile :; do sleep 0.2; done\n")],
    );
    let app = Application::load(&sandbox.ctx, "fgok").unwrap();
    let supervisor = Supervisor::new(&sandbox.ctx);

    let began = Instant::now();
    supervisor.start(&app, true).await.unwrap();
    assert!(began.elapsed() >= Duration::from_secs(5));

    supervisor.stop(&app, true).await.unwrap();
}

#[tokio::test]
async fn starting_a_running_app_fails() {
    let sandbox = Sandbox::new();
    install_daemon_app(&sandbox, "dup", DAEMON_SCRIPT);
    let app = Application::load(&sandbox.ctx, "dup").unwrap();
    let supervisor = Supervisor::new(&sandbox.ctx);

    supervisor.start(&app, true).await.unwrap();
    let err = supervisor.start(&app, true).await.unwrap_err();
    assert!(err.to_string().contains("App dup already running"));

    supervisor.stop(&app, true).await.unwrap();
}

#[tokio::test]
async fn stopping_a_stopped_app_fails() {
    let sandbox = Sandbox::new();
    install_daemon_app(&sandbox, "idle", DAEMON_SCRIPT);
    let app = Application::load(&sandbox.ctx, "idle").unwrap();

    let err = Supervisor::new(&sandbox.ctx)
        .stop(&app, true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("idle not running"));
}

#[tokio::test]
async fn force_user_restricts_start() {
    let sandbox = Sandbox::with_yaml_extra("force_user: nobody-special\n");
    install_daemon_app(&sandbox, "locked", DAEMON_SCRIPT);
    let app = Application::load(&sandbox.ctx, "locked").unwrap();

    let err = Supervisor::new(&sandbox.ctx)
        .start(&app, true)
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("Only user nobody-special is allowed to start an application.")
    );
}

#[tokio::test]
async fn missing_launcher_is_a_configuration_error() {
    let sandbox = Sandbox::new();
    sandbox.install_app(
        "nolaunch",
        "process.regex=never-matches-qwerty\n",
        META,
        &[("readme.txt", "no launcher here\n")],
    );
    let app = Application::load(&sandbox.ctx, "nolaunch").unwrap();

    let err = Supervisor::new(&sandbox.ctx)
        .start(&app, true)
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("launcher.file not defined in application conf")
    );
}
