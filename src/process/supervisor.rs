// ABOUTME: Process supervisor: starts and stops applications.
// ABOUTME: Resource limits, async launch with log capture, signal escalation.

use super::procfs::{self, Pid};
use crate::app::Application;
use crate::context::HostContext;
use crate::error::{Error, Result};
use crate::knowhow::{self, SpecialInstructions};
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use nix::sys::signal::{Signal, kill};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Interval between pidfile existence polls during start.
const PIDFILE_POLL: Duration = Duration::from_millis(300);
/// How long a daemonizing launcher is given to fail fast before the pidfile
/// poll begins.
const EARLY_EXIT_WINDOW: Duration = Duration::from_secs(5);
/// Interval between liveness probes while waiting for processes to exit.
const EXIT_POLL: Duration = Duration::from_millis(200);

pub struct Supervisor<'a> {
    ctx: &'a HostContext,
}

impl<'a> Supervisor<'a> {
    pub fn new(ctx: &'a HostContext) -> Self {
        Supervisor { ctx }
    }

    /// Start an application and wait, bounded by its start timeout, until it
    /// is considered up.
    ///
    /// Foreground applications (no pidfile) count as started when the
    /// launched process is still alive at the timeout; daemonizing
    /// applications when the configured pidfile has appeared.
    pub async fn start(&self, app: &Application, acknowledged: bool) -> Result<()> {
        if app.is_running()? {
            return Err(Error::Execution(format!(
                "App {} already running",
                app.name
            )));
        }

        if let Some(force_user) = &self.ctx.force_user {
            if self.ctx.login_user() != *force_user {
                return Err(Error::Execution(format!(
                    "Only user {force_user} is allowed to start an application."
                )));
            }
        }

        knowhow::acknowledge(app.special_instructions(), "knowhow.app.start", acknowledged)?;

        if let Some(maxfiles) = app.descriptor.maxfiles {
            raise_soft_limit(Resource::RLIMIT_NOFILE, maxfiles)?;
        }
        if let Some(maxprocs) = app.descriptor.maxprocs {
            raise_soft_limit(Resource::RLIMIT_NPROC, maxprocs)?;
        }

        let log_dir = app.basedir.join("log");
        std::fs::create_dir_all(&log_dir).map_err(|e| {
            Error::Execution(format!("Cannot create application log directory: {e}"))
        })?;

        self.launch(app).await
    }

    async fn launch(&self, app: &Application) -> Result<()> {
        let launcher = app
            .descriptor
            .launcher
            .as_ref()
            .ok_or_else(|| Error::Config("launcher.file not defined in application conf".to_string()))?;

        ensure_executable(&app.basedir.join(&launcher.file))?;
        let command = launcher.command(&app.basedir);
        tracing::debug!(?command, "launching");

        let startup_log = app.basedir.join("log/startup.log");
        let mut log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&startup_log)
            .await?;
        log_file
            .write_all(
                format!(
                    "----- {} ----- application start -----\n",
                    self.ctx.timestamp()
                )
                .as_bytes(),
            )
            .await?;
        let log_file = log_file.into_std().await;

        let mut child = tokio::process::Command::new(command.first())
            .args(command.tail())
            .current_dir(&app.basedir)
            .envs(app.descriptor.env.iter().cloned())
            .stdout(std::process::Stdio::from(log_file.try_clone()?))
            .stderr(std::process::Stdio::from(log_file))
            .spawn()
            .map_err(|e| Error::Execution(format!("Cannot launch {}: {e}", command.first())))?;

        match app.descriptor.pidfile_path(&app.basedir) {
            None => {
                // foreground application: still running at the timeout is the
                // expected outcome
                match tokio::time::timeout(app.descriptor.start_timeout, child.wait()).await {
                    Err(_) => {
                        detach(child);
                        Ok(())
                    }
                    Ok(Ok(status)) if status.success() => {
                        tracing::warn!(
                            "application exited with rc=0. This is not the expected behaviour. \
                             If your application daemonizes then please change its conf to use \
                             launcher.daemon.pidfile instead of process.regex"
                        );
                        Ok(())
                    }
                    Ok(Ok(status)) => Err(Error::Execution(format!(
                        "application exited with rc={}. See {} for details",
                        status.code().unwrap_or(-1),
                        startup_log.display()
                    ))),
                    Ok(Err(e)) => Err(Error::Execution(format!("wait on application failed: {e}"))),
                }
            }
            Some(pidfile) => {
                match tokio::time::timeout(EARLY_EXIT_WINDOW, child.wait()).await {
                    Ok(Ok(status)) if !status.success() => {
                        return Err(Error::Execution(format!(
                            "daemon exited with rc={}. See {} for details",
                            status.code().unwrap_or(-1),
                            startup_log.display()
                        )));
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        return Err(Error::Execution(format!("wait on daemon failed: {e}")));
                    }
                    Err(_) => detach(child),
                }

                self.await_pidfile(app, &pidfile).await
            }
        }
    }

    async fn await_pidfile(&self, app: &Application, pidfile: &Path) -> Result<()> {
        let deadline = tokio::time::Instant::now() + app.descriptor.start_timeout;
        while tokio::time::Instant::now() < deadline {
            if pidfile.is_file() {
                // confirm discovery works; a stale or broken pidfile
                // surfaces here
                app.is_running()?;
                return Ok(());
            }
            tokio::time::sleep(PIDFILE_POLL).await;
        }
        Err(Error::Execution(format!(
            "daemon did not create a pidfile {} in time",
            pidfile.display()
        )))
    }

    /// Stop all processes of an application: graceful signal, bounded wait,
    /// forced kill for survivors, second bounded wait.
    pub async fn stop(&self, app: &Application, acknowledged: bool) -> Result<()> {
        if !app.is_running()? {
            return Err(Error::Execution(format!("{} not running", app.name)));
        }

        knowhow::acknowledge(app.special_instructions(), "knowhow.app.stop", acknowledged)?;

        let timeout = app.descriptor.stop_timeout;
        let pids = app.pids(true)?;

        for &pid in &pids {
            tracing::debug!(pid, "terminating");
            let _ = kill(nix::unistd::Pid::from_raw(pid), Signal::SIGTERM);
        }

        let mut still_alive = wait_for_exit(&pids, timeout).await;
        tracing::debug!(?still_alive, "after SIGTERM");

        if !still_alive.is_empty() {
            for &pid in &still_alive {
                tracing::warn!(pid, "forcefully killing");
                let _ = kill(nix::unistd::Pid::from_raw(pid), Signal::SIGKILL);
            }
            still_alive = wait_for_exit(&still_alive, timeout).await;
            tracing::debug!(?still_alive, "after SIGKILL");
        }

        if !still_alive.is_empty() {
            let pid_list = still_alive
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            return Err(Error::Execution(format!(
                "Could not end {} (PID(s) {})",
                app.name, pid_list
            )));
        }

        if let Some(pidfile) = app.descriptor.pidfile_path(&app.basedir) {
            if pidfile.exists() {
                std::fs::remove_file(&pidfile)?;
            }
        }
        Ok(())
    }
}

/// Keep reaping the child in the background so it never lingers as a zombie.
fn detach(mut child: tokio::process::Child) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::debug!(?status, "application finished"),
            Err(e) => tracing::debug!("wait on detached application failed: {e}"),
        }
    });
}

fn raise_soft_limit(resource: Resource, wanted: u64) -> Result<()> {
    let (soft, hard) = getrlimit(resource)
        .map_err(|e| Error::Execution(format!("cannot read resource limit: {e}")))?;
    if soft != wanted {
        tracing::debug!(?resource, soft, wanted, "raising soft limit");
        setrlimit(resource, wanted, hard)
            .map_err(|e| Error::Execution(format!("cannot set resource limit: {e}")))?;
    }
    Ok(())
}

/// Make sure the owner can read and execute the launcher, widening the mode
/// if needed.
fn ensure_executable(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| Error::Execution(format!("cannot stat launcher {}: {e}", path.display())))?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode() & 0o777;
    let new_mode = mode | 0o500;
    if mode != new_mode {
        tracing::debug!("chmod {}: {:o} > {:o}", path.display(), mode, new_mode);
        permissions.set_mode(new_mode);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Poll until every pid has exited or the timeout elapses; returns the
/// survivors.
async fn wait_for_exit(pids: &[Pid], timeout: Duration) -> Vec<Pid> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut alive: Vec<Pid> = pids
        .iter()
        .copied()
        .filter(|&pid| procfs::running_state(pid))
        .collect();

    while !alive.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(EXIT_POLL).await;
        alive.retain(|&pid| procfs::running_state(pid));
    }
    alive
}
