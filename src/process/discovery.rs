// ABOUTME: Process-set discovery for applications.
// ABOUTME: Pidfile and command-line-pattern strategies, selected by descriptor.

use super::procfs::{self, Pid};
use crate::config::AppDescriptor;
use crate::error::{Error, Result};
use std::path::Path;

/// Resolve the sorted, duplicate-free set of process ids belonging to an
/// application right now.
///
/// With a configured daemon pidfile the file names the master process; a
/// pidfile pointing at a dead process is stale and silently removed. Without
/// a pidfile the descriptor's `process.regex` is matched against every live
/// process's space-joined command line. `recursive` additionally includes
/// all descendants of the discovered processes.
pub fn process_set(
    descriptor: &AppDescriptor,
    basedir: &Path,
    recursive: bool,
) -> Result<Vec<Pid>> {
    let mut pids = if let Some(pidfile) = descriptor.pidfile_path(basedir) {
        from_pidfile(&pidfile, recursive)?
    } else {
        from_pattern(descriptor, recursive)?
    };

    pids.sort_unstable();
    pids.dedup();
    Ok(pids)
}

/// Whether the application has at least one live process.
pub fn is_running(descriptor: &AppDescriptor, basedir: &Path) -> Result<bool> {
    Ok(!process_set(descriptor, basedir, true)?.is_empty())
}

fn from_pidfile(pidfile: &Path, recursive: bool) -> Result<Vec<Pid>> {
    if !pidfile.is_file() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(pidfile).map_err(|e| {
        Error::Execution(format!("Could not open pidfile {}: {}", pidfile.display(), e))
    })?;
    let daemon_pid: Pid = content.trim().parse().map_err(|e| {
        Error::Execution(format!(
            "Could not interpret pidfile {}: {}",
            pidfile.display(),
            e
        ))
    })?;

    if !procfs::exists(daemon_pid) {
        tracing::warn!(
            "Removing stale pidfile {}: no process with pid {}",
            pidfile.display(),
            daemon_pid
        );
        std::fs::remove_file(pidfile)?;
        return Ok(Vec::new());
    }

    let mut pids = vec![daemon_pid];
    if recursive {
        pids.extend(procfs::descendants_of(daemon_pid));
    }
    Ok(pids)
}

fn from_pattern(descriptor: &AppDescriptor, recursive: bool) -> Result<Vec<Pid>> {
    let pattern = descriptor
        .process_regex
        .as_ref()
        .ok_or_else(|| Error::Config("process.regex not defined in application conf".to_string()))?;

    let masters: Vec<Pid> = procfs::live_pids()
        .into_iter()
        .filter(|&pid| {
            procfs::cmdline(pid)
                .map(|cmd| pattern.is_match(&cmd))
                .unwrap_or(false)
        })
        .collect();
    tracing::debug!(?masters, "pattern discovery");

    let mut pids = masters.clone();
    if recursive {
        for master in masters {
            pids.extend(procfs::descendants_of(master));
        }
    }
    Ok(pids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn descriptor(entries: &[(&str, &str)]) -> AppDescriptor {
        let conf: BTreeMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppDescriptor::from_kv(&conf).unwrap()
    }

    #[test]
    fn missing_pidfile_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(&[("launcher.daemon.pidfile", "run/app.pid")]);
        assert_eq!(process_set(&d, dir.path(), true).unwrap(), Vec::<Pid>::new());
        assert!(!is_running(&d, dir.path()).unwrap());
    }

    #[test]
    fn stale_pidfile_is_removed_and_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("app.pid");
        std::fs::write(&pidfile, "999999999\n").unwrap();

        let d = descriptor(&[("launcher.daemon.pidfile", "app.pid")]);
        assert_eq!(process_set(&d, dir.path(), true).unwrap(), Vec::<Pid>::new());
        assert!(!pidfile.exists());
    }

    #[test]
    fn unparsable_pidfile_fails_and_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("app.pid");
        std::fs::write(&pidfile, "not-a-pid\n").unwrap();

        let d = descriptor(&[("launcher.daemon.pidfile", "app.pid")]);
        let err = process_set(&d, dir.path(), true).unwrap_err();
        assert!(err.to_string().contains("Could not interpret pidfile"));
        assert!(pidfile.exists());
    }

    #[test]
    fn live_pidfile_reports_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let me = std::process::id();
        std::fs::write(dir.path().join("app.pid"), format!("{me}\n")).unwrap();

        let d = descriptor(&[("launcher.daemon.pidfile", "app.pid")]);
        let pids = process_set(&d, dir.path(), false).unwrap();
        assert_eq!(pids, vec![me as Pid]);
    }

    #[test]
    fn pattern_strategy_requires_a_regex() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(&[]);
        let err = process_set(&d, dir.path(), true).unwrap_err();
        assert!(
            err.to_string()
                .contains("process.regex not defined in application conf")
        );
    }

    #[test]
    fn pattern_strategy_finds_own_process() {
        let dir = tempfile::tempdir().unwrap();
        let me = std::process::id() as Pid;
        let own_cmdline = crate::process::procfs::cmdline(me).unwrap();
        // match on a token of our own command line, unanchored
        let token = own_cmdline.split(' ').next().unwrap();
        let d = descriptor(&[("process.regex", &regex::escape(token))]);
        let pids = process_set(&d, dir.path(), false).unwrap();
        assert!(pids.contains(&me));
    }

    #[test]
    fn result_is_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(&[("process.regex", ".")]);
        let pids = process_set(&d, dir.path(), true).unwrap();
        let mut sorted = pids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(pids, sorted);
    }
}
