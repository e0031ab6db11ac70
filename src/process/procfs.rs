// ABOUTME: /proc-based process table access.
// ABOUTME: Enumeration, command lines, ancestry and liveness probing.

use nix::errno::Errno;
use nix::sys::signal::kill;
use std::collections::HashMap;
use std::path::Path;

pub type Pid = i32;

/// All live process ids, unsorted.
pub fn live_pids() -> Vec<Pid> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
        .collect()
}

/// The process command line as a single space-joined string.
///
/// Returns `None` for processes without a command line (kernel threads) and
/// for entries that vanish mid-read.
pub fn cmdline(pid: Pid) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    if raw.is_empty() {
        return None;
    }
    let joined = raw
        .split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Parent pid from `/proc/<pid>/stat`.
///
/// The comm field (2) may contain spaces and parentheses, so fields are
/// counted after the last `)`; ppid is field 4, the second token after comm.
pub fn parent_of(pid: Pid) -> Option<Pid> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = contents.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

/// Transitive children of `root`, not including `root` itself.
pub fn descendants_of(root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for pid in live_pids() {
        if let Some(ppid) = parent_of(pid) {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut result = Vec::new();
    let mut queue = vec![root];
    while let Some(pid) = queue.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                result.push(kid);
                queue.push(kid);
            }
        }
    }
    result
}

/// Liveness probe via signal 0. EPERM means the process exists but belongs
/// to another user, which still counts as alive.
pub fn exists(pid: Pid) -> bool {
    match kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a pid currently has a /proc entry. Unlike [`exists`] this sees
/// zombies as gone once their stat state is `Z`.
pub fn running_state(pid: Pid) -> bool {
    let stat_path = format!("/proc/{pid}/stat");
    if !Path::new(&stat_path).exists() {
        return false;
    }
    match std::fs::read_to_string(&stat_path) {
        Ok(contents) => {
            let state = contents
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next());
            !matches!(state, Some("Z") | Some("X"))
        }
        Err(_) => false,
    }
}
