// ABOUTME: Deployed application model and name enumeration.
// ABOUTME: An Application is a basedir plus its .conf descriptor and .meta record.

pub mod ops;

use crate::config::{AppDescriptor, parse_kv_file};
use crate::context::HostContext;
use crate::error::{Error, Result};
use crate::knowhow::SpecialInstructions;
use crate::process::{Pid, discovery};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A deployed application: live directory under the apps area plus its
/// namespaced sibling files.
pub struct Application {
    pub name: String,
    pub basedir: PathBuf,
    pub descriptor: AppDescriptor,
    /// Deployment metadata from `<name>.meta`; empty when the record is
    /// missing or unparsable.
    pub meta: BTreeMap<String, String>,
}

impl Application {
    pub fn load(ctx: &HostContext, name: &str) -> Result<Self> {
        let basedir = ctx.app_basedir(name);
        let descriptor = AppDescriptor::load(&sibling_path(&basedir, "conf"))?;

        let meta = match parse_kv_file(&sibling_path(&basedir, "meta")) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("could not get metadata for app {name}: {e}");
                BTreeMap::new()
            }
        };

        Ok(Application {
            name: name.to_string(),
            basedir,
            descriptor,
            meta,
        })
    }

    /// Current process ids of this application, sorted and deduplicated.
    pub fn pids(&self, recursive: bool) -> Result<Vec<Pid>> {
        discovery::process_set(&self.descriptor, &self.basedir, recursive)
    }

    pub fn is_running(&self) -> Result<bool> {
        discovery::is_running(&self.descriptor, &self.basedir)
    }

    /// Path of a namespaced sibling, e.g. `conf` -> `<apps>/<name>.conf`.
    pub fn sibling(&self, artifact: &str) -> PathBuf {
        sibling_path(&self.basedir, artifact)
    }
}

impl SpecialInstructions for Application {
    fn special_instructions(&self) -> &BTreeMap<String, String> {
        self.descriptor.special_instructions()
    }
}

/// `<basedir>.<artifact>` — the suffix-namespaced file next to an
/// application directory.
pub fn sibling_path(basedir: &Path, artifact: &str) -> PathBuf {
    let mut path = basedir.as_os_str().to_owned();
    path.push(".");
    path.push(artifact);
    PathBuf::from(path)
}

/// Names of all deployed applications: directories under the apps area that
/// have a `.conf` sibling. Sorted.
pub fn all_app_names(ctx: &HostContext) -> Result<Vec<String>> {
    let apps_dir = ctx.apps_dir();
    if !apps_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(&apps_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| sibling_path(&apps_dir.join(name), "conf").is_file())
        .collect();
    names.sort();
    Ok(names)
}

fn bootstart_app_names(ctx: &HostContext) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for name in all_app_names(ctx)? {
        let descriptor = AppDescriptor::load(&sibling_path(&ctx.app_basedir(&name), "conf"))?;
        if descriptor.bootstart {
            names.push(name);
        }
    }
    Ok(names)
}

/// Application selection for batch commands.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    /// Anchored regex over application names.
    pub regex: Option<String>,
    pub all: bool,
    pub bootstart: bool,
}

/// Resolve a selector to application names. A regex that matches nothing is
/// an error; so is selecting without regex, `--all` or `--bootstart`.
pub fn select_app_names(ctx: &HostContext, selector: &Selector) -> Result<Vec<String>> {
    if selector.all {
        return all_app_names(ctx);
    }
    if selector.bootstart {
        return bootstart_app_names(ctx);
    }
    let Some(regex) = &selector.regex else {
        return Err(Error::Execution("An app must be specified".to_string()));
    };
    let pattern = regex::Regex::new(&format!("^{regex}$"))
        .map_err(|e| Error::Execution(format!("Invalid regular expression: {e}")))?;
    let names: Vec<String> = all_app_names(ctx)?
        .into_iter()
        .filter(|name| pattern.is_match(name))
        .collect();
    if names.is_empty() {
        return Err(Error::Execution(format!("No app found matching {regex}")));
    }
    Ok(names)
}
