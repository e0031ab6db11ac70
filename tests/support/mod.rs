// ABOUTME: Test support utilities.
// ABOUTME: Sandboxed host contexts, app fixtures and transaction builders.

use berth::app::sibling_path;
use berth::context::HostContext;
use berth::tx::{Closed, Transaction};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated basedir + staging area, torn down with the TempDir.
pub struct Sandbox {
    pub root: TempDir,
    pub ctx: HostContext,
}

#[allow(dead_code)]
impl Sandbox {
    pub fn new() -> Self {
        Self::with_yaml_extra("")
    }

    /// Extra lines appended to the generated berth.yml (e.g. `force_user`).
    pub fn with_yaml_extra(extra: &str) -> Self {
        let root = tempfile::tempdir().expect("sandbox tempdir");
        let basedir = root.path().join("base");
        let temp_dir = root.path().join("staging");
        std::fs::create_dir_all(&basedir).unwrap();
        std::fs::create_dir_all(&temp_dir).unwrap();

        let yaml = format!(
            "basedir: {}\nstage: test\ntemp_dir: {}\n{}",
            basedir.display(),
            temp_dir.display(),
            extra
        );
        let ctx = HostContext::from_yaml(&yaml).expect("sandbox context");
        Sandbox { root, ctx }
    }

    pub fn staging_area(&self) -> &Path {
        &self.ctx.temp_dir
    }

    /// Entries currently in the staging area.
    pub fn staging_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.staging_area())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    /// Materialize a deployed application directly (as activation would).
    pub fn install_app(&self, name: &str, conf: &str, meta: &str, files: &[(&str, &str)]) {
        let basedir = self.ctx.app_basedir(name);
        std::fs::create_dir_all(&basedir).unwrap();
        for (rel, content) in files {
            write_file(&basedir.join(rel), content);
        }
        std::fs::create_dir_all(self.ctx.apps_dir()).unwrap();
        std::fs::write(sibling_path(&basedir, "conf"), conf).unwrap();
        std::fs::write(sibling_path(&basedir, "meta"), meta).unwrap();
    }

    /// Build and commit a transaction carrying `conf` plus instance files.
    /// Shell files (`.sh`) are made executable.
    pub fn seed_transaction(
        &self,
        app_name: &str,
        version: &str,
        conf: &str,
        instance_files: &[(&str, &str)],
    ) -> Transaction<Closed> {
        let content = self.root.path().join(format!("content-{app_name}-{version}"));
        write_file(&content.join("conf"), conf);
        for (rel, body) in instance_files {
            write_file(&content.join("instance").join(rel), body);
        }

        let mut tx = Transaction::begin(&self.ctx).expect("begin transaction");
        tx.add_directory_content(&content, ".").expect("stage content");
        tx.set_meta("app_name", app_name);
        tx.set_meta("app_version", version);
        tx.set_meta("stage", "test");
        tx.set_meta("tx_type", "new");
        tx.commit().expect("commit transaction")
    }
}

/// Write a file, creating parent directories; `.sh` files become executable.
#[allow(dead_code)]
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    if path.extension().is_some_and(|ext| ext == "sh") {
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}
