// ABOUTME: Transaction state machine for deployable application bundles.
// ABOUTME: Typestate markers make illegal lifecycle transitions compile errors.

pub mod diff;
pub mod store;

pub use diff::{diff_paths, is_binary, unified_diff};

use crate::config::{parse_kv_file, write_kv_file};
use crate::context::HostContext;
use crate::error::{Error, Result};
use crate::knowhow::SpecialInstructions;
use rand::Rng;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Schema tag written into every new transaction's meta record.
pub const TX_VERSION: &str = "2";

const ID_LEN: usize = 8;
const ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const LOAD_META_KEYS: [&str; 4] = ["app_name", "stage", "app_version", "tx_type"];
const COMMIT_META_KEYS: [&str; 5] = [
    "app_name",
    "stage",
    "app_version",
    "create_user",
    "create_time",
];

/// Freshly created: content lives in a private staging directory and both
/// files and meta are mutable. The staging directory is purged on every exit
/// path by the `TempDir` guard.
#[derive(Debug)]
pub struct Indoubt {
    staging: TempDir,
}

/// Re-acquired from a closed transaction: only meta is mutable. Dropping
/// without committing loses the pending meta edits (and says so).
#[derive(Debug)]
pub struct Open {
    id: String,
    committed: Cell<bool>,
    conf: BTreeMap<String, String>,
    instructions: BTreeMap<String, String>,
}

impl Drop for Open {
    fn drop(&mut self) {
        if !self.committed.get() {
            tracing::warn!("Discarding changes in open transaction {}.", self.id);
        }
    }
}

/// Persisted under the transactions area; content and structure immutable.
#[derive(Debug)]
pub struct Closed {
    conf: BTreeMap<String, String>,
    instructions: BTreeMap<String, String>,
}

/// A deployable (or backed-out) application instance, parameterized by its
/// lifecycle state.
///
/// Illegal lifecycle transitions do not compile. A committed transaction
/// cannot be committed again:
///
/// ```compile_fail
/// use berth::context::HostContext;
/// use berth::tx::Transaction;
///
/// let ctx = HostContext::from_yaml("basedir: /tmp/b\nstage: test\n").unwrap();
/// let tx = Transaction::begin(&ctx).unwrap();
/// let closed = tx.commit().unwrap();
/// closed.commit();
/// ```
///
/// content cannot be added after commit:
///
/// ```compile_fail
/// use berth::context::HostContext;
/// use berth::tx::Transaction;
/// use std::path::Path;
///
/// let ctx = HostContext::from_yaml("basedir: /tmp/b\nstage: test\n").unwrap();
/// let closed = Transaction::begin(&ctx).unwrap().commit().unwrap();
/// closed.add_directory_content(Path::new("/tmp/src"), ".");
/// ```
///
/// and an indoubt transaction cannot be deleted:
///
/// ```compile_fail
/// use berth::context::HostContext;
/// use berth::tx::Transaction;
///
/// let ctx = HostContext::from_yaml("basedir: /tmp/b\nstage: test\n").unwrap();
/// let tx = Transaction::begin(&ctx).unwrap();
/// tx.delete();
/// ```
#[derive(Debug)]
pub struct Transaction<S> {
    id: String,
    basedir: PathBuf,
    meta: BTreeMap<String, String>,
    state: S,
}

impl<S> Transaction<S> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }
}

impl Transaction<Indoubt> {
    /// Allocate a fresh transaction: unique id, private staging directory,
    /// creation metadata.
    pub fn begin(ctx: &HostContext) -> Result<Self> {
        let existing = store::transaction_ids(ctx)?;
        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate: String = (0..ID_LEN)
                .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
                .collect();
            if !existing.contains(&candidate) {
                break candidate;
            }
        };

        std::fs::create_dir_all(&ctx.temp_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{id}."))
            .tempdir_in(&ctx.temp_dir)?;

        let mut meta = BTreeMap::new();
        meta.insert("create_user".to_string(), ctx.login_user());
        meta.insert("create_time".to_string(), ctx.timestamp());
        meta.insert("tx_version".to_string(), TX_VERSION.to_string());

        Ok(Transaction {
            basedir: ctx.tx_basedir(&id),
            id,
            meta,
            state: Indoubt { staging },
        })
    }

    pub fn set_meta(&mut self, key: &str, value: &str) {
        self.meta.insert(key.to_string(), value.to_string());
    }

    /// Path files are staged under until commit.
    pub fn staging_dir(&self) -> &Path {
        self.state.staging.path()
    }

    /// Recursively mirror `src` into the staging area under `parent`.
    ///
    /// Existing files are overwritten; each overlay is reported together
    /// with a unified diff against the previous content (or a note that the
    /// files are identical). This is what layered overlays build on.
    pub fn add_directory_content(&self, src: &Path, parent: &str) -> Result<()> {
        let dest_root = self.state.staging.path().join(parent);
        std::fs::create_dir_all(&dest_root)
            .map_err(|e| Error::Transaction(e.to_string()))?;

        for entry in WalkDir::new(src).min_depth(1) {
            let entry = entry.map_err(|e| Error::Transaction(e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .expect("walked path is under its root");
            let dest = dest_root.join(rel);

            if entry.file_type().is_dir() {
                if !dest.exists() {
                    tracing::debug!("mkdir {}", dest.display());
                    std::fs::create_dir(&dest).map_err(|e| Error::Transaction(e.to_string()))?;
                }
                continue;
            }

            if dest.exists() {
                tracing::info!("Overlaying existing {}", rel.display());
                let previous = std::fs::read(&dest).map_err(|e| Error::Transaction(e.to_string()))?;
                let incoming =
                    std::fs::read(entry.path()).map_err(|e| Error::Transaction(e.to_string()))?;
                if previous == incoming {
                    tracing::info!("(files are identical)");
                } else {
                    tracing::info!(
                        "{}",
                        unified_diff(
                            &String::from_utf8_lossy(&previous),
                            &String::from_utf8_lossy(&incoming),
                            "existing",
                            "incoming",
                        )
                    );
                }
            }
            tracing::debug!("copy {} {}", entry.path().display(), dest.display());
            std::fs::copy(entry.path(), &dest).map_err(|e| Error::Transaction(e.to_string()))?;
        }
        Ok(())
    }

    /// Move an existing file or directory into the staging area under
    /// `name`. Used by deactivation, which preserves the live application by
    /// moving rather than copying.
    pub fn import_entry(&self, src: &Path, name: &str) -> Result<()> {
        let dest = self.state.staging.path().join(name);
        tracing::debug!("mv {} {}", src.display(), dest.display());
        move_entry(src, &dest).map_err(|e| Error::Transaction(e.to_string()))
    }

    /// Promote the staged content to the transactions area and persist the
    /// meta record. All-or-nothing: any failure purges both the staging
    /// directory and the partially created destination.
    pub fn commit(self) -> Result<Transaction<Closed>> {
        require_meta(&self.meta, &COMMIT_META_KEYS)?;

        let Transaction {
            id,
            basedir,
            meta,
            state: Indoubt { staging },
        } = self;

        let promote = || -> Result<()> {
            tracing::debug!(
                "persisting indoubt transaction from {} to {}",
                staging.path().display(),
                basedir.display()
            );
            if let Some(parent) = basedir.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::create_dir(&basedir)?;
            for entry in std::fs::read_dir(staging.path())? {
                let entry = entry?;
                move_entry(&entry.path(), &basedir.join(entry.file_name()))?;
            }
            // every entry has been moved out; drop the empty staging dir
            std::fs::remove_dir(staging.path())?;
            write_kv_file(&basedir.join("meta"), &meta)?;
            assert_valid(&basedir)?;
            Ok(())
        };

        match promote() {
            Ok(()) => {
                drop(staging);
                let conf = parse_kv_file(&basedir.join("conf"))
                    .map_err(|e| Error::Transaction(format!("Error while persisting transaction: {e}")))?;
                Ok(Transaction {
                    id,
                    basedir,
                    meta,
                    state: Closed::from_conf(conf),
                })
            }
            Err(e) => {
                tracing::debug!("purging indoubt transaction while commit");
                if basedir.exists() {
                    let _ = std::fs::remove_dir_all(&basedir);
                }
                drop(staging);
                Err(Error::Transaction(format!(
                    "Error while persisting transaction: {e}"
                )))
            }
        }
    }
}

impl Closed {
    fn from_conf(conf: BTreeMap<String, String>) -> Self {
        let instructions = conf
            .iter()
            .filter(|(key, _)| key.starts_with("knowhow.tx"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Closed { conf, instructions }
    }
}

impl Transaction<Closed> {
    /// Load a persisted transaction, validating the on-disk invariant and
    /// the required meta keys.
    pub fn load(ctx: &HostContext, id: &str) -> Result<Self> {
        if !store::transaction_ids(ctx)?.iter().any(|t| t == id) {
            return Err(Error::Execution(format!("No transaction with id {id}")));
        }
        let basedir = ctx.tx_basedir(id);
        assert_valid(&basedir)?;

        let meta = parse_kv_file(&basedir.join("meta"))
            .map_err(|e| Error::Transaction(format!("Cannot load incomplete transaction {id}: {e}")))?;
        for key in LOAD_META_KEYS {
            if !meta.contains_key(key) {
                return Err(Error::Transaction(format!(
                    "Cannot load incomplete transaction {id}: Metadata \"{key}\" missing"
                )));
            }
        }
        let conf = parse_kv_file(&basedir.join("conf"))
            .map_err(|e| Error::Transaction(format!("Cannot load incomplete transaction {id}: {e}")))?;

        Ok(Transaction {
            id: id.to_string(),
            basedir,
            meta,
            state: Closed::from_conf(conf),
        })
    }

    /// Re-acquire for meta edits. Content stays immutable.
    pub fn open(self) -> Transaction<Open> {
        Transaction {
            state: Open {
                id: self.id.clone(),
                committed: Cell::new(false),
                conf: self.state.conf.clone(),
                instructions: self.state.instructions.clone(),
            },
            id: self.id,
            basedir: self.basedir,
            meta: self.meta,
        }
    }

    /// Materialize this transaction as the live application: `instance/`
    /// becomes the application directory, every other top-level entry a
    /// `<app>.<entry>` sibling.
    pub fn activate(&self, ctx: &HostContext) -> Result<()> {
        let app_name = self
            .meta
            .get("app_name")
            .expect("validated at load/commit time");
        let target = ctx.app_basedir(app_name);
        tracing::debug!("activation target {}", target.display());
        if target.exists() {
            return Err(Error::Transaction(format!(
                "Cannot activate transaction, {} exists",
                target.display()
            )));
        }

        std::fs::create_dir_all(ctx.apps_dir()).map_err(|e| Error::Transaction(e.to_string()))?;
        copy_tree(&self.basedir.join("instance"), &target)
            .map_err(|e| Error::Transaction(e.to_string()))?;

        for entry in std::fs::read_dir(&self.basedir).map_err(|e| Error::Transaction(e.to_string()))? {
            let entry = entry.map_err(|e| Error::Transaction(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "instance" {
                continue;
            }
            let sibling = ctx
                .apps_dir()
                .join(format!("{app_name}.{name}"));
            if entry.path().is_dir() {
                copy_tree(&entry.path(), &sibling)
            } else {
                std::fs::copy(entry.path(), &sibling).map(|_| ())
            }
            .map_err(|e| Error::Transaction(e.to_string()))?;
        }
        Ok(())
    }

    /// Remove the persisted transaction tree.
    pub fn delete(self) -> Result<()> {
        std::fs::remove_dir_all(&self.basedir).map_err(|e| Error::Transaction(e.to_string()))
    }
}

impl SpecialInstructions for Transaction<Closed> {
    fn special_instructions(&self) -> &BTreeMap<String, String> {
        &self.state.instructions
    }
}

impl Transaction<Open> {
    pub fn set_meta(&mut self, key: &str, value: &str) {
        self.meta.insert(key.to_string(), value.to_string());
    }

    /// Persist the pending meta edits. Only the meta file is rewritten.
    pub fn commit(self) -> Result<Transaction<Closed>> {
        require_meta(&self.meta, &COMMIT_META_KEYS)?;

        write_kv_file(&self.basedir.join("meta"), &self.meta)
            .map_err(|e| Error::Transaction(format!("Error while persisting transaction: {e}")))?;
        assert_valid(&self.basedir)?;

        self.state.committed.set(true);
        Ok(Transaction {
            state: Closed {
                conf: self.state.conf.clone(),
                instructions: self.state.instructions.clone(),
            },
            id: self.id.clone(),
            basedir: self.basedir.clone(),
            meta: self.meta.clone(),
        })
    }
}

fn require_meta(meta: &BTreeMap<String, String>, keys: &[&str]) -> Result<()> {
    for key in keys {
        if !meta.contains_key(*key) {
            return Err(Error::Transaction(format!(
                "Cannot commit transaction. Metadata incomplete (\"{key}\" missing)"
            )));
        }
    }
    Ok(())
}

/// The on-disk invariant of a persisted transaction.
fn assert_valid(basedir: &Path) -> Result<()> {
    for required in ["instance", "conf", "meta"] {
        if !basedir.join(required).exists() {
            return Err(Error::Transaction(format!("{required} missing")));
        }
    }
    Ok(())
}

/// Recursive copy preserving file permissions.
fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walked path is under its root");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Move a file or directory, falling back to copy-and-remove when the
/// rename crosses filesystems (staging usually lives on tmpfs).
fn move_entry(src: &Path, dest: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            if src.is_dir() {
                copy_tree(src, dest)?;
                std::fs::remove_dir_all(src)
            } else {
                std::fs::copy(src, dest)?;
                std::fs::remove_file(src)
            }
        }
    }
}
