// ABOUTME: Collaborator boundaries: artifact store, overlay repo, repo API.
// ABOUTME: The core depends only on these traits, never on concrete servers.

pub mod probe;

pub use probe::{HealthProbe, HttpProbe};

use crate::context::Provider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Remote artifact store holding versioned application bundles. Transfers
/// are recursive over directories.
#[async_trait]
pub trait ArtifactStore {
    async fn download(&self, remote_path: &str, local_dir: &Path) -> Result<()>;
    async fn upload(&self, local_dir: &Path, remote_path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Checked-out overlay-configuration repository for one stage branch.
pub trait OverlayRepo {
    /// Copy a single named inode into `target_dir`.
    fn copy(&self, inode_name: &str, target_dir: &Path) -> Result<()>;
    /// Copy the contents of a directory inode into `target_dir`.
    fn copy_contents(&self, parent_inode: &str, target_dir: &Path) -> Result<()>;
    /// Ordered overlay names to apply on top of the base artifact.
    fn overlay_names(&self) -> Result<Vec<String>>;
    /// Stage-scoped key/value dictionary for template substitution.
    fn overlay_values(&self) -> Result<BTreeMap<String, String>>;
}

/// Server-side capability of the overlay repository provider. Think of it
/// as a generic git-server connector: no deployment logic lives here.
pub trait RepoApi {
    fn branch_exists(&self, branch: &str) -> Result<bool>;
    /// Source branches with merge requests pending towards `branch`.
    fn pending_merge_requests(&self, branch: &str) -> Result<Vec<String>>;
}

/// Plain local bare repository: every branch exists, nothing can be pending.
pub struct NoneRepoApi;

impl RepoApi for NoneRepoApi {
    fn branch_exists(&self, _branch: &str) -> Result<bool> {
        Ok(true)
    }

    fn pending_merge_requests(&self, _branch: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Pick the repo API implementation for the configured provider.
pub fn select_repo_api(provider: Provider) -> Result<Box<dyn RepoApi>> {
    match provider {
        Provider::None => Ok(Box::new(NoneRepoApi)),
        Provider::Gitlab | Provider::Bitbucket => Err(Error::Config(format!(
            "no repo API client available for provider {provider:?} on this host"
        ))),
    }
}
