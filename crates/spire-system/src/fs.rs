//! File probing and managed file mutation

use crate::{Error, Result};
use async_trait::async_trait;
use spire_model::digest;
use spire_model::file_stat::{FileStat, FileType};
use spire_model::probe::Probed;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// Ownership and mode applied to managed files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// Owning user name; unset means leave ownership alone
    pub owner: Option<String>,
    /// Permission bits; unset means leave the mode alone
    pub mode: Option<u32>,
}

/// Probe and mutate files on the target
///
/// Probing never errors: a missing or unreadable path answers with
/// `exists=false` plus an issue. Mutation is fatal on failure.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Attributes of the path
    async fn stat(&self, path: &Path) -> FileStat;

    /// Whether the path exists
    async fn exists(&self, path: &Path) -> bool;

    /// Digest of a configuration file after JSON normalization
    async fn digest_config(&self, path: &Path) -> Probed<String>;

    /// Digest of a service unit file after INI normalization
    async fn digest_service_unit(&self, path: &Path) -> Probed<String>;

    /// Create the directory (and parents) with the given mode
    async fn create_dir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Copy a file into place and apply the given attributes
    async fn copy(&self, src: &Path, dest: &Path, attrs: &FileAttrs) -> Result<()>;

    /// Apply ownership/mode without transferring content
    async fn apply_attrs(&self, path: &Path, attrs: &FileAttrs) -> Result<()>;

    /// Remove a single file; missing files are fine
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree; missing trees are fine
    async fn remove_tree(&self, path: &Path) -> Result<()>;
}

/// `FileStore` for the invoking host
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    /// Create a new local file store
    pub fn new() -> Self {
        Self
    }
}

fn file_type_of(meta: &std::fs::Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_file() {
        FileType::File
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Link
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_fifo() {
        FileType::Fifo
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::Indeterminable
    }
}

fn user_name(uid: u32) -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
}

fn group_name(gid: u32) -> Option<String> {
    nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name)
}

/// Name of the user invoking this process
pub fn current_user_name() -> Option<String> {
    user_name(nix::unistd::Uid::effective().as_raw())
}

/// Primary group name of the named user
pub fn primary_group_of(user: &str) -> Option<String> {
    let user = nix::unistd::User::from_name(user).ok().flatten()?;
    group_name(user.gid.as_raw())
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn stat(&self, path: &Path) -> FileStat {
        match async_fs::symlink_metadata(path).await {
            Ok(meta) => FileStat {
                exists: true,
                owner: user_name(meta.uid()),
                group: group_name(meta.gid()),
                mode: Some(meta.mode() & 0o7777),
                ftype: Some(file_type_of(&meta)),
                issue: None,
            },
            Err(e) => FileStat::from_issue(format!("{}: {e}", path.display())),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        async_fs::symlink_metadata(path).await.is_ok()
    }

    async fn digest_config(&self, path: &Path) -> Probed<String> {
        if !self.exists(path).await {
            return Probed::issue(format!("{} does not exist", path.display()));
        }
        match digest::digest_config_file(path) {
            Ok(digest) => Probed::ok(digest),
            Err(e) => Probed::issue(format!("failed to digest {}: {e}", path.display())),
        }
    }

    async fn digest_service_unit(&self, path: &Path) -> Probed<String> {
        if !self.exists(path).await {
            return Probed::issue(format!("{} does not exist", path.display()));
        }
        match digest::digest_service_unit_file(path) {
            Ok(digest) => Probed::ok(digest),
            Err(e) => Probed::issue(format!("failed to digest {}: {e}", path.display())),
        }
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> Result<()> {
        debug!(path = %path.display(), mode = format!("{mode:04o}"), "creating directory");
        async_fs::create_dir_all(path).await?;
        // set explicitly, create_dir_all is subject to the umask
        async_fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn copy(&self, src: &Path, dest: &Path, attrs: &FileAttrs) -> Result<()> {
        debug!(src = %src.display(), dest = %dest.display(), "copying file");
        async_fs::copy(src, dest).await?;
        self.apply_attrs(dest, attrs).await
    }

    async fn apply_attrs(&self, path: &Path, attrs: &FileAttrs) -> Result<()> {
        if let Some(mode) = attrs.mode {
            async_fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        }
        if let Some(owner) = &attrs.owner {
            let user = nix::unistd::User::from_name(owner)
                .map_err(|e| Error::Precondition(format!("user lookup for {owner:?} failed: {e}")))?
                .ok_or_else(|| Error::Precondition(format!("unknown user {owner:?}")))?;
            nix::unistd::chown(path, Some(user.uid), Some(user.gid)).map_err(|e| {
                Error::Precondition(format!(
                    "failed to chown {} to {owner}: {e}",
                    path.display()
                ))
            })?;
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match async_fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_tree(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "removing tree");
        match async_fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_stat_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("probe.txt");
        std::fs::write(&file, "content").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o640)).unwrap();

        let store = LocalFileStore::new();
        let stat = store.stat(&file).await;
        assert!(stat.exists);
        assert_eq!(stat.mode, Some(0o640));
        assert_eq!(stat.ftype, Some(FileType::File));
        assert!(stat.owner.is_some());
        assert!(stat.issue.is_none());
    }

    #[smol_potat::test]
    async fn test_stat_missing_file_has_issue() {
        let store = LocalFileStore::new();
        let stat = store.stat(Path::new("/definitely/not/here")).await;
        assert!(!stat.exists);
        assert!(stat.issue.is_some());
    }

    #[smol_potat::test]
    async fn test_digest_probes() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("agent.conf");
        std::fs::write(&conf, r#"{"agent": {"log_level": "INFO"}}"#).unwrap();

        let store = LocalFileStore::new();
        assert!(store.digest_config(&conf).await.value.is_some());
        assert!(
            store
                .digest_config(&dir.path().join("missing.conf"))
                .await
                .issue
                .unwrap()
                .contains("does not exist")
        );
    }

    #[smol_potat::test]
    async fn test_create_dir_applies_mode() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b");

        let store = LocalFileStore::new();
        store.create_dir(&target, 0o750).await.unwrap();
        let stat = store.stat(&target).await;
        assert_eq!(stat.mode, Some(0o750));
        assert_eq!(stat.ftype, Some(FileType::Directory));
    }

    #[smol_potat::test]
    async fn test_copy_and_attrs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.conf");
        let dest = dir.path().join("dest.conf");
        std::fs::write(&src, "data").unwrap();

        let store = LocalFileStore::new();
        let attrs = FileAttrs {
            owner: None,
            mode: Some(0o600),
        };
        store.copy(&src, &dest, &attrs).await.unwrap();
        let stat = store.stat(&dest).await;
        assert!(stat.exists);
        assert_eq!(stat.mode, Some(0o600));
    }

    #[smol_potat::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();
        store.remove_file(&dir.path().join("nope")).await.unwrap();
        store.remove_tree(&dir.path().join("nope-tree")).await.unwrap();
    }
}
