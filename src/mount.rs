//! Filesystem wiring for published volumes.
//!
//! Two layers cooperate here:
//!
//! * [`Mounter`] — the raw mount operations (`mount(2)`, `umount(2)`,
//!   mount-point detection). Injected so the publish path can be exercised
//!   in tests without privileges.
//! * [`MountStrategy`] — how a volume's anchor directory, per-pod bind
//!   directory, and kubelet target path are wired together. Two variants:
//!   [`ReadWriteMount`] and [`ReadOnlyMount`], selected per request.
//!
//! The bind directory gets its own tmpfs instance per pod, and the target
//! path is a bind of that directory, never of the anchor, so concurrent
//! pods consuming the same share each see a private, independently mutable
//! view.

use async_trait::async_trait;
use nix::mount::MsFlags;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::DriverError;

// ---------------------------------------------------------------------------
// Mounter
// ---------------------------------------------------------------------------

/// Raw mount operations against the host.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount a fresh tmpfs instance at `dir`.
    async fn mount_tmpfs(&self, dir: &Path) -> io::Result<()>;

    /// Bind-mount `source` onto `target`.
    async fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()>;

    /// Remount the existing mount at `target` read-only.
    async fn remount_read_only(&self, target: &Path) -> io::Result<()>;

    /// Unmount `target`.
    async fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Whether `path` is currently a mount point. Returns a `NotFound` error
    /// when the path does not exist so callers can distinguish that case.
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool>;
}

/// [`Mounter`] backed by `nix::mount` and `/proc/self/mounts`.
pub struct OsMounter;

fn nix_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

#[async_trait]
impl Mounter for OsMounter {
    async fn mount_tmpfs(&self, dir: &Path) -> io::Result<()> {
        nix::mount::mount(
            Some("tmpfs"),
            dir,
            Some("tmpfs"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(nix_io)
    }

    async fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()> {
        nix::mount::mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(nix_io)
    }

    async fn remount_read_only(&self, target: &Path) -> io::Result<()> {
        // Some kernels ignore MS_RDONLY on the initial bind call; a separate
        // remount is required to actually enforce read-only access.
        nix::mount::mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(nix_io)
    }

    async fn unmount(&self, target: &Path) -> io::Result<()> {
        nix::mount::umount(target).map_err(nix_io)
    }

    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        // Surfaces NotFound for missing paths before consulting the mount
        // table.
        tokio::fs::metadata(path).await?;

        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>.
        // /proc/self/mounts octal-escapes whitespace; target paths handed to
        // this driver never contain it, so direct comparison is safe.
        let table = tokio::fs::read_to_string("/proc/self/mounts").await?;
        let path = path.to_string_lossy();
        Ok(table
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(path.as_ref())))
    }
}

/// Unmount `path` if it is currently a mount point, then remove the
/// directory. Both halves tolerate the path already being gone or never
/// having been mounted, so repeated teardown calls are no-ops.
async fn cleanup_mount_point(mounter: &dyn Mounter, path: &Path) -> Result<(), DriverError> {
    match mounter.is_mount_point(path).await {
        Ok(true) => mounter
            .unmount(path)
            .await
            .map_err(|e| DriverError::UnmountFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
        Ok(false) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(DriverError::UnmountFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    }

    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DriverError::UnmountFailed {
            path: path.display().to_string(),
            reason: format!("remove dir: {e}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Mount strategies
// ---------------------------------------------------------------------------

/// One of the two interchangeable ways of wiring a volume into its target
/// path, selected by the effective read-only flag of each publish.
#[async_trait]
pub trait MountStrategy: Send + Sync {
    /// Wire `bind_dir` up as the content of `target_path`. After success the
    /// target is a mount point sourced from the per-pod bind directory.
    async fn setup(
        &self,
        anchor_dir: &Path,
        bind_dir: &Path,
        target_path: &Path,
    ) -> Result<(), DriverError>;

    /// Reverse [`MountStrategy::setup`]. Safe to call on a partially set-up
    /// or already-torn-down target.
    async fn teardown(
        &self,
        anchor_dir: &Path,
        bind_dir: &Path,
        target_path: &Path,
    ) -> Result<(), DriverError>;
}

fn mount_failed(path: &Path, e: impl std::fmt::Display) -> DriverError {
    DriverError::MountFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Shared wiring of both strategies: per-pod tmpfs on the bind directory,
/// then a bind of that directory onto the target.
async fn stage_bind_mounts(
    mounter: &dyn Mounter,
    anchor_dir: &Path,
    bind_dir: &Path,
    target_path: &Path,
) -> Result<(), DriverError> {
    tokio::fs::create_dir_all(anchor_dir)
        .await
        .map_err(|e| mount_failed(anchor_dir, e))?;
    tokio::fs::create_dir_all(bind_dir)
        .await
        .map_err(|e| mount_failed(bind_dir, e))?;

    // A leftover tmpfs from an interrupted earlier attempt is reused rather
    // than stacked.
    let already_mounted = mounter
        .is_mount_point(bind_dir)
        .await
        .map_err(|e| mount_failed(bind_dir, e))?;
    if !already_mounted {
        mounter
            .mount_tmpfs(bind_dir)
            .await
            .map_err(|e| mount_failed(bind_dir, e))?;
    }

    mounter
        .bind_mount(bind_dir, target_path)
        .await
        .map_err(|e| mount_failed(target_path, e))?;
    Ok(())
}

async fn remove_bind_mounts(
    mounter: &dyn Mounter,
    bind_dir: &Path,
    target_path: &Path,
) -> Result<(), DriverError> {
    cleanup_mount_point(mounter, target_path).await?;
    cleanup_mount_point(mounter, bind_dir).await?;
    Ok(())
}

/// Read-write strategy: each pod gets a writable tmpfs copy of the share.
pub struct ReadWriteMount {
    mounter: Arc<dyn Mounter>,
}

impl ReadWriteMount {
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }
}

#[async_trait]
impl MountStrategy for ReadWriteMount {
    #[instrument(skip(self), fields(target = %target_path.display()))]
    async fn setup(
        &self,
        anchor_dir: &Path,
        bind_dir: &Path,
        target_path: &Path,
    ) -> Result<(), DriverError> {
        stage_bind_mounts(&*self.mounter, anchor_dir, bind_dir, target_path).await?;
        debug!("read-write mounts staged");
        Ok(())
    }

    #[instrument(skip(self), fields(target = %target_path.display()))]
    async fn teardown(
        &self,
        _anchor_dir: &Path,
        bind_dir: &Path,
        target_path: &Path,
    ) -> Result<(), DriverError> {
        remove_bind_mounts(&*self.mounter, bind_dir, target_path).await
    }
}

/// Read-only strategy: same wiring, then the target is remounted read-only
/// so the result rejects writes regardless of the requested mount flags.
pub struct ReadOnlyMount {
    mounter: Arc<dyn Mounter>,
}

impl ReadOnlyMount {
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }
}

#[async_trait]
impl MountStrategy for ReadOnlyMount {
    #[instrument(skip(self), fields(target = %target_path.display()))]
    async fn setup(
        &self,
        anchor_dir: &Path,
        bind_dir: &Path,
        target_path: &Path,
    ) -> Result<(), DriverError> {
        stage_bind_mounts(&*self.mounter, anchor_dir, bind_dir, target_path).await?;
        self.mounter
            .remount_read_only(target_path)
            .await
            .map_err(|e| mount_failed(target_path, e))?;
        debug!("read-only mounts staged");
        Ok(())
    }

    #[instrument(skip(self), fields(target = %target_path.display()))]
    async fn teardown(
        &self,
        _anchor_dir: &Path,
        bind_dir: &Path,
        target_path: &Path,
    ) -> Result<(), DriverError> {
        remove_bind_mounts(&*self.mounter, bind_dir, target_path).await
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::fake::FakeMounter;
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    struct Dirs {
        _tmp: tempfile::TempDir,
        anchor: PathBuf,
        bind: PathBuf,
        target: PathBuf,
    }

    fn dirs() -> Dirs {
        let tmp = tempfile::tempdir().unwrap();
        let anchor = tmp.path().join("anchor");
        let bind = tmp.path().join("bind");
        let target = tmp.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        Dirs {
            _tmp: tmp,
            anchor,
            bind,
            target,
        }
    }

    #[tokio::test]
    async fn read_write_setup_wires_tmpfs_and_bind() {
        let d = dirs();
        let mounter = Arc::new(FakeMounter::default());
        let strategy = ReadWriteMount::new(mounter.clone());

        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();

        assert!(d.anchor.is_dir());
        assert!(mounter.is_mounted(&d.bind));
        assert!(mounter.is_mounted(&d.target));
        assert!(!mounter.is_read_only(&d.target));
    }

    #[tokio::test]
    async fn read_only_setup_remounts_target() {
        let d = dirs();
        let mounter = Arc::new(FakeMounter::default());
        let strategy = ReadOnlyMount::new(mounter.clone());

        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();

        assert!(mounter.is_mounted(&d.target));
        assert!(mounter.is_read_only(&d.target));
    }

    #[tokio::test]
    async fn setup_reuses_leftover_tmpfs() {
        let d = dirs();
        let mounter = Arc::new(FakeMounter::default());
        let strategy = ReadWriteMount::new(mounter.clone());

        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();
        mounter.force_unmount(&d.target);
        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();

        // The bind-dir tmpfs from the first attempt is still mounted and must
        // not be stacked a second time.
        assert_eq!(mounter.tmpfs_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mounter.bind_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn teardown_removes_mounts_and_dirs() {
        let d = dirs();
        let mounter = Arc::new(FakeMounter::default());
        let strategy = ReadWriteMount::new(mounter.clone());

        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();
        strategy
            .teardown(&d.anchor, &d.bind, &d.target)
            .await
            .unwrap();

        assert!(!mounter.is_mounted(&d.target));
        assert!(!mounter.is_mounted(&d.bind));
        assert!(!d.target.exists());
        assert!(!d.bind.exists());
        // The anchor holds canonical share content and stays.
        assert!(d.anchor.is_dir());
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let d = dirs();
        let mounter = Arc::new(FakeMounter::default());
        let strategy = ReadOnlyMount::new(mounter.clone());

        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();
        strategy
            .teardown(&d.anchor, &d.bind, &d.target)
            .await
            .unwrap();
        // Everything is already gone; a second teardown must be a no-op.
        strategy
            .teardown(&d.anchor, &d.bind, &d.target)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn teardown_tolerates_out_of_band_unmount() {
        let d = dirs();
        let mounter = Arc::new(FakeMounter::default());
        let strategy = ReadWriteMount::new(mounter.clone());

        strategy.setup(&d.anchor, &d.bind, &d.target).await.unwrap();
        mounter.force_unmount(&d.target);
        mounter.force_unmount(&d.bind);

        strategy
            .teardown(&d.anchor, &d.bind, &d.target)
            .await
            .unwrap();
        assert!(!d.target.exists());
    }
}
