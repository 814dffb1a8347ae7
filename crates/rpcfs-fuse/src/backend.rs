//! Mounting and unmounting.

use fuser::{BackgroundSession, MountOption};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MountConfig;
use crate::filesystem::RpcFs;
use crate::operations::FileOperations;

/// How long the mount syscall may block (e.g. on a stale mount point).
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for graceful session.join() before forcing unmount.
/// Thread may leak on timeout, but this is acceptable vs blocking forever.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// fuser mount options for `config`.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fsname.clone()),
        MountOption::Subtype("rpcfs".to_string()),
        MountOption::DefaultPermissions,
        if config.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        },
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
        options.push(MountOption::AutoUnmount);
    }
    options
}

/// Mounts `ops` at `mountpoint` on a background session.
pub fn mount<O: FileOperations + 'static>(
    ops: O,
    mountpoint: &Path,
    config: &MountConfig,
) -> io::Result<FuseMountHandle> {
    let options = mount_options(config);
    let fs = RpcFs::new(ops, config.clone())?;
    let target = mountpoint.to_path_buf();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(fuser::spawn_mount2(fs, &target, &options));
    });

    let session = match rx.recv_timeout(MOUNT_TIMEOUT) {
        Ok(result) => result?,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "mount timed out; the mount point may be a stale FUSE mount",
            ));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            return Err(io::Error::other("mount thread terminated unexpectedly"));
        }
    };

    info!(mountpoint = %mountpoint.display(), fsname = %config.fsname, "Mounted");
    Ok(FuseMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}

/// A live mount. Dropping it unmounts.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl std::fmt::Debug for FuseMountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuseMountHandle")
            .field("mountpoint", &self.mountpoint)
            .field("mounted", &self.session.is_some())
            .finish()
    }
}

impl FuseMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session thread. May block while files
    /// are open.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "Unmounting");
        if let Some(session) = self.session.take() {
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "Unmounted");
    }

    /// Force unmount the filesystem using system tools.
    /// This is a fallback when the normal unmount is blocked.
    fn force_unmount_impl(&self) {
        #[cfg(target_os = "macos")]
        {
            let result = std::process::Command::new("diskutil")
                .args(["unmount", "force"])
                .arg(&self.mountpoint)
                .output();
            if matches!(result, Ok(ref output) if output.status.success()) {
                debug!("Force unmount via diskutil succeeded");
                return;
            }
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .args(["-uz"])
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mountpoint = %self.mountpoint.display(), "Unmounting on drop");

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            warn!(
                mountpoint = %self.mountpoint.display(),
                "Session did not stop within {:?}, forcing unmount",
                JOIN_TIMEOUT
            );
            self.force_unmount_impl();
        }
    }
}
