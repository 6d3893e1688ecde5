//! Mount helpers for starting/stopping FUSE.
//!
//! Thin wrappers over fuse3 Session APIs; on Linux the unprivileged path
//! goes through fusermount3.

use std::path::Path;
use std::sync::Arc;

use fuse3::MountOptions;

use crate::fuse::TgFuse;
use crate::vfs::provider::DataProvider;

fn default_mount_options(fs_name: &str, allow_other: bool) -> MountOptions {
    let mut options = MountOptions::default();
    options.fs_name(fs_name);
    // Kernel-side permission checks against our synthesised modes.
    options.default_permissions(true);
    if allow_other {
        options.allow_other(true);
    }
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    options.uid(uid).gid(gid);
    options
}

/// Mount a provider at `mount_point` without root, via fusermount3.
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<P: DataProvider>(
    provider: Arc<P>,
    mount_point: impl AsRef<Path>,
    allow_other: bool,
) -> std::io::Result<fuse3::raw::MountHandle> {
    let mount_point = mount_point.as_ref();
    provider.set_mount_point(mount_point.to_string_lossy().into_owned());

    let options = default_mount_options(&provider.filesystem_name(), allow_other);
    let session = fuse3::raw::Session::new(options);
    session
        .mount_with_unprivileged(TgFuse::new(provider), mount_point)
        .await
}

#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<P: DataProvider>(
    _provider: Arc<P>,
    _mount_point: impl AsRef<Path>,
    _allow_other: bool,
) -> std::io::Result<fuse3::raw::MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
