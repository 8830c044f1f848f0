// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Privileged kernel operations used by the boot stages.
//!
//! Everything that changes the mount namespace goes through [`Sys`], so the
//! stage sequences can run against a scratch directory in tests while the
//! file writes still happen on a real filesystem.

use std::{
    env,
    ffi::CString,
    os::unix::fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use nix::mount::MsFlags;
use procfs::process::Process;
use rustix::{
    fs::{CWD, FileType, Mode, makedev, mknodat},
    mount::{MountFlags, UnmountFlags, mount, mount_move, unmount},
};

use crate::mount::overlayfs;

pub trait Sys {
    fn mount(
        &mut self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> Result<()>;

    fn bind_mount(&mut self, from: &Path, to: &Path) -> Result<()>;

    fn move_mount(&mut self, from: &Path, to: &Path) -> Result<()>;

    fn remount_rw(&mut self, target: &Path) -> Result<()>;

    /// `lowers` is ordered highest priority first.
    fn mount_overlay(
        &mut self,
        lowers: &[PathBuf],
        upper: Option<&Path>,
        work: Option<&Path>,
        target: &Path,
    ) -> Result<()>;

    fn unmount(&mut self, target: &Path) -> Result<()>;

    /// Move the current root under `new_root` and chroot into it.
    fn switch_root(&mut self, new_root: &Path) -> Result<()>;

    fn mknod_block(&mut self, path: &Path, major: u32, minor: u32) -> Result<()>;

    /// Whether `/` is still the initramfs (and therefore writable).
    fn is_rootfs(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct LinuxSys;

impl Sys for LinuxSys {
    fn mount(
        &mut self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> Result<()> {
        let data = data.map(CString::new).transpose()?;
        mount(source, target, fstype, flags, data.as_deref())
            .with_context(|| format!("Failed to mount {source} ({fstype}) on {}", target.display()))
    }

    fn bind_mount(&mut self, from: &Path, to: &Path) -> Result<()> {
        overlayfs::bind_mount(from, to)
    }

    fn move_mount(&mut self, from: &Path, to: &Path) -> Result<()> {
        mount_move(from, to).with_context(|| {
            format!("Failed to move mount {} -> {}", from.display(), to.display())
        })
    }

    fn remount_rw(&mut self, target: &Path) -> Result<()> {
        nix::mount::mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_REMOUNT,
            None::<&str>,
        )
        .with_context(|| format!("Failed to remount {} rw", target.display()))
    }

    fn mount_overlay(
        &mut self,
        lowers: &[PathBuf],
        upper: Option<&Path>,
        work: Option<&Path>,
        target: &Path,
    ) -> Result<()> {
        overlayfs::mount_overlayfs(lowers, upper, work, target)
    }

    fn unmount(&mut self, target: &Path) -> Result<()> {
        unmount(target, UnmountFlags::DETACH)
            .with_context(|| format!("Failed to unmount {}", target.display()))
    }

    fn switch_root(&mut self, new_root: &Path) -> Result<()> {
        log::debug!("Switch root to {}", new_root.display());
        let mut mounts: Vec<PathBuf> = Process::myself()?
            .mountinfo()
            .context("Failed to read mountinfo")?
            .into_iter()
            .map(|m| m.mount_point)
            .filter(|p| p != Path::new("/") && !p.starts_with(new_root))
            .collect();
        mounts.sort();
        mounts.dedup();

        // Parents first; a moved parent carries its children along.
        let mut moved: Vec<PathBuf> = Vec::new();
        for mnt in mounts {
            if moved.iter().any(|m| mnt.starts_with(m)) {
                continue;
            }
            // A mount cannot move below itself. Callers share what the new
            // root needs from it before switching.
            if new_root.starts_with(&mnt) {
                log::debug!("Keep [{}]: holds the new root", mnt.display());
                continue;
            }
            let rel = mnt.strip_prefix("/").unwrap_or(&mnt);
            let dest = new_root.join(rel);
            if !dest.exists() {
                log::debug!("Unmount [{}]: no target in new root", mnt.display());
                if let Err(e) = unmount(&mnt, UnmountFlags::DETACH) {
                    log::debug!("Unmount [{}] failed: {}", mnt.display(), e);
                }
                continue;
            }
            mount_move(&mnt, &dest).with_context(|| {
                format!("Failed to move {} into {}", mnt.display(), new_root.display())
            })?;
            moved.push(mnt);
        }

        env::set_current_dir(new_root)?;
        mount_move(new_root, "/").context("Failed to move new root to /")?;
        fs::chroot(".").context("chroot failed")?;
        env::set_current_dir("/")?;
        Ok(())
    }

    fn mknod_block(&mut self, path: &Path, major: u32, minor: u32) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        mknodat(
            CWD,
            path,
            FileType::BlockDevice,
            Mode::from_raw_mode(0o600),
            makedev(major, minor),
        )
        .with_context(|| format!("mknod failed for {}", path.display()))
    }

    fn is_rootfs(&self) -> bool {
        let Ok(mountinfo) = Process::myself().and_then(|p| p.mountinfo()) else {
            return false;
        };
        mountinfo
            .into_iter()
            .filter(|m| m.mount_point == Path::new("/"))
            .last()
            .is_some_and(|m| matches!(m.fs_type.as_str(), "rootfs" | "ramfs" | "tmpfs"))
    }
}
