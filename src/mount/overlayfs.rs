// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::CString,
    os::fd::AsFd,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rustix::{
    fs::CWD,
    mount::{
        FsMountFlags, FsOpenFlags, MountAttrFlags, MountFlags, MoveMountFlags, OpenTreeFlags,
        fsconfig_create, fsconfig_set_string, fsmount, fsopen, mount, move_mount, open_tree,
    },
};

const OVERLAY_SOURCE: &str = "magisk";

/// Mount an overlay of `lower_dirs` (highest priority first) on `dest`.
/// New mount API first, legacy mount(2) with an option string as fallback.
pub fn mount_overlayfs(
    lower_dirs: &[PathBuf],
    upperdir: Option<&Path>,
    workdir: Option<&Path>,
    dest: &Path,
) -> Result<()> {
    let lowerdir_config = lower_dirs
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(":");

    let up_s = upperdir
        .filter(|p| p.exists())
        .map(|p| p.to_string_lossy().to_string());
    let wk_s = workdir
        .filter(|p| p.exists())
        .map(|p| p.to_string_lossy().to_string());

    let res = (|| -> Result<()> {
        let fs = fsopen("overlay", FsOpenFlags::FSOPEN_CLOEXEC)?;
        let fd = fs.as_fd();
        fsconfig_set_string(fd, "lowerdir", &lowerdir_config)?;
        if let (Some(u), Some(w)) = (&up_s, &wk_s) {
            fsconfig_set_string(fd, "upperdir", u)?;
            fsconfig_set_string(fd, "workdir", w)?;
        }
        fsconfig_set_string(fd, "source", OVERLAY_SOURCE)?;
        fsconfig_create(fd)?;
        let mnt = fsmount(fd, FsMountFlags::FSMOUNT_CLOEXEC, MountAttrFlags::empty())?;
        move_mount(
            mnt.as_fd(),
            "",
            CWD,
            dest,
            MoveMountFlags::MOVE_MOUNT_F_EMPTY_PATH,
        )?;
        Ok(())
    })();

    if let Err(e) = res {
        log::debug!("fsopen overlay failed ({e:#}), falling back to mount(2)");
        let mut data = format!("lowerdir={}", lowerdir_config.replace(',', "\\,"));
        if let (Some(u), Some(w)) = (up_s, wk_s) {
            data.push_str(&format!(
                ",upperdir={},workdir={}",
                u.replace(',', "\\,"),
                w.replace(',', "\\,")
            ));
        }
        mount(
            OVERLAY_SOURCE,
            dest,
            "overlay",
            MountFlags::empty(),
            Some(CString::new(data)?.as_c_str()),
        )
        .with_context(|| format!("Failed to mount overlay on {}", dest.display()))?;
    }
    Ok(())
}

/// Bind mount through open_tree when the kernel has it, mount(2) otherwise.
pub fn bind_mount(from: &Path, to: &Path) -> Result<()> {
    let result = (|| {
        let tree = open_tree(
            CWD,
            from,
            OpenTreeFlags::OPEN_TREE_CLOEXEC | OpenTreeFlags::OPEN_TREE_CLONE,
        )?;
        move_mount(
            tree.as_fd(),
            "",
            CWD,
            to,
            MoveMountFlags::MOVE_MOUNT_F_EMPTY_PATH,
        )
    })();

    if result.is_err() {
        log::debug!("open_tree failed, falling back to traditional bind mount");
        mount(from, to, "", MountFlags::BIND, None).with_context(|| {
            format!("Failed to bind mount {} -> {}", from.display(), to.display())
        })?;
    }
    Ok(())
}
