// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Patching for system-as-root devices, where `/` is read-only and the
//! runtime is layered on top with an overlay.

use std::{path::Path, thread, time::Duration};

use anyhow::{Context, Result, bail};
use rustix::mount::MountFlags;

use super::{
    MagiskInit,
    raw::{RawKind, backup_folder},
    rw::is_rc_script,
};
use crate::{
    block::{BlockDev, find_block},
    defs::{
        DATA_OVERLAY_DIR, DEBUG_RAMDISK, DEV_ROOT, INIT_RC, MONO_SEPOLICY, NEW_INIT_RC, NEW_ROOT_DIR, OVERLAY_DIR, OVERLAY_UPPER_DIR,
        OVERLAY_WORK_DIR, PATCHED_SEPOLICY, ROOT_OVERLAY_DIR, SBIN_DIR, SYSFS_BLOCK_DIR,
        SYSTEM_ROOT, VENDOR_PRECOMPILED,
    },
    sys::Sys,
    utils::ensure_dir_exists,
};

const ROOTWAIT_TRIES: u32 = 50;
const ROOTWAIT_INTERVAL: Duration = Duration::from_millis(100);

impl<S: Sys> MagiskInit<S> {
    /// Capture overlays and config before anything in the root changes.
    pub fn backup_files(&mut self) -> Result<()> {
        let overlay = [OVERLAY_DIR, DATA_OVERLAY_DIR]
            .into_iter()
            .find(|d| self.path(d).is_dir());
        if let Some(dir) = overlay {
            self.overlays = backup_folder(&self.path(dir))?;
            log::info!("Backup {} entries from {dir}", self.overlays.len());
        }
        self.load_backup_config()
    }

    /// Replay the backups and the runtime into a staging dir, overlay it on
    /// top of `/` and switch into the result.
    pub fn patch_ro_root(&mut self) -> Result<()> {
        let tmp = if self.path(SBIN_DIR).is_dir() {
            SBIN_DIR
        } else {
            DEBUG_RAMDISK
        };
        self.setup_tmp(tmp)?;

        let tmp_dir = self.path(tmp);
        let rootdir = tmp_dir.join(ROOT_OVERLAY_DIR);
        ensure_dir_exists(&rootdir)?;

        for file in std::mem::take(&mut self.overlays) {
            if is_rc_script(&file) {
                if let RawKind::File(content) = &file.kind {
                    log::info!("Inject rc script: {}", file.path.display());
                    self.rc_scripts
                        .push(String::from_utf8_lossy(content).to_string());
                }
                continue;
            }
            log::debug!("Replay {}", file.path.display());
            file.restore(&rootdir)?;
        }

        // Injected files go last so they replace replayed ones.
        let rc = if self.exists(NEW_INIT_RC) {
            NEW_INIT_RC
        } else {
            INIT_RC
        };
        let staged = |p: &str| format!("{tmp}/{ROOT_OVERLAY_DIR}{p}");
        self.patch_init_rc(rc, &staged(rc), tmp)?;

        let monolithic = self.exists(MONO_SEPOLICY);
        if monolithic {
            self.patch_sepolicy(MONO_SEPOLICY, &staged(MONO_SEPOLICY))?;
        }

        // Split policy: patch while the tool on tmp is still reachable.
        let split_policy = if monolithic {
            None
        } else if self.exists(VENDOR_PRECOMPILED) {
            let patched = format!("{tmp}/{PATCHED_SEPOLICY}");
            self.patch_sepolicy(VENDOR_PRECOMPILED, &patched)?;
            Some(patched)
        } else {
            log::warn!("No precompiled sepolicy to patch");
            None
        };

        let upper = tmp_dir.join(OVERLAY_UPPER_DIR);
        let work = tmp_dir.join(OVERLAY_WORK_DIR);
        let new_root = tmp_dir.join(NEW_ROOT_DIR);
        for dir in [&upper, &work, &new_root] {
            ensure_dir_exists(dir)?;
        }
        let lowers = [rootdir, self.root.clone()];
        self.sys
            .mount_overlay(&lowers, Some(&upper), Some(&work), &new_root)?;
        // tmp holds the new root and cannot be moved into it.
        let tmp_in_new_root = new_root.join(tmp.trim_start_matches('/'));
        self.sys.bind_mount(&tmp_dir, &tmp_in_new_root)?;
        self.sys.switch_root(&new_root)?;

        if let Some(patched) = split_policy {
            let (from, to) = (self.path(&patched), self.path(VENDOR_PRECOMPILED));
            self.sys.bind_mount(&from, &to)?;
        }
        Ok(())
    }

    fn root_candidates(&self) -> Vec<String> {
        let slot = &self.config.slot;
        let mut names: Vec<String> = self
            .read_dt_fstab()
            .into_iter()
            .filter(|e| e.mnt_point == "/system" || e.mnt_point == "/")
            .filter_map(|e| {
                let base = Path::new(&e.dev).file_name()?.to_string_lossy().to_string();
                Some(format!("{base}{slot}"))
            })
            .collect();
        names.extend(["vroot".to_string(), "APP".to_string(), format!("system{slot}")]);
        names
    }

    fn find_root_block(&self) -> Option<BlockDev> {
        let sysfs = self.path(SYSFS_BLOCK_DIR);
        let candidates = self.root_candidates();
        let tries = if self.config.rootwait { ROOTWAIT_TRIES } else { 1 };
        for attempt in 0..tries {
            if attempt > 0 {
                thread::sleep(ROOTWAIT_INTERVAL);
            }
            for name in &candidates {
                if let Some(dev) = find_block(&sysfs, name) {
                    log::info!("Root partition: [{name}] ({}:{})", dev.major, dev.minor);
                    return Some(dev);
                }
            }
        }
        None
    }

    /// Mount the system partition at `/system_root` and make it `/`.
    pub fn mount_system_root(&mut self) -> Result<()> {
        let Some(dev) = self.find_root_block() else {
            bail!("Cannot find root partition");
        };

        let dev_root = self.path(DEV_ROOT);
        if let Some(parent) = dev_root.parent() {
            ensure_dir_exists(parent)?;
        }
        self.sys.mknod_block(&dev_root, dev.major, dev.minor)?;

        let target = self.path(SYSTEM_ROOT);
        ensure_dir_exists(&target)?;
        let source = dev_root.display().to_string();
        if let Err(e) = self
            .sys
            .mount(&source, &target, "ext4", MountFlags::RDONLY, None)
        {
            log::debug!("ext4 failed ({e:#}), trying erofs");
            self.sys
                .mount(&source, &target, "erofs", MountFlags::RDONLY, None)
                .context("Failed to mount system root")?;
        }
        // Becomes `/`, so it is not a stage mount to undo.
        self.sys.switch_root(&target)?;
        Ok(())
    }
}
