// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use anyhow::Result;
use rustix::mount::MountFlags;

use super::MagiskInit;
use crate::{
    block::find_block,
    defs::{DEV_BLOCK_DIR, RULES_CANDIDATES, SYSFS_BLOCK_DIR},
    fstab::FstabEntry,
    mount::device_path,
    sys::Sys,
    utils::{ensure_dir_exists, force_symlink},
};

// Fixed vendor partition of the API 28 emulator image.
const AVD_VENDOR_DEV: &str = "/dev/block/vde1";

impl<S: Sys> MagiskInit<S> {
    /// Create `<dev_dir>/<partname>` for the partition announced in sysfs.
    pub fn setup_block(&mut self, partname: &str, dev_dir: &Path) -> Result<Option<PathBuf>> {
        let Some(dev) = find_block(&self.path(SYSFS_BLOCK_DIR), partname) else {
            log::debug!("No block device for [{partname}]");
            return Ok(None);
        };
        ensure_dir_exists(dev_dir)?;
        let node = dev_dir.join(partname);
        log::debug!(
            "Setup {} ({}:{}) for [{partname}]",
            node.display(),
            dev.major,
            dev.minor
        );
        self.sys.mknod_block(&node, dev.major, dev.minor)?;
        Ok(Some(node))
    }

    /// Mount everything the device tree fstab describes, read-only. Mount
    /// points already handled in this stage are left alone.
    pub fn mount_with_dt(&mut self) -> Result<()> {
        let fstab = self.read_dt_fstab();
        let has_vendor = fstab.iter().any(|e| e.mnt_point == "/vendor");
        for entry in fstab {
            self.mount_fstab_entry(entry)?;
        }
        if self.avd_hack && !has_vendor {
            self.mount_avd_vendor()?;
        }
        Ok(())
    }

    fn mount_fstab_entry(&mut self, entry: FstabEntry) -> Result<()> {
        if self.mounts.contains(&entry.mnt_point) {
            log::debug!("Skip [{}]: already mounted", entry.mnt_point);
            return Ok(());
        }
        let target = self.path(&entry.mnt_point);
        if target
            .symlink_metadata()
            .is_ok_and(|m| m.file_type().is_symlink())
        {
            log::debug!("Skip [{}]: mount point is a symlink", entry.mnt_point);
            return Ok(());
        }

        let mut partname = Path::new(&entry.dev)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if entry.is_slotselect() {
            partname.push_str(&self.config.slot);
        }

        let dev_dir = self.path(DEV_BLOCK_DIR);
        let source = match self.setup_block(&partname, &dev_dir)? {
            Some(node) => node.display().to_string(),
            None => {
                log::warn!("Cannot resolve [{partname}], using {}", entry.dev);
                entry.dev.clone()
            }
        };

        ensure_dir_exists(&target)?;
        log::info!(
            "Mount [{}] -> [{}] ({}, {})",
            source,
            entry.mnt_point,
            entry.r#type,
            entry.mnt_flags
        );
        self.sys
            .mount(&source, &target, &entry.r#type, MountFlags::RDONLY, None)?;
        self.mounts.push(entry.mnt_point);
        Ok(())
    }

    fn mount_avd_vendor(&mut self) -> Result<()> {
        if self.mounts.contains("/vendor") {
            return Ok(());
        }
        let dev_dir = self.path(DEV_BLOCK_DIR);
        let source = match self.setup_block("vendor", &dev_dir)? {
            Some(node) => node.display().to_string(),
            None => self.path(AVD_VENDOR_DEV).display().to_string(),
        };
        let target = self.path("/vendor");
        ensure_dir_exists(&target)?;
        log::info!("AVD: mount [{source}] -> [/vendor]");
        self.sys
            .mount(&source, &target, "ext4", MountFlags::RDONLY, None)?;
        self.mounts.push("/vendor");
        Ok(())
    }

    /// Find a writable partition for module sepolicy rules and link it as
    /// `<mnt_base>/../sepolicy.rules`. Not finding one is fine.
    pub fn mount_rules_dir(&mut self, dev_base: &Path, mnt_base: &Path) -> Result<()> {
        let mut candidates: Vec<(String, String)> = Vec::new();
        if let Some(dev) = self.magisk_config().preinit_device() {
            let name = RULES_CANDIDATES
                .iter()
                .find(|(parts, _)| parts.iter().any(|p| p.eq_ignore_ascii_case(dev)))
                .map_or("preinit", |(_, name)| *name);
            candidates.push((dev.to_string(), name.to_string()));
        }
        for (parts, name) in RULES_CANDIDATES {
            for part in *parts {
                candidates.push((part.to_string(), name.to_string()));
            }
        }

        for (part, name) in candidates {
            let Some(node) = self.setup_block(&part, dev_base)? else {
                continue;
            };
            let mnt = mnt_base.join(&name);
            ensure_dir_exists(&mnt)?;
            let source = node.display().to_string();
            if let Err(e) = self
                .sys
                .mount(&source, &mnt, "ext4", MountFlags::empty(), None)
            {
                log::debug!("Cannot mount [{part}] for rules: {e:#}");
                continue;
            }

            let rules = if name == "data" {
                let unencrypted = mnt.join("unencrypted");
                if unencrypted.is_dir() {
                    unencrypted.join("magisk")
                } else {
                    mnt.join("adb/modules")
                }
            } else {
                mnt.join("magisk")
            };
            let link = mnt_base
                .parent()
                .unwrap_or(mnt_base)
                .join("sepolicy.rules");
            force_symlink(device_path(&self.root, &rules), &link)?;
            log::info!("Rules dir: {}", device_path(&self.root, &rules));
            self.rules_dir = Some(rules);
            return Ok(());
        }

        log::warn!("No partition for custom sepolicy rules");
        Ok(())
    }
}
