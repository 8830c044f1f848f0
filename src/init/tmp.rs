// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, File},
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Result, bail};

use super::MagiskInit;
use crate::{
    defs::{
        APPLETS, BLOCK_DIR, CONFIG_FILE, INTERNAL_DIR, MAGISK_BIN, MIRROR_DIR, POLICY_BIN,
        REQUIRED_PAYLOAD, SELF_BIN,
    },
    image::{PayloadEntry, PayloadError, unxz},
    sys::Sys,
    utils::{ensure_dir_exists, force_symlink},
};

fn write_entry(entry: &PayloadEntry, dest: &Path) -> Result<()> {
    let file =
        File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    unxz(entry.name, entry.data, file)?;
    fs::set_permissions(dest, fs::Permissions::from_mode(entry.mode))?;
    Ok(())
}

impl<S: Sys> MagiskInit<S> {
    /// Write the whole self image to `dest` with `mode`.
    pub fn dump_self(&self, dest: &Path, mode: u32) -> Result<()> {
        if self.self_image.is_empty() {
            bail!("Self image is not mapped");
        }
        if let Some(parent) = dest.parent() {
            ensure_dir_exists(parent)?;
        }
        fs::write(dest, self.self_image.as_bytes())
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        fs::set_permissions(dest, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    /// Unpack every payload entry into `dir`.
    fn extract_payload(&self, dir: &Path) -> Result<()> {
        let embedded = self
            .self_image
            .embedded()?
            .ok_or_else(|| PayloadError::Missing(MAGISK_BIN.to_string()))?;
        let entries = embedded.entries()?;
        for required in REQUIRED_PAYLOAD {
            if !entries.iter().any(|e| e.name == *required) {
                return Err(PayloadError::Missing(required.to_string()).into());
            }
        }
        for entry in entries {
            let dest = dir.join(entry.name);
            log::debug!("Extract {} ({} bytes packed)", dest.display(), entry.data.len());
            write_entry(&entry, &dest)?;
        }
        Ok(())
    }

    /// Stage the runtime on a fresh tmpfs at `tmp`: internal dirs, config,
    /// binaries and applet links.
    pub fn stage_tmp(&mut self, tmp: &str) -> Result<()> {
        log::info!("Setup Magisk tmp at {tmp}");
        self.mount_tmpfs("magisk", tmp, false)?;

        let dir = self.path(tmp);
        for sub in [INTERNAL_DIR, MIRROR_DIR, BLOCK_DIR] {
            ensure_dir_exists(dir.join(sub))?;
        }

        self.load_magisk_config()?;
        fs::write(dir.join(CONFIG_FILE), &self.magisk_cfg)?;
        fs::set_permissions(dir.join(CONFIG_FILE), fs::Permissions::from_mode(0o600))?;

        self.dump_self(&dir.join(SELF_BIN), 0o755)?;
        self.extract_payload(&dir)?;
        for applet in APPLETS {
            force_symlink(format!("./{MAGISK_BIN}"), dir.join(applet))?;
        }
        self.policy_tool = Some(dir.join(POLICY_BIN));
        Ok(())
    }

    /// [`stage_tmp`](Self::stage_tmp), then probe for the rules dir. Only
    /// before the real init has mounted the data partitions.
    pub fn setup_tmp(&mut self, tmp: &str) -> Result<()> {
        self.stage_tmp(tmp)?;
        let dir = self.path(tmp);
        self.mount_rules_dir(&dir.join(BLOCK_DIR), &dir.join(MIRROR_DIR))
    }
}
