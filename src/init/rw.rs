// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, os::unix::fs::PermissionsExt, path::Path};

use anyhow::{Result, bail};

use super::{
    MagiskInit,
    raw::{RawFile, RawKind},
};
use crate::{
    defs::{
        BACKUP_DIR, CONFIG_FILE, DATA_OVERLAY_DIR, INIT_RC, INTERNAL_DIR, MONO_SEPOLICY,
        OVERLAY_DIR, PRE_TMP_DIR, ROOT_MIRROR_DIR, RULES_LINK, RUNTIME_ENTRY, SBIN_DIR,
        VENDOR_PRECOMPILED,
    },
    sys::Sys,
    utils::{ensure_dir_exists, force_symlink, link_path, mv_path, rm_rf},
};

fn is_rc_name(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "rc")
}

/// Top level `*.rc` overlay files are injected into init.rc, not copied.
pub fn is_rc_script(file: &RawFile) -> bool {
    matches!(file.kind, RawKind::File(_))
        && file.path.components().count() == 1
        && is_rc_name(&file.path)
}

impl<S: Sys> MagiskInit<S> {
    /// Pull top level `*.rc` files out of `dir` into the injected scripts.
    fn take_rc_scripts(&mut self, dir: &Path) -> Result<()> {
        let mut scripts: Vec<_> = fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_rc_name(p))
            .collect();
        scripts.sort();
        for script in scripts {
            log::info!("Inject rc script: {}", script.display());
            self.rc_scripts.push(fs::read_to_string(&script)?);
            fs::remove_file(&script)?;
        }
        Ok(())
    }

    /// Patch a writable initramfs root in place.
    pub fn patch_rw_root(&mut self) -> Result<()> {
        let sbin = self.path(SBIN_DIR);
        let mirror = self.path(ROOT_MIRROR_DIR);
        if sbin.is_dir() {
            log::debug!("Mirror /sbin into /root");
            ensure_dir_exists(&mirror)?;
            link_path(&sbin, &mirror)?;
        }

        let overlay = self.path(OVERLAY_DIR);
        if overlay.is_dir() {
            log::info!("Merge overlay.d into /");
            self.take_rc_scripts(&overlay)?;
            let root = self.root.clone();
            mv_path(&overlay, &root)?;
            rm_rf(&overlay)?;
        }
        rm_rf(self.path(DATA_OVERLAY_DIR))?;
        rm_rf(self.path(BACKUP_DIR))?;

        self.patch_init_rc(INIT_RC, INIT_RC, SBIN_DIR)?;

        let src = if self.exists(MONO_SEPOLICY) {
            MONO_SEPOLICY
        } else if self.exists(VENDOR_PRECOMPILED) {
            VENDOR_PRECOMPILED
        } else {
            bail!("No sepolicy found in the root filesystem");
        };
        self.setup_tmp(PRE_TMP_DIR)?;
        self.patch_sepolicy(src, MONO_SEPOLICY)?;
        self.save_for_proxy()?;
        self.drop_pre_tmp();

        self.dump_self(&self.path(RUNTIME_ENTRY), 0o755)?;
        Ok(())
    }

    /// `/sbin` becomes the runtime's tmpfs only once the proxy runs, so
    /// leave it the config and the rules dir as seen from there.
    fn save_for_proxy(&self) -> Result<()> {
        let saved = self.path(SBIN_DIR).join(INTERNAL_DIR);
        ensure_dir_exists(&saved)?;
        let config = self.path(SBIN_DIR).join(CONFIG_FILE);
        fs::write(&config, &self.magisk_cfg)?;
        fs::set_permissions(&config, fs::Permissions::from_mode(0o600))?;

        let pre_tmp = self.path(PRE_TMP_DIR);
        if let Some(rel) = self
            .rules_dir
            .as_deref()
            .and_then(|r| r.strip_prefix(&pre_tmp).ok())
        {
            let target = Path::new(SBIN_DIR).join(rel);
            log::debug!("Rules dir for the proxy: {}", target.display());
            force_symlink(target, self.path(SBIN_DIR).join(RULES_LINK))?;
        }
        Ok(())
    }

    fn drop_pre_tmp(&mut self) {
        let pre_tmp = self.path(PRE_TMP_DIR);
        // Detaching takes the rules partition along with it.
        if let Err(e) = self.sys.unmount(&pre_tmp) {
            log::warn!("{e:#}");
        }
        if let Err(e) = fs::remove_dir(&pre_tmp) {
            log::debug!("Keep {}: {}", pre_tmp.display(), e);
        }
        self.policy_tool = None;
        self.rules_dir = None;
    }
}
