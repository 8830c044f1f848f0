// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Root filesystem patching primitives shared by the boot stages.

pub mod mount;
pub mod raw;
pub mod rc;
pub mod rw;
pub mod sar;
pub mod sepolicy;
pub mod tmp;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::Result;

use crate::{
    config::{BootConfig, MagiskConfig},
    defs::{BACKUP_CONFIG, DATA_BACKUP_CONFIG},
    fstab::{FstabEntry, read_dt_fstab},
    image::MappedImage,
    mount::MountList,
    sys::Sys,
};
use raw::RawFile;
use sepolicy::{PolicyPatcher, ToolPatcher};

/// State shared by every primitive of one boot stage. Owns the mount list,
/// the mapped self image and the captured overlay records.
pub struct MagiskInit<S: Sys> {
    /// Where `/` is; a scratch directory under test.
    pub root: PathBuf,
    pub sys: S,
    pub config: BootConfig,
    pub argv: Vec<OsString>,
    pub mounts: MountList,
    pub self_image: MappedImage,
    pub magisk_cfg: Vec<u8>,
    pub overlays: Vec<RawFile>,
    pub rc_scripts: Vec<String>,
    pub rules_dir: Option<PathBuf>,
    pub policy_tool: Option<PathBuf>,
    pub policy: Box<dyn PolicyPatcher>,
    /// Legacy SAR emulator (API 28 AVD) workaround, off unless asked for.
    pub avd_hack: bool,
}

impl<S: Sys> MagiskInit<S> {
    pub fn new(root: impl Into<PathBuf>, sys: S, config: BootConfig, argv: Vec<OsString>) -> Self {
        Self {
            root: root.into(),
            sys,
            config,
            argv,
            mounts: MountList::new(),
            self_image: MappedImage::empty(),
            magisk_cfg: Vec::new(),
            overlays: Vec::new(),
            rc_scripts: Vec::new(),
            rules_dir: None,
            policy_tool: None,
            policy: Box::new(ToolPatcher),
            avd_hack: false,
        }
    }

    pub fn with_self_image(mut self, image: MappedImage) -> Self {
        self.self_image = image;
        self
    }

    pub fn with_policy_patcher(mut self, patcher: Box<dyn PolicyPatcher>) -> Self {
        self.policy = patcher;
        self
    }

    /// Resolve a device absolute path against the context root.
    pub fn path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.path(path).symlink_metadata().is_ok()
    }

    pub fn read_dt_fstab(&self) -> Vec<FstabEntry> {
        let dt_dir = self.path(&self.config.dt_dir);
        read_dt_fstab(dt_dir)
    }

    /// Take the config saved next to the stock init, if the ramdisk has one.
    pub fn load_backup_config(&mut self) -> Result<()> {
        for cfg in [BACKUP_CONFIG, DATA_BACKUP_CONFIG] {
            let path = self.path(cfg);
            if !path.is_file() {
                continue;
            }
            let image = MappedImage::open(&path)?;
            self.magisk_cfg = image.as_bytes().to_vec();
            log::debug!("Loaded config from {cfg}");
            break;
        }
        Ok(())
    }

    /// Ramdisk backup config first, the copy embedded in ourselves after.
    pub fn load_magisk_config(&mut self) -> Result<()> {
        if !self.magisk_cfg.is_empty() {
            return Ok(());
        }
        if let Some(embedded) = self.self_image.embedded()? {
            self.magisk_cfg = embedded.config.to_vec();
        }
        let cfg = self.magisk_config();
        log::debug!(
            "Magisk config: KEEPVERITY={} KEEPFORCEENCRYPT={} RECOVERYMODE={}",
            cfg.keep_verity(),
            cfg.keep_force_encrypt(),
            cfg.recovery_mode()
        );
        Ok(())
    }

    pub fn magisk_config(&self) -> MagiskConfig {
        MagiskConfig::parse(&self.magisk_cfg)
    }

    /// Mount a tmpfs and remember it.
    pub fn mount_tmpfs(&mut self, source: &str, target: &str, record: bool) -> Result<()> {
        let path = self.path(target);
        crate::utils::ensure_dir_exists(&path)?;
        self.sys.mount(
            source,
            &path,
            "tmpfs",
            rustix::mount::MountFlags::empty(),
            Some("mode=755"),
        )?;
        if record {
            self.mounts.push(target);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::fs;

    use super::{sepolicy::testing::AppendPatcher, *};
    use crate::{image::testing::build_image, sys::testing::RecordingSys};

    pub const MAGISK_BODY: &[u8] = b"magisk runtime binary";
    pub const POLICY_BODY: &[u8] = b"policy tool binary";

    pub fn argv() -> Vec<OsString> {
        vec!["/init".into(), "second".into()]
    }

    pub fn context(root: &Path, config: BootConfig, rootfs: bool) -> MagiskInit<RecordingSys> {
        let bytes = build_image(
            b"\x7fELF magiskinit",
            &[("magisk", 0o755, MAGISK_BODY), ("magiskpolicy", 0o755, POLICY_BODY)],
            b"KEEPVERITY=false\n",
        );
        let image_path = root.join("../magiskinit.img");
        let image = crate::image::testing::write_image(&image_path, &bytes);
        MagiskInit::new(root, RecordingSys::new(root, rootfs), config, argv())
            .with_self_image(image)
            .with_policy_patcher(Box::new(AppendPatcher))
    }

    pub fn write(root: &Path, path: &str, content: &[u8]) {
        let path = root.join(path.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Scratch layout: `<tmp>/root` is `/`, the self image sits beside it.
    pub fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        (dir, root)
    }
}
