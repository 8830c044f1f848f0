// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;

use anyhow::{Context, Result, bail};

use super::Handoff;
use crate::{
    defs::{BACKUP_DIR, DATA_OVERLAY_DIR, INIT_PATH, OVERLAY_DIR, REDIR_PATH, SYSTEM_INIT},
    image::hexpatch,
    init::MagiskInit,
    sys::Sys,
    utils::{atomic_write, mv_path, rm_rf},
};

/// Make the stock init run us again as its second stage.
pub fn run<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<Handoff> {
    prepare(ctx)?;
    Ok(ctx.exec_init())
}

fn prepare<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<()> {
    // Survives into the second stage, so it is not recorded.
    ctx.mount_tmpfs("tmpfs", "/data", false)?;
    ctx.dump_self(&ctx.path(REDIR_PATH), 0o755)?;

    if !ctx.restore_ramdisk_init()? {
        bail!("No stock init backup in the ramdisk");
    }

    for (src, dst) in [(BACKUP_DIR, "/data/.backup"), (OVERLAY_DIR, DATA_OVERLAY_DIR)] {
        let from = ctx.path(src);
        if from.is_dir() {
            mv_path(&from, &ctx.path(dst))?;
            rm_rf(&from)?;
        }
    }

    let init = ctx.path(INIT_PATH);
    let mut buf =
        fs::read(&init).with_context(|| format!("Failed to read {}", init.display()))?;
    let hits = hexpatch(&mut buf, SYSTEM_INIT.as_bytes(), REDIR_PATH.as_bytes());
    if hits.is_empty() {
        log::warn!("{SYSTEM_INIT} not referenced by {INIT_PATH}");
    } else {
        log::info!("Patch {INIT_PATH}: {SYSTEM_INIT} -> {REDIR_PATH} at {hits:?}");
    }
    atomic_write(&init, buf)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        config::BootConfig,
        init::testing::{context, scratch, write},
        sys::testing::Call,
    };

    #[test]
    fn stock_init_is_redirected() {
        let (_dir, root) = scratch();
        write(&root, "/init", b"magiskinit itself");
        write(&root, "/.backup/init", b"\x7fELF exec /system/bin/init selinux_setup");
        write(&root, "/.backup/.magisk", b"KEEPVERITY=true\n");
        write(&root, "/overlay.d/custom.rc", b"on boot\n");

        let config = BootConfig::from_pairs(&[("androidboot.force_normal_boot", "1")]);
        let mut ctx = context(&root, config, true);
        let handoff = run(&mut ctx).unwrap();

        assert_eq!(
            fs::read(root.join("init")).unwrap(),
            b"\x7fELF exec /data/magiskinit selinux_setup"
        );
        assert_eq!(fs::read(root.join("data/magiskinit")).unwrap(), ctx.self_image.as_bytes());
        assert_eq!(fs::read(root.join("data/.backup/.magisk")).unwrap(), b"KEEPVERITY=true\n");
        assert!(root.join("data/overlay.d/custom.rc").exists());
        assert!(!root.join(".backup").exists());
        assert!(!root.join("overlay.d").exists());

        assert!(ctx.sys.calls.contains(&Call::Mount {
            source: "tmpfs".into(),
            target: root.join("data"),
            fstype: "tmpfs".into(),
        }));
        assert!(ctx.mounts.is_empty());
        assert_eq!(handoff.path, Path::new("/init"));
    }

    #[test]
    fn missing_backup_is_fatal() {
        let (_dir, root) = scratch();
        let mut ctx = context(&root, BootConfig::default(), true);
        assert!(run(&mut ctx).is_err());
    }
}
