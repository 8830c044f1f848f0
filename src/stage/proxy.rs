// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;

use anyhow::{Context, Result};

use super::Handoff;
use crate::{
    defs::{BACKUP_DIR, CONFIG_FILE, ROOT_MIRROR_DIR, RULES_LINK, RUNTIME_ENTRY, SBIN_DIR},
    image::MappedImage,
    init::MagiskInit,
    sys::Sys,
    utils::{force_symlink, rm_rf},
};

/// Invoked as `/sbin/magisk` on a legacy rootfs: rebuild `/sbin` as the
/// runtime's tmpfs and hand over to the real runtime binary.
pub fn run<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<Handoff> {
    let root = ctx.path("/");
    ctx.sys.remount_rw(&root)?;

    let sbin = ctx.path(SBIN_DIR);
    let entry = ctx.path(RUNTIME_ENTRY);
    ctx.self_image = MappedImage::open(&entry)?;
    // Left by the rootfs stage; the tmpfs below hides them.
    let saved_config = sbin.join(CONFIG_FILE);
    if saved_config.is_file() {
        ctx.magisk_cfg = fs::read(&saved_config)
            .with_context(|| format!("Failed to read {}", saved_config.display()))?;
    }
    let rules = fs::read_link(sbin.join(RULES_LINK)).ok();
    rm_rf(&entry)?;
    rm_rf(ctx.path(BACKUP_DIR))?;

    // Data partitions belong to the system by now; no probing here.
    ctx.stage_tmp(SBIN_DIR)?;
    if let Some(rules) = rules {
        log::info!("Rules dir: {}", rules.display());
        force_symlink(rules, sbin.join(RULES_LINK))?;
    }

    let mirror = ctx.path(ROOT_MIRROR_DIR);
    if mirror.is_dir() {
        for item in fs::read_dir(&mirror)
            .with_context(|| format!("Failed to read {}", mirror.display()))?
            .flatten()
        {
            let link = sbin.join(item.file_name());
            if link.symlink_metadata().is_ok() {
                continue;
            }
            let target = format!("{ROOT_MIRROR_DIR}/{}", item.file_name().to_string_lossy());
            force_symlink(target, link)?;
        }
    }

    Ok(Handoff::new(RUNTIME_ENTRY, ctx.argv.clone()).with_env("REMOUNT_ROOT", "1"))
}

#[cfg(test)]
mod tests {
    use std::{ffi::OsString, path::Path};

    use super::*;
    use crate::{
        block::testing::add_block,
        config::BootConfig,
        image::testing::build_image,
        init::testing::{MAGISK_BODY, POLICY_BODY, context, scratch, write},
        sys::testing::Call,
    };

    #[test]
    fn proxy_rebuilds_sbin() {
        let (_dir, root) = scratch();
        let image = build_image(
            b"\x7fELF magiskinit copy",
            &[("magisk", 0o755, MAGISK_BODY), ("magiskpolicy", 0o755, POLICY_BODY)],
            b"",
        );
        write(&root, "/sbin/magisk", &image);
        write(&root, "/root/adbd", b"adbd");
        write(&root, "/.backup/init", b"stock init");

        let mut ctx = context(&root, BootConfig::default(), true);
        ctx.argv = vec!["/sbin/magisk".into(), "--post-fs-data".into()];
        let handoff = run(&mut ctx).unwrap();

        assert_eq!(ctx.sys.calls.first(), Some(&Call::RemountRw(root.clone())));
        assert!(!root.join(".backup").exists());
        assert_eq!(fs::read(root.join("sbin/magisk")).unwrap(), MAGISK_BODY);
        assert_eq!(fs::read(root.join("sbin/magiskinit")).unwrap(), image);
        assert_eq!(fs::read_link(root.join("sbin/adbd")).unwrap(), Path::new("/root/adbd"));

        assert_eq!(handoff.path, Path::new("/sbin/magisk"));
        assert_eq!(
            handoff.argv,
            vec![OsString::from("/sbin/magisk"), OsString::from("--post-fs-data")]
        );
        assert_eq!(
            handoff.env,
            vec![(OsString::from("REMOUNT_ROOT"), OsString::from("1"))]
        );
    }

    #[test]
    fn proxy_keeps_saved_state_without_probing() {
        let (_dir, root) = scratch();
        let image = build_image(
            b"\x7fELF magiskinit copy",
            &[("magisk", 0o755, MAGISK_BODY), ("magiskpolicy", 0o755, POLICY_BODY)],
            b"KEEPVERITY=false\n",
        );
        write(&root, "/sbin/magisk", &image);
        write(&root, "/sbin/.magisk/config", b"KEEPVERITY=true\nPREINITDEVICE=cache\n");
        std::os::unix::fs::symlink(
            "/sbin/.magisk/mirror/data/adb/modules",
            root.join("sbin/.magisk/sepolicy.rules"),
        )
        .unwrap();
        add_block(&root.join("sys/dev/block"), "259:5", "sda5", "userdata");
        add_block(&root.join("sys/dev/block"), "259:9", "sda9", "cache");

        let mut ctx = context(&root, BootConfig::default(), true);
        ctx.argv = vec!["/sbin/magisk".into()];
        run(&mut ctx).unwrap();

        assert!(ctx.magisk_config().keep_verity());
        assert_eq!(
            fs::read(root.join("sbin/.magisk/config")).unwrap(),
            b"KEEPVERITY=true\nPREINITDEVICE=cache\n"
        );
        assert_eq!(
            fs::read_link(root.join("sbin/.magisk/sepolicy.rules")).unwrap(),
            Path::new("/sbin/.magisk/mirror/data/adb/modules")
        );
        // Only the tmpfs; no block node or partition mount.
        assert_eq!(ctx.sys.count(|c| matches!(c, Call::Mount { .. })), 1);
        assert_eq!(ctx.sys.count(|c| matches!(c, Call::Mknod(_))), 0);
        assert!(ctx.rules_dir.is_none());
    }
}
