// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, os::unix::fs::PermissionsExt};

use anyhow::{Context, Result};

use super::Handoff;
use crate::{
    defs::{DATA_BACKUP_CONFIG, DATA_INIT, DATA_OVERLAY_DIR, INIT_PATH, REDIR_PATH, SYSTEM_INIT},
    image::hexpatch,
    init::MagiskInit,
    sys::Sys,
    utils::{ensure_dir_exists, rm_rf},
};

const KEEP_IN_ROOTFS: &[&str] = &["proc", "sys", "dev"];

pub fn run<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<Handoff> {
    early_mount(ctx)?;
    if ctx.exists("/apex") {
        first_stage_prep(ctx)?;
    } else {
        ctx.set_argv0(SYSTEM_INIT);
        ctx.patch_ro_root()?;
    }
    Ok(ctx.exec_init())
}

fn early_mount<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<()> {
    ctx.backup_files()?;

    log::debug!("Cleanup rootfs");
    for entry in fs::read_dir(&ctx.root)?.flatten() {
        let name = entry.file_name();
        if KEEP_IN_ROOTFS.iter().any(|k| name == *k) {
            continue;
        }
        rm_rf(entry.path())?;
    }

    ctx.mount_tmpfs("tmpfs", "/dev", true)?;
    // switch_root carries /dev, and the root node in it, into the system.
    ctx.mount_system_root()?;
    ctx.mount_with_dt()
}

/// Two-stage SAR: stage everything under a tmpfs `/data` and make the
/// stock init exec us again through a patched copy bound over `/init`.
fn first_stage_prep<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<()> {
    ctx.mount_tmpfs("tmpfs", "/data", false)?;
    ctx.dump_self(&ctx.path(REDIR_PATH), 0o755)?;

    let overlay = ctx.path(DATA_OVERLAY_DIR);
    for file in std::mem::take(&mut ctx.overlays) {
        file.restore(&overlay)?;
    }
    let config = ctx.path(DATA_BACKUP_CONFIG);
    if let Some(parent) = config.parent() {
        ensure_dir_exists(parent)?;
    }
    ctx.load_magisk_config()?;
    fs::write(&config, &ctx.magisk_cfg)?;

    let init = ctx.path(INIT_PATH);
    let mut buf =
        fs::read(&init).with_context(|| format!("Failed to read {}", init.display()))?;
    let hits = hexpatch(&mut buf, SYSTEM_INIT.as_bytes(), REDIR_PATH.as_bytes());
    log::info!("Patch {INIT_PATH} into {DATA_INIT}: {} hits", hits.len());
    let patched = ctx.path(DATA_INIT);
    fs::write(&patched, buf)?;
    fs::set_permissions(&patched, fs::Permissions::from_mode(0o750))?;
    ctx.sys.bind_mount(&patched, &init)
}
