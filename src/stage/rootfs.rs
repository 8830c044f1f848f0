// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Result, bail};

use super::Handoff;
use crate::{init::MagiskInit, sys::Sys};

pub fn run<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<Handoff> {
    early_mount(ctx)?;
    ctx.patch_rw_root()?;
    Ok(ctx.exec_init())
}

fn early_mount<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<()> {
    // patch_rw_root removes /.backup, config included.
    ctx.load_backup_config()?;
    if !ctx.restore_ramdisk_init()? {
        bail!("No stock init backup in the ramdisk");
    }
    ctx.mount_with_dt()
}
