// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;

use super::Handoff;
use crate::{
    defs::{DATA_INIT, INIT_PATH, SYSTEM_INIT},
    init::MagiskInit,
    sys::Sys,
    utils::{force_symlink, rm_rf},
};

pub fn run<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<Handoff> {
    prepare(ctx)?;
    if ctx.sys.is_rootfs() {
        force_symlink(SYSTEM_INIT, ctx.path(INIT_PATH))?;
        ctx.patch_rw_root()?;
    } else {
        ctx.patch_ro_root()?;
    }
    Ok(ctx.exec_init())
}

fn prepare<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<()> {
    // Left behind by the legacy SAR first stage; absent otherwise.
    for target in [INIT_PATH, SYSTEM_INIT] {
        let path = ctx.path(target);
        if let Err(e) = ctx.sys.unmount(&path) {
            log::debug!("{e:#}");
        }
    }
    rm_rf(ctx.path(DATA_INIT))?;
    ctx.set_argv0(SYSTEM_INIT);
    ctx.backup_files()
}
