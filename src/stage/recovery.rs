// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;

use super::Handoff;
use crate::{defs::BACKUP_DIR, init::MagiskInit, sys::Sys, utils::rm_rf};

/// Booting recovery: put the stock ramdisk back and stay out of the way.
pub fn run<S: Sys>(ctx: &mut MagiskInit<S>) -> Result<Handoff> {
    if !ctx.restore_ramdisk_init()? {
        log::warn!("No stock init backup, handing over as is");
    }
    rm_rf(ctx.path(BACKUP_DIR))?;
    Ok(ctx.exec_init())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        config::BootConfig,
        init::testing::{context, scratch, write},
    };

    #[test]
    fn stock_ramdisk_is_restored() {
        let (_dir, root) = scratch();
        write(&root, "/init", b"magiskinit");
        write(&root, "/.backup/init", b"stock init");
        write(&root, "/.backup/.magisk", b"RECOVERYMODE=true\n");
        write(&root, "/sbin/recovery", b"twrp");

        let mut ctx = context(&root, BootConfig::default(), true);
        run(&mut ctx).unwrap();
        assert_eq!(fs::read(root.join("init")).unwrap(), b"stock init");
        assert!(!root.join(".backup").exists());
        assert!(ctx.sys.calls.is_empty());
    }
}
