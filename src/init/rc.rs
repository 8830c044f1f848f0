// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fmt::Write as _, fs};

use anyhow::{Context, Result};
use rand::{Rng, distr::Alphanumeric};

use super::MagiskInit;
use crate::{
    defs::MAGISK_BIN,
    sys::Sys,
    utils::{atomic_write, ensure_dir_exists},
};

const SERVICE_SECLABEL: &str = "u:r:magisk:s0";

fn random_name() -> String {
    let len = rand::rng().random_range(7..=14);
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Copy `rc` with the known conflicting lines neutralised, then append the
/// overlay scripts and the runtime's boot services.
pub fn patch_rc(rc: &str, scripts: &[String], tmp: &str) -> String {
    let mut out = String::with_capacity(rc.len() + 1024);
    for line in rc.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("start vaultkeeper") {
            log::debug!("Remove vaultkeeper");
            let _ = writeln!(out, "#{line}");
        } else if trimmed.starts_with("service flash_recovery") {
            log::debug!("Remove flash_recovery");
            out.push_str("service flash_recovery /system/bin/xxxxx\n");
        } else if trimmed.starts_with("on property:persist.sys.zygote.early=") {
            log::debug!("Invalidate persist.sys.zygote.early");
            out.push_str("on property:persist.sys.zygote.early.xxxxx=true\n");
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    for script in scripts {
        out.push('\n');
        out.push_str(script);
        if !script.ends_with('\n') {
            out.push('\n');
        }
    }

    let bin = format!("{}/{MAGISK_BIN}", tmp.trim_end_matches('/'));
    for (trigger, arg) in [
        ("post-fs-data", "--post-fs-data"),
        ("nonencrypted", "--service"),
        ("property:sys.boot_completed=1", "--boot-complete"),
    ] {
        let name = random_name();
        let _ = write!(
            out,
            "\non {trigger}\n    start {name}\n\nservice {name} {bin} {arg}\n    user root\n    seclabel {SERVICE_SECLABEL}\n    oneshot\n"
        );
    }
    out
}

impl<S: Sys> MagiskInit<S> {
    /// Patch the init.rc at `src` into `dst`. `tmp` is where the runtime lives.
    pub fn patch_init_rc(&mut self, src: &str, dst: &str, tmp: &str) -> Result<()> {
        let src_path = self.path(src);
        let rc = fs::read_to_string(&src_path)
            .with_context(|| format!("Failed to read {}", src_path.display()))?;
        let patched = patch_rc(&rc, &self.rc_scripts, tmp);

        let dst_path = self.path(dst);
        if let Some(parent) = dst_path.parent() {
            ensure_dir_exists(parent)?;
        }
        log::info!("Patch init.rc: {} -> {}", src, dst);
        atomic_write(&dst_path, patched)
    }
}
