// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

mod block;
mod cmdline;
mod config;
mod defs;
mod fstab;
mod image;
mod init;
mod mount;
mod stage;
mod sys;
mod utils;

use std::{env, ffi::OsString, path::Path};

use anyhow::Result;
use rustix::mount::MountFlags;

use config::BootConfig;
use image::MappedImage;
use init::MagiskInit;
use stage::{BootStage, Handoff};
use sys::{LinuxSys, Sys};

/// The kernel hands us an empty root; everything below needs these.
fn mount_pseudo_fs(ctx: &mut MagiskInit<LinuxSys>) -> Result<()> {
    let pseudo = [("proc", "/proc", "/proc/self"), ("sysfs", "/sys", "/sys/block")];
    for (fstype, target, probe) in pseudo {
        if Path::new(probe).exists() {
            continue;
        }
        utils::ensure_dir_exists(target)?;
        ctx.sys
            .mount(fstype, Path::new(target), fstype, MountFlags::empty(), None)?;
        ctx.mounts.push(target);
    }
    Ok(())
}

fn run() -> Result<Handoff> {
    // SAFETY: umask only touches process state.
    unsafe { libc::umask(0) };

    let argv: Vec<OsString> = env::args_os().collect();
    let mut ctx = MagiskInit::new("/", LinuxSys, BootConfig::default(), argv);
    mount_pseudo_fs(&mut ctx)?;

    let pairs = cmdline::load_kernel_pairs();
    let verbose = cfg!(debug_assertions)
        || pairs.iter().any(|(k, v)| k == "magisk.debug" && v == "1");
    utils::init_logging(verbose, std::process::id() == 1)?;

    ctx.config = BootConfig::from_pairs(&pairs);
    ctx.config.print();
    ctx.avd_hack = ctx.config.emulator && cfg!(feature = "avd-hack");
    ctx.self_image = MappedImage::from_self()?;

    let stage = BootStage::select(&ctx);
    stage.run(&mut ctx)
}

fn main() {
    match run() {
        Ok(handoff) => handoff.exec(),
        Err(e) => {
            log::error!("Fatal Error: {:#}", e);
            eprintln!("Fatal Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
