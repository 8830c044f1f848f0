// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boot stage selection and the terminal handoff to the next program.

mod first_stage;
mod legacy_sar;
mod proxy;
mod recovery;
mod rootfs;
mod second_stage;

use std::{
    env,
    ffi::{CString, OsStr, OsString},
    fmt, fs,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{
    config::MagiskConfig,
    defs::{BACKUP_CONFIG, BACKUP_INIT, INIT_PATH, MAGISK_BIN, RECOVERY_MARKERS, SYSTEM_INIT},
    image::MappedImage,
    init::MagiskInit,
    sys::Sys,
};

const SELINUX_SETUP: &str = "selinux_setup";

/// What to do once the stage is done: replace this process with `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub path: PathBuf,
    pub argv: Vec<OsString>,
    /// Added on top of the inherited environment.
    pub env: Vec<(OsString, OsString)>,
}

impl Handoff {
    pub fn new(path: impl Into<PathBuf>, argv: Vec<OsString>) -> Self {
        Self {
            path: path.into(),
            argv,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn cstrings(&self) -> Result<(CString, Vec<CString>, Vec<CString>)> {
        let cstr = |s: &OsStr| CString::new(s.as_bytes()).context("NUL byte in exec argument");
        let path = cstr(self.path.as_os_str())?;
        let argv = self
            .argv
            .iter()
            .map(|a| cstr(a))
            .collect::<Result<Vec<_>>>()?;

        let mut vars: Vec<(OsString, OsString)> = env::vars_os()
            .filter(|(k, _)| !self.env.iter().any(|(key, _)| key == k))
            .collect();
        vars.extend(self.env.iter().cloned());
        let envp = vars
            .iter()
            .map(|(k, v)| {
                let mut kv = k.clone();
                kv.push("=");
                kv.push(v);
                cstr(&kv)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((path, argv, envp))
    }

    /// Replace the current process. Only returns by exiting.
    pub fn exec(self) -> ! {
        log::info!("Exec {} {:?}", self.path.display(), self.argv);
        log::logger().flush();
        let err = match self.cstrings() {
            Ok((path, argv, envp)) => match nix::unistd::execve(&path, &argv, &envp) {
                Ok(never) => match never {},
                Err(e) => anyhow::Error::from(e),
            },
            Err(e) => e,
        };
        log::error!("Failed to exec {}: {:#}", self.path.display(), err);
        log::logger().flush();
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    FirstStage,
    SecondStage,
    LegacySar,
    RootFs,
    Proxy,
    Recovery,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FirstStage => "FirstStageInit",
            Self::SecondStage => "SecondStageInit",
            Self::LegacySar => "LegacySARInit",
            Self::RootFs => "RootFSInit",
            Self::Proxy => "MagiskProxy",
            Self::Recovery => "RecoveryInit",
        };
        f.write_str(name)
    }
}

impl BootStage {
    pub fn select<S: Sys>(ctx: &MagiskInit<S>) -> Self {
        let argv0 = ctx.argv.first().map(Path::new);
        if argv0.and_then(Path::file_name) == Some(OsStr::new(MAGISK_BIN)) {
            return Self::Proxy;
        }
        if ctx.argv.get(1).is_some_and(|a| a == SELINUX_SETUP) {
            return Self::SecondStage;
        }
        if ctx.config.skip_initramfs {
            return Self::LegacySar;
        }
        if ctx.config.force_normal_boot {
            return Self::FirstStage;
        }
        if recovery_requested(ctx) {
            return Self::Recovery;
        }
        if is_two_stage(ctx) {
            return Self::FirstStage;
        }
        Self::RootFs
    }

    pub fn run<S: Sys>(self, ctx: &mut MagiskInit<S>) -> Result<Handoff> {
        log::info!("{self}");
        match self {
            Self::FirstStage => first_stage::run(ctx),
            Self::SecondStage => second_stage::run(ctx),
            Self::LegacySar => legacy_sar::run(ctx),
            Self::RootFs => rootfs::run(ctx),
            Self::Proxy => proxy::run(ctx),
            Self::Recovery => recovery::run(ctx),
        }
    }
}

fn recovery_requested<S: Sys>(ctx: &MagiskInit<S>) -> bool {
    let config = match fs::read(ctx.path(BACKUP_CONFIG)) {
        Ok(raw) => MagiskConfig::parse(&raw),
        Err(_) => ctx.magisk_config(),
    };
    config.recovery_mode() || RECOVERY_MARKERS.iter().any(|m| ctx.exists(m))
}

fn is_two_stage<S: Sys>(ctx: &MagiskInit<S>) -> bool {
    if ctx.exists("/apex") || ctx.exists(SYSTEM_INIT) {
        return true;
    }
    MappedImage::open(ctx.path(BACKUP_INIT))
        .is_ok_and(|init| init.contains(SELINUX_SETUP.as_bytes()))
}

impl<S: Sys> MagiskInit<S> {
    /// Unmount everything this stage mounted, newest first, and hand over to
    /// the real init.
    pub fn exec_init(&mut self) -> Handoff {
        if !self.mounts.is_empty() {
            log::debug!("Unmount {} stage mounts: {}", self.mounts.len(), self.mounts);
        }
        let targets: Vec<PathBuf> = self.mounts.iter().rev().map(|m| self.path(m)).collect();
        for target in targets {
            if let Err(e) = self.sys.unmount(&target) {
                log::warn!("Unmount {}: {:#}", target.display(), e);
            }
        }
        Handoff::new(INIT_PATH, self.argv.clone())
    }

    pub fn set_argv0(&mut self, argv0: &str) {
        match self.argv.first_mut() {
            Some(first) => *first = argv0.into(),
            None => self.argv.push(argv0.into()),
        }
    }

    /// Put the stock init saved in the ramdisk back at `/init`.
    pub fn restore_ramdisk_init(&mut self) -> Result<bool> {
        let backup = self.path(BACKUP_INIT);
        if !backup.exists() {
            return Ok(false);
        }
        let init = self.path(INIT_PATH);
        fs::rename(&backup, &init).with_context(|| {
            format!("Failed to restore {} to {}", backup.display(), init.display())
        })?;
        log::debug!("Restored stock init");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BootConfig,
        init::testing::{context, scratch, write},
        sys::testing::Call,
    };

    fn select(root: &Path, config: BootConfig, argv: &[&str]) -> BootStage {
        let mut ctx = context(root, config, true);
        ctx.argv = argv.iter().map(OsString::from).collect();
        BootStage::select(&ctx)
    }

    #[test]
    fn selection_order() {
        let (_dir, root) = scratch();
        let plain = BootConfig::default();
        let sar = BootConfig::from_pairs(&[("skip_initramfs", "")]);
        let normal = BootConfig::from_pairs(&[("androidboot.force_normal_boot", "1")]);

        assert_eq!(select(&root, sar.clone(), &["/sbin/magisk", "su"]), BootStage::Proxy);
        assert_eq!(
            select(&root, sar.clone(), &["/data/magiskinit", "selinux_setup"]),
            BootStage::SecondStage
        );
        assert_eq!(select(&root, sar, &["/init"]), BootStage::LegacySar);
        assert_eq!(select(&root, normal, &["/init"]), BootStage::FirstStage);
        assert_eq!(select(&root, plain.clone(), &["/init"]), BootStage::RootFs);

        write(&root, "/.backup/init", b"\x7fELF ... selinux_setup ...");
        assert_eq!(select(&root, plain.clone(), &["/init"]), BootStage::FirstStage);

        write(&root, "/.backup/.magisk", b"RECOVERYMODE=true\n");
        assert_eq!(select(&root, plain, &["/init"]), BootStage::Recovery);
    }

    #[test]
    fn exec_init_unmounts_in_reverse() {
        let (_dir, root) = scratch();
        let mut ctx = context(&root, BootConfig::default(), true);
        ctx.mounts.push("/dev");
        ctx.mounts.push("/system_root");
        ctx.mounts.push("/vendor");

        let handoff = ctx.exec_init();
        assert_eq!(handoff.path, Path::new("/init"));
        assert_eq!(handoff.argv, ctx.argv);
        assert_eq!(
            ctx.sys.calls,
            vec![
                Call::Unmount(root.join("vendor")),
                Call::Unmount(root.join("system_root")),
                Call::Unmount(root.join("dev")),
            ]
        );
    }

    #[test]
    fn handoff_environment_overrides() {
        let handoff = Handoff::new("/sbin/magisk", vec!["magisk".into()])
            .with_env("REMOUNT_ROOT", "1");
        let (path, argv, envp) = handoff.cstrings().unwrap();
        assert_eq!(path.as_bytes(), b"/sbin/magisk");
        assert_eq!(argv.len(), 1);
        assert_eq!(
            envp.iter()
                .filter(|e| e.as_bytes().starts_with(b"REMOUNT_ROOT="))
                .count(),
            1
        );
        assert!(envp.iter().any(|e| e.as_bytes() == b"REMOUNT_ROOT=1"));
    }
}
