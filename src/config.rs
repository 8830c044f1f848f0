// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;

use serde::Serialize;

use crate::defs::DEFAULT_DT_DIR;

const SLOT_MAX: usize = 2;
const DT_DIR_MAX: usize = 63;
const SHORT_MAX: usize = 31;

/// Flags and identifiers handed to us by the bootloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootConfig {
    pub skip_initramfs: bool,
    pub force_normal_boot: bool,
    pub rootwait: bool,
    pub emulator: bool,
    pub slot: String,
    pub dt_dir: String,
    pub fstab_suffix: String,
    pub hardware: String,
    pub hardware_plat: String,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            skip_initramfs: false,
            force_normal_boot: false,
            rootwait: false,
            emulator: false,
            slot: String::new(),
            dt_dir: DEFAULT_DT_DIR.to_string(),
            fstab_suffix: String::new(),
            hardware: String::new(),
            hardware_plat: String::new(),
        }
    }
}

fn bounded(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

impl BootConfig {
    /// Build from kernel key/value pairs. Later pairs override earlier ones,
    /// unknown keys are ignored.
    pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "androidboot.slot_suffix" => config.slot = bounded(value, SLOT_MAX),
                "androidboot.slot" => {
                    config.slot = bounded(&format!("_{value}"), SLOT_MAX);
                }
                "skip_initramfs" => config.skip_initramfs = true,
                "androidboot.force_normal_boot" => {
                    config.force_normal_boot = value == "1";
                }
                "rootwait" => config.rootwait = true,
                "androidboot.android_dt_dir" => config.dt_dir = bounded(value, DT_DIR_MAX),
                "androidboot.fstab_suffix" => config.fstab_suffix = bounded(value, SHORT_MAX),
                "androidboot.hardware" => config.hardware = bounded(value, SHORT_MAX),
                "androidboot.hardware.platform" => {
                    config.hardware_plat = bounded(value, SHORT_MAX);
                }
                "qemu" => config.emulator = true,
                _ => {}
            }
        }
        config
    }

    pub fn print(&self) {
        match serde_json::to_string(self) {
            Ok(json) => log::debug!("Boot config: {json}"),
            Err(e) => log::debug!("Boot config: {self:?} ({e})"),
        }
    }
}

/// The runtime's own settings, `KEY=value` per line.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MagiskConfig {
    values: BTreeMap<String, String>,
}

impl MagiskConfig {
    pub fn parse(raw: &[u8]) -> Self {
        let values = String::from_utf8_lossy(raw)
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.starts_with('#') {
                    return None;
                }
                let (k, v) = line.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v == "true" || v == "1")
    }

    pub fn keep_verity(&self) -> bool {
        self.flag("KEEPVERITY")
    }

    pub fn keep_force_encrypt(&self) -> bool {
        self.flag("KEEPFORCEENCRYPT")
    }

    pub fn recovery_mode(&self) -> bool {
        self.flag("RECOVERYMODE")
    }

    pub fn preinit_device(&self) -> Option<&str> {
        self.get("PREINITDEVICE").filter(|v| !v.is_empty())
    }
}
