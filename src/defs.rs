// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub const DEFAULT_DT_DIR: &str = "/proc/device-tree/firmware/android";

pub const INIT_PATH: &str = "/init";
pub const SYSTEM_INIT: &str = "/system/bin/init";
pub const BACKUP_DIR: &str = "/.backup";
pub const BACKUP_INIT: &str = "/.backup/init";
pub const BACKUP_CONFIG: &str = "/.backup/.magisk";
pub const DATA_BACKUP_CONFIG: &str = "/data/.backup/.magisk";

pub const OVERLAY_DIR: &str = "/overlay.d";
pub const DATA_OVERLAY_DIR: &str = "/data/overlay.d";

// Same length as SYSTEM_INIT, the original init is patched in place.
pub const REDIR_PATH: &str = "/data/magiskinit";
pub const DATA_INIT: &str = "/data/init";

pub const SBIN_DIR: &str = "/sbin";
pub const ROOT_MIRROR_DIR: &str = "/root";
pub const DEBUG_RAMDISK: &str = "/debug_ramdisk";
pub const SYSTEM_ROOT: &str = "/system_root";
pub const DEV_ROOT: &str = "/dev/root";

pub const INIT_RC: &str = "/init.rc";
pub const NEW_INIT_RC: &str = "/system/etc/init/hw/init.rc";
pub const MONO_SEPOLICY: &str = "/sepolicy";
pub const VENDOR_PRECOMPILED: &str = "/vendor/etc/selinux/precompiled_sepolicy";

/// Runtime entry point written into a writable root.
pub const RUNTIME_ENTRY: &str = "/sbin/magisk";

// Layout of the injected runtime's tmp dir, relative to the tmp dir itself.
pub const INTERNAL_DIR: &str = ".magisk";
pub const MIRROR_DIR: &str = ".magisk/mirror";
pub const BLOCK_DIR: &str = ".magisk/block";
pub const ROOT_OVERLAY_DIR: &str = ".magisk/rootdir";
pub const OVERLAY_UPPER_DIR: &str = ".magisk/upper";
pub const OVERLAY_WORK_DIR: &str = ".magisk/work";
pub const NEW_ROOT_DIR: &str = ".magisk/newroot";
pub const CONFIG_FILE: &str = ".magisk/config";
pub const PATCHED_SEPOLICY: &str = ".magisk/sepolicy";
pub const RULES_LINK: &str = ".magisk/sepolicy.rules";

/// Scratch tmp used while patching a writable root; gone before handoff.
pub const PRE_TMP_DIR: &str = "/magisk";

pub const MAGISK_BIN: &str = "magisk";
pub const POLICY_BIN: &str = "magiskpolicy";
pub const SELF_BIN: &str = "magiskinit";

/// Payload entries that must exist after extraction.
pub const REQUIRED_PAYLOAD: &[&str] = &[MAGISK_BIN, POLICY_BIN];
pub const APPLETS: &[&str] = &["su", "resetprop"];

pub const SYSFS_BLOCK_DIR: &str = "/sys/dev/block";
pub const DEV_BLOCK_DIR: &str = "/dev/block";

pub const RECOVERY_MARKERS: &[&str] = &["/sbin/recovery", "/system/bin/recovery"];

/// Rules storage candidates in probe order: (partition names, mount dir name).
pub const RULES_CANDIDATES: &[(&[&str], &str)] = &[
    (&["userdata", "UDA"], "data"),
    (&["cache", "CAC"], "cache"),
    (&["metadata", "MDA"], "metadata"),
    (&["persist", "PER"], "persist"),
];

pub const CONTEXT_SYSTEM: &str = "u:object_r:system_file:s0";
pub const CONTEXT_ROOTFS: &str = "u:object_r:rootfs:s0";
