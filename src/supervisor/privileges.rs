//! # Privilege manager: capabilities and identity drops.
//!
//! Two capability operations: keep capabilities across a UID change, and
//! raise a set of ambient capabilities resolved from human-readable names
//! (fail-fast on an unknown name). The identity drop resolves a passwd
//! entry, collects supplementary groups (capped at 50 to bound the buffer),
//! then applies setgroups, setgid, setuid in that order.
//!
//! On platforms without capability sets the capability calls degrade to
//! syntactic validation; the UID/GID drop still applies.

use std::io;

use crate::error::ArtifactError;

/// Maximum supplementary groups considered for a user.
const MAX_SUPPLEMENTARY_GROUPS: usize = 50;

/// Linux capability names in bit order, `CAP_CHOWN` first.
const CAPABILITY_NAMES: [&str; 41] = [
    "chown",
    "dac_override",
    "dac_read_search",
    "fowner",
    "fsetid",
    "kill",
    "setgid",
    "setuid",
    "setpcap",
    "linux_immutable",
    "net_bind_service",
    "net_broadcast",
    "net_admin",
    "net_raw",
    "ipc_lock",
    "ipc_owner",
    "sys_module",
    "sys_rawio",
    "sys_chroot",
    "sys_ptrace",
    "sys_pacct",
    "sys_admin",
    "sys_boot",
    "sys_nice",
    "sys_resource",
    "sys_time",
    "sys_tty_config",
    "mknod",
    "lease",
    "audit_write",
    "audit_control",
    "setfcap",
    "mac_override",
    "mac_admin",
    "syslog",
    "wake_alarm",
    "block_suspend",
    "audit_read",
    "perfmon",
    "bpf",
    "checkpoint_restore",
];

/// Resolves capability names (`CAP_NET_ADMIN`, `cap_net_admin` or
/// `net_admin`) to their bit values, failing fast on an unknown name.
pub fn resolve_capabilities(names: &[String]) -> Result<Vec<u32>, ArtifactError> {
    names
        .iter()
        .map(|name| {
            let normalized = name.to_ascii_lowercase();
            let stripped = normalized.strip_prefix("cap_").unwrap_or(&normalized);
            CAPABILITY_NAMES
                .iter()
                .position(|known| *known == stripped)
                .map(|bit| bit as u32)
                .ok_or_else(|| ArtifactError::CapabilityUnknown { name: name.clone() })
        })
        .collect()
}

/// A passwd entry resolved ahead of fork, so the child only issues
/// syscalls.
#[derive(Debug, Clone)]
pub struct ResolvedUser {
    pub name: String,
    #[cfg(unix)]
    pub uid: nix::unistd::Uid,
    #[cfg(unix)]
    pub gid: nix::unistd::Gid,
    #[cfg(unix)]
    pub groups: Vec<nix::unistd::Gid>,
}

#[cfg(unix)]
pub fn resolve_user(name: &str) -> Result<ResolvedUser, String> {
    use nix::unistd::{getgrouplist, User};
    use std::ffi::CString;

    let user = User::from_name(name)
        .map_err(|e| format!("could not read passwd entry for '{name}': {e}"))?
        .ok_or_else(|| format!("no passwd entry for user '{name}'"))?;

    let c_name =
        CString::new(name).map_err(|_| format!("user name '{name}' contains a NUL byte"))?;
    let mut groups = getgrouplist(&c_name, user.gid)
        .map_err(|e| format!("could not get supplementary groups for '{name}': {e}"))?;
    groups.truncate(MAX_SUPPLEMENTARY_GROUPS);

    Ok(ResolvedUser {
        name: name.to_string(),
        uid: user.uid,
        gid: user.gid,
        groups,
    })
}

/// Applies the identity: setgroups, then setgid, then setuid. Any failure
/// is fatal for the caller.
#[cfg(unix)]
pub fn apply_identity(user: &ResolvedUser) -> io::Result<()> {
    use nix::unistd::{setgid, setgroups, setuid};

    setgroups(&user.groups).map_err(|e| io_error("setgroups", e))?;
    setgid(user.gid).map_err(|e| io_error("setgid", e))?;
    setuid(user.uid).map_err(|e| io_error("setuid", e))?;
    Ok(())
}

/// Resolves and applies an identity drop in one step (manager-side path).
#[cfg(unix)]
pub fn drop_privileges(name: &str) -> Result<(), String> {
    let user = resolve_user(name)?;
    apply_identity(&user).map_err(|e| e.to_string())
}

#[cfg(unix)]
fn io_error(call: &str, errno: nix::errno::Errno) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{call} failed: {errno}"))
}

/// Sets the keep-capabilities bit so raised capabilities survive the
/// subsequent UID change.
#[cfg(target_os = "linux")]
pub fn keep_caps() -> io::Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn keep_caps() -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
mod capset {
    //! Raw capget/capset plumbing for the inheritable set.

    use std::io;

    const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

    #[repr(C)]
    struct CapUserHeader {
        version: u32,
        pid: i32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    struct CapUserData {
        effective: u32,
        permitted: u32,
        inheritable: u32,
    }

    /// Adds `bits` to the process's inheritable capability set.
    pub(super) fn raise_inheritable(bits: &[u32]) -> io::Result<()> {
        let mut header = CapUserHeader {
            version: LINUX_CAPABILITY_VERSION_3,
            pid: 0,
        };
        let mut data = [CapUserData::default(); 2];

        let rc = unsafe { libc::syscall(libc::SYS_capget, &mut header, data.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        for bit in bits {
            data[(bit / 32) as usize].inheritable |= 1 << (bit % 32);
        }
        let rc = unsafe { libc::syscall(libc::SYS_capset, &header, data.as_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Raises the given capabilities in the inheritable and ambient sets.
///
/// The bits must already be resolved via [`resolve_capabilities`]; a bit
/// missing from the permitted set makes the ambient raise fail, which the
/// spawn path reports through the pre-exec diagnostic channel.
#[cfg(target_os = "linux")]
pub fn set_ambient_caps(bits: &[u32]) -> io::Result<()> {
    if bits.is_empty() {
        return Ok(());
    }
    capset::raise_inheritable(bits)?;
    for bit in bits {
        let rc = unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_RAISE,
                *bit as libc::c_ulong,
                0,
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn set_ambient_caps(_bits: &[u32]) -> io::Result<()> {
    Ok(())
}
