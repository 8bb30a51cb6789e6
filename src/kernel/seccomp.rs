// Syscall filtering for the evaluator thread.
// A classic-BPF denylist: the syscalls a snippet could use to reach files,
// the network, other processes or new namespaces return EPERM. Everything
// else (memory management, reads/writes on already-open pipes, exit) passes.

use crate::config::types::{Result, SandboxError};

const PR_SET_SECCOMP: libc::c_int = 22;
const SECCOMP_MODE_FILTER: libc::c_ulong = 2;

const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

/// Offsets into `struct seccomp_data`.
const DATA_NR_OFFSET: u32 = 0;
const DATA_ARCH_OFFSET: u32 = 4;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: u32 = 0xC000_003E;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: u32 = 0xC000_00B7;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("seccomp audit arch not defined for this architecture");

/// x32 ABI syscalls carry this bit on x86_64.
#[cfg(target_arch = "x86_64")]
const X32_SYSCALL_BIT: u32 = 0x4000_0000;

// Syscalls added after 5.x share one number across architectures.
const SYS_CLONE3: libc::c_long = 435;
const SYS_OPENAT2: libc::c_long = 437;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

const fn stmt(code: u16, k: u32) -> SockFilter {
    SockFilter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code, jt, jf, k }
}

/// Denied syscalls by name, for audit output and tests.
pub fn denied_syscalls() -> Vec<(&'static str, libc::c_long)> {
    let mut denied = vec![
        ("openat", libc::SYS_openat),
        ("openat2", SYS_OPENAT2),
        ("open_by_handle_at", libc::SYS_open_by_handle_at),
        ("name_to_handle_at", libc::SYS_name_to_handle_at),
        ("socket", libc::SYS_socket),
        ("socketpair", libc::SYS_socketpair),
        ("connect", libc::SYS_connect),
        ("bind", libc::SYS_bind),
        ("listen", libc::SYS_listen),
        ("accept4", libc::SYS_accept4),
        ("execve", libc::SYS_execve),
        ("execveat", libc::SYS_execveat),
        ("clone", libc::SYS_clone),
        ("clone3", SYS_CLONE3),
        ("kill", libc::SYS_kill),
        ("tkill", libc::SYS_tkill),
        ("tgkill", libc::SYS_tgkill),
        ("ptrace", libc::SYS_ptrace),
        ("process_vm_readv", libc::SYS_process_vm_readv),
        ("process_vm_writev", libc::SYS_process_vm_writev),
        ("mount", libc::SYS_mount),
        ("umount2", libc::SYS_umount2),
        ("pivot_root", libc::SYS_pivot_root),
        ("chroot", libc::SYS_chroot),
        ("unshare", libc::SYS_unshare),
        ("setns", libc::SYS_setns),
        ("mkdirat", libc::SYS_mkdirat),
        ("unlinkat", libc::SYS_unlinkat),
        ("renameat", libc::SYS_renameat),
        ("symlinkat", libc::SYS_symlinkat),
        ("linkat", libc::SYS_linkat),
    ];
    #[cfg(target_arch = "x86_64")]
    denied.extend([
        ("open", libc::SYS_open),
        ("creat", libc::SYS_creat),
        ("accept", libc::SYS_accept),
        ("fork", libc::SYS_fork),
        ("vfork", libc::SYS_vfork),
        ("mkdir", libc::SYS_mkdir),
        ("unlink", libc::SYS_unlink),
        ("rename", libc::SYS_rename),
        ("symlink", libc::SYS_symlink),
        ("link", libc::SYS_link),
    ]);
    denied
}

/// Build the BPF program. Foreign architectures are killed outright so the
/// syscall numbers below cannot be sidestepped through another ABI.
pub fn build_denylist_program() -> Vec<SockFilter> {
    let deny = SECCOMP_RET_ERRNO | (libc::EPERM as u32 & 0xffff);
    let mut program = vec![
        stmt(BPF_LD | BPF_W | BPF_ABS, DATA_ARCH_OFFSET),
        jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH, 1, 0),
        stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS),
        stmt(BPF_LD | BPF_W | BPF_ABS, DATA_NR_OFFSET),
    ];
    #[cfg(target_arch = "x86_64")]
    program.extend([
        jump(BPF_JMP | BPF_JGE | BPF_K, X32_SYSCALL_BIT, 0, 1),
        stmt(BPF_RET | BPF_K, deny),
    ]);
    for (_, nr) in denied_syscalls() {
        program.push(jump(BPF_JMP | BPF_JEQ | BPF_K, nr as u32, 0, 1));
        program.push(stmt(BPF_RET | BPF_K, deny));
    }
    program.push(stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
    program
}

/// Install the denylist on the calling thread only.
///
/// The caller must already have set `PR_SET_NO_NEW_PRIVS` (or hold
/// CAP_SYS_ADMIN). The filter is inherited by anything the thread spawns and
/// can never be removed.
pub fn install_denylist() -> Result<()> {
    let program = build_denylist_program();
    let len = u16::try_from(program.len())
        .map_err(|_| SandboxError::Seccomp("filter program too long".to_string()))?;
    let fprog = SockFprog {
        len,
        filter: program.as_ptr(),
    };

    // SAFETY: fprog points at `program`, which stays alive for the duration
    // of the call; the kernel copies the filter before returning.
    let rc = unsafe {
        libc::prctl(
            PR_SET_SECCOMP,
            SECCOMP_MODE_FILTER,
            &fprog as *const SockFprog,
            0,
            0,
        )
    };
    if rc != 0 {
        return Err(SandboxError::Seccomp(format!(
            "PR_SET_SECCOMP failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Check if syscall filtering is supported on this system
pub fn is_seccomp_supported() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/sys/kernel/seccomp").exists()
            || std::fs::read_to_string("/proc/self/status")
                .map(|status| status.lines().any(|l| l.starts_with("Seccomp:")))
                .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
