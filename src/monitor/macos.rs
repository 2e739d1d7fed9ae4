use crate::monitor::interfaces;
use crate::monitor::{
    CpuTicks, DiskCounters, DiskInfo, GlobalCpuTicks, HardwareInfo, MemoryTotals,
    NetworkCounters, NetworkInterfaceInfo, PlatformMetrics, ProcessDynamicInfo,
    ProcessStaticInfo,
};
use crate::process::{ProcessCpuTicks, ProcessStatus};
use crate::snapshot::extra;
use crate::types::{Result, TaskscopeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// libproc and mach host calls that libc does not bind on every version
extern "C" {
    fn proc_listpids(
        type_: u32,
        typeinfo: u32,
        buffer: *mut libc::c_void,
        buffersize: libc::c_int,
    ) -> libc::c_int;

    fn proc_pidinfo(
        pid: libc::c_int,
        flavor: libc::c_int,
        arg: u64,
        buffer: *mut libc::c_void,
        buffersize: libc::c_int,
    ) -> libc::c_int;

    fn mach_host_self() -> u32;

    fn host_processor_info(
        host: u32,
        flavor: libc::c_int,
        out_processor_count: *mut u32,
        out_processor_info: *mut *mut libc::c_int,
        out_processor_info_count: *mut u32,
    ) -> libc::c_int;

    fn host_statistics64(
        host: u32,
        flavor: libc::c_int,
        host_info_out: *mut libc::c_int,
        host_info_out_count: *mut u32,
    ) -> libc::c_int;
}

const PROC_ALL_PIDS: u32 = 1;
const PROC_PIDTASKINFO: libc::c_int = 4;
const PROC_PIDTBSDINFO: libc::c_int = 3;
const PROCESSOR_CPU_LOAD_INFO: libc::c_int = 2;
const CPU_STATE_MAX: usize = 4;
const CPU_STATE_USER: usize = 0;
const CPU_STATE_SYSTEM: usize = 1;
const CPU_STATE_IDLE: usize = 2;
const CPU_STATE_NICE: usize = 3;
const HOST_VM_INFO64: libc::c_int = 4;

// bsd/sys/proc.h
const SIDL: u32 = 1;
const SRUN: u32 = 2;
const SSLEEP: u32 = 3;
const SSTOP: u32 = 4;
const SZOMB: u32 = 5;

#[repr(C)]
struct ProcBsdInfo {
    pbi_flags: u32,
    pbi_status: u32,
    pbi_xstatus: u32,
    pbi_pid: u32,
    pbi_ppid: u32,
    pbi_uid: libc::uid_t,
    pbi_gid: libc::gid_t,
    pbi_ruid: libc::uid_t,
    pbi_rgid: libc::gid_t,
    pbi_svuid: libc::uid_t,
    pbi_svgid: libc::gid_t,
    rfu_1: u32,
    pbi_comm: [libc::c_char; 16],
    pbi_name: [libc::c_char; 32],
    pbi_nfiles: u32,
    pbi_pgid: u32,
    pbi_pjobc: u32,
    e_tdev: u32,
    e_tpgid: u32,
    pbi_nice: libc::c_int,
    pbi_start_tvsec: u64,
    pbi_start_tvusec: u64,
}

#[repr(C)]
struct ProcTaskInfo {
    pti_virtual_size: u64,
    pti_resident_size: u64,
    pti_total_user: u64,
    pti_total_system: u64,
    pti_threads_user: u64,
    pti_threads_system: u64,
    pti_policy: i32,
    pti_faults: i32,
    pti_pageins: i32,
    pti_cow_faults: i32,
    pti_messages_sent: i32,
    pti_messages_received: i32,
    pti_syscalls_mach: i32,
    pti_syscalls_unix: i32,
    pti_csw: i32,
    pti_threadnum: i32,
    pti_numrunning: i32,
    pti_priority: i32,
}

#[repr(C)]
#[derive(Default)]
struct SwapUsage {
    xsu_total: u64,
    xsu_avail: u64,
    xsu_used: u64,
    xsu_pagesize: u32,
    xsu_encrypted: bool,
}

pub struct MacOSMetrics {
    clock_ticks: u64,
    page_size: u64,
    /// Numerator and denominator turning mach absolute time into ns.
    timebase: (u64, u64),
}

impl MacOSMetrics {
    pub fn new() -> Result<Self> {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        let mut info = mach2::mach_time::mach_timebase_info { numer: 0, denom: 0 };
        let ret = unsafe { mach2::mach_time::mach_timebase_info(&mut info) };
        let timebase = if ret == 0 && info.denom != 0 {
            (info.numer as u64, info.denom as u64)
        } else {
            (1, 1)
        };

        Ok(MacOSMetrics {
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
            timebase,
        })
    }

    /// Task times come in mach absolute units; host ticks in `CLK_TCK`.
    fn to_ticks(&self, mach_time: u64) -> u64 {
        let nanos = mach_time as u128 * self.timebase.0 as u128 / self.timebase.1 as u128;
        (nanos * self.clock_ticks as u128 / 1_000_000_000) as u64
    }

    fn bsd_info(&self, pid: u32) -> Result<ProcBsdInfo> {
        let mut info: ProcBsdInfo = unsafe { mem::zeroed() };
        let size = mem::size_of::<ProcBsdInfo>() as libc::c_int;
        let ret = unsafe {
            proc_pidinfo(
                pid as libc::c_int,
                PROC_PIDTBSDINFO,
                0,
                &mut info as *mut _ as *mut libc::c_void,
                size,
            )
        };
        if ret != size {
            return Err(pid_error(pid, "bsd info"));
        }
        Ok(info)
    }

    fn task_info(&self, pid: u32) -> Result<ProcTaskInfo> {
        let mut info: ProcTaskInfo = unsafe { mem::zeroed() };
        let size = mem::size_of::<ProcTaskInfo>() as libc::c_int;
        let ret = unsafe {
            proc_pidinfo(
                pid as libc::c_int,
                PROC_PIDTASKINFO,
                0,
                &mut info as *mut _ as *mut libc::c_void,
                size,
            )
        };
        if ret != size {
            return Err(pid_error(pid, "task info"));
        }
        Ok(info)
    }
}

/// Distinguishes a vanished process from one we may not inspect.
fn pid_error(pid: u32, what: &str) -> TaskscopeError {
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    if errno == libc::ESRCH {
        TaskscopeError::NotFound(format!("Process {pid} not found"))
    } else if errno == libc::EPERM || errno == libc::EACCES {
        TaskscopeError::PermissionDenied(format!("Cannot read {what} of process {pid}"))
    } else if unsafe { libc::kill(pid as libc::pid_t, 0) } != 0
        && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
    {
        TaskscopeError::NotFound(format!("Process {pid} not found"))
    } else {
        TaskscopeError::Transient(format!("Failed to read {what} of process {pid}"))
    }
}

fn sysctl_by_name<T: Default>(name: &str) -> Result<T> {
    let c_name = CString::new(name)
        .map_err(|_| TaskscopeError::Parse(format!("invalid sysctl name {name}")))?;
    let mut value = T::default();
    let mut size = mem::size_of::<T>();
    let ret = unsafe {
        libc::sysctlbyname(
            c_name.as_ptr(),
            &mut value as *mut T as *mut libc::c_void,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(TaskscopeError::from_io(
            format!("sysctl {name}"),
            std::io::Error::last_os_error(),
        ));
    }
    Ok(value)
}

fn status_from_bsd(status: u32) -> ProcessStatus {
    match status {
        SRUN | SIDL => ProcessStatus::Running,
        SSLEEP => ProcessStatus::Sleeping,
        SSTOP => ProcessStatus::Suspended,
        SZOMB => ProcessStatus::Zombie,
        _ => ProcessStatus::Sleeping,
    }
}

fn c_chars_to_string(chars: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn process_path(pid: u32) -> String {
    use libc::{proc_pidpath, PROC_PIDPATHINFO_MAXSIZE};

    let mut path_buf = vec![0u8; PROC_PIDPATHINFO_MAXSIZE as usize];
    let ret = unsafe {
        proc_pidpath(
            pid as i32,
            path_buf.as_mut_ptr() as *mut _,
            path_buf.len() as u32,
        )
    };
    if ret <= 0 {
        return String::new();
    }
    unsafe {
        CStr::from_ptr(path_buf.as_ptr() as *const _)
            .to_string_lossy()
            .into_owned()
    }
}

/// Reads argv through `KERN_PROCARGS2`: an `argc` word, the exec path,
/// NUL padding, then `argc` NUL-terminated arguments.
fn process_arguments(pid: u32) -> Option<String> {
    let mut arg_max: libc::c_int = 0;
    let mut size = mem::size_of::<libc::c_int>();
    let mut mib = [libc::CTL_KERN, libc::KERN_ARGMAX];
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            2,
            &mut arg_max as *mut _ as *mut libc::c_void,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if ret != 0 || arg_max <= 0 {
        return None;
    }

    let mut buffer = vec![0u8; arg_max as usize];
    let mut size = buffer.len();
    let mut mib = [libc::CTL_KERN, libc::KERN_PROCARGS2, pid as libc::c_int];
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            3,
            buffer.as_mut_ptr() as *mut libc::c_void,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if ret != 0 || size < mem::size_of::<libc::c_int>() {
        return None;
    }
    parse_procargs(&buffer[..size])
}

fn parse_procargs(buffer: &[u8]) -> Option<String> {
    let word = mem::size_of::<libc::c_int>();
    let argc = libc::c_int::from_ne_bytes(buffer.get(..word)?.try_into().ok()?);
    let rest = &buffer[word..];

    // skip the exec path and the padding after it
    let path_end = rest.iter().position(|&b| b == 0)?;
    let args_start = path_end + rest[path_end..].iter().position(|&b| b != 0)?;

    let args: Vec<String> = rest[args_start..]
        .split(|&b| b == 0)
        .take(argc.max(0) as usize)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    Some(args.join(" "))
}

/// One `statfs` entry reduced to what disk discovery needs.
struct MountEntry {
    source: String,
    target: String,
    capacity_bytes: u64,
}

fn local_mounts() -> Result<Vec<MountEntry>> {
    let count = unsafe { libc::getfsstat(ptr::null_mut(), 0, libc::MNT_NOWAIT) };
    if count < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // room for mounts appearing between the two calls
    let mut stats: Vec<libc::statfs> = vec![unsafe { mem::zeroed() }; count as usize + 4];
    let size = (stats.len() * mem::size_of::<libc::statfs>()) as libc::c_int;
    let filled = unsafe { libc::getfsstat(stats.as_mut_ptr(), size, libc::MNT_NOWAIT) };
    if filled < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    stats.truncate(filled as usize);

    Ok(stats
        .iter()
        .filter(|stat| stat.f_flags & libc::MNT_LOCAL as u32 != 0)
        .map(|stat| MountEntry {
            source: c_chars_to_string(&stat.f_mntfromname),
            target: c_chars_to_string(&stat.f_mntonname),
            capacity_bytes: stat.f_blocks.saturating_mul(stat.f_bsize as u64),
        })
        .collect())
}

/// Groups mounts of `/dev/` devices into disks, ordered by device name.
fn disks_from_mounts(mounts: Vec<MountEntry>) -> Vec<DiskInfo> {
    let mut disks: Vec<DiskInfo> = Vec::new();
    for mount in mounts {
        let Some(name) = mount.source.strip_prefix("/dev/") else {
            continue;
        };
        match disks.iter_mut().find(|disk| disk.name == name) {
            Some(disk) => disk.mount_points.push(mount.target),
            None => disks.push(DiskInfo {
                name: name.to_string(),
                model: String::new(),
                mount_points: vec![mount.target],
                capacity_bytes: mount.capacity_bytes,
            }),
        }
    }
    disks.sort_by(|a, b| a.name.cmp(&b.name));
    disks
}

#[async_trait]
impl PlatformMetrics for MacOSMetrics {
    async fn hardware_info(&self) -> Result<HardwareInfo> {
        let logical: libc::c_int = sysctl_by_name("hw.logicalcpu")?;
        let physical: libc::c_int = sysctl_by_name("hw.physicalcpu").unwrap_or(logical);
        let memory: u64 = sysctl_by_name("hw.memsize")?;

        Ok(HardwareInfo {
            logical_cores: logical.max(1) as usize,
            physical_cores: physical.max(1) as usize,
            physical_memory_total: memory,
            page_size: self.page_size,
        })
    }

    async fn uptime(&self) -> Result<Duration> {
        #[derive(Default)]
        #[repr(C)]
        struct BootTime {
            tv_sec: libc::time_t,
            tv_usec: libc::suseconds_t,
        }
        let boot: BootTime = sysctl_by_name("kern.boottime")?;
        let booted = UNIX_EPOCH + Duration::new(boot.tv_sec as u64, boot.tv_usec as u32 * 1000);
        SystemTime::now()
            .duration_since(booted)
            .map_err(|e| TaskscopeError::Transient(format!("boot time in the future: {e}")))
    }

    async fn enumerate_processes(&self) -> Result<Vec<u32>> {
        let buffer_size = unsafe { proc_listpids(PROC_ALL_PIDS, 0, ptr::null_mut(), 0) };
        if buffer_size <= 0 {
            return Err(TaskscopeError::Transient(
                "Failed to get process list size".to_string(),
            ));
        }

        // room for processes spawned between the two calls
        let pid_count = (buffer_size as usize) / mem::size_of::<libc::pid_t>() + 64;
        let mut pids = vec![0 as libc::pid_t; pid_count];
        let bytes_returned = unsafe {
            proc_listpids(
                PROC_ALL_PIDS,
                0,
                pids.as_mut_ptr() as *mut libc::c_void,
                (pids.len() * mem::size_of::<libc::pid_t>()) as libc::c_int,
            )
        };
        if bytes_returned <= 0 {
            return Err(TaskscopeError::Transient(
                "Failed to get process list".to_string(),
            ));
        }

        let actual = (bytes_returned as usize) / mem::size_of::<libc::pid_t>();
        Ok(pids
            .into_iter()
            .take(actual)
            .filter(|&pid| pid > 0)
            .map(|pid| pid as u32)
            .collect())
    }

    async fn read_process_static_info(&self, pid: u32) -> Result<ProcessStaticInfo> {
        let bsd = self.bsd_info(pid)?;
        let path = process_path(pid);
        let name = match path.rsplit('/').next() {
            Some(file) if !file.is_empty() => file.to_string(),
            _ => c_chars_to_string(&bsd.pbi_comm),
        };
        let user_name = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(bsd.pbi_uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| bsd.pbi_uid.to_string());

        Ok(ProcessStaticInfo {
            name,
            command_line: process_arguments(pid).unwrap_or_else(|| path.clone()),
            path,
            description: String::new(),
            user_name,
            parent_pid: (bsd.pbi_ppid > 0).then_some(bsd.pbi_ppid),
            start_time: DateTime::<Utc>::from_timestamp(
                bsd.pbi_start_tvsec as i64,
                (bsd.pbi_start_tvusec as u32) * 1000,
            ),
        })
    }

    async fn read_process_dynamic_info(&self, pid: u32) -> Result<ProcessDynamicInfo> {
        let bsd = self.bsd_info(pid)?;
        let task = self.task_info(pid)?;

        Ok(ProcessDynamicInfo {
            // Darwin exposes no private/shared split through libproc
            private_working_set: task.pti_resident_size,
            cpu: ProcessCpuTicks {
                user: self.to_ticks(task.pti_total_user),
                system: self.to_ticks(task.pti_total_system),
            },
            status: status_from_bsd(bsd.pbi_status),
            start_ticks: Some(bsd.pbi_start_tvsec * 1_000_000 + bsd.pbi_start_tvusec),
        })
    }

    async fn read_global_cpu_ticks(&self) -> Result<GlobalCpuTicks> {
        let mut cpu_count: u32 = 0;
        let mut info: *mut libc::c_int = ptr::null_mut();
        let mut info_count: u32 = 0;
        let ret = unsafe {
            host_processor_info(
                mach_host_self(),
                PROCESSOR_CPU_LOAD_INFO,
                &mut cpu_count,
                &mut info,
                &mut info_count,
            )
        };
        if ret != 0 || info.is_null() {
            return Err(TaskscopeError::Transient(format!(
                "host_processor_info failed with {ret}"
            )));
        }

        let loads = unsafe { std::slice::from_raw_parts(info, info_count as usize) };
        let per_core: Vec<CpuTicks> = loads
            .chunks_exact(CPU_STATE_MAX)
            .take(cpu_count as usize)
            .map(|state| CpuTicks {
                busy: state[CPU_STATE_USER] as u32 as u64
                    + state[CPU_STATE_SYSTEM] as u32 as u64
                    + state[CPU_STATE_NICE] as u32 as u64,
                idle: state[CPU_STATE_IDLE] as u32 as u64,
            })
            .collect();

        unsafe {
            mach2::vm::mach_vm_deallocate(
                mach2::traps::mach_task_self(),
                info as u64,
                (info_count as usize * mem::size_of::<libc::c_int>()) as u64,
            );
        }

        let aggregate = per_core.iter().fold(CpuTicks::default(), |acc, t| CpuTicks {
            busy: acc.busy + t.busy,
            idle: acc.idle + t.idle,
        });
        Ok(GlobalCpuTicks {
            aggregate,
            per_core,
        })
    }

    async fn read_memory_totals(&self) -> Result<MemoryTotals> {
        let total: u64 = sysctl_by_name("hw.memsize")?;
        let mut stats: mach2::vm_statistics::vm_statistics64 = unsafe { mem::zeroed() };
        let mut count = (mem::size_of::<mach2::vm_statistics::vm_statistics64>()
            / mem::size_of::<libc::c_int>()) as u32;
        let ret = unsafe {
            host_statistics64(
                mach_host_self(),
                HOST_VM_INFO64,
                &mut stats as *mut _ as *mut libc::c_int,
                &mut count,
            )
        };
        if ret != 0 {
            return Err(TaskscopeError::Transient(format!(
                "host_statistics64 failed with {ret}"
            )));
        }

        let available_pages = stats.free_count as u64
            + stats.inactive_count as u64
            + stats.speculative_count as u64;
        Ok(MemoryTotals {
            total,
            available: (available_pages * self.page_size).min(total),
        })
    }

    async fn enumerate_disks(&self) -> Result<Vec<DiskInfo>> {
        Ok(disks_from_mounts(local_mounts()?))
    }

    // transfer statistics live in IOKit
    async fn read_disk_counters(&self, disk: &DiskInfo) -> Result<DiskCounters> {
        Err(TaskscopeError::Unsupported(format!(
            "disk counters for {}",
            disk.name
        )))
    }

    async fn enumerate_network_interfaces(&self) -> Result<Vec<NetworkInterfaceInfo>> {
        interfaces::list_interfaces()
    }

    async fn read_network_counters(
        &self,
        interface: &NetworkInterfaceInfo,
    ) -> Result<NetworkCounters> {
        let mut addrs: *mut libc::ifaddrs = ptr::null_mut();
        if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
            return Err(TaskscopeError::from_io(
                "getifaddrs",
                std::io::Error::last_os_error(),
            ));
        }

        let mut found = None;
        let mut cursor = addrs;
        while !cursor.is_null() {
            let ifa = unsafe { &*cursor };
            cursor = ifa.ifa_next;
            if ifa.ifa_addr.is_null() || ifa.ifa_data.is_null() {
                continue;
            }
            if unsafe { (*ifa.ifa_addr).sa_family } as libc::c_int != libc::AF_LINK {
                continue;
            }
            let name = unsafe { CStr::from_ptr(ifa.ifa_name) }.to_string_lossy();
            if name != interface.name {
                continue;
            }
            let data = unsafe { &*(ifa.ifa_data as *const libc::if_data) };
            found = Some(NetworkCounters {
                bytes_received: data.ifi_ibytes as u64,
                bytes_sent: data.ifi_obytes as u64,
            });
            break;
        }
        unsafe { libc::freeifaddrs(addrs) };

        found.ok_or_else(|| TaskscopeError::NotFound(format!("interface {}", interface.name)))
    }

    async fn read_extra_metrics(&self) -> Result<Vec<(&'static str, u64)>> {
        let swap: SwapUsage = sysctl_by_name("vm.swapusage")?;
        Ok(vec![
            (extra::SWAP_TOTAL_BYTES, swap.xsu_total),
            (extra::SWAP_USED_BYTES, swap.xsu_used),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_procargs() {
        let mut buffer = 2i32.to_ne_bytes().to_vec();
        buffer.extend_from_slice(b"/bin/sleep\0\0\0\0sleep\x0030\0PATH=/usr/bin\0");
        assert_eq!(parse_procargs(&buffer).unwrap(), "sleep 30");
    }

    #[test]
    fn test_disks_from_mounts() {
        let mount = |source: &str, target: &str| MountEntry {
            source: source.to_string(),
            target: target.to_string(),
            capacity_bytes: 500,
        };
        let disks = disks_from_mounts(vec![
            mount("/dev/disk3s1s1", "/"),
            mount("devfs", "/dev"),
            mount("/dev/disk3s5", "/System/Volumes/Data"),
            mount("/dev/disk3s5", "/System/Volumes/Data/home"),
        ]);
        let names: Vec<_> = disks.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["disk3s1s1", "disk3s5"]);
        assert_eq!(disks[1].mount_points.len(), 2);
        assert_eq!(disks[0].capacity_bytes, 500);
    }

    #[tokio::test]
    async fn test_reads_own_process() {
        let metrics = MacOSMetrics::new().unwrap();
        let pid = std::process::id();

        let info = metrics.read_process_static_info(pid).await.unwrap();
        assert!(!info.name.is_empty());

        let dynamic = metrics.read_process_dynamic_info(pid).await.unwrap();
        assert!(dynamic.private_working_set > 0);

        let ticks = metrics.read_global_cpu_ticks().await.unwrap();
        assert!(!ticks.per_core.is_empty());

        let disks = metrics.enumerate_disks().await.unwrap();
        assert!(disks.iter().any(|d| d.mount_points.iter().any(|m| m == "/")));
        assert!(matches!(
            metrics.read_disk_counters(&disks[0]).await,
            Err(TaskscopeError::Unsupported(_))
        ));
    }
}
