use crate::monitor::{
    CounterRead, CpuTicks, DiskCounters, DiskInfo, GlobalCpuTicks, HardwareInfo, MemoryTotals,
    NetworkCounters, NetworkInterfaceInfo, PlatformMetrics, ProcessDynamicInfo,
    ProcessStaticInfo,
};
use crate::process::{ProcessCpuTicks, ProcessStatus};
use crate::snapshot::extra;
use crate::types::{Result, TaskscopeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::slice;
use std::time::Duration;
use tracing::debug;
use winapi::ctypes::c_void;
use winapi::shared::minwindef::{DWORD, FALSE, FILETIME, LPVOID, ULONG};
use winapi::shared::netioapi::{FreeMibTable, GetIfTable2, PMIB_IF_TABLE2};
use winapi::shared::ntdef::ULARGE_INTEGER;
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_BUFFER_OVERFLOW, ERROR_FILE_NOT_FOUND, ERROR_INVALID_FUNCTION,
    ERROR_INVALID_PARAMETER, ERROR_NOT_READY, ERROR_NOT_SUPPORTED, ERROR_PATH_NOT_FOUND,
    ERROR_SUCCESS, NO_ERROR,
};
use winapi::shared::ws2def::SOCKET_ADDRESS;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{
    CreateFileW, GetDiskFreeSpaceExW, GetDriveTypeW, GetLogicalDriveStringsW, OPEN_EXISTING,
};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::DeviceIoControl;
use winapi::um::iphlpapi::GetAdaptersAddresses;
use winapi::um::iptypes::{
    GAA_FLAG_SKIP_ANYCAST, GAA_FLAG_SKIP_DNS_SERVER, GAA_FLAG_SKIP_MULTICAST,
    IP_ADAPTER_ADDRESSES, IP_ADAPTER_UNICAST_ADDRESS, PIP_ADAPTER_ADDRESSES,
};
use winapi::um::processthreadsapi::{GetProcessTimes, GetSystemTimes, OpenProcess};
use winapi::um::psapi::{
    EnumProcesses, GetPerformanceInfo, GetProcessMemoryInfo, PERFORMANCE_INFORMATION,
    PROCESS_MEMORY_COUNTERS, PROCESS_MEMORY_COUNTERS_EX,
};
use winapi::um::sysinfoapi::{
    GetSystemInfo, GetTickCount64, GlobalMemoryStatusEx, MEMORYSTATUSEX, SYSTEM_INFO,
};
use winapi::um::winbase::{QueryFullProcessImageNameW, DRIVE_FIXED};
use winapi::um::winioctl::{DISK_PERFORMANCE, IOCTL_DISK_PERFORMANCE};
use winapi::um::winnt::{
    FILE_SHARE_READ, FILE_SHARE_WRITE, HANDLE, PROCESS_QUERY_LIMITED_INFORMATION,
};

/// 100 ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

/// `SystemProcessorPerformanceInformation` class of `NtQuerySystemInformation`.
const SYSTEM_PROCESSOR_PERFORMANCE_INFORMATION: u32 = 8;
const IF_TYPE_SOFTWARE_LOOPBACK: u32 = 24;
const AF_UNSPEC: ULONG = 0;
const AF_INET: u16 = 2;
const AF_INET6: u16 = 23;

/// Per-processor times in 100 ns units; kernel time includes idle time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct ProcessorTimes {
    idle_time: i64,
    kernel_time: i64,
    user_time: i64,
    dpc_time: i64,
    interrupt_time: i64,
    interrupt_count: u32,
}

#[allow(non_snake_case)]
#[link(name = "ntdll")]
extern "system" {
    fn NtQuerySystemInformation(
        system_information_class: u32,
        system_information: *mut c_void,
        system_information_length: u32,
        return_length: *mut u32,
    ) -> i32;
}

pub struct WindowsMetrics {
    logical_cores: usize,
}

impl WindowsMetrics {
    pub fn new() -> Result<Self> {
        let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        Ok(WindowsMetrics {
            logical_cores: (info.dwNumberOfProcessors as usize).max(1),
        })
    }

    fn per_core_ticks(&self) -> Result<Vec<CpuTicks>> {
        let mut times = vec![ProcessorTimes::default(); self.logical_cores];
        let length = (times.len() * mem::size_of::<ProcessorTimes>()) as u32;
        let mut returned: u32 = 0;
        let status = unsafe {
            NtQuerySystemInformation(
                SYSTEM_PROCESSOR_PERFORMANCE_INFORMATION,
                times.as_mut_ptr() as *mut c_void,
                length,
                &mut returned,
            )
        };
        if status < 0 {
            return Err(TaskscopeError::Transient(format!(
                "NtQuerySystemInformation failed with status {status:#x}"
            )));
        }
        times.truncate(returned as usize / mem::size_of::<ProcessorTimes>());
        Ok(times.iter().map(processor_ticks).collect())
    }
}

/// Kernel handle closed on drop.
struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn open_process(pid: u32) -> Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) };
        if handle.is_null() {
            return Err(last_error(&format!("process {pid}")));
        }
        Ok(OwnedHandle(handle))
    }

    /// Opens a volume without read or write access; enough for IOCTL queries.
    fn open_volume(drive: &str) -> Result<Self> {
        let path = to_wide(&format!("\\\\.\\{drive}"));
        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null_mut(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error(&format!("volume {drive}")));
        }
        Ok(OwnedHandle(handle))
    }

    fn disk_performance(&self, drive: &str) -> Result<DISK_PERFORMANCE> {
        let mut performance: DISK_PERFORMANCE = unsafe { mem::zeroed() };
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                self.0,
                IOCTL_DISK_PERFORMANCE,
                ptr::null_mut(),
                0,
                &mut performance as *mut _ as LPVOID,
                mem::size_of::<DISK_PERFORMANCE>() as DWORD,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok == FALSE {
            return Err(last_error(&format!("volume {drive}")));
        }
        Ok(performance)
    }

    fn times(&self, pid: u32) -> Result<(u64, u64, u64)> {
        let mut creation = zero_filetime();
        let mut exit = zero_filetime();
        let mut kernel = zero_filetime();
        let mut user = zero_filetime();
        let ok = unsafe {
            GetProcessTimes(self.0, &mut creation, &mut exit, &mut kernel, &mut user)
        };
        if ok == FALSE {
            return Err(last_error(&format!("process {pid}")));
        }
        Ok((
            filetime_to_u64(&creation),
            filetime_to_u64(&kernel),
            filetime_to_u64(&user),
        ))
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn last_error(subject: &str) -> TaskscopeError {
    error_for_code(unsafe { GetLastError() }, subject)
}

fn error_for_code(code: DWORD, subject: &str) -> TaskscopeError {
    match code {
        ERROR_ACCESS_DENIED => TaskscopeError::PermissionDenied(format!("Cannot access {subject}")),
        ERROR_INVALID_PARAMETER | ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND | ERROR_NOT_READY => {
            TaskscopeError::NotFound(format!("{subject} not found"))
        }
        // disk performance counters disabled or not implemented by the driver
        ERROR_INVALID_FUNCTION | ERROR_NOT_SUPPORTED => {
            TaskscopeError::Unsupported(format!("counters for {subject}"))
        }
        other => TaskscopeError::Transient(format!("Win32 error {other} for {subject}")),
    }
}

fn processor_ticks(times: &ProcessorTimes) -> CpuTicks {
    let idle = times.idle_time.max(0) as u64;
    let kernel = times.kernel_time.max(0) as u64;
    let user = times.user_time.max(0) as u64;
    CpuTicks {
        busy: kernel.saturating_sub(idle) + user,
        idle,
    }
}

fn to_wide(value: &str) -> Vec<u16> {
    OsStr::new(value).encode_wide().chain(Some(0)).collect()
}

/// Decodes a UTF-16 buffer up to its first NUL.
fn from_wide(buffer: &[u16]) -> String {
    let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..end])
}

fn from_wide_ptr(pointer: *const u16) -> String {
    if pointer.is_null() {
        return String::new();
    }
    let mut length = 0;
    unsafe {
        while *pointer.add(length) != 0 {
            length += 1;
        }
        String::from_utf16_lossy(slice::from_raw_parts(pointer, length))
    }
}

/// Splits the NUL-separated root list returned by `GetLogicalDriveStringsW`.
fn split_drive_strings(buffer: &[u16]) -> Vec<String> {
    buffer
        .split(|&c| c == 0)
        .filter(|root| !root.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

fn format_mac(bytes: &[u8]) -> String {
    if bytes.iter().all(|&b| b == 0) {
        return String::new();
    }
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Address carried by a raw `SOCKADDR_IN` or `SOCKADDR_IN6`.
enum SocketIp {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

fn socket_ip(bytes: &[u8]) -> Option<SocketIp> {
    let family = u16::from_ne_bytes([*bytes.first()?, *bytes.get(1)?]);
    match family {
        AF_INET => {
            let octets: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
            Some(SocketIp::V4(Ipv4Addr::from(octets)))
        }
        AF_INET6 => {
            let octets: [u8; 16] = bytes.get(8..24)?.try_into().ok()?;
            Some(SocketIp::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn socket_address_bytes(address: &SOCKET_ADDRESS) -> &[u8] {
    if address.lpSockaddr.is_null() || address.iSockaddrLength <= 0 {
        return &[];
    }
    unsafe {
        slice::from_raw_parts(
            address.lpSockaddr as *const u8,
            address.iSockaddrLength as usize,
        )
    }
}

fn adapter_addresses() -> Result<Vec<u64>> {
    let flags = GAA_FLAG_SKIP_ANYCAST | GAA_FLAG_SKIP_MULTICAST | GAA_FLAG_SKIP_DNS_SERVER;
    let mut size: ULONG = 16 * 1024;
    // the list may grow between the sizing call and the read
    for _ in 0..4 {
        // u64 storage keeps the adapter structs aligned
        let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
        let code = unsafe {
            GetAdaptersAddresses(
                AF_UNSPEC,
                flags,
                ptr::null_mut(),
                buffer.as_mut_ptr() as PIP_ADAPTER_ADDRESSES,
                &mut size,
            )
        };
        match code {
            ERROR_SUCCESS => return Ok(buffer),
            ERROR_BUFFER_OVERFLOW => continue,
            other => return Err(error_for_code(other, "network adapters")),
        }
    }
    Err(TaskscopeError::Transient(
        "GetAdaptersAddresses kept growing".to_string(),
    ))
}

fn list_adapters() -> Result<Vec<NetworkInterfaceInfo>> {
    let buffer = adapter_addresses()?;
    let mut interfaces = Vec::new();
    let mut cursor = buffer.as_ptr() as *const IP_ADAPTER_ADDRESSES;
    while !cursor.is_null() {
        let adapter = unsafe { &*cursor };
        cursor = adapter.Next;
        if adapter.IfType == IF_TYPE_SOFTWARE_LOOPBACK {
            continue;
        }

        let mac_length = (adapter.PhysicalAddressLength as usize).min(adapter.PhysicalAddress.len());
        let mut info = NetworkInterfaceInfo {
            name: from_wide_ptr(adapter.FriendlyName),
            mac: format_mac(&adapter.PhysicalAddress[..mac_length]),
            ..Default::default()
        };

        let mut unicast = adapter.FirstUnicastAddress as *const IP_ADAPTER_UNICAST_ADDRESS;
        while !unicast.is_null() {
            let entry = unsafe { &*unicast };
            unicast = entry.Next;
            match socket_ip(socket_address_bytes(&entry.Address)) {
                Some(SocketIp::V4(ip)) => info.ipv4.push(ip.to_string()),
                Some(SocketIp::V6(ip)) => info.ipv6.push(ip.to_string()),
                None => {}
            }
        }
        interfaces.push(info);
    }
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(interfaces)
}

fn interface_counters(name: &str) -> Result<NetworkCounters> {
    let mut table: PMIB_IF_TABLE2 = ptr::null_mut();
    let code = unsafe { GetIfTable2(&mut table) };
    if code != NO_ERROR || table.is_null() {
        return Err(error_for_code(code, "interface table"));
    }
    let found = unsafe {
        let rows = slice::from_raw_parts((*table).Table.as_ptr(), (*table).NumEntries as usize);
        // filter drivers add rows of their own; the first row carrying the alias is the adapter
        rows.iter()
            .find(|row| from_wide(&row.Alias) == name)
            .map(|row| NetworkCounters {
                bytes_received: row.InOctets,
                bytes_sent: row.OutOctets,
            })
    };
    unsafe { FreeMibTable(table as *mut c_void) };
    found.ok_or_else(|| TaskscopeError::NotFound(format!("Interface {name} not found")))
}

fn fixed_drives() -> Result<Vec<DiskInfo>> {
    let mut buffer = vec![0u16; 512];
    let length = unsafe { GetLogicalDriveStringsW(buffer.len() as DWORD, buffer.as_mut_ptr()) };
    if length == 0 || length as usize > buffer.len() {
        return Err(TaskscopeError::Transient(
            "GetLogicalDriveStringsW failed".to_string(),
        ));
    }

    let mut disks = Vec::new();
    for root in split_drive_strings(&buffer[..length as usize]) {
        let wide_root = to_wide(&root);
        if unsafe { GetDriveTypeW(wide_root.as_ptr()) } != DRIVE_FIXED {
            continue;
        }
        let mut total: ULARGE_INTEGER = unsafe { mem::zeroed() };
        let ok = unsafe {
            GetDiskFreeSpaceExW(
                wide_root.as_ptr(),
                ptr::null_mut(),
                &mut total,
                ptr::null_mut(),
            )
        };
        let capacity_bytes = if ok == FALSE { 0 } else { unsafe { *total.QuadPart() } };
        disks.push(DiskInfo {
            name: root.trim_end_matches('\\').to_string(),
            model: String::new(),
            mount_points: vec![root],
            capacity_bytes,
        });
    }
    Ok(disks)
}

fn disk_counters(performance: &DISK_PERFORMANCE) -> DiskCounters {
    let bytes_read = unsafe { *performance.BytesRead.QuadPart() };
    let bytes_written = unsafe { *performance.BytesWritten.QuadPart() };
    let query_time = unsafe { *performance.QueryTime.QuadPart() };
    let idle_time = unsafe { *performance.IdleTime.QuadPart() };
    DiskCounters {
        bytes_read: CounterRead::Value(bytes_read.max(0) as u64),
        bytes_written: CounterRead::Value(bytes_written.max(0) as u64),
        // busy time only moves by deltas: wall clock less idle
        io_time_ms: CounterRead::Value(query_time.saturating_sub(idle_time).max(0) as u64 / 10_000),
        queue_depth: CounterRead::Value(performance.QueueDepth as u64),
    }
}

fn zero_filetime() -> FILETIME {
    FILETIME {
        dwLowDateTime: 0,
        dwHighDateTime: 0,
    }
}

fn filetime_to_u64(ft: &FILETIME) -> u64 {
    ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64
}

fn filetime_to_datetime(value: u64) -> Option<DateTime<Utc>> {
    let since_epoch = value.checked_sub(FILETIME_UNIX_OFFSET)?;
    DateTime::from_timestamp(
        (since_epoch / 10_000_000) as i64,
        ((since_epoch % 10_000_000) * 100) as u32,
    )
}

fn memory_status() -> Result<MEMORYSTATUSEX> {
    let mut status: MEMORYSTATUSEX = unsafe { mem::zeroed() };
    status.dwLength = mem::size_of::<MEMORYSTATUSEX>() as DWORD;
    if unsafe { GlobalMemoryStatusEx(&mut status) } == FALSE {
        return Err(TaskscopeError::Transient(
            "GlobalMemoryStatusEx failed".to_string(),
        ));
    }
    Ok(status)
}

#[async_trait]
impl PlatformMetrics for WindowsMetrics {
    async fn hardware_info(&self) -> Result<HardwareInfo> {
        let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        let status = memory_status()?;
        let logical = (info.dwNumberOfProcessors as usize).max(1);

        Ok(HardwareInfo {
            logical_cores: logical,
            physical_cores: logical,
            physical_memory_total: status.ullTotalPhys,
            page_size: info.dwPageSize as u64,
        })
    }

    async fn uptime(&self) -> Result<Duration> {
        Ok(Duration::from_millis(unsafe { GetTickCount64() }))
    }

    async fn enumerate_processes(&self) -> Result<Vec<u32>> {
        let mut pids: Vec<DWORD> = vec![0; 4096];
        loop {
            let mut needed: DWORD = 0;
            let capacity = (pids.len() * mem::size_of::<DWORD>()) as DWORD;
            if unsafe { EnumProcesses(pids.as_mut_ptr(), capacity, &mut needed) } == FALSE {
                return Err(TaskscopeError::Transient("EnumProcesses failed".to_string()));
            }
            // a full buffer may have been truncated
            if needed < capacity {
                pids.truncate(needed as usize / mem::size_of::<DWORD>());
                return Ok(pids.into_iter().filter(|&pid| pid != 0).collect());
            }
            pids.resize(pids.len() * 2, 0);
        }
    }

    async fn read_process_static_info(&self, pid: u32) -> Result<ProcessStaticInfo> {
        let handle = OwnedHandle::open_process(pid)?;
        let (creation, _, _) = handle.times(pid)?;

        let mut buffer = vec![0u16; 1024];
        let mut size = buffer.len() as DWORD;
        let ok = unsafe { QueryFullProcessImageNameW(handle.0, 0, buffer.as_mut_ptr(), &mut size) };
        let path = if ok == FALSE {
            String::new()
        } else {
            String::from_utf16_lossy(&buffer[..size as usize])
        };
        let name = path.rsplit('\\').next().unwrap_or_default().to_string();

        Ok(ProcessStaticInfo {
            name,
            command_line: path.clone(),
            path,
            description: String::new(),
            user_name: String::new(),
            parent_pid: None,
            start_time: filetime_to_datetime(creation),
        })
    }

    async fn read_process_dynamic_info(&self, pid: u32) -> Result<ProcessDynamicInfo> {
        let handle = OwnedHandle::open_process(pid)?;
        let (creation, kernel, user) = handle.times(pid)?;

        let mut counters: PROCESS_MEMORY_COUNTERS_EX = unsafe { mem::zeroed() };
        counters.cb = mem::size_of::<PROCESS_MEMORY_COUNTERS_EX>() as DWORD;
        let ok = unsafe {
            GetProcessMemoryInfo(
                handle.0,
                &mut counters as *mut _ as *mut PROCESS_MEMORY_COUNTERS,
                counters.cb,
            )
        };
        if ok == FALSE {
            return Err(last_error(&format!("process {pid}")));
        }

        Ok(ProcessDynamicInfo {
            private_working_set: counters.PrivateUsage as u64,
            cpu: ProcessCpuTicks { user, system: kernel },
            status: ProcessStatus::Running,
            start_ticks: Some(creation),
        })
    }

    async fn read_global_cpu_ticks(&self) -> Result<GlobalCpuTicks> {
        let mut idle = zero_filetime();
        let mut kernel = zero_filetime();
        let mut user = zero_filetime();
        if unsafe { GetSystemTimes(&mut idle, &mut kernel, &mut user) } == FALSE {
            return Err(TaskscopeError::Transient("GetSystemTimes failed".to_string()));
        }
        let idle = filetime_to_u64(&idle);
        // kernel time includes idle time
        let busy = filetime_to_u64(&kernel).saturating_sub(idle) + filetime_to_u64(&user);

        let per_core = self.per_core_ticks().unwrap_or_else(|e| {
            debug!("Per-core times unavailable: {}", e);
            Vec::new()
        });

        Ok(GlobalCpuTicks {
            aggregate: CpuTicks { busy, idle },
            per_core,
        })
    }

    async fn read_memory_totals(&self) -> Result<MemoryTotals> {
        let status = memory_status()?;
        Ok(MemoryTotals {
            total: status.ullTotalPhys,
            available: status.ullAvailPhys,
        })
    }

    async fn enumerate_disks(&self) -> Result<Vec<DiskInfo>> {
        fixed_drives()
    }

    async fn read_disk_counters(&self, disk: &DiskInfo) -> Result<DiskCounters> {
        let volume = OwnedHandle::open_volume(&disk.name)?;
        let performance = volume.disk_performance(&disk.name)?;
        Ok(disk_counters(&performance))
    }

    async fn enumerate_network_interfaces(&self) -> Result<Vec<NetworkInterfaceInfo>> {
        list_adapters()
    }

    async fn read_network_counters(
        &self,
        interface: &NetworkInterfaceInfo,
    ) -> Result<NetworkCounters> {
        interface_counters(&interface.name)
    }

    async fn read_extra_metrics(&self) -> Result<Vec<(&'static str, u64)>> {
        let mut info: PERFORMANCE_INFORMATION = unsafe { mem::zeroed() };
        let size = mem::size_of::<PERFORMANCE_INFORMATION>() as DWORD;
        if unsafe { GetPerformanceInfo(&mut info, size) } == FALSE {
            return Err(TaskscopeError::Transient(
                "GetPerformanceInfo failed".to_string(),
            ));
        }
        let page = info.PageSize as u64;
        Ok(vec![
            (extra::HANDLE_COUNT, info.HandleCount as u64),
            (extra::COMMITTED_BYTES, info.CommitTotal as u64 * page),
            (extra::CACHED_BYTES, info.SystemCache as u64 * page),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filetime_conversion() {
        let epoch = filetime_to_datetime(FILETIME_UNIX_OFFSET).unwrap();
        assert_eq!(epoch.timestamp(), 0);
        assert!(filetime_to_datetime(0).is_none());
    }

    #[test]
    fn test_processor_ticks_exclude_idle_from_kernel_time() {
        let times = ProcessorTimes {
            idle_time: 600,
            kernel_time: 900,
            user_time: 100,
            ..Default::default()
        };
        let ticks = processor_ticks(&times);
        assert_eq!(ticks.busy, 400);
        assert_eq!(ticks.idle, 600);
    }

    #[test]
    fn test_split_drive_strings() {
        let buffer: Vec<u16> = "C:\\\0D:\\\0\0".encode_utf16().collect();
        assert_eq!(split_drive_strings(&buffer), vec!["C:\\", "D:\\"]);
        assert!(split_drive_strings(&[0]).is_empty());
    }

    #[test]
    fn test_socket_ip_from_raw_sockaddr() {
        let mut v4 = vec![0u8; 16];
        v4[..2].copy_from_slice(&AF_INET.to_ne_bytes());
        v4[4..8].copy_from_slice(&[192, 168, 1, 7]);
        assert!(matches!(socket_ip(&v4), Some(SocketIp::V4(ip)) if ip.to_string() == "192.168.1.7"));

        let mut v6 = vec![0u8; 28];
        v6[..2].copy_from_slice(&AF_INET6.to_ne_bytes());
        v6[8] = 0xfe;
        v6[9] = 0x80;
        v6[23] = 1;
        assert!(matches!(socket_ip(&v6), Some(SocketIp::V6(ip)) if ip.to_string() == "fe80::1"));

        // truncated or unknown families carry no address
        assert!(socket_ip(&v6[..10]).is_none());
        assert!(socket_ip(&[]).is_none());
        assert!(socket_ip(&[17, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_error_codes_map_to_kinds() {
        assert!(matches!(
            error_for_code(ERROR_NOT_SUPPORTED, "volume C:"),
            TaskscopeError::Unsupported(_)
        ));
        assert!(matches!(
            error_for_code(ERROR_FILE_NOT_FOUND, "volume C:"),
            TaskscopeError::NotFound(_)
        ));
        assert!(matches!(
            error_for_code(ERROR_ACCESS_DENIED, "process 4"),
            TaskscopeError::PermissionDenied(_)
        ));
        assert_eq!(format_mac(&[0, 0]), "");
        assert_eq!(format_mac(&[0x52, 0x54, 0, 0x12, 0x34, 0x56]), "52:54:00:12:34:56");
    }

    #[tokio::test]
    async fn test_reads_topology_and_per_core_times() {
        let metrics = WindowsMetrics::new().unwrap();
        let ticks = metrics.read_global_cpu_ticks().await.unwrap();
        assert_eq!(ticks.per_core.len(), metrics.logical_cores);
        assert!(metrics.enumerate_network_interfaces().await.is_ok());
        let disks = metrics.enumerate_disks().await.unwrap();
        assert!(disks.iter().all(|d| d.name.ends_with(':')));
    }

    #[tokio::test]
    async fn test_reads_own_process() {
        let metrics = WindowsMetrics::new().unwrap();
        let pid = std::process::id();
        let dynamic = metrics.read_process_dynamic_info(pid).await.unwrap();
        assert!(dynamic.private_working_set > 0);
        assert!(metrics.enumerate_processes().await.unwrap().contains(&pid));
    }
}
