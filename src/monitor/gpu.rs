//! GPU counters exposed by DRM drivers under `/sys/class/drm`.
//!
//! Drivers publish different subsets of files: amdgpu has all of them,
//! i915 typically none of the utilization or VRAM files. A missing file is
//! reported as [`CounterRead::Unsupported`]; any other read failure is a
//! hard error.

use super::{CounterRead, GpuCounters, GpuInfo};
use crate::types::{Result, TaskscopeError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DRM_ROOT: &str = "/sys/class/drm";

pub struct DrmGpuReader {
    root: PathBuf,
}

impl Default for DrmGpuReader {
    fn default() -> Self {
        Self::with_root(DRM_ROOT)
    }
}

impl DrmGpuReader {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lists `cardN` devices. Connector entries such as `card0-DP-1` are
    /// skipped; a missing DRM directory yields an empty list.
    pub fn enumerate(&self) -> Result<Vec<GpuInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskscopeError::from_io(self.root.display().to_string(), e)),
        };

        let mut cards: Vec<(u32, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(index) = name
                .strip_prefix("card")
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            cards.push((index, entry.path().join("device")));
        }
        cards.sort_by_key(|(index, _)| *index);

        let gpus = cards
            .into_iter()
            .map(|(index, device)| {
                let vendor = read_trimmed(&device.join("vendor"))
                    .map(|id| vendor_name(&id).to_string())
                    .unwrap_or_default();
                let name = read_trimmed(&device.join("product_name"))
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("card{index}"));
                let memory_total_bytes = read_u64(&device.join("mem_info_vram_total"))
                    .ok()
                    .and_then(CounterRead::value);
                GpuInfo {
                    name,
                    vendor,
                    memory_total_bytes,
                    location: device.display().to_string(),
                }
            })
            .collect();
        Ok(gpus)
    }

    pub fn read_counters(&self, gpu: &GpuInfo) -> Result<GpuCounters> {
        let device = Path::new(&gpu.location);

        let utilization = match read_u64(&device.join("gpu_busy_percent"))? {
            CounterRead::Value(percent) => CounterRead::Value(percent.min(100) as f32 / 100.0),
            CounterRead::Unsupported => CounterRead::Unsupported,
        };
        let memory_used_bytes = read_u64(&device.join("mem_info_vram_used"))?;
        let temperature_celsius = match find_hwmon(device)? {
            Some(hwmon) => match read_u64(&hwmon.join("temp1_input"))? {
                CounterRead::Value(millis) => CounterRead::Value(millis as f32 / 1000.0),
                CounterRead::Unsupported => CounterRead::Unsupported,
            },
            None => CounterRead::Unsupported,
        };

        Ok(GpuCounters {
            utilization,
            memory_used_bytes,
            temperature_celsius,
        })
    }
}

fn vendor_name(pci_id: &str) -> &str {
    match pci_id {
        "0x1002" => "AMD",
        "0x10de" => "NVIDIA",
        "0x8086" => "Intel",
        other => other,
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_u64(path: &Path) -> Result<CounterRead<u64>> {
    match fs::read_to_string(path) {
        Ok(content) => content
            .trim()
            .parse::<u64>()
            .map(CounterRead::Value)
            .map_err(|e| TaskscopeError::Parse(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(CounterRead::Unsupported),
        Err(e) => Err(TaskscopeError::from_io(path.display().to_string(), e)),
    }
}

fn find_hwmon(device: &Path) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(device.join("hwmon")) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TaskscopeError::from_io("hwmon", e)),
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    dirs.sort();
    Ok(dirs.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: PathBuf, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn amd_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("card0/device");
        write(device.join("vendor"), "0x1002\n");
        write(device.join("gpu_busy_percent"), "37\n");
        write(device.join("mem_info_vram_used"), "1073741824\n");
        write(device.join("mem_info_vram_total"), "8589934592\n");
        write(device.join("hwmon/hwmon3/temp1_input"), "54000\n");
        fs::create_dir_all(dir.path().join("card0-DP-1")).unwrap();
        dir
    }

    #[test]
    fn test_enumerate_skips_connectors() {
        let dir = amd_tree();
        let reader = DrmGpuReader::with_root(dir.path());
        let gpus = reader.enumerate().unwrap();

        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].name, "card0");
        assert_eq!(gpus[0].vendor, "AMD");
        assert_eq!(gpus[0].memory_total_bytes, Some(8589934592));
    }

    #[test]
    fn test_read_all_counters() {
        let dir = amd_tree();
        let reader = DrmGpuReader::with_root(dir.path());
        let gpu = reader.enumerate().unwrap().remove(0);
        let counters = reader.read_counters(&gpu).unwrap();

        assert_eq!(counters.utilization, CounterRead::Value(0.37));
        assert_eq!(counters.memory_used_bytes, CounterRead::Value(1073741824));
        assert_eq!(counters.temperature_celsius, CounterRead::Value(54.0));
    }

    #[test]
    fn test_missing_files_are_unsupported() {
        let dir = TempDir::new().unwrap();
        write(dir.path().join("card1/device/vendor"), "0x8086\n");
        let reader = DrmGpuReader::with_root(dir.path());
        let gpu = reader.enumerate().unwrap().remove(0);
        let counters = reader.read_counters(&gpu).unwrap();

        assert_eq!(gpu.vendor, "Intel");
        assert_eq!(counters.utilization, CounterRead::Unsupported);
        assert_eq!(counters.memory_used_bytes, CounterRead::Unsupported);
        assert_eq!(counters.temperature_celsius, CounterRead::Unsupported);
    }

    #[test]
    fn test_garbage_is_a_hard_failure() {
        let dir = amd_tree();
        write(
            dir.path().join("card0/device/gpu_busy_percent"),
            "not a number\n",
        );
        let reader = DrmGpuReader::with_root(dir.path());
        let gpu = reader.enumerate().unwrap().remove(0);
        assert!(matches!(
            reader.read_counters(&gpu),
            Err(TaskscopeError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_root_has_no_gpus() {
        let reader = DrmGpuReader::with_root("/nonexistent/drm");
        assert!(reader.enumerate().unwrap().is_empty());
    }
}
