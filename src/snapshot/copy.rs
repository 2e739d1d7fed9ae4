use super::SystemSnapshot;
use crate::process::{Process, UniqueId};
use crate::series::CopyMode;
use std::collections::HashMap;

/// Makes `dest` mirror `source`.
///
/// Indexed records (cores, disks, networks, GPUs) are matched by position;
/// when a count changes the array is resized and only the newly created
/// slots are fully copied. Processes are matched by unique id across the
/// live and dead lists, so a process that died since the last copy keeps
/// its record and only receives the delta. After the call the process
/// lists of `dest` have the same ids in the same order as `source`.
pub fn reconcile_and_copy(dest: &mut SystemSnapshot, source: &SystemSnapshot, mode: CopyMode) {
    if dest.capacity != source.capacity {
        tracing::debug!(
            from = dest.capacity,
            to = source.capacity,
            "series capacity changed, forcing a full copy"
        );
        *dest = source.clone();
        return;
    }

    dest.tick = source.tick;
    dest.boot_time = source.boot_time;
    dest.uptime = source.uptime;
    dest.sampled_at = source.sampled_at;
    dest.last_update_duration = source.last_update_duration;
    dest.logical_cores = source.logical_cores;
    dest.physical_cores = source.physical_cores;
    dest.page_size = source.page_size;
    dest.physical_memory_total = source.physical_memory_total;

    dest.memory_used.copy_from(&source.memory_used, mode);
    dest.memory_available
        .copy_from(&source.memory_available, mode);
    dest.cpu_total.copy_from(&source.cpu_total, mode);
    dest.top_cpu.copy_from(&source.top_cpu, mode);
    dest.top_memory.copy_from(&source.top_memory, mode);

    reconcile_indexed(&mut dest.cores, &source.cores, mode, |d, s, m| {
        d.copy_from(s, m)
    });
    reconcile_indexed(&mut dest.disks, &source.disks, mode, |d, s, m| {
        d.copy_from(s, m)
    });
    reconcile_indexed(&mut dest.networks, &source.networks, mode, |d, s, m| {
        d.copy_from(s, m)
    });
    reconcile_indexed(&mut dest.gpus, &source.gpus, mode, |d, s, m| {
        d.copy_from(s, m)
    });

    reconcile_processes(dest, source, mode);

    dest.extra.retain(|name, _| source.extra.contains_key(name));
    for (name, series) in &source.extra {
        match dest.extra.get_mut(name) {
            Some(existing) => existing.copy_from(series, mode),
            None => {
                dest.extra.insert(name.clone(), series.clone());
            }
        }
    }

    debug_assert_eq!(dest.cores.len(), source.cores.len());
    debug_assert_eq!(dest.disks.len(), source.disks.len());
    debug_assert_eq!(dest.networks.len(), source.networks.len());
    debug_assert_eq!(dest.gpus.len(), source.gpus.len());
    debug_assert_eq!(dest.processes.len(), source.processes.len());
    debug_assert_eq!(dest.dead_processes.len(), source.dead_processes.len());
}

fn reconcile_indexed<T: Clone>(
    dest: &mut Vec<T>,
    source: &[T],
    mode: CopyMode,
    copy: impl Fn(&mut T, &T, CopyMode),
) {
    let kept = dest.len().min(source.len());
    dest.truncate(kept);
    for (existing, incoming) in dest.iter_mut().zip(source) {
        copy(existing, incoming, mode);
    }
    dest.extend_from_slice(&source[kept..]);
}

fn reconcile_processes(dest: &mut SystemSnapshot, source: &SystemSnapshot, mode: CopyMode) {
    let mut previous: HashMap<UniqueId, Process> = dest
        .processes
        .drain(..)
        .chain(dest.dead_processes.drain(..))
        .map(|p| (p.unique_id, p))
        .collect();

    dest.processes = rebuild(&mut previous, &source.processes, mode);
    dest.dead_processes = rebuild(&mut previous, &source.dead_processes, mode);

    if !previous.is_empty() {
        tracing::trace!(dropped = previous.len(), "purged processes left the snapshot");
    }
}

fn rebuild(
    previous: &mut HashMap<UniqueId, Process>,
    source: &[Process],
    mode: CopyMode,
) -> Vec<Process> {
    source
        .iter()
        .map(|incoming| match previous.remove(&incoming.unique_id) {
            Some(mut existing) => {
                existing.copy_from(incoming, mode);
                existing
            }
            None => incoming.clone(),
        })
        .collect()
}
