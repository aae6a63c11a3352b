//! Capacity of the filesystem holding the storage root.

use serde::Serialize;
use std::path::Path;
use sysinfo::Disks;

/// Byte figures as the OS reports them. `available_bytes` is what an
/// unprivileged writer can still use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Usage of the mount containing `path`, or `None` when no listed mount does.
/// Blocking: it reads the mount table.
pub fn usage_for(path: &Path) -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    containing_mount(
        path,
        disks.list().iter().map(|d| {
            (d.mount_point(), DiskUsage { total_bytes: d.total_space(), available_bytes: d.available_space() })
        }),
    )
}

/// Deepest mount point that is a prefix of `path`.
fn containing_mount<'a>(path: &Path, mounts: impl IntoIterator<Item = (&'a Path, DiskUsage)>) -> Option<DiskUsage> {
    mounts
        .into_iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, usage)| usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(total: u64) -> DiskUsage { DiskUsage { total_bytes: total, available_bytes: total / 2 } }

    #[test]
    fn picks_the_deepest_containing_mount() {
        let mounts = [
            (Path::new("/"), usage(100)),
            (Path::new("/srv"), usage(200)),
            (Path::new("/srv/imgbed-other"), usage(300)),
        ];
        assert_eq!(containing_mount(Path::new("/srv/imgbed/original"), mounts), Some(usage(200)));
        assert_eq!(containing_mount(Path::new("/home/x"), mounts), Some(usage(100)));
        assert_eq!(containing_mount(Path::new("/srv/imgbed"), [(Path::new("/data"), usage(1))]), None);
    }

    #[test]
    fn current_directory_reports_sane_figures() {
        let cwd = std::env::current_dir().unwrap().canonicalize().unwrap();
        if let Some(u) = usage_for(&cwd) {
            assert!(u.available_bytes <= u.total_bytes);
        }
    }
}
