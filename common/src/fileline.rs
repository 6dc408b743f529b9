//! A lazy line iterator over a text file with a parametric, per-line parser.
//!
//! `FileLines<T>` underlies every procfs consumer in the workspace: mounts,
//! per-pid cgroup membership, the global cgroup subsystem table, and the
//! pid stat line. Malformed lines are skipped rather than failing the whole
//! read, matching the procfs convention of "one bad line, not a bad file".

use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::Path;

pub struct FileLines<T> {
    lines: Lines<BufReader<File>>,
    parser: Box<dyn FnMut(&str) -> Option<T>>,
}

impl<T> FileLines<T> {
    pub fn open<P: AsRef<Path>>(
        path: P,
        parser: impl FnMut(&str) -> Option<T> + 'static,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(FileLines {
            lines: BufReader::new(file).lines(),
            parser: Box::new(parser),
        })
    }
}

impl<T> Iterator for FileLines<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        for line in self.lines.by_ref() {
            let line = line.ok()?;
            if let Some(record) = (self.parser)(&line) {
                return Some(record);
            }
        }
        None
    }
}

/// One line of `/proc/[pid/]mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: Vec<String>,
    pub freq: i32,
    pub passno: i32,
}

/// Parses a `/proc/mounts` line. Lines with a field count other than six are
/// not mount entries and are skipped by returning `None`.
pub fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 6 {
        return None;
    }
    let mountpoint = strip_deleted_marker(fields[1]);
    let options = fields[3].split(',').map(str::to_string).collect();
    Some(MountEntry {
        device: fields[0].to_string(),
        mountpoint,
        fstype: fields[2].to_string(),
        options,
        freq: fields[4].parse().ok()?,
        passno: fields[5].parse().ok()?,
    })
}

/// procfs marks a mountpoint whose backing directory was removed with a
/// trailing `\040(deleted)` (octal-escaped space) suffix on the path field.
fn strip_deleted_marker(mountpoint: &str) -> String {
    const MARKER: &str = "\\040(deleted)";
    match mountpoint.strip_suffix(MARKER) {
        Some(stripped) => stripped.to_string(),
        None => mountpoint.to_string(),
    }
}

pub fn mounts_at<P: AsRef<Path>>(path: P) -> io::Result<FileLines<MountEntry>> {
    FileLines::open(path, parse_mount_line)
}

/// One line of `/proc/<pid>/cgroup`: `hierarchy_id:subsystems:path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcCgroupData {
    pub hierarchy_id: i32,
    pub subsystems: Vec<String>,
    pub hierarchy_path: String,
}

pub fn parse_proc_cgroup_line(line: &str) -> Option<ProcCgroupData> {
    let mut parts = line.splitn(3, ':');
    let hierarchy_id: i32 = parts.next()?.parse().ok()?;
    let subsystems_field = parts.next()?;
    let hierarchy_path = parts.next()?.to_string();
    let subsystems = if subsystems_field.is_empty() {
        Vec::new()
    } else {
        subsystems_field.split(',').map(str::to_string).collect()
    };
    Some(ProcCgroupData {
        hierarchy_id,
        subsystems,
        hierarchy_path,
    })
}

pub fn proc_cgroup<P: AsRef<Path>>(path: P) -> io::Result<FileLines<ProcCgroupData>> {
    FileLines::open(path, parse_proc_cgroup_line)
}

/// One non-comment line of `/proc/cgroups`: `name hierarchy_id num_cgroups enabled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcCgroupsLine {
    pub name: String,
    pub hierarchy_id: i32,
    pub num_cgroups: i32,
    pub enabled: bool,
}

pub fn parse_proc_cgroups_line(line: &str) -> Option<ProcCgroupsLine> {
    if line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 {
        return None;
    }
    let enabled = match fields[3] {
        "0" => false,
        "1" => true,
        _ => return None,
    };
    Some(ProcCgroupsLine {
        name: fields[0].to_string(),
        hierarchy_id: fields[1].parse().ok()?,
        num_cgroups: fields[2].parse().ok()?,
        enabled,
    })
}

pub fn proc_cgroups<P: AsRef<Path>>(path: P) -> io::Result<FileLines<ProcCgroupsLine>> {
    FileLines::open(path, parse_proc_cgroups_line)
}

/// Extracts field 22 (`starttime`, in clock ticks) from the contents of
/// `/proc/<pid>/stat`. The `comm` field (field 2) may itself contain
/// whitespace or parentheses, so fields are located relative to the last
/// `)` rather than by naive whitespace splitting.
pub fn parse_stat_starttime(contents: &str) -> Option<u64> {
    let close = contents.rfind(')')?;
    let rest = contents.get(close + 1..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // `rest` starts at field 3 (state); field 22 is index 19 from there.
    fields.get(19)?.parse().ok()
}

/// Extracts field 4 (`ppid`) from the contents of `/proc/<pid>/stat`, using
/// the same `comm`-safe approach as [`parse_stat_starttime`].
pub fn parse_stat_ppid(contents: &str) -> Option<i32> {
    let close = contents.rfind(')')?;
    let rest = contents.get(close + 1..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // `rest` starts at field 3 (state); field 4 is index 1 from there.
    fields.get(1)?.parse().ok()
}
