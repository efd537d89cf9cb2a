//! Memory sampling: read the proportional set size of a process.
//!
//! On Linux the PSS is read from procfs. `/proc/<pid>/smaps_rollup` is the
//! cheapest source (Linux 4.14+); when it does not exist we fall back to
//! summing every mapping in `/proc/<pid>/smaps`.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Errors produced while sampling a process.
#[derive(Debug)]
pub enum SampleError {
    /// The procfs file could not be opened or read (process gone, permissions).
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A `Pss:` line did not carry a numeric value.
    Parse { line: String },
    /// Sampling is not available on this platform.
    Unsupported,
    /// The blocking sample task panicked or was cancelled.
    Task { source: tokio::task::JoinError },
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            SampleError::Parse { line } => write!(f, "unparsable Pss line: {line:?}"),
            SampleError::Unsupported => {
                write!(f, "memory sampling is not supported on this platform")
            }
            SampleError::Task { source } => write!(f, "sample task failed: {source}"),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::Io { source, .. } => Some(source),
            SampleError::Task { source } => Some(source),
            _ => None,
        }
    }
}

/// Reports the current memory usage of a process, in bytes.
///
/// Called once per interval by the limiter and directly by
/// [`Guard::pss`](crate::Guard::pss). Failures are expected and never fatal.
/// The limiter runs samples on Tokio's blocking pool; `Guard::pss` calls
/// straight through on the caller's thread.
pub trait MemorySampler: Send + Sync {
    fn sample(&self, pid: u32) -> Result<u64, SampleError>;
}

impl<F> MemorySampler for F
where
    F: Fn(u32) -> Result<u64, SampleError> + Send + Sync,
{
    fn sample(&self, pid: u32) -> Result<u64, SampleError> {
        self(pid)
    }
}

/// PSS sampler backed by procfs.
#[derive(Debug, Clone)]
pub struct SmapsSampler {
    proc_root: PathBuf,
}

impl Default for SmapsSampler {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl SmapsSampler {
    /// Create a sampler reading from the given procfs mount point.
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn read_pss(&self, path: &Path) -> Result<u64, SampleError> {
        let file = std::fs::File::open(path).map_err(|e| SampleError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        parse_pss(BufReader::new(file)).map_err(|e| match e {
            SampleError::Io { source, .. } => SampleError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }
}

impl MemorySampler for SmapsSampler {
    fn sample(&self, pid: u32) -> Result<u64, SampleError> {
        if !cfg!(target_os = "linux") {
            return Err(SampleError::Unsupported);
        }
        let dir = self.proc_root.join(pid.to_string());
        let rollup = dir.join("smaps_rollup");
        match self.read_pss(&rollup) {
            Err(SampleError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound && dir.exists() =>
            {
                self.read_pss(&dir.join("smaps"))
            }
            other => other,
        }
    }
}

/// Sum every `Pss:` line (reported in kB) of an smaps-formatted stream, in bytes.
pub fn parse_pss(reader: impl BufRead) -> Result<u64, SampleError> {
    let mut total_kb: u64 = 0;
    for line in reader.lines() {
        let line = line.map_err(|e| SampleError::Io {
            path: PathBuf::new(),
            source: e,
        })?;
        let Some(rest) = line.strip_prefix("Pss:") else {
            continue;
        };
        let kb: u64 = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SampleError::Parse { line: line.clone() })?;
        total_kb = total_kb.saturating_add(kb);
    }
    Ok(total_kb.saturating_mul(1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMAPS: &str = "\
55d4c2a00000-55d4c2a02000 r--p 00000000 fd:01 1234    /usr/bin/cat
Size:                  8 kB
Rss:                   8 kB
Pss:                   4 kB
Pss_Dirty:             0 kB
7f1c8a000000-7f1c8a021000 rw-p 00000000 00:00 0
Size:                132 kB
Rss:                  12 kB
Pss:                  12 kB
Pss_Anon:             12 kB
";

    #[test]
    fn test_parse_pss_sums_only_pss_lines() {
        let total = parse_pss(Cursor::new(SMAPS)).unwrap();
        assert_eq!(total, 16 * 1024);
    }

    #[test]
    fn test_parse_pss_empty_is_zero() {
        assert_eq!(parse_pss(Cursor::new("")).unwrap(), 0);
    }

    #[test]
    fn test_parse_pss_rollup_format() {
        let rollup = "\
00400000-7ffd8a5fe000 ---p 00000000 00:00 0                              [rollup]
Rss:               10240 kB
Pss:                6144 kB
Pss_Anon:           2048 kB
Pss_File:           4096 kB
";
        assert_eq!(parse_pss(Cursor::new(rollup)).unwrap(), 6144 * 1024);
    }

    #[test]
    fn test_parse_pss_bad_value() {
        let err = parse_pss(Cursor::new("Pss:   lots kB\n")).unwrap_err();
        assert!(matches!(err, SampleError::Parse { .. }));
        assert!(err.to_string().contains("Pss"));
    }

    #[test]
    fn test_parse_pss_missing_value() {
        let err = parse_pss(Cursor::new("Pss:\n")).unwrap_err();
        assert!(matches!(err, SampleError::Parse { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sampler_reads_rollup_from_fake_procfs() {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("42");
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("smaps_rollup"), "Pss: 100 kB\n").unwrap();
        std::fs::write(pid_dir.join("smaps"), "Pss: 1 kB\n").unwrap();

        let sampler = SmapsSampler::new(dir.path());
        assert_eq!(sampler.sample(42).unwrap(), 100 * 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sampler_falls_back_to_smaps() {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("7");
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("smaps"), SMAPS).unwrap();

        let sampler = SmapsSampler::new(dir.path());
        assert_eq!(sampler.sample(7).unwrap(), 16 * 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sampler_missing_process_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = SmapsSampler::new(dir.path());
        let err = sampler.sample(99999).unwrap_err();
        assert!(matches!(err, SampleError::Io { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sampler_reads_own_process() {
        let sampler = SmapsSampler::default();
        let pss = sampler.sample(std::process::id()).unwrap();
        assert!(pss > 0);
    }

    #[test]
    fn test_closure_is_a_sampler() {
        let sampler = |pid: u32| -> Result<u64, SampleError> { Ok(pid as u64 * 2) };
        assert_eq!(sampler.sample(21).unwrap(), 42);
    }
}
