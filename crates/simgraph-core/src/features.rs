//! Feature extraction - the set of printable strings embedded in a sample.
//!
//! Two extractors are provided behind [`FeatureExtractor`]:
//! - [`PrintableStrings`]: scans the file in-process for runs of printable
//!   ASCII (0x20..=0x7E and TAB) of at least `min_len` bytes
//! - [`StringsCommand`]: runs the OS `strings` utility with a hard timeout
//!
//! Both produce one string per line of output; empty lines are dropped and
//! duplicates collapse into the set.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::config::{ExtractorConfig, ExtractorKind};
use crate::error::{Result, SimgraphError};

/// PE / DOS executables start with "MZ".
pub const PE_MAGIC: [u8; 2] = *b"MZ";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Unique strings of one sample. Order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    strings: HashSet<String>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from newline-separated extractor output.
    pub fn from_lines(text: &str) -> Self {
        text.lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn contains(&self, s: &str) -> bool {
        self.strings.contains(s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    /// `|A ∩ B|`, probing the larger set with the smaller one.
    pub fn intersection_len(&self, other: &FeatureSet) -> usize {
        let (small, large) = if self.len() <= other.len() {
            (&self.strings, &other.strings)
        } else {
            (&other.strings, &self.strings)
        };
        small.intersection(large).count()
    }

    /// `|A ∪ B|`.
    pub fn union_len(&self, other: &FeatureSet) -> usize {
        self.len() + other.len() - self.intersection_len(other)
    }
}

impl FromIterator<String> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            strings: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_owned).collect()
    }
}

/// Produces the feature set of one sample. Implementations must be
/// deterministic for unchanged input.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<FeatureSet>;

    /// Extract when the caller already holds the file content. Extractors
    /// that work on bytes override this to skip a second read.
    fn extract_from(&self, path: &Path, _data: &[u8]) -> Result<FeatureSet> {
        self.extract(path)
    }

    fn name(&self) -> &'static str;
}

/// Check the two-byte magic marker. Reads at most two bytes and never fails:
/// short, unreadable and non-regular files are simply not samples.
pub fn is_valid_format(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => magic == PE_MAGIC,
        Err(_) => false,
    }
}

fn is_printable(b: u8) -> bool {
    b == b'\t' || (0x20..=0x7e).contains(&b)
}

/// In-process equivalent of `strings -a`.
#[derive(Debug, Clone)]
pub struct PrintableStrings {
    min_len: usize,
}

impl PrintableStrings {
    pub fn new(min_len: usize) -> Self {
        Self {
            min_len: min_len.max(1),
        }
    }

    /// All maximal printable runs of at least `min_len` bytes.
    pub fn scan(&self, data: &[u8]) -> FeatureSet {
        data.split(|&b| !is_printable(b))
            .filter(|run| run.len() >= self.min_len)
            .map(|run| String::from_utf8_lossy(run).into_owned())
            .collect()
    }
}

impl Default for PrintableStrings {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MIN_LEN)
    }
}

impl FeatureExtractor for PrintableStrings {
    fn extract(&self, path: &Path) -> Result<FeatureSet> {
        let data = fs::read(path).map_err(|e| SimgraphError::extraction(path, e))?;
        Ok(self.scan(&data))
    }

    fn extract_from(&self, _path: &Path, data: &[u8]) -> Result<FeatureSet> {
        Ok(self.scan(data))
    }

    fn name(&self) -> &'static str {
        "builtin"
    }
}

/// Runs `<program> -a -n <min_len> <path>` and collects its stdout lines.
#[derive(Debug, Clone)]
pub struct StringsCommand {
    program: PathBuf,
    min_len: usize,
    timeout: Duration,
}

impl StringsCommand {
    pub fn new(program: impl Into<PathBuf>, min_len: usize, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            min_len: min_len.max(1),
            timeout,
        }
    }

    fn run(&self, path: &Path) -> std::result::Result<Vec<u8>, String> {
        let mut child = Command::new(&self.program)
            .arg("-a")
            .arg("-n")
            .arg(self.min_len.to_string())
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("cannot spawn {}: {e}", self.program.display()))?;

        // Drain stdout on its own thread so a chatty child never blocks on a full pipe.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| "child stdout was not captured".to_string())?;
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let status = match wait_timeout(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            // The reader is detached, not joined: a grandchild may still hold the pipe open.
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                drop(reader);
                return Err(format!("timed out after {:?}", self.timeout));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                drop(reader);
                return Err(format!("waiting for child failed: {e}"));
            }
        };

        let output = reader
            .join()
            .map_err(|_| "stdout reader panicked".to_string())?
            .map_err(|e| format!("reading child stdout failed: {e}"))?;

        if !status.success() {
            return Err(format!("{} exited with {status}", self.program.display()));
        }
        Ok(output)
    }
}

impl FeatureExtractor for StringsCommand {
    fn extract(&self, path: &Path) -> Result<FeatureSet> {
        let output = self
            .run(path)
            .map_err(|reason| SimgraphError::extraction(path, reason))?;
        Ok(FeatureSet::from_lines(&String::from_utf8_lossy(&output)))
    }

    fn name(&self) -> &'static str {
        "strings"
    }
}

fn wait_timeout(
    child: &mut std::process::Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if start.elapsed() >= timeout {
                    return Ok(None);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

pub fn extractor_from_config(config: &ExtractorConfig) -> Box<dyn FeatureExtractor> {
    match config.kind {
        ExtractorKind::Builtin => Box::new(PrintableStrings::new(config.min_len)),
        ExtractorKind::Strings => Box::new(StringsCommand::new(
            config.program.clone(),
            config.min_len,
            config.timeout(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn from_lines_collapses_duplicates_and_blanks() {
        let set = FeatureSet::from_lines("abc\n\nabc\r\nhttp://x\n\n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("abc"));
        assert!(set.contains("http://x"));
        assert!(!set.contains(""));
    }

    #[test]
    fn set_sizes() {
        let a: FeatureSet = ["MZ", "abc", "http://x"].into_iter().collect();
        let b: FeatureSet = ["abc", "http://x", "def"].into_iter().collect();
        assert_eq!(a.intersection_len(&b), 2);
        assert_eq!(b.intersection_len(&a), 2);
        assert_eq!(a.union_len(&b), 4);
    }

    #[test]
    fn format_check_accepts_mz() {
        let tmp = write_tmp(b"MZ\x90\x00rest of header");
        assert!(is_valid_format(tmp.path()));
    }

    #[test]
    fn format_check_rejects_other_magic() {
        assert!(!is_valid_format(write_tmp(b"\x7fELF").path()));
        assert!(!is_valid_format(write_tmp(b"ZM").path()));
        assert!(!is_valid_format(write_tmp(b"mz").path()));
    }

    #[test]
    fn format_check_short_files() {
        assert!(!is_valid_format(write_tmp(b"").path()));
        assert!(!is_valid_format(write_tmp(b"M").path()));
        assert!(is_valid_format(write_tmp(b"MZ").path()));
    }

    #[test]
    fn format_check_missing_and_directory() {
        assert!(!is_valid_format(Path::new("/nonexistent/file.exe")));
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_valid_format(dir.path()));
    }

    #[test]
    fn printable_runs_respect_min_len() {
        let extractor = PrintableStrings::new(4);
        let set = extractor.scan(b"MZ\x00\x00abc\x00kernel32.dll\x01\x02GetProcAddress\x00kernel32.dll");
        assert_eq!(set.len(), 2);
        assert!(set.contains("kernel32.dll"));
        assert!(set.contains("GetProcAddress"));
        assert!(!set.contains("abc"));
        assert!(!set.contains("MZ"));
    }

    #[test]
    fn printable_runs_keep_tabs() {
        let set = PrintableStrings::new(4).scan(b"\x00key\tvalue\x00");
        assert!(set.contains("key\tvalue"));
    }

    #[test]
    fn builtin_extract_is_deterministic() {
        let tmp = write_tmp(b"MZ\x00This program cannot be run in DOS mode.\x00.text\x00.rdata\x00");
        let extractor = PrintableStrings::default();
        let first = extractor.extract(tmp.path()).unwrap();
        let second = extractor.extract(tmp.path()).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("This program cannot be run in DOS mode."));
        assert!(first.contains(".rdata"));
    }

    #[test]
    fn builtin_extract_missing_file() {
        let err = PrintableStrings::default()
            .extract(Path::new("/nonexistent/file.exe"))
            .unwrap_err();
        assert!(matches!(err, SimgraphError::Extraction { .. }));
        assert!(err.to_string().contains("/nonexistent/file.exe"));
    }

    #[test]
    fn strings_command_missing_program() {
        let tmp = write_tmp(b"MZ hello world");
        let extractor = StringsCommand::new(
            "/nonexistent/bin/strings",
            4,
            Duration::from_secs(1),
        );
        let err = extractor.extract(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("cannot spawn"));
    }

    #[test]
    fn builtin_extract_from_uses_given_bytes() {
        let set = PrintableStrings::default()
            .extract_from(Path::new("/nonexistent/file.exe"), b"MZ\x00LoadLibraryA\x00")
            .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("LoadLibraryA"));
    }

    // All scripts run from one test so no other thread forks while they are written.
    #[cfg(unix)]
    #[test]
    fn strings_command_output_and_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sample = write_tmp(b"MZ");

        let fake = dir.path().join("fake-strings");
        fs::write(&fake, "#!/bin/sh\nprintf 'abcd\\nhello world\\nabcd\\n\\n'\n").unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let slow = dir.path().join("slow-strings");
        fs::write(&slow, "#!/bin/sh\nexec sleep 5\n").unwrap();
        fs::set_permissions(&slow, fs::Permissions::from_mode(0o755)).unwrap();

        // No exec: the sleep outlives the killed shell and keeps stdout open.
        let wrapper = dir.path().join("wrapper-strings");
        fs::write(&wrapper, "#!/bin/sh\nsleep 5\n").unwrap();
        fs::set_permissions(&wrapper, fs::Permissions::from_mode(0o755)).unwrap();

        let failing = dir.path().join("failing-strings");
        fs::write(&failing, "#!/bin/sh\necho partial\nexit 1\n").unwrap();
        fs::set_permissions(&failing, fs::Permissions::from_mode(0o755)).unwrap();

        let set = StringsCommand::new(&fake, 4, Duration::from_secs(5))
            .extract(sample.path())
            .unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("abcd"));
        assert!(set.contains("hello world"));

        let started = Instant::now();
        let err = StringsCommand::new(&slow, 4, Duration::from_millis(200))
            .extract(sample.path())
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));

        let started = Instant::now();
        let err = StringsCommand::new(&wrapper, 4, Duration::from_millis(200))
            .extract(sample.path())
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));

        let err = StringsCommand::new(&failing, 4, Duration::from_secs(5))
            .extract(sample.path())
            .unwrap_err();
        assert!(matches!(err, SimgraphError::Extraction { .. }));
        assert!(err.to_string().contains("exited with"));
    }

    #[test]
    fn extractor_from_config_picks_kind() {
        let mut config = ExtractorConfig::default();
        assert_eq!(extractor_from_config(&config).name(), "builtin");
        config.kind = ExtractorKind::Strings;
        assert_eq!(extractor_from_config(&config).name(), "strings");
    }
}
