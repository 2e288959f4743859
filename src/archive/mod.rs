//! Archive extraction into a scoped working directory.
//!
//! Exported chats arrive as a zip (most clients) or a gzip-compressed tar.
//! Everything is unpacked into a [`TempDir`] owned by [`ExtractedArchive`],
//! so the directory disappears whenever the value is dropped.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ParseWarning};

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Resource folders some archivers add next to the real content.
const IGNORED_PREFIXES: &[&str] = &["__MACOSX/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    TarGz,
}

#[derive(Debug, Clone)]
pub struct ArchiveLimits {
    pub max_total_bytes: u64,
    pub max_entries: usize,
    pub timeout: Duration,
}

impl From<&ArchiveConfig> for ArchiveLimits {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            max_total_bytes: config.max_total_bytes,
            max_entries: config.max_entries,
            timeout: Duration::from_secs(config.extraction_timeout_seconds),
        }
    }
}

/// A file materialized from the archive.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// Path inside the archive, `/`-separated
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl ArchiveMember {
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// The unpacked archive. Dropping it removes the working directory.
#[derive(Debug)]
pub struct ExtractedArchive {
    dir: TempDir,
    pub transcript: ArchiveMember,
    /// Every other extracted file, sorted by name
    pub members: Vec<ArchiveMember>,
    pub warnings: Vec<ParseWarning>,
}

impl ExtractedArchive {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Scratch space for derived files such as extracted video frames.
    pub fn scratch_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.dir.path().join(".scratch");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the working directory now, reporting any failure.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

pub struct ArchiveExtractor {
    limits: ArchiveLimits,
    work_dir: Option<PathBuf>,
}

impl ArchiveExtractor {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            limits: ArchiveLimits::from(config),
            work_dir: config.work_dir.clone(),
        }
    }

    pub fn with_limits(limits: ArchiveLimits, work_dir: Option<PathBuf>) -> Self {
        Self { limits, work_dir }
    }

    /// Unpack `path`, choose the transcript and list the remaining members.
    pub fn extract(&self, path: &Path) -> Result<ExtractedArchive, ArchiveError> {
        let started = Instant::now();
        let kind = detect_container(path)?;
        info!("Extracting {:?} archive {}", kind, path.display());

        let dir = self.create_work_dir()?;
        let mut budget = Budget::new(&self.limits, started);

        match kind {
            ContainerKind::Zip => extract_zip(path, dir.path(), &mut budget)?,
            ContainerKind::TarGz => extract_tar_gz(path, dir.path(), &mut budget)?,
        }

        let mut files = list_files(dir.path());
        let (transcript_index, warning) = choose_transcript(&files)?;
        let transcript = files.remove(transcript_index);

        let mut warnings = Vec::new();
        if let Some(warning) = warning {
            warn!("{}", warning);
            warnings.push(warning);
        }

        info!(
            "Extracted {} entries ({} bytes) in {:?}; transcript {}",
            budget.entries,
            budget.bytes,
            started.elapsed(),
            transcript.name
        );

        Ok(ExtractedArchive {
            dir,
            transcript,
            members: files,
            warnings,
        })
    }

    fn create_work_dir(&self) -> Result<TempDir, ArchiveError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chat-digest-");
        match &self.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(ArchiveError::WorkDir)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(ArchiveError::WorkDir)
    }
}

/// Identify the container from its leading bytes.
pub fn detect_container(path: &Path) -> Result<ContainerKind, ArchiveError> {
    let mut file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut magic = [0u8; 4];
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..])? {
            0 => break,
            n => read += n,
        }
    }
    let magic = &magic[..read];

    if magic.starts_with(ZIP_LOCAL_HEADER) || magic.starts_with(ZIP_EMPTY_ARCHIVE) {
        Ok(ContainerKind::Zip)
    } else if magic.starts_with(GZIP_MAGIC) {
        Ok(ContainerKind::TarGz)
    } else {
        Err(ArchiveError::UnsupportedFormat)
    }
}

struct Budget {
    max_bytes: u64,
    max_entries: usize,
    deadline: Instant,
    timeout: Duration,
    bytes: u64,
    entries: usize,
}

impl Budget {
    fn new(limits: &ArchiveLimits, started: Instant) -> Self {
        Self {
            max_bytes: limits.max_total_bytes,
            max_entries: limits.max_entries,
            deadline: started + limits.timeout,
            timeout: limits.timeout,
            bytes: 0,
            entries: 0,
        }
    }

    fn next_entry(&mut self) -> Result<(), ArchiveError> {
        if Instant::now() >= self.deadline {
            return Err(ArchiveError::Timeout(self.timeout.as_secs()));
        }
        self.entries += 1;
        if self.entries > self.max_entries {
            return Err(ArchiveError::LimitExceeded(format!(
                "more than {} entries",
                self.max_entries
            )));
        }
        Ok(())
    }

    /// Copy one member to `dest`, never writing past the remaining byte budget.
    fn copy(&mut self, reader: &mut dyn Read, dest: &Path) -> Result<(), ArchiveError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let remaining = self.max_bytes.saturating_sub(self.bytes);
        let mut out = File::create(dest)?;
        let written = std::io::copy(&mut reader.take(remaining + 1), &mut out)?;
        out.flush()?;

        self.bytes += written;
        if written > remaining {
            return Err(ArchiveError::LimitExceeded(format!(
                "more than {} uncompressed bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

fn extract_zip(path: &Path, dest: &Path, budget: &mut Budget) -> Result<(), ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    for index in 0..archive.len() {
        budget.next_entry()?;
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

        let name = entry.name().to_string();
        if is_ignored(&name) {
            debug!("Skipping archiver metadata {}", name);
            continue;
        }

        let relative = entry
            .enclosed_name()
            .or_else(|| enclosed(Path::new(&name)))
            .ok_or_else(|| ArchiveError::UnsafePath(name.clone()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        if entry.is_dir() {
            std::fs::create_dir_all(dest.join(&relative))?;
            continue;
        }

        budget.copy(&mut entry, &dest.join(&relative))?;
    }

    Ok(())
}

fn extract_tar_gz(path: &Path, dest: &Path, budget: &mut Budget) -> Result<(), ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    for entry in entries {
        budget.next_entry()?;
        let mut entry = entry.map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

        let raw = entry
            .path()
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?
            .into_owned();
        let name = raw.to_string_lossy().replace('\\', "/");
        let relative = enclosed(&raw).ok_or_else(|| ArchiveError::UnsafePath(name.clone()))?;
        if relative.as_os_str().is_empty() {
            // `./` root entry written by `tar -C dir .`
            continue;
        }
        if is_ignored(&relative.to_string_lossy().replace('\\', "/")) {
            debug!("Skipping archiver metadata {}", name);
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            std::fs::create_dir_all(dest.join(&relative))?;
        } else if entry_type.is_file() {
            budget.copy(&mut entry, &dest.join(&relative))?;
        } else {
            debug!("Skipping non-regular tar entry {} ({:?})", name, entry_type);
        }
    }

    Ok(())
}

/// Relative path that stays inside the extraction root; empty for the root
/// itself, `None` when the path escapes it.
fn enclosed(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn is_ignored(name: &str) -> bool {
    IGNORED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn list_files(root: &Path) -> Vec<ArchiveMember> {
    let mut files: Vec<ArchiveMember> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            Some(ArchiveMember {
                name,
                path: entry.into_path(),
                size,
            })
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

/// Pick the transcript: the shallowest `.txt` member, lexicographically first
/// on ties, with a warning when the choice was not unique.
fn choose_transcript(
    files: &[ArchiveMember],
) -> Result<(usize, Option<ParseWarning>), ArchiveError> {
    let depth = |member: &ArchiveMember| member.name.matches('/').count();

    let candidates: Vec<usize> = files
        .iter()
        .enumerate()
        .filter(|(_, member)| {
            Path::new(&member.name)
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
        })
        .map(|(index, _)| index)
        .collect();

    let shallowest = candidates
        .iter()
        .map(|&index| depth(&files[index]))
        .min()
        .ok_or(ArchiveError::NoTranscript)?;

    let mut tied: Vec<usize> = candidates
        .into_iter()
        .filter(|&index| depth(&files[index]) == shallowest)
        .collect();
    tied.sort_by(|&a, &b| files[a].name.cmp(&files[b].name));

    let chosen = tied[0];
    let warning = (tied.len() > 1).then(|| ParseWarning::AmbiguousTranscript {
        chosen: files[chosen].name.clone(),
        others: tied[1..].iter().map(|&i| files[i].name.clone()).collect(),
    });

    Ok((chosen, warning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn limits() -> ArchiveLimits {
        ArchiveLimits {
            max_total_bytes: 1024 * 1024,
            max_entries: 100,
            timeout: Duration::from_secs(30),
        }
    }

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in members {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_zip_transcript_and_media() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        write_zip(
            &archive,
            &[
                ("_chat.txt", b"[2024-01-01, 10:00] A: hi"),
                ("IMG-1.jpg", b"not really a jpeg"),
                ("VID-1.mp4", b"not really a video"),
            ],
        );

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();

        assert_eq!(extracted.transcript.name, "_chat.txt");
        let names: Vec<&str> = extracted.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["IMG-1.jpg", "VID-1.mp4"]);
        assert!(extracted.warnings.is_empty());
        assert!(extracted.members[0].path.exists());
    }

    #[test]
    fn test_working_directory_removed_on_drop() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        write_zip(&archive, &[("chat.txt", b"x")]);

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();
        let root = extracted.root().to_path_buf();
        assert!(root.exists());
        drop(extracted);
        assert!(!root.exists());
    }

    #[test]
    fn test_work_dir_is_respected_and_cleaned_on_failure() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let archive = dir.path().join("chat.zip");
        write_zip(&archive, &[("photo.jpg", b"x")]);

        let result = ArchiveExtractor::with_limits(limits(), Some(work.clone())).extract(&archive);

        assert!(matches!(result, Err(ArchiveError::NoTranscript)));
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    #[test]
    fn test_tar_gz_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("export/chat.txt", b"12/01/2024, 10:00 - A: hi"),
                ("export/PTT-1.opus", b"voice"),
            ],
        );

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();

        assert_eq!(extracted.transcript.name, "export/chat.txt");
        assert_eq!(extracted.members.len(), 1);
        assert_eq!(extracted.members[0].file_name(), "PTT-1.opus");
    }

    #[test]
    fn test_tar_with_root_dot_entry() {
        let dir = tempdir().unwrap();
        let export = dir.path().join("export");
        std::fs::create_dir_all(export.join("media")).unwrap();
        std::fs::write(export.join("chat.txt"), b"12/01/2024, 10:00 - A: hi").unwrap();
        std::fs::write(export.join("media/IMG-1.jpg"), b"jpg").unwrap();

        let archive = dir.path().join("chat.tar.gz");
        let file = File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", &export).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();

        assert_eq!(extracted.transcript.name, "chat.txt");
        assert_eq!(extracted.members.len(), 1);
        assert_eq!(extracted.members[0].name, "media/IMG-1.jpg");
    }

    #[test]
    fn test_zip_with_root_dot_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        let file = File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .add_directory("./", SimpleFileOptions::default())
            .unwrap();
        writer
            .start_file("./chat.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"12/01/2024, 10:00 - A: hi").unwrap();
        writer.finish().unwrap();

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();
        assert_eq!(extracted.transcript.name, "chat.txt");
    }

    #[test]
    fn test_ambiguous_transcript_prefers_shallow_then_lexicographic() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        write_zip(
            &archive,
            &[
                ("nested/a.txt", b"x"),
                ("b-chat.txt", b"x"),
                ("a-chat.TXT", b"x"),
            ],
        );

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();

        assert_eq!(extracted.transcript.name, "a-chat.TXT");
        assert_eq!(
            extracted.warnings,
            vec![ParseWarning::AmbiguousTranscript {
                chosen: "a-chat.TXT".to_string(),
                others: vec!["b-chat.txt".to_string()],
            }]
        );
    }

    #[test]
    fn test_unsupported_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.rar");
        std::fs::write(&path, b"Rar!\x1a\x07").unwrap();

        let result = ArchiveExtractor::with_limits(limits(), None).extract(&path);
        assert!(matches!(result, Err(ArchiveError::UnsupportedFormat)));
    }

    #[test]
    fn test_missing_archive() {
        let result = ArchiveExtractor::with_limits(limits(), None)
            .extract(Path::new("/nonexistent/chat.zip"));
        assert!(matches!(result, Err(ArchiveError::Open { .. })));
    }

    #[test]
    fn test_truncated_zip_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.zip");
        std::fs::write(&path, b"PK\x03\x04garbage").unwrap();

        let result = ArchiveExtractor::with_limits(limits(), None).extract(&path);
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
    }

    #[test]
    fn test_size_bound() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        let big = vec![b'a'; 4096];
        write_zip(&archive, &[("chat.txt", b"x"), ("big.bin", &big)]);

        let small = ArchiveLimits {
            max_total_bytes: 1024,
            ..limits()
        };
        let result = ArchiveExtractor::with_limits(small, None).extract(&archive);
        assert!(matches!(result, Err(ArchiveError::LimitExceeded(_))));
    }

    #[test]
    fn test_entry_bound() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        write_zip(&archive, &[("chat.txt", b"x"), ("a.jpg", b"x"), ("b.jpg", b"x")]);

        let few = ArchiveLimits {
            max_entries: 2,
            ..limits()
        };
        let result = ArchiveExtractor::with_limits(few, None).extract(&archive);
        assert!(matches!(result, Err(ArchiveError::LimitExceeded(_))));
    }

    #[test]
    fn test_zero_timeout() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        write_zip(&archive, &[("chat.txt", b"x")]);

        let none = ArchiveLimits {
            timeout: Duration::ZERO,
            ..limits()
        };
        let result = ArchiveExtractor::with_limits(none, None).extract(&archive);
        assert!(matches!(result, Err(ArchiveError::Timeout(0))));
    }

    #[test]
    fn test_tar_parent_path_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.tar.gz");

        let file = File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"escape";
        let mut header = tar::Header::new_old();
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, Cursor::new(data)).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let result = ArchiveExtractor::with_limits(limits(), None).extract(&archive);
        assert!(matches!(result, Err(ArchiveError::UnsafePath(_))));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_macos_metadata_is_ignored() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("chat.zip");
        write_zip(
            &archive,
            &[("chat.txt", b"x"), ("__MACOSX/._chat.txt", b"x")],
        );

        let extracted = ArchiveExtractor::with_limits(limits(), None)
            .extract(&archive)
            .unwrap();
        assert!(extracted.members.is_empty());
        assert!(extracted.warnings.is_empty());
    }

    #[test]
    fn test_enclosed_paths() {
        assert_eq!(enclosed(Path::new("./a/b.jpg")), Some(PathBuf::from("a/b.jpg")));
        assert_eq!(enclosed(Path::new("/etc/passwd")), None);
        assert_eq!(enclosed(Path::new("a/../../b")), None);
        assert_eq!(enclosed(Path::new(".")), Some(PathBuf::new()));
        assert_eq!(enclosed(Path::new("./")), Some(PathBuf::new()));
    }
}
