use crate::LibraryError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

/// Archive container formats understood by [`extract_archive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Infer the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::TarGz => write!(f, "tar.gz"),
        }
    }
}

/// Resolve an archive entry path against `dest` without touching the
/// filesystem. Absolute paths and `..` components that climb above `dest`
/// are rejected.
pub fn safe_join(dest: &Path, entry: &Path) -> Result<PathBuf, LibraryError> {
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(LibraryError::PathTraversal(entry.display().to_string()));
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LibraryError::PathTraversal(entry.display().to_string()));
            }
        }
    }
    Ok(out)
}

/// Extract `archive` into `dest`, creating it if needed.
///
/// Every entry is validated with [`safe_join`] before anything is written for
/// it, so an escaping entry aborts extraction without writing outside `dest`.
/// Tar entries are also resolved through any symlinks already on disk.
/// Returns the number of entries written.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
) -> Result<usize, LibraryError> {
    debug!(
        "extracting {format} archive {} into {}",
        archive.display(),
        dest.display()
    );
    fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest),
    }
}

fn extract_err(e: impl std::fmt::Display) -> LibraryError {
    LibraryError::Extract(e.to_string())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, LibraryError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(extract_err)?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(extract_err)?;
        let name = entry.name().to_owned();
        let target = safe_join(dest, Path::new(&name))?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        trace!("extracted {name}");

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        written += 1;
    }
    Ok(written)
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<usize, LibraryError> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut written = 0;

    for entry in tar.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let path = entry.path().map_err(extract_err)?.into_owned();
        let target = safe_join(dest, &path)?;
        let kind = entry.header().entry_type();

        if kind.is_symlink() {
            let link = entry
                .link_name()
                .map_err(extract_err)?
                .ok_or_else(|| extract_err(format!("symlink {} has no target", path.display())))?
                .into_owned();
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            safe_join(dest, &base.join(&link))?;
        } else if !(kind.is_file() || kind.is_dir()) {
            warn!("skipping unsupported archive entry {}", path.display());
            continue;
        }

        // Symlinks unpacked earlier may redirect a lexically safe path, so
        // the physical location is checked again by `unpack_in`.
        if !entry.unpack_in(dest).map_err(extract_err)? {
            return Err(LibraryError::PathTraversal(path.display().to_string()));
        }
        trace!("extracted {}", target.display());
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in entries {
            let mut header = tar::Header::new_old();
            let raw = name.as_bytes();
            header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn append_symlink<W: Write>(builder: &mut tar::Builder<W>, name: &str, target: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_link_name(target).unwrap();
        header.set_size(0);
        header.set_mode(0o777);
        header.set_cksum();
        builder.append(&header, io::empty()).unwrap();
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn format_from_file_name() {
        assert_eq!(
            ArchiveFormat::from_file_name("imposter-go_linux_amd64.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_file_name("distro.ZIP"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::from_file_name("imposter.jar"), None);
    }

    #[test]
    fn safe_join_accepts_nested_and_dot_paths() {
        let dest = Path::new("/cache/golang/1.0.0");
        assert_eq!(
            safe_join(dest, Path::new("bin/./imposter-go")).unwrap(),
            dest.join("bin/imposter-go")
        );
        assert_eq!(
            safe_join(dest, Path::new("lib/../imposter-go")).unwrap(),
            dest.join("imposter-go")
        );
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let dest = Path::new("/cache/golang/1.0.0");
        assert!(matches!(
            safe_join(dest, Path::new("../../etc/passwd")),
            Err(LibraryError::PathTraversal(_))
        ));
        assert!(matches!(
            safe_join(dest, Path::new("lib/../../outside")),
            Err(LibraryError::PathTraversal(_))
        ));
        assert!(matches!(
            safe_join(dest, Path::new("/etc/passwd")),
            Err(LibraryError::PathTraversal(_))
        ));
    }

    #[test]
    fn tar_gz_extracts_executable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("engine.tar.gz");
        write_tar_gz(&archive, &[("imposter-go", b"#!/bin/sh\necho hi\n")]);

        let dest = dir.path().join("out");
        let n = extract_archive(&archive, &dest, ArchiveFormat::TarGz).unwrap();
        assert_eq!(n, 1);
        let content = fs::read(dest.join("imposter-go")).unwrap();
        assert_eq!(content, b"#!/bin/sh\necho hi\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("imposter-go"))
                .unwrap()
                .permissions()
                .mode();
            assert_ne!(mode & 0o111, 0, "binary must stay executable");
        }
    }

    #[test]
    fn tar_gz_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.tar.gz");
        write_tar_gz(&archive, &[("../../etc/passwd", b"root:x:0:0")]);

        let dest = dir.path().join("a").join("b").join("out");
        let err = extract_archive(&archive, &dest, ArchiveFormat::TarGz).unwrap_err();
        assert!(matches!(err, LibraryError::PathTraversal(_)), "{err}");
        assert!(!dir.path().join("a").join("etc").exists());
        assert!(!dir.path().join("etc").exists());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn tar_gz_symlink_chain_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chain.tar.gz");
        {
            let file = File::create(&archive).unwrap();
            let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(gz);
            // Each link target is inside the destination on paper; chained
            // together they resolve to its parent.
            append_symlink(&mut builder, "d/x", "..");
            append_symlink(&mut builder, "y", "d/x/..");
            let data = b"escaped";
            let mut header = tar::Header::new_gnu();
            header.set_path("y/escaped.txt").unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        let result = extract_archive(&archive, &dest, ArchiveFormat::TarGz);
        assert!(result.is_err(), "chained symlink write must fail: {result:?}");
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn zip_extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("distro.zip");
        write_zip(
            &archive,
            &[("lib/core.jar", b"core"), ("bin/imposter", b"launcher")],
        );

        let dest = dir.path().join("out");
        let n = extract_archive(&archive, &dest, ArchiveFormat::Zip).unwrap();
        assert_eq!(n, 2);
        assert_eq!(fs::read(dest.join("lib/core.jar")).unwrap(), b"core");
        assert_eq!(fs::read(dest.join("bin/imposter")).unwrap(), b"launcher");
    }

    #[test]
    fn zip_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../../etc/passwd", b"root:x:0:0")]);

        let dest = dir.path().join("a").join("b").join("out");
        let err = extract_archive(&archive, &dest, ArchiveFormat::Zip).unwrap_err();
        assert!(matches!(err, LibraryError::PathTraversal(_)), "{err}");
        assert!(!dir.path().join("a").join("etc").exists());
    }

    #[test]
    fn corrupt_archive_is_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"not a zip").unwrap();
        let err = extract_archive(&archive, &dir.path().join("out"), ArchiveFormat::Zip)
            .unwrap_err();
        assert!(matches!(err, LibraryError::Extract(_)));
    }
}
