// comfy-package-installer/src/setup_manager/archive_utils.rs

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{info, warn};
use tar::Archive;
use zip::ZipArchive;

use crate::error::{InstallerError, Result};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// Sniffs the archive format from the first bytes of the file.
pub fn detect_format(archive_path: &Path) -> Result<ArchiveFormat> {
    let mut header = [0u8; 4];
    let mut file = File::open(archive_path).map_err(|e| InstallerError::io(archive_path, e))?;
    let read = file
        .read(&mut header)
        .map_err(|e| InstallerError::io(archive_path, e))?;
    let header = &header[..read];

    if header.starts_with(ZIP_MAGIC) {
        Ok(ArchiveFormat::Zip)
    } else if header.starts_with(GZIP_MAGIC) {
        Ok(ArchiveFormat::TarGz)
    } else {
        Err(InstallerError::UnsupportedArchive {
            path: archive_path.to_path_buf(),
        })
    }
}

/// Extracts a zip or tar.gz archive into `extract_to_dir`, creating it if needed.
pub fn extract_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<ArchiveFormat> {
    let format = detect_format(archive_path)?;
    info!(
        "[ARCHIVE_UTILS] Extracting {} to {} (format: {:?})",
        archive_path.display(),
        extract_to_dir.display(),
        format
    );
    fs::create_dir_all(extract_to_dir).map_err(|e| InstallerError::io(extract_to_dir, e))?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, extract_to_dir)?,
        ArchiveFormat::TarGz => extract_tar_gz(archive_path, extract_to_dir)?,
    }
    info!("[ARCHIVE_UTILS] Finished extracting {:?} archive.", format);
    Ok(format)
}

fn extract_zip(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| InstallerError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut file_in_zip = archive.by_index(i)?;
        let outpath = match file_in_zip.enclosed_name() {
            Some(path) => extract_to_dir.join(path),
            None => {
                warn!("[ARCHIVE_UTILS] Skipping entry with unsafe path in zip: {}", file_in_zip.name());
                continue;
            }
        };

        if file_in_zip.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| InstallerError::io(&outpath, e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| InstallerError::io(parent, e))?;
        }
        let mut outfile = File::create(&outpath).map_err(|e| InstallerError::io(&outpath, e))?;
        io::copy(&mut file_in_zip, &mut outfile).map_err(|e| InstallerError::io(&outpath, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file_in_zip.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))
                    .map_err(|e| InstallerError::io(&outpath, e))?;
            }
        }
    }
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| InstallerError::io(archive_path, e))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .map_err(|e| InstallerError::io(archive_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| InstallerError::io(archive_path, e))?;
        // unpack_in refuses paths that would escape the destination.
        let unpacked = entry
            .unpack_in(extract_to_dir)
            .map_err(|e| InstallerError::io(extract_to_dir, e))?;
        if !unpacked {
            let name = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "<unreadable>".to_string());
            warn!("[ARCHIVE_UTILS] Skipping entry with unsafe path in tar: {}", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn zip_is_detected_and_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("package.download");
        write_zip(&archive, &[("config.json", b"{}"), ("custom_nodes/A/__init__.py", b"")]);

        let out = dir.path().join("extracted");
        assert_eq!(extract_archive(&archive, &out).unwrap(), ArchiveFormat::Zip);
        assert_eq!(fs::read_to_string(out.join("config.json")).unwrap(), "{}");
        assert!(out.join("custom_nodes/A/__init__.py").is_file());
    }

    #[test]
    fn tar_gz_is_detected_and_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("package.download");
        write_tar_gz(&archive, &[("workflows/flow.json", b"{\"nodes\":[]}")]);

        let out = dir.path().join("extracted");
        assert_eq!(extract_archive(&archive, &out).unwrap(), ArchiveFormat::TarGz);
        assert!(out.join("workflows/flow.json").is_file());
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("package.download");
        fs::write(&archive, b"<html>Sign in to continue</html>").unwrap();
        let err = extract_archive(&archive, &dir.path().join("extracted")).unwrap_err();
        assert!(matches!(err, InstallerError::UnsupportedArchive { .. }));
    }

    #[test]
    fn truncated_zip_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("package.download");
        fs::write(&archive, b"PK\x03\x04garbage").unwrap();
        let err = extract_archive(&archive, &dir.path().join("extracted")).unwrap_err();
        assert!(matches!(err, InstallerError::Archive(_)));
    }

    #[test]
    fn zip_entries_escaping_the_destination_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("package.download");
        write_zip(&archive, &[("../evil.txt", b"x"), ("ok.txt", b"y")]);

        let out = dir.path().join("extracted");
        extract_archive(&archive, &out).unwrap();
        assert!(out.join("ok.txt").is_file());
        assert!(!dir.path().join("evil.txt").exists());
    }
}
