use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{info, warn};

use crate::config::defs::{BZ2_SUFFIX, BZIP2_TAG, GZ_SUFFIX, GZIP_TAG, PipelineError};
use crate::utils::command::call_tool;

fn has_magic(path: &Path, magic: &[u8]) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; magic.len()];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == magic),
        // Shorter than the magic number: certainly not compressed.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Tests for the gzip magic number, with a suffix cross-check. Bam files
/// are stored gzip-framed but modelled as uncompressed, so they report
/// false here.
pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let suffix = extension(path);
    if has_magic(path, &[0x1F, 0x8B])? {
        if suffix == Some("bam") {
            return Ok(false);
        }
        if suffix != Some(GZ_SUFFIX) {
            warn!(
                "Gzipped file detected without .{} suffix: {}",
                GZ_SUFFIX,
                path.display()
            );
        }
        Ok(true)
    } else {
        if suffix == Some(GZ_SUFFIX) {
            warn!(
                "Uncompressed file masquerading as gzipped: {}",
                path.display()
            );
        }
        Ok(false)
    }
}

/// Tests for the bzip2 magic number, with a suffix cross-check.
pub fn is_bzipped(path: &Path) -> io::Result<bool> {
    let suffix = extension(path);
    if has_magic(path, b"BZh")? {
        if suffix != Some(BZ2_SUFFIX) {
            warn!(
                "Bzipped file detected without .{} suffix: {}",
                BZ2_SUFFIX,
                path.display()
            );
        }
        Ok(true)
    } else {
        if suffix == Some(BZ2_SUFFIX) {
            warn!("Uncompressed file masquerading as bzipped: {}", path.display());
        }
        Ok(false)
    }
}

/// Picks the remote decompression tool for a local file from its magic
/// bytes, or None when the file is not compressed.
pub fn compression_tool(path: &Path) -> io::Result<Option<&'static str>> {
    if is_gzipped(path)? {
        Ok(Some(GZIP_TAG))
    } else if is_bzipped(path)? {
        Ok(Some(BZIP2_TAG))
    } else {
        Ok(None)
    }
}

/// Uncompresses a gzipped file in-process. When dest is not supplied the
/// .gz suffix is stripped, and an unexpected suffix is an error. Existing
/// destinations are only replaced when overwrite is set.
pub fn unzip_file(
    path: &Path,
    dest: Option<PathBuf>,
    delete: bool,
    overwrite: bool,
) -> Result<PathBuf, PipelineError> {
    if !is_gzipped(path)? {
        return Err(PipelineError::InvalidArgument(format!(
            "Attempted to unzip an already uncompressed file: {}",
            path.display()
        )));
    }

    let dest = match dest {
        Some(d) => d,
        None => {
            if extension(path) != Some(GZ_SUFFIX) {
                return Err(PipelineError::InvalidArgument(format!(
                    "Unexpected gzipped file suffix: {}",
                    path.display()
                )));
            }
            path.with_extension("")
        }
    };

    if dest.exists() {
        if overwrite {
            std::fs::remove_file(&dest)?;
        } else {
            return Err(PipelineError::InvalidArgument(format!(
                "Gzip output file already exists; cannot continue: {}",
                dest.display()
            )));
        }
    }

    info!("Uncompressing gzipped file: {}", path.display());
    let mut decoder = GzDecoder::new(File::open(path)?);
    let mut out = File::create(&dest)?;
    let mut buffer = [0u8; 65536];
    loop {
        let n = decoder.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n])?;
    }

    if delete {
        std::fs::remove_file(path)?;
    }
    Ok(dest)
}

/// Sets group ownership and group-readable permissions on a file. A
/// failure is logged, never fatal, matching the original behavior.
pub async fn set_group_ownership(group: &str, path: &Path) {
    let result = call_tool(
        "chgrp",
        &[group.to_string(), path.to_string_lossy().into_owned()],
        None,
        None,
    )
    .await;
    if let Err(e) = result {
        warn!(
            "Failed to set group ownership on '{}': {}. Please fix manually.",
            path.display(),
            e
        );
        return;
    }
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o640);
        if std::fs::set_permissions(path, perms).is_err() {
            warn!(
                "Failed to set permissions on '{}'. Please fix manually.",
                path.display()
            );
        }
    }
}

/// Finds an executable on a colon-separated local path, returning the
/// full path of the first hit.
pub fn find_executable(name: &str, path: &str) -> Option<PathBuf> {
    for dir in path.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(name);
        if let Ok(meta) = candidate.metadata() {
            if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}
