//! Builds the `files` descriptor array (spec §4.6) from a freshly
//! downloaded ZIP: one [`FileDescriptor`] per archive member, skipping
//! directory entries and anything that sanitizes to an empty path.

use std::io::{Cursor, Read as _};

use sha2::{Digest as _, Sha256};
use skillhub_types::{FileDescriptor, Result, SkillHubError, sanitize_archive_path};

pub fn extract_file_descriptors(zip_bytes: &[u8]) -> Result<Vec<FileDescriptor>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| SkillHubError::storage(format!("open downloaded archive: {e}")))?;

    let mut descriptors = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SkillHubError::storage(format!("read archive entry {index}: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let sanitized = sanitize_archive_path(entry.name());
        if sanitized.is_empty() {
            continue;
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| SkillHubError::storage(format!("read archive member {sanitized}: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let sha256 = hex::encode(hasher.finalize());

        descriptors.push(FileDescriptor {
            content_type: guess_content_type(&sanitized),
            path: sanitized,
            size: contents.len() as u64,
            sha256,
        });
    }

    Ok(descriptors)
}

/// A small, deliberately incomplete extension-to-MIME-type table — just
/// the types a skill archive actually tends to carry.
pub fn guess_content_type(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "txt" => "text/plain",
        "py" => "text/x-python",
        "js" | "mjs" => "application/javascript",
        "ts" => "application/typescript",
        "rs" => "text/x-rust",
        "sh" => "application/x-sh",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime.to_string())
}
