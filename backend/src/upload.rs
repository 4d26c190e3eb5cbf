use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A transient copy of an uploaded file, removed when the guard drops.
///
/// The name embeds a fresh UUID so concurrently in-flight requests never
/// collide, plus the sanitized original filename. The drop guarantee holds
/// on every exit path of a request, success or failure.
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn persist(dir: &Path, original_name: &str, bytes: &[u8]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let file_name = format!(
            "temp_{}_{}",
            Uuid::new_v4().simple(),
            sanitize_file_name(original_name)
        );
        let path = dir.join(file_name);
        fs::write(&path, bytes)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!(
                "Failed to remove transient upload {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Keeps only characters that are safe in a file name; anything else
/// (path separators included) becomes an underscore.
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}
