use std::path::{Path, PathBuf};

use bytes::Bytes;

pub const RECORDING_CONTENT_TYPE: &str = "application/octet-stream";
pub const REPORT_CONTENT_TYPE: &str = "text/html";
pub const TEMPLATE_CONTENT_TYPE: &str = "application/jfc+xml";

/// Content fetched for the user to save locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub filename: String,
    pub content_type: &'static str,
    pub data: Bytes,
}

impl DownloadedFile {
    /// Write the file into `dir`, returning the full path.
    ///
    /// Only the final path component of the derived filename is used, so a
    /// recording name can never escape `dir`.
    pub async fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let name = Path::new(&self.filename)
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unusable file name '{}'", self.filename),
                )
            })?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, &self.data).await?;
        tracing::info!(path = %path.display(), bytes = self.data.len(), "saved download");
        Ok(path)
    }
}

/// `<name>.jfr`, without doubling an existing suffix.
pub fn recording_filename(name: &str) -> String {
    if name.ends_with(".jfr") {
        name.to_string()
    } else {
        format!("{}.jfr", name)
    }
}

pub fn report_filename(name: &str) -> String {
    format!("{}.report.html", name)
}

pub fn template_filename(name: &str) -> String {
    format!("{}.xml", name)
}
