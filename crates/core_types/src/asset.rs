use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Lifecycle;

pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Document,
    Image,
    Audio,
    Video,
    Archive,
    Code,
    Other,
}

impl FileType {
    pub const ALL: [FileType; 7] = [
        Self::Document,
        Self::Image,
        Self::Audio,
        Self::Video,
        Self::Archive,
        Self::Code,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Archive => "archive",
            Self::Code => "code",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Classifies by lowercase extension, with or without the leading dot.
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "pdf" | "doc" | "docx" | "txt" | "md" => Self::Document,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" => Self::Image,
            "mp3" | "wav" | "flac" | "aac" => Self::Audio,
            "mp4" | "avi" | "mov" | "wmv" | "flv" => Self::Video,
            "zip" | "rar" | "7z" | "tar" | "gz" => Self::Archive,
            "py" | "js" | "html" | "css" | "java" | "cpp" | "rs" => Self::Code,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub original_name: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub file_path: String,
    pub file_extension: String,
    pub mime_type: String,
    pub uploader: String,
    pub linked_article_id: Option<String>,
    pub is_linked: bool,
    pub file_hash: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub upload_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Asset {
    pub fn formatted_size(&self) -> String {
        format_size(self.file_size.max(0) as u64)
    }

    pub fn download_url(&self) -> String {
        format!("/api/resource/download/{}", self.id)
    }

    /// Images are shown in the browser; everything else is downloaded.
    pub fn is_inline(&self) -> bool {
        self.file_type == FileType::Image || self.mime_type.starts_with("image/")
    }
}

/// `1536` -> `"1.5 KB"`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_extensions() {
        assert_eq!(FileType::from_extension(".PNG"), FileType::Image);
        assert_eq!(FileType::from_extension("md"), FileType::Document);
        assert_eq!(FileType::from_extension(".7z"), FileType::Archive);
        assert_eq!(FileType::from_extension(""), FileType::Other);
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(50 * 1024 * 1024), "50.0 MB");
    }
}
