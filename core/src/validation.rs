use crate::error::ApiError;
use std::path::Path;

pub fn validate_video_file(mime: &str) -> bool {
    mime.trim().to_ascii_lowercase().starts_with("video/")
}

pub fn validate_conversation_title(title: &str) -> bool {
    !title.trim().is_empty()
}

/// A file queued for upload with a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    /// Non-video files are refused without being read.
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let mime = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !validate_video_file(&mime) {
            return Err(ApiError::Validation(format!(
                "{} is not a video file ({mime})",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ApiError::Validation(format!("failed to read {}: {err}", path.display()))
        })?;
        Ok(Self::new(file_name, mime, bytes))
    }

    pub fn is_video(&self) -> bool {
        validate_video_file(&self.mime)
    }
}

/// Reject the whole batch if any attachment is not a video.
pub fn validate_attachments(attachments: &[Attachment]) -> Result<(), ApiError> {
    match attachments.iter().find(|attachment| !attachment.is_video()) {
        Some(bad) => Err(ApiError::Validation(format!(
            "{} is not a video file ({})",
            bad.file_name, bad.mime
        ))),
        None => Ok(()),
    }
}
