use uuid::Uuid;

use crate::error::{AppError, Result};

/// Fixed ceiling for image attachments. Checked locally before any network
/// round-trip.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// A candidate image attachment as picked by the user.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    /// Local validation: must be an image and under the size ceiling.
    /// Rejection here never reaches the backend.
    pub fn validate(&self) -> Result<()> {
        if !self.content_type.starts_with("image/") {
            return Err(AppError::UploadRejected(format!(
                "Not an image: {}",
                self.content_type
            )));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(AppError::UploadRejected(format!(
                "Image is {} bytes, limit is {} bytes",
                self.bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }
        Ok(())
    }

    /// Namespaced storage path: uploads live under the sender's id.
    pub fn storage_path(&self, owner: Uuid) -> String {
        format!("{}/{}_{}", owner, Uuid::new_v4(), self.file_name)
    }
}
