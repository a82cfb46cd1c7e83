use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::FileRow;
use parley_types::api::UploadResponse;

use crate::auth::Identity;
use crate::blocking;
use crate::error::{ChatError, ChatResult};

/// Reference upload cap: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Stored bytes plus the type they were uploaded as.
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Disk-backed attachment store.
///
/// Each upload is stored as a flat file at `{dir}/{file_id}` and addressed by
/// clients through the URL `/files/{file_id}`. Readable by the uploader and by
/// the participants of any conversation in which the URL was shared.
pub struct ContentStore {
    dir: PathBuf,
    db: Arc<Database>,
    max_bytes: usize,
}

impl ContentStore {
    pub async fn new(dir: PathBuf, db: Arc<Database>, max_bytes: usize) -> ChatResult<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ChatError::Internal(e.into()))?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir, db, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn url_for(file_id: Uuid) -> String {
        format!("/files/{}", file_id)
    }

    pub async fn upload(
        &self,
        uploader: &Identity,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> ChatResult<UploadResponse> {
        let mime_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !is_allowed_type(&mime_type) {
            return Err(ChatError::UnsupportedType(if mime_type.is_empty() {
                "missing content type".into()
            } else {
                mime_type
            }));
        }
        if bytes.is_empty() {
            return Err(ChatError::Validation("upload is empty".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(ChatError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let file_id = Uuid::new_v4();
        let sha256 = hex::encode(Sha256::digest(bytes));
        let path = self.dir.join(file_id.to_string());
        fs::write(&path, bytes).await.map_err(|e| {
            error!("Failed to write file {}: {}", path.display(), e);
            ChatError::Internal(e.into())
        })?;

        let row = FileRow {
            id: file_id.to_string(),
            uploader_id: uploader.id.to_string(),
            mime_type: mime_type.clone(),
            size: bytes.len() as i64,
            sha256,
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = blocking(&self.db, move |db| db.insert_file(&row)).await {
            if let Err(e) = fs::remove_file(&path).await {
                error!("Failed to remove orphaned file {}: {}", path.display(), e);
            }
            return Err(err);
        }

        info!(
            "{} uploaded {} ({}, {} bytes)",
            uploader.username,
            file_id,
            mime_type,
            bytes.len()
        );

        Ok(UploadResponse {
            id: file_id,
            url: Self::url_for(file_id),
            size: bytes.len() as u64,
            mime_type,
        })
    }

    pub async fn open(&self, requester: &Identity, file_id: Uuid) -> ChatResult<StoredFile> {
        let fid = file_id.to_string();
        let url = Self::url_for(file_id);
        let uid = requester.id.to_string();
        let (file, allowed) = blocking(&self.db, move |db| {
            let file = db.get_file(&fid)?;
            let allowed = file.is_some() && db.can_read_file(&fid, &url, &uid)?;
            Ok((file, allowed))
        })
        .await?;

        let file = file.ok_or_else(|| ChatError::NotFound(format!("file {}", file_id)))?;
        if !allowed {
            return Err(ChatError::Forbidden(
                "file was not shared in any of your conversations".into(),
            ));
        }

        let path = self.dir.join(&file.id);
        let bytes = fs::read(&path).await.map_err(|e| {
            error!("Failed to read file {}: {}", path.display(), e);
            ChatError::NotFound(format!("file {}", file_id))
        })?;

        Ok(StoredFile {
            bytes,
            mime_type: file.mime_type,
        })
    }
}

/// The file id named by a `/files/{id}` URL.
pub(crate) fn file_id_from_url(url: &str) -> Option<Uuid> {
    url.strip_prefix("/files/")?.parse().ok()
}

fn is_allowed_type(mime_type: &str) -> bool {
    mime_type == "application/pdf"
        || mime_type
            .strip_prefix("image/")
            .is_some_and(|subtype| !subtype.is_empty())
}
