use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
};

use axum::extract::Multipart;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::{config::Config, error::AppError};

type HmacSha256 = Hmac<Sha256>;

/// Uploaded files live on local disk under `media_dir`; clients only ever get
/// time-limited signed URLs to them.
pub struct FileStorage {
    root: PathBuf,
    base_url: String,
    secret: Vec<u8>,
    ttl_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// File part of a multipart body plus its text fields.
pub struct MultipartUpload {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileStorage {
    pub fn new(config: &Config) -> Self {
        Self {
            root: PathBuf::from(&config.media_dir),
            base_url: config.app_base_url.trim_end_matches('/').to_string(),
            secret: config.file_signing_secret.as_bytes().to_vec(),
            ttl_seconds: config.file_url_ttl_seconds,
        }
    }

    /// Writes `bytes` to `<owner>/<kind>/<uuid>.<ext>` and returns that relative path.
    pub async fn save(
        &self,
        owner: Uuid,
        kind: &str,
        original_filename: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let dir = self.root.join(owner.to_string()).join(kind);
        tokio::fs::create_dir_all(&dir).await?;

        let ext = safe_extension(original_filename);
        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        tokio::fs::write(dir.join(&filename), bytes).await?;

        Ok(format!("{owner}/{kind}/{filename}"))
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, AppError> {
        let path = self
            .resolve(relative)
            .ok_or_else(|| AppError::bad_request("Invalid file path"))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found("File not found"))
            }
            Err(e) => Err(AppError::Internal(e.into())),
        }
    }

    /// Best-effort removal, used when a DB write fails after the file was stored.
    pub async fn remove(&self, relative: &str) {
        if let Some(path) = self.resolve(relative) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!("could not remove orphan upload {:?}: {}", path, e);
            }
        }
    }

    /// Only plain relative paths below the storage root are accepted.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }

    pub fn signed_url(&self, relative: &str) -> SignedUrl {
        self.signed_url_at(relative, Utc::now())
    }

    fn signed_url_at(&self, relative: &str, now: DateTime<Utc>) -> SignedUrl {
        let expires_at = now + chrono::Duration::seconds(self.ttl_seconds as i64);
        let expires = expires_at.timestamp();
        let signature = self.sign(relative, expires);
        SignedUrl {
            url: format!(
                "{}/files/{relative}?expires={expires}&signature={signature}",
                self.base_url
            ),
            expires_at,
        }
    }

    fn mac(&self, relative: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC takes any key size");
        mac.update(format!("{relative}:{expires}").as_bytes());
        mac
    }

    pub fn sign(&self, relative: &str, expires: i64) -> String {
        hex::encode(self.mac(relative, expires).finalize().into_bytes())
    }

    /// Constant-time signature check plus expiry.
    pub fn verify(&self, relative: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(sig) = hex::decode(signature) else {
            return false;
        };
        self.mac(relative, expires).verify_slice(&sig).is_ok()
    }
}

/// Alphanumeric extension of at most 10 chars, `bin` otherwise.
fn safe_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

/// Drains a multipart body: the `file` part is kept as bytes, every other
/// part as text.
pub async fn read_multipart(mut multipart: Multipart) -> Result<MultipartUpload, AppError> {
    let mut upload = MultipartUpload {
        file: None,
        fields: HashMap::new(),
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await?.to_vec();
            upload.file = Some(UploadedFile {
                filename,
                content_type,
                bytes,
            });
        } else if !name.is_empty() {
            let value = field.text().await?;
            upload.fields.insert(name, value);
        }
    }

    Ok(upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn storage() -> FileStorage {
        FileStorage::new(&test_config())
    }

    #[test]
    fn signed_url_verifies_until_expiry() {
        let s = storage();
        let now = Utc::now();
        let path = "0b2c/kyc/file.pdf";
        let expires = now.timestamp() + 60;
        let sig = s.sign(path, expires);

        assert!(s.verify(path, expires, &sig, now));
        assert!(!s.verify(path, expires, &sig, now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn signature_is_bound_to_path_and_expiry() {
        let s = storage();
        let now = Utc::now();
        let expires = now.timestamp() + 60;
        let sig = s.sign("a/kyc/x.pdf", expires);

        assert!(!s.verify("a/kyc/y.pdf", expires, &sig, now));
        assert!(!s.verify("a/kyc/x.pdf", expires + 1, &sig, now));
        assert!(!s.verify("a/kyc/x.pdf", expires, "not-hex", now));
    }

    #[test]
    fn signed_url_embeds_path_and_signature() {
        let s = storage();
        let now = Utc::now();
        let signed = s.signed_url_at("u/reports/r.pdf", now);
        let expires = signed.expires_at.timestamp();
        assert_eq!(expires, now.timestamp() + 900);
        assert_eq!(
            signed.url,
            format!(
                "https://portal.example/files/u/reports/r.pdf?expires={expires}&signature={}",
                s.sign("u/reports/r.pdf", expires)
            )
        );
    }

    #[test]
    fn traversal_is_refused() {
        let s = storage();
        assert!(s.resolve("../etc/passwd").is_none());
        assert!(s.resolve("/etc/passwd").is_none());
        assert!(s.resolve("").is_none());
        assert!(s.resolve("a/kyc/b.pdf").is_some());
    }

    #[test]
    fn extensions_are_sanitised() {
        assert_eq!(safe_extension("passport.PDF"), "pdf");
        assert_eq!(safe_extension("noext"), "bin");
        assert_eq!(safe_extension("evil.p$p"), "bin");
    }

    #[tokio::test]
    async fn save_then_read_back() {
        let s = storage();
        let owner = Uuid::new_v4();
        let path = s.save(owner, "kyc", "id.png", b"png-bytes").await.unwrap();
        assert!(path.starts_with(&format!("{owner}/kyc/")));
        assert!(path.ends_with(".png"));
        assert_eq!(s.read(&path).await.unwrap(), b"png-bytes");
        s.remove(&path).await;
        assert!(matches!(s.read(&path).await, Err(AppError::NotFound(_))));
    }
}
