use super::upload::{FileStorage, UploadFile};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Supabase Storage bucket holding listing photos and documents.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    base_url: String,
    service_key: String,
    bucket: String,
    http: Client,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, service_key: &str, bucket: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            bucket: bucket.to_string(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket =
            std::env::var("SUPABASE_BUCKET").unwrap_or_else(|_| "listing-media".to_string());
        Some(Self::new(&base_url, &service_key, &bucket))
    }

    fn object_path(file: &UploadFile) -> String {
        format!("{}/{}", Uuid::new_v4(), urlencoding::encode(&file.name))
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[async_trait]
impl FileStorage for SupabaseStorage {
    async fn upload(&self, file: &UploadFile) -> Result<String, StorageError> {
        let path = Self::object_path(file);
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, path
        );
        let response = self
            .http
            .post(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", &file.content_type)
            .header("x-upsert", "false")
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected(format!("HTTP {status}: {body}")));
        }
        Ok(self.public_url(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_url_encoded() {
        let file = UploadFile::new("front panel.jpg", "image/jpeg", vec![1, 2, 3]);
        let path = SupabaseStorage::object_path(&file);
        assert!(path.ends_with("/front%20panel.jpg"));

        let storage = SupabaseStorage::new("https://proj.supabase.co/", "key", "listing-media");
        assert_eq!(
            storage.public_url("abc/front%20panel.jpg"),
            "https://proj.supabase.co/storage/v1/object/public/listing-media/abc/front%20panel.jpg"
        );
    }
}
