//! 文档内容存储
//!
//! 基于 `object_store`，支持本地文件系统、内存和 S3 兼容存储。
//! 超过阈值的内容以 gzip 压缩后写入，校验和始终针对原始内容计算。

use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use simrs_core::{Result, SimrsError};
use std::io::{Read, Write};
use std::sync::Arc;
use uuid::Uuid;

/// S3 连接参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Options {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

/// 已写入的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub compressed: bool,
}

/// 文档内容存储
#[derive(Debug, Clone)]
pub struct DocumentStorage {
    store: Arc<dyn ObjectStore>,
    compression_threshold: usize,
}

impl DocumentStorage {
    /// `compression_threshold` 为 0 时不压缩
    pub fn new(store: Arc<dyn ObjectStore>, compression_threshold: usize) -> Self {
        Self {
            store,
            compression_threshold,
        }
    }

    pub fn local(root: &str, compression_threshold: usize) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root).map_err(storage_error)?;
        tracing::info!("Document storage on local filesystem at {}", root);
        Ok(Self::new(Arc::new(store), compression_threshold))
    }

    pub fn in_memory(compression_threshold: usize) -> Self {
        Self::new(Arc::new(InMemory::new()), compression_threshold)
    }

    pub fn s3(options: &S3Options, compression_threshold: usize) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&options.bucket)
            .with_region(&options.region)
            .with_allow_http(options.allow_http);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key_id) = &options.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &options.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        let store = builder.build().map_err(storage_error)?;
        tracing::info!("Document storage on S3 bucket {}", options.bucket);
        Ok(Self::new(Arc::new(store), compression_threshold))
    }

    /// 写入内容
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<StoredObject> {
        let checksum = sha256_hex(data);
        let compressed = self.compression_threshold > 0 && data.len() > self.compression_threshold;
        let payload = if compressed {
            gzip(data)?
        } else {
            data.to_vec()
        };

        tracing::debug!(
            key,
            original = data.len(),
            stored = payload.len(),
            "Writing document object"
        );
        self.store
            .put(&ObjectPath::from(key), Bytes::from(payload))
            .await
            .map_err(storage_error)?;

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes: data.len() as i64,
            checksum,
            compressed,
        })
    }

    /// 读取内容，必要时解压
    pub async fn get(&self, key: &str, compressed: bool) -> Result<Vec<u8>> {
        let result = self
            .store
            .get(&ObjectPath::from(key))
            .await
            .map_err(storage_error)?;
        let bytes = result.bytes().await.map_err(storage_error)?;
        if compressed {
            gunzip(&bytes)
        } else {
            Ok(bytes.to_vec())
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&ObjectPath::from(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                tracing::warn!("Object {} was already gone", key);
                Ok(())
            }
            Err(e) => Err(storage_error(e)),
        }
    }
}

/// 对象键：documents/{yyyy}/{mm}/{uuid}
pub fn object_key(id: Uuid, at: DateTime<Utc>) -> String {
    format!("documents/{:04}/{:02}/{}", at.year(), at.month(), id)
}

/// 计算内容哈希值
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn storage_error(err: object_store::Error) -> SimrsError {
    match err {
        object_store::Error::NotFound { path, .. } => {
            SimrsError::NotFound(format!("object {} not found", path))
        }
        other => SimrsError::Storage(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_key_layout() {
        let id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(
            object_key(id, at),
            "documents/2026/03/00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn test_small_content_is_stored_raw() {
        let storage = DocumentStorage::in_memory(1024);
        let stored = storage.put("documents/a", b"hello").await.unwrap();
        assert!(!stored.compressed);
        assert_eq!(stored.size_bytes, 5);
        assert_eq!(stored.checksum, sha256_hex(b"hello"));
        assert_eq!(storage.get("documents/a", false).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_large_content_is_compressed() {
        let storage = DocumentStorage::in_memory(64);
        let data = vec![b'x'; 4096];
        let stored = storage.put("documents/big", &data).await.unwrap();
        assert!(stored.compressed);
        assert_eq!(stored.size_bytes, 4096);
        assert_eq!(storage.get("documents/big", true).await.unwrap(), data);

        storage.delete("documents/big").await.unwrap();
        assert!(matches!(
            storage.get("documents/big", true).await,
            Err(SimrsError::NotFound(_))
        ));
        // 重复删除不报错
        storage.delete("documents/big").await.unwrap();
    }
}
