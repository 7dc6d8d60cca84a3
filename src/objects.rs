use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{ServiceError, ServiceResult};

pub const OBJECTS_DIR: &str = "objects";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Where evidence photos live. Keys are relative paths like `goodness/<sha>.png`.
pub trait ObjectStore {
    fn upload(&self, bytes: &[u8], prefix: &str, extension: &str) -> ServiceResult<StoredObject>;
    fn delete(&self, key: &str) -> ServiceResult<()>;
    fn exists(&self, key: &str) -> bool;
    fn url_for(&self, key: &str) -> String;
    /// Strips the public host prefix; `None` when the URL is not ours.
    fn key_from_url(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn open(workspace: &Path, base_url: &str) -> ServiceResult<Self> {
        let root = workspace.join(OBJECTS_DIR);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, key: &str) -> ServiceResult<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ServiceError::object_store(format!(
                "path traversal blocked: {}",
                key
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalObjectStore {
    fn upload(&self, bytes: &[u8], prefix: &str, extension: &str) -> ServiceResult<StoredObject> {
        let key = object_key(prefix, bytes, extension);
        let path = self.path_for(&key)?;
        if self.exists(&key) {
            tracing::debug!(key = %key, "object already stored");
            return Ok(StoredObject {
                url: self.url_for(&key),
                key,
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ServiceError::object_store(format!("upload failed: {e}")))?;
        }
        fs::write(&path, bytes)
            .map_err(|e| ServiceError::object_store(format!("upload failed: {e}")))?;
        tracing::debug!(key = %key, size = bytes.len(), "object stored");
        Ok(StoredObject {
            url: self.url_for(&key),
            key,
        })
    }

    fn delete(&self, key: &str) -> ServiceResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(key = %key, "object already absent");
                Ok(())
            }
            Err(e) => Err(ServiceError::object_store(format!("delete failed: {e}"))),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix(&self.base_url)?;
        let key = rest.strip_prefix('/')?.trim_start_matches('/');
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn object_key(prefix: &str, bytes: &[u8], extension: &str) -> String {
    format!(
        "{}/{}.{}",
        prefix.trim_matches('/'),
        sha256_hex(bytes),
        extension
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

/// Decodes a plain base64 string or a `data:<mime>;base64,<data>` URI.
pub fn decode_image_payload(raw: &str) -> ServiceResult<ImagePayload> {
    let t = raw.trim();
    let (mime, data) = match t.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| ServiceError::bad_params("image data URI is missing ','"))?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                ServiceError::bad_params("image data URI must be base64 encoded")
            })?;
            (Some(mime), data)
        }
        None => (None, t),
    };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| ServiceError::bad_params(format!("image is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(ServiceError::bad_params("image must not be empty"));
    }
    let extension = match mime {
        Some(m) => extension_for_mime(m),
        None => sniff_extension(&bytes),
    };
    Ok(ImagePayload { bytes, extension })
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "bin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn upload_then_delete_roundtrip() {
        let ws = temp_dir("schoold-objects");
        let store = LocalObjectStore::open(&ws, "http://files.local/school/").expect("open");
        let obj = store.upload(b"hello", "goodness", "png").expect("upload");
        assert!(obj.key.starts_with("goodness/"));
        assert!(obj.key.ends_with(".png"));
        assert_eq!(obj.url, format!("http://files.local/school/{}", obj.key));
        assert!(store.exists(&obj.key));
        assert_eq!(store.key_from_url(&obj.url), Some(obj.key.clone()));

        store.delete(&obj.key).expect("delete");
        assert!(!store.exists(&obj.key));
        store.delete(&obj.key).expect("second delete is a no-op");
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn foreign_urls_and_traversal_are_rejected() {
        let ws = temp_dir("schoold-objects-guard");
        let store = LocalObjectStore::open(&ws, "http://files.local/school").expect("open");
        assert_eq!(store.key_from_url("https://elsewhere/x.png"), None);
        assert_eq!(store.key_from_url("http://files.local/school"), None);
        assert!(store.delete("../secret").is_err());
        assert!(store.delete("/etc/passwd").is_err());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn keys_are_content_addressed() {
        assert_eq!(object_key("badness/", b"x", "jpg"), object_key("badness", b"x", "jpg"));
        assert_ne!(object_key("badness", b"x", "jpg"), object_key("badness", b"y", "jpg"));
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn decodes_data_uris_and_plain_base64() {
        let png = [0x89u8, b'P', b'N', b'G', 1, 2, 3];
        let plain = STANDARD.encode(png);
        let p = decode_image_payload(&plain).expect("plain");
        assert_eq!(p.extension, "png");
        assert_eq!(p.bytes, png.to_vec());

        let uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(b"jpegish"));
        let j = decode_image_payload(&uri).expect("uri");
        assert_eq!(j.extension, "jpg");

        assert!(decode_image_payload("data:image/png,raw").is_err());
        assert!(decode_image_payload("***").is_err());
        assert!(decode_image_payload("").is_err());
    }
}
