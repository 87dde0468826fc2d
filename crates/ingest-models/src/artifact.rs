//! Artifact keys and object URLs.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DecodeError, DecodeResult};

/// Store-relative identifier of an object inside a bucket.
///
/// A key is a `/`-separated path. It is never empty, never starts or ends
/// with `/`, and contains no `.` or `..` segments, so its last segment is
/// always usable as a local file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Validate and wrap a raw key.
    pub fn new(key: impl Into<String>) -> DecodeResult<Self> {
        let key = key.into();

        if key.is_empty() {
            return Err(DecodeError::invalid_key("key is empty"));
        }
        if key.starts_with('/') || key.ends_with('/') {
            return Err(DecodeError::invalid_key(format!(
                "{key} has a leading or trailing slash"
            )));
        }
        if key.contains('\0') {
            return Err(DecodeError::invalid_key(format!("{key:?} contains a NUL byte")));
        }
        if key.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(DecodeError::invalid_key(format!(
                "{key} contains a relative path segment"
            )));
        }

        Ok(Self(key))
    }

    /// Derive the key from an object URL of the form
    /// `http://<store-host>/<bucket>/<key>`.
    ///
    /// The URL must reference `bucket`; the remainder of the path is
    /// percent-decoded into the key.
    pub fn from_url(artifact_url: &str, bucket: &str) -> DecodeResult<Self> {
        let parsed = Url::parse(artifact_url)
            .map_err(|e| DecodeError::invalid_url(artifact_url, e.to_string()))?;

        let prefix = format!("/{bucket}/");
        let encoded = parsed
            .path()
            .strip_prefix(&prefix)
            .ok_or_else(|| DecodeError::WrongBucket {
                url: artifact_url.to_string(),
                bucket: bucket.to_string(),
            })?;

        let decoded = urlencoding::decode(encoded)
            .map_err(|e| DecodeError::invalid_key(format!("{encoded}: {e}")))?;

        Self::new(decoded.into_owned())
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactKey {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactKey> for String {
    fn from(key: ArtifactKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ArtifactKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the public URL of an object: `<endpoint>/<bucket>/<key>`.
///
/// `endpoint` is the store base URL, e.g. `http://minio:9000`. Key segments
/// are percent-encoded, so `ArtifactKey::from_url` inverts this.
pub fn artifact_url(endpoint: &str, bucket: &str, key: &ArtifactKey) -> DecodeResult<String> {
    let mut url =
        Url::parse(endpoint).map_err(|e| DecodeError::invalid_url(endpoint, e.to_string()))?;

    url.path_segments_mut()
        .map_err(|_| DecodeError::invalid_url(endpoint, "endpoint cannot be a base url"))?
        .pop_if_empty()
        .push(bucket)
        .extend(key.as_str().split('/'));

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_url() {
        let key = ArtifactKey::from_url("http://minio:9000/uploaded/cat.jpg", "uploaded").unwrap();
        assert_eq!(key.as_str(), "cat.jpg");
        assert_eq!(key.file_name(), "cat.jpg");
    }

    #[test]
    fn test_nested_key_keeps_prefix_path() {
        let key =
            ArtifactKey::from_url("http://minio:9000/uploaded/2024/05/dog.png", "uploaded").unwrap();
        assert_eq!(key.as_str(), "2024/05/dog.png");
        assert_eq!(key.file_name(), "dog.png");
    }

    #[test]
    fn test_key_is_percent_decoded() {
        let key =
            ArtifactKey::from_url("http://minio:9000/uploaded/my%20photo.jpg", "uploaded").unwrap();
        assert_eq!(key.as_str(), "my photo.jpg");
    }

    #[test]
    fn test_wrong_bucket_is_rejected() {
        let err = ArtifactKey::from_url("http://minio:9000/processed/cat.jpg", "uploaded")
            .unwrap_err();
        assert!(matches!(err, DecodeError::WrongBucket { .. }));

        // Bucket name must be a whole path segment.
        let err = ArtifactKey::from_url("http://minio:9000/uploaded-old/cat.jpg", "uploaded")
            .unwrap_err();
        assert!(matches!(err, DecodeError::WrongBucket { .. }));
    }

    #[test]
    fn test_unparseable_url_is_rejected() {
        let err = ArtifactKey::from_url("not a url", "uploaded").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUrl { .. }));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(ArtifactKey::from_url("http://minio:9000/uploaded/", "uploaded").is_err());
        assert!(ArtifactKey::from_url("http://minio:9000/uploaded/dir/", "uploaded").is_err());
        assert!(ArtifactKey::new("a/../b").is_err());
        assert!(ArtifactKey::new("./b").is_err());
        assert!(ArtifactKey::new("/abs").is_err());
        // Encoded separators are decoded before validation.
        assert!(ArtifactKey::from_url("http://minio:9000/uploaded/a%2F..%2Fb", "uploaded").is_err());
    }

    #[test]
    fn test_artifact_url_inverts_key_derivation() {
        let key = ArtifactKey::new("2024/my photo.jpg").unwrap();
        let url = artifact_url("http://minio:9000", "uploaded", &key).unwrap();
        assert_eq!(url, "http://minio:9000/uploaded/2024/my%20photo.jpg");

        let back = ArtifactKey::from_url(&url, "uploaded").unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_key_deserialize_validates() {
        let ok: ArtifactKey = serde_json::from_str("\"a/b.jpg\"").unwrap();
        assert_eq!(ok.file_name(), "b.jpg");
        assert!(serde_json::from_str::<ArtifactKey>("\"../b.jpg\"").is_err());
    }
}
