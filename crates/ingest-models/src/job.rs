//! Job message wire format and the decoded job descriptor.

use std::fmt;

use schemars::JsonSchema;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKey;
use crate::error::DecodeResult;

/// Identifier of an upload, as assigned by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job message as published on the queue: `{"id": <integer>, "url": "<string>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobMessage {
    /// Upload id
    #[serde(deserialize_with = "deserialize_job_id")]
    #[schemars(with = "i64")]
    pub id: JobId,
    /// Object URL of the uploaded artifact
    pub url: String,
}

impl JobMessage {
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id: JobId(id),
            url: url.into(),
        }
    }

    /// Encode to the JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// JSON schema of the wire format.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(JobMessage)
    }
}

// Upload intakes have published the id both as a number and as a quoted number.
fn deserialize_job_id<'de, D>(deserializer: D) -> Result<JobId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(JobId(id)),
        RawId::Text(text) => text
            .trim()
            .parse::<i64>()
            .map(JobId)
            .map_err(|_| de::Error::custom(format!("job id {text:?} is not an integer"))),
    }
}

/// Decoded, immutable description of one processing job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: JobId,
    pub artifact_url: String,
    pub artifact_key: ArtifactKey,
}

impl JobDescriptor {
    /// Decode a raw message body and derive the artifact key against the
    /// source bucket.
    pub fn decode(body: &[u8], source_bucket: &str) -> DecodeResult<Self> {
        let message: JobMessage = serde_json::from_slice(body)?;
        Self::from_message(message, source_bucket)
    }

    pub fn from_message(message: JobMessage, source_bucket: &str) -> DecodeResult<Self> {
        let artifact_key = ArtifactKey::from_url(&message.url, source_bucket)?;
        Ok(Self {
            id: message.id,
            artifact_url: message.url,
            artifact_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    #[test]
    fn test_decode_valid_message() {
        let body = br#"{"id": 42, "url": "http://minio:9000/uploaded/cat.jpg"}"#;
        let job = JobDescriptor::decode(body, "uploaded").unwrap();

        assert_eq!(job.id, JobId(42));
        assert_eq!(job.artifact_url, "http://minio:9000/uploaded/cat.jpg");
        assert_eq!(job.artifact_key.as_str(), "cat.jpg");
    }

    #[test]
    fn test_decode_accepts_quoted_id() {
        let body = br#"{"url":"http://minio:9000/uploaded/uploaded-1234","id":"7"}"#;
        let job = JobDescriptor::decode(body, "uploaded").unwrap();
        assert_eq!(job.id, JobId(7));
        assert_eq!(job.artifact_key.as_str(), "uploaded-1234");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let body = br#"{"id": 1, "url": "http://minio:9000/uploaded/a.png", "filename": "a.png"}"#;
        assert!(JobDescriptor::decode(body, "uploaded").is_ok());
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        let cases: [&[u8]; 5] = [
            b"not json",
            b"",
            br#"{"id": 1}"#,
            br#"{"url": "http://minio:9000/uploaded/a.png"}"#,
            br#"{"id": "seven", "url": "http://minio:9000/uploaded/a.png"}"#,
        ];

        for body in cases {
            let err = JobDescriptor::decode(body, "uploaded").unwrap_err();
            assert!(
                matches!(err, DecodeError::Malformed(_)),
                "unexpected error for {:?}: {err}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_decode_rejects_foreign_bucket() {
        let body = br#"{"id": 3, "url": "http://minio:9000/processed/cat.jpg"}"#;
        let err = JobDescriptor::decode(body, "uploaded").unwrap_err();
        assert!(matches!(err, DecodeError::WrongBucket { .. }));
    }

    #[test]
    fn test_message_wire_format() {
        let message = JobMessage::new(5, "http://minio:9000/uploaded/x.jpg");
        let json = message.to_json().unwrap();
        assert_eq!(json, r#"{"id":5,"url":"http://minio:9000/uploaded/x.jpg"}"#);

        let back: JobMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_schema_requires_id_and_url() {
        let schema = serde_json::to_value(JobMessage::json_schema()).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "id"));
        assert!(required.iter().any(|v| v == "url"));
    }
}
