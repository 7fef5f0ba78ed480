//! NDJSON commit records.
//!
//! Each request line is one JSON object `{"key": <tag>, "value": {...}}`.
//! The stream starts with exactly one `header`; the rest is any mix of
//! `file`, `lfsFile`, `deletedFile` and `copyFile` records.

use crate::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CommitHeader {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Inline file content, base64 in the payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InlinePayload {
    pub path: String,
    #[serde(alias = "content_bytes_base64")]
    pub content: String,
    /// Wire clients send `"base64"`; anything else is rejected.
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Reference to an externally uploaded blob.
#[derive(Debug, Clone, Deserialize)]
pub struct LfsFilePayload {
    pub path: String,
    #[serde(default)]
    pub algo: Option<String>,
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletedPayload {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPayload {
    pub from_path: String,
    #[serde(default)]
    pub from_revision: Option<String>,
    pub to_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "key", content = "value")]
pub enum CommitRecord {
    #[serde(rename = "header")]
    Header(CommitHeader),
    #[serde(rename = "file")]
    File(InlinePayload),
    #[serde(rename = "lfsFile")]
    LfsFile(LfsFilePayload),
    #[serde(rename = "deletedFile", alias = "deleted")]
    DeletedFile(DeletedPayload),
    #[serde(rename = "copyFile", alias = "copy")]
    CopyFile(CopyPayload),
}

impl CommitRecord {
    /// Parses one NDJSON line; every malformed line is a payload error with
    /// enough context to find the offending record.
    pub fn parse_line(line: &str) -> Result<Self> {
        let record: CommitRecord = serde_json::from_str(line)
            .map_err(|e| Error::MalformedPayload(format!("bad commit record: {e}")))?;
        if let CommitRecord::File(file) = &record {
            match file.encoding.as_deref() {
                None | Some("base64") => {}
                Some(other) => {
                    return Err(Error::MalformedPayload(format!(
                        "unsupported encoding {other}"
                    )));
                }
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let record =
            CommitRecord::parse_line(r#"{"key":"header","value":{"summary":"add weights"}}"#);
        assert!(matches!(record, Ok(CommitRecord::Header(h)) if h.summary == "add weights"));
    }

    #[test]
    fn test_parse_file_with_encoding() {
        let record = CommitRecord::parse_line(
            r#"{"key":"file","value":{"path":"a.json","content":"aGk=","encoding":"base64"}}"#,
        );
        assert!(matches!(record, Ok(CommitRecord::File(f)) if f.content == "aGk="));
    }

    #[test]
    fn test_parse_lfs_file() {
        let line = format!(
            r#"{{"key":"lfsFile","value":{{"path":"w.bin","algo":"sha256","oid":"{}","size":1048576}}}}"#,
            "a".repeat(64)
        );
        let record = CommitRecord::parse_line(&line);
        assert!(matches!(record, Ok(CommitRecord::LfsFile(f)) if f.size == 1048576));
    }

    #[test]
    fn test_deleted_alias() {
        let record = CommitRecord::parse_line(r#"{"key":"deleted","value":{"path":"old.txt"}}"#);
        assert!(matches!(record, Ok(CommitRecord::DeletedFile(_))));
    }

    #[test]
    fn test_copy_record_camel_case() {
        let record = CommitRecord::parse_line(
            r#"{"key":"copyFile","value":{"fromPath":"a","toPath":"b","fromRevision":"main"}}"#,
        );
        assert!(
            matches!(record, Ok(CommitRecord::CopyFile(c)) if c.from_revision.as_deref() == Some("main"))
        );
    }

    #[test]
    fn test_rejects_unknown_encoding() {
        let record = CommitRecord::parse_line(
            r#"{"key":"file","value":{"path":"a","content":"aGk=","encoding":"hex"}}"#,
        );
        assert!(matches!(record, Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(CommitRecord::parse_line("not json").is_err());
        assert!(CommitRecord::parse_line(r#"{"key":"unknown","value":{}}"#).is_err());
    }
}
