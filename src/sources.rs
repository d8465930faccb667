//! JSON-file recipient source — the ingestion collaborator wired in by
//! the binary. A campaign's recipient-source reference is a path to a
//! JSON array of field maps; spreadsheet ingestion lives upstream and
//! lands here as plain rows.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::RecipientSource;
use mailcast_core::types::Recipient;

pub struct JsonFileSource {
    base_dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

#[async_trait]
impl RecipientSource for JsonFileSource {
    async fn fetch(&self, source_ref: &str) -> Result<Vec<Recipient>> {
        let path = {
            let p = PathBuf::from(source_ref);
            if p.is_absolute() { p } else { self.base_dir.join(p) }
        };
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MailcastError::Source(format!("{}: {e}", path.display())))?;
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&raw)
            .map_err(|e| MailcastError::Source(format!("{}: {e}", path.display())))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let fields: HashMap<String, String> = row
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        serde_json::Value::String(s) => Some((k, s)),
                        serde_json::Value::Null => None,
                        other => Some((k, other.to_string())),
                    })
                    .collect();
                Recipient::new(fields)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_rows_and_coerces_values() {
        let dir = std::env::temp_dir().join("mailcast-source-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("list.json"),
            r#"[{"email": "a@b.com", "name": "A", "age": 30, "skip": null}]"#,
        )
        .unwrap();

        let source = JsonFileSource::new(dir.clone());
        let rows = source.fetch("list.json").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("email"), Some("a@b.com"));
        assert_eq!(rows[0].field("age"), Some("30"));
        assert!(rows[0].field("skip").is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let source = JsonFileSource::new(std::env::temp_dir());
        assert!(matches!(
            source.fetch("does-not-exist.json").await,
            Err(MailcastError::Source(_))
        ));
    }
}
