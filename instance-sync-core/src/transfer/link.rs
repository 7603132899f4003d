//! Remote link rewriting for entities hosted in cloud storage.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// New storage location for linked entities. The object path is kept and only
/// the provider and bucket change, so both storages must share the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRewrite {
    /// Storage provider scheme (`s3`, `google`, `azure`, ...).
    pub provider: String,
    pub bucket: String,
}

impl LinkRewrite {
    pub fn bucket_path(&self) -> String {
        format!("{}://{}", self.provider, self.bucket)
    }

    /// `gcs://old-bucket/images/a.png` becomes `s3://new-bucket/images/a.png`.
    /// Links that cannot be parsed are returned unchanged.
    pub fn apply(&self, link: &str) -> String {
        match Url::parse(link) {
            Ok(url) => format!("{}{}", self.bucket_path(), url.path()),
            Err(e) => {
                warn!(link, error = %e, "Cannot parse link, keeping it unchanged");
                link.to_string()
            }
        }
    }
}

/// Applies an optional rewrite to a link.
pub fn resolve_link(link: &str, rewrite: Option<&LinkRewrite>) -> String {
    match rewrite {
        Some(rw) => rw.apply(link),
        None => link.to_string(),
    }
}
