use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{DocumentKind, DocumentRef};

/// Object storage for scanned admission and student documents.
pub trait DocumentStore: Send + Sync {
    /// Persist `bytes` and return the URL the record should keep.
    fn store(&self, bytes: &[u8], folder_hint: &str) -> Result<String, DocumentError>;
    fn delete(&self, url: &str) -> Result<(), DocumentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document storage unavailable: {0}")]
    Unavailable(String),
    #[error("document {0} not found")]
    Missing(String),
}

/// Raw upload supplied alongside an admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub kind: DocumentKind,
    pub name: String,
    pub content: Vec<u8>,
}

/// Upload every document; on the first failure remove what was already stored.
pub(crate) fn upload_all(
    store: &dyn DocumentStore,
    uploads: Vec<DocumentUpload>,
) -> Result<Vec<DocumentRef>, DocumentError> {
    let mut stored = Vec::with_capacity(uploads.len());
    for upload in uploads {
        match store.store(&upload.content, upload.kind.folder_hint()) {
            Ok(url) => stored.push(DocumentRef {
                kind: upload.kind,
                name: upload.name,
                url,
            }),
            Err(err) => {
                purge(store, stored.iter().map(|doc| doc.url.as_str()), "failed upload");
                return Err(err);
            }
        }
    }
    Ok(stored)
}

/// Best-effort removal; failures are logged and never block the caller.
pub(crate) fn purge<'a>(
    store: &dyn DocumentStore,
    urls: impl IntoIterator<Item = &'a str>,
    owner: &str,
) -> usize {
    let mut removed = 0;
    for url in urls {
        match store.delete(url) {
            Ok(()) => removed += 1,
            Err(err) => warn!(%owner, %url, error = %err, "document cleanup failed"),
        }
    }
    removed
}
