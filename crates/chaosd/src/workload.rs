//! Generate a clip and drop it into the video bucket, which is what starts
//! the pipeline.

use std::time::Instant;

use chaos_core::services::{BackendError, ObjectStoreService};
use chaos_core::types::UploadRecord;
use chaos_media::{ClipSpec, WorkloadGenerationError, WorkloadGenerator};
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Generate(#[from] WorkloadGenerationError),
    #[error("failed to upload {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedUnit {
    pub record: UploadRecord,
    /// Monotonic instant the object store accepted the upload.
    pub uploaded_at: Instant,
}

pub struct Uploader<'a> {
    pub store: &'a dyn ObjectStoreService,
    pub generator: &'a dyn WorkloadGenerator,
    pub clock: &'a dyn Clock,
    pub bucket: &'a str,
    pub user_prefix: &'a str,
    pub clip_duration_secs: u64,
}

impl Uploader<'_> {
    pub fn upload(&self, label: &str, color: &str) -> Result<UploadedUnit, UploadError> {
        let unit = self
            .generator
            .generate(&ClipSpec::new(label, color, self.clip_duration_secs))?;
        let video_id = video_id(&unit.file_name);
        let key = format!("{}/{}", self.user_prefix, video_id);

        self.store
            .put(self.bucket, &key, &unit.bytes)
            .map_err(|source| UploadError::Store {
                key: key.clone(),
                source,
            })?;
        let uploaded_at = self.clock.now();
        info!(label, color, key = %key, bytes = unit.bytes.len(), "uploaded workload unit");

        Ok(UploadedUnit {
            record: UploadRecord {
                label: label.to_string(),
                video_id,
                key,
                color: color.to_string(),
            },
            uploaded_at,
        })
    }
}

/// Unique per upload; the worker names its result after it.
pub fn video_id(file_name: &str) -> String {
    format!("{}-{}", Uuid::new_v4().simple(), file_name)
}
