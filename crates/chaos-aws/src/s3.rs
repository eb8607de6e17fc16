//! Object-store contract over `aws s3api`.

use std::io::Write;

use chaos_core::services::{BackendError, ObjectStoreService};

use crate::command::AwsCli;
use crate::error::AwsError;

const SERVICE: &str = "s3";

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    pub cli: AwsCli,
}

impl S3ObjectStore {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

impl ObjectStoreService for S3ObjectStore {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let operation = "put-object";
        // The CLI only uploads from a path.
        let mut body = tempfile::NamedTempFile::new()
            .map_err(|source| AwsError::Staging { source }.into_backend(SERVICE, operation))?;
        body.write_all(bytes)
            .and_then(|()| body.flush())
            .map_err(|source| AwsError::Staging { source }.into_backend(SERVICE, operation))?;

        self.cli
            .call(
                "s3api",
                operation,
                &[
                    "--bucket".to_string(),
                    bucket.to_string(),
                    "--key".to_string(),
                    key.to_string(),
                    "--body".to_string(),
                    body.path().to_string_lossy().into_owned(),
                ],
            )
            .map_err(|err| err.into_backend(SERVICE, operation))?;
        Ok(())
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        let operation = "head-object";
        let result = self.cli.call(
            "s3api",
            operation,
            &[
                "--bucket".to_string(),
                bucket.to_string(),
                "--key".to_string(),
                key.to_string(),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into_backend(SERVICE, operation)),
        }
    }
}
