//! AWS realisation of the service contracts, driven through the `aws` CLI.

pub mod cloudwatch;
pub mod command;
pub mod error;
pub mod lambda;
pub mod s3;
pub mod sqs;

pub use cloudwatch::*;
pub use command::*;
pub use error::*;
pub use lambda::*;
pub use s3::*;
pub use sqs::*;

/// One adapter per contract, sharing a single CLI handle.
pub struct AwsBackends {
    pub compute: LambdaConfigService,
    pub queue: SqsQueueService,
    pub store: S3ObjectStore,
    pub metrics: CloudWatchMetrics,
}

impl AwsBackends {
    pub fn new(cli: AwsCli) -> Self {
        Self {
            compute: LambdaConfigService::new(cli.clone()),
            queue: SqsQueueService::new(cli.clone()),
            store: S3ObjectStore::new(cli.clone()),
            metrics: CloudWatchMetrics::new(cli),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AwsBackends, AwsCli, AwsError, CloudWatchMetrics, CommandOutput, LambdaConfigService,
        ProcessRunner, S3ObjectStore, SqsQueueService,
    };
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_adapters() {
        let _ = TypeId::of::<AwsCli>();
        let _ = TypeId::of::<AwsError>();
        let _ = TypeId::of::<CommandOutput>();
        let _ = TypeId::of::<ProcessRunner>();
        let _ = TypeId::of::<LambdaConfigService>();
        let _ = TypeId::of::<SqsQueueService>();
        let _ = TypeId::of::<S3ObjectStore>();
        let _ = TypeId::of::<CloudWatchMetrics>();
        let _ = TypeId::of::<AwsBackends>();
    }
}
