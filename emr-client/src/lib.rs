//! Client for running Spark jobs on EMR on EKS (EMR containers).
//!
//! Tenants are addressed by their Kubernetes namespace. The client resolves
//! a namespace to the running virtual cluster that serves it, then starts,
//! describes, lists and cancels job runs on that cluster. All state lives in
//! the service; the client holds nothing between calls.

pub mod api;
pub mod client;
pub mod error;
pub mod request;
pub mod sdk;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use api::JobRunApi;
pub use client::{JobClient, MatchPolicy, WaitOptions};
pub use error::{EmrError, ErrorKind};
pub use request::{
    DbPassword, JobDefaults, ListClustersFilter, ListJobsFilter, ProxyConfig, SparkJobSpec,
    StartJobRunRequest,
};
pub use sdk::{ClientConfig, EmrContainers};
pub use types::{
    ContainerProviderType, JobRun, JobRunRef, JobRunState, Page, VirtualCluster,
    VirtualClusterState,
};

/// Re-exported so callers can cancel [`JobClient::wait_for_job`].
pub use tokio_util::sync::CancellationToken;
