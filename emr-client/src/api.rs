use async_trait::async_trait;

use crate::error::EmrError;
use crate::request::{ListClustersFilter, ListJobsFilter, StartJobRunRequest};
use crate::types::{JobRun, JobRunRef, Page, VirtualCluster};

/// The remote operations the job client consumes.
///
/// Each method is a single request/response exchange with the service.
/// Paging is left to the caller: list methods take the continuation token
/// of the previous page and return one page.
#[async_trait]
pub trait JobRunApi: Send + Sync {
    /// Start a job run and return its identifier.
    async fn start_job_run(&self, request: &StartJobRunRequest) -> Result<String, EmrError>;

    async fn describe_job_run(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRun, EmrError>;

    async fn cancel_job_run(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRunRef, EmrError>;

    async fn list_job_runs(
        &self,
        virtual_cluster_id: &str,
        filter: &ListJobsFilter,
        next_token: Option<String>,
    ) -> Result<Page<JobRun>, EmrError>;

    async fn list_virtual_clusters(
        &self,
        filter: &ListClustersFilter,
        next_token: Option<String>,
    ) -> Result<Page<VirtualCluster>, EmrError>;
}
