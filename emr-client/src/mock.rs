//! In-memory [`JobRunApi`] for tests: canned responses, every call recorded, no network.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::JobRunApi;
use crate::error::EmrError;
use crate::request::{ListClustersFilter, ListJobsFilter, StartJobRunRequest};
use crate::types::{JobRun, JobRunRef, Page, VirtualCluster, VirtualClusterState};

/// A request the mock received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartJobRun(StartJobRunRequest),
    DescribeJobRun {
        job_id: String,
        virtual_cluster_id: String,
    },
    CancelJobRun {
        job_id: String,
        virtual_cluster_id: String,
    },
    ListJobRuns {
        virtual_cluster_id: String,
        filter: ListJobsFilter,
        next_token: Option<String>,
    },
    ListVirtualClusters {
        filter: ListClustersFilter,
        next_token: Option<String>,
    },
}

/// Build a running EKS virtual cluster serving `namespace`.
pub fn running_cluster(id: &str, namespace: &str) -> VirtualCluster {
    VirtualCluster {
        id: Some(id.to_string()),
        name: Some(format!("{}-cluster", namespace)),
        state: Some(VirtualClusterState::Running),
        container_provider_type: Some("EKS".to_string()),
        container_provider_id: Some("eks-main".to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Pages are addressed by tokens `page-1`, `page-2`, ...
#[derive(Debug, Default)]
pub struct MockJobRunApi {
    cluster_pages: Vec<Vec<VirtualCluster>>,
    job_pages: Vec<Vec<JobRun>>,

    /// Successive describe results; the last one repeats.
    job_states: Vec<JobRun>,
    start_id: String,
    start_error: Mutex<Option<EmrError>>,
    describes: Mutex<usize>,
    calls: Mutex<Vec<Call>>,
}

impl MockJobRunApi {
    pub fn new() -> Self {
        Self {
            start_id: "job-0001".to_string(),
            ..Default::default()
        }
    }

    pub fn with_cluster_pages(mut self, pages: Vec<Vec<VirtualCluster>>) -> Self {
        self.cluster_pages = pages;
        self
    }

    pub fn with_job_pages(mut self, pages: Vec<Vec<JobRun>>) -> Self {
        self.job_pages = pages;
        self
    }

    pub fn with_job_states(mut self, states: Vec<JobRun>) -> Self {
        self.job_states = states;
        self
    }

    pub fn with_start_id(mut self, id: &str) -> Self {
        self.start_id = id.to_string();
        self
    }

    /// Fail the next start call with `err`.
    pub fn failing_start(self, err: EmrError) -> Self {
        *self.start_error.lock().expect("mock lock poisoned") = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    pub fn start_requests(&self) -> Vec<StartJobRunRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::StartJobRun(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("mock lock poisoned").push(call);
    }
}

fn page<T: Clone>(pages: &[Vec<T>], next_token: Option<&str>) -> Result<Page<T>, EmrError> {
    let index = match next_token {
        None => 0,
        Some(token) => token
            .strip_prefix("page-")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| EmrError::validation("list", format!("bad token `{}`", token)))?,
    };

    Ok(Page {
        items: pages.get(index).cloned().unwrap_or_default(),
        next_token: (index + 1 < pages.len()).then(|| format!("page-{}", index + 1)),
    })
}

#[async_trait]
impl JobRunApi for MockJobRunApi {
    async fn start_job_run(&self, request: &StartJobRunRequest) -> Result<String, EmrError> {
        self.record(Call::StartJobRun(request.clone()));
        if let Some(err) = self.start_error.lock().expect("mock lock poisoned").take() {
            return Err(err);
        }
        Ok(self.start_id.clone())
    }

    async fn describe_job_run(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRun, EmrError> {
        self.record(Call::DescribeJobRun {
            job_id: job_id.to_string(),
            virtual_cluster_id: virtual_cluster_id.to_string(),
        });

        if self.job_states.is_empty() {
            return Err(EmrError::from_service_code(
                "describe_job_run",
                Some("ResourceNotFoundException"),
                Some("Job run does not exist"),
            ));
        }

        let mut describes = self.describes.lock().expect("mock lock poisoned");
        let index = (*describes).min(self.job_states.len() - 1);
        *describes += 1;
        Ok(self.job_states[index].clone())
    }

    async fn cancel_job_run(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRunRef, EmrError> {
        self.record(Call::CancelJobRun {
            job_id: job_id.to_string(),
            virtual_cluster_id: virtual_cluster_id.to_string(),
        });
        Ok(JobRunRef {
            id: job_id.to_string(),
            virtual_cluster_id: virtual_cluster_id.to_string(),
        })
    }

    async fn list_job_runs(
        &self,
        virtual_cluster_id: &str,
        filter: &ListJobsFilter,
        next_token: Option<String>,
    ) -> Result<Page<JobRun>, EmrError> {
        let result = page(&self.job_pages, next_token.as_deref());
        self.record(Call::ListJobRuns {
            virtual_cluster_id: virtual_cluster_id.to_string(),
            filter: filter.clone(),
            next_token,
        });
        result
    }

    async fn list_virtual_clusters(
        &self,
        filter: &ListClustersFilter,
        next_token: Option<String>,
    ) -> Result<Page<VirtualCluster>, EmrError> {
        let result = page(&self.cluster_pages, next_token.as_deref());
        self.record(Call::ListVirtualClusters {
            filter: filter.clone(),
            next_token,
        });
        result
    }
}
