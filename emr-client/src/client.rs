use std::time::Duration;

use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobRunApi;
use crate::error::EmrError;
use crate::request::{
    JobDefaults, ListClustersFilter, ListJobsFilter, SparkJobSpec, StartJobRunRequest,
};
use crate::sdk::{ClientConfig, EmrContainers};
use crate::types::{JobRun, JobRunRef, Page, VirtualCluster};

/// How a namespace is resolved when several running clusters serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Take the first cluster in listing order. The listing order is the
    /// service's, so which duplicate wins is not guaranteed.
    #[default]
    First,

    /// Fail with [`EmrError::AmbiguousNamespace`].
    Unique,
}

/// Polling settings for [`JobClient::wait_for_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Starts, inspects and cancels Spark jobs on EMR on EKS.
///
/// Every operation is a plain request/response exchange with the service:
/// nothing is cached and no call is retried.
#[derive(Debug, Clone)]
pub struct JobClient<A> {
    api: A,
    defaults: JobDefaults,
    match_policy: MatchPolicy,
}

impl JobClient<EmrContainers> {
    /// Connect to the service in the configured region.
    pub async fn connect(cfg: &ClientConfig, defaults: JobDefaults) -> Result<Self, EmrError> {
        Ok(Self::new(EmrContainers::connect(cfg).await?, defaults))
    }
}

impl<A: JobRunApi> JobClient<A> {
    pub fn new(api: A, defaults: JobDefaults) -> Self {
        Self {
            api,
            defaults,
            match_policy: MatchPolicy::default(),
        }
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn defaults(&self) -> &JobDefaults {
        &self.defaults
    }

    /// Submit a Spark job to the cluster serving `spec.namespace` and return its id.
    ///
    /// The call returns as soon as the service accepts the job. Use
    /// [`JobClient::wait_for_job`] to block until it settles.
    pub async fn submit_job(&self, spec: &SparkJobSpec) -> Result<String, EmrError> {
        Ok(self.start_job(spec).await?.id)
    }

    /// Like [`JobClient::submit_job`], also returning the cluster the job landed on.
    pub async fn start_job(&self, spec: &SparkJobSpec) -> Result<JobRunRef, EmrError> {
        let cluster_id = self.require_cluster(&spec.namespace).await?;
        let request = StartJobRunRequest::build(&cluster_id, spec, &self.defaults)?;

        let job_id = self.api.start_job_run(&request).await?;
        info!(
            job_id = %job_id,
            job_name = %spec.job_name,
            virtual_cluster_id = %cluster_id,
            "Job run submitted"
        );
        Ok(JobRunRef {
            id: job_id,
            virtual_cluster_id: cluster_id,
        })
    }

    pub async fn describe_job(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRun, EmrError> {
        self.api.describe_job_run(job_id, virtual_cluster_id).await
    }

    /// Request cancellation. The job moves to `CANCEL_PENDING` and later
    /// `CANCELLED` on the service side; this does not wait for either.
    pub async fn cancel_job(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRunRef, EmrError> {
        let cancelled = self.api.cancel_job_run(job_id, virtual_cluster_id).await?;
        info!("Cancellation requested for {}", cancelled);
        Ok(cancelled)
    }

    /// List the job runs of the cluster serving `namespace`, following every page.
    pub async fn list_jobs(
        &self,
        namespace: &str,
        filter: &ListJobsFilter,
    ) -> Result<Vec<JobRun>, EmrError> {
        let cluster_id = self.require_cluster(namespace).await?;

        let mut jobs = vec![];
        let mut next_token = None;
        loop {
            let page = self.list_jobs_page(&cluster_id, filter, next_token).await?;
            jobs.extend(page.items);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(jobs)
    }

    /// One page of job runs for an already resolved cluster.
    pub async fn list_jobs_page(
        &self,
        virtual_cluster_id: &str,
        filter: &ListJobsFilter,
        next_token: Option<String>,
    ) -> Result<Page<JobRun>, EmrError> {
        self.api
            .list_job_runs(virtual_cluster_id, filter, next_token)
            .await
    }

    /// List virtual clusters matching `filter`, following every page.
    pub async fn list_clusters(
        &self,
        filter: &ListClustersFilter,
    ) -> Result<Vec<VirtualCluster>, EmrError> {
        let mut clusters = vec![];
        let mut next_token = None;
        loop {
            let page = self.list_clusters_page(filter, next_token).await?;
            clusters.extend(page.items);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(clusters)
    }

    pub async fn list_clusters_page(
        &self,
        filter: &ListClustersFilter,
        next_token: Option<String>,
    ) -> Result<Page<VirtualCluster>, EmrError> {
        self.api.list_virtual_clusters(filter, next_token).await
    }

    /// Find the running EKS virtual cluster serving `namespace`.
    ///
    /// `Ok(None)` means no running cluster serves the namespace. Failures
    /// of the listing call are still returned as errors.
    pub async fn resolve_cluster(&self, namespace: &str) -> Result<Option<String>, EmrError> {
        let clusters = self.list_clusters(&ListClustersFilter::running()).await?;

        let matches: Vec<String> = clusters
            .into_iter()
            .filter(|vc| vc.namespace.as_deref() == Some(namespace))
            .filter_map(|vc| vc.id)
            .collect();

        match (matches.len(), self.match_policy) {
            (0, _) => {
                debug!(namespace, "No running virtual cluster for namespace");
                Ok(None)
            }
            (1, _) | (_, MatchPolicy::First) => {
                if matches.len() > 1 {
                    warn!(
                        namespace,
                        candidates = ?matches,
                        "Several running virtual clusters serve the namespace, using the first"
                    );
                }
                Ok(matches.into_iter().next())
            }
            (_, MatchPolicy::Unique) => Err(EmrError::AmbiguousNamespace {
                namespace: namespace.to_string(),
                cluster_ids: matches,
            }),
        }
    }

    /// Poll a job until it settles (completed, failed, cancelled or
    /// cancel-pending) and return its final record.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
        options: &WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<JobRun, EmrError> {
        // A timeout past the clock's range means no deadline.
        let deadline = Instant::now().checked_add(options.timeout);

        loop {
            let job = self.describe_job(job_id, virtual_cluster_id).await?;
            if let Some(state) = job.state.as_ref().filter(|s| s.is_settled()) {
                info!(job_id, state = %state, "Job run settled");
                return Ok(job);
            }
            debug!(job_id, state = ?job.state, "Job run still in progress");

            select! {
                _ = cancel.cancelled() => {
                    return Err(EmrError::WaitCancelled { job_id: job_id.to_string() });
                }
                _ = expire(deadline) => {
                    return Err(EmrError::WaitTimedOut {
                        job_id: job_id.to_string(),
                        timeout: options.timeout,
                    });
                }
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
        }
    }

    async fn require_cluster(&self, namespace: &str) -> Result<String, EmrError> {
        self.resolve_cluster(namespace)
            .await?
            .ok_or_else(|| EmrError::NamespaceNotFound(namespace.to_string()))
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{running_cluster, Call, MockJobRunApi};
    use crate::request::tests::spec;
    use crate::types::{JobRunState, VirtualClusterState};
    use chrono::{TimeZone, Utc};

    fn client(api: MockJobRunApi) -> JobClient<MockJobRunApi> {
        JobClient::new(api, JobDefaults::default())
    }

    fn job(id: &str, state: JobRunState) -> JobRun {
        JobRun {
            id: Some(id.into()),
            state: Some(state),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resolve_unknown_namespace_is_none() {
        let api = MockJobRunApi::new()
            .with_cluster_pages(vec![vec![running_cluster("vc-1", "tenant-a")]]);
        let client = client(api);

        assert_eq!(client.resolve_cluster("tenant-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn resolve_ignores_clusters_without_namespace() {
        let mut no_provider = running_cluster("vc-0", "x");
        no_provider.namespace = None;
        let api = MockJobRunApi::new().with_cluster_pages(vec![vec![
            no_provider,
            running_cluster("vc-1", "tenant-a"),
        ]]);
        let client = client(api);

        assert_eq!(
            client.resolve_cluster("tenant-a").await.unwrap().as_deref(),
            Some("vc-1")
        );
        assert_eq!(client.resolve_cluster("x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn resolve_queries_running_eks_clusters_every_time() {
        let api = MockJobRunApi::new()
            .with_cluster_pages(vec![vec![running_cluster("vc-1", "tenant-a")]]);
        let client = client(api);

        client.resolve_cluster("tenant-a").await.unwrap();
        client.resolve_cluster("tenant-a").await.unwrap();

        let filters: Vec<_> = client
            .api()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ListVirtualClusters { filter, .. } => Some(filter),
                _ => None,
            })
            .collect();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].states, vec![VirtualClusterState::Running]);
        assert_eq!(filters[0].provider_type.as_str(), "EKS");
    }

    #[tokio::test]
    async fn resolve_scans_every_page() {
        let api = MockJobRunApi::new().with_cluster_pages(vec![
            vec![running_cluster("vc-1", "tenant-a")],
            vec![running_cluster("vc-2", "tenant-b")],
        ]);
        let client = client(api);

        assert_eq!(
            client.resolve_cluster("tenant-b").await.unwrap().as_deref(),
            Some("vc-2")
        );
    }

    #[tokio::test]
    async fn duplicate_namespace_follows_policy() {
        let pages = vec![vec![
            running_cluster("vc-1", "shared"),
            running_cluster("vc-2", "shared"),
        ]];

        let first = client(MockJobRunApi::new().with_cluster_pages(pages.clone()));
        assert_eq!(
            first.resolve_cluster("shared").await.unwrap().as_deref(),
            Some("vc-1")
        );

        let unique = client(MockJobRunApi::new().with_cluster_pages(pages))
            .with_match_policy(MatchPolicy::Unique);
        match unique.resolve_cluster("shared").await {
            Err(EmrError::AmbiguousNamespace { cluster_ids, .. }) => {
                assert_eq!(cluster_ids, vec!["vc-1", "vc-2"])
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn submit_sends_one_request_to_resolved_cluster() {
        let api = MockJobRunApi::new()
            .with_cluster_pages(vec![vec![running_cluster("vc-9", "emr-karpenter")]])
            .with_start_id("job-42");
        let client = client(api);

        let job_id = client.submit_job(&spec()).await.unwrap();
        assert_eq!(job_id, "job-42");

        let starts = client.api().start_requests();
        assert_eq!(starts.len(), 1);
        let request = &starts[0];
        assert_eq!(request.virtual_cluster_id, "vc-9");
        assert_eq!(request.job_driver.entry_point, "s3://app-code/simplehive.py");
        assert_eq!(
            request.job_driver.entry_point_arguments,
            vec!["--date", "2024-01-01"]
        );
        assert_eq!(
            request.job_driver.spark_submit_parameters,
            "--jars s3://app-code/mysql-connector-java-8.0.30.jar \
             --conf spark.executor.memory=4g --conf spark.executor.cores=2 \
             --conf spark.driver.cores=1"
        );
    }

    #[tokio::test]
    async fn submit_without_cluster_sends_nothing() {
        let api = MockJobRunApi::new()
            .with_cluster_pages(vec![vec![running_cluster("vc-1", "someone-else")]]);
        let client = client(api);

        let err = client.submit_job(&spec()).await.unwrap_err();
        assert!(matches!(err, EmrError::NamespaceNotFound(ref ns) if ns == "emr-karpenter"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(client.api().start_requests().is_empty());
    }

    #[tokio::test]
    async fn submit_surfaces_service_failures() {
        let api = MockJobRunApi::new()
            .with_cluster_pages(vec![vec![running_cluster("vc-9", "emr-karpenter")]])
            .failing_start(EmrError::from_service_code(
                "start_job_run",
                Some("AccessDeniedException"),
                Some("not allowed"),
            ));
        let client = client(api);

        let err = client.submit_job(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn identical_clients_send_identical_payloads() {
        let make = || {
            client(
                MockJobRunApi::new()
                    .with_cluster_pages(vec![vec![running_cluster("vc-9", "emr-karpenter")]]),
            )
        };
        let (a, b) = (make(), make());
        a.submit_job(&spec()).await.unwrap();
        b.submit_job(&spec()).await.unwrap();

        let a = serde_json::to_vec(&a.api().start_requests()).unwrap();
        let b = serde_json::to_vec(&b.api().start_requests()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn describe_and_cancel_forward_ids() {
        let api = MockJobRunApi::new().with_job_states(vec![job("job-1", JobRunState::Running)]);
        let client = client(api);

        let described = client.describe_job("job-1", "vc-1").await.unwrap();
        assert_eq!(described, job("job-1", JobRunState::Running));

        let cancelled = client.cancel_job("job-1", "vc-1").await.unwrap();
        assert_eq!(cancelled.id, "job-1");
        assert_eq!(cancelled.virtual_cluster_id, "vc-1");

        assert_eq!(
            client.api().calls(),
            vec![
                Call::DescribeJobRun {
                    job_id: "job-1".into(),
                    virtual_cluster_id: "vc-1".into()
                },
                Call::CancelJobRun {
                    job_id: "job-1".into(),
                    virtual_cluster_id: "vc-1".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn describe_unknown_job_is_not_found() {
        let client = client(MockJobRunApi::new());
        let err = client.describe_job("missing", "vc-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_jobs_follows_pages_in_order() {
        let api = MockJobRunApi::new()
            .with_cluster_pages(vec![vec![running_cluster("vc-1", "tenant-a")]])
            .with_job_pages(vec![
                vec![job("j1", JobRunState::Completed), job("j2", JobRunState::Failed)],
                vec![job("j3", JobRunState::Completed)],
            ]);
        let client = client(api);
        let filter = ListJobsFilter {
            created_before: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            created_after: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            states: vec![JobRunState::Completed, JobRunState::Failed],
            name: Some("nightly".into()),
        };

        let jobs = client.list_jobs("tenant-a", &filter).await.unwrap();
        let ids: Vec<_> = jobs.iter().filter_map(|j| j.id.as_deref()).collect();
        assert_eq!(ids, vec!["j1", "j2", "j3"]);

        let list_calls: Vec<_> = client
            .api()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ListJobRuns {
                    virtual_cluster_id,
                    filter,
                    next_token,
                } => Some((virtual_cluster_id, filter, next_token)),
                _ => None,
            })
            .collect();
        assert_eq!(list_calls.len(), 2);
        assert_eq!(list_calls[0].0, "vc-1");
        assert_eq!(list_calls[0].1, filter);
        assert_eq!(list_calls[1].1, filter);
        assert_eq!(list_calls[0].2, None);
        assert_eq!(list_calls[1].2.as_deref(), Some("page-1"));
    }

    #[tokio::test]
    async fn list_jobs_for_unknown_namespace_fails() {
        let client = client(MockJobRunApi::new());
        let err = client
            .list_jobs("nobody", &ListJobsFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmrError::NamespaceNotFound(_)));
    }

    #[tokio::test]
    async fn list_clusters_passes_filter_through() {
        let api = MockJobRunApi::new().with_cluster_pages(vec![
            vec![running_cluster("vc-1", "a")],
            vec![running_cluster("vc-2", "b")],
        ]);
        let client = client(api);
        let filter = ListClustersFilter {
            states: vec![VirtualClusterState::Running, VirtualClusterState::Arrested],
            ..Default::default()
        };

        let clusters = client.list_clusters(&filter).await.unwrap();
        assert_eq!(clusters.len(), 2);
        match &client.api().calls()[0] {
            Call::ListVirtualClusters { filter: sent, .. } => assert_eq!(sent, &filter),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_settled_job() {
        let api = MockJobRunApi::new().with_job_states(vec![
            job("job-1", JobRunState::Submitted),
            job("job-1", JobRunState::Running),
            job("job-1", JobRunState::Completed),
        ]);
        let client = client(api);
        let options = WaitOptions {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        };

        let done = client
            .wait_for_job("job-1", "vc-1", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.state, Some(JobRunState::Completed));
        assert_eq!(client.api().calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let api = MockJobRunApi::new().with_job_states(vec![job("job-1", JobRunState::Running)]);
        let client = client(api);
        let options = WaitOptions {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(25),
        };

        let err = client
            .wait_for_job("job-1", "vc-1", &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EmrError::WaitTimedOut { .. }));
        assert_eq!(client.api().calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_stops_when_cancelled() {
        let api = MockJobRunApi::new().with_job_states(vec![job("job-1", JobRunState::Pending)]);
        let client = client(api);
        let token = CancellationToken::new();
        token.cancel();

        let err = client
            .wait_for_job("job-1", "vc-1", &WaitOptions::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, EmrError::WaitCancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_accepts_timeout_beyond_clock_range() {
        let api = MockJobRunApi::new().with_job_states(vec![
            job("job-1", JobRunState::Running),
            job("job-1", JobRunState::Completed),
        ]);
        let client = client(api);
        let options = WaitOptions {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(u64::MAX),
        };

        let done = client
            .wait_for_job("job-1", "vc-1", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.state, Some(JobRunState::Completed));
    }
}
