use anyhow::{anyhow, bail, Context};
use emr_client::{
    CancellationToken, ContainerProviderType, JobClient, JobRunApi, JobRunState,
    ListClustersFilter, ListJobsFilter, SparkJobSpec, VirtualClusterState, WaitOptions,
};
use serde::Serialize;
use tracing::info;

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value).context("failed to render output")
}

// Tasks
pub async fn submit<A: JobRunApi>(
    client: &JobClient<A>,
    spec: &SparkJobSpec,
    wait: Option<WaitOptions>,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    let submitted = client
        .start_job(spec)
        .await
        .with_context(|| format!("failed to submit job `{}`", spec.job_name))?;

    let Some(options) = wait else {
        return Ok(submitted.id);
    };
    info!("Waiting for {}", submitted);

    let job = client
        .wait_for_job(&submitted.id, &submitted.virtual_cluster_id, &options, cancel)
        .await?;

    match &job.state {
        Some(JobRunState::Completed) => to_json(&job),
        state => bail!(
            "job {} ended in state {}{}",
            submitted.id,
            state
                .as_ref()
                .map_or_else(|| "<unknown>".to_string(), |s| s.to_string()),
            job.failure_reason
                .as_deref()
                .map(|reason| format!(": {}", reason))
                .unwrap_or_default()
        ),
    }
}

pub async fn describe<A: JobRunApi>(
    client: &JobClient<A>,
    job_id: &str,
    cluster_id: &str,
) -> anyhow::Result<String> {
    let job = client.describe_job(job_id, cluster_id).await?;
    to_json(&job)
}

pub async fn cancel<A: JobRunApi>(
    client: &JobClient<A>,
    job_id: &str,
    cluster_id: &str,
) -> anyhow::Result<String> {
    let cancelled = client.cancel_job(job_id, cluster_id).await?;
    to_json(&cancelled)
}

pub async fn jobs<A: JobRunApi>(
    client: &JobClient<A>,
    namespace: &str,
    filter: &ListJobsFilter,
) -> anyhow::Result<String> {
    let jobs = client.list_jobs(namespace, filter).await?;
    to_json(&jobs)
}

pub async fn clusters<A: JobRunApi>(
    client: &JobClient<A>,
    provider: ContainerProviderType,
    states: Vec<VirtualClusterState>,
) -> anyhow::Result<String> {
    let filter = ListClustersFilter {
        provider_type: provider,
        states,
        ..Default::default()
    };
    let clusters = client.list_clusters(&filter).await?;
    to_json(&clusters)
}

pub async fn resolve<A: JobRunApi>(
    client: &JobClient<A>,
    namespace: &str,
) -> anyhow::Result<String> {
    client
        .resolve_cluster(namespace)
        .await?
        .ok_or_else(|| anyhow!("no running virtual cluster for namespace `{}`", namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emr_client::mock::{running_cluster, Call, MockJobRunApi};
    use emr_client::{DbPassword, JobDefaults, JobRun};
    use std::time::Duration;

    fn spec() -> SparkJobSpec {
        SparkJobSpec {
            namespace: "tenant-a".into(),
            execution_role_arn: "arn:aws:iam::123456789012:role/emr-job".into(),
            log_bucket: "logs".into(),
            job_name: "nightly".into(),
            log_group: "/emr".into(),
            log_stream_prefix: "nightly".into(),
            db_connection_url: "jdbc:mysql://db:3306/hive".into(),
            db_user: "hive".into(),
            db_password: DbPassword::new("pw"),
            entry_point: "s3://code/job.py".into(),
            extra_jars: vec![],
            entry_point_arguments: vec![],
            driver_cores: 1,
            executor_cores: 1,
            executor_memory: "2g".into(),
        }
    }

    fn job(state: JobRunState) -> JobRun {
        let failed = state == JobRunState::Failed;
        JobRun {
            id: Some("job-0001".into()),
            state: Some(state),
            failure_reason: failed.then(|| "USER_ERROR".to_string()),
            ..Default::default()
        }
    }

    fn client(api: MockJobRunApi) -> JobClient<MockJobRunApi> {
        JobClient::new(
            api.with_cluster_pages(vec![vec![running_cluster("vc-1", "tenant-a")]]),
            JobDefaults::default(),
        )
    }

    #[tokio::test]
    async fn submit_prints_job_id() {
        let client = client(MockJobRunApi::new().with_start_id("job-77"));
        let out = submit(&client, &spec(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "job-77");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_and_wait_reports_failure() {
        let client = client(
            MockJobRunApi::new()
                .with_job_states(vec![job(JobRunState::Running), job(JobRunState::Failed)]),
        );
        let options = WaitOptions {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        };

        let err = submit(&client, &spec(), Some(options), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "job job-0001 ended in state FAILED: USER_ERROR");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_and_wait_prints_record() {
        let client = client(MockJobRunApi::new().with_job_states(vec![job(JobRunState::Completed)]));
        let out = submit(
            &client,
            &spec(),
            Some(WaitOptions::default()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["state"], "COMPLETED");
    }

    #[tokio::test]
    async fn resolve_reports_missing_namespace() {
        let client = client(MockJobRunApi::new());
        assert_eq!(resolve(&client, "tenant-a").await.unwrap(), "vc-1");
        let err = resolve(&client, "tenant-z").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "no running virtual cluster for namespace `tenant-z`"
        );
    }

    #[tokio::test]
    async fn clusters_forwards_states() {
        let client = client(MockJobRunApi::new());
        let out = clusters(
            &client,
            ContainerProviderType::Eks,
            vec![VirtualClusterState::Terminated],
        )
        .await
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json[0]["namespace"], "tenant-a");

        match &client.api().calls()[0] {
            Call::ListVirtualClusters { filter, .. } => {
                assert_eq!(filter.states, vec![VirtualClusterState::Terminated])
            }
            other => panic!("unexpected call {:?}", other),
        }
    }
}
