//! Helper functions and structures for dealing with the EMR on EKS service.
use std::fmt;

use async_trait::async_trait;
use aws_sdk_emrcontainers as emr;
use aws_sdk_emrcontainers::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_emrcontainers::types as sdk;
use aws_smithy_types::error::operation::BuildError;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::JobRunApi;
use crate::error::EmrError;
use crate::request::{Configuration, ListClustersFilter, ListJobsFilter, StartJobRunRequest};
use crate::types::{JobRun, JobRunRef, JobRunState, Page, VirtualCluster, VirtualClusterState};

const CONNECT: &str = "connect";
const START_JOB_RUN: &str = "start_job_run";
const DESCRIBE_JOB_RUN: &str = "describe_job_run";
const CANCEL_JOB_RUN: &str = "cancel_job_run";
const LIST_JOB_RUNS: &str = "list_job_runs";
const LIST_VIRTUAL_CLUSTERS: &str = "list_virtual_clusters";

#[derive(Clone, Default)]
pub struct ClientConfig {
    /// service region, e.g. `eu-west-2`
    pub region: String,

    /// endpoint override, for local stacks
    pub endpoint_url: Option<String>,

    /// static access key id; the default credential chain is used when unset
    pub access_key_id: Option<String>,

    /// static secret key
    pub secret_access_key: Option<String>,

    /// max results per list page, service default when unset
    pub page_size: Option<i32>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "***"),
            )
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// [`JobRunApi`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct EmrContainers {
    client: emr::Client,
    page_size: Option<i32>,
}

impl EmrContainers {
    /// Build a client for one region.
    pub async fn connect(cfg: &ClientConfig) -> Result<Self, EmrError> {
        if cfg.region.trim().is_empty() {
            return Err(EmrError::validation(CONNECT, "region must be set"));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(emr::config::Region::new(cfg.region.clone()));

        match (&cfg.access_key_id, &cfg.secret_access_key) {
            (Some(id), Some(secret)) => {
                let cred = emr::config::Credentials::new(
                    id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "emr-client static",
                );
                loader = loader.credentials_provider(cred);
            }
            (None, None) => {}
            _ => {
                return Err(EmrError::validation(
                    CONNECT,
                    "access key id and secret access key must be given together",
                ))
            }
        }

        if let Some(url) = &cfg.endpoint_url {
            loader = loader.endpoint_url(url.clone());
        }

        let sdk_config = loader.load().await;
        debug!(region = %cfg.region, "EMR containers client configured");

        Ok(Self::from_client(emr::Client::new(&sdk_config), cfg.page_size))
    }

    pub fn from_client(client: emr::Client, page_size: Option<i32>) -> Self {
        Self { client, page_size }
    }
}

#[async_trait]
impl JobRunApi for EmrContainers {
    async fn start_job_run(&self, request: &StartJobRunRequest) -> Result<String, EmrError> {
        let driver = sdk::SparkSubmitJobDriver::builder()
            .entry_point(&request.job_driver.entry_point)
            .set_entry_point_arguments(Some(request.job_driver.entry_point_arguments.clone()))
            .spark_submit_parameters(&request.job_driver.spark_submit_parameters)
            .build()
            .map_err(|e| build_error(START_JOB_RUN, e))?;

        let overrides = configuration_overrides(request)?;

        let output = self
            .client
            .start_job_run()
            .name(&request.name)
            .virtual_cluster_id(&request.virtual_cluster_id)
            .execution_role_arn(&request.execution_role_arn)
            .release_label(&request.release_label)
            .job_driver(
                sdk::JobDriver::builder()
                    .spark_submit_job_driver(driver)
                    .build(),
            )
            .configuration_overrides(overrides)
            .send()
            .await
            .map_err(|e| service_error(START_JOB_RUN, e))?;

        output
            .id()
            .map(str::to_string)
            .ok_or_else(|| EmrError::Unexpected {
                operation: START_JOB_RUN,
                code: None,
                message: "response carried no job run id".to_string(),
            })
    }

    async fn describe_job_run(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRun, EmrError> {
        let output = self
            .client
            .describe_job_run()
            .id(job_id)
            .virtual_cluster_id(virtual_cluster_id)
            .send()
            .await
            .map_err(|e| service_error(DESCRIBE_JOB_RUN, e))?;

        output
            .job_run()
            .map(job_run_from_sdk)
            .ok_or_else(|| EmrError::NotFound {
                operation: DESCRIBE_JOB_RUN,
                message: format!("no record for job {} on {}", job_id, virtual_cluster_id),
            })
    }

    async fn cancel_job_run(
        &self,
        job_id: &str,
        virtual_cluster_id: &str,
    ) -> Result<JobRunRef, EmrError> {
        let output = self
            .client
            .cancel_job_run()
            .id(job_id)
            .virtual_cluster_id(virtual_cluster_id)
            .send()
            .await
            .map_err(|e| service_error(CANCEL_JOB_RUN, e))?;

        Ok(JobRunRef {
            id: output.id().unwrap_or(job_id).to_string(),
            virtual_cluster_id: output
                .virtual_cluster_id()
                .unwrap_or(virtual_cluster_id)
                .to_string(),
        })
    }

    async fn list_job_runs(
        &self,
        virtual_cluster_id: &str,
        filter: &ListJobsFilter,
        next_token: Option<String>,
    ) -> Result<Page<JobRun>, EmrError> {
        let mut call = self
            .client
            .list_job_runs()
            .virtual_cluster_id(virtual_cluster_id)
            .set_created_before(filter.created_before.map(to_smithy))
            .set_created_after(filter.created_after.map(to_smithy))
            .set_name(filter.name.clone())
            .set_max_results(self.page_size)
            .set_next_token(next_token);

        if !filter.states.is_empty() {
            let states = filter
                .states
                .iter()
                .map(|s| sdk::JobRunState::from(s.as_str()))
                .collect();
            call = call.set_states(Some(states));
        }

        let output = call
            .send()
            .await
            .map_err(|e| service_error(LIST_JOB_RUNS, e))?;

        Ok(Page {
            items: output.job_runs().iter().map(job_run_from_sdk).collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn list_virtual_clusters(
        &self,
        filter: &ListClustersFilter,
        next_token: Option<String>,
    ) -> Result<Page<VirtualCluster>, EmrError> {
        let mut call = self
            .client
            .list_virtual_clusters()
            .container_provider_type(sdk::ContainerProviderType::from(
                filter.provider_type.as_str(),
            ))
            .set_container_provider_id(filter.container_provider_id.clone())
            .set_created_before(filter.created_before.map(to_smithy))
            .set_created_after(filter.created_after.map(to_smithy))
            .set_max_results(self.page_size)
            .set_next_token(next_token);

        if !filter.states.is_empty() {
            let states = filter
                .states
                .iter()
                .map(|s| sdk::VirtualClusterState::from(s.as_str()))
                .collect();
            call = call.set_states(Some(states));
        }

        let output = call
            .send()
            .await
            .map_err(|e| service_error(LIST_VIRTUAL_CLUSTERS, e))?;

        Ok(Page {
            items: output
                .virtual_clusters()
                .iter()
                .map(virtual_cluster_from_sdk)
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }
}

/////////////////////////////////////////////////////////////////////////////
// Conversions
/////////////////////////////////////////////////////////////////////////////

fn configuration_overrides(
    request: &StartJobRunRequest,
) -> Result<sdk::ConfigurationOverrides, EmrError> {
    let monitoring = &request.configuration_overrides.monitoring;

    let cloud_watch = sdk::CloudWatchMonitoringConfiguration::builder()
        .log_group_name(&monitoring.log_group_name)
        .log_stream_name_prefix(&monitoring.log_stream_name_prefix)
        .build()
        .map_err(|e| build_error(START_JOB_RUN, e))?;
    let s3 = sdk::S3MonitoringConfiguration::builder()
        .log_uri(&monitoring.s3_log_uri)
        .build()
        .map_err(|e| build_error(START_JOB_RUN, e))?;

    let application_configuration = request
        .configuration_overrides
        .application_configuration
        .iter()
        .map(sdk_configuration)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| build_error(START_JOB_RUN, e))?;

    Ok(sdk::ConfigurationOverrides::builder()
        .monitoring_configuration(
            sdk::MonitoringConfiguration::builder()
                .cloud_watch_monitoring_configuration(cloud_watch)
                .s3_monitoring_configuration(s3)
                .build(),
        )
        .set_application_configuration(Some(application_configuration))
        .build())
}

fn sdk_configuration(block: &Configuration) -> Result<sdk::Configuration, BuildError> {
    let nested = block
        .configurations
        .iter()
        .map(sdk_configuration)
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = sdk::Configuration::builder()
        .classification(&block.classification)
        .set_properties(Some(
            block
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ));
    if !nested.is_empty() {
        builder = builder.set_configurations(Some(nested));
    }
    builder.build()
}

fn job_run_from_sdk(run: &sdk::JobRun) -> JobRun {
    let driver = run.job_driver().and_then(|d| d.spark_submit_job_driver());

    JobRun {
        id: run.id().map(str::to_string),
        name: run.name().map(str::to_string),
        virtual_cluster_id: run.virtual_cluster_id().map(str::to_string),
        arn: run.arn().map(str::to_string),
        state: run.state().map(|s| JobRunState::from_wire(s.as_str())),
        execution_role_arn: run.execution_role_arn().map(str::to_string),
        release_label: run.release_label().map(str::to_string),
        created_at: run.created_at().and_then(from_smithy),
        created_by: run.created_by().map(str::to_string),
        finished_at: run.finished_at().and_then(from_smithy),
        state_details: run.state_details().map(str::to_string),
        failure_reason: run.failure_reason().map(|r| r.as_str().to_string()),
        entry_point: driver.map(|d| d.entry_point().to_string()),
        entry_point_arguments: driver
            .map(|d| d.entry_point_arguments().to_vec())
            .unwrap_or_default(),
        spark_submit_parameters: driver
            .and_then(|d| d.spark_submit_parameters())
            .map(str::to_string),
        tags: run
            .tags()
            .map(|tags| {
                tags.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn virtual_cluster_from_sdk(vc: &sdk::VirtualCluster) -> VirtualCluster {
    let provider = vc.container_provider();

    VirtualCluster {
        id: vc.id().map(str::to_string),
        name: vc.name().map(str::to_string),
        arn: vc.arn().map(str::to_string),
        state: vc
            .state()
            .map(|s| VirtualClusterState::from_wire(s.as_str())),
        created_at: vc.created_at().and_then(from_smithy),
        container_provider_type: provider.map(|p| p.r#type().as_str().to_string()),
        container_provider_id: provider.map(|p| p.id().to_string()),
        namespace: provider
            .and_then(|p| p.info())
            .and_then(|info| info.as_eks_info().ok())
            .and_then(|eks| eks.namespace())
            .map(str::to_string),
    }
}

fn to_smithy(t: DateTime<Utc>) -> aws_smithy_types::DateTime {
    aws_smithy_types::DateTime::from_millis(t.timestamp_millis())
}

fn from_smithy(t: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(t.to_millis().ok()?)
}

/////////////////////////////////////////////////////////////////////////////
// Errors
/////////////////////////////////////////////////////////////////////////////

fn build_error(operation: &'static str, err: BuildError) -> EmrError {
    EmrError::validation(operation, err.to_string())
}

/// Classify an SDK failure.
fn service_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> EmrError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::DispatchFailure(failure) => EmrError::Transport {
            operation,
            retryable: !failure.is_user(),
            message,
        },
        SdkError::TimeoutError(_) => EmrError::Transport {
            operation,
            retryable: true,
            message,
        },
        SdkError::ResponseError(_) => EmrError::Transport {
            operation,
            retryable: false,
            message,
        },
        SdkError::ConstructionFailure(_) => EmrError::Validation { operation, message },
        _ => EmrError::from_service_code(
            operation,
            err.code(),
            Some(err.message().unwrap_or(&message)),
        ),
    }
}
