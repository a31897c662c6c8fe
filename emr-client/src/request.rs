//! Builds the request payloads sent to the service.
//!
//! Nothing here talks to the network, so every payload can be checked in
//! isolation and two identical inputs always produce identical payloads.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::error::EmrError;
use crate::types::{ContainerProviderType, JobRunState, VirtualClusterState};

const START_JOB_RUN: &str = "start_job_run";

pub const DEFAULT_RELEASE_LABEL: &str = "emr-6.15.0-20231109";
pub const DEFAULT_JOB_START_TIMEOUT_SECS: u32 = 600;
pub const DEFAULT_METASTORE_CLIENT_FACTORY: &str =
    "org.apache.hadoop.hive.ql.metadata.SessionHiveMetaStoreClientFactory";
pub const DEFAULT_JDBC_DRIVER: &str = "com.mysql.cj.jdbc.Driver";

/////////////////////////////////////////////////////////////////////////////
// Caller supplied parameters
/////////////////////////////////////////////////////////////////////////////

/// Password for the Hive metastore database.
///
/// Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct DbPassword(String);

impl DbPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl FromStr for DbPassword {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Debug for DbPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DbPassword(***)")
    }
}

impl fmt::Display for DbPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Everything needed to submit one Spark job to a tenant namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct SparkJobSpec {
    /// Tenant namespace, resolved to a virtual cluster before submitting.
    pub namespace: String,
    pub execution_role_arn: String,

    /// Bucket (or `s3://` URI) receiving the Spark logs.
    pub log_bucket: String,
    pub job_name: String,

    /// CloudWatch log group.
    pub log_group: String,
    pub log_stream_prefix: String,

    /// JDBC URL of the Hive metastore database.
    pub db_connection_url: String,
    pub db_user: String,
    pub db_password: DbPassword,

    /// Location of the Spark application, e.g. `s3://bucket/job.py`.
    pub entry_point: String,
    pub extra_jars: Vec<String>,
    pub entry_point_arguments: Vec<String>,

    pub driver_cores: u32,
    pub executor_cores: u32,
    /// Executor memory in Spark notation, e.g. `4g`.
    pub executor_memory: String,
}

/// Outbound HTTP proxy exported to the driver and executors through `_JAVA_OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Hosts reached without the proxy, `|` separated as the JVM expects.
    pub non_proxy_hosts: Option<String>,
}

impl ProxyConfig {
    fn java_options(&self) -> String {
        let mut opts = format!(
            "$_JAVA_OPTIONS -Dhttp.proxyHost={} -Dhttp.proxyPort={}",
            self.host, self.port
        );
        if let Some(hosts) = &self.non_proxy_hosts {
            opts.push_str(&format!(" -Dhttp.nonProxyHosts={}", hosts));
        }
        format!("\"{}\"", opts)
    }
}

/// Deployment specific values applied to every submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults {
    pub release_label: String,
    pub job_start_timeout_secs: u32,
    pub proxy: Option<ProxyConfig>,
    pub metastore_client_factory: String,
    pub jdbc_driver: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            release_label: DEFAULT_RELEASE_LABEL.to_string(),
            job_start_timeout_secs: DEFAULT_JOB_START_TIMEOUT_SECS,
            proxy: None,
            metastore_client_factory: DEFAULT_METASTORE_CLIENT_FACTORY.to_string(),
            jdbc_driver: DEFAULT_JDBC_DRIVER.to_string(),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Start job run payload
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartJobRunRequest {
    pub name: String,
    pub virtual_cluster_id: String,
    pub execution_role_arn: String,
    pub release_label: String,
    pub job_driver: SparkSubmitDriver,
    pub configuration_overrides: ConfigurationOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparkSubmitDriver {
    pub entry_point: String,
    pub entry_point_arguments: Vec<String>,
    pub spark_submit_parameters: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationOverrides {
    pub monitoring: MonitoringConfiguration,
    pub application_configuration: Vec<Configuration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringConfiguration {
    pub log_group_name: String,
    pub log_stream_name_prefix: String,
    pub s3_log_uri: String,
}

/// A classification block of engine properties, possibly nesting further blocks.
#[derive(Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub classification: String,
    pub properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<Configuration>,
}

impl Configuration {
    fn new<'a>(
        classification: &str,
        properties: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Self {
        Self {
            classification: classification.to_string(),
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            configurations: vec![],
        }
    }
}

// Hand written so a payload can be logged without leaking the metastore password.
impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties: BTreeMap<&str, &str> = self
            .properties
            .iter()
            .map(|(k, v)| {
                if k.to_ascii_lowercase().contains("password") {
                    (k.as_str(), "***")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("Configuration")
            .field("classification", &self.classification)
            .field("properties", &properties)
            .field("configurations", &self.configurations)
            .finish()
    }
}

impl StartJobRunRequest {
    /// Build the payload for running `spec` on the virtual cluster `virtual_cluster_id`.
    pub fn build(
        virtual_cluster_id: &str,
        spec: &SparkJobSpec,
        defaults: &JobDefaults,
    ) -> Result<Self, EmrError> {
        validate(spec)?;
        if virtual_cluster_id.trim().is_empty() {
            return Err(EmrError::validation(START_JOB_RUN, "empty virtual cluster id"));
        }

        let job_driver = SparkSubmitDriver {
            entry_point: spec.entry_point.clone(),
            entry_point_arguments: spec.entry_point_arguments.clone(),
            spark_submit_parameters: spark_submit_parameters(
                &spec.extra_jars,
                spec.driver_cores,
                spec.executor_cores,
                &spec.executor_memory,
            ),
        };

        let monitoring = MonitoringConfiguration {
            log_group_name: spec.log_group.clone(),
            log_stream_name_prefix: spec.log_stream_prefix.clone(),
            s3_log_uri: s3_log_uri(&spec.log_bucket)?,
        };

        Ok(Self {
            name: spec.job_name.clone(),
            virtual_cluster_id: virtual_cluster_id.to_string(),
            execution_role_arn: spec.execution_role_arn.clone(),
            release_label: defaults.release_label.clone(),
            job_driver,
            configuration_overrides: ConfigurationOverrides {
                monitoring,
                application_configuration: application_configuration(spec, defaults),
            },
        })
    }
}

fn validate(spec: &SparkJobSpec) -> Result<(), EmrError> {
    let required = [
        ("job name", &spec.job_name),
        ("execution role arn", &spec.execution_role_arn),
        ("entry point", &spec.entry_point),
        ("executor memory", &spec.executor_memory),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(EmrError::validation(
                START_JOB_RUN,
                format!("{} must not be empty", field),
            ));
        }
    }
    if spec.driver_cores == 0 || spec.executor_cores == 0 {
        return Err(EmrError::validation(
            START_JOB_RUN,
            "driver and executor cores must be at least 1",
        ));
    }
    Ok(())
}

/// Compose the spark-submit flags: extra jars first, then executor memory,
/// executor cores and driver cores.
pub fn spark_submit_parameters(
    jars: &[String],
    driver_cores: u32,
    executor_cores: u32,
    executor_memory: &str,
) -> String {
    let mut params = String::new();
    if !jars.is_empty() {
        params.push_str(&format!("--jars {} ", jars.join(",")));
    }
    params.push_str(&format!(
        "--conf spark.executor.memory={} --conf spark.executor.cores={} --conf spark.driver.cores={}",
        executor_memory, executor_cores, driver_cores
    ));
    params
}

/// Turns a bucket name, or an `s3://` URI, into the log URI the service expects.
pub fn s3_log_uri(target: &str) -> Result<String, EmrError> {
    let target = target.trim();
    if !target.contains("://") {
        let bucket = target.trim_end_matches('/');
        if bucket.is_empty() || bucket.contains('/') {
            return Err(EmrError::validation(
                START_JOB_RUN,
                format!("`{}` is not a bucket name", target),
            ));
        }
        return Ok(format!("s3://{}", bucket));
    }

    let url = Url::parse(target).map_err(|e| {
        EmrError::validation(START_JOB_RUN, format!("could not parse log location: {}", e))
    })?;
    if url.scheme() != "s3" {
        return Err(EmrError::validation(
            START_JOB_RUN,
            "protocol of log location is not S3",
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(EmrError::validation(
            START_JOB_RUN,
            "log location has no bucket",
        ));
    }
    Ok(target.trim_end_matches('/').to_string())
}

fn application_configuration(spec: &SparkJobSpec, defaults: &JobDefaults) -> Vec<Configuration> {
    let mut blocks = vec![
        Configuration::new(
            "emr-containers-defaults",
            [(
                "job-start-timeout",
                defaults.job_start_timeout_secs.to_string(),
            )],
        ),
        Configuration::new(
            "spark-defaults",
            [
                ("spark.dynamicAllocation.enabled", "false".to_string()),
                (
                    "spark.kubernetes.executor.deleteOnTermination",
                    "true".to_string(),
                ),
            ],
        ),
        Configuration::new(
            "spark-hive-site",
            [
                (
                    "hive.metastore.client.factory.class",
                    defaults.metastore_client_factory.clone(),
                ),
                (
                    "javax.jdo.option.ConnectionDriverName",
                    defaults.jdbc_driver.clone(),
                ),
                ("javax.jdo.option.ConnectionUserName", spec.db_user.clone()),
                (
                    "javax.jdo.option.ConnectionPassword",
                    spec.db_password.expose().to_string(),
                ),
                (
                    "javax.jdo.option.ConnectionURL",
                    spec.db_connection_url.clone(),
                ),
            ],
        ),
    ];

    if let Some(proxy) = &defaults.proxy {
        blocks.push(Configuration {
            classification: "spark-env".to_string(),
            properties: BTreeMap::new(),
            configurations: vec![Configuration::new(
                "export",
                [("_JAVA_OPTIONS", proxy.java_options())],
            )],
        });
    }

    blocks
}

/////////////////////////////////////////////////////////////////////////////
// List filters
/////////////////////////////////////////////////////////////////////////////

/// Filter for listing job runs of one virtual cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListJobsFilter {
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    /// Empty means every state.
    pub states: Vec<JobRunState>,
    pub name: Option<String>,
}

/// Filter for listing virtual clusters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListClustersFilter {
    pub provider_type: ContainerProviderType,
    /// Empty means every state.
    pub states: Vec<VirtualClusterState>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub container_provider_id: Option<String>,
}

impl ListClustersFilter {
    /// Running clusters on the supported backend; what namespace resolution scans.
    pub fn running() -> Self {
        Self {
            states: vec![VirtualClusterState::Running],
            ..Default::default()
        }
    }
}
