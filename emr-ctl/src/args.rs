use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use emr_client::request::{DEFAULT_JOB_START_TIMEOUT_SECS, DEFAULT_RELEASE_LABEL};
use emr_client::{
    ClientConfig, ContainerProviderType, DbPassword, JobDefaults, JobRunState, MatchPolicy,
    ProxyConfig, SparkJobSpec, VirtualClusterState, WaitOptions,
};

//
// For parsing user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Service region.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1", global = true)]
    pub region: String,

    /// Override the service endpoint.
    #[arg(long, global = true)]
    pub endpoint_url: Option<String>,

    /// Static access key id; the default credential chain is used when unset.
    #[arg(long, global = true, requires = "secret_access_key")]
    pub access_key_id: Option<String>,

    /// Static secret access key.
    #[arg(long, global = true, requires = "access_key_id")]
    pub secret_access_key: Option<String>,

    /// Max results per list page.
    #[arg(long, global = true)]
    pub page_size: Option<i32>,

    /// What to do when several running clusters serve one namespace.
    #[arg(long, value_enum, default_value_t = Policy::First, global = true)]
    pub match_policy: Policy,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Use the first cluster listed.
    First,
    /// Refuse to pick.
    Unique,
}

impl From<Policy> for MatchPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::First => MatchPolicy::First,
            Policy::Unique => MatchPolicy::Unique,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a Spark job to the virtual cluster serving a namespace.
    Submit(SubmitArgs),
    /// Show one job run.
    Describe {
        #[arg(short, long)]
        job_id: String,

        #[arg(short, long)]
        cluster_id: String,
    },
    /// Request cancellation of a job run.
    Cancel {
        #[arg(short, long)]
        job_id: String,

        #[arg(short, long)]
        cluster_id: String,
    },
    /// List the job runs of a namespace.
    Jobs {
        #[arg(short, long)]
        namespace: String,

        /// Only jobs created after this instant (RFC 3339).
        #[arg(long)]
        created_after: Option<DateTime<Utc>>,

        /// Only jobs created before this instant (RFC 3339).
        #[arg(long)]
        created_before: Option<DateTime<Utc>>,

        /// Only jobs in this state; repeat for several.
        #[arg(long = "state")]
        states: Vec<JobRunState>,

        #[arg(long)]
        name: Option<String>,
    },
    /// List virtual clusters.
    Clusters {
        #[arg(long, default_value = "EKS")]
        provider: ContainerProviderType,

        /// Only clusters in this state; repeat for several.
        #[arg(long = "state")]
        states: Vec<VirtualClusterState>,
    },
    /// Print the virtual cluster serving a namespace.
    Resolve {
        #[arg(short, long)]
        namespace: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Tenant namespace.
    #[arg(short, long)]
    pub namespace: String,

    /// IAM role the job runs as.
    #[arg(long)]
    pub execution_role_arn: String,

    /// Bucket (or s3:// URI) receiving the Spark logs.
    #[arg(long)]
    pub log_bucket: String,

    #[arg(long)]
    pub job_name: String,

    /// CloudWatch log group.
    #[arg(long)]
    pub log_group: String,

    #[arg(long)]
    pub log_stream_prefix: String,

    /// JDBC URL of the Hive metastore.
    #[arg(long)]
    pub db_url: String,

    #[arg(long)]
    pub db_user: String,

    #[arg(long, env = "EMR_DB_PASSWORD", hide_env_values = true)]
    pub db_password: DbPassword,

    /// Spark application, e.g. s3://bucket/job.py
    #[arg(long)]
    pub entry_point: String,

    /// Extra jar on the class path; repeat for several.
    #[arg(long = "jar")]
    pub jars: Vec<String>,

    #[arg(long, default_value_t = 1)]
    pub driver_cores: u32,

    #[arg(long, default_value_t = 1)]
    pub executor_cores: u32,

    #[arg(long, default_value = "2g")]
    pub executor_memory: String,

    #[arg(long, default_value = DEFAULT_RELEASE_LABEL)]
    pub release_label: String,

    /// Seconds the service waits for the job to start.
    #[arg(long, default_value_t = DEFAULT_JOB_START_TIMEOUT_SECS)]
    pub job_start_timeout: u32,

    /// Outbound HTTP proxy for the driver and executors.
    #[arg(long)]
    pub proxy_host: Option<String>,

    #[arg(long, default_value_t = 80)]
    pub proxy_port: u16,

    #[arg(long, requires = "proxy_host")]
    pub non_proxy_hosts: Option<String>,

    /// Block until the job settles.
    #[arg(long)]
    pub wait: bool,

    #[arg(long, default_value_t = 10)]
    pub poll_secs: u64,

    #[arg(long, default_value_t = 3600)]
    pub timeout_secs: u64,

    /// Arguments passed to the entry point.
    #[clap(value_parser, last = true)]
    pub args: Vec<String>,
}

impl Args {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            page_size: self.page_size,
        }
    }
}

impl SubmitArgs {
    pub fn spec(&self) -> SparkJobSpec {
        SparkJobSpec {
            namespace: self.namespace.clone(),
            execution_role_arn: self.execution_role_arn.clone(),
            log_bucket: self.log_bucket.clone(),
            job_name: self.job_name.clone(),
            log_group: self.log_group.clone(),
            log_stream_prefix: self.log_stream_prefix.clone(),
            db_connection_url: self.db_url.clone(),
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
            entry_point: self.entry_point.clone(),
            extra_jars: self.jars.clone(),
            entry_point_arguments: self.args.clone(),
            driver_cores: self.driver_cores,
            executor_cores: self.executor_cores,
            executor_memory: self.executor_memory.clone(),
        }
    }

    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            release_label: self.release_label.clone(),
            job_start_timeout_secs: self.job_start_timeout,
            proxy: self.proxy_host.as_ref().map(|host| ProxyConfig {
                host: host.clone(),
                port: self.proxy_port,
                non_proxy_hosts: self.non_proxy_hosts.clone(),
            }),
            ..Default::default()
        }
    }

    pub fn wait_options(&self) -> Option<WaitOptions> {
        self.wait.then(|| WaitOptions {
            poll_interval: Duration::from_secs(self.poll_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

/// Parse user command.
pub fn parse_args() -> Args {
    Args::parse()
}
