use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Normalise a user or wire supplied enum name: `cancel-pending` -> `CANCEL_PENDING`.
fn wire_name(s: &str) -> String {
    s.trim().replace('-', "_").to_ascii_uppercase()
}

/////////////////////////////////////////////////////////////////////////////
// Job runs
/////////////////////////////////////////////////////////////////////////////

/// Lifecycle state of a job run, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobRunState {
    Pending,
    Submitted,
    Running,
    Failed,
    Cancelled,
    CancelPending,
    Completed,

    /// A state this client does not know about yet.
    Unknown(String),
}

impl JobRunState {
    pub fn as_str(&self) -> &str {
        match self {
            JobRunState::Pending => "PENDING",
            JobRunState::Submitted => "SUBMITTED",
            JobRunState::Running => "RUNNING",
            JobRunState::Failed => "FAILED",
            JobRunState::Cancelled => "CANCELLED",
            JobRunState::CancelPending => "CANCEL_PENDING",
            JobRunState::Completed => "COMPLETED",
            JobRunState::Unknown(s) => s,
        }
    }

    /// The job has reached a state from which it will not run any further work.
    ///
    /// `CancelPending` counts as settled: once cancellation has been accepted
    /// the outcome is decided even though the pods may still be draining.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            JobRunState::Completed
                | JobRunState::Failed
                | JobRunState::Cancelled
                | JobRunState::CancelPending
        )
    }

    /// Parse a wire value, keeping unrecognised values instead of failing.
    pub fn from_wire(s: &str) -> Self {
        s.parse()
            .unwrap_or_else(|_| JobRunState::Unknown(s.to_string()))
    }
}

impl FromStr for JobRunState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match wire_name(s).as_str() {
            "PENDING" => JobRunState::Pending,
            "SUBMITTED" => JobRunState::Submitted,
            "RUNNING" => JobRunState::Running,
            "FAILED" => JobRunState::Failed,
            "CANCELLED" => JobRunState::Cancelled,
            "CANCEL_PENDING" => JobRunState::CancelPending,
            "COMPLETED" => JobRunState::Completed,
            _ => return Err(UnknownVariant::new("job run state", s)),
        };
        Ok(state)
    }
}

/// A job run record, carried as the service reported it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobRun {
    pub id: Option<String>,
    pub name: Option<String>,
    pub virtual_cluster_id: Option<String>,
    pub arn: Option<String>,
    pub state: Option<JobRunState>,
    pub execution_role_arn: Option<String>,
    pub release_label: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state_details: Option<String>,
    pub failure_reason: Option<String>,

    /// Spark entry point, when the run was started with a spark-submit driver.
    pub entry_point: Option<String>,
    pub entry_point_arguments: Vec<String>,
    pub spark_submit_parameters: Option<String>,

    pub tags: BTreeMap<String, String>,
}

/// The identifier pair the service reports for a cancelled job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRunRef {
    pub id: String,
    pub virtual_cluster_id: String,
}

impl fmt::Display for JobRunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EMR Containers Job: {} Virtual Cluster: {}",
            self.id, self.virtual_cluster_id
        )
    }
}

/////////////////////////////////////////////////////////////////////////////
// Virtual clusters
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VirtualClusterState {
    Running,
    Terminating,
    Terminated,
    Arrested,
    Unknown(String),
}

impl VirtualClusterState {
    pub fn as_str(&self) -> &str {
        match self {
            VirtualClusterState::Running => "RUNNING",
            VirtualClusterState::Terminating => "TERMINATING",
            VirtualClusterState::Terminated => "TERMINATED",
            VirtualClusterState::Arrested => "ARRESTED",
            VirtualClusterState::Unknown(s) => s,
        }
    }

    pub fn from_wire(s: &str) -> Self {
        s.parse()
            .unwrap_or_else(|_| VirtualClusterState::Unknown(s.to_string()))
    }
}

impl FromStr for VirtualClusterState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match wire_name(s).as_str() {
            "RUNNING" => VirtualClusterState::Running,
            "TERMINATING" => VirtualClusterState::Terminating,
            "TERMINATED" => VirtualClusterState::Terminated,
            "ARRESTED" => VirtualClusterState::Arrested,
            _ => return Err(UnknownVariant::new("virtual cluster state", s)),
        };
        Ok(state)
    }
}

/// Container orchestration backend behind a virtual cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerProviderType {
    #[default]
    Eks,
}

impl ContainerProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerProviderType::Eks => "EKS",
        }
    }
}

impl FromStr for ContainerProviderType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match wire_name(s).as_str() {
            "EKS" => Ok(ContainerProviderType::Eks),
            _ => Err(UnknownVariant::new("container provider type", s)),
        }
    }
}

/// A virtual cluster record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VirtualCluster {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arn: Option<String>,
    pub state: Option<VirtualClusterState>,
    pub created_at: Option<DateTime<Utc>>,

    /// Wire name of the provider type, e.g. `EKS`.
    pub container_provider_type: Option<String>,
    /// Identifier of the backing container cluster.
    pub container_provider_id: Option<String>,
    /// Tenant namespace inside the backing container cluster.
    pub namespace: Option<String>,
}

/////////////////////////////////////////////////////////////////////////////
// Paging
/////////////////////////////////////////////////////////////////////////////

/// One page of a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Continuation token, `None` on the last page.
    pub next_token: Option<String>,
}

/////////////////////////////////////////////////////////////////////////////

/// Returned when parsing an enum name this client does not recognise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: `{value}`")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! wire_enum_impls {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    )*};
}

wire_enum_impls!(JobRunState, VirtualClusterState, ContainerProviderType);
