/// Orbit platform API data models
use serde::{Deserialize, Serialize};

/// Body-level success/failure wrapper
///
/// The platform embeds failure in a 200 response body; transport status alone
/// does not decide success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub message: String,
}

/// One page of a paged listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub list: Vec<T>,
    #[serde(default)]
    pub total_elements: u64,
}

/// Ingress as returned by the platform
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    pub id: u64,
    pub name: String,
    /// Host the ingress serves
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub path_list: Vec<IngressPath>,
    /// "%Y-%m-%d %H:%M:%S", platform-local
    #[serde(default)]
    pub last_update_date: Option<String>,
}

/// A path to backend-service mapping of an ingress
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPath {
    pub path: String,
    #[serde(default)]
    pub service_name: String,
    /// "deleted" marks a soft-deleted backend that is still listed
    #[serde(default)]
    pub service_status: String,
}

/// Flattened ingress row for operator-facing output
#[derive(Debug, Clone)]
pub struct IngressSummary {
    pub id: u64,
    pub name: String,
    pub host: String,
    pub status: String,
    /// Comma-joined "path -> service" pairs, deleted backends annotated
    pub paths: String,
    pub age: String,
}

/// Payload for creating an ingress
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPostInfo {
    pub name: String,
    pub domain: String,
    pub env_id: u64,
    pub path_list: Vec<IngressPathPost>,
}

/// A path mapping in an ingress creation payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPathPost {
    pub path: String,
    pub service_name: String,
    pub service_port: u16,
}

/// Deployment-task record tracked by the platform per release
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_update_date: Option<String>,
}
