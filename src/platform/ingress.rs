/// Ingress operations against the platform API
use reqwest::Method;
use tracing::{debug, info};

use super::models::{Ingress, IngressPostInfo, IngressSummary, Page};
use super::{relative_time, seconds_since, PlatformClient, PlatformError};

/// Effectively "fetch all" for paged ingress listings
const LIST_PAGE_SIZE: u64 = 10000;

impl PlatformClient {
    /// List all ingresses of an environment
    pub async fn list_ingress(
        &self,
        project_id: u64,
        env_id: u64,
    ) -> Result<Vec<IngressSummary>, PlatformError> {
        self.check_logged_in()?;
        if project_id == 0 {
            return Err(PlatformError::ApiFailed {
                message: "No project selected in the current context".to_string(),
            });
        }

        let query = [
            ("page", "0".to_string()),
            ("size", LIST_PAGE_SIZE.to_string()),
        ];
        let request = self.new_request::<()>(
            Method::POST,
            &format!(
                "devops/v1/projects/{}/ingress/{}/page_by_env",
                project_id, env_id
            ),
            &query,
            None,
        )?;
        let page: Page<Ingress> = self.execute(request).await?;
        debug!(
            "Fetched {} of {} ingresses",
            page.list.len(),
            page.total_elements
        );
        Ok(page.list.iter().map(summarize_ingress).collect())
    }

    /// Create an ingress in a project
    ///
    /// A zero project id means no project is bound to the session; the call
    /// is a silent no-op then, not an error.
    pub async fn create_ingress(
        &self,
        project_id: u64,
        info: &IngressPostInfo,
    ) -> Result<(), PlatformError> {
        if project_id == 0 {
            debug!("No project bound, skipping ingress creation");
            return Ok(());
        }

        let request = self.new_request(
            Method::POST,
            &format!("devops/v1/projects/{}/ingress", project_id),
            &[],
            Some(info),
        )?;
        self.execute_text(request).await?;
        info!("Successfully created ingress {}", info.name);
        Ok(())
    }
}

/// Flatten an ingress into its operator-facing row
///
/// Soft-deleted backends stay listed, annotated rather than omitted.
fn summarize_ingress(ingress: &Ingress) -> IngressSummary {
    let paths: Vec<String> = ingress
        .path_list
        .iter()
        .map(|entry| {
            if entry.service_status == "deleted" {
                format!("{} -> {}(deleted)", entry.path, entry.service_name)
            } else {
                format!("{} -> {}", entry.path, entry.service_name)
            }
        })
        .collect();

    let age = ingress
        .last_update_date
        .as_deref()
        .and_then(seconds_since)
        .map(relative_time)
        .unwrap_or_default();

    IngressSummary {
        id: ingress.id,
        name: ingress.name.clone(),
        host: ingress.domain.clone(),
        status: ingress.status.clone(),
        paths: paths.join(","),
        age,
    }
}
