/// Deployment-task tracking against the platform API
///
/// The platform keeps one task record per release; deleting a release on the
/// cluster side is reconciled by marking that record deleted.
use reqwest::Method;
use tracing::debug;

use super::models::TaskRecord;
use super::{relative_time, seconds_since, status_label, PlatformClient, PlatformError};

impl PlatformClient {
    /// Fetch the task record for a release
    pub async fn task_record(
        &self,
        project_id: u64,
        release: &str,
    ) -> Result<TaskRecord, PlatformError> {
        self.check_logged_in()?;
        let request = self.new_request::<()>(
            Method::GET,
            &format!(
                "devops/v1/projects/{}/deployment_tasks/{}",
                project_id, release
            ),
            &[],
            None,
        )?;
        self.execute(request).await
    }

    /// Mark the task record for a release as deleted
    ///
    /// The deletion-tracking hook run after cluster-side removal. Callers
    /// treat failures as best-effort and only log them.
    pub async fn mark_task_deleted(
        &self,
        project_id: u64,
        release: &str,
    ) -> Result<(), PlatformError> {
        self.check_logged_in()?;
        let form = [("status", "deleted".to_string())];
        let request = self.new_request_with_form(
            Method::POST,
            &format!(
                "devops/v1/projects/{}/deployment_tasks/{}/status",
                project_id, release
            ),
            &[],
            &form,
        )?;
        self.execute_text(request).await?;
        debug!("Marked task record for {} as deleted", release);
        Ok(())
    }
}

/// Render a task record as a one-line status
pub fn describe_task(record: &TaskRecord) -> String {
    let age = record
        .last_update_date
        .as_deref()
        .and_then(seconds_since)
        .map(relative_time);
    match age {
        Some(age) => format!("{}: {} ({})", record.name, status_label(&record.status), age),
        None => format!("{}: {}", record.name, status_label(&record.status)),
    }
}
