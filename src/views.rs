//! The three recording-management tables: active recordings, the archive
//! and event templates. Each wraps a [`PollingList`] plus the batch actions
//! available on its selected rows.

use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::api::ApiClient;
use crate::batch::{run_all, BatchOutcome};
use crate::error::ClientError;
use crate::model::{EventTemplate, Keyed, Recording, SavedRecording};
use crate::poller::{ListView, PollingList};
use crate::templates::{SortColumn, TemplateQuery};

/// Recordings on the selected target.
pub struct ActiveRecordingsView {
    api: ApiClient,
    list: PollingList<Recording>,
}

impl ActiveRecordingsView {
    /// Start polling the selected target's recordings.
    pub fn mount(api: &ApiClient, interval: Option<Duration>) -> Self {
        let fetch_api = api.clone();
        let list = PollingList::mount_for_target(api.targets(), interval, move || {
            let api = fetch_api.clone();
            async move { api.list_recordings().await }
        });
        Self {
            api: api.clone(),
            list,
        }
    }

    pub fn list(&self) -> ListView<Recording> {
        self.list.view()
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.list.refresh_now().await
    }

    /// Archive every selected recording. When anything was archived and an
    /// archive view is given, that view is refreshed.
    pub async fn archive_selected(&self, archive: Option<&ArchivedRecordingsView>) -> BatchOutcome<String> {
        let names = keys(&self.list.view().selected_items());
        let api = &self.api;
        let outcome = run_all("archive", names, |name| async move { api.archive_recording(&name).await }).await;
        if let Some(archive) = archive.filter(|_| outcome.any_succeeded()) {
            archive.list.refresh();
        }
        outcome
    }

    /// Stop the selected recordings that are still running, then refresh.
    pub async fn stop_selected(&self) -> BatchOutcome<()> {
        let selected = self.list.view().selected_items();
        let active: Vec<String> = selected
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.name.clone())
            .collect();
        if active.len() < selected.len() {
            tracing::debug!(
                skipped = selected.len() - active.len(),
                "ignoring recordings that are not running"
            );
        }
        let api = &self.api;
        let outcome = run_all("stop", active, |name| async move { api.stop_recording(&name).await }).await;
        self.list.refresh();
        outcome
    }

    /// Delete the selected recordings, then refresh.
    pub async fn delete_selected(&self) -> BatchOutcome<()> {
        let names = keys(&self.list.view().take_selected());
        let api = &self.api;
        let outcome = run_all("delete", names, |name| async move { api.delete_recording(&name).await }).await;
        self.list.refresh();
        outcome
    }

    pub fn unmount(&self) {
        self.list.unmount();
    }
}

/// Recordings in the server-side archive.
pub struct ArchivedRecordingsView {
    api: ApiClient,
    list: PollingList<SavedRecording>,
}

impl ArchivedRecordingsView {
    pub fn mount(api: &ApiClient, interval: Option<Duration>) -> Self {
        let fetch_api = api.clone();
        let list = PollingList::mount(interval, move || {
            let api = fetch_api.clone();
            async move { api.list_archived_recordings().await }
        });
        Self {
            api: api.clone(),
            list,
        }
    }

    pub fn list(&self) -> ListView<SavedRecording> {
        self.list.view()
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.list.refresh_now().await
    }

    pub async fn delete_selected(&self) -> BatchOutcome<()> {
        let names = keys(&self.list.view().take_selected());
        let api = &self.api;
        let outcome = run_all("delete archived", names, |name| async move {
            api.delete_archived_recording(&name).await
        })
        .await;
        self.list.refresh();
        outcome
    }

    /// Upload a local `.jfr` into the archive, then refresh.
    pub async fn upload(&self, file_name: &str, data: Bytes) -> Result<String, ClientError> {
        let stored = self.api.upload_recording(file_name, data).await?;
        self.list.refresh();
        Ok(stored)
    }

    pub fn unmount(&self) {
        self.list.unmount();
    }
}

/// Event templates of the selected target, with a filter and sort.
pub struct TemplatesView {
    api: ApiClient,
    list: PollingList<EventTemplate>,
    query: Mutex<TemplateQuery>,
}

impl TemplatesView {
    pub fn mount(api: &ApiClient, interval: Option<Duration>) -> Self {
        let fetch_api = api.clone();
        let list = PollingList::mount_for_target(api.targets(), interval, move || {
            let api = fetch_api.clone();
            async move { api.list_templates().await }
        });
        Self {
            api: api.clone(),
            list,
            query: Mutex::new(TemplateQuery::new()),
        }
    }

    pub fn list(&self) -> ListView<EventTemplate> {
        self.list.view()
    }

    pub fn query(&self) -> TemplateQuery {
        self.query.lock().clone()
    }

    pub fn set_query(&self, query: TemplateQuery) {
        *self.query.lock() = query;
    }

    pub fn set_filter(&self, filter: &str) {
        self.query.lock().set_filter(filter);
    }

    pub fn toggle_sort(&self, column: SortColumn) {
        self.query.lock().toggle_sort(column);
    }

    /// Rows to display under the current filter and sort.
    pub fn visible(&self) -> Vec<EventTemplate> {
        let items = self.list.view().items();
        self.query.lock().apply(&items)
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.list.refresh_now().await
    }

    /// Delete one custom template, then refresh.
    pub async fn delete(&self, template: &EventTemplate) -> Result<(), ClientError> {
        if !template.is_deletable() {
            return Err(ClientError::validation(
                "template",
                format!("'{}' is not a custom template", template.name),
            ));
        }
        self.api.delete_custom_event_template(&template.name).await?;
        self.list.refresh();
        Ok(())
    }

    /// Upload a template file, then refresh.
    pub async fn upload(&self, file_name: &str, data: Bytes) -> Result<(), ClientError> {
        self.api.add_custom_event_template(file_name, data).await?;
        self.list.refresh();
        Ok(())
    }

    pub fn unmount(&self) {
        self.list.unmount();
    }
}

fn keys<T: Keyed>(items: &[T]) -> Vec<String> {
    items.iter().map(|i| i.key().to_string()).collect()
}
