//! Periodically refreshed lists with per-item selection state.
//!
//! A [`PollingList`] owns a background task that re-fetches its items on an
//! interval and whenever the selected target changes. Results are applied
//! under a sequence guard: a fetch only lands if no later-issued fetch has
//! already landed, and nothing lands once the list is unmounted.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::model::{Keyed, Target};
use crate::target::TargetContext;

type Fetch<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<T>, ClientError>> + Send + Sync>;

/// Items plus the user's checkbox and expansion state, keyed by item name
/// so it survives reordering between refreshes.
#[derive(Debug, Clone)]
pub struct ListState<T> {
    items: Vec<T>,
    checked: HashSet<String>,
    expanded: HashSet<String>,
    header_checked: bool,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            checked: HashSet::new(),
            expanded: HashSet::new(),
            header_checked: false,
        }
    }
}

impl<T: Keyed + Clone> ListState<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Swap in freshly fetched items. Selection for items that disappeared
    /// is dropped.
    pub fn replace(&mut self, items: Vec<T>) {
        let keys: HashSet<&str> = items.iter().map(Keyed::key).collect();
        self.checked.retain(|k| keys.contains(k.as_str()));
        self.expanded.retain(|k| keys.contains(k.as_str()));
        self.items = items;
        self.header_checked = self.all_checked();
    }

    pub fn set_checked(&mut self, key: &str, checked: bool) {
        if !self.items.iter().any(|i| i.key() == key) {
            return;
        }
        if checked {
            self.checked.insert(key.to_string());
            self.header_checked = self.all_checked();
        } else {
            self.checked.remove(key);
            self.header_checked = false;
        }
    }

    /// The header checkbox: select or clear every item.
    pub fn check_all(&mut self, checked: bool) {
        self.header_checked = checked && !self.items.is_empty();
        if checked {
            self.checked = self.items.iter().map(|i| i.key().to_string()).collect();
        } else {
            self.checked.clear();
        }
    }

    pub fn header_checked(&self) -> bool {
        self.header_checked
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.checked.contains(key)
    }

    /// Checked items in display order.
    pub fn selected_items(&self) -> Vec<T> {
        self.items
            .iter()
            .filter(|i| self.checked.contains(i.key()))
            .cloned()
            .collect()
    }

    /// The checked items, unchecking them.
    pub fn take_selected(&mut self) -> Vec<T> {
        let selected = self.selected_items();
        self.checked.clear();
        self.header_checked = false;
        selected
    }

    pub fn toggle_expanded(&mut self, key: &str) -> bool {
        if self.expanded.remove(key) {
            false
        } else {
            self.expanded.insert(key.to_string());
            true
        }
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.expanded.contains(key)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn all_checked(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| self.checked.contains(i.key()))
    }
}

struct Slot<T> {
    list: ListState<T>,
    /// Sequence number of the fetch whose result is currently shown.
    applied: u64,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    issued: Mutex<u64>,
    revision: watch::Sender<u64>,
    fetch: Fetch<T>,
    targets: Option<TargetContext>,
    cancel: CancellationToken,
}

impl<T: Keyed + Clone + Send + 'static> Shared<T> {
    fn next_seq(&self) -> u64 {
        let mut issued = self.issued.lock();
        *issued += 1;
        *issued
    }

    async fn refresh(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        if let Some(targets) = &self.targets {
            if targets.current().is_none() {
                self.reset();
                return Ok(());
            }
        }

        let seq = self.next_seq();
        let result = (self.fetch)().await;

        let mut slot = self.slot.lock();
        if self.cancel.is_cancelled() {
            tracing::trace!(seq, "list unmounted, discarding fetch");
            return Ok(());
        }
        if seq < slot.applied {
            tracing::debug!(seq, applied = slot.applied, "discarding stale fetch");
            return Ok(());
        }
        let items = result?;
        slot.list.replace(items);
        slot.applied = seq;
        drop(slot);
        self.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    /// Clear the list and invalidate every fetch issued so far.
    fn reset(&self) {
        let seq = self.next_seq();
        let mut slot = self.slot.lock();
        slot.list.clear();
        slot.applied = seq;
        drop(slot);
        self.revision.send_modify(|r| *r += 1);
    }
}

/// A list kept fresh by a background task. Dropping it stops the task and
/// discards any fetch still in flight.
pub struct PollingList<T> {
    shared: Arc<Shared<T>>,
}

/// Cloneable access to a [`PollingList`]'s state.
#[derive(Clone)]
pub struct ListView<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Keyed + Clone + Send + Sync + 'static> PollingList<T> {
    /// Create an unmounted list. Nothing is fetched until a refresh is
    /// requested.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, ClientError>> + Send + 'static,
    {
        Self::build(fetch, None)
    }

    fn build<F, Fut>(fetch: F, targets: Option<TargetContext>) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, ClientError>> + Send + 'static,
    {
        let fetch: Fetch<T> = Arc::new(move || -> BoxFuture<'static, Result<Vec<T>, ClientError>> {
            Box::pin(fetch())
        });
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    list: ListState::default(),
                    applied: 0,
                }),
                issued: Mutex::new(0),
                revision: watch::channel(0).0,
                fetch,
                targets,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Fetch immediately, then every `interval` (never again when `None`).
    pub fn mount<F, Fut>(interval: Option<Duration>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, ClientError>> + Send + 'static,
    {
        let list = Self::build(fetch, None);
        tokio::spawn(poll_loop(list.shared.clone(), interval, None));
        list
    }

    /// Like [`Self::mount`], but the list also clears and re-fetches when
    /// the selected target changes, and stays empty while none is selected.
    pub fn mount_for_target<F, Fut>(targets: &TargetContext, interval: Option<Duration>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, ClientError>> + Send + 'static,
    {
        let list = Self::build(fetch, Some(targets.clone()));
        let target_rx = targets.target();
        tokio::spawn(poll_loop(list.shared.clone(), interval, Some(target_rx)));
        list
    }

    pub fn view(&self) -> ListView<T> {
        ListView {
            shared: self.shared.clone(),
        }
    }

    /// Request a refresh in the background.
    pub fn refresh(&self) {
        spawn_refresh(self.shared.clone());
    }

    /// Refresh and wait for the result to be applied.
    pub async fn refresh_now(&self) -> Result<(), ClientError> {
        self.shared.refresh().await
    }

    /// Stop polling. Fetches still in flight are discarded when they finish.
    pub fn unmount(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_mounted(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }
}

impl<T> Drop for PollingList<T> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl<T: Keyed + Clone + Send + Sync + 'static> ListView<T> {
    /// Copy of the current state.
    pub fn snapshot(&self) -> ListState<T> {
        self.shared.slot.lock().list.clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.shared.slot.lock().list.items.clone()
    }

    /// Revision counter, bumped on every applied change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn refresh(&self) {
        spawn_refresh(self.shared.clone());
    }

    pub async fn refresh_now(&self) -> Result<(), ClientError> {
        self.shared.refresh().await
    }

    /// Run `f` against the live state.
    pub fn update<R>(&self, f: impl FnOnce(&mut ListState<T>) -> R) -> R {
        let out = f(&mut self.shared.slot.lock().list);
        self.shared.revision.send_modify(|r| *r += 1);
        out
    }

    pub fn set_checked(&self, key: &str, checked: bool) {
        self.update(|s| s.set_checked(key, checked));
    }

    pub fn check_all(&self, checked: bool) {
        self.update(|s| s.check_all(checked));
    }

    pub fn selected_items(&self) -> Vec<T> {
        self.shared.slot.lock().list.selected_items()
    }

    pub fn take_selected(&self) -> Vec<T> {
        self.update(|s| s.take_selected())
    }
}

fn spawn_refresh<T: Keyed + Clone + Send + Sync + 'static>(shared: Arc<Shared<T>>) {
    tokio::spawn(async move { run_refresh(&shared).await });
}

async fn poll_loop<T: Keyed + Clone + Send + Sync + 'static>(
    shared: Arc<Shared<T>>,
    interval: Option<Duration>,
    mut target_rx: Option<watch::Receiver<Option<Target>>>,
) {
    let cancel = shared.cancel.clone();
    if let Some(rx) = target_rx.as_mut() {
        rx.mark_unchanged();
    }
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    run_refresh(&shared).await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = next_tick(&mut ticker) => run_refresh(&shared).await,
            changed = target_changed(&mut target_rx) => {
                if changed {
                    tracing::debug!("target changed, reloading list");
                    shared.reset();
                    run_refresh(&shared).await;
                } else {
                    target_rx = None;
                }
            }
        }
    }
    tracing::trace!("poll loop stopped");
}

async fn run_refresh<T: Keyed + Clone + Send + 'static>(shared: &Shared<T>) {
    // Failures were already surfaced by the client that produced them.
    if let Err(e) = shared.refresh().await {
        tracing::debug!(error = %e, "list refresh failed");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// `false` once the sender is gone.
async fn target_changed(rx: &mut Option<watch::Receiver<Option<Target>>>) -> bool {
    match rx {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
