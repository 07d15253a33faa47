use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::attachment_parser::AttachmentStore;
use crate::driver::{run_search, ProcessDriver, ProcessProgress, SearchProgress};
use crate::email::{Action, Email, ProcessOption, ProcessSettings, ProcessingResult};
use crate::error::TaskError;
use crate::labels::{self, LabelChoice, DEFAULT_DOWNLOADED_LABEL_NAME, DEFAULT_REMOVED_LABEL_NAME};
use crate::mail_api::MailApi;
use crate::query::SearchQuery;
use crate::scheduler::{Schedule, Scheduler};
use crate::task::SearchTask;

/// Everything a run needs besides the collaborators.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub query: SearchQuery,
    pub page_size: u32,
    /// Process only the first N matches.
    pub limit: Option<usize>,
    pub action: Action,
    pub process_embedded: bool,
    pub backup: bool,
    pub permanently_remove: bool,
    pub downloaded_label: LabelChoice,
    pub removed_label: LabelChoice,
    pub target_directory: PathBuf,
    pub filename_schema: String,
    pub add_metadata: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub emails: Vec<Email>,
    pub result: ProcessingResult,
    pub stopped: bool,
}

/// Runs "search, select all, process" as one unit and, while the schedule is
/// enabled, arms the next run once the current one has completed.
///
/// Every run, scheduled or not, is tracked so `shutdown` can wait for the
/// email in flight to finish.
pub struct PeriodicRunner {
    api: Arc<dyn MailApi>,
    store: Arc<dyn AttachmentStore>,
    plan: RunPlan,
    schedule: Mutex<Schedule>,
    scheduler: Scheduler,
    current_run: Mutex<CancellationToken>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    search_progress: watch::Sender<SearchProgress>,
    process_progress: watch::Sender<ProcessProgress>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PeriodicRunner {
    pub fn new(api: Arc<dyn MailApi>, store: Arc<dyn AttachmentStore>, plan: RunPlan, schedule: Schedule) -> Arc<Self> {
        Arc::new(PeriodicRunner {
            api,
            store,
            plan,
            schedule: Mutex::new(schedule),
            scheduler: Scheduler::new(),
            current_run: Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            search_progress: watch::channel(SearchProgress::default()).0,
            process_progress: watch::channel(ProcessProgress::default()).0,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn schedule(&self) -> Schedule {
        *lock(&self.schedule)
    }

    pub fn set_schedule(&self, schedule: Schedule) {
        *lock(&self.schedule) = schedule;
        if !schedule.enabled {
            self.scheduler.disarm();
        }
    }

    /// Disable the schedule and disarm any pending run.
    pub fn stop_schedule(&self) {
        lock(&self.schedule).enabled = false;
        self.scheduler.disarm();
    }

    /// Ask the run in progress to stop at the next email (or page) boundary.
    pub fn stop(&self) {
        lock(&self.current_run).cancel();
    }

    /// Stop for good: disarm the schedule, stop the current run at the next
    /// email boundary and wait until no run is left.
    pub async fn shutdown(&self) {
        self.stop_schedule();
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Runner stopped");
    }

    pub fn subscribe_search(&self) -> watch::Receiver<SearchProgress> {
        self.search_progress.subscribe()
    }

    pub fn subscribe_process(&self) -> watch::Receiver<ProcessProgress> {
        self.process_progress.subscribe()
    }

    /// Run in the background.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<RunReport, TaskError>> {
        self.tracker.spawn(self.clone().run_once())
    }

    pub fn run_once(self: Arc<Self>) -> BoxFuture<'static, Result<RunReport, TaskError>> {
        async move {
            if self.shutdown.is_cancelled() {
                return Ok(RunReport {
                    emails: Vec::new(),
                    result: ProcessingResult::new(),
                    stopped: true,
                });
            }
            let cancel = self.shutdown.child_token();
            *lock(&self.current_run) = cancel.clone();

            let report = self.search_and_process(&cancel).await;
            if let Err(e) = &report {
                error!("❌ Run failed: {}", e);
            }

            let schedule = self.schedule();
            if schedule.enabled {
                let runner = self.clone();
                self.scheduler.arm(schedule.period, move || {
                    let run = runner.tracker.spawn(runner.clone().run_once());
                    async move {
                        if let Err(e) = run.await {
                            error!("❌ Scheduled run ended abnormally: {}", e);
                        }
                    }
                    .boxed()
                });
            }
            report
        }
        .boxed()
    }

    async fn process_settings(&self, mut id_to_label: BTreeMap<String, String>) -> Result<ProcessSettings, TaskError> {
        let downloaded_label_id = labels::get_or_create_label_id(
            self.api.as_ref(),
            &mut id_to_label,
            &self.plan.downloaded_label,
            DEFAULT_DOWNLOADED_LABEL_NAME,
        )
        .await?;
        let removed_label_id = labels::get_or_create_label_id(
            self.api.as_ref(),
            &mut id_to_label,
            &self.plan.removed_label,
            DEFAULT_REMOVED_LABEL_NAME,
        )
        .await?;

        Ok(ProcessSettings {
            process_option: ProcessOption {
                action: self.plan.action,
                process_embedded: self.plan.process_embedded,
                backup: self.plan.backup,
                permanently_remove: self.plan.permanently_remove,
                downloaded_label_id,
                removed_label_id,
            },
            target_directory: self.plan.target_directory.clone(),
            filename_schema: self.plan.filename_schema.clone(),
            add_metadata: self.plan.add_metadata,
            id_to_label,
        })
    }

    async fn search_and_process(&self, cancel: &CancellationToken) -> Result<RunReport, TaskError> {
        let id_to_label = self.api.list_labels().await?;
        let query = self.plan.query.resolve(&id_to_label);
        let task = SearchTask::start(self.api.clone(), &query, self.plan.page_size).await?;
        let mut emails = run_search(task, cancel, &self.search_progress).await?;

        let limit = self.plan.limit.unwrap_or(usize::MAX);
        emails.iter_mut().take(limit).for_each(Email::select);

        if cancel.is_cancelled() {
            return Ok(RunReport {
                emails,
                result: ProcessingResult::new(),
                stopped: true,
            });
        }

        let settings = self.process_settings(id_to_label).await?;
        let driver = ProcessDriver::new(self.api.clone(), self.store.clone(), settings);
        let result = driver.run(&mut emails, cancel, &self.process_progress).await;
        info!(
            "🏁 Run finished: {} processed, {} failed",
            result.emails_processed, result.emails_failed
        );

        Ok(RunReport {
            emails,
            result,
            stopped: cancel.is_cancelled(),
        })
    }
}
