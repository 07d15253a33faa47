mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{metadata, FakeMailApi, FakeStore};
use unattach::email::{Action, EmailStatus};
use unattach::labels::{LabelChoice, DEFAULT_DOWNLOADED_LABEL_NAME, DEFAULT_REMOVED_LABEL_NAME};
use unattach::query::SearchQuery;
use unattach::runner::{PeriodicRunner, RunPlan};
use unattach::scheduler::{Schedule, ScheduleState};

fn plan(limit: Option<usize>) -> RunPlan {
    RunPlan {
        query: SearchQuery::Custom("has:attachment".to_string()),
        page_size: 2,
        limit,
        action: Action::Download,
        process_embedded: true,
        backup: false,
        permanently_remove: false,
        downloaded_label: LabelChoice::Default,
        removed_label: LabelChoice::Disabled,
        target_directory: PathBuf::from("unused"),
        filename_schema: unattach::filename::DEFAULT_SCHEMA.to_string(),
        add_metadata: false,
    }
}

fn api(count: usize) -> Arc<FakeMailApi> {
    let items = (1..=count).map(|i| metadata(&format!("m{}", i), 1000)).collect();
    Arc::new(FakeMailApi::with_pages(items, 2, count as u32))
}

#[tokio::test]
async fn test_run_once_searches_selects_and_processes() {
    let api = api(5);
    let runner = PeriodicRunner::new(api.clone(), Arc::new(FakeStore::default()), plan(Some(3)), Schedule::disabled());

    let report = runner.clone().run_once().await.unwrap();

    assert!(!report.stopped);
    assert_eq!(report.emails.len(), 5);
    assert_eq!(report.result.emails_processed, 3);
    let statuses: Vec<EmailStatus> = report.emails.iter().map(|email| email.status()).collect();
    assert_eq!(
        statuses,
        vec![
            EmailStatus::Processed,
            EmailStatus::Processed,
            EmailStatus::Processed,
            EmailStatus::NotSelected,
            EmailStatus::NotSelected,
        ]
    );
    // Only the enabled label is created.
    assert_eq!(*api.created_labels.lock().unwrap(), vec![DEFAULT_DOWNLOADED_LABEL_NAME.to_string()]);
    assert!(report.emails[0].label_ids.contains("Label_1"));
    assert_eq!(runner.scheduler().state(), ScheduleState::Idle);
    assert_eq!(runner.subscribe_process().borrow().emails_done, 3);
}

#[tokio::test]
async fn test_existing_default_label_is_reused() {
    let api = api(1);
    api.labels
        .lock()
        .unwrap()
        .insert("Label_99".to_string(), DEFAULT_REMOVED_LABEL_NAME.to_string());
    let mut run_plan = plan(None);
    run_plan.action = Action::DownloadAndRemove;
    run_plan.downloaded_label = LabelChoice::Id("Label_missing".to_string());
    run_plan.removed_label = LabelChoice::Default;
    let runner = PeriodicRunner::new(api.clone(), Arc::new(FakeStore::default()), run_plan, Schedule::disabled());

    let report = runner.run_once().await.unwrap();

    assert_eq!(report.result.emails_processed, 1);
    // The unknown configured id falls back to the default label, which gets created.
    assert_eq!(*api.created_labels.lock().unwrap(), vec![DEFAULT_DOWNLOADED_LABEL_NAME.to_string()]);
    assert!(report.emails[0].label_ids.contains("Label_99"));
    assert!(report.emails[0].is_removed());
}

#[tokio::test(start_paused = true)]
async fn test_enabled_schedule_rearms_after_each_run() {
    let api = api(2);
    let period = Duration::from_secs(60);
    let runner = PeriodicRunner::new(api.clone(), Arc::new(FakeStore::default()), plan(None), Schedule::every(period));

    runner.clone().run_once().await.unwrap();
    assert_eq!(api.searches(), 1);
    assert!(runner.scheduler().is_armed());
    assert_eq!(runner.scheduler().remaining(), Some(period));

    tokio::time::sleep(period + Duration::from_secs(1)).await;
    for _ in 0..100 {
        if api.searches() == 2 && runner.scheduler().is_armed() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(api.searches(), 2);
    assert!(runner.scheduler().is_armed());

    runner.stop_schedule();
    assert!(!runner.scheduler().is_armed());
    assert!(!runner.schedule().enabled);

    tokio::time::sleep(period * 3).await;
    assert_eq!(api.searches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disabling_the_schedule_disarms() {
    let api = api(1);
    let runner = PeriodicRunner::new(
        api.clone(),
        Arc::new(FakeStore::default()),
        plan(None),
        Schedule::every(Duration::from_secs(30)),
    );

    runner.clone().run_once().await.unwrap();
    assert!(runner.scheduler().is_armed());

    runner.set_schedule(Schedule::disabled());
    assert_eq!(runner.scheduler().state(), ScheduleState::Idle);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.searches(), 1);
}

#[tokio::test]
async fn test_basic_search_uses_label_names() {
    let api = api(1);
    api.labels.lock().unwrap().insert("Label_7".to_string(), "Work".to_string());
    let mut run_plan = plan(None);
    run_plan.query = SearchQuery::Basic {
        min_size_mb: 2,
        label_ids: vec!["Label_7".to_string()],
    };
    let runner = PeriodicRunner::new(api.clone(), Arc::new(FakeStore::default()), run_plan, Schedule::disabled());

    runner.run_once().await.unwrap();

    assert_eq!(api.searched_queries(), vec!["has:attachment size:2m {label:\"Work\"}".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_the_scheduled_run() {
    let mut api = FakeMailApi::with_pages(vec![metadata("m1", 1000), metadata("m2", 1000)], 2, 2);
    api.trash_delay = Some(Duration::from_secs(10));
    let api = Arc::new(api);
    let mut run_plan = plan(None);
    run_plan.action = Action::DownloadAndRemove;
    run_plan.removed_label = LabelChoice::Default;
    let period = Duration::from_secs(60);
    let runner = PeriodicRunner::new(api.clone(), Arc::new(FakeStore::default()), run_plan, Schedule::every(period));
    let start = tokio::time::Instant::now();

    // First run trashes two emails (20s), the scheduled one starts at 80s.
    runner.clone().run_once().await.unwrap();
    assert_eq!(api.trashes(), 2);
    tokio::time::sleep_until(start + Duration::from_secs(85)).await;
    assert_eq!(api.searches(), 2);

    runner.shutdown().await;

    // The email being trashed when shutdown began is finished and labeled,
    // the next one is left alone.
    assert_eq!(api.trashes(), 3);
    assert_eq!(api.fetches(), 3);
    let labeled_trash = api
        .label_calls()
        .iter()
        .filter(|(id, _)| id.ends_with("-trashed"))
        .count();
    assert_eq!(labeled_trash, 3);
    assert!(!runner.scheduler().is_armed());
    assert!(!runner.schedule().enabled);
}
