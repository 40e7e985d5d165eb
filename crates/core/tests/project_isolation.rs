//! Worker isolation: messages reach only their own project, and
//! stopping one project leaves the others running.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use pegasus::channels::InboundMessage;
use pegasus::projects::ProjectAdapter;
use pg_domain::config::Config;
use pg_providers::ModelRegistry;

type Notifications = Arc<Mutex<Vec<InboundMessage>>>;

fn adapter_with_recorder(
    dir: &tempfile::TempDir,
) -> (Arc<ProjectAdapter>, Notifications) {
    let mut config = Config::default();
    config.data_dir = dir.path().join("data");
    config.auth_dir = dir.path().join("auth");
    // No providers configured: proxied LLM calls fail fast, which is
    // enough to drive worker tasks to a terminal state.
    let models = Arc::new(ModelRegistry::new(
        config.llm.clone(),
        config.auth_dir.clone(),
    ));

    let notifications: Notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    let adapter = ProjectAdapter::new(
        config,
        models,
        Arc::new(Semaphore::new(3)),
        Arc::new(move |inbound| sink.lock().push(inbound)),
    );
    (adapter, notifications)
}

async fn wait_for<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn messages_reach_only_their_own_project() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, notifications) = adapter_with_recorder(&dir);

    adapter
        .start_project("alpha", &dir.path().join("alpha"))
        .await
        .unwrap();
    adapter
        .start_project("beta", &dir.path().join("beta"))
        .await
        .unwrap();
    assert_eq!(adapter.list().await, vec!["alpha", "beta"]);

    adapter.send_message("alpha", "hello alpha", "host").await.unwrap();

    // Alpha's agent settles its task (LLM proxy fails fast) and
    // notifies the host.
    wait_for(
        || notifications.lock().iter().any(|n| n.source == "alpha"),
        "a notification from alpha",
    )
    .await;
    assert!(
        notifications.lock().iter().all(|n| n.source != "beta"),
        "beta must not see alpha's traffic"
    );

    adapter.stop().await;
}

#[tokio::test]
async fn stopping_one_project_leaves_the_other_running() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, notifications) = adapter_with_recorder(&dir);

    adapter
        .start_project("alpha", &dir.path().join("alpha"))
        .await
        .unwrap();
    adapter
        .start_project("beta", &dir.path().join("beta"))
        .await
        .unwrap();

    adapter.stop_project("alpha").await.unwrap();
    assert!(!adapter.is_running("alpha").await);
    assert!(adapter.is_running("beta").await);

    // The host is told about the termination.
    wait_for(
        || {
            notifications
                .lock()
                .iter()
                .any(|n| n.text.contains("Project \"alpha\" Worker has terminated"))
        },
        "alpha's termination notice",
    )
    .await;

    // Beta still accepts messages.
    adapter.send_message("beta", "still there?", "host").await.unwrap();
    wait_for(
        || notifications.lock().iter().any(|n| n.source == "beta"),
        "a notification from beta",
    )
    .await;

    adapter.stop().await;
}

#[tokio::test]
async fn duplicate_project_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, _notifications) = adapter_with_recorder(&dir);

    adapter
        .start_project("alpha", &dir.path().join("alpha"))
        .await
        .unwrap();
    assert!(adapter
        .start_project("alpha", &dir.path().join("alpha"))
        .await
        .is_err());

    adapter.stop().await;
}

#[tokio::test]
async fn messaging_an_unknown_project_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, _notifications) = adapter_with_recorder(&dir);
    assert!(adapter.send_message("ghost", "hi", "host").await.is_err());
}
