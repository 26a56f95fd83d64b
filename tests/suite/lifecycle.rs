//! Lifecycle controller scenarios

use std::sync::Arc;

use shield_core::{
    EventType, FileStore, LifecycleController, LifecycleError, LifecycleOutcome, MemorySink,
    StudyConfig, StudyStore,
};
use shield_types::{EndingReason, HostReason, LifecycleEvent, TelemetrySettings};

use crate::common::{fixed_eligibility, harness, identity, metadata, settings};

use shield_types::LifecycleState::{Active, Ending, Evaluating, Installing, NotStarted, Stopped};

#[tokio::test]
async fn ineligible_install_ends_and_uninstall_only_releases() {
    let mut h = harness(fixed_eligibility(false));
    let outcome = h
        .controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LifecycleOutcome::Ended {
            reason: EndingReason::INELIGIBLE,
            url: None
        }
    );
    assert_eq!(h.controller.variation(), None);

    // The host uninstalls the study in response.
    let outcome = h
        .controller
        .on_event(LifecycleEvent::Shutdown(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LifecycleOutcome::Released {
            reason: EndingReason::INELIGIBLE
        }
    );
    assert_eq!(
        h.sink.events(),
        [EventType::Enter, EventType::Ineligible, EventType::Exit]
    );
    assert_eq!(h.controller.history(), [NotStarted, Installing, Ending, Stopped]);
}

#[tokio::test]
async fn user_uninstall_reports_user_disable_once() {
    let mut h = harness(fixed_eligibility(true));
    h.controller
        .on_event(LifecycleEvent::Install(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();

    // Firefox delivers shutdown and then uninstall for the same removal.
    let first = h
        .controller
        .on_event(LifecycleEvent::Shutdown(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();
    let second = h
        .controller
        .on_event(LifecycleEvent::Uninstall(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();

    assert!(matches!(
        first,
        LifecycleOutcome::Ended { ref reason, .. } if *reason == EndingReason::USER_DISABLE
    ));
    assert_eq!(
        second,
        LifecycleOutcome::Released {
            reason: EndingReason::USER_DISABLE
        }
    );
    let events = h.sink.events();
    assert_eq!(
        events.iter().filter(|e| **e == EventType::UserDisable).count(),
        1
    );
    assert_eq!(events.last(), Some(&EventType::Exit));
    assert_eq!(h.controller.state(), Stopped);
}

#[tokio::test]
async fn disable_counts_as_user_ending() {
    let mut h = harness(fixed_eligibility(true));
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    let outcome = h
        .controller
        .on_event(LifecycleEvent::Disable(HostReason::AddonDisable), &metadata())
        .await
        .unwrap();
    assert!(matches!(outcome, LifecycleOutcome::Ended { .. }));
    assert_eq!(
        h.controller.ending_state().reason(),
        Some(&EndingReason::USER_DISABLE)
    );
}

#[tokio::test]
async fn programmatic_end_then_uninstall_is_not_a_user_ending() {
    let mut h = harness(fixed_eligibility(true));
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    assert!(h.controller.end_study(EndingReason::EXPIRED).is_effected());
    h.controller
        .on_event(LifecycleEvent::Uninstall(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();

    let events = h.sink.events();
    assert!(!events.contains(&EventType::UserDisable));
    assert_eq!(
        events,
        [
            EventType::Enter,
            EventType::Installed,
            EventType::Startup,
            EventType::Expired,
            EventType::Exit
        ]
    );
    assert_eq!(
        h.controller.history(),
        [NotStarted, Installing, Evaluating, Active, Ending, Stopped]
    );
}

#[tokio::test]
async fn telemetry_disabled_still_runs_lifecycle() {
    let config = StudyConfig::new(settings().with_telemetry(TelemetrySettings {
        send: false,
        remove_testing_flag: false,
    }));
    let mut h = harness(config);
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    assert_eq!(h.controller.state(), Active);
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn testing_flag_follows_settings() {
    let config = StudyConfig::new(settings().with_telemetry(TelemetrySettings {
        send: true,
        remove_testing_flag: true,
    }));
    let mut h = harness(config);
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    assert!(h.sink.records().iter().all(|r| !r.testing));
}

#[tokio::test]
async fn startup_record_carries_install_metadata() {
    let mut h = harness(fixed_eligibility(true));
    let mut meta = metadata();
    meta.resource_uri = "resource://button-color/".to_string();
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &meta)
        .await
        .unwrap();
    let records = h.sink.records();
    let startup = records
        .iter()
        .find(|r| r.event_type == EventType::Startup)
        .unwrap();
    assert_eq!(startup.data["reason"], "ADDON_INSTALL");
    assert_eq!(startup.data["addonId"], "button-color@shield.example");
    assert_eq!(startup.data["resourceUri"], "resource://button-color/");
    assert!(!startup.data.contains_key("instanceId"));
}

#[tokio::test]
async fn second_start_event_is_rejected() {
    let mut h = harness(fixed_eligibility(true));
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    let err = h
        .controller
        .on_event(LifecycleEvent::Startup(HostReason::AppStartup), &metadata())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidState { state: Active, .. }));
    assert_eq!(h.controller.state(), Active);
}

#[tokio::test]
async fn file_store_carries_state_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let session = |store: Arc<dyn StudyStore>| {
        let sink = Arc::new(MemorySink::new());
        let controller = LifecycleController::new(
            StudyConfig::new(settings()),
            identity("client-7"),
            sink.clone(),
            store,
        );
        (controller, sink)
    };

    let (mut first, first_sink) = session(Arc::new(FileStore::new(&path)));
    first
        .on_event(LifecycleEvent::Install(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    first
        .on_event(LifecycleEvent::Shutdown(HostReason::AppShutdown), &metadata())
        .await
        .unwrap();
    let assigned = first.variation().cloned().unwrap();
    assert!(first_sink.events().contains(&EventType::Enter));

    let (mut second, second_sink) = session(Arc::new(FileStore::new(&path)));
    second
        .on_event(LifecycleEvent::Startup(HostReason::AppStartup), &metadata())
        .await
        .unwrap();
    assert_eq!(second.variation(), Some(&assigned));
    assert_eq!(second_sink.events(), [EventType::Startup]);

    // Uninstall after a user ending wipes the install's state.
    second
        .on_event(LifecycleEvent::Shutdown(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();
    second
        .on_event(LifecycleEvent::Uninstall(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn ending_carries_into_the_next_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let session = |store: Arc<dyn StudyStore>| {
        let sink = Arc::new(MemorySink::new());
        let controller = LifecycleController::new(
            StudyConfig::new(settings()),
            identity("client-8"),
            sink.clone(),
            store,
        );
        (controller, sink)
    };

    // The study ends itself, but the host goes away before uninstalling.
    let (mut first, first_sink) = session(Arc::new(FileStore::new(&path)));
    first
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    assert!(first.end_study(EndingReason::EXPIRED).is_effected());
    assert_eq!(
        first_sink.events(),
        [
            EventType::Enter,
            EventType::Installed,
            EventType::Startup,
            EventType::Expired,
            EventType::Exit
        ]
    );
    drop(first);

    let (mut second, second_sink) = session(Arc::new(FileStore::new(&path)));
    let outcome = second
        .on_event(LifecycleEvent::Startup(HostReason::AppStartup), &metadata())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LifecycleOutcome::AwaitingUninstall {
            reason: EndingReason::EXPIRED
        }
    );
    assert_eq!(second.variation(), None);

    let outcome = second
        .on_event(LifecycleEvent::Uninstall(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LifecycleOutcome::Released {
            reason: EndingReason::EXPIRED
        }
    );
    assert!(second_sink.is_empty());
    assert_eq!(second.history(), [NotStarted, Ending, Stopped]);
    assert!(!path.exists());
}

#[tokio::test]
async fn shutdown_then_uninstall_is_rejected_once_stopped() {
    let mut h = harness(fixed_eligibility(true));
    h.controller
        .on_event(LifecycleEvent::Startup(HostReason::AddonInstall), &metadata())
        .await
        .unwrap();
    let outcome = h
        .controller
        .on_event(LifecycleEvent::Shutdown(HostReason::AppShutdown), &metadata())
        .await
        .unwrap();
    assert_eq!(outcome, LifecycleOutcome::Unloaded);

    let err = h
        .controller
        .on_event(LifecycleEvent::Uninstall(HostReason::AddonUninstall), &metadata())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidState { state: Stopped, .. }));
    assert!(!err.is_fatal());
    assert!(!h.sink.events().iter().any(|e| e.is_ending()));
}
