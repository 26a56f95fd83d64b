//! Variation assignment properties

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use shield_core::{LifecycleOutcome, MemoryStore, PersistedStudy, StudyConfig, select_variation};
use shield_types::{HostReason, LifecycleEvent, StudyName, StudySettings, VariationName};

use crate::common::{STUDY, harness_with_store, identity, metadata, settings, variations};

fn assign(client: &str, study: &StudySettings) -> VariationName {
    select_variation(
        &identity(client),
        study.name(),
        study.variations().as_slice(),
        study.force_variation(),
    )
    .unwrap()
}

#[test]
fn same_inputs_always_select_the_same_variation() {
    let study = settings();
    for n in 0..200 {
        let client = format!("client-{n}");
        let first = assign(&client, &study);
        for _ in 0..5 {
            assert_eq!(assign(&client, &study), first);
        }
    }
}

#[test]
fn study_name_salts_the_assignment() {
    let a = settings();
    let b = StudySettings::new(
        StudyName::new("other-study").unwrap(),
        a.variations().clone(),
    );
    let differs = (0..200)
        .map(|n| format!("client-{n}"))
        .any(|client| assign(&client, &a) != assign(&client, &b));
    assert!(differs);
}

#[test]
fn every_positive_weight_variation_is_reachable() {
    let study = StudySettings::new(
        StudyName::new("coverage").unwrap(),
        variations(&[("a", 1.0), ("b", 0.5), ("c", 2.0), ("d", 0.25)]),
    );
    let mut counts: HashMap<VariationName, usize> = HashMap::new();
    for n in 0..5_000 {
        *counts.entry(assign(&format!("id-{n}"), &study)).or_default() += 1;
    }
    assert_eq!(counts.len(), 4);
    // Share tracks weight: c (2.0) must out-draw d (0.25) by a wide margin.
    let c = counts[&VariationName::new("c").unwrap()];
    let d = counts[&VariationName::new("d").unwrap()];
    assert!(c > 4 * d, "c={c} d={d}");
}

#[test]
fn forced_variation_wins_for_every_client() {
    let forced = VariationName::new("not-in-the-list").unwrap();
    let study = settings().with_force_variation(Some(forced.clone()));
    for n in 0..50 {
        assert_eq!(assign(&format!("client-{n}"), &study), forced);
    }
}

#[tokio::test]
async fn committed_assignment_survives_weight_changes() {
    let store = Arc::new(MemoryStore::with_study(PersistedStudy {
        variation: Some(VariationName::new("control").unwrap()),
        first_seen_at: Some(Utc::now()),
        installed_at: Some(Utc::now()),
        ..PersistedStudy::default()
    }));
    // Reweighted so that nobody would land in control on a fresh draw.
    let reweighted = StudySettings::new(
        StudyName::new(STUDY).unwrap(),
        variations(&[("control", 0.000_001), ("treatment", 1_000_000.0)]),
    );
    let mut h = harness_with_store(StudyConfig::new(reweighted), store);
    let outcome = h
        .controller
        .on_event(LifecycleEvent::Startup(HostReason::AppStartup), &metadata())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LifecycleOutcome::Activated {
            variation: VariationName::new("control").unwrap()
        }
    );
}

#[tokio::test]
async fn reinstall_with_same_client_lands_in_same_variation() {
    let mut seen = Vec::new();
    for _ in 0..3 {
        let mut h = harness_with_store(StudyConfig::new(settings()), Arc::new(MemoryStore::new()));
        h.controller
            .on_event(LifecycleEvent::Install(HostReason::AddonInstall), &metadata())
            .await
            .unwrap();
        seen.push(h.controller.variation().cloned().unwrap());
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}
