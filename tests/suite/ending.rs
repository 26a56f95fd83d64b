//! Ending latch properties under concurrency

use std::sync::Arc;

use futures_util::future::join_all;
use shield_core::{EndingOutcome, EndingResolver, EndingState, EventType, MemorySink, Telemetry};
use shield_types::{
    EndingCategory, EndingConfig, EndingReason, EndingUrl, Endings, StudyName, TelemetrySettings,
    VariationName,
};
use url::Url;

use crate::common::{STUDY, identity};

fn resolver(endings: Endings) -> (EndingResolver, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let study = StudyName::new(STUDY).unwrap();
    let telemetry = Telemetry::new(sink.clone(), study.clone(), TelemetrySettings::default());
    let resolver = EndingResolver::new(
        Arc::new(EndingState::new()),
        telemetry,
        study,
        endings,
        identity("client-1"),
    );
    (resolver, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_tasks_effect_exactly_one_ending() {
    let (resolver, sink) = resolver(Endings::new());
    let reasons = [
        EndingReason::EXPIRED,
        EndingReason::USER_DISABLE,
        EndingReason::new("too-popular").unwrap(),
        EndingReason::new("broken").unwrap(),
    ];

    let tasks = (0..64).map(|n| {
        let resolver = resolver.clone();
        let reason = reasons[n % reasons.len()].clone();
        tokio::spawn(async move { resolver.end_study(reason, None) })
    });
    let outcomes: Vec<EndingOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = outcomes.iter().filter(|o| o.is_effected()).collect();
    assert_eq!(winners.len(), 1);
    let recorded = winners[0].reason().clone();
    assert!(outcomes.iter().all(|o| *o.reason() == recorded));
    assert_eq!(resolver.state().reason(), Some(&recorded));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].is_ending());
    assert_eq!(events[1], EventType::Exit);
}

#[tokio::test]
async fn base_url_carries_study_parameters() {
    let base = Url::parse("https://example.com/survey?src=shield").unwrap();
    let mut endings = Endings::new();
    endings.insert(
        EndingReason::new("too-popular").unwrap(),
        EndingConfig::new(Some(EndingUrl::Base(base)), Some(EndingCategory::Positive)),
    );
    let (resolver, sink) = resolver(endings);

    let variation = VariationName::new("treatment").unwrap();
    let EndingOutcome::Effected { url: Some(url), .. } =
        resolver.end_study(EndingReason::new("too-popular").unwrap(), Some(&variation))
    else {
        panic!("expected an effected ending with a url");
    };
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let expected = [
        ("src", "shield"),
        ("reason", "too-popular"),
        ("study", STUDY),
        ("variation", "treatment"),
        ("addon_version", "1.0.0"),
        ("who", "client-1"),
    ];
    assert_eq!(
        pairs,
        expected
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<Vec<_>>()
    );
    assert_eq!(sink.events(), [EventType::EndedPositive, EventType::Exit]);
}

#[test]
fn unconfigured_custom_reason_reports_neutral() {
    let (resolver, sink) = resolver(Endings::new());
    let outcome = resolver.end_study(EndingReason::new("dont-care").unwrap(), None);
    assert_eq!(
        outcome,
        EndingOutcome::Effected {
            reason: EndingReason::new("dont-care").unwrap(),
            url: None
        }
    );
    assert_eq!(sink.events(), [EventType::EndedNeutral, EventType::Exit]);
}

#[test]
fn latch_shared_between_resolver_clones() {
    let (resolver, sink) = resolver(Endings::new());
    let other = resolver.clone();
    assert!(resolver.end_study(EndingReason::EXPIRED, None).is_effected());
    assert_eq!(
        other.end_study(EndingReason::USER_DISABLE, None),
        EndingOutcome::AlreadyEnded {
            reason: EndingReason::EXPIRED
        }
    );
    assert_eq!(sink.events().len(), 2);
}
