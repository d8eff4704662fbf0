//! Integration tests for the concurrent resolution dispatcher.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use forgelink::protocol::ResolveResponsePayload;
use forgelink::worker::dispatcher;

use super::test_helpers::{collecting_sender, resolve_request, CountingResolver};

async fn next_response(
    rx: &mut mpsc::UnboundedReceiver<(i32, ResolveResponsePayload)>,
) -> (i32, ResolveResponsePayload) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("response must arrive in time")
        .expect("collector must stay open")
}

/// N concurrent requests for the same key trigger exactly one real
/// resolution call and N identical responses.
#[tokio::test]
async fn same_key_requests_deduplicate_to_one_call() {
    let resolver = Arc::new(CountingResolver::new(Duration::from_millis(50)));
    let (sender, mut rx) = collecting_sender();
    let (dispatch, dispatch_loop) = dispatcher(resolver.clone(), sender);

    let ct = CancellationToken::new();
    let loop_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    // All eight land in one batch before the first resolution completes.
    for node_id in 0..8 {
        dispatch.submit(resolve_request(1, node_id, "Forge.Sdk", Some("1.0.0")));
    }

    let mut nodes = HashSet::new();
    let mut paths = HashSet::new();
    for _ in 0..8 {
        let (node_id, response) = next_response(&mut rx).await;
        nodes.insert(node_id);
        paths.insert(response.path.clone());
    }

    assert_eq!(resolver.calls(), 1, "one real resolution call per key");
    assert_eq!(nodes.len(), 8, "every origin node gets its own response");
    assert_eq!(paths.len(), 1, "all responses carry the same result");

    ct.cancel();
    loop_task.await.unwrap();
}

#[tokio::test]
async fn distinct_keys_resolve_independently() {
    let resolver = Arc::new(CountingResolver::new(Duration::from_millis(10)));
    let (sender, mut rx) = collecting_sender();
    let (dispatch, dispatch_loop) = dispatcher(resolver.clone(), sender);

    let ct = CancellationToken::new();
    let loop_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    dispatch.submit(resolve_request(1, 1, "Forge.Sdk", None));
    dispatch.submit(resolve_request(1, 1, "Forge.Web", None));
    // Same name in a different submission is its own key.
    dispatch.submit(resolve_request(2, 2, "Forge.Sdk", None));

    for _ in 0..3 {
        next_response(&mut rx).await;
    }
    assert_eq!(resolver.calls(), 3);

    ct.cancel();
    loop_task.await.unwrap();
}

/// A second distinct version for a cached name keeps the first result and
/// records exactly one mismatch warning.
#[tokio::test]
async fn version_mismatch_keeps_first_result_and_warns_once() {
    let resolver = Arc::new(CountingResolver::new(Duration::from_millis(1)));
    let (sender, mut rx) = collecting_sender();
    let (dispatch, dispatch_loop) = dispatcher(resolver.clone(), sender);

    let ct = CancellationToken::new();
    let loop_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    dispatch.submit(resolve_request(1, 1, "Foo", Some("1.0")));
    let (_, first) = next_response(&mut rx).await;

    dispatch.submit(resolve_request(1, 2, "Foo", Some("2.0")));
    let (_, second) = next_response(&mut rx).await;

    dispatch.submit(resolve_request(1, 3, "Foo", Some("3.0")));
    let (_, third) = next_response(&mut rx).await;

    assert_eq!(resolver.calls(), 1);
    assert_eq!(first.path, second.path);
    assert_eq!(first.path, third.path);
    assert_eq!(second.version.as_deref(), Some("1.0"));
    assert_eq!(
        dispatch.version_mismatch_warnings(),
        1,
        "the mismatch is recorded once per key"
    );

    ct.cancel();
    loop_task.await.unwrap();
}

/// Clearing a submission's cache makes the next request resolve afresh.
#[tokio::test]
async fn clear_cache_forces_a_fresh_resolution() {
    let resolver = Arc::new(CountingResolver::new(Duration::from_millis(1)));
    let (sender, mut rx) = collecting_sender();
    let (dispatch, dispatch_loop) = dispatcher(resolver.clone(), sender);

    let ct = CancellationToken::new();
    let loop_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    dispatch.submit(resolve_request(1, 1, "Forge.Sdk", None));
    next_response(&mut rx).await;
    assert_eq!(resolver.calls(), 1);

    dispatch.submit(resolve_request(1, 1, "Forge.Sdk", None));
    next_response(&mut rx).await;
    assert_eq!(resolver.calls(), 1, "cached while the submission lives");

    dispatch.clear_cache(1);

    dispatch.submit(resolve_request(1, 1, "Forge.Sdk", None));
    next_response(&mut rx).await;
    assert_eq!(resolver.calls(), 2, "cleared submission resolves afresh");

    ct.cancel();
    loop_task.await.unwrap();
}

/// A failing resolution answers its own request as unresolved and leaves
/// sibling requests in the same batch untouched.
#[tokio::test]
async fn failures_stay_localized_to_one_request() {
    let resolver = Arc::new(CountingResolver::new(Duration::from_millis(5)));
    let (sender, mut rx) = collecting_sender();
    let (dispatch, dispatch_loop) = dispatcher(resolver.clone(), sender);

    let ct = CancellationToken::new();
    let loop_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    dispatch.submit(resolve_request(1, 1, "missing.thing", None));
    dispatch.submit(resolve_request(1, 2, "Forge.Sdk", None));

    let mut resolved = 0;
    let mut unresolved = 0;
    for _ in 0..2 {
        let (_, response) = next_response(&mut rx).await;
        if response.path.is_some() {
            resolved += 1;
        } else {
            unresolved += 1;
        }
    }
    assert_eq!((resolved, unresolved), (1, 1));

    // The dispatcher is still serving after the failure.
    dispatch.submit(resolve_request(1, 3, "Forge.Web", None));
    let (_, response) = next_response(&mut rx).await;
    assert!(response.path.is_some());

    ct.cancel();
    loop_task.await.unwrap();
}

/// The loop honors shutdown between batches.
#[tokio::test]
async fn shutdown_stops_the_loop() {
    let resolver = Arc::new(CountingResolver::new(Duration::from_millis(1)));
    let (sender, _rx) = collecting_sender();
    let (_dispatch, dispatch_loop) = dispatcher(resolver, sender);

    let ct = CancellationToken::new();
    let loop_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    ct.cancel();
    tokio::time::timeout(Duration::from_secs(1), loop_task)
        .await
        .expect("loop must stop promptly")
        .unwrap();
}
