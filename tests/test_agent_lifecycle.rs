//! End-to-end lifecycle against the mock transport: connect, subscribe,
//! beacon, dispatch, exit.

use std::time::Duration;
use taskbeacon::protocol::{TaskMessage, TaskResult};
use taskbeacon::testing::mocks::MockTransport;
use taskbeacon::{AgentConfig, AgentLifecycle};

fn config(dwell_secs: u64) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.mqtt.endpoint = "broker.test".to_string();
    config.tasking.dwell_secs = dwell_secs;
    config
}

fn task(name: &str, arguments: &str) -> TaskMessage {
    TaskMessage {
        task: name.to_string(),
        arguments: arguments.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn full_cycle_beacons_then_exits_on_task() {
    let mut lifecycle = AgentLifecycle::new(config(1), MockTransport::new());
    lifecycle.initialize().await.unwrap();
    lifecycle.start().await.unwrap();

    let transport = lifecycle.transport().unwrap().clone();
    assert_eq!(transport.subscribed_topics(), vec!["c2/tasking"]);

    let runner = tokio::spawn(async move {
        let outcome = lifecycle.run().await;
        lifecycle.shutdown().await.unwrap();
        outcome
    });

    // A few beacon intervals pass, then the operator sends exit
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    transport.inject_task(task("exit", "")).await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    runner.await.unwrap().unwrap();

    assert!(transport.heartbeat_count() >= 2);
    let results = transport.published_results();
    assert_eq!(
        results,
        vec![TaskResult::ok("Successfully received exit, quitting...")]
    );
}

#[tokio::test(start_paused = true)]
async fn dwell_change_paces_subsequent_beacons() {
    let mut lifecycle = AgentLifecycle::new(config(1), MockTransport::new());
    lifecycle.initialize().await.unwrap();
    lifecycle.start().await.unwrap();

    let transport = lifecycle.transport().unwrap().clone();
    let state = lifecycle.state().clone();

    let runner = tokio::spawn(async move { lifecycle.run().await });

    transport.inject_task(task("set-dwell-time", "30")).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(state.dwell_secs(), 30);
    let beacons_before = transport.heartbeat_count();

    // With a 30s dwell, 10 more seconds add at most one beacon
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(transport.heartbeat_count() <= beacons_before + 1);

    state.request_exit();
    tokio::time::sleep(Duration::from_secs(31)).await;
    runner.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn task_results_use_wire_envelope() {
    let mut lifecycle = AgentLifecycle::new(config(1), MockTransport::new());
    lifecycle.initialize().await.unwrap();
    lifecycle.start().await.unwrap();

    let transport = lifecycle.transport().unwrap().clone();
    transport.inject_task(task("ping", "")).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let results = transport.published_results();
    assert_eq!(results.len(), 1);

    let wire = serde_json::to_string(&results[0]).unwrap();
    assert!(wire.contains(r#""contents":"pong""#));
    assert!(wire.contains(r#""success":"true""#));
}

#[tokio::test(start_paused = true)]
async fn failed_tasks_still_publish_a_result() {
    let mut lifecycle = AgentLifecycle::new(config(1), MockTransport::new());
    lifecycle.initialize().await.unwrap();
    lifecycle.start().await.unwrap();

    let transport = lifecycle.transport().unwrap().clone();
    transport.inject_task(task("set-dwell-time", "soon")).await;
    transport.inject_task(task("ping", "")).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let results = transport.published_results();
    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert_eq!(results[1], TaskResult::ok("pong"));
}

#[tokio::test]
async fn heartbeat_failures_do_not_stop_the_loop() {
    let mut lifecycle = AgentLifecycle::new(config(1), MockTransport::new());
    lifecycle.initialize().await.unwrap();
    lifecycle.start().await.unwrap();

    let transport = lifecycle.transport().unwrap().clone();
    transport.fail_publishes(true);

    let state = lifecycle.state().clone();
    let runner = tokio::spawn(async move { lifecycle.run().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    state.request_exit();

    // Loop must end via the flag, not via the publish error
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
