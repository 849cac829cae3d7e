use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::random;
use setl::assignment::{StageDirective, TaskAssignment};
use setl::controller::NodeController;
use setl::error::ErrorKind;
use setl::services::{AssignmentListener, StageMetricsCollector};
use setl::stage::{StageFactory, StageTask};
use setl::test_utils::services::TestServices;
use setl::test_utils::stage::{
    StageRecorder, failing_shutdown_factory, failing_start_factory, mock_factory,
};
use setl::types::StageKind;
use setl_config::shared::NodeConfig;
use setl_telemetry::tracing::init_test_tracing;
use tokio::time::sleep;

fn node_config() -> NodeConfig {
    NodeConfig {
        id: Some(random()),
        host: "127.0.0.1".parse().unwrap(),
        port: 2088,
        workers: 4,
        drain_grace_ms: 10,
        profiling: false,
    }
}

fn controller_with(factory: StageFactory) -> (Arc<NodeController>, TestServices) {
    let services = TestServices::new();
    let controller = NodeController::new(node_config(), factory, services.services());
    (controller, services)
}

fn create(stage: StageKind) -> (StageKind, StageDirective) {
    (stage, StageDirective::Create)
}

fn remove(stage: StageKind) -> (StageKind, StageDirective) {
    (stage, StageDirective::Remove)
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_batch_is_accepted() {
    init_test_tracing();

    let (controller, _services) = controller_with(mock_factory(&StageRecorder::default()));

    assert!(controller.process(&[]).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_event_for_unknown_pipeline_is_a_noop() {
    init_test_tracing();

    let (controller, services) = controller_with(mock_factory(&StageRecorder::default()));
    let pipeline_id = random();

    let accepted = controller
        .process(&[TaskAssignment::shutdown_pipeline(pipeline_id)])
        .await
        .unwrap();

    assert!(accepted);
    assert!(controller.running_pipelines().is_empty());
    // Nothing was running, so nothing was released either.
    assert!(services.connection_pools.releases().is_empty());
    assert!(services.arbitration.pipeline_tooling_releases().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn create_directives_start_and_register_stages() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 7;

    let accepted = controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select), create(StageKind::Extract)],
        )])
        .await
        .unwrap();

    assert!(accepted);
    assert_eq!(controller.running_pipelines(), vec![pipeline_id]);
    assert!(controller.is_stage_running(pipeline_id, StageKind::Select));
    assert!(controller.is_stage_running(pipeline_id, StageKind::Extract));
    assert!(!controller.is_stage_running(pipeline_id, StageKind::Load));

    let select = recorder.latest(pipeline_id, StageKind::Select).unwrap();
    let extract = recorder.latest(pipeline_id, StageKind::Extract).unwrap();
    assert!(select.is_alive());
    assert!(extract.is_alive());

    // Stale resources were released before the fresh run started.
    assert_eq!(services.connection_pools.releases(), vec![pipeline_id]);
    assert_eq!(services.dialects.releases(), vec![pipeline_id]);
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_shutdown_stops_tasks_and_clears_registry() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 7;

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select), create(StageKind::Extract)],
        )])
        .await
        .unwrap();

    let accepted = controller
        .process(&[TaskAssignment::shutdown_pipeline(pipeline_id)])
        .await
        .unwrap();

    assert!(accepted);
    assert!(controller.running_pipelines().is_empty());
    assert!(!controller.is_stage_running(pipeline_id, StageKind::Select));
    assert!(!controller.is_stage_running(pipeline_id, StageKind::Extract));

    let select = recorder.latest(pipeline_id, StageKind::Select).unwrap();
    let extract = recorder.latest(pipeline_id, StageKind::Extract).unwrap();
    assert_eq!(select.shutdowns(), 1);
    assert_eq!(extract.shutdowns(), 1);

    // Once at activation, once at teardown.
    assert_eq!(
        services.connection_pools.releases(),
        vec![pipeline_id, pipeline_id]
    );
    assert_eq!(
        services.arbitration.pipeline_tooling_releases(),
        vec![pipeline_id]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_create_overwrites_and_abandons_previous_instance() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, _services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 3;

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select)],
        )])
        .await
        .unwrap();
    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select)],
        )])
        .await
        .unwrap();

    let created = recorder.created();
    assert_eq!(created.len(), 2);

    // The superseded instance was abandoned: never shut down, still believes
    // it is alive.
    assert_eq!(created[0].shutdowns(), 0);
    assert!(created[0].is_alive());

    // The replacement, not the abandoned instance, answers queries.
    assert_eq!(
        controller.pending_work(pipeline_id, StageKind::Select),
        "stage:select pending:[work-1]"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_directive_for_absent_stage_is_a_noop() {
    init_test_tracing();

    let (controller, _services) = controller_with(mock_factory(&StageRecorder::default()));

    let accepted = controller
        .process(&[TaskAssignment::update(5, [remove(StageKind::Transform)])])
        .await
        .unwrap();

    assert!(accepted);
    assert!(controller.running_pipelines().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_last_stage_prunes_the_pipeline() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, _services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 11;

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Load)],
        )])
        .await
        .unwrap();
    assert_eq!(controller.running_pipeline_count(), 1);

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [remove(StageKind::Load)],
        )])
        .await
        .unwrap();

    assert!(controller.running_pipelines().is_empty());
    let load = recorder.latest(pipeline_id, StageKind::Load).unwrap();
    assert_eq!(load.shutdowns(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_create_applies_earlier_events_and_skips_later_ones() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) =
        controller_with(failing_start_factory(&recorder, StageKind::Extract));

    let batch = [
        TaskAssignment::update(1, [create(StageKind::Select)]),
        TaskAssignment::update(2, [create(StageKind::Extract)]),
        TaskAssignment::update(3, [create(StageKind::Load)]),
    ];

    let err = controller.process(&batch).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StageStartFailed);

    // Event 1 was applied.
    assert!(controller.is_stage_running(1, StageKind::Select));
    // Event 2 failed and left no registered stage behind.
    assert!(!controller.is_stage_running(2, StageKind::Extract));
    assert_eq!(controller.running_pipelines(), vec![1]);
    // Event 3 was never attempted.
    assert!(recorder.latest(3, StageKind::Load).is_none());
    assert_eq!(services.connection_pools.releases(), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stage_shutdown_failure_does_not_block_pipeline_teardown() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) =
        controller_with(failing_shutdown_factory(&recorder, StageKind::Select));
    let pipeline_id = 21;

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select), create(StageKind::Extract)],
        )])
        .await
        .unwrap();

    let accepted = controller
        .process(&[TaskAssignment::shutdown_pipeline(pipeline_id)])
        .await
        .unwrap();

    assert!(accepted);
    assert!(controller.running_pipelines().is_empty());

    // Both stages received shutdown despite the first one failing.
    assert_eq!(
        recorder
            .latest(pipeline_id, StageKind::Select)
            .unwrap()
            .shutdowns(),
        1
    );
    assert_eq!(
        recorder
            .latest(pipeline_id, StageKind::Extract)
            .unwrap()
            .shutdowns(),
        1
    );
    assert_eq!(
        services.arbitration.pipeline_tooling_releases(),
        vec![pipeline_id]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn activation_resource_release_failure_propagates() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) = controller_with(mock_factory(&recorder));
    services.connection_pools.fail.store(true, Ordering::Release);

    let err = controller
        .process(&[TaskAssignment::update(4, [create(StageKind::Select)])])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResourceReleaseFailed);
    assert!(controller.running_pipelines().is_empty());
    assert_eq!(recorder.created_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn teardown_resource_release_failure_is_isolated() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 13;

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select)],
        )])
        .await
        .unwrap();

    services.connection_pools.fail.store(true, Ordering::Release);

    let accepted = controller
        .process(&[TaskAssignment::shutdown_pipeline(pipeline_id)])
        .await
        .unwrap();

    assert!(accepted);
    assert!(controller.running_pipelines().is_empty());
    assert_eq!(
        recorder
            .latest(pipeline_id, StageKind::Select)
            .unwrap()
            .shutdowns(),
        1
    );
    // The failing release was still attempted, and the arbitration release
    // after it still ran.
    assert_eq!(
        services.connection_pools.releases(),
        vec![pipeline_id, pipeline_id]
    );
    assert_eq!(
        services.arbitration.pipeline_tooling_releases(),
        vec![pipeline_id]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_directive_lists_fail_with_typed_error() {
    init_test_tracing();

    let (controller, _services) = controller_with(mock_factory(&StageRecorder::default()));

    let assignment = TaskAssignment {
        pipeline_id: 6,
        stages: vec![StageKind::Select],
        directives: vec![],
        shutdown: false,
    };

    let err = controller.process(&[assignment]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAssignment);
    assert!(controller.running_pipelines().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn node_start_registers_node_and_listener() {
    init_test_tracing();

    let (controller, services) = controller_with(mock_factory(&StageRecorder::default()));

    controller.start().await.unwrap();

    assert_eq!(services.arbitration.inited().len(), 1);
    assert!(services.coordination.has_listener());
    assert!(services.transport.listener().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn node_start_fails_without_identity() {
    init_test_tracing();

    let mut config = node_config();
    config.id = None;

    let services = TestServices::new();
    let controller = NodeController::new(
        config,
        mock_factory(&StageRecorder::default()),
        services.services(),
    );

    let err = controller.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NodeIdentityUnset);
    assert!(services.arbitration.inited().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn node_start_fails_for_foreign_address() {
    init_test_tracing();

    let mut config = node_config();
    // TEST-NET-3 address, guaranteed not to be a local interface.
    config.host = "203.0.113.7".parse().unwrap();

    let services = TestServices::new();
    let controller = NodeController::new(
        config,
        mock_factory(&StageRecorder::default()),
        services.services(),
    );

    let err = controller.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NodeAddressMismatch);
    assert!(services.arbitration.inited().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn session_expiry_reregisters_node() {
    init_test_tracing();

    let (controller, services) = controller_with(mock_factory(&StageRecorder::default()));
    controller.start().await.unwrap();
    assert_eq!(services.arbitration.inited().len(), 1);

    services.coordination.expire_session();

    for _ in 0..100 {
        if services.arbitration.inited().len() == 2 {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("node was not re-registered after session expiry");
}

#[tokio::test(flavor = "multi_thread")]
async fn node_stop_attempts_every_step_despite_failures() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 17;

    controller.start().await.unwrap();
    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select)],
        )])
        .await
        .unwrap();

    services.arbitration.fail_destroy.store(true, Ordering::Release);
    services.transport.fail_stop.store(true, Ordering::Release);

    controller.stop().await;

    assert_eq!(
        recorder
            .latest(pipeline_id, StageKind::Select)
            .unwrap()
            .shutdowns(),
        1
    );
    assert!(controller.running_pipelines().is_empty());

    // Every step was attempted even though two of them failed.
    assert_eq!(services.arbitration.destroyed().len(), 1);
    assert_eq!(services.arbitration.tooling_releases(), 1);
    assert_eq!(services.transport.stop_calls(), 1);
    assert_eq!(services.coordination.shutdowns(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn monitoring_reports_absences_without_creating_entries() {
    init_test_tracing();

    let (controller, _services) = controller_with(mock_factory(&StageRecorder::default()));
    let pipeline_id = random();

    assert!(!controller.is_stage_running(pipeline_id, StageKind::Select));
    assert_eq!(
        controller.pending_work(pipeline_id, StageKind::Select),
        "stage select is not running on this node"
    );
    // The queries above must not have fabricated a registry entry.
    assert_eq!(controller.running_pipeline_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn monitoring_surface_reports_system_pool_and_profiling() {
    init_test_tracing();

    let (controller, services) = controller_with(mock_factory(&StageRecorder::default()));

    let memory = controller.heap_memory_usage().unwrap();
    assert!(memory.contains("used_bytes"));

    let summary = controller.node_system_summary();
    assert!(summary.contains("cores"));

    assert!(!controller.node_version().is_empty());

    assert_eq!(controller.worker_pool_size(), 4);
    controller.set_worker_pool_size(8);
    assert_eq!(controller.worker_pool_size(), 8);

    assert!(!controller.profiling());
    controller.set_profiling(true);
    assert!(controller.profiling());
    assert!(services.collector.profiling());

    let histogram = controller.stage_aggregation(1, StageKind::Select);
    assert!(histogram.contains("stage:select"));
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_slots_are_held_while_stages_run() {
    init_test_tracing();

    let recorder = StageRecorder::default();
    let (controller, _services) = controller_with(mock_factory(&recorder));
    let pipeline_id = 19;

    assert_eq!(controller.worker_active_count(), 0);

    controller
        .process(&[TaskAssignment::update(
            pipeline_id,
            [create(StageKind::Select), create(StageKind::Extract)],
        )])
        .await
        .unwrap();
    assert_eq!(controller.worker_active_count(), 2);

    controller
        .process(&[TaskAssignment::shutdown_pipeline(pipeline_id)])
        .await
        .unwrap();
    assert_eq!(controller.worker_active_count(), 0);
}
