//! Integration tests for the dispatch engine
//!
//! Exercises the control API end to end against the scriptable in-memory
//! driver: tenant isolation, rotation fairness, idempotent distribution,
//! immediate-burst validation and timing, retry exhaustion accounting, and
//! cadence stop semantics. Paused tokio time keeps every pacing assertion
//! deterministic.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    CadenceConfig, ConnectConfig, DispatchError, DriverRegistry, EngineConfig, Priority,
    RecipientId, SlotNumber, TenantId,
};
use courier_runtime::{DispatchEngine, EngineEvent, MemoryDriver};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn test_config() -> EngineConfig {
    EngineConfig {
        slots_per_tenant: 2,
        tick_interval: Duration::from_millis(100),
        retry_backoff: Duration::from_millis(50),
        connect: ConnectConfig {
            connect_timeout: Duration::from_secs(5),
            ..ConnectConfig::default()
        },
        cadence: CadenceConfig {
            base_delay: Duration::from_millis(200),
            batch_size: 3,
            max_retries: 3,
            adaptive_mode: false,
            immediate_mode: false,
        },
        driver_order: Vec::new(),
    }
}

fn build_engine() -> (DispatchEngine, Arc<MemoryDriver>) {
    let driver = Arc::new(MemoryDriver::new("primary"));
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    (DispatchEngine::new(test_config(), registry), driver)
}

async fn connected_tenant(engine: &DispatchEngine, name: &str) -> TenantId {
    let tenant = TenantId::new(name);
    engine.init_slots(&tenant).unwrap();
    let connected = engine.connect_all_slots(&tenant).await.unwrap();
    assert_eq!(connected, 2);
    tenant
}

fn recipients(prefix: u32, n: usize) -> Vec<RecipientId> {
    (0..n)
        .map(|i| RecipientId::new(format!("55{prefix:03}9{i:07}")))
        .collect()
}

// ----------------------------------------------------------------------------
// Tenant Isolation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_operations_on_one_tenant_never_touch_another() {
    let (engine, driver) = build_engine();
    let acme = connected_tenant(&engine, "acme").await;
    let globex = connected_tenant(&engine, "globex").await;

    engine
        .distribute(&acme, &recipients(1, 4), Priority::Normal)
        .unwrap();
    engine.start_cadence(&acme).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    engine.stop_cadence(&acme).unwrap();

    let acme_stats = engine.get_stats(&acme).unwrap();
    assert_eq!(acme_stats.total_sent, 4);

    // Globex shares slot numbers with acme but none of its state moved
    let globex_stats = engine.get_stats(&globex).unwrap();
    assert_eq!(globex_stats.total_sent, 0);
    assert_eq!(globex_stats.total_errors, 0);
    assert_eq!(globex_stats.queued, 0);
    assert!(!globex_stats.cadence_active);
    for n in [1u16, 2] {
        let slot = courier_core::SlotId::new(globex.clone(), SlotNumber::new(n));
        assert_eq!(driver.sent_via(&slot), 0);
        assert_eq!(engine.slot_state(&globex, SlotNumber::new(n)).unwrap(), "Connected");
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnecting_one_tenant_slot_leaves_the_other_eligible() {
    let (engine, _driver) = build_engine();
    let acme = connected_tenant(&engine, "acme").await;
    let globex = connected_tenant(&engine, "globex").await;

    engine.disconnect_slot(&acme, SlotNumber::new(1)).await.unwrap();

    assert_eq!(engine.get_stats(&acme).unwrap().active_slots, 1);
    assert_eq!(engine.get_stats(&globex).unwrap().active_slots, 2);
}

// ----------------------------------------------------------------------------
// Distribution
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_round_robin_fairness_two_slots_five_recipients() {
    let (engine, _driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;

    engine
        .distribute(&tenant, &recipients(1, 5), Priority::Normal)
        .unwrap();

    let stats = engine.get_stats(&tenant).unwrap();
    assert_eq!(stats.queued, 5);
    // Lower-numbered slot deterministically carries the extra assignment
    assert_eq!(stats.queue_depths.get(&1), Some(&3));
    assert_eq!(stats.queue_depths.get(&2), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_distribute_is_idempotent_across_calls() {
    let (engine, _driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;
    let batch = recipients(1, 3);

    let first = engine.distribute(&tenant, &batch, Priority::Normal).unwrap();
    assert_eq!(first.created, 3);

    let second = engine.distribute(&tenant, &batch, Priority::Normal).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(engine.get_stats(&tenant).unwrap().queued, 3);

    for (a, b) in first.assignments.iter().zip(second.assignments.iter()) {
        assert_eq!(a.id, b.id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_distribute_fails_cleanly_with_no_eligible_slots() {
    let (engine, _driver) = build_engine();
    let tenant = TenantId::new("acme");
    engine.init_slots(&tenant).unwrap();

    let err = engine
        .distribute(&tenant, &recipients(1, 3), Priority::Normal)
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoEligibleSlots { .. }));
    assert_eq!(engine.get_stats(&tenant).unwrap().queued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_purges_queue_to_remaining_slot() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;

    engine
        .distribute(&tenant, &recipients(1, 4), Priority::Normal)
        .unwrap();
    engine.disconnect_slot(&tenant, SlotNumber::new(1)).await.unwrap();

    let stats = engine.get_stats(&tenant).unwrap();
    assert_eq!(stats.queued, 4);
    assert_eq!(stats.queue_depths.get(&2), Some(&4));
    assert_eq!(stats.queue_depths.get(&1), None);

    // Manual disconnect never auto-reconnects
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(engine.slot_state(&tenant, SlotNumber::new(1)).unwrap(), "Disconnected");

    // And the purged work still drains through the surviving slot
    engine.start_cadence(&tenant).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let slot2 = courier_core::SlotId::new(tenant.clone(), SlotNumber::new(2));
    assert_eq!(driver.sent_via(&slot2), 4);
}

// ----------------------------------------------------------------------------
// Immediate Activation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_immediate_with_unknown_recipient_sends_nothing() {
    let (engine, driver) = build_engine();
    connected_tenant(&engine, "acme").await;

    let err = engine
        .activate_immediate(None, &RecipientId::new("5599900000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::TenantUnresolved { .. }));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(driver.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_with_no_connected_slot_sends_nothing() {
    let (engine, driver) = build_engine();
    let tenant = TenantId::new("acme");
    engine.init_slots(&tenant).unwrap();
    let recipient = RecipientId::new("5511996612253");
    engine.register_recipient(&tenant, recipient.clone()).unwrap();

    let err = engine.activate_immediate(None, &recipient).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoActiveSlot { .. }));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(driver.sent_count(), 0);
    assert_eq!(engine.get_stats(&tenant).unwrap().total_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_with_foreign_recipient_rejected() {
    let (engine, driver) = build_engine();
    let acme = connected_tenant(&engine, "acme").await;
    let globex = connected_tenant(&engine, "globex").await;

    let recipient = RecipientId::new("5511996612253");
    engine.register_recipient(&acme, recipient.clone()).unwrap();

    let err = engine
        .activate_immediate(Some(&globex), &recipient)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::RecipientNotOwned { .. }));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(driver.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_send_starts_within_base_delay() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;
    engine
        .configure_cadence(
            &tenant,
            CadenceConfig {
                base_delay: Duration::from_millis(500),
                immediate_mode: true,
                ..CadenceConfig::default()
            },
        )
        .unwrap();

    let recipient = RecipientId::new("5511996612253");
    engine.register_recipient(&tenant, recipient.clone()).unwrap();

    let activation = engine.activate_immediate(None, &recipient).await.unwrap();
    assert_eq!(activation.tenant, tenant);

    // Nothing on the wire yet, the burst waits out the base delay
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(driver.sent_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(driver.sent_count(), 1);
    assert_eq!(driver.sent_to(&recipient).len(), 1);
    assert_eq!(engine.get_stats(&tenant).unwrap().total_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_immediate_trigger_is_a_no_op() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;
    let recipient = RecipientId::new("5511996612253");
    engine.register_recipient(&tenant, recipient.clone()).unwrap();

    let first = engine.activate_immediate(None, &recipient).await.unwrap();
    let second = engine.activate_immediate(None, &recipient).await.unwrap();
    assert_eq!(first.assignment_id, second.assignment_id);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(driver.sent_to(&recipient).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_triggers_accumulate_across_recipients() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;

    let first = RecipientId::new("5511996612253");
    let second = RecipientId::new("5531829566160");
    engine.register_recipient(&tenant, first.clone()).unwrap();
    engine.register_recipient(&tenant, second.clone()).unwrap();

    engine.activate_immediate(None, &first).await.unwrap();
    engine.activate_immediate(None, &second).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(driver.sent_to(&first).len(), 1);
    assert_eq!(driver.sent_to(&second).len(), 1);
    assert_eq!(engine.get_stats(&tenant).unwrap().total_sent, 2);
}

// ----------------------------------------------------------------------------
// Retry Exhaustion
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_exhausted_assignment_counts_one_error() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;
    let mut events = engine.subscribe(&tenant).unwrap();

    driver.set_fail_all_sends(true);
    engine
        .distribute(&tenant, &recipients(1, 1), Priority::Normal)
        .unwrap();
    engine.process_cadence(&tenant).await.unwrap();

    let stats = engine.get_stats(&tenant).unwrap();
    assert_eq!(stats.total_sent, 0);
    // One exhaustion, one error, regardless of three attempts
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.queued, 0);

    let mut exhausted = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::AssignmentExhausted { .. }) {
            exhausted += 1;
        }
    }
    assert_eq!(exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_within_budget() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;

    // Two failures, then success: within the budget of three
    driver.fail_next_sends(2);
    engine
        .distribute(&tenant, &recipients(1, 1), Priority::Normal)
        .unwrap();
    engine.process_cadence(&tenant).await.unwrap();

    let stats = engine.get_stats(&tenant).unwrap();
    assert_eq!(stats.total_sent, 1);
    assert_eq!(stats.total_errors, 0);
}

// ----------------------------------------------------------------------------
// Direct Sends
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_direct_send_uses_first_eligible_slot() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;
    let recipient = RecipientId::new("5511996612253");

    engine
        .send_direct(&tenant, &recipient, &courier_core::OutboundMessage::text("confirmed"))
        .await
        .unwrap();

    assert_eq!(driver.sent_to(&recipient), vec!["confirmed".to_string()]);
    let slot1 = courier_core::SlotId::new(tenant.clone(), SlotNumber::new(1));
    assert_eq!(driver.sent_via(&slot1), 1);
    assert_eq!(engine.get_stats(&tenant).unwrap().total_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_direct_send_exhausts_after_retry_budget() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;
    let recipient = RecipientId::new("5511996612253");

    driver.set_fail_all_sends(true);
    let err = engine
        .send_direct(&tenant, &recipient, &courier_core::OutboundMessage::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::SendExhausted { attempts: 3, .. }));
    assert_eq!(engine.get_stats(&tenant).unwrap().total_errors, 1);
}

// ----------------------------------------------------------------------------
// Cadence Stop Semantics
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_stop_mid_batch_completes_batch_and_halts() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;

    // Six queued, batch size three: only the first batch may run
    engine
        .distribute(&tenant, &recipients(1, 6), Priority::Normal)
        .unwrap();
    engine.start_cadence(&tenant).unwrap();
    assert!(engine.get_stats(&tenant).unwrap().cadence_active);

    // First tick at 100ms; sends at 100/300/500ms. Stop lands mid-batch.
    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.stop_cadence(&tenant).unwrap();
    assert!(!engine.get_stats(&tenant).unwrap().cadence_active);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let stats = engine.get_stats(&tenant).unwrap();
    assert_eq!(stats.total_sent, 3, "in-flight batch completes, no new batch starts");
    assert_eq!(stats.queued, 3, "remaining work survives the stop");
    assert_eq!(driver.sent_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_cadence_is_resumable() {
    let (engine, driver) = build_engine();
    let tenant = connected_tenant(&engine, "acme").await;

    engine
        .distribute(&tenant, &recipients(1, 6), Priority::Normal)
        .unwrap();
    engine.start_cadence(&tenant).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.stop_cadence(&tenant).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    engine.start_cadence(&tenant).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let stats = engine.get_stats(&tenant).unwrap();
    assert_eq!(stats.total_sent, 6);
    assert_eq!(stats.queued, 0);
    assert_eq!(driver.sent_count(), 6);
}

// ----------------------------------------------------------------------------
// Driver Fallback
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_engine_falls_back_to_secondary_driver() {
    let refusing = Arc::new(MemoryDriver::refusing("primary"));
    let backup = Arc::new(MemoryDriver::new("backup"));
    let mut registry = DriverRegistry::new();
    registry.register(refusing);
    registry.register(backup.clone());
    let engine = DispatchEngine::new(test_config(), registry);

    let tenant = TenantId::new("acme");
    engine.init_slots(&tenant).unwrap();
    engine.connect_slot(&tenant, SlotNumber::new(1)).await.unwrap();
    assert_eq!(engine.slot_state(&tenant, SlotNumber::new(1)).unwrap(), "Connected");

    engine
        .distribute(&tenant, &recipients(1, 1), Priority::Normal)
        .unwrap();
    engine.process_cadence(&tenant).await.unwrap();
    assert_eq!(backup.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tenant_driver_order_override() {
    let primary = Arc::new(MemoryDriver::new("primary"));
    let backup = Arc::new(MemoryDriver::new("backup"));
    let mut registry = DriverRegistry::new();
    registry.register(primary);
    registry.register(backup.clone());
    let engine = DispatchEngine::new(test_config(), registry);

    let tenant = TenantId::new("acme");
    engine.init_slots(&tenant).unwrap();
    engine
        .set_driver_order(&tenant, vec!["backup".into(), "primary".into()])
        .unwrap();
    engine.connect_slot(&tenant, SlotNumber::new(1)).await.unwrap();

    let slot = courier_core::SlotId::new(tenant.clone(), SlotNumber::new(1));
    assert!(backup.is_session_open(&slot));
}
