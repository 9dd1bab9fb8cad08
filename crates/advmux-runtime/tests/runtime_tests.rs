//! Runtime integration tests
//!
//! The scheduler runs inside its tokio task against the simulated controller.
//! Time is paused so rotation and preset fallback timers fire instantly.

use std::time::Duration;

use advmux_core::{AdvType, AdvHandle, GapFlagsItem, LocalAddressKind, StaticItem};
use advmux_runtime::{
    create_test_runtime, join_runtime, DefaultParametersTable, ItemInfo, ItemParams,
    ManagerConfig, RuntimeBuilder, RuntimeConfig, RuntimeError, RuntimeHandle,
    SimulatedController,
};
use tokio_test::{assert_err, assert_ok};

const FIRST: AdvHandle = AdvHandle::new(1);

fn create_beacon(adv_type: AdvType, size: usize) -> StaticItem {
    let mut data = vec![(size - 1) as u8, 0xFF];
    data.resize(size, size as u8);
    StaticItem::new(ItemInfo::advert(adv_type, size), data)
}

fn create_rotating_beacon() -> StaticItem {
    create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 10).with_params(
        ItemParams::default()
            .with_random_address(LocalAddressKind::GenerateResolvable, None)
            .with_rotation(480, 900),
    )
}

/// Wait for the queued work to settle and for stray confirmations to land
async fn settle(handle: &RuntimeHandle) {
    assert_ok!(handle.refresh().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_registered_item_goes_live() {
    let (handle, controller, _task) = create_test_runtime().unwrap();

    let item = handle
        .register_item(Box::new(create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 10)))
        .await
        .unwrap();
    assert!(item.is_some());
    settle(&handle).await;

    let snapshot = handle.diagnostics().await.unwrap();
    assert_eq!(snapshot.items, 1);
    assert_eq!(snapshot.sets.len(), 1);
    assert!(snapshot.sets[0].active);
    assert_eq!(snapshot.sets[0].space_used, 10);

    let names: Vec<_> = controller.sent().iter().map(|command| command.name()).collect();
    assert_eq!(names, vec!["Register", "SetParams", "SetAdvertisingData", "Enable"]);
}

#[tokio::test(start_paused = true)]
async fn test_gap_flags_join_connectable_payload() {
    let (handle, _controller, _task) = create_test_runtime().unwrap();
    assert!(handle
        .register_gap_flags(Box::new(GapFlagsItem::default()))
        .await
        .unwrap()
        .is_some());
    handle
        .register_item(Box::new(create_beacon(AdvType::LEGACY_CONNECTABLE_SCANNABLE, 10)))
        .await
        .unwrap();
    settle(&handle).await;

    let layouts = handle.set_layouts().await.unwrap();
    assert_eq!(layouts.len(), 1);
    assert_eq!(layouts[0].items.len(), 2);
    assert_eq!(handle.diagnostics().await.unwrap().sets[0].space_used, 13);
}

#[tokio::test(start_paused = true)]
async fn test_unregister_releases_set() {
    let (handle, controller, _task) = create_test_runtime().unwrap();
    let item = handle
        .register_item(Box::new(create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 10)))
        .await
        .unwrap()
        .unwrap();
    settle(&handle).await;

    assert!(handle.unregister_item(item).await.unwrap());
    assert!(!handle.unregister_item(item).await.unwrap());
    settle(&handle).await;

    assert!(handle.diagnostics().await.unwrap().sets.is_empty());
    assert_eq!(controller.count("Disable"), 1);
    assert_eq!(controller.count("Unregister"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_clients_share_one_set() {
    let (handle, controller, _task) = create_test_runtime().unwrap();

    let registrations = (0..3).map(|_| {
        let handle = handle.clone();
        async move {
            handle
                .register_item(Box::new(create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 8)))
                .await
        }
    });
    let results = futures::future::join_all(registrations).await;
    assert!(results.iter().all(|result| matches!(result, Ok(Some(_)))));
    settle(&handle).await;

    let layouts = handle.set_layouts().await.unwrap();
    assert_eq!(layouts.len(), 1);
    assert_eq!(layouts[0].items.len(), 3);
    assert_eq!(handle.diagnostics().await.unwrap().sets[0].space_used, 24);
    assert_eq!(controller.count("Register"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_address_write_is_retried() {
    let controller = SimulatedController::new(Duration::from_millis(1)).with_busy_address_writes(2);
    let (handle, _task) = RuntimeBuilder::new()
        .with_config(RuntimeConfig::testing())
        .with_controller(controller.clone())
        .build_and_start()
        .unwrap();

    handle.register_item(Box::new(create_rotating_beacon())).await.unwrap();
    settle(&handle).await;

    assert_eq!(controller.count("SetRandomAddress"), 3);
    let snapshot = handle.diagnostics().await.unwrap();
    assert!(snapshot.sets[0].active);
    assert!(snapshot.sets[0].resolved_address.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_terminated_set_is_reenabled() {
    let (handle, controller, _task) = create_test_runtime().unwrap();
    handle
        .register_item(Box::new(create_beacon(AdvType::LEGACY_CONNECTABLE_SCANNABLE, 10)))
        .await
        .unwrap();
    settle(&handle).await;

    controller.terminate(FIRST).await.unwrap();
    settle(&handle).await;

    assert_eq!(controller.count("Enable"), 2);
    assert!(handle.diagnostics().await.unwrap().sets[0].active);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_timer_changes_address() {
    let (handle, controller, _task) = create_test_runtime().unwrap();
    handle.register_item(Box::new(create_rotating_beacon())).await.unwrap();
    settle(&handle).await;
    let first = handle.diagnostics().await.unwrap().sets[0].resolved_address;
    assert!(first.is_some());

    tokio::time::sleep(Duration::from_secs(901)).await;
    settle(&handle).await;

    assert_eq!(controller.count("SetRandomAddress"), 2);
    let snapshot = handle.diagnostics().await.unwrap();
    assert!(snapshot.sets[0].active);
    assert_ne!(snapshot.sets[0].resolved_address, first);
}

#[tokio::test(start_paused = true)]
async fn test_fast_preset_falls_back_to_slow() {
    let (handle, _controller, _task) = create_test_runtime().unwrap();
    handle
        .register_default_parameters(DefaultParametersTable::standard())
        .await
        .unwrap();
    handle
        .register_item(Box::new(create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 10)))
        .await
        .unwrap();
    settle(&handle).await;
    assert_eq!(handle.diagnostics().await.unwrap().sets[0].min_interval, 160);

    assert!(handle.select_default_preset(0).await.unwrap());
    assert!(!handle.select_default_preset(7).await.unwrap());
    settle(&handle).await;
    assert_eq!(handle.diagnostics().await.unwrap().sets[0].min_interval, 48);

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle(&handle).await;
    let set = &handle.diagnostics().await.unwrap().sets[0];
    assert_eq!(set.min_interval, 1600);
    assert_eq!(set.max_interval, 2000);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_default_table_is_rejected() {
    let (handle, _controller, _task) = create_test_runtime().unwrap();
    let mut table = DefaultParametersTable::standard();
    table.slow_preset = 9;

    let result = handle.register_default_parameters(table).await;
    assert!(matches!(result, Err(RuntimeError::Core(_))));
}

#[tokio::test(start_paused = true)]
async fn test_advertising_switch_stops_and_restarts() {
    let (handle, controller, _task) = create_test_runtime().unwrap();
    handle
        .register_item(Box::new(create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 10)))
        .await
        .unwrap();
    settle(&handle).await;

    handle.allow_advertising(false).await.unwrap();
    settle(&handle).await;
    assert!(handle.diagnostics().await.unwrap().sets.iter().all(|set| !set.active));

    handle.allow_advertising(true).await.unwrap();
    settle(&handle).await;
    assert!(handle.diagnostics().await.unwrap().sets[0].active);
    assert!(controller.count("Enable") >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_single_set_controller_overflow() {
    let controller = SimulatedController::new(Duration::from_millis(1));
    let (handle, _task) = RuntimeBuilder::new()
        .with_manager_config(ManagerConfig::constrained())
        .with_controller(controller)
        .build_and_start()
        .unwrap();

    for _ in 0..2 {
        handle
            .register_item(Box::new(create_beacon(AdvType::LEGACY_NON_CONNECTABLE, 20)))
            .await
            .unwrap();
    }
    settle(&handle).await;

    let snapshot = handle.diagnostics().await.unwrap();
    assert_eq!(snapshot.supported_sets, 1);
    assert_eq!(snapshot.sets.len(), 1);
    assert_eq!(snapshot.items, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_handle() {
    let (handle, _controller, task) = create_test_runtime().unwrap();
    assert_ok!(handle.shutdown().await);
    assert_ok!(join_runtime(task).await);

    let result = handle.diagnostics().await;
    assert!(matches!(result, Err(RuntimeError::ChannelClosed { .. })));
    assert_err!(handle.refresh().await);
}
