use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use sheetmirror::storage::MemorySnapshotStore;
use sheetmirror::testing::FakeRemoteStore;
use sheetmirror::{CycleOutcome, MutationOutcome, SkipReason, SyncConfig, SyncEngine};
use sheetmirror_api::{
    Change, Collection, CollectionState, Fields, MirrorEvent, Notification, Record, SyncError,
    Value,
};
use sheetmirror_core::ManualClock;

struct World {
    fake: Arc<FakeRemoteStore>,
    clock: ManualClock,
    snapshots: Arc<MemorySnapshotStore>,
    engine: SyncEngine,
}

fn world(fake: FakeRemoteStore) -> Result<World> {
    let fake = Arc::new(fake);
    let clock = ManualClock::default();
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let engine = SyncEngine::new(
        fake.clone(),
        snapshots.clone(),
        Arc::new(clock.clone()),
        SyncConfig::default(),
    )?;
    Ok(World {
        fake,
        clock,
        snapshots,
        engine,
    })
}

fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

fn client(id: &str, name: &str) -> Record {
    Record::new()
        .with_field("ID_Cliente", id)
        .with_field("Nombre_Cliente", name)
}

#[tokio::test(start_paused = true)]
async fn test_create_on_empty_clients_gets_server_id() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.issue_id("42");
    w.engine.reconciler().initial_load().await;
    let mirror = w.engine.mirror();
    assert!(mirror.get(Collection::Clients).is_empty());

    let pending = w
        .engine
        .coordinator()
        .create(Collection::Clients, fields(&[("Nombre_Cliente", "ACME")]))?;

    let optimistic = mirror.get(Collection::Clients);
    assert_eq!(optimistic.len(), 1);
    let temp_id = optimistic[0].id("ID_Cliente").unwrap();
    assert!(temp_id.starts_with("temp_"));
    assert_eq!(temp_id, pending.token());

    assert_eq!(
        pending.outcome().await,
        MutationOutcome::Confirmed {
            id: Some("42".to_string())
        }
    );
    let settled = mirror.get(Collection::Clients);
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].id("ID_Cliente").as_deref(), Some("42"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_update_to_taken_name_is_rejected() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(
        Collection::Clients,
        vec![client("41", "ACME"), client("42", "GLOBEX")],
    );
    w.engine.reconciler().initial_load().await;
    let before = w.engine.mirror().get(Collection::Clients);

    let err = w
        .engine
        .coordinator()
        .update(Collection::Clients, "42", fields(&[("Nombre_Cliente", "acme")]))
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation { .. }));
    assert_eq!(w.engine.mirror().get(Collection::Clients), before);
    assert!(w.fake.mutations().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cycle_within_cooldown_is_skipped() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(Collection::Clients, vec![client("1", "ACME")]);
    w.engine.reconciler().initial_load().await;

    w.engine.context().record_write();
    w.clock.advance(5_000);
    w.fake.seed(Collection::Clients, vec![client("1", "CHANGED")]);

    let outcome = w.engine.reconciler().run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::Cooldown { .. })
    ));
    assert_eq!(
        w.engine.mirror().get(Collection::Clients),
        vec![client("1", "ACME")]
    );

    w.clock.advance(10_000);
    assert_eq!(
        w.engine.reconciler().run_cycle().await,
        CycleOutcome::Applied(vec![Collection::Clients])
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_three_failed_reads_degrade_to_empty() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(Collection::Brands, vec![Record::new().with_field("ID_Marca", "1")]);
    w.fake.fail_reads(
        Collection::Brands,
        3,
        SyncError::Network {
            message: "connection reset".into(),
        },
    );

    let loaded = w.engine.reconciler().initial_load().await;

    assert!(loaded.contains(&Collection::Brands));
    assert!(w.engine.mirror().get(Collection::Brands).is_empty());
    assert_eq!(w.fake.read_count(Collection::Brands), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_write_during_fetch_is_not_overwritten() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(Collection::Clients, vec![client("1", "ACME")]);
    w.engine.reconciler().initial_load().await;

    // Reads take 10s, so a write can start while a cycle is fetching
    w.fake.delay_reads(Duration::from_secs(10));
    w.fake.hold_mutations();
    let reconciler = Arc::clone(w.engine.reconciler());
    let cycle = tokio::spawn(async move { reconciler.run_cycle().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let pending = w
        .engine
        .coordinator()
        .create(Collection::Clients, fields(&[("Nombre_Cliente", "GLOBEX")]))?;

    let outcome = cycle.await?;
    assert!(matches!(outcome, CycleOutcome::Skipped(_)));
    assert_eq!(w.engine.mirror().len(Collection::Clients), 2);
    assert_eq!(
        w.engine
            .mirror()
            .state(Collection::Clients, w.engine.context()),
        CollectionState::StalePendingWrites
    );

    w.fake.release_mutations();
    pending.outcome().await;
    assert_eq!(
        w.engine
            .mirror()
            .state(Collection::Clients, w.engine.context()),
        CollectionState::Populated
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_create_before_initial_load_survives_it() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.hold_mutations();

    let pending = w
        .engine
        .coordinator()
        .create(Collection::Clients, fields(&[("Nombre_Cliente", "acme")]))?;
    let token = pending.token().to_string();

    let loaded = w.engine.reconciler().initial_load().await;
    assert!(!loaded.contains(&Collection::Clients));
    assert!(w.engine.mirror().find(Collection::Clients, &token).is_some());
    assert_eq!(w.engine.context().in_flight(), 1);

    w.fake.release_mutations();
    assert_eq!(
        pending.outcome().await,
        MutationOutcome::Confirmed {
            id: Some("1".to_string())
        }
    );
    let clients = w.engine.mirror().get(Collection::Clients);
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id("ID_Cliente").as_deref(), Some("1"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_writes_keep_reconciler_suppressed() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(
        Collection::Clients,
        vec![client("1", "A"), client("2", "B")],
    );
    w.engine.reconciler().initial_load().await;
    w.fake.hold_mutations();

    let first = w.engine.coordinator().delete(Collection::Clients, "1")?;
    let second = w
        .engine
        .coordinator()
        .update(Collection::Clients, "2", fields(&[("Estado", "Inactivo")]))?;
    assert_eq!(w.engine.context().in_flight(), 2);

    w.clock.advance(60_000);
    assert!(matches!(
        w.engine.reconciler().run_cycle().await,
        CycleOutcome::Skipped(SkipReason::Operating { in_flight: 2 })
    ));

    w.fake.release_mutations();
    assert!(first.outcome().await.is_confirmed());
    assert!(second.outcome().await.is_confirmed());
    w.engine.context().wait_idle().await;

    w.clock.advance(15_000);
    let outcome = w.engine.reconciler().run_cycle().await;
    assert!(!matches!(outcome, CycleOutcome::Skipped(_)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_delete_is_rolled_back_and_reported() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(
        Collection::Deliverables,
        vec![
            Record::new()
                .with_field("ID_Entregable", "10")
                .with_field("Nombre_Entregable", "Reporte"),
            Record::new()
                .with_field("ID_Entregable", "11")
                .with_field("Nombre_Entregable", "Dashboard"),
        ],
    );
    w.engine.reconciler().initial_load().await;
    let before = w.engine.mirror().get(Collection::Deliverables);
    let mut notifications = w.engine.notifier().subscribe();
    w.fake.reject_next_mutation("row is protected");

    let outcome = w
        .engine
        .coordinator()
        .delete(Collection::Deliverables, "10")?
        .outcome()
        .await;

    assert_eq!(
        outcome,
        MutationOutcome::RolledBack {
            error: SyncError::remote("row is protected")
        }
    );
    assert_eq!(w.engine.mirror().get(Collection::Deliverables), before);

    let mut seen = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        seen.push(notification);
    }
    assert!(seen.iter().any(|n| matches!(n, Notification::Error(_))));
    assert_eq!(seen.last(), Some(&Notification::SyncCleared));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_optimistic_then_remote_order() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.engine.reconciler().initial_load().await;
    let mut events = w.engine.mirror().subscribe();

    let pending = w
        .engine
        .coordinator()
        .create(Collection::Users, fields(&[("Nombre_Usuario", "Ana")]))?;
    let token = pending.token().to_string();
    pending.outcome().await;

    let first = events.recv().await?;
    assert!(matches!(
        first,
        MirrorEvent::Changed {
            collection: Collection::Users,
            change: Change::Created { ref origin, .. },
        } if origin.correlation() == Some(token.as_str())
    ));
    let second = events.recv().await?;
    assert!(matches!(
        second,
        MirrorEvent::Changed {
            change: Change::Updated { ref id, .. },
            ..
        } if *id == token
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_restart_warms_from_snapshots() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    w.fake.seed(Collection::Clients, vec![client("1", "ACME")]);
    w.engine.reconciler().initial_load().await;
    assert!(w.snapshots.keys().contains(&"clients".to_string()));
    assert!(!w.snapshots.keys().contains(&"users".to_string()));

    let offline = Arc::new(FakeRemoteStore::new());
    let restarted = SyncEngine::new(
        offline,
        w.snapshots.clone(),
        Arc::new(w.clock.clone()),
        SyncConfig::default(),
    )?;
    let restored = restarted.reconciler().warm_start().await;

    assert_eq!(
        restored,
        vec![
            Collection::Clients,
            Collection::Brands,
            Collection::Deliverables
        ]
    );
    assert_eq!(
        restarted.mirror().get(Collection::Clients),
        vec![client("1", "ACME")]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_engine_start_runs_periodic_sync() -> Result<()> {
    let w = world(FakeRemoteStore::new())?;
    let handle = w.engine.start().await;
    assert!(w.engine.mirror().is_loaded(Collection::Alerts));

    w.fake.seed(
        Collection::Alerts,
        vec![Record::new()
            .with_field("ID_Alerta", "1")
            .with_field("Estado", "Pendiente")],
    );
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(w.engine.mirror().len(Collection::Alerts), 1);

    handle.shutdown().await;
    Ok(())
}
