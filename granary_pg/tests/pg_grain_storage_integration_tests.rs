mod common;

use common::*;
use granary_core::context::{ContextFactory, EntityContext, Entry, EntryState};
use granary_core::error::GrainStorageError;
use granary_core::grain::{GrainKey, GrainReference, GrainState};
use granary_core::storage::GrainStorage;

#[tokio::test]
#[ignore = "needs a postgres database at DATABASE_URL"]
async fn test_write_then_read_profile() {
    let storage = storage().await;
    let mut slot = GrainState::new(Profile::random());
    let grain_ref = GrainReference::new("ProfileGrain", GrainKey::Guid(slot.state.id));

    storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap();
    assert!(slot.record_exists);

    let mut loaded = GrainState::<Profile>::default();
    storage
        .read_state("ProfileGrain", &grain_ref, &mut loaded)
        .await
        .unwrap();
    assert_eq!(loaded.state, slot.state);
    assert!(loaded.record_exists);
}

#[tokio::test]
#[ignore = "needs a postgres database at DATABASE_URL"]
async fn test_insert_then_update_profile() {
    let storage = storage().await;
    let mut slot = GrainState::new(Profile::random());
    let grain_ref = GrainReference::new("ProfileGrain", GrainKey::Guid(slot.state.id));
    storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap();

    slot.state.is_persisted = true;
    slot.state.nickname = Some("nick".to_string());
    storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap();

    let mut loaded = GrainState::<Profile>::default();
    storage
        .read_state("ProfileGrain", &grain_ref, &mut loaded)
        .await
        .unwrap();
    assert_eq!(loaded.state.nickname.as_deref(), Some("nick"));
}

#[tokio::test]
#[ignore = "needs a postgres database at DATABASE_URL"]
async fn test_duplicate_insert_is_a_context_error() {
    let storage = storage().await;
    let mut slot = GrainState::new(Profile::random());
    let grain_ref = GrainReference::new("ProfileGrain", GrainKey::Guid(slot.state.id));
    storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap();

    let err = storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GrainStorageError::Context(granary_core::context::ContextError::DuplicateKey { .. })
    ));
}

#[tokio::test]
#[ignore = "needs a postgres database at DATABASE_URL"]
async fn test_clear_is_idempotent() {
    let storage = storage().await;
    let mut slot = GrainState::new(Profile::random());
    let grain_ref = GrainReference::new("ProfileGrain", GrainKey::Guid(slot.state.id));
    storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap();

    for _ in 0..2 {
        storage
            .clear_state("ProfileGrain", &grain_ref, &mut slot)
            .await
            .unwrap();
        assert!(!slot.record_exists);
    }

    let mut loaded = GrainState::<Profile>::default();
    storage
        .read_state("ProfileGrain", &grain_ref, &mut loaded)
        .await
        .unwrap();
    assert!(!loaded.record_exists);
}

#[tokio::test]
#[ignore = "needs a postgres database at DATABASE_URL"]
async fn test_ledger_etag_round_trip_and_conflict() {
    let storage = storage().await;
    let mut slot = GrainState::new(LedgerLine::random());
    let grain_ref = GrainReference::new(
        "LedgerGrain",
        GrainKey::IntegerCompound(slot.state.account, slot.state.line.clone()),
    );
    storage
        .write_state("LedgerGrain", &grain_ref, &mut slot)
        .await
        .unwrap();
    let first_etag = slot.etag.clone();
    assert_eq!(first_etag.as_deref().map(str::len), Some(16));

    // Another writer moves the row version on.
    let mut context = storage.factory().open_scope().await.unwrap();
    let mut entry = Entry::new(LedgerLine {
        amount: 250,
        ..slot.state.clone()
    });
    entry.set_state(EntryState::Modified);
    context.save_entry(&mut entry).await.unwrap();
    drop(context);

    slot.state.is_persisted = true;
    slot.state.amount = 50;
    let err = storage
        .write_state("LedgerGrain", &grain_ref, &mut slot)
        .await
        .unwrap_err();
    match err {
        GrainStorageError::EtagConflict {
            stored_etag,
            supplied_etag,
            ..
        } => {
            assert_eq!(supplied_etag, first_etag);
            assert_ne!(stored_etag, first_etag);
            assert!(stored_etag.is_some());
        }
        other => panic!("expected an etag conflict, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "needs a postgres database at DATABASE_URL"]
async fn test_update_of_missing_row_without_etag() {
    let storage = storage().await;
    let mut slot = GrainState::new(Profile {
        is_persisted: true,
        ..Profile::random()
    });
    let grain_ref = GrainReference::new("ProfileGrain", GrainKey::Guid(slot.state.id));

    let err = storage
        .write_state("ProfileGrain", &grain_ref, &mut slot)
        .await
        .unwrap_err();
    assert!(matches!(err, GrainStorageError::InconsistentState { .. }));
}
