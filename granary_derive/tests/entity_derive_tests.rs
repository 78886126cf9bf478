//! Tests for the Entity and Grain derive macros.

use granary_core::entity::{Entity, PropertyValues, ValueGenerated};
use granary_core::grain::{Grain, GrainKeyShape};
use granary_core::value::{Value, ValueError, ValueKind};
use granary_derive::{Entity, Grain};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[entity(table = "profiles")]
struct Profile {
    #[property(key)]
    id: Uuid,
    display_name: String,
    nickname: Option<String>,
    #[property(row_version, column = "row_version")]
    version: Vec<u8>,
    #[property(skip)]
    greeting: Option<String>,
}

#[derive(Debug, Clone, Default, Entity)]
#[entity(name = "Ledger")]
struct LedgerLine {
    #[property(key)]
    account: i64,
    #[property(key)]
    line: String,
    #[property(concurrency_token)]
    stamp: i64,
    #[property(unreadable)]
    secret: i32,
    booked_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Grain)]
#[grain(state = Profile, key = "guid", name = "ProfileGrain")]
struct ProfileGrain;

#[derive(Grain)]
#[grain(state = LedgerLine, key = "integer_compound")]
struct LedgerGrain;

#[test]
fn describes_every_persisted_field() {
    let entity_type = Profile::entity_type();
    let names: Vec<_> = entity_type.properties().iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["id", "display_name", "nickname", "version"]);
    assert_eq!(entity_type.table(), Some("profiles"));
    assert!(entity_type.name().ends_with("::Profile"));
}

#[test]
fn maps_field_attributes_onto_descriptors() {
    let entity_type = Profile::entity_type();

    let id = entity_type.find_property("id").unwrap();
    assert!(id.key);
    assert_eq!(id.kind, ValueKind::Guid);
    assert!(!id.nullable);

    let nickname = entity_type.find_property("nickname").unwrap();
    assert_eq!(nickname.kind, ValueKind::String);
    assert!(nickname.nullable);

    let version = entity_type.find_property("version").unwrap();
    assert!(version.concurrency_token);
    assert_eq!(version.generated, ValueGenerated::OnAddOrUpdate);
    assert_eq!(version.column, "row_version");
}

#[test]
fn honors_explicit_entity_names_and_composite_keys() {
    let entity_type = LedgerLine::entity_type();
    assert_eq!(entity_type.name(), "Ledger");
    assert_eq!(entity_type.table(), None);
    let keys: Vec<_> = entity_type.key_properties().map(|p| p.name).collect();
    assert_eq!(keys, vec!["account", "line"]);

    let stamp = entity_type.find_property("stamp").unwrap();
    assert!(stamp.concurrency_token);
    assert_eq!(stamp.generated, ValueGenerated::Never);
    assert!(!entity_type.find_property("secret").unwrap().readable);
}

#[test]
fn getters_read_fields() {
    let id = Uuid::new_v4();
    let profile = Profile {
        id,
        display_name: "Ada".to_owned(),
        nickname: None,
        version: vec![0xA1, 0x0F],
        greeting: Some("hello".to_owned()),
    };
    let entity_type = Profile::entity_type();
    assert_eq!(entity_type.key_of(&profile), vec![Value::Guid(id)]);
    let values = entity_type.values_of(&profile);
    assert_eq!(values.get("nickname"), Some(&Value::Null));
    assert_eq!(values.get("version"), Some(&Value::Bytes(vec![0xA1, 0x0F])));
    assert_eq!(values.get("greeting"), None);
}

#[test]
fn materialize_rebuilds_entity_and_defaults_skipped_fields() {
    let id = Uuid::new_v4();
    let profile = Profile {
        id,
        display_name: "Ada".to_owned(),
        nickname: Some("countess".to_owned()),
        version: vec![1],
        greeting: Some("hello".to_owned()),
    };
    let values = Profile::entity_type().values_of(&profile);
    let rebuilt = Profile::materialize(values).unwrap();
    assert_eq!(
        rebuilt,
        Profile {
            greeting: None,
            ..profile
        }
    );
}

#[test]
fn materialize_reports_the_offending_property() {
    let mut values = PropertyValues::new();
    values.insert("id", Value::Int64(3));
    values.insert("display_name", Value::from("Ada"));
    values.insert("version", Value::Bytes(vec![]));
    let err = Profile::materialize(values).unwrap_err();
    match err {
        ValueError::Property { property, .. } => assert_eq!(property, "id"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn grain_derive_sets_shape_state_and_name() {
    assert_eq!(ProfileGrain::KEY_SHAPE, GrainKeyShape::Guid);
    assert_eq!(ProfileGrain::grain_type(), "ProfileGrain");
    assert_eq!(LedgerGrain::KEY_SHAPE, GrainKeyShape::IntegerCompound);
    assert!(LedgerGrain::grain_type().ends_with("LedgerGrain"));
    let state = <LedgerGrain as Grain>::State::default();
    assert_eq!(state.account, 0);
}
