//! Stores the state of a greeter grain in memory, then reads it back.

use granary::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Entity)]
struct Greeter {
    #[property(key)]
    id: Uuid,
    greeting: String,
    times_greeted: i64,
    #[property(row_version)]
    version: Vec<u8>,
}

#[derive(Grain)]
#[grain(state = Greeter, key = "guid", name = "GreeterGrain")]
struct GreeterGrain;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let model = Model::builder("HelloContext")
        .entity_set::<Greeter>("greeters")
        .build()?;
    let storage = EntityGrainStorage::builder(InMemoryContextFactory::new(model))
        .configure_grain::<GreeterGrain>(|options| {
            options
                .configure_is_persisted(|greeter: &Greeter| greeter.times_greeted > 0)
                .use_etag()
        })
        .build();

    let id = Uuid::new_v4();
    let grain_ref = GrainReference::of::<GreeterGrain>(GrainKey::Guid(id));
    let mut slot = GrainState::new(Greeter {
        id,
        greeting: "Hello".to_string(),
        ..Greeter::default()
    });

    for _ in 0..3 {
        storage
            .write_state("GreeterGrain", &grain_ref, &mut slot)
            .await?;
        println!("Wrote {:?} with etag {:?}", slot.state.greeting, slot.etag);
        slot.state.times_greeted += 1;
    }

    let mut loaded = GrainState::<Greeter>::default();
    storage
        .read_state("GreeterGrain", &grain_ref, &mut loaded)
        .await?;
    println!(
        "Read back: {} (greeted {} times, etag {:?})",
        loaded.state.greeting, loaded.state.times_greeted, loaded.etag
    );

    storage
        .clear_state("GreeterGrain", &grain_ref, &mut loaded)
        .await?;
    println!("Cleared; record exists: {}", loaded.record_exists);
    Ok(())
}
