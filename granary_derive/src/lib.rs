mod entity;
mod grain;

/// Derive macro for persisted entities.
///
/// Generates an implementation of `granary_core::entity::Entity` describing every named field
/// of the struct as a property. Field types must implement `granary_core::value::PropertyValue`.
///
/// # Usage
///
/// ```ignore
/// use granary_derive::Entity;
///
/// #[derive(Clone, Default, Entity)]
/// #[entity(table = "profiles")]
/// struct Profile {
///     #[property(key)]
///     id: uuid::Uuid,
///     display_name: String,
///     #[property(row_version)]
///     version: Vec<u8>,
///     #[property(skip)]
///     cached_greeting: Option<String>,
/// }
/// ```
///
/// # Field attributes
///
/// - `key`: the field is part of the primary key.
/// - `concurrency_token`: the field is compared on update and delete.
/// - `row_version`: a concurrency token the store regenerates on every write.
/// - `column = "..."`: the column the field is stored in.
/// - `unreadable`: the field is stored but cannot be used as a key, etag or flag.
/// - `skip`: the field is not persisted and is rebuilt with `Default::default()`.
///
/// # Struct attributes
///
/// - `table = "..."`: the table the entity is stored in.
/// - `name = "..."`: the entity name, by default the type path.
#[proc_macro_derive(Entity, attributes(entity, property))]
pub fn entity(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    entity::entity_impl(item)
}

/// Derive macro for grain types.
///
/// ```ignore
/// use granary_derive::Grain;
///
/// #[derive(Grain)]
/// #[grain(state = Profile, key = "guid", name = "ProfileGrain")]
/// struct ProfileGrain;
/// ```
///
/// `key` is one of `guid`, `integer`, `string`, `guid_compound` or `integer_compound`. Without a
/// `name` the grain type name is the type path.
#[proc_macro_derive(Grain, attributes(grain))]
pub fn grain(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    grain::grain_impl(item)
}
