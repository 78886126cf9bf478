//! Property lookup and accessor construction.

use crate::entity::{EntityType, PropertyDescriptor};
use crate::error::ConfigurationError;
use crate::value::{PropertyValue, Value, ValueError, ValueKind};
use std::fmt;
use std::marker::PhantomData;

/// A property resolved on an entity type.
pub struct PropertyHandle<E> {
    entity: &'static str,
    descriptor: PropertyDescriptor<E>,
}

/// Looks up `name` on `entity_type`.
///
/// Fails when the property does not exist or is not publicly readable.
pub fn resolve_property<E>(
    entity_type: &EntityType<E>,
    name: &str,
) -> Result<PropertyHandle<E>, ConfigurationError> {
    let descriptor =
        entity_type
            .find_property(name)
            .ok_or_else(|| ConfigurationError::MissingProperty {
                entity: entity_type.name(),
                property: name.to_owned(),
            })?;
    if !descriptor.readable {
        return Err(ConfigurationError::UnreadableProperty {
            entity: entity_type.name(),
            property: name.to_owned(),
        });
    }
    Ok(PropertyHandle {
        entity: entity_type.name(),
        descriptor: *descriptor,
    })
}

/// Builds a reusable getter for a resolved property.
pub fn make_getter<E>(handle: &PropertyHandle<E>) -> PropertyGetter<E> {
    PropertyGetter {
        name: handle.descriptor.name,
        get: handle.descriptor.getter,
    }
}

impl<E> PropertyHandle<E> {
    /// The entity name.
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// The property name.
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// The storage kind.
    pub fn kind(&self) -> ValueKind {
        self.descriptor.kind
    }

    /// The full property descriptor.
    pub fn descriptor(&self) -> &PropertyDescriptor<E> {
        &self.descriptor
    }

    /// Shorthand for [`make_getter`].
    pub fn getter(&self) -> PropertyGetter<E> {
        make_getter(self)
    }

    /// Builds a typed getter, checking that `T` matches the property kind.
    pub fn typed_getter<T: PropertyValue>(&self) -> Result<TypedGetter<E, T>, ConfigurationError> {
        if T::KIND != self.descriptor.kind {
            return Err(ConfigurationError::PropertyTypeMismatch {
                entity: self.entity,
                property: self.descriptor.name.to_owned(),
                expected: T::KIND,
                actual: self.descriptor.kind,
            });
        }
        Ok(TypedGetter {
            getter: self.getter(),
            _phantom: PhantomData,
        })
    }
}

impl<E> Clone for PropertyHandle<E> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity,
            descriptor: self.descriptor,
        }
    }
}

impl<E> fmt::Debug for PropertyHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyHandle")
            .field("entity", &self.entity)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Reads a single property from an entity.
pub struct PropertyGetter<E> {
    name: &'static str,
    get: fn(&E) -> Value,
}

impl<E> PropertyGetter<E> {
    /// The property name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Reads the value from `entity`.
    pub fn get(&self, entity: &E) -> Value {
        (self.get)(entity)
    }
}

impl<E> Clone for PropertyGetter<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for PropertyGetter<E> {}

impl<E> fmt::Debug for PropertyGetter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyGetter").field(&self.name).finish()
    }
}

/// A getter whose value type was checked when it was built.
pub struct TypedGetter<E, T> {
    getter: PropertyGetter<E>,
    _phantom: PhantomData<fn() -> T>,
}

impl<E, T: PropertyValue> TypedGetter<E, T> {
    /// Reads and converts the value from `entity`.
    pub fn get(&self, entity: &E) -> Result<T, ValueError> {
        T::from_value(self.getter.get(entity)).map_err(|e| e.in_property(self.getter.name))
    }
}

impl<E, T> Clone for TypedGetter<E, T> {
    fn clone(&self) -> Self {
        Self {
            getter: self.getter,
            _phantom: PhantomData,
        }
    }
}
