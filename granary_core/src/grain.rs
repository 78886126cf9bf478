//! Grain addressing and the state slot handed over by the host runtime.

use crate::error::GrainStorageError;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use uuid::Uuid;

/// The key shape a grain type is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrainKeyShape {
    /// A single uuid.
    Guid,
    /// A single 64 bit integer.
    Integer,
    /// A single string.
    String,
    /// A uuid plus a string extension.
    GuidCompound,
    /// A 64 bit integer plus a string extension.
    IntegerCompound,
}

impl GrainKeyShape {
    /// Whether the shape carries a string extension key.
    pub fn is_compound(&self) -> bool {
        matches!(self, GrainKeyShape::GuidCompound | GrainKeyShape::IntegerCompound)
    }

    /// The value kind of the primary key part.
    pub fn primary_kind(&self) -> ValueKind {
        match self {
            GrainKeyShape::Guid | GrainKeyShape::GuidCompound => ValueKind::Guid,
            GrainKeyShape::Integer | GrainKeyShape::IntegerCompound => ValueKind::Int64,
            GrainKeyShape::String => ValueKind::String,
        }
    }
}

/// A grain type whose state is persisted through grain storage.
pub trait Grain: Send + Sync + 'static {
    /// The in-memory state of the grain.
    type State: Default + Send + Sync + 'static;

    /// How grains of this type are addressed.
    const KEY_SHAPE: GrainKeyShape;

    /// The name the host runtime uses for this grain type.
    fn grain_type() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The key of a single grain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrainKey {
    /// See [`GrainKeyShape::Guid`].
    Guid(Uuid),
    /// See [`GrainKeyShape::Integer`].
    Integer(i64),
    /// See [`GrainKeyShape::String`].
    String(String),
    /// See [`GrainKeyShape::GuidCompound`].
    GuidCompound(Uuid, String),
    /// See [`GrainKeyShape::IntegerCompound`].
    IntegerCompound(i64, String),
}

impl GrainKey {
    /// The shape of this key.
    pub fn shape(&self) -> GrainKeyShape {
        match self {
            GrainKey::Guid(_) => GrainKeyShape::Guid,
            GrainKey::Integer(_) => GrainKeyShape::Integer,
            GrainKey::String(_) => GrainKeyShape::String,
            GrainKey::GuidCompound(..) => GrainKeyShape::GuidCompound,
            GrainKey::IntegerCompound(..) => GrainKeyShape::IntegerCompound,
        }
    }
}

impl fmt::Display for GrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrainKey::Guid(id) => write!(f, "{id}"),
            GrainKey::Integer(id) => write!(f, "{id}"),
            GrainKey::String(id) => f.write_str(id),
            GrainKey::GuidCompound(id, ext) => write!(f, "{id}+{ext}"),
            GrainKey::IntegerCompound(id, ext) => write!(f, "{id}+{ext}"),
        }
    }
}

/// Identifies a single grain: its type and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrainReference {
    grain_type: String,
    key: GrainKey,
}

impl GrainReference {
    /// A reference to the grain of `grain_type` with `key`.
    pub fn new(grain_type: impl Into<String>, key: GrainKey) -> Self {
        Self {
            grain_type: grain_type.into(),
            key,
        }
    }

    /// A reference to the grain of type `G` with `key`.
    pub fn of<G: Grain>(key: GrainKey) -> Self {
        Self::new(G::grain_type(), key)
    }

    /// The grain type name.
    pub fn grain_type(&self) -> &str {
        &self.grain_type
    }

    /// The key.
    pub fn key(&self) -> &GrainKey {
        &self.key
    }

    /// The uuid primary key, for uuid keyed grains.
    pub fn primary_key_guid(&self) -> Option<Uuid> {
        match &self.key {
            GrainKey::Guid(id) | GrainKey::GuidCompound(id, _) => Some(*id),
            _ => None,
        }
    }

    /// The integer primary key, for integer keyed grains.
    pub fn primary_key_integer(&self) -> Option<i64> {
        match &self.key {
            GrainKey::Integer(id) | GrainKey::IntegerCompound(id, _) => Some(*id),
            _ => None,
        }
    }

    /// The string primary key, for string keyed grains.
    pub fn primary_key_string(&self) -> Option<&str> {
        match &self.key {
            GrainKey::String(id) => Some(id),
            _ => None,
        }
    }

    /// The extension key, for compound keyed grains.
    pub fn key_ext(&self) -> Option<&str> {
        match &self.key {
            GrainKey::GuidCompound(_, ext) | GrainKey::IntegerCompound(_, ext) => Some(ext),
            _ => None,
        }
    }

    /// The key as positional values, checked against the registered `shape`.
    pub fn key_values(&self, shape: GrainKeyShape) -> Result<Vec<Value>, GrainStorageError> {
        if self.key.shape() != shape {
            return Err(GrainStorageError::KeyShapeMismatch {
                grain_type: self.grain_type.clone(),
                expected: shape,
                found: self.key.shape(),
            });
        }
        Ok(match &self.key {
            GrainKey::Guid(id) => vec![Value::Guid(*id)],
            GrainKey::Integer(id) => vec![Value::Int64(*id)],
            GrainKey::String(id) => vec![Value::String(id.clone())],
            GrainKey::GuidCompound(id, ext) => vec![Value::Guid(*id), Value::String(ext.clone())],
            GrainKey::IntegerCompound(id, ext) => {
                vec![Value::Int64(*id), Value::String(ext.clone())]
            }
        })
    }
}

impl fmt::Display for GrainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.grain_type, self.key)
    }
}

/// The mutable state container the host runtime hands to grain storage.
pub trait StateSlot: Send {
    /// The state.
    fn state(&self) -> &dyn Any;
    /// Mutable access to the state.
    fn state_mut(&mut self) -> &mut dyn Any;
    /// The name of the state type.
    fn state_type_name(&self) -> &'static str;
    /// The etag of the last read or write.
    fn etag(&self) -> Option<&str>;
    /// Replaces the etag.
    fn set_etag(&mut self, etag: Option<String>);
    /// Whether a stored row backs the state.
    fn record_exists(&self) -> bool;
    /// Sets whether a stored row backs the state.
    fn set_record_exists(&mut self, exists: bool);
}

/// The default [`StateSlot`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrainState<S> {
    /// The state.
    pub state: S,
    /// The etag of the last read or write.
    pub etag: Option<String>,
    /// Whether a stored row backs the state.
    pub record_exists: bool,
}

impl<S> GrainState<S> {
    /// A slot holding `state`, with no etag.
    pub fn new(state: S) -> Self {
        Self {
            state,
            etag: None,
            record_exists: false,
        }
    }
}

impl<S: Send + 'static> StateSlot for GrainState<S> {
    fn state(&self) -> &dyn Any {
        &self.state
    }

    fn state_mut(&mut self) -> &mut dyn Any {
        &mut self.state
    }

    fn state_type_name(&self) -> &'static str {
        std::any::type_name::<S>()
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    fn record_exists(&self) -> bool {
        self.record_exists
    }

    fn set_record_exists(&mut self, exists: bool) {
        self.record_exists = exists;
    }
}
