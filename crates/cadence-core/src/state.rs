//! Declarative state for atomic models.
//!
//! A [`StateSchema`] describes the named fields of a model's state: each
//! field carries a default value or a computed initializer that may read
//! previously declared fields. Instantiating a schema produces a
//! [`StateValue`], an ordered `field -> value` record that serializes as a
//! plain map.
//!
//! Every schema owns a fresh [`StateTypeId`]; a [`StateSlot`] bound to one
//! schema rejects values of any other identity, including a parent schema's
//! values in a slot built from an extension of it.

use crate::id::Name;
use crate::message::Value;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Errors from state construction and assignment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The assigned value was built from a different schema.
    #[error("state `{actual}` cannot be assigned to a slot expecting `{expected}`")]
    Mismatch { expected: Name, actual: Name },

    #[error("state `{state}` has no field named `{field}`")]
    UnknownField { state: Name, field: Name },
}

/// Identity of a state schema. Allocated once per schema; extension
/// produces a fresh identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateTypeId(u64);

static NEXT_STATE_TYPE: AtomicU64 = AtomicU64::new(1);

impl StateTypeId {
    fn next() -> StateTypeId {
        StateTypeId(NEXT_STATE_TYPE.fetch_add(1, Ordering::Relaxed))
    }
}

/// How a field obtains its initial value.
#[derive(Clone)]
enum FieldInit {
    Default(Value),
    /// Lazy block evaluated against the partially built state, so it can
    /// depend on fields declared before it.
    Computed(Rc<dyn Fn(&StateValue) -> Value>),
}

impl std::fmt::Debug for FieldInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldInit::Default(v) => write!(f, "Default({v:?})"),
            FieldInit::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: Name,
    init: FieldInit,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// An ordered field layout with defaults, built incrementally.
#[derive(Debug, Clone)]
pub struct StateSchema {
    name: Name,
    type_id: StateTypeId,
    parent: Option<StateTypeId>,
    fields: Vec<FieldDef>,
}

impl StateSchema {
    pub fn new(name: impl Into<Name>) -> StateSchema {
        StateSchema {
            name: name.into(),
            type_id: StateTypeId::next(),
            parent: None,
            fields: Vec::new(),
        }
    }

    /// A schema inheriting all of `parent`'s fields under a fresh identity.
    pub fn extend(parent: &StateSchema, name: impl Into<Name>) -> StateSchema {
        StateSchema {
            name: name.into(),
            type_id: StateTypeId::next(),
            parent: Some(parent.type_id),
            fields: parent.fields.clone(),
        }
    }

    /// Declare a field with a default value.
    pub fn field(mut self, name: impl Into<Name>, default: impl Into<Value>) -> StateSchema {
        self.fields.push(FieldDef {
            name: name.into(),
            init: FieldInit::Default(default.into()),
        });
        self
    }

    /// Declare a field whose initial value is computed from previously
    /// declared fields.
    pub fn computed(
        mut self,
        name: impl Into<Name>,
        init: impl Fn(&StateValue) -> Value + 'static,
    ) -> StateSchema {
        self.fields.push(FieldDef {
            name: name.into(),
            init: FieldInit::Computed(Rc::new(init)),
        });
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn type_id(&self) -> StateTypeId {
        self.type_id
    }

    pub fn parent_type_id(&self) -> Option<StateTypeId> {
        self.parent
    }

    /// Build an instance from the declared defaults.
    pub fn instantiate(&self) -> StateValue {
        // Infallible: no overrides to reject.
        match self.build(&[]) {
            Ok(v) => v,
            Err(_) => unreachable!("instantiation without overrides cannot fail"),
        }
    }

    /// Build an instance, replacing specific fields before dependent
    /// computed initializers run.
    pub fn instantiate_with(
        &self,
        overrides: &[(&str, Value)],
    ) -> Result<StateValue, StateError> {
        for (name, _) in overrides {
            if !self.fields.iter().any(|f| f.name == *name) {
                return Err(StateError::UnknownField {
                    state: self.name.clone(),
                    field: Name::from(*name),
                });
            }
        }
        self.build(overrides)
    }

    fn build(&self, overrides: &[(&str, Value)]) -> Result<StateValue, StateError> {
        let mut value = StateValue {
            type_id: self.type_id,
            type_name: self.name.clone(),
            fields: Vec::with_capacity(self.fields.len()),
        };
        for def in &self.fields {
            let v = if let Some((_, v)) = overrides.iter().find(|(n, _)| def.name == *n) {
                v.clone()
            } else {
                match &def.init {
                    FieldInit::Default(v) => v.clone(),
                    FieldInit::Computed(f) => f(&value),
                }
            };
            value.fields.push((def.name.clone(), v));
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// An instance of a schema: ordered named fields with the schema's
/// identity. Serializes as a `field -> value` map.
#[derive(Debug, Clone, PartialEq)]
pub struct StateValue {
    type_id: StateTypeId,
    type_name: Name,
    fields: Vec<(Name, Value)>,
}

impl StateValue {
    pub fn type_id(&self) -> StateTypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &Name {
        &self.type_name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == field)
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), StateError> {
        match self.fields.iter_mut().find(|(n, _)| n == field) {
            Some((_, v)) => {
                *v = value.into();
                Ok(())
            }
            None => Err(StateError::UnknownField {
                state: self.type_name.clone(),
                field: Name::from(field),
            }),
        }
    }

    /// Iterate fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&Name, &Value)> {
        self.fields.iter().map(|(n, v)| (n, v))
    }
}

impl Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// An owning state cell bound to one schema identity.
#[derive(Debug, Clone)]
pub struct StateSlot {
    expected: StateTypeId,
    expected_name: Name,
    value: StateValue,
}

impl StateSlot {
    /// A slot holding the schema's default instance.
    pub fn new(schema: &StateSchema) -> StateSlot {
        StateSlot {
            expected: schema.type_id,
            expected_name: schema.name.clone(),
            value: schema.instantiate(),
        }
    }

    /// Replace the held state. The value must come from exactly the bound
    /// schema; neither a parent's nor an extension's instances fit.
    pub fn assign(&mut self, value: StateValue) -> Result<(), StateError> {
        if value.type_id != self.expected {
            return Err(StateError::Mismatch {
                expected: self.expected_name.clone(),
                actual: value.type_name,
            });
        }
        self.value = value;
        Ok(())
    }

    pub fn get(&self) -> &StateValue {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut StateValue {
        &mut self.value
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn job_schema() -> StateSchema {
        StateSchema::new("JobState")
            .field("count", 0i64)
            .field("rate", 2.5f64)
            .computed("quota", |s| {
                let rate = match s.get("rate") {
                    Some(Value::Float(r)) => *r,
                    _ => 0.0,
                };
                Value::Float(rate * 10.0)
            })
    }

    #[test]
    fn defaults_and_computed_fields() {
        let state = job_schema().instantiate();
        assert_eq!(state.get("count"), Some(&Value::Int(0)));
        assert_eq!(state.get("rate"), Some(&Value::Float(2.5)));
        assert_eq!(state.get("quota"), Some(&Value::Float(25.0)));
    }

    #[test]
    fn overrides_feed_dependent_initializers() {
        let state = job_schema()
            .instantiate_with(&[("rate", Value::Float(4.0))])
            .unwrap();
        assert_eq!(state.get("rate"), Some(&Value::Float(4.0)));
        assert_eq!(state.get("quota"), Some(&Value::Float(40.0)));
    }

    #[test]
    fn unknown_override_rejected() {
        let err = job_schema()
            .instantiate_with(&[("missing", Value::Int(1))])
            .unwrap_err();
        assert!(matches!(err, StateError::UnknownField { .. }));
    }

    #[test]
    fn slot_accepts_only_its_own_schema() {
        let schema = job_schema();
        let other = StateSchema::new("OtherState").field("x", 1i64);

        let mut slot = StateSlot::new(&schema);
        slot.assign(schema.instantiate()).unwrap();

        let err = slot.assign(other.instantiate()).unwrap_err();
        assert!(matches!(err, StateError::Mismatch { .. }));
    }

    #[test]
    fn extension_has_fresh_identity() {
        let parent = job_schema();
        let child = StateSchema::extend(&parent, "BurstJobState").field("burst", 3i64);

        // Child instances carry every parent field plus their own.
        let state = child.instantiate();
        assert_eq!(state.get("count"), Some(&Value::Int(0)));
        assert_eq!(state.get("burst"), Some(&Value::Int(3)));
        assert_eq!(child.parent_type_id(), Some(parent.type_id()));

        // Parent state does not fit a child slot, nor child state a parent
        // slot.
        let mut child_slot = StateSlot::new(&child);
        assert!(child_slot.assign(parent.instantiate()).is_err());
        let mut parent_slot = StateSlot::new(&parent);
        assert!(parent_slot.assign(child.instantiate()).is_err());
        child_slot.assign(child.instantiate()).unwrap();
    }

    #[test]
    fn set_updates_existing_field_only() {
        let mut state = job_schema().instantiate();
        state.set("count", 7i64).unwrap();
        assert_eq!(state.get("count"), Some(&Value::Int(7)));
        assert!(state.set("missing", 1i64).is_err());
    }

    #[test]
    fn serializes_as_field_map() {
        let state = StateSchema::new("S")
            .field("a", 1i64)
            .field("b", "x")
            .instantiate();
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"a":{"Int":1},"b":{"Str":"x"}}"#);
    }
}
