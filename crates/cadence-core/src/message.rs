//! Dynamic message values and per-step input bags.
//!
//! The kernel never inspects routed values; it only clones them along
//! couplings. [`Value`] is the tagged sum carried on ports, [`Bag`] is the
//! per-model accumulation of everything delivered at one virtual time,
//! grouped by input port name in delivery order.

use crate::duration::Duration;
use crate::id::Name;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically typed message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Duration(Duration),
    List(Vec<Value>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Duration(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Duration(v) => write!(f, "{v}"),
            Value::List(vs) => {
                f.write_str("[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bag
// ---------------------------------------------------------------------------

/// Values delivered to a model's input ports at one virtual time.
///
/// Entries are grouped by port name and ordered by first delivery, so a
/// model iterating its bag observes the deterministic routing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bag {
    entries: Vec<(Name, Vec<Value>)>,
}

impl Bag {
    pub fn new() -> Bag {
        Bag::default()
    }

    /// Append a value delivered on the named input port.
    pub fn push(&mut self, port: Name, value: Value) {
        if let Some((_, values)) = self.entries.iter_mut().find(|(n, _)| *n == port) {
            values.push(value);
        } else {
            self.entries.push((port, vec![value]));
        }
    }

    /// Values delivered on one port, in delivery order. Empty when the port
    /// received nothing.
    pub fn values_on(&self, port: &str) -> &[Value] {
        self.entries
            .iter()
            .find(|(n, _)| n == port)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate `(port, values)` pairs in first-delivery order.
    pub fn ports(&self) -> impl Iterator<Item = (&Name, &[Value])> {
        self.entries.iter().map(|(n, vs)| (n, vs.as_slice()))
    }

    /// Total number of delivered values across all ports.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, vs)| vs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_groups_by_port_in_delivery_order() {
        let mut bag = Bag::new();
        bag.push(Name::from("in"), Value::from("a"));
        bag.push(Name::from("ctl"), Value::from(1i64));
        bag.push(Name::from("in"), Value::from("b"));

        assert_eq!(
            bag.values_on("in"),
            &[Value::from("a"), Value::from("b")]
        );
        assert_eq!(bag.values_on("ctl"), &[Value::from(1i64)]);
        assert_eq!(bag.values_on("absent"), &[] as &[Value]);
        assert_eq!(bag.len(), 3);

        let ports: Vec<&Name> = bag.ports().map(|(n, _)| n).collect();
        assert_eq!(ports, vec![&Name::from("in"), &Name::from("ctl")]);
    }

    #[test]
    fn bag_preserves_duplicate_values() {
        let mut bag = Bag::new();
        bag.push(Name::from("in"), Value::from("v"));
        bag.push(Name::from("in"), Value::from("v"));
        assert_eq!(bag.values_on("in").len(), 2);
    }

    #[test]
    fn bag_clear() {
        let mut bag = Bag::new();
        bag.push(Name::from("in"), Value::from(1i64));
        assert!(!bag.is_empty());
        bag.clear();
        assert!(bag.is_empty());
        assert_eq!(bag.len(), 0);
    }

    #[test]
    fn value_display() {
        let v = Value::List(vec![Value::from(1i64), Value::from("x")]);
        assert_eq!(format!("{v}"), "[1, x]");
    }
}
