//! Filters and sort orders evaluated against entities.
//!
//! The same filter is evaluated locally (to decide what an observer shows)
//! and by remote test doubles, so evaluation must be deterministic.

use crate::{Entity, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A predicate over entities.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Filter {
    /// Matches everything
    #[default]
    All,
    Eq {
        field: String,
        value: Value,
    },
    Ne {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    /// Array attribute or relationship contains the value
    Contains {
        field: String,
        value: Value,
    },
    Greater {
        field: String,
        value: Value,
    },
    Less {
        field: String,
        value: Value,
    },
    Exists {
        field: String,
    },
    IdEq {
        id: EntityId,
    },
    And {
        filters: Vec<Filter>,
    },
    Or {
        filters: Vec<Filter>,
    },
    Not {
        filter: Box<Filter>,
    },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn id_eq(id: impl Into<EntityId>) -> Self {
        Filter::IdEq { id: id.into() }
    }

    /// Conjunction with another filter. `All` is the identity.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, other) => other,
            (this, Filter::All) => this,
            (Filter::And { mut filters }, other) => {
                filters.push(other);
                Filter::And { filters }
            }
            (this, other) => Filter::And {
                filters: vec![this, other],
            },
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or { mut filters } => {
                filters.push(other);
                Filter::Or { filters }
            }
            this => Filter::Or {
                filters: vec![this, other],
            },
        }
    }

    /// Evaluate the filter against an entity.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => entity.field(field).as_ref() == Some(value),
            Filter::Ne { field, value } => entity.field(field).as_ref() != Some(value),
            Filter::In { field, values } => entity
                .field(field)
                .map(|v| values.contains(&v))
                .unwrap_or(false),
            Filter::Contains { field, value } => contains(entity, field, value),
            Filter::Greater { field, value } => entity
                .field(field)
                .map(|v| comparable(&v, value) && compare_values(&v, value) == Ordering::Greater)
                .unwrap_or(false),
            Filter::Less { field, value } => entity
                .field(field)
                .map(|v| comparable(&v, value) && compare_values(&v, value) == Ordering::Less)
                .unwrap_or(false),
            Filter::Exists { field } => {
                entity.field(field).is_some_and(|v| !v.is_null())
                    || entity.relationships.contains_key(field)
            }
            Filter::IdEq { id } => entity.id == *id,
            Filter::And { filters } => filters.iter().all(|f| f.matches(entity)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(entity)),
            Filter::Not { filter } => !filter.matches(entity),
        }
    }
}

fn contains(entity: &Entity, field: &str, value: &Value) -> bool {
    if let Some(Value::Array(items)) = entity.attributes.get(field) {
        if items.contains(value) {
            return true;
        }
    }
    match (entity.relationships.get(field), value.as_str()) {
        (Some(ids), Some(id)) => ids.contains(id),
        _ => false,
    }
}

/// Canonical form, used to derive query identity.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "all"),
            Filter::Eq { field, value } => write!(f, "eq({field},{value})"),
            Filter::Ne { field, value } => write!(f, "ne({field},{value})"),
            Filter::In { field, values } => {
                write!(f, "in({field},[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "])")
            }
            Filter::Contains { field, value } => write!(f, "contains({field},{value})"),
            Filter::Greater { field, value } => write!(f, "gt({field},{value})"),
            Filter::Less { field, value } => write!(f, "lt({field},{value})"),
            Filter::Exists { field } => write!(f, "exists({field})"),
            Filter::IdEq { id } => write!(f, "id({id:?})"),
            Filter::And { filters } => write_list(f, "and", filters),
            Filter::Or { filters } => write_list(f, "or", filters),
            Filter::Not { filter } => write!(f, "not({filter})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, filters: &[Filter]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{filter}")?;
    }
    write!(f, ")")
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One component of a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "+{}", self.field),
            Direction::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// Compare two entities under a sort order. Ties are broken by id so the
/// order is total.
pub fn compare_entities(a: &Entity, b: &Entity, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let left = a.field(&key.field).unwrap_or(Value::Null);
        let right = b.field(&key.field).unwrap_or(Value::Null);
        let ordering = match key.direction {
            Direction::Asc => compare_values(&left, &right),
            Direction::Desc => compare_values(&right, &left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}

/// Total order over JSON values: null < bool < number < string < array <
/// object. Arrays and objects compare by their JSON text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityPayload;
    use serde_json::json;

    fn channel(id: &str, attrs: Value) -> Entity {
        Entity::from_payload("channels", EntityPayload::new(id, attrs), 1000)
    }

    #[test]
    fn eq_and_ne() {
        let c = channel("c1", json!({"type": "messaging"}));
        assert!(Filter::eq("type", "messaging").matches(&c));
        assert!(!Filter::eq("type", "livestream").matches(&c));
        assert!(Filter::Ne {
            field: "type".into(),
            value: json!("livestream")
        }
        .matches(&c));
    }

    #[test]
    fn contains_checks_arrays_and_relationships() {
        let c = channel("c1", json!({"tags": ["a", "b"]}));
        assert!(Filter::contains("tags", "a").matches(&c));
        assert!(!Filter::contains("tags", "z").matches(&c));

        let payload = EntityPayload::new("c2", json!({})).with_relationship("members", ["u1"]);
        let c2 = Entity::from_payload("channels", payload, 1000);
        assert!(Filter::contains("members", "u1").matches(&c2));
        assert!(!Filter::contains("members", "u2").matches(&c2));
    }

    #[test]
    fn range_only_compares_like_types() {
        let c = channel("c1", json!({"count": 5, "name": "m"}));
        let gt = |field: &str, value: Value| Filter::Greater {
            field: field.into(),
            value,
        };
        assert!(gt("count", json!(4)).matches(&c));
        assert!(!gt("count", json!(5)).matches(&c));
        assert!(!gt("count", json!("4")).matches(&c));
        assert!(gt("name", json!("a")).matches(&c));
        assert!(Filter::Less {
            field: "count".into(),
            value: json!(10.5)
        }
        .matches(&c));
    }

    #[test]
    fn combinators() {
        let c = channel("c1", json!({"type": "messaging", "frozen": false}));
        let f = Filter::eq("type", "messaging").and(Filter::eq("frozen", false));
        assert!(f.matches(&c));
        assert!(f.clone().and(Filter::id_eq("c1")).matches(&c));
        assert!(!f.and(Filter::id_eq("c2")).matches(&c));

        let either = Filter::eq("type", "team").or(Filter::id_eq("c1"));
        assert!(either.matches(&c));
        assert!(!Filter::Not {
            filter: Box::new(either)
        }
        .matches(&c));
    }

    #[test]
    fn and_with_all_is_identity() {
        let f = Filter::All.and(Filter::id_eq("x"));
        assert_eq!(f, Filter::id_eq("x"));
        let g = Filter::id_eq("x").and(Filter::All);
        assert_eq!(g, Filter::id_eq("x"));
    }

    #[test]
    fn canonical_display() {
        let f = Filter::eq("type", "messaging").and(Filter::In {
            field: "cid".into(),
            values: vec![json!(1), json!(2)],
        });
        assert_eq!(f.to_string(), r#"and(eq(type,"messaging"),in(cid,[1,2]))"#);
        assert_eq!(SortKey::desc("last_message_at").to_string(), "-last_message_at");
    }

    #[test]
    fn sort_is_total() {
        let a = channel("a", json!({"rank": 2}));
        let b = channel("b", json!({"rank": 1}));
        let c = channel("c", json!({"rank": 2}));
        let d = channel("d", json!({}));

        let mut items = vec![a, b, c, d];
        items.sort_by(|x, y| compare_entities(x, y, &[SortKey::desc("rank")]));
        let ids: Vec<_> = items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]);

        items.sort_by(|x, y| compare_entities(x, y, &[SortKey::asc("rank")]));
        let ids: Vec<_> = items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn filter_json_shape() {
        let f: Filter =
            serde_json::from_str(r#"{"op":"contains","field":"members","value":"u1"}"#).unwrap();
        assert_eq!(f, Filter::contains("members", "u1"));
    }
}
