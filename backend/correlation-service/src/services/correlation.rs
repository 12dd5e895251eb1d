//! Correlation cache for the customer and inventory streams.
//!
//! Holds the latest record per entity id for each stream and builds the merged
//! snapshot sent to analytics. The merge trigger is deliberately coarse: one
//! record of each kind is enough, ids are not matched across kinds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// The two entity kinds carried by the input streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Customer,
    Inventory,
}

impl EntityKind {
    /// Kind-specific field emitted next to `name`
    pub fn detail_field(&self) -> &'static str {
        match self {
            EntityKind::Customer => "email",
            EntityKind::Inventory => "stock",
        }
    }
}

/// Merge key: the record's `id`, string or number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum EntityId {
    Text(String),
    Number(Number),
}

impl EntityId {
    /// `None` for a missing, null, empty-string or non-scalar id
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(EntityId::Text(s.clone())),
            Value::Number(n) => Some(EntityId::Number(n.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Text(s) => Value::String(s.clone()),
            EntityId::Number(n) => Value::Number(n.clone()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Text(s) => f.write_str(s),
            EntityId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Why a payload could not be correlated
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no usable id")]
    MissingId,
}

/// A decoded customer or inventory record
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub id: EntityId,
    pub name: Option<Value>,
    /// `email` for customers, `stock` for inventory
    pub detail: Option<Value>,
    /// Opaque passthrough, re-emitted verbatim as `additional_info`
    pub additional: Option<Value>,
}

impl EntityRecord {
    pub fn from_json(kind: EntityKind, data: &Value) -> Result<Self, RecordError> {
        let object = data.as_object().ok_or(RecordError::NotAnObject)?;
        let id = object
            .get("id")
            .and_then(EntityId::from_value)
            .ok_or(RecordError::MissingId)?;

        Ok(Self {
            kind,
            id,
            name: object.get("name").cloned(),
            detail: object.get(kind.detail_field()).cloned(),
            additional: object.get("additional").cloned(),
        })
    }

    /// Snapshot entry: `id`, `name`, the kind's detail field (null when absent),
    /// plus `additional_info` only when `additional` is non-empty.
    pub fn to_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("id".to_string(), self.id.to_value());
        entry.insert(
            "name".to_string(),
            self.name.clone().unwrap_or(Value::Null),
        );
        entry.insert(
            self.kind.detail_field().to_string(),
            self.detail.clone().unwrap_or(Value::Null),
        );
        if let Some(additional) = self.additional.as_ref().filter(|v| is_truthy(v)) {
            entry.insert("additional_info".to_string(), additional.clone());
        }
        Value::Object(entry)
    }
}

/// Null, `false`, `0`, `""`, `[]` and `{}` count as empty
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Last-write-wins table keeping first-insertion order of ids
#[derive(Debug, Default)]
struct EntityTable {
    positions: HashMap<EntityId, usize>,
    records: Vec<EntityRecord>,
}

impl EntityTable {
    fn upsert(&mut self, record: EntityRecord) {
        match self.positions.get(&record.id) {
            Some(&index) => self.records[index] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn entries(&self) -> Vec<Value> {
        self.records.iter().map(EntityRecord::to_entry).collect()
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.records.clear();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub customers_cached: usize,
    pub inventory_cached: usize,
}

impl CacheStats {
    pub fn is_empty(&self) -> bool {
        self.customers_cached == 0 && self.inventory_cached == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub total_customers: usize,
    pub total_products: usize,
}

/// Merged payload sent to the analytics sink
#[derive(Debug, Clone, Serialize)]
pub struct MergedSnapshot {
    pub timestamp: DateTime<Utc>,
    pub customers: Vec<Value>,
    pub inventory: Vec<Value>,
    pub summary: SnapshotSummary,
}

/// Latest uncommitted record per id, for each stream
#[derive(Debug, Default)]
pub struct CorrelationCache {
    customers: EntityTable,
    inventory: EntityTable,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a customer payload by `id`
    pub fn add_customer(&mut self, data: &Value) -> Result<EntityId, RecordError> {
        self.add(EntityKind::Customer, data)
    }

    /// Upsert an inventory payload by `id`
    pub fn add_inventory(&mut self, data: &Value) -> Result<EntityId, RecordError> {
        self.add(EntityKind::Inventory, data)
    }

    /// Upsert a decoded payload; nothing is cached when it has no usable id
    pub fn add(&mut self, kind: EntityKind, data: &Value) -> Result<EntityId, RecordError> {
        let record = EntityRecord::from_json(kind, data)?;
        let id = record.id.clone();
        self.add_record(record);
        Ok(id)
    }

    pub fn add_record(&mut self, record: EntityRecord) {
        match record.kind {
            EntityKind::Customer => self.customers.upsert(record),
            EntityKind::Inventory => self.inventory.upsert(record),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            customers_cached: self.customers.len(),
            inventory_cached: self.inventory.len(),
        }
    }

    /// Snapshot only when both streams have at least one record
    pub fn try_merge(&self) -> Option<MergedSnapshot> {
        if self.customers.is_empty() || self.inventory.is_empty() {
            return None;
        }
        Some(self.build_snapshot())
    }

    /// Snapshot whatever is cached; `None` only when both sides are empty
    pub fn merge(&self) -> Option<MergedSnapshot> {
        if self.customers.is_empty() && self.inventory.is_empty() {
            return None;
        }
        Some(self.build_snapshot())
    }

    /// Drop everything. Only called after the sink accepted a snapshot.
    pub fn clear(&mut self) {
        self.customers.clear();
        self.inventory.clear();
    }

    fn build_snapshot(&self) -> MergedSnapshot {
        let snapshot = MergedSnapshot {
            timestamp: Utc::now(),
            customers: self.customers.entries(),
            inventory: self.inventory.entries(),
            summary: SnapshotSummary {
                total_customers: self.customers.len(),
                total_products: self.inventory.len(),
            },
        };

        info!(
            total_customers = snapshot.summary.total_customers,
            total_products = snapshot.summary.total_products,
            "Merged cached records"
        );
        snapshot
    }
}
