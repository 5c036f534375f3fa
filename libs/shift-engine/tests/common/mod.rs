#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use shift_api::{ApiError, FieldDef, FieldKind, KeyedStore, Record, RecordKey, Schema, StoredRecord, Value};
use shift_engine::{FieldRule, Migration, PipelineOptions, RecordErrorPolicy, RuleMapper, TypeRegistry};

pub const ORDER: &str = "com.acme.Order";
pub const ORDER_V3: &str = "com.acme.OrderV3";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn order_v1() -> Schema {
    Schema::new(ORDER, 1)
        .field(FieldDef::required("id", FieldKind::Int64))
        .field(FieldDef::required("customerId", FieldKind::Int64))
        .field(FieldDef::required("amount", FieldKind::Decimal))
        .field(FieldDef::required("status", FieldKind::String))
}

pub fn order_v2() -> Schema {
    let mut schema = order_v1().field(FieldDef::optional("currency", FieldKind::String).with_default("GBP"));
    schema.version = 2;
    schema
}

pub fn order_v3() -> Schema {
    Schema::new(ORDER_V3, 1)
        .field(FieldDef::required("id", FieldKind::Int64))
        .field(FieldDef::required("accountId", FieldKind::Int64))
        .field(FieldDef::required("amount", FieldKind::Decimal))
        .field(FieldDef::required("status", FieldKind::String))
        .field(FieldDef::optional("currency", FieldKind::String))
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(order_v1()).unwrap();
    registry.register(order_v2()).unwrap();
    registry.register(order_v3()).unwrap();
    registry
}

pub fn rename_rules() -> Vec<FieldRule> {
    vec![FieldRule::Rename {
        from: "customerId".into(),
        to: "accountId".into(),
    }]
}

pub fn migration(registry: &TypeRegistry) -> Arc<Migration> {
    let mapper = RuleMapper::new(&rename_rules(), &order_v2(), &order_v3()).unwrap();
    Arc::new(Migration::from_registry("order-v2-to-v3", registry, ORDER, ORDER_V3, Arc::new(mapper)).unwrap())
}

pub fn options(parallelism: usize) -> PipelineOptions {
    PipelineOptions {
        parallelism,
        buffer: 8,
        on_record_error: RecordErrorPolicy::Fail,
    }
}

pub fn order(id: i64, customer: i64, status: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("customerId", customer)
        .with("amount", Value::Decimal(1000 + id as i128, 2))
        .with("status", status)
}

/// Encode an order with the latest source layout.
pub fn order_bytes(registry: &TypeRegistry, id: i64, customer: i64, status: &str) -> Vec<u8> {
    registry.encode(ORDER, &order(id, customer, status)).unwrap()
}

pub async fn put_order(store: &dyn KeyedStore, registry: &TypeRegistry, id: i64, customer: i64, status: &str) {
    store
        .put(RecordKey::Int(id), order_bytes(registry, id, customer, status))
        .await
        .unwrap();
}

/// Decoded new-layout record under `id`, if any.
pub async fn read_v3(store: &dyn KeyedStore, registry: &TypeRegistry, id: i64) -> Option<Record> {
    let bytes = store.get(&RecordKey::Int(id)).await.unwrap()?;
    Some(registry.decode(ORDER_V3, &bytes).unwrap())
}

pub async fn sorted_scan(store: &dyn KeyedStore) -> Vec<StoredRecord> {
    let mut entries = store.scan().await.unwrap();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Store wrapper with a fixed delay per operation kind.
pub struct DelayedStore {
    pub inner: Arc<dyn KeyedStore>,
    pub put_delay: Duration,
    pub remove_delay: Duration,
}

impl KeyedStore for DelayedStore {
    fn get(&self, key: &RecordKey) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, ApiError>> + Send + '_>> {
        self.inner.get(key)
    }

    fn put(&self, key: RecordKey, value: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        Box::pin(async move {
            tokio::time::sleep(self.put_delay).await;
            self.inner.put(key, value).await
        })
    }

    fn remove(&self, key: &RecordKey) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        let key = key.clone();
        Box::pin(async move {
            tokio::time::sleep(self.remove_delay).await;
            self.inner.remove(&key).await
        })
    }

    fn scan(&self) -> Pin<Box<dyn Future<Output = Result<Vec<StoredRecord>, ApiError>> + Send + '_>> {
        self.inner.scan()
    }
}
