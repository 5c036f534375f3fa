mod common;

use proptest::prelude::*;

use shift_api::{FieldDef, FieldKind, Record, Schema, Value};
use shift_engine::{MappingError, RecordMapper, RuleMapper, TypeRegistry};

use common::{ORDER, ORDER_V3, migration, order_v2, order_v3, registry, rename_rules};

const KINDS: &str = "com.acme.Kinds";

/// One field of every kind plus an optional one.
fn kinds_v1() -> Schema {
    Schema::new(KINDS, 1)
        .field(FieldDef::required("i", FieldKind::Int64))
        .field(FieldDef::required("f", FieldKind::Float64))
        .field(FieldDef::required("b", FieldKind::Bool))
        .field(FieldDef::required("d", FieldKind::Decimal))
        .field(FieldDef::required("s", FieldKind::String))
        .field(FieldDef::required("y", FieldKind::Bytes))
        .field(FieldDef::optional("o", FieldKind::String))
}

/// Adds a defaulted and an undefaulted optional field.
fn kinds_v2() -> Schema {
    let mut schema = kinds_v1()
        .field(FieldDef::optional("note", FieldKind::String).with_default("n/a"))
        .field(FieldDef::optional("tag", FieldKind::Int64));
    schema.version = 2;
    schema
}

fn kinds_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(kinds_v1()).unwrap();
    registry.register(kinds_v2()).unwrap();
    registry
}

/// `None` leaves the field out, `Some(Null)` writes an explicit null.
fn slot<S: Strategy<Value = Value>>(value: S) -> impl Strategy<Value = Option<Value>> {
    prop_oneof![Just(None), Just(Some(Value::Null)), value.prop_map(Some)]
}

fn decimal() -> impl Strategy<Value = Value> {
    (any::<i128>(), any::<u8>()).prop_map(|(unscaled, scale)| Value::Decimal(unscaled, scale))
}

fn text() -> impl Strategy<Value = Value> {
    any::<String>().prop_map(Value::String)
}

prop_compose! {
    fn kinds_record()(
        i in any::<i64>(),
        f in -1e15f64..1e15,
        b in any::<bool>(),
        d in decimal(),
        s in any::<String>(),
        y in prop::collection::vec(any::<u8>(), 0..64),
        o in slot(text()),
    ) -> (Record, Option<Value>) {
        let record = Record::new()
            .with("i", i)
            .with("f", f)
            .with("b", b)
            .with("d", d)
            .with("s", s)
            .with("y", Value::Bytes(y));
        (record, o)
    }
}

fn with_slot(mut record: Record, name: &str, slot: &Option<Value>) -> Record {
    if let Some(value) = slot {
        record.set(name, value.clone());
    }
    record
}

/// What a reader sees for an optional field without a default.
fn read_back(slot: &Option<Value>) -> Value {
    slot.clone().unwrap_or(Value::Null)
}

prop_compose! {
    fn order_fields()(
        id in any::<i64>(),
        customer in any::<i64>(),
        amount in decimal(),
        status in any::<String>(),
        currency in slot(text()),
    ) -> (Record, Option<Value>) {
        let record = Record::new()
            .with("id", id)
            .with("customerId", customer)
            .with("amount", amount)
            .with("status", status);
        (record, currency)
    }
}

proptest! {
    #[test]
    fn older_binaries_read_under_newer_layout((base, o) in kinds_record()) {
        let registry = kinds_registry();
        let v1 = registry.codec_version(KINDS, 1).unwrap();
        let bytes = v1.encode(&with_slot(base.clone(), "o", &o)).unwrap();

        let expected_v1 = base.clone().with("o", read_back(&o));
        prop_assert_eq!(v1.decode(&bytes).unwrap(), expected_v1.clone());

        let expected_v2 = expected_v1.with("note", "n/a").with("tag", Value::Null);
        prop_assert_eq!(registry.decode(KINDS, &bytes).unwrap(), expected_v2);
    }

    #[test]
    fn newer_binaries_read_under_older_layout(
        (base, o) in kinds_record(),
        note in slot(text()),
        tag in slot(any::<i64>().prop_map(Value::Int64)),
    ) {
        let registry = kinds_registry();
        let record = with_slot(with_slot(with_slot(base.clone(), "o", &o), "note", &note), "tag", &tag);
        let bytes = registry.encode(KINDS, &record).unwrap();

        let v1 = registry.codec_version(KINDS, 1).unwrap();
        prop_assert_eq!(v1.decode(&bytes).unwrap(), base.clone().with("o", read_back(&o)));

        let note_seen = match note {
            Some(Value::String(n)) => Value::String(n),
            _ => Value::from("n/a"),
        };
        let expected = base.with("o", read_back(&o)).with("note", note_seen).with("tag", read_back(&tag));
        prop_assert_eq!(registry.decode(KINDS, &bytes).unwrap(), expected);
    }

    #[test]
    fn rename_moves_customer_and_keeps_the_rest((base, currency) in order_fields()) {
        let mapper = RuleMapper::new(&rename_rules(), &order_v2(), &order_v3()).unwrap();
        let source = with_slot(base.clone(), "currency", &currency);
        let out = mapper.map(&source).unwrap();

        prop_assert_eq!(out.get("accountId"), base.get("customerId"));
        prop_assert!(!out.contains("customerId"));
        for field in ["id", "amount", "status"] {
            prop_assert_eq!(out.get(field), base.get(field));
        }
        match currency {
            Some(Value::String(c)) => prop_assert_eq!(out.get("currency"), Some(&Value::String(c))),
            _ => prop_assert!(!out.contains("currency")),
        }
    }

    #[test]
    fn mapper_rejects_any_missing_required_field(
        (base, _) in order_fields(),
        missing in prop::sample::select(vec!["id", "customerId", "amount", "status"]),
        as_null in any::<bool>(),
    ) {
        let mapper = RuleMapper::new(&rename_rules(), &order_v2(), &order_v3()).unwrap();
        let mut source = base;
        if as_null {
            source.set(missing, Value::Null);
        } else {
            source.remove(missing);
        }
        prop_assert_eq!(
            mapper.map(&source).unwrap_err(),
            MappingError::MissingField { field: missing.to_string() }
        );
    }

    #[test]
    fn migration_of_either_source_version((base, currency) in order_fields()) {
        let registry = registry();
        let bytes = match &currency {
            None => registry.codec_version(ORDER, 1).unwrap().encode(&base).unwrap(),
            Some(_) => registry.encode(ORDER, &with_slot(base.clone(), "currency", &currency)).unwrap(),
        };

        let migrated = registry.decode(ORDER_V3, &migration(&registry).apply(&bytes).unwrap()).unwrap();
        prop_assert_eq!(migrated.get("accountId"), base.get("customerId"));
        prop_assert_eq!(migrated.get("amount"), base.get("amount"));
        let currency_seen = match currency {
            Some(Value::String(c)) => Value::String(c),
            _ => Value::from("GBP"),
        };
        prop_assert_eq!(migrated.get("currency"), Some(&currency_seen));
    }
}
