use std::sync::Arc;

use catalog::{table_name, Row, SchemaStore};
use proptest::prelude::*;
use rowstore::{IngestTarget, ReadScope, RowStore, RowStoreConfig, RowStoreError, TableLayout};
use serde_json::{json, Value};
use uuid::Uuid;
use widestore::{CellType, ColumnDef, MemoryStore, PartitionKey, StoreError, TableDef, TableStore};

struct Fixture {
    store: MemoryStore,
    schemas: SchemaStore,
    rows: RowStore,
}

fn fixture(chunk_size: usize, write_batch_size: usize) -> Fixture {
    let store = MemoryStore::new();
    let shared = Arc::new(store.clone());
    let schemas = SchemaStore::new(shared.clone());
    let rows = RowStore::new(
        shared,
        schemas.clone(),
        RowStoreConfig {
            chunk_size,
            write_batch_size,
        },
    );
    Fixture {
        store,
        schemas,
        rows,
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("row must be an object"),
    }
}

fn numbered(n: usize) -> Vec<Row> {
    (0..n).map(|i| row(json!({"n": i, "label": format!("r{i}")}))).collect()
}

fn ingest_batch(f: &Fixture, ds: &Uuid, rows: &[Row]) -> Uuid {
    let batch = Uuid::new_v4();
    f.schemas.evolve_schema(ds, &rows[0], Some(batch)).unwrap();
    let columns = f.schemas.get_schema(ds, None, false).unwrap();
    f.rows.provision(ds, &rows[0], &columns).unwrap();
    f.rows.ingest(ds, IngestTarget::Batch(batch), rows).unwrap();
    batch
}

fn ns(rows: &[Row]) -> Vec<u64> {
    rows.iter().map(|r| r["n"].as_u64().unwrap()).collect()
}

#[test]
fn test_first_ingest_provisions_batched_table() {
    let f = fixture(10, 3);
    let ds = Uuid::new_v4();
    assert_eq!(f.rows.layout(&ds).unwrap(), None);

    let batch = ingest_batch(&f, &ds, &numbered(4));
    assert_eq!(f.rows.layout(&ds).unwrap(), Some(TableLayout::Batched));

    let def = f.store.describe_table(&table_name(&ds)).unwrap().unwrap();
    assert_eq!(def.column("n").unwrap().ty, CellType::BigInt);
    assert_eq!(def.column("label").unwrap().ty, CellType::Text);

    let page = f.rows.read_page(&ds, ReadScope::Batch(batch), 1, 10, None).unwrap();
    assert_eq!(ns(&page), vec![0, 1, 2, 3]);
    assert_eq!(page[2]["label"], json!("r2"));
}

#[test]
fn test_rows_are_addressed_by_chunk_and_offset() {
    let f = fixture(4, 50);
    let ds = Uuid::new_v4();
    let batch = ingest_batch(&f, &ds, &numbered(10));
    let table = table_name(&ds);

    let chunk_two = f
        .store
        .scan_partition(&table, &PartitionKey::batched(batch, 2), None, None)
        .unwrap();
    let ids: Vec<u64> = chunk_two.iter().map(|r| r.row_id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(chunk_two[0].cells["n"], json!(8));
}

#[test]
fn test_page_straddles_chunk_boundary() {
    let f = fixture(4, 2);
    let ds = Uuid::new_v4();
    let batch = ingest_batch(&f, &ds, &numbered(10));

    let page = f.rows.read_page(&ds, ReadScope::Batch(batch), 2, 3, None).unwrap();
    assert_eq!(ns(&page), vec![3, 4, 5]);
    let tail = f.rows.read_page(&ds, ReadScope::Batch(batch), 4, 3, None).unwrap();
    assert_eq!(ns(&tail), vec![9]);
    let past = f.rows.read_page(&ds, ReadScope::Batch(batch), 5, 3, None).unwrap();
    assert!(past.is_empty());
}

#[test]
fn test_new_columns_are_provisioned_before_write() {
    let f = fixture(10, 5);
    let ds = Uuid::new_v4();
    ingest_batch(&f, &ds, &[row(json!({"id": 1, "name": "Alice"}))]);

    let wider = vec![row(json!({"id": 3, "name": "Carol", "email": "c@x.com"}))];
    let unprovisioned = f.rows.ingest(&ds, IngestTarget::Batch(Uuid::new_v4()), &wider);
    assert!(matches!(
        unprovisioned,
        Err(RowStoreError::PartialWrite { written: 0, source: StoreError::UnknownColumn { .. }, .. })
    ));

    let batch = ingest_batch(&f, &ds, &wider);
    let page = f.rows.read_page(&ds, ReadScope::Batch(batch), 1, 10, None).unwrap();
    assert_eq!(page[0]["email"], json!("c@x.com"));
    let keys: Vec<&String> = page[0].keys().collect();
    assert_eq!(keys, vec!["id", "name", "email"]);
}

#[test]
fn test_check_storable_follows_table_types() {
    let f = fixture(10, 5);
    let ds = Uuid::new_v4();
    f.rows.check_storable(&ds, &numbered(2)).unwrap();
    ingest_batch(&f, &ds, &[row(json!({"id": 1, "code": "x"}))]);

    let fits = vec![
        row(json!({"id": 2, "code": 7})),
        row(json!({"id": null, "code": "y", "fresh": true})),
    ];
    f.rows.check_storable(&ds, &fits).unwrap();

    let text_id = vec![row(json!({"id": 3})), row(json!({"id": "A-1"}))];
    let err = f.rows.check_storable(&ds, &text_id).unwrap_err();
    assert!(matches!(
        err,
        RowStoreError::Store {
            source: StoreError::TypeMismatch { ref column, expected: CellType::BigInt, .. },
            ..
        } if column == "id"
    ));
}

#[test]
fn test_nulls_are_not_written() {
    let f = fixture(10, 5);
    let ds = Uuid::new_v4();
    let batch = ingest_batch(
        &f,
        &ds,
        &[row(json!({"a": 1, "b": "x"})), row(json!({"a": 2, "b": null}))],
    );

    let stored = f
        .store
        .scan_partition(&table_name(&ds), &PartitionKey::batched(batch, 0), None, None)
        .unwrap();
    assert!(!stored[1].cells.contains_key("b"));

    let page = f.rows.read_page(&ds, ReadScope::Batch(batch), 1, 10, None).unwrap();
    assert_eq!(page[1]["b"], Value::Null);
}

#[test]
fn test_partial_write_reports_committed_rows() {
    let f = fixture(100, 2);
    let ds = Uuid::new_v4();
    let mut rows = numbered(6);
    rows[3] = row(json!({"n": "not a number", "label": "bad"}));

    let batch = Uuid::new_v4();
    f.schemas.evolve_schema(&ds, &rows[0], Some(batch)).unwrap();
    let columns = f.schemas.get_schema(&ds, None, false).unwrap();
    f.rows.provision(&ds, &rows[0], &columns).unwrap();

    let err = f.rows.ingest(&ds, IngestTarget::Batch(batch), &rows).unwrap_err();
    assert_eq!(err.rows_written(), 2);
    assert!(f.store.row_count(&table_name(&ds)).unwrap() >= 2);
}

#[test]
fn test_column_selection() {
    let f = fixture(10, 5);
    let ds = Uuid::new_v4();
    let batch = ingest_batch(&f, &ds, &[row(json!({"Full Name": "Ann", "Age": 30, "City": "Oslo"}))]);

    let selected = vec!["City".to_string(), "Full Name".to_string(), "missing".to_string()];
    let page = f
        .rows
        .read_page(&ds, ReadScope::Batch(batch), 1, 10, Some(&selected))
        .unwrap();
    let keys: Vec<&String> = page[0].keys().collect();
    assert_eq!(keys, vec!["City", "Full Name", "missing"]);
    assert_eq!(page[0]["Full Name"], json!("Ann"));
    assert_eq!(page[0]["missing"], Value::Null);
}

#[test]
fn test_legacy_table_is_detected_and_read() {
    let f = fixture(3, 2);
    let ds = Uuid::new_v4();
    let table = table_name(&ds);
    f.store
        .create_table(&TableDef::legacy(
            &table,
            vec![
                ColumnDef::new("n", CellType::BigInt),
                ColumnDef::new("label", CellType::Text),
            ],
        ))
        .unwrap();

    assert_eq!(f.rows.layout(&ds).unwrap(), Some(TableLayout::Legacy));
    let first = numbered(4);
    let second: Vec<Row> = (4..7).map(|i| row(json!({"n": i, "label": "late"}))).collect();
    assert_eq!(f.rows.ingest(&ds, IngestTarget::Legacy { start: 0 }, &first).unwrap(), 4);
    assert_eq!(f.rows.ingest(&ds, IngestTarget::Legacy { start: 4 }, &second).unwrap(), 3);

    let page = f.rows.read_page(&ds, ReadScope::Legacy, 2, 3, None).unwrap();
    assert_eq!(ns(&page), vec![3, 4, 5]);
    assert_eq!(ns(&f.rows.scan_all(&ds, ReadScope::Legacy).unwrap()), (0..7).collect::<Vec<_>>());

    assert!(f
        .rows
        .read_page(&ds, ReadScope::Batch(Uuid::new_v4()), 1, 3, None)
        .unwrap()
        .is_empty());
    assert!(matches!(
        f.rows.ingest(&ds, IngestTarget::Batch(Uuid::new_v4()), &first),
        Err(RowStoreError::Store { source: StoreError::KeyMismatch(_), .. })
    ));
}

#[test]
fn test_scan_all_and_drop_table() {
    let f = fixture(4, 3);
    let ds = Uuid::new_v4();
    let first = ingest_batch(&f, &ds, &numbered(9));
    let second = ingest_batch(&f, &ds, &numbered(2));

    assert_eq!(ns(&f.rows.scan_all(&ds, ReadScope::Batch(first)).unwrap()), (0..9).collect::<Vec<_>>());
    assert_eq!(f.rows.scan_all(&ds, ReadScope::Batch(second)).unwrap().len(), 2);

    assert!(f.rows.drop_table(&ds).unwrap());
    assert_eq!(f.rows.layout(&ds).unwrap(), None);
    assert!(f.rows.read_page(&ds, ReadScope::Batch(first), 1, 5, None).unwrap().is_empty());
    assert!(!f.rows.drop_table(&ds).unwrap());
}

proptest! {
    #[test]
    fn pages_partition_the_batch_exactly(
        n in 0usize..60,
        size in 1usize..15,
        chunk_size in 1usize..12,
        write_batch in 1usize..6,
    ) {
        let f = fixture(chunk_size, write_batch);
        let ds = Uuid::new_v4();
        let batch = if n == 0 {
            Uuid::new_v4()
        } else {
            ingest_batch(&f, &ds, &numbered(n))
        };

        let pages = n / size + 2;
        let mut all = Vec::new();
        for p in 1..=pages {
            let page = f.rows.read_page(&ds, ReadScope::Batch(batch), p, size, None).unwrap();
            let expected = size.min(n.saturating_sub((p - 1) * size));
            prop_assert_eq!(page.len(), expected);
            all.extend(ns(&page));
        }
        prop_assert_eq!(all, (0..n as u64).collect::<Vec<_>>());
    }
}
