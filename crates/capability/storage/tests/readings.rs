use chrono::{TimeZone, Utc};
use domain::Reading;
use pdm_storage::{InMemoryReadingStore, JsonLinesReadingStore, ReadingStore};

fn sample(equipment_id: &str, minute: u32, temperature: f64) -> Reading {
    let ts = Utc
        .with_ymd_and_hms(2024, 6, 1, 8, minute, 0)
        .single()
        .expect("valid");
    let mut reading = Reading::new(equipment_id, ts).with_value("temperature", temperature);
    reading.anomaly_detected = Some(temperature > 85.0);
    reading.anomaly_score = Some(if temperature > 85.0 { 0.4 } else { 0.0 });
    reading
}

#[tokio::test]
async fn in_memory_keeps_order_per_equipment() {
    let store = InMemoryReadingStore::new();
    store.save(&sample("PUMP-1", 0, 70.0)).await.expect("save");
    store
        .save_batch(&[sample("PUMP-2", 0, 60.0), sample("PUMP-1", 1, 90.0)])
        .await
        .expect("batch");

    assert_eq!(store.len(), 3);
    let pump1 = store.list_by_equipment("PUMP-1").expect("list");
    let temps: Vec<f64> = pump1.iter().filter_map(|r| r.numeric("temperature")).collect();
    assert_eq!(temps, [70.0, 90.0]);
}

#[tokio::test]
async fn json_lines_appends_wire_format() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonLinesReadingStore::new(dir.path().join("readings.jsonl"));
    assert!(store.read_all().await.expect("empty").is_empty());

    store.save(&sample("PUMP-1", 0, 70.0)).await.expect("save");
    store
        .save_batch(&[sample("PUMP-1", 1, 88.0), sample("PUMP-1", 2, 72.0)])
        .await
        .expect("batch");

    let raw = tokio::fs::read_to_string(store.path()).await.expect("read");
    assert_eq!(raw.lines().count(), 3);
    let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(first["timestamp"], "2024-06-01T08:00:00.000000Z");
    assert_eq!(first["anomaly_detected"], false);

    let back = store.read_all().await.expect("read_all");
    assert_eq!(back[1], sample("PUMP-1", 1, 88.0));
}
