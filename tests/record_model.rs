use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use ubostore::record::{format_time, RecordExport};
use ubostore::{UboError, UniversalRecord};

#[test]
fn ids_are_trimmed_and_lower_cased() {
    let record = UniversalRecord::new("  MixedCase-ID ", 1);
    assert_eq!(record.id(), "mixedcase-id");
    record.set_id(" Other ");
    assert_eq!(record.id(), "other");
}

#[test]
fn new_records_are_dirty_until_synchronized() {
    let record = UniversalRecord::new("u1", 7);
    assert!(record.is_dirty());
    assert_eq!(record.document(), "");
    assert_eq!(record.checksum(), "");
    assert_eq!(record.time_created(), record.time_updated());

    record.synchronize();
    assert!(!record.is_dirty());
    assert_eq!(record.checksum().len(), 64);
    assert!(record.verify_checksum());
}

#[test]
fn synchronize_is_idempotent() {
    let record = UniversalRecord::new("u1", 7);
    record.set_data_attr("profile.age", 30).expect("set");
    record.synchronize();
    let (checksum, updated, document) = (record.checksum(), record.time_updated(), record.document());
    sleep(Duration::from_millis(5));
    record.synchronize();
    assert_eq!(record.checksum(), checksum);
    assert_eq!(record.time_updated(), updated);
    assert_eq!(record.document(), document);
}

#[test]
fn mutations_mark_the_record_dirty() {
    let record = UniversalRecord::new("u1", 7);
    record.synchronize();
    record.set_data_attr("a", 1).expect("set");
    assert!(record.is_dirty());
    record.synchronize();
    record.set_extra_attr("role", "admin");
    assert!(record.is_dirty());
    record.synchronize();
    record.set_app_version(8);
    assert!(record.is_dirty());
    record.synchronize();
    // removing something that is not there changes nothing
    assert_eq!(record.remove_extra_attr("missing"), None);
    assert!(!record.is_dirty());
}

#[test]
fn checksum_ignores_the_update_time() {
    let record = UniversalRecord::new("u1", 7);
    record.set_data_attr("profile.age", 30).expect("set");
    record.synchronize();
    let (checksum, updated) = (record.checksum(), record.time_updated());
    sleep(Duration::from_millis(5));
    // same content, but the record is dirty again
    record.set_app_version(7);
    record.synchronize();
    assert!(record.time_updated() > updated);
    assert_eq!(record.checksum(), checksum);
}

#[test]
fn checksum_follows_content() {
    let base = UniversalRecord::new("u1", 7);
    base.set_data_attr("profile.age", 30).expect("set");
    base.synchronize();

    let changed_data = base.clone();
    changed_data.set_data_attr("profile.age", 31).expect("set");
    changed_data.synchronize();
    assert_ne!(changed_data.checksum(), base.checksum());

    let changed_extra = base.clone();
    changed_extra.set_extra_attr("role", "admin");
    changed_extra.synchronize();
    assert_ne!(changed_extra.checksum(), base.checksum());

    let changed_version = base.clone();
    changed_version.set_app_version(8);
    changed_version.synchronize();
    assert_ne!(changed_version.checksum(), base.checksum());

    let changed_id = base.clone();
    changed_id.set_id("u2");
    changed_id.synchronize();
    assert_ne!(changed_id.checksum(), base.checksum());
}

#[test]
fn tampering_is_detected() {
    let record = UniversalRecord::new("u1", 7);
    record.set_data_attr("balance", 100).expect("set");
    let mut export = record.to_export();
    assert!(UniversalRecord::from_export(export.clone()).verify_checksum());
    export.data = r#"{"balance":1000000}"#.to_string();
    assert!(!UniversalRecord::from_export(export).verify_checksum());
}

#[test]
fn reads_do_not_disturb_a_clean_record() {
    let record = UniversalRecord::new("u1", 1);
    record.synchronize();
    let loaded = UniversalRecord::from_export(record.to_export());
    assert_eq!(loaded.data_attr("anything").expect("get"), None);
    assert!(!loaded.is_dirty());
    assert!(loaded.verify_checksum());
}

#[test]
fn document_paths_round_trip() {
    let record = UniversalRecord::new("u1", 1);
    record.set_data_attr("data.number[1]", 45.6).expect("set");
    record.set_data_attr("data.bool", true).expect("set");
    record.set_data_attr("data.names[0]", "first").expect("set");
    record.synchronize();

    let loaded = UniversalRecord::from_export(record.to_export());
    assert_eq!(loaded.data_attr("data.number[0]").expect("get"), Some(json!(null)));
    assert_eq!(loaded.data_attr_as::<f64>("data.number[1]").expect("get"), Some(45.6));
    assert_eq!(loaded.data_attr_as::<bool>("data.bool").expect("get"), Some(true));
    assert_eq!(loaded.data_attr_as::<String>("data.names[0]").expect("get"), Some("first".to_string()));
    assert_eq!(loaded.data_attr("data.missing.deeper").expect("get"), None);
    assert_eq!(loaded.data_attr_as::<i64>("data.number[0]").expect("get"), None);
}

#[test]
fn integral_numbers_convert_to_integers() {
    let record = UniversalRecord::new("u1", 1);
    record.set_data_attr("age", 30.0).expect("set");
    assert_eq!(record.data_attr_as::<i64>("age").expect("get"), Some(30));
    assert_eq!(record.data_attr_as::<u8>("age").expect("get"), Some(30));
    record.set_data_attr("name", "alice").expect("set");
    assert!(matches!(record.data_attr_as::<i64>("name"), Err(UboError::Conversion { .. })));
}

#[test]
fn timestamps_are_stored_in_the_time_layout() {
    let at = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 15).single().expect("valid time");
    let record = UniversalRecord::new("u1", 1);
    record.set_data_attr_time("audit.seen", &at).expect("set");
    record.set_extra_attr_time("seen", &at);
    assert_eq!(record.data_attr("audit.seen").expect("get"), Some(json!(format_time(&at))));
    assert_eq!(record.data_attr_as_time("audit.seen").expect("get"), Some(at));
    assert_eq!(record.extra_attr_as_time("seen").expect("get"), Some(at));
    assert_eq!(format_time(&at), "2024-02-29T12:30:15.000000+00:00");
}

#[test]
fn unparsable_documents_fall_back_to_an_empty_container() {
    let record = UniversalRecord::new("u1", 1);
    record.set_document("this is not json");
    assert_eq!(record.data_attr("a").expect("get"), None);
    assert!(record.document_reinitialized());
    record.set_data_attr("a", 1).expect("set");
    record.synchronize();
    assert_eq!(record.document(), r#"{"a":1}"#);

    let empty = UniversalRecord::new("u2", 1);
    empty.set_data_attr("[1]", "x").expect("set");
    assert!(!empty.document_reinitialized());
    empty.synchronize();
    assert_eq!(empty.document(), r#"[null,"x"]"#);
}

#[test]
fn scalar_documents_are_not_addressable() {
    let record = UniversalRecord::new("u1", 1);
    record.set_document("42");
    assert!(matches!(record.data_attr("a"), Err(UboError::PathNotAddressable { .. })));
    assert!(matches!(record.set_data_attr("a", 1), Err(UboError::PathNotAddressable { .. })));
    assert!(matches!(record.data_attr("a..b"), Err(UboError::PathNotAddressable { .. })));
}

#[test]
fn clones_share_nothing() {
    let original = UniversalRecord::new("u1", 1);
    original.set_data_attr("profile.age", 30).expect("set");
    let copy = original.clone();
    copy.set_data_attr("profile.age", 99).expect("set");
    assert_eq!(original.data_attr_as::<i64>("profile.age").expect("get"), Some(30));
    assert_eq!(copy.data_attr_as::<i64>("profile.age").expect("get"), Some(99));
}

#[test]
fn exports_survive_a_json_trip() {
    let record = UniversalRecord::new("u1", 3);
    record.set_data_attr("profile.name", "Alice").expect("set");
    record.set_extra_attr("role", "admin");
    let text = serde_json::to_string(&record).expect("serialize");
    let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
    assert_eq!(value["appVersion"], json!(3));
    assert_eq!(value["extras"]["role"], json!("admin"));

    let back: UniversalRecord = serde_json::from_str(&text).expect("deserialize");
    let export: RecordExport = back.to_export();
    assert_eq!(export, record.to_export());
    assert!(back.verify_checksum());
}

#[test]
fn a_read_before_a_write_leaves_the_content_alone() {
    let base = UniversalRecord::new("u1", 1);
    base.synchronize();
    let export = base.to_export();
    let read_first = UniversalRecord::from_export(export.clone());
    let untouched = UniversalRecord::from_export(export);

    assert_eq!(read_first.data_attr("x").expect("get"), None);
    read_first.set_extra_attr("k", 1);
    untouched.set_extra_attr("k", 1);
    read_first.synchronize();
    untouched.synchronize();
    assert_eq!(read_first.document(), untouched.document());
    assert_eq!(read_first.checksum(), untouched.checksum());
    assert!(read_first.verify_checksum());
}

#[test]
fn failed_writes_leave_a_clean_record_clean() {
    let record = UniversalRecord::new("u1", 1);
    record.set_data_attr("list[0]", 1).expect("set");
    record.synchronize();
    assert!(matches!(
        record.set_data_attr("list[18446744073709551615]", 2),
        Err(UboError::PathNotAddressable { .. })
    ));
    assert!(matches!(record.set_data_attr("list[0].name", 2), Err(UboError::PathNotAddressable { .. })));
    assert!(matches!(record.set_data_attr("other.x[99999]", 2), Err(UboError::PathNotAddressable { .. })));
    assert!(!record.is_dirty());
    assert!(record.verify_checksum());
    assert_eq!(record.document(), r#"{"list":[1]}"#);
}

#[test]
fn one_record_can_be_shared_across_threads() {
    const THREADS: i64 = 4;
    const WRITES: i64 = 25;
    let record = Arc::new(UniversalRecord::new("shared", 1));
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let record = Arc::clone(&record);
            thread::spawn(move || {
                for i in 0..WRITES {
                    record.set_data_attr(&format!("t{t}.v{i}"), i).expect("set");
                    record.set_extra_attr(&format!("t{t}_{i}"), i);
                    assert_eq!(record.data_attr_as::<i64>(&format!("t{t}.v{i}")).expect("get"), Some(i));
                    if i % 5 == 0 {
                        record.synchronize();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    record.synchronize();
    assert!(!record.is_dirty());
    assert!(record.verify_checksum());
    assert_eq!(record.extra_attrs().len(), (THREADS * WRITES) as usize);
    for t in 0..THREADS {
        for i in 0..WRITES {
            assert_eq!(record.data_attr_as::<i64>(&format!("t{t}.v{i}")).expect("get"), Some(i));
            assert_eq!(record.extra_attr_as::<i64>(&format!("t{t}_{i}")).expect("get"), Some(i));
        }
    }
    let reloaded = UniversalRecord::from_export(record.to_export());
    assert!(reloaded.verify_checksum());
}
