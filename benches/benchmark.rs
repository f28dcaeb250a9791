use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rusqlite::Connection;
use ubostore::persist::{share, ColumnMapping, SqlDao};
use ubostore::schema::{init_table, ColumnDef, Flavor};
use ubostore::{UniversalDao, UniversalRecord};

fn sample(id: &str) -> UniversalRecord {
    let record = UniversalRecord::new(id, 1);
    for i in 0..20 {
        record.set_data_attr(&format!("profile.items[{i}].name"), format!("item {i}")).unwrap();
        record.set_data_attr(&format!("profile.items[{i}].price"), i as f64 * 1.5).unwrap();
    }
    record.set_extra_attr("owner", "alice");
    record
}

fn synchronize(c: &mut Criterion) {
    let record = sample("bench");
    let mut version = 0;
    c.bench_function("synchronize dirty record", |b| {
        b.iter(|| {
            version += 1;
            record.set_app_version(version);
            black_box(record.synchronize().checksum());
        })
    });
    c.bench_function("verify checksum", |b| b.iter(|| black_box(record.verify_checksum())));
}

fn sql_crud(c: &mut Criterion) {
    let conn = Connection::open_in_memory().unwrap();
    init_table(&conn, Flavor::Sqlite, "bench", &[ColumnDef::new("zowner", "VARCHAR(32)")]).unwrap();
    let mapping = ColumnMapping::from_pairs([("zowner".to_string(), "owner".to_string())]).unwrap();
    let dao = SqlDao::new(share(conn), Flavor::Sqlite, "bench", mapping).unwrap();
    let mut n = 0u64;
    c.bench_function("sql create", |b| {
        b.iter(|| {
            n += 1;
            dao.create(&sample(&format!("r{n}"))).unwrap();
        })
    });
    c.bench_function("sql get", |b| b.iter(|| black_box(dao.get("r1").unwrap())));
}

criterion_group!(benches, synchronize, sql_crud);
criterion_main!(benches);
