//! Benchmarks for query fingerprinting and cached reads
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use lazyrows::cache::ResultCache;
use lazyrows::types::{Dialect, Query, Row, RowSet, Value};

/// Create a result set shaped like the `user_data` table
fn create_users(num_rows: usize) -> RowSet {
    (0..num_rows)
        .map(|i| {
            Row::from_pairs([
                ("user_id", Value::from(format!("{i:08}"))),
                ("name", Value::from(format!("user {i}"))),
                ("email", Value::from(format!("user.{i}@email.com"))),
                ("age", Value::from(20 + (i % 50) as i64)),
            ])
        })
        .collect()
}

fn create_query(num_params: usize) -> Query {
    let clauses: Vec<String> = (1..=num_params)
        .map(|p| format!("age > {}", Dialect::Sqlite.placeholder(p)))
        .collect();
    let statement = if clauses.is_empty() {
        "SELECT * FROM user_data".to_owned()
    } else {
        format!("SELECT *\n  FROM user_data\n WHERE {}", clauses.join(" AND "))
    };

    (0..num_params).fold(Query::new(statement), |q, p| q.bind(p as i64))
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for num_params in [0, 4, 32] {
        let query = create_query(num_params);
        group.bench_with_input(
            BenchmarkId::new("params", num_params),
            &query,
            |b, query| b.iter(|| black_box(query.fingerprint())),
        );
    }

    group.finish();
}

fn bench_cache_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hits");
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");

    for num_rows in [10, 1_000, 100_000] {
        let cache = Arc::new(ResultCache::new());
        let query = create_query(1);
        let rows = create_users(num_rows);

        runtime.block_on(async {
            cache
                .get_or_fetch(&query, || async move { Ok(rows) })
                .await
                .expect("failed to warm cache");
        });

        group.bench_with_input(
            BenchmarkId::new("rows", num_rows),
            &(cache, query),
            |b, (cache, query)| {
                b.to_async(&runtime).iter(|| async move {
                    let cached = cache
                        .get_or_fetch(query, || async { Ok(RowSet::new()) })
                        .await
                        .expect("cache lookup failed");
                    black_box(cached.rows.len())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_cache_hits);
criterion_main!(benches);
