//! Performance benchmarks for headway-core.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use headway_core::{
    AppContext, CollectionSchema, CrudEngine, Db, FieldDef, FieldType, GlobalHooks, Predicate,
    Row, Schema, TxId, Where,
};
use serde_json::{json, Value};

/// A no-op `Db` that accepts and discards every statement, enough to
/// benchmark the SQL-assembly and hook-dispatch overhead of the CRUD engine
/// without a real database round-trip.
#[derive(Default)]
struct NullDb {
    seq: AtomicI64,
}

#[async_trait]
impl Db for NullDb {
    async fn begin(&self) -> headway_core::Result<TxId> {
        Ok(TxId(uuid::Uuid::new_v4()))
    }
    async fn commit(&self, _tx: TxId) -> headway_core::Result<()> {
        Ok(())
    }
    async fn rollback(&self, _tx: TxId) -> headway_core::Result<()> {
        Ok(())
    }
    async fn execute(&self, _tx: Option<TxId>, _sql: &str, _params: &[Value]) -> headway_core::Result<u64> {
        Ok(1)
    }
    async fn execute_returning(
        &self,
        _tx: Option<TxId>,
        _sql: &str,
        _params: &[Value],
    ) -> headway_core::Result<Option<Row>> {
        Ok(None)
    }
    async fn query(&self, _tx: Option<TxId>, _sql: &str, _params: &[Value]) -> headway_core::Result<Vec<Row>> {
        Ok(Vec::new())
    }
    async fn apply_ddl(&self, _statements: &[String]) -> headway_core::Result<()> {
        Ok(())
    }
    async fn next_sequence_value(&self, _tx: Option<TxId>, _sequence: &str) -> headway_core::Result<i64> {
        Ok(self.seq.fetch_add(1, Ordering::SeqCst))
    }
}

fn blog_schema() -> Schema {
    let mut schema = Schema::new();
    let posts = CollectionSchema::new(
        "posts",
        vec![
            FieldDef::new("title", FieldType::Text).required(),
            FieldDef::new("body", FieldType::RichText).localized(),
            FieldDef::new("views", FieldType::Number),
        ],
    );
    schema.add_collection(posts).expect("schema compiles");
    schema
}

fn bench_schema_compile(c: &mut Criterion) {
    c.bench_function("schema_add_collection", |b| {
        b.iter(|| black_box(blog_schema()));
    });
}

fn bench_query_compile(c: &mut Criterion) {
    let schema = blog_schema();
    let posts = schema.collection("posts").unwrap();
    let resolver = headway_core::query::FieldResolver {
        schema: posts,
        main_alias: "t",
        i18n_alias: "ti",
        i18n_fallback_alias: Some("tif"),
    };

    let mut group = c.benchmark_group("query_compiler");
    for size in [1, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("and_of_eq", size), size, |b, &size| {
            let where_ = Where::And {
                and: (0..size)
                    .map(|i| {
                        Where::Field(
                            [(
                                "title".to_string(),
                                Predicate::Scalar(json!(format!("title-{i}"))),
                            )]
                            .into_iter()
                            .collect(),
                        )
                    })
                    .collect(),
            };
            b.iter(|| headway_core::query::compile_where(black_box(&resolver), black_box(&where_), 1));
        });
    }
    group.finish();
}

fn bench_crud_create(c: &mut Criterion) {
    let engine = CrudEngine {
        schema: Arc::new(blog_schema()),
        db: Arc::new(NullDb::default()),
        global_hooks: Arc::new(GlobalHooks::default()),
        queue: None,
    };
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ctx = AppContext::anonymous("en");

    c.bench_function("crud_create_post", |b| {
        b.iter(|| {
            rt.block_on(engine.create(
                "posts",
                black_box(json!({ "title": "Hello", "body": "World", "views": 0 })),
                &ctx,
            ))
        });
    });
}

criterion_group!(benches, bench_schema_compile, bench_query_compile, bench_crud_create);
criterion_main!(benches);
