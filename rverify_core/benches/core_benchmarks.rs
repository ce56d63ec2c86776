use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rverify_common::{ContentNode, ContentType, EngineConfig, RuleConfig};
use rverify_core::{
    encode_tables, highlight, ComparePair, ComparisonManager, HighlightOptions, Queue, Session,
    Table,
};
use std::sync::Arc;

// Helper to build a JSON document with `count` records
fn json_records(count: usize, modified_every: usize) -> String {
    let records: Vec<String> = (0..count)
        .map(|i| {
            let score = if modified_every > 0 && i % modified_every == 0 { i + 1 } else { i };
            format!(
                r#"{{"id": {}, "name": "record_{}", "score": {}, "tags": ["a", "b"]}}"#,
                i, i, score
            )
        })
        .collect();
    format!(r#"{{"records": [{}]}}"#, records.join(", "))
}

fn xml_items(count: usize, modified_every: usize) -> String {
    let items: String = (0..count)
        .map(|i| {
            let value = if modified_every > 0 && i % modified_every == 0 { i + 1 } else { i };
            format!(r#"<item id="{}"><value>{}</value></item>"#, i, value)
        })
        .collect();
    format!("<root>{}</root>", items)
}

fn table_rows(count: usize, modified_every: usize) -> String {
    let rows = (0..count)
        .map(|i| {
            let amount = if modified_every > 0 && i % modified_every == 0 { i + 1 } else { i };
            vec![i.to_string(), format!("name_{}", i), amount.to_string()]
        })
        .collect();
    let table = Table::new(
        "orders",
        vec!["id".to_string(), "name".to_string(), "amount".to_string()],
        rows,
    );
    encode_tables(&[table]).unwrap()
}

fn bench_json_compare(c: &mut Criterion) {
    let manager = ComparisonManager::with_config(&EngineConfig::default());
    let rules = RuleConfig::new();
    let mut group = c.benchmark_group("json_compare");

    for size in [10, 100, 1000] {
        let expected = json_records(size, 0);
        let actual = json_records(size, 10);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let diffs = manager
                    .compare_raw(ContentType::Json, black_box(&expected), black_box(&actual), &rules)
                    .unwrap();
                black_box(diffs);
            });
        });
    }
    group.finish();
}

fn bench_json_ignore_array_order(c: &mut Criterion) {
    let manager = ComparisonManager::with_config(&EngineConfig::default());
    let rules = RuleConfig::from_pairs(["ignore_array_order=true"]).unwrap();
    let expected = json_records(200, 0);
    let actual = json_records(200, 20);

    c.bench_function("json_compare_unordered_200", |b| {
        b.iter(|| {
            let diffs = manager
                .compare_raw(ContentType::Json, black_box(&expected), black_box(&actual), &rules)
                .unwrap();
            black_box(diffs);
        });
    });
}

fn bench_xml_compare(c: &mut Criterion) {
    let manager = ComparisonManager::with_config(&EngineConfig::default());
    let rules = RuleConfig::new();
    let expected = xml_items(500, 0);
    let actual = xml_items(500, 25);

    c.bench_function("xml_compare_500_items", |b| {
        b.iter(|| {
            let diffs = manager
                .compare_raw(ContentType::Xml, black_box(&expected), black_box(&actual), &rules)
                .unwrap();
            black_box(diffs);
        });
    });
}

fn bench_table_compare(c: &mut Criterion) {
    let manager = ComparisonManager::with_config(&EngineConfig::default());
    let keyed = RuleConfig::from_pairs(["primary_key=id"]).unwrap();
    let positional = RuleConfig::new();
    let expected = table_rows(1000, 0);
    let actual = table_rows(1000, 50);

    c.bench_function("table_compare_positional_1000", |b| {
        b.iter(|| {
            let diffs = manager
                .compare_raw(ContentType::Table, black_box(&expected), black_box(&actual), &positional)
                .unwrap();
            black_box(diffs);
        });
    });

    c.bench_function("table_compare_primary_key_1000", |b| {
        b.iter(|| {
            let diffs = manager
                .compare_raw(ContentType::Table, black_box(&expected), black_box(&actual), &keyed)
                .unwrap();
            black_box(diffs);
        });
    });
}

fn bench_highlight(c: &mut Criterion) {
    let manager = ComparisonManager::with_config(&EngineConfig::default());
    let expected = json_records(200, 0);
    let actual = json_records(200, 10);
    let diffs = manager
        .compare_raw(ContentType::Json, &expected, &actual, &RuleConfig::new())
        .unwrap();
    let options = HighlightOptions::default();

    c.bench_function("highlight_json_200", |b| {
        b.iter(|| {
            let result = highlight(
                ContentType::Json,
                black_box(&diffs),
                black_box(&expected),
                black_box(&actual),
                &options,
            )
            .unwrap();
            black_box(result);
        });
    });
}

fn bench_queue_run(c: &mut Criterion) {
    let manager = Arc::new(ComparisonManager::with_config(&EngineConfig::default()));
    let expected = json_records(50, 0);
    let actual = json_records(50, 5);

    c.bench_function("queue_32_sessions_concurrency_4", |b| {
        b.iter(|| {
            let sessions: Vec<Arc<Session>> = (0..32)
                .map(|i| {
                    let pair = ComparePair::new(
                        ContentNode::leaf(format!("doc_{}", i), ContentType::Json, &expected),
                        vec![ContentNode::leaf(format!("doc_{}", i), ContentType::Json, &actual)],
                    );
                    Arc::new(Session::for_comparison(
                        Arc::clone(&manager),
                        vec![pair],
                        RuleConfig::new(),
                    ))
                })
                .collect();
            let queue = Queue::builder(4).extend(sessions).build().unwrap();
            queue.run();
            black_box(queue.completed_sessions());
        });
    });
}

criterion_group!(
    comparator_benches,
    bench_json_compare,
    bench_json_ignore_array_order,
    bench_xml_compare,
    bench_table_compare
);

criterion_group!(highlight_benches, bench_highlight);

criterion_group!(session_benches, bench_queue_run);

criterion_main!(comparator_benches, highlight_benches, session_benches);
