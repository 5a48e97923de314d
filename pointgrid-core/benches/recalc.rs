//! Recalculation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pointgrid_core::{ColumnKind, Dataset, FormulaEngine, Schema, Value};

fn dataset(rows: usize) -> Dataset {
    let schema = Schema::from_columns([
        ("x", ColumnKind::Native),
        ("y", ColumnKind::Native),
        ("userCell1", ColumnKind::Formula),
        ("userCell2", ColumnKind::Formula),
    ])
    .unwrap();
    let mut data = Dataset::new(schema);
    for i in 0..rows {
        data.push_row(vec![Value::Number(i as f64), Value::Number((i % 7) as f64)])
            .unwrap();
        let r = i + 1;
        data.set_formula(i, 2, &format!("=A{r}*B{r}+NCELLS")).unwrap();
        data.set_formula(i, 3, &format!("=IF(C{r}>100,SQRT(C{r}),0)")).unwrap();
    }
    data
}

fn full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pass");
    for rows in [100, 1000, 5000] {
        let data = dataset(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &data, |b, data| {
            b.iter(|| {
                let mut engine = FormulaEngine::new();
                black_box(engine.run_pass(&data.snapshot(), None))
            })
        });
    }
    group.finish();
}

fn incremental_pass(c: &mut Criterion) {
    let mut data = dataset(5000);
    let mut engine = FormulaEngine::new();
    engine.run_pass(&data.snapshot(), None);
    let mut value = 0.0;

    c.bench_function("incremental_single_edit_5000", |b| {
        b.iter(|| {
            value += 1.0;
            data.set_value(2500, 0, Value::Number(value)).unwrap();
            black_box(engine.run_pass(&data.snapshot(), None))
        })
    });
}

fn snapshot(c: &mut Criterion) {
    let data = dataset(5000);
    c.bench_function("snapshot_5000", |b| b.iter(|| black_box(data.snapshot())));
}

criterion_group!(benches, full_pass, incremental_pass, snapshot);
criterion_main!(benches);
