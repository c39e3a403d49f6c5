//! Benchmark the grammar compile path at varying query complexity.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use ironorm::builder::state::{BoolConn, Column, FromClause, QueryState, WhereNode};
use ironorm::grammar::{Grammar, for_dialect};
use ironorm::ident::{Dialect, Identifier};
use ironorm::value::Value;

/// Builds `select col0, col1, ... from t where col0 = ? and col1 = ? and ...`
/// with `n` columns and `n` basic where clauses.
fn build_select_state(n: usize) -> QueryState {
    let mut state = QueryState::new();
    state.from = FromClause::Name(Identifier::parse("t").unwrap());
    for i in 0..n {
        state.columns.push(Column::Ident(Identifier::parse(&format!("col{i}")).unwrap()));
        state.wheres.push(WhereNode::Basic {
            column: Identifier::parse(&format!("col{i}")).unwrap(),
            op: "=".to_string(),
            value: Value::bound(i as i64),
            conn: BoolConn::And,
        });
    }
    state
}

fn bench_compile_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar/compile_select");
    let grammar = for_dialect(Dialect::Pgsql);

    for n in [1, 5, 10, 50, 100] {
        let state = build_select_state(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &state, |b, state| {
            b.iter(|| black_box(grammar.compile_select(state).unwrap()));
        });
    }

    group.finish();
}

fn bench_build_and_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar/build_and_compile");
    let grammar = for_dialect(Dialect::Pgsql);

    for n in [1, 5, 10, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let state = build_select_state(n);
                black_box(grammar.compile_select(&state).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_compile_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar/compile_insert");
    let grammar = for_dialect(Dialect::Pgsql);
    let table = Identifier::parse("t").unwrap();

    for n in [1, 5, 10, 50] {
        let columns: Vec<String> = (0..n).map(|i| format!("col{i}")).collect();
        let row: Vec<Value> = (0..n).map(|i| Value::bound(i as i64)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &(columns, row), |b, (columns, row)| {
            b.iter(|| black_box(grammar.compile_insert(&table, columns, &[row.clone()], "").unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile_select, bench_build_and_compile, bench_compile_insert);
criterion_main!(benches);
