//! Benchmarks for scriptcache core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scriptcache::cache::digest::hash_text;
use scriptcache::cache::trailer::{extract, merge};
use scriptcache::core::types::Value;
use scriptcache::engine::Registry;

fn script(lines: usize) -> String {
    let mut code = String::from("// @RPN:\n// { function (n:Long):Long }\nn\n");
    for i in 0..lines {
        code.push_str(&format!("{} + // step {}\n", i, i));
    }
    code
}

fn bench_hash_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_text");
    for size in [64, 1024, 16384] {
        let input: String = "x\u{e9}".repeat(size / 2);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hash_text(black_box(input))));
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let registry = Registry::with_builtins();
    let mut group = c.benchmark_group("merge");
    for lines in [10, 100, 1000] {
        let code = script(lines);
        let exec = registry.compile("bench.rpn", &code).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(lines), &exec, |b, exec| {
            b.iter(|| black_box(merge(black_box(&code), exec).unwrap()));
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let registry = Registry::with_builtins();
    let mut group = c.benchmark_group("extract");
    for lines in [10, 100, 1000] {
        let code = script(lines);
        let exec = registry.compile("bench.rpn", &code).unwrap();
        let text = merge(&code, &exec).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(lines), &text, |b, text| {
            b.iter(|| {
                let out = extract(black_box(text), &registry);
                assert!(out.validation.is_fresh());
                black_box(out);
            });
        });
    }
    group.finish();
}

fn bench_call(c: &mut Criterion) {
    let registry = Registry::with_builtins();
    let exec = registry
        .compile(
            "sum.rpn",
            "// @RPN:\n// { function (base:Long, rest:Long...):Long }\nrest sum base +\n",
        )
        .unwrap();
    let args: Vec<Value> = (0..16).map(Value::Long).collect();
    c.bench_function("call_varargs_16", |b| {
        b.iter(|| black_box(exec.run(black_box(&args)).unwrap()));
    });
}

fn bench_compile(c: &mut Criterion) {
    let registry = Registry::with_builtins();
    let code = script(100);
    c.bench_function("compile_100_lines", |b| {
        b.iter(|| black_box(registry.compile("bench.rpn", black_box(&code)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_hash_text,
    bench_merge,
    bench_extract,
    bench_call,
    bench_compile
);
criterion_main!(benches);
