//! Reply framing and parsing benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use gcslink::core::parse::{gcs_header, one_item_dict, KeyConv, ValueConv};
use gcslink::{is_complete, BufState, GcsData, GcsMessages, ScriptedGateway};
use std::hint::black_box;

fn answer(axes: usize) -> String {
    let lines: Vec<String> = (1..=axes).map(|axis| format!("{axis}={:.6}", axis as f64 * 0.125)).collect();
    format!("{}\n", lines.join(" \n"))
}

fn eol_benchmark(c: &mut Criterion) {
    let reply = answer(64);
    let mut group = c.benchmark_group("eol");
    group.throughput(Throughput::Bytes(reply.len() as u64));

    group.bench_function("is_complete", |b| b.iter(|| is_complete(black_box(&reply))));

    group.bench_function("incremental", |b| {
        b.iter(|| {
            let mut rcvbuf = String::new();
            for chunk in black_box(&reply).as_bytes().chunks(16) {
                rcvbuf.extend(chunk.iter().map(|&byte| char::from(byte)));
                if is_complete(&rcvbuf) {
                    break;
                }
            }
            black_box(rcvbuf)
        })
    });

    group.finish();
}

fn parse_benchmark(c: &mut Criterion) {
    let reply = answer(64);
    let header = "# TYPE = 1\n# SEPARATOR = 32\n# DIM = 2\n# SAMPLE_TIME = 0.000050\n# NDATA = 1000\n# NAME0 = Target Position of axis1\n# NAME1 = Current Position of axis1\n# END_HEADER \n";

    let mut group = c.benchmark_group("parse");
    group.bench_function("one_item_dict", |b| {
        b.iter(|| one_item_dict(black_box(&reply), None, KeyConv::Int, &[ValueConv::Float]))
    });
    group.bench_function("gcs_header", |b| b.iter(|| gcs_header(black_box(header))));
    group.finish();
}

fn bulk_benchmark(c: &mut Criterion) {
    const ROWS: usize = 1000;
    let mut chunks = vec!["# NDATA = 1000\n# END_HEADER \n".to_string()];
    chunks.extend((0..ROWS).map(|i| {
        let eol = if i + 1 == ROWS { "\n" } else { " \n" };
        format!("{i}.5 {}.25{eol}", i * 2)
    }));
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("bulk");
    group.throughput(Throughput::Elements(ROWS as u64));
    group.bench_function("read_gcsdata", |b| {
        b.to_async(&runtime).iter(|| async {
            let (gateway, script) = ScriptedGateway::new();
            let chunks: Vec<&str> = chunks.iter().map(String::as_str).collect();
            script.expect_chunks("DRR? 1 1000 1 2", &chunks);
            script.on("ERR?", "0\n");

            let mut messages = GcsMessages::new(Box::new(gateway));
            messages
                .read_gcsdata("DRR? 1 1000 1 2", GcsData::Rows(ROWS))
                .await
                .unwrap();
            while messages.bufstate().unwrap() != BufState::Ready {
                tokio::task::yield_now().await;
            }
            black_box(messages.bufindex());
        })
    });
    group.finish();
}

criterion_group!(benches, eol_benchmark, parse_benchmark, bulk_benchmark);
criterion_main!(benches);
