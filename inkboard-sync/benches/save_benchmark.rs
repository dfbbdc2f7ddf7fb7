use criterion::{criterion_group, criterion_main, Criterion};
use inkboard_core::ops::shallow_patch;
use inkboard_core::{Board, DiffKind, DiffOp, Stroke};
use inkboard_sync::protocol::{encode_diff, parse_rev_from_token, select_protocol};
use inkboard_sync::CoordinatorConfig;
use serde_json::{json, Value};
use std::hint::black_box;

fn stroke(i: usize) -> Stroke {
    let points: Vec<f64> = (0..64).map(|p| (i * 64 + p) as f64).collect();
    Stroke::new(format!("stroke-{i}"))
        .with("tool", "pen")
        .with("color", "#1e1e1e")
        .with("points", json!(points))
}

fn board_with(strokes: usize) -> Board {
    let mut board = Board::new(100);
    for i in 0..strokes {
        board.add_stroke(stroke(i));
    }
    board
}

fn bench_encode_diff(c: &mut Criterion) {
    let ops: Vec<DiffOp> = (0..50)
        .map(|i| DiffOp::add(DiffKind::Stroke, "page-1", &stroke(i)).unwrap())
        .collect();

    c.bench_function("encode_diff_50_ops", |b| {
        b.iter(|| black_box(encode_diff(black_box(7), black_box(&ops)).unwrap()))
    });
}

fn bench_select_protocol_diff(c: &mut Criterion) {
    let config = CoordinatorConfig::default();
    let board = board_with(200);
    let state = board.document().to_value().unwrap();
    let ops: Vec<DiffOp> = board.pending_ops().ops().iter().take(10).cloned().collect();

    c.bench_function("select_protocol_small_diff", |b| {
        b.iter(|| black_box(select_protocol(&config, 1, black_box(&ops), black_box(&state)).unwrap()))
    });
}

fn bench_select_protocol_stream(c: &mut Criterion) {
    let config = CoordinatorConfig::default();
    let board = board_with(2_000);
    let state = board.document().to_value().unwrap();

    c.bench_function("select_protocol_stream_2000_strokes", |b| {
        b.iter(|| black_box(select_protocol(&config, 1, &[], black_box(&state)).unwrap()))
    });
}

fn bench_shallow_patch(c: &mut Criterion) {
    let before = serde_json::to_value(stroke(1)).unwrap();
    let mut after: Value = before.clone();
    after["color"] = json!("#ff0000");

    c.bench_function("shallow_patch_stroke", |b| {
        b.iter(|| black_box(shallow_patch(black_box(&before), black_box(&after))))
    });
}

fn bench_undo_redo(c: &mut Criterion) {
    let mut board = board_with(500);

    c.bench_function("undo_redo_500_entries", |b| {
        b.iter(|| {
            board.undo();
            board.redo();
        })
    });
}

fn bench_parse_rev(c: &mut Criterion) {
    c.bench_function("parse_rev_from_etag", |b| {
        b.iter(|| black_box(parse_rev_from_token(black_box("W/\"rev:123456\""))))
    });
}

criterion_group!(
    benches,
    bench_encode_diff,
    bench_select_protocol_diff,
    bench_select_protocol_stream,
    bench_shallow_patch,
    bench_undo_redo,
    bench_parse_rev,
);
criterion_main!(benches);
