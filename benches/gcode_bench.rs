// Benchmark for G-code tokenizing and interpreter throughput
// Run with: cargo bench

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use virtual_printer::Config;
use virtual_printer::gcode::{Interpreter, parse_line, script_lines};
use virtual_printer::machine::Machine;

fn bench_gcode_parser(c: &mut Criterion) {
    let mut gcode = String::new();
    for i in 0..10_000 {
        gcode.push_str(&format!("G1 X{} Y{} F1500 ; move {}\n", i % 300, i % 300, i));
    }
    c.bench_function("parse 10k G1 lines", |b| {
        b.iter(|| {
            let count = script_lines(&gcode)
                .filter(|line| matches!(parse_line(line), Ok(Some(_))))
                .count();
            assert_eq!(count, 10_000);
        });
    });
}

fn bench_extended_commands(c: &mut Criterion) {
    let lines: Vec<String> = (0..1000)
        .map(|i| format!("SET_LED LED=\"neopixel chamber_light\" RED={:.3} GREEN=0.5 BLUE=1", i as f64 / 1000.0))
        .collect();
    c.bench_function("parse 1000 extended commands", |b| {
        b.iter(|| {
            let ok_count = lines.iter().filter(|l| parse_line(l).is_ok()).count();
            assert_eq!(ok_count, 1000);
        });
    });
}

fn bench_interpreter(c: &mut Criterion) {
    let interpreter = Interpreter::new();
    let mut machine = Machine::new(Arc::new(Config::default()));
    let script = (0..1000)
        .map(|i| format!("G1 X{} Y{}", i % 300, (i * 7) % 300))
        .collect::<Vec<_>>()
        .join("\n");
    c.bench_function("execute 1000 moves", |b| {
        b.iter(|| {
            assert!(interpreter.run_script(&mut machine, &script).is_ok());
        });
    });
}

criterion_group!(benches, bench_gcode_parser, bench_extended_commands, bench_interpreter);
criterion_main!(benches);
