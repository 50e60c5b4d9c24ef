use criterion::{criterion_group, criterion_main, Criterion, black_box};
use marlin_harness::codec::{self, Command, RawReply};
use std::time::Duration;

fn lines(text: &str) -> RawReply {
    RawReply::new(text.lines().map(str::to_string).collect())
}

pub fn bench_decode(c: &mut Criterion) {
    let m122 = Command::new("M122").unwrap();
    let table = lines(
        "\tX\tY\tZ\tE\nEnabled\tfalse\tfalse\tfalse\tfalse\nSet current\t800\t800\t800\t650\nmsteps\t16\t16\t16\t16\nstealthChop\ttrue\ttrue\ttrue\tfalse\nTesting X connection... OK\nok",
    );
    c.bench_function("decode_driver_table", |b| {
        b.iter(|| black_box(codec::decode(black_box(&m122), black_box(&table))))
    });

    let m105 = Command::new("M105").unwrap();
    let temps = lines("ok T:21.30 /0.00 B:20.90 /0.00 @:0 B@:0");
    c.bench_function("decode_temperature", |b| {
        b.iter(|| black_box(codec::decode(black_box(&m105), black_box(&temps))))
    });
}

pub fn bench_encode(c: &mut Criterion) {
    c.bench_function("parse_and_encode_move", |b| {
        b.iter(|| {
            let command = Command::parse(black_box("G1 X10.5 Y-3 F1000")).unwrap();
            black_box(command.encode())
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_decode, bench_encode
}
criterion_main!(benches);
