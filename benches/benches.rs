use criterion::{black_box, criterion_group, criterion_main, Criterion};

use buildmap::builder::Builder;
use buildmap::dictionary::Dictionary;
use buildmap::point::PointTable;

fn dictionary_benchmarks(c: &mut Criterion) {
    let names: Vec<String> = (0..1000).map(|index| format!("Street {}", index)).collect();

    c.bench_function("interning new strings", |b| {
        b.iter(|| {
            let mut dictionary = Dictionary::new();
            let volume = dictionary.open("street").unwrap();
            for name in names.iter() {
                black_box(dictionary.add(volume, name).unwrap());
            }
        })
    });

    c.bench_function("interning known strings", |b| {
        let mut dictionary = Dictionary::new();
        let volume = dictionary.open("street").unwrap();
        for name in names.iter() {
            let _ = dictionary.add(volume, name).unwrap();
        }

        b.iter(|| {
            for name in names.iter() {
                black_box(dictionary.add(volume, name).unwrap());
            }
        })
    });
}

fn point_benchmarks(c: &mut Criterion) {
    c.bench_function("adding and sorting points", |b| {
        b.iter(|| {
            let mut points = PointTable::new();
            for index in 0..10_000 {
                let _ = points.add((index % 100) * 50_000, (index / 100) * 50_000);
                let _ = points.add((index % 100) * 50_000, (index / 100) * 50_000);
            }
            points.sort().unwrap();
            black_box(points.len());
        })
    });
}

fn session_benchmarks(c: &mut Criterion) {
    c.bench_function("building a grid of lines", |b| {
        b.iter(|| {
            let mut session = Builder::new().build().unwrap();
            for index in 0..1000 {
                let from = session.points.add(index * 1000, 0);
                let to = session.points.add(index * 1000 + 1000, 0);
                let _ = session.lines.add(index, 1, from, to).unwrap();
            }
            black_box(session.build_in_memory().unwrap());
        })
    });
}

criterion_group!(
    benches,
    dictionary_benchmarks,
    point_benchmarks,
    session_benchmarks
);
criterion_main!(benches);
