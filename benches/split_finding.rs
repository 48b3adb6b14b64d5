//! Micro-benchmark of the numeric cut scan.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use canopy::training::partition::ObsCell;
use canopy::training::sample::SumCount;
use canopy::training::splitting::cut::{find_cut, RegKernel};

fn cells(n: usize) -> Vec<ObsCell> {
    (0..n)
        .map(|i| ObsCell {
            rank: i as u32 / 4,
            s_count: 1,
            y_sum: ((i * 37) % 101) as f64,
            ctg: 0,
            tied: i % 4 != 0,
        })
        .collect()
}

fn bench_cut_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("cut_scan");
    for n in [1_000usize, 100_000] {
        let cells = cells(n);
        let sum: f64 = cells.iter().map(|c| c.y_sum).sum();
        let s_count = n as u32;
        let pre_bias = sum * sum / n as f64;
        group.bench_function(format!("reg_{n}"), |b| {
            b.iter(|| {
                let mut kernel = RegKernel::new(sum, s_count, SumCount::default(), 0);
                black_box(find_cut(&mut kernel, black_box(&cells), None, pre_bias))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cut_scan);
criterion_main!(benches);
