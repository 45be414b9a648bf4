use criterion::{Criterion, black_box, criterion_group, criterion_main};
use trialrig_core::scheduler::{nth_permutation, order_for};

pub fn bench_order(c: &mut Criterion) {
    let mut g = c.benchmark_group("counterbalance");
    // Quick runs without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 cargo bench -p trialrig_core --bench scheduler
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }

    for n in [3usize, 6, 10, 20] {
        let labels: Vec<String> = (0..n).map(|i| format!("C{i}")).collect();
        g.bench_function(format!("order_for_{n}"), |b| {
            b.iter(|| order_for(black_box("P-0042"), black_box(&labels)));
        });
        g.bench_function(format!("nth_permutation_{n}"), |b| {
            b.iter(|| nth_permutation(black_box(&labels), black_box(41)));
        });
    }
    g.finish();
}

criterion_group!(scheduler, bench_order);
criterion_main!(scheduler);
