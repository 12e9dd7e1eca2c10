use criterion::{black_box, criterion_group, criterion_main, Criterion};
use et_core::{AppearanceWindow, DayPhase, WeatherExpr, WeatherSet, WeatherTable, ZoneKey};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn sample_instants(n: usize) -> Vec<i64> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    (0..n)
        .map(|_| rng.gen_range(1_600_000_000_000i64..1_900_000_000_000i64))
        .collect()
}

fn bench_evaluators(c: &mut Criterion) {
    let table = WeatherTable::builtin();
    let zone = ZoneKey("centralThanalan".into());
    let instants = sample_instants(256);
    let rare = WeatherExpr::parse("扬沙");
    let clear = WeatherSet::parse("碧空|晴朗");
    let window = AppearanceWindow::from_fields(Some("11:10"), Some("14:10")).unwrap();

    c.bench_function("weather countdown (rare weather)", |b| {
        b.iter(|| {
            for &t in &instants {
                black_box(fate_countdown::weather_countdown(&table, &zone, &rare, t));
            }
        })
    });
    c.bench_function("combined window countdown", |b| {
        b.iter(|| {
            for &t in &instants {
                black_box(fate_countdown::combined_window_countdown(
                    &table,
                    &zone,
                    &window,
                    Some(&clear),
                    Some(DayPhase::Day),
                    t,
                ));
            }
        })
    });
    c.bench_function("weather and night countdown", |b| {
        b.iter(|| {
            for &t in &instants {
                black_box(fate_countdown::weather_and_time_countdown(
                    &table,
                    &zone,
                    &rare,
                    DayPhase::Night,
                    t,
                ));
            }
        })
    });
}

criterion_group!(benches, bench_evaluators);
criterion_main!(benches);
