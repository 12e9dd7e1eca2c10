use std::path::PathBuf;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use et_core::{FixedClock, WeatherTable, BELL_MS};
use persistence::MemoryStore;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracker_runtime::Tracker;

fn bench_refresh(c: &mut Criterion) {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/fate_data.json");
    let events = fate_data::load_events(path).unwrap();
    // Repeat the sample catalog so the board has a realistic number of rows.
    let catalog: Vec<_> = (0..40)
        .flat_map(|i| {
            events.iter().cloned().map(move |mut e| {
                e.name = format!("{}#{i}", e.name);
                e
            })
        })
        .collect();

    let clock = Arc::new(FixedClock::new(1_700_000_000_000));
    let mut tracker = Tracker::new(
        Box::new(Arc::clone(&clock)),
        WeatherTable::builtin(),
        Box::new(MemoryStore::default()),
    );
    tracker.load(fate_data::LoadState::Loaded(catalog));
    tracker.start();

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    c.bench_function("board_tick", |b| {
        b.iter(|| {
            clock.advance(rng.gen_range(0..BELL_MS));
            tracker.tick();
        })
    });
}

criterion_group!(benches, bench_refresh);
criterion_main!(benches);
