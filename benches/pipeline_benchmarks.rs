use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sleeprs::store::PeriodQuery;
use sleeprs::{
    MemoryStore, PeriodGrouper, PeriodMerger, SleepScoreCalculator, SleepSession, SleepStage,
    SleepStore, StageSample, UnitOfWork,
};

/// Performance benchmarks for the reconciliation pipeline
///
/// Sample counts approximate one to several months of nightly stage data.

const SOURCE: &str = "com.apple.health.bench";

fn night_start(night: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap() + Duration::days(night as i64)
}

fn create_stage_dataset(nights: usize) -> Vec<StageSample> {
    let stages = [
        SleepStage::Core,
        SleepStage::Deep,
        SleepStage::Core,
        SleepStage::Rem,
        SleepStage::Awake,
    ];

    (0..nights)
        .flat_map(|night| {
            let start = night_start(night);
            (0..48).map(move |i| {
                let from = start + Duration::minutes(10 * i as i64);
                StageSample::new(
                    format!("bench-{}-{}", night, i),
                    stages[i % stages.len()],
                    from,
                    from + Duration::minutes(10),
                    SOURCE,
                    "Watch6,2",
                )
            })
        })
        .collect()
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("Period Grouping");
    let grouper = PeriodGrouper::default();

    for &nights in &[1, 30, 90, 365] {
        let samples = create_stage_dataset(nights);

        group.throughput(Throughput::Elements(samples.len() as u64));
        group.bench_with_input(BenchmarkId::new("group", nights), &samples, |b, samples| {
            b.iter(|| grouper.group(black_box(samples.clone())));
        });
    }

    group.finish();
}

fn bench_fragment_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fragment Merge");
    let grouper = PeriodGrouper::default();
    let merger = PeriodMerger::default();

    for &nights in &[7, 30, 90] {
        // Every other sample arrives late, leaving stored fragments to merge
        let samples = create_stage_dataset(nights);
        let (even, odd): (Vec<_>, Vec<_>) = samples
            .into_iter()
            .enumerate()
            .partition(|(i, _)| (i / 6) % 2 == 0);
        let first: Vec<StageSample> = even.into_iter().map(|(_, s)| s).collect();
        let late: Vec<StageSample> = odd.into_iter().map(|(_, s)| s).collect();

        group.throughput(Throughput::Elements(nights as u64));
        group.bench_with_input(
            BenchmarkId::new("merge", nights),
            &(first, late),
            |b, (first, late)| {
                b.iter(|| {
                    let store = MemoryStore::new();
                    let mut uow = UnitOfWork::new(&store);
                    let mut ids = Vec::new();
                    for period in grouper
                        .group(first.clone())
                        .into_iter()
                        .chain(grouper.group(late.clone()))
                    {
                        ids.push(period.id.clone());
                        uow.upsert_period(period);
                    }
                    let report = merger.merge(&mut uow, &ids).unwrap();
                    uow.save().unwrap();
                    black_box(report)
                });
            },
        );
    }

    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sleep Score");
    let calculator = SleepScoreCalculator::default();

    let store = MemoryStore::new();
    let mut uow = UnitOfWork::new(&store);
    for period in PeriodGrouper::default().group(create_stage_dataset(1)) {
        uow.upsert_period(period);
    }
    uow.save().unwrap();

    let periods = store.fetch_periods(&PeriodQuery::all()).unwrap();
    let mut session = SleepSession::new(night_start(0).date_naive());
    session.update_from_primary_sleep_period(periods.first());

    group.bench_function("calculate", |b| {
        b.iter(|| calculator.calculate(black_box(&session)));
    });

    group.finish();
}

criterion_group!(benches, bench_grouping, bench_fragment_merge, bench_scoring);

criterion_main!(benches);
