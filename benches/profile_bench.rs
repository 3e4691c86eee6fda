// Benchmarks for profile generation, the start-delay search and transfer planning
// Run with: cargo bench

use std::sync::Arc;

use capillary_rs::config::ProfileConfig;
use capillary_rs::hardware::AxisLimits;
use capillary_rs::hardware::sim::{CommandLog, SimAxis, SimStage};
use capillary_rs::motion::{Direction, Point3, ProfileGenerator, SafeMove, get_delay};
use capillary_rs::template::{Bounds, Shape, Template};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const LIMITS: AxisLimits = AxisLimits {
    velocity_max: 5.0,
    acceleration: 20.0,
    jerk: 5.0,
};

fn bench_profiles(c: &mut Criterion) {
    let generator = ProfileGenerator::default();
    c.bench_function("profile 60mm cruise", |b| {
        b.iter(|| generator.compute(black_box(60.0), LIMITS).unwrap())
    });
    c.bench_function("profile 2mm short move", |b| {
        b.iter(|| generator.compute(black_box(2.0), LIMITS).unwrap())
    });
}

fn bench_delay(c: &mut Criterion) {
    let generator = ProfileGenerator::default();
    let rise = generator.compute(7.0, LIMITS).unwrap().offset(3.0);
    let ledge: Vec<f64> = (0..14_000)
        .map(|k| if (5_000..9_000).contains(&k) { 10.0 } else { 0.0 })
        .collect();
    c.bench_function("get_delay rising 14k samples", |b| {
        b.iter(|| get_delay(black_box(&rise), black_box(&ledge), 0.5, Direction::Rising))
    });
}

fn bench_plan(c: &mut Criterion) {
    let log = CommandLog::new();
    let profile = ProfileConfig::default();
    let template = Template::new(Bounds::new(0.0, 0.0, 100.0, 100.0))
        .with_ledge("wall", Shape::rectangle(50.0, 50.0, 20.0, 100.0), 10.0)
        .unwrap();
    let planner = SafeMove::new(
        Arc::new(template),
        Arc::new(SimAxis::new("inlet_z", LIMITS, 3.0, profile.clone(), log.clone())),
        Arc::new(SimStage::new(
            SimAxis::new("x", LIMITS, 20.0, profile.clone(), log.clone()),
            SimAxis::new("y", LIMITS, 20.0, profile.clone(), log.clone()),
            log,
        )),
        ProfileGenerator::new(profile),
        0.5,
    );
    c.bench_function("plan transfer over wall", |b| {
        b.iter(|| {
            planner
                .plan(Point3::new(20.0, 20.0, 3.0), black_box(Point3::new(80.0, 20.0, 3.0)))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_profiles, bench_delay, bench_plan);
criterion_main!(benches);
