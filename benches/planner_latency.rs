//! Per-tick planner latency
//!
//! One control tick of each planner against a crowded frame, plus a full
//! facade tick over a team of robots.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Vector2;
use std::time::Duration;

use ssl_local_planner::common::obstacles_from_frame;
use ssl_local_planner::control::HorizonOptimizer;
use ssl_local_planner::path_planning::DynamicWindowPlanner;
use ssl_local_planner::{
    LocalPlanner, MotionPlanningConfig, MotionPlanningFacade, Obstacle, PlanRequest, PlannerKind, RobotId,
    RobotKinematicState,
};

/// Two rows of robots facing each other across the centre line
fn crowded_frame(per_team: u8) -> Vec<RobotKinematicState> {
    (0..2 * per_team)
        .map(|i| {
            let side = if i < per_team { -1.0 } else { 1.0 };
            let row = f64::from(i % per_team);
            RobotKinematicState::new(
                RobotId(i),
                [side * 0.8, row * 0.4 - 1.0],
                [-side * 0.5, 0.0],
                0.0,
                2.0,
                3.0,
            )
        })
        .collect()
}

fn bench_single_tick(c: &mut Criterion) {
    let frame = crowded_frame(6);
    let state = frame[0];
    let obstacles: Vec<Obstacle> = obstacles_from_frame(&frame, state.id, 0.09);
    let target = Vector2::new(1.5, -1.0);

    let mut group = c.benchmark_group("single_tick");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(3));

    let mut dwa = DynamicWindowPlanner::with_defaults().expect("dwa setup");
    group.bench_function("dwa/plan", |b| {
        b.iter(|| black_box(dwa.plan(black_box(&state), target, black_box(&obstacles)).is_ok()))
    });

    let mut mpc = HorizonOptimizer::with_defaults().expect("mpc setup");
    group.bench_function("mpc/plan", |b| {
        b.iter(|| black_box(mpc.plan(black_box(&state), target, black_box(&obstacles)).is_ok()))
    });

    group.finish();
}

fn bench_facade_tick(c: &mut Criterion) {
    let frame = crowded_frame(6);
    let requests: Vec<PlanRequest> = frame
        .iter()
        .map(|robot| {
            let target = [-robot.position.x, robot.position.y];
            PlanRequest::new(*robot, target, obstacles_from_frame(&frame, robot.id, 0.09))
        })
        .collect();

    let mut group = c.benchmark_group("facade_tick");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(3));

    for kind in [PlannerKind::Dwa, PlannerKind::Mpc] {
        let mut config = MotionPlanningConfig::default();
        config.planner = kind;
        let mut facade = MotionPlanningFacade::new(config).expect("facade setup");
        let name = format!("{:?}/plan_all_12", kind).to_lowercase();
        group.bench_function(name.as_str(), |b| b.iter(|| black_box(facade.plan_all(black_box(&requests)))));
    }

    group.finish();
}

criterion_group!(benches, bench_single_tick, bench_facade_tick);
criterion_main!(benches);
