// Local planner simulation: four robots swap sides of the field around a
// standing opponent while the facade plans every tick.
//
// usage: local_planner_sim [config.toml] [dwa|mpc]

use nalgebra::Vector2;
use tracing::{info, warn};

use ssl_local_planner::common::obstacles_from_frame;
use ssl_local_planner::geometry::SafetyEnvelope;
use ssl_local_planner::utils::{colors, PathStyle, Visualizer};
use ssl_local_planner::{
    MotionPlanningConfig, MotionPlanningFacade, Obstacle, PlanRequest, PlannerKind, PlanningResult, RobotId,
    RobotKinematicState,
};

const TICKS: usize = 600;
const OBSTACLE_RADIUS: f64 = 0.09;

fn main() -> PlanningResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ssl_local_planner=info,local_planner_sim=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match args.get(1) {
        Some(path) if !path.ends_with("dwa") && !path.ends_with("mpc") => {
            info!("loading configuration from {}", path);
            MotionPlanningConfig::from_file(path)?
        }
        _ => MotionPlanningConfig::default(),
    };
    match args.last().map(String::as_str) {
        Some("dwa") => config.planner = PlannerKind::Dwa,
        Some("mpc") => config.planner = PlannerKind::Mpc,
        _ => {}
    }
    let dt = config.limiter.dt;
    let envelope = SafetyEnvelope::new(config.dwa.envelope_config())?;
    let mut facade = MotionPlanningFacade::new(config)?;

    let starts = [[-1.5, -0.6], [-1.5, 0.6], [1.5, -0.6], [1.5, 0.6]];
    let targets: Vec<Vector2<f64>> = [[1.5, 0.6], [1.5, -0.6], [-1.5, 0.6], [-1.5, -0.6]]
        .iter()
        .map(|&t| Vector2::from(t))
        .collect();
    let mut robots: Vec<RobotKinematicState> = starts
        .iter()
        .enumerate()
        .map(|(i, &p)| RobotKinematicState::stationary(RobotId(i as u8), p, 2.0, 3.0))
        .collect();
    let opponent = RobotKinematicState::stationary(RobotId(10), [0.0, 0.0], 0.0, 0.0);

    let mut trajectories: Vec<Vec<Vector2<f64>>> = robots.iter().map(|r| vec![r.position]).collect();
    let mut fallbacks = 0usize;
    let mut min_separation = f64::INFINITY;

    for tick in 0..TICKS {
        let mut frame = robots.clone();
        frame.push(opponent);
        let requests: Vec<PlanRequest> = robots
            .iter()
            .zip(targets.iter())
            .map(|(robot, target)| PlanRequest::new(*robot, *target, obstacles_from_frame(&frame, robot.id, OBSTACLE_RADIUS)))
            .collect();

        let commands = facade.plan_all(&requests);
        for ((robot, command), trajectory) in robots.iter_mut().zip(commands.iter()).zip(trajectories.iter_mut()) {
            if command.diagnostics.fallback_used {
                fallbacks += 1;
            }
            robot.velocity = command.velocity();
            robot.position += robot.velocity * dt;
            if robot.speed() > 1e-6 {
                robot.heading = robot.velocity.y.atan2(robot.velocity.x);
            }
            trajectory.push(robot.position);
        }

        for (i, a) in frame.iter().enumerate() {
            for b in frame.iter().skip(i + 1) {
                min_separation = min_separation.min(a.distance_to(&b.position));
            }
        }

        let arrived = robots
            .iter()
            .zip(targets.iter())
            .all(|(robot, target)| robot.distance_to(target) < 0.02);
        if arrived {
            info!(tick, "all robots arrived");
            break;
        }
    }

    info!(
        planner = ?facade.config().planner,
        fallbacks,
        min_separation,
        "simulation finished"
    );
    if min_separation < 2.0 * OBSTACLE_RADIUS {
        warn!(min_separation, "robots overlapped");
    }

    let mut vis = Visualizer::new();
    vis.set_title("Local planner simulation")
        .set_x_range(-2.0, 2.0)
        .set_y_range(-1.5, 1.5);
    vis.plot_obstacles(&[Obstacle::from_robot(&opponent, OBSTACLE_RADIUS)]);
    for (i, trajectory) in trajectories.iter().enumerate() {
        let color = colors::ROBOTS[i % colors::ROBOTS.len()];
        vis.plot_trajectory(trajectory, &PathStyle::new(color, &RobotId(i as u8).to_string()));
    }
    for (robot, target) in robots.iter().zip(targets.iter()) {
        vis.plot_robot(robot, OBSTACLE_RADIUS, 0.5);
        vis.plot_envelope(&envelope.envelope_for(robot.position, robot.velocity), "");
        vis.plot_goal(*target);
    }

    let out = format!("{}/img/local_planner_sim.svg", env!("CARGO_MANIFEST_DIR"));
    if let Err(e) = vis.save_svg(&out) {
        warn!("could not save plot: {}", e);
    } else {
        info!("saved {}", out);
    }
    Ok(())
}
