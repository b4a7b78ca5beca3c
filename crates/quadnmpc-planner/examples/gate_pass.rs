//! Moving Gate Demonstration
//!
//! Flies the full quadrotor model through a gate swinging below a pivot,
//! then on to a goal behind it.
//!
//! Run with `RUST_LOG=info cargo run --example gate_pass [config.toml]`.

use log::{info, warn};

use quadnmpc_core::dynamics::ModelVariant;
use quadnmpc_core::Vec3;
use quadnmpc_planner::integration::matched_simulator;
use quadnmpc_planner::{
    GateMotion, MovingGate, MpcConfig, NmpcController, RecedingHorizonExecutor, Termination,
};

fn main() {
    pretty_env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match MpcConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => MpcConfig::for_model(ModelVariant::Full),
    };

    if let Err(e) = run(config) {
        eprintln!("gate pass failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: MpcConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Moving Gate Demonstration ===\n");

    let mut vehicle = matched_simulator(&config, None)?;
    let controller = NmpcController::new(config)?;
    println!(
        "Model: {}, horizon {} stages of {} s",
        controller.model().variant(),
        controller.horizon(),
        controller.dt()
    );

    let motion = GateMotion::default();
    let goal = Vec3::new(4.0, 0.0, 0.0);
    let mut gate = MovingGate::new(controller.model().as_ref(), motion, goal, controller.dt());
    let mut executor = RecedingHorizonExecutor::new(controller);

    // Stop once the vehicle is within 10 cm of the goal
    let report = executor.run(&mut vehicle, &mut gate, 100, |x, _| {
        (Vec3::new(x[0], x[1], x[2]) - goal).norm() < 0.1
    })?;

    // Closest approach to the gate centre
    let closest = report
        .ticks
        .iter()
        .map(|tick| {
            let p = Vec3::new(tick.state[0], tick.state[1], tick.state[2]);
            (tick.time, (p - motion.position(tick.time)).norm())
        })
        .fold((0.0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });

    let solve_ms: Vec<f64> = report
        .ticks
        .iter()
        .filter_map(|tick| tick.statistics.as_ref().map(|s| s.solve_time_ms))
        .collect();
    let mean_ms = solve_ms.iter().sum::<f64>() / solve_ms.len().max(1) as f64;

    println!("\n=== Results ===");
    println!("Ticks:             {}", report.ticks.len());
    println!("Termination:       {:?}", report.termination);
    println!("Held controls:     {}", report.held_ticks);
    println!("Closest approach:  {:.3} m at t = {:.1} s", closest.1, closest.0);
    println!("Mean solve time:   {:.2} ms", mean_ms);
    println!(
        "Final position:    [{:.3}, {:.3}, {:.3}]",
        report.final_state[0], report.final_state[1], report.final_state[2]
    );

    match report.termination {
        Termination::Stopped => info!("goal reached after {:.1} s", report.elapsed),
        Termination::Unstable => warn!("vehicle left the flight envelope"),
        Termination::MaxTicks => warn!("goal not reached within the tick budget"),
    }

    Ok(())
}
