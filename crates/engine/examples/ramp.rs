//! Stress Ramp Example
//!
//! Ramps a simulated checkout flow through increasing concurrency levels and
//! prints where it stops meeting thresholds. The simulated service slows
//! down and starts shedding requests as load rises.
//!
//! Configuration comes from `LOADSWARM_*` environment variables, e.g.
//! `LOADSWARM_STRESS_COOLDOWN_SECONDS=0`.
//!
//! Run with: cargo run --example ramp -p loadswarm-engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loadswarm_engine::config::EnvConfigSource;
use loadswarm_engine::telemetry::{init_telemetry, TelemetryConfig};
use loadswarm_engine::{LoadEngine, LoadStep, Scenario, ScenarioError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::from_env());

    println!("=== Stress Ramp Example ===\n");

    let engine = LoadEngine::from_source(&EnvConfigSource::default())?;
    let scenario = simulated_checkout();

    // Warm-up: one short step at low load
    let warm_up = engine
        .runner()
        .run_load_step(&scenario, LoadStep::new(2, Duration::from_secs(1)))
        .await;
    println!("{}\n", warm_up.verdict());

    // Ramp through increasing levels
    let stress = engine.stress_test(vec![5, 20, 60, 120], Duration::from_secs(3))?;
    let report = stress.run(&engine.runner(), &scenario).await;
    report.report(engine.sink().as_ref());

    for step in &report.steps {
        println!("{}", step.verdict());
    }
    println!("\n{}", report.breaking_point);
    match report.safe_concurrency() {
        Some(users) => println!("Safe concurrency: {users} users"),
        None => println!("No level met thresholds"),
    }

    engine.shutdown().await?;
    println!("\n=== Ramp completed ===");
    Ok(())
}

/// A service whose latency grows with in-flight requests and which rejects
/// work above a hard limit
fn simulated_checkout() -> Scenario {
    const BASE_LATENCY_MS: u64 = 20;
    const REJECT_ABOVE: usize = 80;

    let in_flight = Arc::new(AtomicUsize::new(0));
    Scenario::new("checkout", move |ctx| {
        let in_flight = Arc::clone(&in_flight);
        async move {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.set_attribute("in_flight", current as u64);

            let result = if current > REJECT_ABOVE {
                tokio::time::sleep(Duration::from_millis(BASE_LATENCY_MS)).await;
                Err(ScenarioError::new("HTTP 503 Service Unavailable"))
            } else {
                let latency = BASE_LATENCY_MS + (current as u64).pow(2) / 4;
                tokio::time::sleep(Duration::from_millis(latency)).await;
                Ok(())
            };

            in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    })
}
