//! ARMD - Arm Motion Daemon
//!
//! Interactive motion console for a manipulator with:
//! - Model-driven planning to presets and Cartesian poses
//! - Sequential execution with completion tracking
//! - Teleoperation session management
//! - Status inspection and immediate halt

use anyhow::{Context, Result};
use armd::{
    ArmService, AxisAlignedKinematics, ConsoleSink, ExecutionStatus, Goal, MoveOutcome,
    PlanResult, PlanningParams, RobotModel, ScriptedDevice, SimBackend, TeleopParams, Trajectory,
};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "armd")]
#[command(about = "Arm Motion Daemon - Interactive planning, execution and teleoperation console")]
#[command(version)]
struct Args {
    /// Path to the robot model file
    #[arg(short, long)]
    config: Option<String>,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("ARMD_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config_path = args.get_config_path();

    // Initialize tracing subscriber
    std::env::set_var("RUST_LOG", "info");
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    // Banner
    info!("Arm Motion Daemon (Rust)");
    info!("{}", "=".repeat(50));
    info!("Using config: {}", config_path);

    // Load the robot model and assemble the service around the simulated
    // backend. A hardware deployment swaps in its own ActuationBackend.
    let model =
        RobotModel::load_from_path(&config_path).context("Failed to load robot model")?;
    let dof = model.dof();
    let service = ArmService::new(
        model,
        Arc::new(AxisAlignedKinematics::new(dof)),
        Arc::new(SimBackend::new(dof)),
    )
    .context("Failed to create arm service")?
    .with_event_sink(Arc::new(ConsoleSink::new()));

    info!("Arm ready for commands!");

    let mut console = Console::new(service);
    console.run().await?;

    info!("Performing graceful shutdown");
    console.service.shutdown().await?;

    info!("Shutdown complete");
    Ok(())
}

/// Interactive console that reads newline-delimited commands from stdin.
struct Console {
    service: ArmService,
    last_plan: Option<Trajectory>,
    eof_logged: bool,
}

impl Console {
    fn new(service: ArmService) -> Self {
        Self {
            service,
            last_plan: None,
            eof_logged: false,
        }
    }

    /// Main command processing loop with immediate Ctrl+C handling.
    ///
    /// Reads newline-delimited commands from stdin, executes them
    /// sequentially, and waits for completion before processing the next
    /// command. Can be interrupted immediately by Ctrl+C for arm safety.
    async fn run(&mut self) -> Result<()> {
        info!("Motion console active - type 'help' for commands");
        info!("Use Ctrl+C to halt motion and exit");

        // Set up async stdin reader
        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut buffer = String::new();

        // Set up signal handlers
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            buffer.clear();

            tokio::select! {
                // Try to read a line from stdin
                line_result = reader.read_line(&mut buffer) => {
                    match line_result {
                        Ok(0) => {
                            // EOF reached - log once, then continue silently
                            if !self.eof_logged {
                                info!("End of input reached, continuing to wait for more commands...");
                                self.eof_logged = true;
                            }
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                            continue;
                        }
                        Ok(_) => {
                            let command = buffer.trim().to_string();
                            self.eof_logged = false;

                            // Skip empty lines and comment lines
                            if command.is_empty() || command.starts_with('#') {
                                continue;
                            }

                            match self.dispatch(&command).await {
                                Ok(ConsoleAction::Continue) => {}
                                Ok(ConsoleAction::Quit) => break,
                                Err(e) => {
                                    // Keep the console alive across command errors
                                    error!("Command failed: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Failed to read from stdin: {}", e);
                            break;
                        }
                    }
                }
                // Handle shutdown signals immediately
                _ = &mut shutdown => {
                    info!("Shutdown signal received - halting motion");
                    if let Err(e) = self.service.halt().await {
                        error!("Failed to halt motion: {}", e);
                    }

                    // Exit immediately to avoid terminal state issues
                    drop(reader);
                    use std::io::{Write, stdout, stderr};
                    let _ = stdout().flush();
                    let _ = stderr().flush();
                    std::process::exit(0);
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, command: &str) -> Result<ConsoleAction> {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["help"] => {
                print_help();
            }
            ["quit"] | ["exit"] => {
                return Ok(ConsoleAction::Quit);
            }
            ["status"] => {
                let status = self.service.status().await;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            ["halt"] => {
                self.service.halt().await?;
                println!("halted");
            }
            ["preset", name] | ["goto", name] => {
                let outcome = self
                    .service
                    .move_to(Goal::Named(name.to_string()), PlanningParams::Default)
                    .await?;
                print_outcome(&outcome);
            }
            ["pose", link, rest @ ..] => {
                let pose = parse_pose(rest)?;
                let goal = Goal::Pose {
                    link: link.to_string(),
                    pose,
                };
                let outcome = self.service.move_to(goal, PlanningParams::Default).await?;
                print_outcome(&outcome);
            }
            ["plan", "preset", name] => {
                self.plan(Goal::Named(name.to_string())).await?;
            }
            ["plan", "pose", link, rest @ ..] => {
                let pose = parse_pose(rest)?;
                self.plan(Goal::Pose {
                    link: link.to_string(),
                    pose,
                })
                .await?;
            }
            ["execute"] => match self.last_plan.clone() {
                Some(trajectory) => {
                    let report = self.service.execute_and_wait(trajectory, None).await?;
                    print_report(&report.status);
                }
                None => println!("no cached plan - run 'plan' first"),
            },
            ["teleop", "start", link] => {
                // The console has no physical input device attached, so an
                // idle device holds the session open until 'teleop stop'.
                let id = self
                    .service
                    .start_teleop(
                        Arc::new(ScriptedDevice::idle()),
                        link,
                        TeleopParams::default(),
                    )
                    .await?;
                println!("teleoperation active (session {})", id);
            }
            ["teleop", "stop"] => {
                self.service.stop_teleop().await?;
                println!("teleoperation stopped");
            }
            _ => {
                println!("unrecognized command: '{}' - type 'help'", command);
            }
        }
        Ok(ConsoleAction::Continue)
    }

    async fn plan(&mut self, goal: Goal) -> Result<()> {
        let mut session = self.service.planning_session();
        session.set_goal_state(goal)?;
        match session.plan(PlanningParams::Default).await? {
            PlanResult::Planned {
                trajectory,
                pipeline,
                planning_time_s,
            } => {
                println!(
                    "planned {} waypoints, {:.2}s motion via '{}' ({:.1}ms)",
                    trajectory.len(),
                    trajectory.total_time,
                    pipeline,
                    planning_time_s * 1000.0,
                );
                self.last_plan = Some(trajectory);
            }
            PlanResult::Failure { reason } => {
                println!("planning failed: {}", reason);
                self.last_plan = None;
            }
        }
        Ok(())
    }
}

enum ConsoleAction {
    Continue,
    Quit,
}

/// Resolves on Ctrl+C, or on SIGTERM where that exists.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            result = signal::ctrl_c() => result.expect("Failed to install Ctrl+C handler"),
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
}

fn parse_pose(words: &[&str]) -> Result<[f64; 6]> {
    if words.len() != 6 {
        anyhow::bail!("expected 6 pose values (x y z rx ry rz), got {}", words.len());
    }
    let mut pose = [0.0; 6];
    for (slot, word) in pose.iter_mut().zip(words) {
        *slot = word
            .parse::<f64>()
            .with_context(|| format!("invalid pose value '{}'", word))?;
    }
    Ok(pose)
}

fn print_outcome(outcome: &MoveOutcome) {
    match outcome {
        MoveOutcome::Executed(report) => print_report(&report.status),
        MoveOutcome::PlanningFailed { reason } => println!("planning failed: {}", reason),
    }
}

fn print_report(status: &ExecutionStatus) {
    match status {
        ExecutionStatus::Succeeded { waypoints_total } => {
            println!("ok: goal reached ({} waypoints)", waypoints_total)
        }
        ExecutionStatus::Failed {
            reason,
            waypoints_done,
            waypoints_total,
        } => println!(
            "failed after {}/{} waypoints: {}",
            waypoints_done, waypoints_total, reason
        ),
        ExecutionStatus::Aborted {
            waypoints_done,
            waypoints_total,
        } => println!("aborted after {}/{} waypoints", waypoints_done, waypoints_total),
        other => println!("finished: {:?}", other),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  preset <name>                  plan to a named preset and execute ('goto' works too)");
    println!("  pose <link> x y z rx ry rz     plan to a Cartesian pose and execute");
    println!("  plan preset <name>             plan only, cache the trajectory");
    println!("  plan pose <link> x y z rx ry rz");
    println!("  execute                        execute the cached plan");
    println!("  teleop start <link>            open a teleoperation session");
    println!("  teleop stop                    close the teleoperation session");
    println!("  status                         print a status snapshot");
    println!("  halt                           stop all motion");
    println!("  quit                           exit");
}
