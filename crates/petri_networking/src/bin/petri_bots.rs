//! PETRI bot swarm.
//!
//! Runs a fleet of predicted clients against an in-process server over
//! a synthetic link with configurable latency, jitter, and loss, then
//! reports how well the dish replicated: position error between each
//! bot's predicted cell and the server's truth, and how often bots had
//! to resimulate after a mispredicted snapshot.
//!
//! No sockets are involved; the link is deterministic, so a seed
//! reproduces a run exactly.

use std::time::Instant;

use petri_networking::simulation::{BotSwarm, LinkConditions};
use petri_networking::{ClientState, ServerConfig};

fn main() {
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║                        PETRI BOT SWARM                        ║");
    println!("║                 replication under a bad link                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();

    let mut bot_count: usize = 50;
    let mut duration_secs: u64 = 30;
    let mut ai_count: usize = 10;
    let mut seed: u64 = 0;
    let mut conditions = LinkConditions::AVERAGE;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bots" | "-b" => {
                if i + 1 < args.len() {
                    bot_count = args[i + 1].parse().unwrap_or(50);
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().unwrap_or(30);
                    i += 1;
                }
            }
            "--ai-count" | "-a" => {
                if i + 1 < args.len() {
                    ai_count = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    seed = args[i + 1].parse().unwrap_or(0);
                    i += 1;
                }
            }
            "--latency" => {
                if i + 1 < args.len() {
                    conditions.latency_ms = args[i + 1].parse().unwrap_or(60);
                    i += 1;
                }
            }
            "--jitter" => {
                if i + 1 < args.len() {
                    conditions.jitter_ms = args[i + 1].parse().unwrap_or(15);
                    i += 1;
                }
            }
            "--loss" => {
                if i + 1 < args.len() {
                    conditions.loss_percent = args[i + 1].parse().unwrap_or(2);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig {
        max_clients: bot_count.max(1),
        ai_count,
        seed,
        ..ServerConfig::default()
    };
    let tick_rate = config.tick_rate;

    println!("┌─ CONFIGURATION ───────────────────────────────────────────────┐");
    println!("│ {:<16}{:<45} │", "Bots:", bot_count);
    println!("│ {:<16}{:<45} │", "AI cells:", ai_count);
    println!("│ {:<16}{:<45} │", "Tick rate:", format!("{tick_rate} Hz"));
    println!("│ {:<16}{:<45} │", "Duration:", format!("{duration_secs} s simulated"));
    println!("│ {:<16}{:<45} │", "Latency:", format!("{} ms", conditions.latency_ms));
    println!("│ {:<16}{:<45} │", "Jitter:", format!("{} ms", conditions.jitter_ms));
    println!("│ {:<16}{:<45} │", "Loss:", format!("{}%", conditions.loss_percent));
    println!("│ {:<16}{:<45} │", "Seed:", seed);
    println!("└───────────────────────────────────────────────────────────────┘");
    println!();

    println!("Starting swarm...");
    let start = Instant::now();

    let mut swarm = BotSwarm::new(config, bot_count, conditions, seed);

    let total_steps = duration_secs * u64::from(tick_rate);
    let mut last_progress = 0;

    for step in 0..total_steps {
        swarm.step();

        let progress = (step + 1) * 100 / total_steps.max(1);
        if progress > last_progress && progress % 10 == 0 {
            print!("\r[");
            for mark in 0..10 {
                if mark < progress / 10 {
                    print!("█");
                } else {
                    print!("░");
                }
            }
            print!("] {progress}% - Step {}/{total_steps}", step + 1);
            last_progress = progress;
        }
    }
    println!();
    println!();

    let elapsed = start.elapsed();
    let stats = *swarm.stats();

    let active = (0..swarm.bot_count())
        .filter(|&index| swarm.bot(index).state() == ClientState::Active)
        .count();
    let corrections = swarm.corrections_total();

    #[allow(clippy::cast_precision_loss)]
    let simulated_secs = swarm.clock_ms() as f64 / 1000.0;
    let realtime_factor = simulated_secs / elapsed.as_secs_f64().max(1e-9);

    #[allow(clippy::cast_precision_loss)]
    let actual_loss = stats.messages_dropped as f64
        / (stats.messages_sent + stats.messages_dropped).max(1) as f64
        * 100.0;

    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║                        SWARM RESULTS                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();

    println!("┌─ TIMING ──────────────────────────────────────────────────────┐");
    println!("│ {:<16}{:<45} │", "Real time:", format!("{:.2} s", elapsed.as_secs_f64()));
    println!("│ {:<16}{:<45} │", "Simulated:", format!("{simulated_secs:.2} s"));
    println!("│ {:<16}{:<45} │", "Realtime:", format!("{realtime_factor:.2}x"));
    println!("│ {:<16}{:<45} │", "Link steps:", stats.ticks);
    println!("└───────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ NETWORK ─────────────────────────────────────────────────────┐");
    println!("│ {:<16}{:<45} │", "Delivered:", stats.messages_sent);
    println!("│ {:<16}{:<45} │", "Dropped:", stats.messages_dropped);
    println!("│ {:<16}{:<45} │", "Actual loss:", format!("{actual_loss:.2}%"));
    println!("│ {:<16}{:<45} │", "Bots active:", format!("{active} / {}", swarm.bot_count()));
    println!("└───────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ SMOOTHNESS ──────────────────────────────────────────────────┐");
    println!(
        "│ {:<16}{:<45} │",
        "Avg error:",
        format!("{:.4} units", stats.avg_position_error())
    );
    println!(
        "│ {:<16}{:<45} │",
        "Max error:",
        format!("{:.4} units", stats.max_position_error)
    );
    println!("│ {:<16}{:<45} │", "Corrections:", corrections);

    let smoothness_ok = stats.avg_position_error() < 0.5;
    if smoothness_ok {
        println!("│ {:<16}{:<45} │", "Status:", "✓ SMOOTH MOVEMENT");
    } else {
        println!("│ {:<16}{:<45} │", "Status:", "✗ TOO JERKY");
    }
    println!("└───────────────────────────────────────────────────────────────┘");
    println!();

    let all_joined = active == swarm.bot_count();

    println!("╔═══════════════════════════════════════════════════════════════╗");
    if smoothness_ok && all_joined {
        println!("║  ✓ DISH REPLICATED SMOOTHLY                                   ║");
        println!(
            "║    {:<58} ║",
            format!(
                "{bot_count} bots, {}% loss, {} ms jitter",
                conditions.loss_percent, conditions.jitter_ms
            )
        );
    } else {
        println!("║  ✗ REPLICATION DEGRADED                                       ║");
        if !all_joined {
            println!("║    Some bots never reached the active state                   ║");
        }
        if !smoothness_ok {
            println!("║    Predicted cells strayed too far from the truth             ║");
        }
    }
    println!("╚═══════════════════════════════════════════════════════════════╝");
}

fn print_help() {
    println!("PETRI bot swarm");
    println!();
    println!("USAGE:");
    println!("    petri_bots [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -b, --bots <N>             Predicted clients to run [default: 50]");
    println!("    -d, --duration <SECS>      Simulated seconds [default: 30]");
    println!("    -a, --ai-count <N>         Wandering AI cells [default: 10]");
    println!("    -s, --seed <SEED>          World and link RNG seed [default: 0]");
    println!("        --latency <MS>         One-way link latency [default: 60]");
    println!("        --jitter <MS>          Random extra delay [default: 15]");
    println!("        --loss <PERCENT>       Unreliable drop rate [default: 2]");
    println!("    -h, --help                 Show this help");
}
