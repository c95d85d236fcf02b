//! PETRI dedicated server.
//!
//! Binds a UDP endpoint, runs the authoritative dish simulation at a
//! fixed tick rate, and replicates entity state to every connected
//! client. The server is the only truth: clients send inputs, the
//! server sends snapshots.
//!
//! ## Usage
//!
//! ```text
//! petri_server [OPTIONS]
//! ```
//!
//! Run with `--help` for the full option list.

use std::time::{Duration, Instant};

use petri_networking::server::TickPacer;
use petri_networking::{PetriServer, ServerConfig, UdpEndpoint};
use petri_shared::constants::{AI_COUNT, MAX_CLIENTS, SERVER_PORT, TICK_RATE};

fn main() {
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    PETRI DEDICATED SERVER                     ║");
    println!("║                  the dish is the only truth                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<String> = None;
    let mut port: Option<u16> = None;
    let mut tick_rate: Option<u32> = None;
    let mut max_clients: Option<usize> = None;
    let mut ai_count: Option<usize> = None;
    let mut seed: Option<u64> = None;
    let mut duration_secs: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--tick-rate" | "-t" => {
                if i + 1 < args.len() {
                    tick_rate = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--max-clients" | "-m" => {
                if i + 1 < args.len() {
                    max_clients = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--ai-count" | "-a" => {
                if i + 1 < args.len() {
                    ai_count = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    seed = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().ok();
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

    let mut config = match config_path {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) => match ServerConfig::from_toml_str(&text) {
                Ok(config) => config,
                Err(error) => {
                    eprintln!("Failed to parse {path}: {error}");
                    std::process::exit(1);
                }
            },
            Err(error) => {
                eprintln!("Failed to read {path}: {error}");
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    if let Some(port) = port {
        config.port = port;
    }
    if let Some(tick_rate) = tick_rate {
        config.tick_rate = tick_rate;
    }
    if let Some(max_clients) = max_clients {
        config.max_clients = max_clients;
    }
    if let Some(ai_count) = ai_count {
        config.ai_count = ai_count;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }

    println!("┌─ CONFIGURATION ───────────────────────────────────────────────┐");
    println!("│ {:<16}{:<45} │", "Bind:", config.bind_addr());
    println!("│ {:<16}{:<45} │", "Tick rate:", format!("{} Hz", config.tick_rate));
    println!("│ {:<16}{:<45} │", "Max clients:", config.max_clients);
    println!("│ {:<16}{:<45} │", "AI cells:", config.ai_count);
    println!("│ {:<16}{:<45} │", "World seed:", config.seed);
    match duration_secs {
        Some(secs) => println!("│ {:<16}{:<45} │", "Duration:", format!("{secs} s")),
        None => println!("│ {:<16}{:<45} │", "Duration:", "until interrupted"),
    }
    println!("└───────────────────────────────────────────────────────────────┘");
    println!();

    let mut endpoint = match UdpEndpoint::bind(&config.bind_addr()) {
        Ok(endpoint) => endpoint,
        Err(error) => {
            eprintln!("Failed to bind {}: {error}", config.bind_addr());
            std::process::exit(1);
        }
    };

    if let Ok(addr) = endpoint.local_addr() {
        println!("Listening on {addr}");
        println!();
    }

    let (mut server, event_tx, outgoing_rx) = PetriServer::new(config);
    let mut pacer = TickPacer::new(server.config().tick_rate);

    let start = Instant::now();
    let duration = duration_secs.map(Duration::from_secs);
    let report_interval = u64::from(server.config().tick_rate) * 5;

    loop {
        if let Some(limit) = duration {
            if start.elapsed() >= limit {
                break;
            }
        }

        pacer.wait_for_due();

        for _ in 0..pacer.due_ticks() {
            let tick_start = Instant::now();

            endpoint.pump(&event_tx);
            server.tick();
            endpoint.flush(&outgoing_rx);

            pacer.record(tick_start.elapsed());

            if pacer.tick_count() % report_interval == 0 {
                print_status(&server, &endpoint, &pacer, start);
                pacer.reset_stats();
            }
        }
    }

    print_shutdown(&server, &endpoint, &pacer, start);
}

/// Prints a status box covering the last report window.
fn print_status(server: &PetriServer, endpoint: &UdpEndpoint, pacer: &TickPacer, start: Instant) {
    let stats = pacer.stats();
    let net = endpoint.stats();
    let late_percent = stats.late_ticks * 100 / stats.ticks.max(1);

    println!("┌─ STATUS ──────────────────────────────────────────────────────┐");
    println!("│ {:<16}{:<45} │", "Uptime:", format!("{} s", start.elapsed().as_secs()));
    println!(
        "│ {:<16}{:<45} │",
        "Clients:",
        format!("{} / {}", server.active_connections(), server.config().max_clients)
    );
    println!("│ {:<16}{:<45} │", "Entities:", server.world().entities().len());
    println!("│ {:<16}{:<45} │", "World tick:", server.world().tick());
    println!(
        "│ {:<16}{:<45} │",
        "Tick time:",
        format!("{} us avg / {} us worst", stats.avg_us(), stats.worst_us)
    );
    println!(
        "│ {:<16}{:<45} │",
        "Late ticks:",
        format!("{} ({late_percent}%)", stats.late_ticks)
    );
    println!(
        "│ {:<16}{:<45} │",
        "Packets:",
        format!("{} in / {} out", net.packets_received, net.packets_sent)
    );
    println!("│ {:<16}{:<45} │", "Resent:", net.frames_resent);
    println!("└───────────────────────────────────────────────────────────────┘");
}

/// Prints the final summary after the run ends.
fn print_shutdown(server: &PetriServer, endpoint: &UdpEndpoint, pacer: &TickPacer, start: Instant) {
    let net = endpoint.stats();

    println!();
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║                        SERVER SHUTDOWN                        ║");
    println!("╠═══════════════════════════════════════════════════════════════╣");
    println!("║ {:<16}{:<45} ║", "Uptime:", format!("{} s", start.elapsed().as_secs()));
    println!("║ {:<16}{:<45} ║", "Total ticks:", pacer.tick_count());
    println!("║ {:<16}{:<45} ║", "World tick:", server.world().tick());
    println!("║ {:<16}{:<45} ║", "Clients:", server.active_connections());
    println!("║ {:<16}{:<45} ║", "Entities:", server.world().entities().len());
    println!(
        "║ {:<16}{:<45} ║",
        "Packets:",
        format!("{} in / {} out", net.packets_received, net.packets_sent)
    );
    println!(
        "║ {:<16}{:<45} ║",
        "Traffic:",
        format!("{} KiB in / {} KiB out", net.bytes_received / 1024, net.bytes_sent / 1024)
    );
    println!("║ {:<16}{:<45} ║", "Resent:", net.frames_resent);
    println!("╚═══════════════════════════════════════════════════════════════╝");
}

fn print_help() {
    println!("PETRI dedicated server");
    println!();
    println!("USAGE:");
    println!("    petri_server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>        Load settings from a TOML file");
    println!("    -p, --port <PORT>          UDP port to listen on [default: {SERVER_PORT}]");
    println!("    -t, --tick-rate <HZ>       Simulation rate [default: {TICK_RATE}]");
    println!("    -m, --max-clients <N>      Connection slots [default: {MAX_CLIENTS}]");
    println!("    -a, --ai-count <N>         Wandering AI cells [default: {AI_COUNT}]");
    println!("    -s, --seed <SEED>          World RNG seed [default: 0]");
    println!("    -d, --duration <SECS>      Stop after this many seconds");
    println!("    -h, --help                 Show this help");
    println!();
    println!("CLI flags override values loaded with --config.");
}
