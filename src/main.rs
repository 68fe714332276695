use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

mod logging;
mod notify;
mod pomodoro;
mod store;
mod tick;
mod ws;

use pomodoro::pomodoro::{
    LONG_BREAK_EVERY, POMODORO_LONG_BREAK_MINUTES, POMODORO_SHORT_BREAK_MINUTES,
    POMODORO_WORK_MINUTES,
};
use pomodoro::{Durations, Engine, Phase, TimerState, format_mm_ss};
use store::AudioStore;
use tick::{DEFAULT_TICK_MS, TickReceiver};
use ws::websocket_server::{self, ServerContext, lock_engine};

/// Focus/break interval timer with a WebSocket control daemon.
#[derive(Debug, Parser)]
#[command(name = "pomo_tick", version, about)]
struct Cli {
    /// Run the WebSocket control server instead of the terminal countdown
    #[arg(long)]
    daemon: bool,

    /// Address the daemon listens on
    #[arg(long, default_value = "127.0.0.1:8765")]
    addr: SocketAddr,

    /// Work session length in minutes
    #[arg(long, default_value_t = POMODORO_WORK_MINUTES)]
    work: u64,

    /// Short break length in minutes
    #[arg(long, default_value_t = POMODORO_SHORT_BREAK_MINUTES)]
    short_break: u64,

    /// Long break length in minutes
    #[arg(long, default_value_t = POMODORO_LONG_BREAK_MINUTES)]
    long_break: u64,

    /// Work sessions before a long break
    #[arg(long, default_value_t = LONG_BREAK_EVERY, value_parser = clap::value_parser!(u32).range(1..))]
    long_break_every: u32,

    /// Return to idle when a phase finishes instead of starting the next one
    #[arg(long)]
    no_auto_advance: bool,

    /// Tick interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    /// Directory holding uploaded audio files
    #[arg(long)]
    uploads: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(short, long)]
    log: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn engine(&self) -> Engine {
        Engine::new(
            Durations::from_minutes(self.work, self.short_break, self.long_break),
            !self.no_auto_advance,
            self.long_break_every,
        )
    }
}

fn data_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
        .join(".local/share/pomo_tick")
}

fn notify_finished(finished: Phase, next: &TimerState) {
    let message = notify::finished_message(finished, next);
    println!("\n🔔 {}", message);
    // Desktop notifications may block on the session bus.
    tokio::task::spawn_blocking(move || {
        if let Err(e) = notify::send_notification(&message) {
            warn!(error = %e, "failed to send notification");
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.daemon {
        let log_path = cli.log.clone().unwrap_or_else(|| data_dir().join("daemon.log"));
        let _guard = logging::init(cli.verbose, Some(&log_path));
        return run_daemon_mode(cli).await;
    }

    let _guard = logging::init(cli.verbose, cli.log.as_deref());

    println!("🍅 Pomo Tick - Focus/Break Timer");
    println!("======================================================");
    println!(
        "Settings: {}min work / {}min short break / {}min long break every {} sessions",
        cli.work, cli.short_break, cli.long_break, cli.long_break_every
    );
    println!("Press Ctrl+C to stop\n");

    let mut engine = cli.engine();
    engine.set_phase_preview(Phase::Work);
    engine.start(Phase::Work, None);

    let (tick_tx, tick_rx) = tick::create_tick_channel();
    let mut ticker = tick::connect(tick_tx);
    debug!(kind = ?ticker.kind(), "tick source connected");
    ticker.start(cli.tick_ms);

    println!(
        "{} Starting {} ({})\n",
        Phase::Work.emoji(),
        Phase::Work.label(),
        format_mm_ss(engine.state().remaining_ms)
    );

    tokio::select! {
        _ = run_terminal(&mut engine, tick_rx, cli.verbose) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
        }
    }

    ticker.stop();
    let state = engine.state();
    println!(
        "\nStopped in {} with {} left, {} work sessions in this cycle",
        state.phase.label(),
        format_mm_ss(state.remaining_ms),
        state.cycle_count
    );
    Ok(())
}

/// Terminal mode: print the countdown and phase switches until idle.
async fn run_terminal(engine: &mut Engine, mut ticks: TickReceiver, verbose: bool) {
    let mut last_second = u64::MAX;

    while let Some(tick) = ticks.recv().await {
        if let Some(finished) = engine.tick(tick.now()) {
            let state = engine.state();
            notify_finished(finished, state);
            if state.phase == Phase::Idle {
                info!(finished = %finished, "cycle stopped, auto-advance is off");
                break;
            }
            println!(
                "{} Switched to {} ({})",
                state.phase.emoji(),
                state.phase.label(),
                format_mm_ss(state.remaining_ms)
            );
        }

        let second = engine.state().remaining_ms / 1000;
        if verbose && second != last_second {
            last_second = second;
            println!("{}", format_mm_ss(engine.state().remaining_ms));
        }
    }
}

/// Run in daemon mode - WebSocket server + timer engine + notifications
async fn run_daemon_mode(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("🍅 Pomo Tick - Daemon Mode");
    println!("======================================================");
    println!("Running WebSocket server on ws://{}", cli.addr);

    let uploads = cli.uploads.clone().unwrap_or_else(|| data_dir().join("uploads"));
    let store = AudioStore::new(uploads);
    info!(uploads = %store.dir().display(), "serving audio files");

    let mut engine = cli.engine();
    engine.set_phase_preview(Phase::Work);
    let (ctx, finished_subscription) = ServerContext::new(Arc::new(Mutex::new(engine)), store);

    let listener = websocket_server::bind(cli.addr).await?;
    let server = websocket_server::serve(listener, ctx.clone());

    let (tick_tx, mut tick_rx) = tick::create_tick_channel();
    let mut ticker = tick::connect(tick_tx);
    debug!(kind = ?ticker.kind(), "tick source connected");
    ticker.start(cli.tick_ms);

    // Main loop: every tick goes through the engine one at a time
    let pump = async {
        while let Some(tick) = tick_rx.recv().await {
            let (finished, state) = {
                let mut engine = lock_engine(ctx.engine());
                let finished = engine.tick(tick.now());
                (finished, engine.snapshot())
            };
            if let Some(finished) = finished {
                notify_finished(finished, &state);
            }
            if state.is_running || finished.is_some() {
                ctx.publish_state(state);
            }
        }
    };

    let outcome = tokio::select! {
        _ = pump => Ok(()),
        result = server => result,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            Ok(())
        }
    };

    ticker.stop();
    finished_subscription.unsubscribe();
    if let Err(e) = &outcome {
        error!(error = %e, "WebSocket server stopped");
    }
    info!("daemon stopped");
    outcome?;
    Ok(())
}
