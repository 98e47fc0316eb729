use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use frame_warden::clock::ManualClock;
use frame_warden::governor::{Governor, GovernorConfig, GovernorHosts};
use frame_warden::testing::{FakeDom, FakeGpu, FakeHeap, FakeHost};
use frame_warden::GovernanceEvent;

#[path = "warden_diag/telemetry.rs"]
mod telemetry;
use telemetry::{drain_events, EventAggregator, ReplayReport};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    frame_warden::init_logging();
    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("warden-diag error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "warden-diag", about = "Governance trace replay harness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        match self.command {
            Command::Run(args) => run_command(args),
            Command::Record(args) => record_command(args),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a trace through the engine and print the event summary.
    Run(RunArgs),
    /// Replay a trace and capture every governance event to a JSON file.
    Record(RecordArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Output format for the replay summary.
    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    format: ReportFormat,
    /// Destination file for the summary (JSON only).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct RecordArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Destination file for the captured events.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Path to a JSON trace file to replay.
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Synthetic degradation scenario to generate.
    #[arg(long, value_enum)]
    scenario: Option<ScenarioArg>,
    /// Length of a generated scenario (milliseconds).
    #[arg(long, default_value_t = 120_000)]
    duration_ms: u64,
    /// Seed for scenario jitter, for reproducible runs.
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

impl SourceArgs {
    fn validate(&self) -> Result<()> {
        if self.trace.is_some() == self.scenario.is_some() {
            bail!("Provide exactly one source via --trace or --scenario");
        }
        if let Some(path) = &self.trace {
            if !path.exists() {
                bail!("trace file {} does not exist", path.display());
            }
        }
        if self.duration_ms == 0 {
            bail!("Duration must be greater than zero");
        }
        Ok(())
    }

    fn steps(&self) -> Result<Vec<TraceStep>> {
        if let Some(path) = &self.trace {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading trace {}", path.display()))?;
            let steps: Vec<TraceStep> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing trace {}", path.display()))?;
            return Ok(steps);
        }
        let scenario = self
            .scenario
            .context("either --trace or --scenario is required")?;
        Ok(generate_scenario(scenario, self.duration_ms, self.seed))
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum ScenarioArg {
    /// Healthy 60 fps baseline.
    Steady,
    /// FPS ramps down until predictive alerts and the ladder trip.
    FpsCollapse,
    /// Steady frames with monotonically leaking heap.
    MemoryLeak,
    /// Bursts of DOM insertions past the growth budget.
    DomFlood,
    /// GPU context loss with a successful late restore.
    ContextLoss,
    /// Collapse, leak, and render errors at once.
    FullDegradation,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Table,
}

/// One timed input to the engine. Traces are JSON arrays of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraceStep {
    at_ms: u64,
    #[serde(flatten)]
    op: TraceOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TraceOp {
    /// A render frame completed at `at_ms`.
    Frame,
    /// Heap usage reading changed.
    HeapUsed { bytes: u64 },
    /// A mutation-observer batch arrived.
    MutationBatch {
        added: usize,
        removed: usize,
        #[serde(default)]
        temporary: bool,
    },
    /// An uncaught error surfaced.
    Error { message: String },
    ContextLost,
    ContextRestored { context_id: u64 },
}

fn run_command(args: RunArgs) -> Result<()> {
    args.source.validate()?;
    let steps = args.source.steps()?;
    let (report, _events) = replay(steps)?;

    if let Some(path) = &args.out {
        let json = serde_json::to_string_pretty(&report).context("serializing replay report")?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("Replay summary written to {}", path.display());
        return Ok(());
    }
    match args.format {
        ReportFormat::Json => report.print_json()?,
        ReportFormat::Table => report.print_table(),
    }
    Ok(())
}

fn record_command(args: RecordArgs) -> Result<()> {
    args.source.validate()?;
    let steps = args.source.steps()?;
    let (_report, events) = replay(steps)?;

    let json = serde_json::to_string_pretty(&events).context("serializing captured events")?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "Captured {} events to {}",
        events.len(),
        args.output.display()
    );
    Ok(())
}

/// Drive a full engine through the trace on a manual clock, stepping
/// time at the governance tick period.
fn replay(mut steps: Vec<TraceStep>) -> Result<(ReplayReport, Vec<GovernanceEvent>)> {
    steps.sort_by_key(|s| s.at_ms);
    let end_ms = steps.last().map(|s| s.at_ms).unwrap_or(0);

    let clock = Arc::new(ManualClock::new(0));
    let dom = Arc::new(FakeDom::new(500));
    let heap = Arc::new(FakeHeap::new(100_000_000, 500_000_000));
    let hosts = GovernorHosts {
        dom: Arc::clone(&dom) as _,
        actions: Arc::new(FakeHost::new()),
        gpu: Arc::new(FakeGpu::new()),
        heap: Some(Arc::clone(&heap) as _),
        sweeper: None,
        gc: None,
    };
    let config = GovernorConfig::default();
    let period = config.tick_period_ms;
    let governor = Arc::new(Governor::new(config, hosts, clock.clone()));

    let mut rx = governor.bus().subscribe();
    let mut capture_rx = governor.bus().subscribe();
    let mut tap = governor
        .take_frame_tap()
        .context("frame tap already taken")?;
    governor.start().context("starting engine")?;

    let mut aggregator = EventAggregator::default();
    let mut events = Vec::new();
    let mut next = 0usize;
    let mut now = 0u64;
    while now <= end_ms + period {
        clock.set(now);
        while next < steps.len() && steps[next].at_ms <= now {
            let step = &steps[next];
            match &step.op {
                TraceOp::Frame => tap.frame(step.at_ms),
                TraceOp::HeapUsed { bytes } => heap.set_used(*bytes),
                TraceOp::MutationBatch {
                    added,
                    removed,
                    temporary,
                } => {
                    dom.add_nodes(*added, *temporary);
                    governor.on_mutation_batch(*added, *removed);
                }
                TraceOp::Error { message } => {
                    governor.report_error(message);
                }
                TraceOp::ContextLost => governor.on_context_lost(),
                TraceOp::ContextRestored { context_id } => {
                    governor.on_context_restored(*context_id)
                }
            }
            next += 1;
        }
        governor.tick(now);
        drain_events(&mut rx, &mut aggregator);
        while let Ok(event) = capture_rx.try_recv() {
            events.push(event);
        }
        now += period;
    }

    let status = governor.status();
    governor.stop().context("stopping engine")?;
    Ok((aggregator.into_report(status), events))
}

fn generate_scenario(scenario: ScenarioArg, duration_ms: u64, seed: u64) -> Vec<TraceStep> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut steps = Vec::new();

    let frames = |steps: &mut Vec<TraceStep>, rng: &mut StdRng, from: u64, to: u64| {
        let mut t = from;
        while t < to {
            steps.push(TraceStep {
                at_ms: t,
                op: TraceOp::Frame,
            });
            t += 16 + rng.gen_range(0..3);
        }
    };

    match scenario {
        ScenarioArg::Steady => frames(&mut steps, &mut rng, 0, duration_ms),
        ScenarioArg::FpsCollapse => {
            let half = duration_ms / 2;
            frames(&mut steps, &mut rng, 0, half);
            // Interval stretches from 16ms toward 120ms over the back half.
            let mut t = half;
            while t < duration_ms {
                steps.push(TraceStep {
                    at_ms: t,
                    op: TraceOp::Frame,
                });
                let progress = (t - half) as f64 / (duration_ms - half).max(1) as f64;
                let interval = 16.0 + progress * 104.0;
                t += interval as u64 + rng.gen_range(0..3);
            }
        }
        ScenarioArg::MemoryLeak => {
            frames(&mut steps, &mut rng, 0, duration_ms);
            let mut used = 100_000_000u64;
            let mut t = 0;
            while t <= duration_ms {
                steps.push(TraceStep {
                    at_ms: t,
                    op: TraceOp::HeapUsed { bytes: used },
                });
                used += 40_000_000;
                t += 30_000;
            }
        }
        ScenarioArg::DomFlood => {
            frames(&mut steps, &mut rng, 0, duration_ms);
            let mut t = 5_000;
            while t <= duration_ms {
                steps.push(TraceStep {
                    at_ms: t,
                    op: TraceOp::MutationBatch {
                        added: 400,
                        removed: 0,
                        temporary: true,
                    },
                });
                t += 5_000;
            }
        }
        ScenarioArg::ContextLoss => {
            frames(&mut steps, &mut rng, 0, duration_ms);
            let lost_at = duration_ms / 3;
            steps.push(TraceStep {
                at_ms: lost_at,
                op: TraceOp::ContextLost,
            });
            steps.push(TraceStep {
                at_ms: lost_at + 1_500,
                op: TraceOp::ContextRestored { context_id: 1 },
            });
        }
        ScenarioArg::FullDegradation => {
            let mut collapse = generate_scenario(ScenarioArg::FpsCollapse, duration_ms, seed);
            steps.append(&mut collapse);
            let mut used = 100_000_000u64;
            let mut t = 0;
            while t <= duration_ms {
                steps.push(TraceStep {
                    at_ms: t,
                    op: TraceOp::HeapUsed { bytes: used },
                });
                used += 60_000_000;
                t += 30_000;
            }
            for i in 0..4u64 {
                steps.push(TraceStep {
                    at_ms: duration_ms / 2 + i * 200,
                    op: TraceOp::Error {
                        message: "webgl shader link failure in bloom pass".to_string(),
                    },
                });
            }
        }
    }

    steps.sort_by_key(|s| s.at_ms);
    steps
}
