//! Breath CLI - Command-line interface for Synheart Breath
//!
//! Commands:
//! - run: Run a guided breathing session and stream phase/sample events
//! - patterns: List the built-in breathing patterns
//! - history: Show the saved session log and aggregated stats
//! - doctor: Diagnose installation and session log health

use clap::{Parser, Subcommand, ValueEnum};
use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use synheart_breath::config::{EffectToggles, SessionConfig, SoundType};
use synheart_breath::cues::{
    AudioEnvelope, AudioModulator, EffectDispatcher, HapticDevice, PhaseCue, SessionObserver,
    SoundScape, VoiceOutput,
};
use synheart_breath::error::CapabilityError;
use synheart_breath::patterns;
use synheart_breath::report::{SessionReport, SessionSummary};
use synheart_breath::runner::{run_simulated, RealtimeRunner};
use synheart_breath::scheduler::cycle_sequence;
use synheart_breath::signal::SignalGenerator;
use synheart_breath::store::{default_file_name, AggregatedStats, SavedSession, SessionLog};
use synheart_breath::types::{BiofeedbackSample, BreathingPattern, PatternId, Phase};
use synheart_breath::{BreathError, SessionEngine, BREATH_VERSION, PRODUCER_NAME};

/// Log filter used when RUST_LOG is not set
const DEFAULT_LOG_FILTER: &str = "synheart_breath=info,breath=info";

/// Breath - Guided breathing sessions with simulated biofeedback
#[derive(Parser)]
#[command(name = "breath")]
#[command(author = "Synheart AI Inc")]
#[command(version = BREATH_VERSION)]
#[command(about = "Run adaptive guided-breathing sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a breathing session and stream events to stdout
    Run {
        /// Built-in pattern id (coherent, box, relax_478, soldier, performance, panic_rescue)
        #[arg(short, long, default_value = "coherent")]
        pattern: String,

        /// Load a custom pattern from a JSON file (overrides --pattern)
        #[arg(long)]
        pattern_file: Option<PathBuf>,

        /// Simulated stress, 0 (calm) to 1 (panic)
        #[arg(long, default_value = "0.5")]
        stress: f64,

        /// Full breath length for the coherent pattern, in seconds
        #[arg(long, default_value = "10.0")]
        cycle: f64,

        /// Disable adaptive phase stretching
        #[arg(long)]
        no_adaptive: bool,

        /// Session length in seconds
        #[arg(short, long, default_value = "60")]
        duration: u32,

        /// Run on a virtual clock instead of in real time
        #[arg(long)]
        simulate: bool,

        /// Seed the signal generator for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Emit every Nth sample (0 disables sample events)
        #[arg(long, default_value = "20")]
        sample_every: usize,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Append the finished session to this session log
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Log haptic cues to stderr
        #[arg(long)]
        haptics: bool,

        /// Log voice prompts to stderr
        #[arg(long)]
        voice: bool,

        /// Log audio envelopes to stderr
        #[arg(long)]
        audio: bool,

        /// Noise color of the audio layer (pink, white, brown)
        #[arg(long, default_value = "pink")]
        sound: String,
    },

    /// List built-in breathing patterns
    Patterns {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the saved session log and aggregated stats
    History {
        /// Session log file
        #[arg(long, default_value_t = default_file_name())]
        log_file: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose installation and session log health
    Doctor {
        /// Check a session log file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one event per line, streamed)
    Ndjson,
    /// Pretty-printed JSON array, written when the session ends
    JsonPretty,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so stdout stays machine-readable
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn run(cli: Cli) -> Result<(), BreathCliError> {
    match cli.command {
        Commands::Run {
            pattern,
            pattern_file,
            stress,
            cycle,
            no_adaptive,
            duration,
            simulate,
            seed,
            sample_every,
            output_format,
            log_file,
            haptics,
            voice,
            audio,
            sound,
        } => {
            let config = SessionConfig {
                is_playing: false,
                pattern: pattern.parse::<PatternId>()?,
                is_adaptive: !no_adaptive,
                breath_cycle_secs: cycle,
                simulated_stress: stress,
                effects: EffectToggles {
                    audio,
                    voice,
                    haptics,
                    sound: sound.parse::<SoundType>()?,
                },
            };
            let options = RunOptions {
                pattern_file,
                duration: Duration::seconds(i64::from(duration)),
                simulate,
                seed,
                sample_every,
                output_format,
                log_file,
            };
            cmd_run(&config, &options)
        }

        Commands::Patterns { json } => cmd_patterns(json),

        Commands::History { log_file, json } => cmd_history(Path::new(&log_file), json),

        Commands::Doctor { log_file, json } => cmd_doctor(log_file.as_deref(), json),
    }
}

struct RunOptions {
    pattern_file: Option<PathBuf>,
    duration: Duration,
    simulate: bool,
    seed: Option<u64>,
    sample_every: usize,
    output_format: OutputFormat,
    log_file: Option<PathBuf>,
}

fn cmd_run(config: &SessionConfig, options: &RunOptions) -> Result<(), BreathCliError> {
    let mut engine = match &options.pattern_file {
        Some(path) => {
            let pattern = BreathingPattern::from_json(&fs::read_to_string(path)?)?;
            SessionEngine::with_pattern(pattern, config)?
        }
        None => SessionEngine::new(config)?,
    };
    if let Some(seed) = options.seed {
        engine = engine.with_generator(SignalGenerator::with_seed(seed));
    }

    let sink = EventSink::new(options.output_format, options.sample_every);
    engine.add_observer(Box::new(sink.clone()));
    engine.add_observer(Box::new(
        EffectDispatcher::new(config.effects)
            .with_haptics(Box::new(ConsoleHaptics))
            .with_voice(Box::new(ConsoleVoice))
            .with_audio(Box::new(ConsoleAudio)),
    ));

    let summary = if options.simulate {
        run_simulated(&mut engine, Utc::now(), options.duration)?
    } else {
        RealtimeRunner::default().run_for(&mut engine, options.duration)?
    };
    let summary = summary.ok_or(BreathCliError::NoSamples)?;
    let report = summary.report();
    if let Some(report) = &report {
        info!(
            pattern = %report.pattern_name,
            duration = %report.duration_label(),
            vagal_score = report.vagal_score,
            "session complete"
        );
    }

    if let (Some(path), Some(report)) = (&options.log_file, &report) {
        let mut log = SessionLog::load(path)?;
        log.record(report, summary.ended_at);
        log.save(path)?;
    }

    sink.emit(&CliEvent::Summary { summary, report });
    sink.finish()
}

fn cmd_patterns(json: bool) -> Result<(), BreathCliError> {
    let infos: Vec<PatternInfo> = patterns::catalog()
        .into_iter()
        .map(|pattern| {
            let phases_per_cycle = Phase::ALL
                .iter()
                .filter(|&&phase| pattern.timings.get(phase) > 0.0)
                .count();
            PatternInfo {
                breaths_per_minute: pattern.timings.breaths_per_minute(),
                first_cycle: cycle_sequence(&pattern.timings, phases_per_cycle),
                pattern,
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Breathing Patterns");
    println!("==================");
    for info in &infos {
        let t = &info.pattern.timings;
        let cycle: Vec<&str> = info.first_cycle.iter().map(Phase::as_str).collect();
        println!("\n{} ({})", info.pattern.name, info.pattern.id);
        println!("  {}", info.pattern.description);
        println!(
            "  Timings:   {}s in / {}s hold / {}s out / {}s hold",
            t.inhale, t.hold_in, t.exhale, t.hold_out
        );
        println!("  Rate:      {:.1} breaths/min", info.breaths_per_minute);
        println!("  Cycle:     {}", cycle.join(" -> "));
        println!("  Mechanism: {}", info.pattern.mechanism);
    }
    Ok(())
}

fn cmd_history(log_file: &Path, json: bool) -> Result<(), BreathCliError> {
    let log = SessionLog::load(log_file)?;
    let stats = log.aggregated_stats(Utc::now().date_naive());

    if json {
        let view = HistoryView {
            stats,
            sessions: log.sessions(),
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Session History");
    println!("===============");
    println!("Sessions:      {}", stats.total_sessions);
    println!("Minutes:       {}", stats.total_minutes);
    println!("Streak:        {} day(s)", stats.current_streak);
    println!("Average score: {}", stats.average_vagal_score);

    if !log.is_empty() {
        println!("\nRecent:");
        for session in log.sessions() {
            println!(
                "  {}  {:<26} {:>4}s  score {}",
                session.timestamp.format("%Y-%m-%d %H:%M"),
                session.pattern_name,
                session.duration_seconds,
                session.vagal_score
            );
        }
    }
    Ok(())
}

fn cmd_doctor(log_file: Option<&Path>, json: bool) -> Result<(), BreathCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "breath_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Breath version {}", BREATH_VERSION),
    });

    // Every built-in pattern must be schedulable
    let invalid: Vec<String> = patterns::catalog()
        .iter()
        .filter_map(|p| p.validate().err().map(|e| e.to_string()))
        .collect();
    checks.push(if invalid.is_empty() {
        DoctorCheck {
            name: "patterns".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} built-in patterns valid", PatternId::ALL.len()),
        }
    } else {
        DoctorCheck {
            name: "patterns".to_string(),
            status: CheckStatus::Error,
            message: invalid.join("; "),
        }
    });

    if let Some(path) = log_file {
        let check = if !path.exists() {
            DoctorCheck {
                name: "session_log".to_string(),
                status: CheckStatus::Warning,
                message: "Session log does not exist yet".to_string(),
            }
        } else {
            match SessionLog::load(path) {
                Ok(log) => DoctorCheck {
                    name: "session_log".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Session log valid ({} sessions)", log.len()),
                },
                Err(e) => DoctorCheck {
                    name: "session_log".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read session log: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (non-interactive mode)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: BREATH_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Breath Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BreathCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Session events

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum CliEvent {
    Phase(PhaseCue),
    Sample(BiofeedbackSample),
    Summary {
        summary: SessionSummary,
        report: Option<SessionReport>,
    },
}

/// Observer writing session events to stdout
#[derive(Clone)]
struct EventSink {
    format: OutputFormat,
    sample_every: usize,
    samples_seen: Rc<Cell<usize>>,
    buffered: Rc<RefCell<Vec<serde_json::Value>>>,
}

impl EventSink {
    fn new(format: OutputFormat, sample_every: usize) -> Self {
        Self {
            format,
            sample_every,
            samples_seen: Rc::new(Cell::new(0)),
            buffered: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn emit(&self, event: &CliEvent) {
        match self.format {
            OutputFormat::Ndjson => {
                if let Ok(line) = serde_json::to_string(event) {
                    let mut stdout = io::stdout().lock();
                    // A closed pipe ends output, not the session
                    let _ = writeln!(stdout, "{}", line);
                    let _ = stdout.flush();
                }
            }
            OutputFormat::JsonPretty => {
                if let Ok(value) = serde_json::to_value(event) {
                    self.buffered.borrow_mut().push(value);
                }
            }
        }
    }

    fn finish(&self) -> Result<(), BreathCliError> {
        if let OutputFormat::JsonPretty = self.format {
            println!("{}", serde_json::to_string_pretty(&*self.buffered.borrow())?);
        }
        Ok(())
    }
}

impl SessionObserver for EventSink {
    fn on_phase(&mut self, cue: &PhaseCue) {
        self.emit(&CliEvent::Phase(cue.clone()));
    }

    fn on_sample(&mut self, sample: &BiofeedbackSample) {
        let seen = self.samples_seen.get() + 1;
        self.samples_seen.set(seen);
        if self.sample_every > 0 && seen % self.sample_every == 0 {
            self.emit(&CliEvent::Sample(sample.clone()));
        }
    }
}

// Console collaborators

struct ConsoleHaptics;

impl HapticDevice for ConsoleHaptics {
    fn vibrate(&mut self, pattern: &[u32]) -> Result<(), CapabilityError> {
        info!(target: "breath::haptics", pattern = ?pattern, "vibrate");
        Ok(())
    }
}

struct ConsoleVoice;

impl VoiceOutput for ConsoleVoice {
    fn speak(&mut self, text: &str) -> Result<(), CapabilityError> {
        info!(target: "breath::voice", "{}", text);
        Ok(())
    }

    fn cancel(&mut self) -> Result<(), CapabilityError> {
        debug!(target: "breath::voice", "cancel");
        Ok(())
    }
}

struct ConsoleAudio;

impl AudioModulator for ConsoleAudio {
    fn start(&mut self, scape: &SoundScape) -> Result<(), CapabilityError> {
        info!(
            target: "breath::audio",
            pattern = %scape.pattern,
            sound = %scape.sound,
            left_hz = scape.left_hz,
            right_hz = scape.right_hz,
            "start"
        );
        Ok(())
    }

    fn modulate(&mut self, envelope: &AudioEnvelope) -> Result<(), CapabilityError> {
        info!(target: "breath::audio", envelope = ?envelope, "modulate");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CapabilityError> {
        debug!(target: "breath::audio", "stop");
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum BreathCliError {
    Io(io::Error),
    Breath(BreathError),
    Json(serde_json::Error),
    NoSamples,
    DoctorFailed,
}

impl From<io::Error> for BreathCliError {
    fn from(e: io::Error) -> Self {
        BreathCliError::Io(e)
    }
}

impl From<BreathError> for BreathCliError {
    fn from(e: BreathError) -> Self {
        BreathCliError::Breath(e)
    }
}

impl From<serde_json::Error> for BreathCliError {
    fn from(e: serde_json::Error) -> Self {
        BreathCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BreathCliError> for CliError {
    fn from(e: BreathCliError) -> Self {
        match e {
            BreathCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BreathCliError::Breath(BreathError::UnknownPattern(id)) => CliError {
                code: "UNKNOWN_PATTERN".to_string(),
                message: format!("Unknown pattern: {}", id),
                hint: Some("Run 'breath patterns' to list pattern ids".to_string()),
            },
            BreathCliError::Breath(e @ BreathError::InvalidPattern(_)) => CliError {
                code: "INVALID_PATTERN".to_string(),
                message: e.to_string(),
                hint: Some("INHALE and EXHALE must be non-zero; other phases 0 or at least 0.1s".to_string()),
            },
            BreathCliError::Breath(e @ BreathError::InvalidConfig(_)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: e.to_string(),
                hint: Some("Stress must be within [0, 1] and the cycle at least 1s".to_string()),
            },
            BreathCliError::Breath(e) => CliError {
                code: "BREATH_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BreathCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BreathCliError::NoSamples => CliError {
                code: "NO_SESSION".to_string(),
                message: "Session ended without running".to_string(),
                hint: Some("Use a duration of at least one second".to_string()),
            },
            BreathCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct PatternInfo {
    #[serde(flatten)]
    pattern: BreathingPattern,
    breaths_per_minute: f64,
    first_cycle: Vec<Phase>,
}

#[derive(Serialize)]
struct HistoryView<'a> {
    stats: AggregatedStats,
    sessions: &'a [SavedSession],
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
