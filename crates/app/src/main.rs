use std::fmt;
use std::path::PathBuf;

use chrono::Duration;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use curriculum_core::config::EngineConfig;
use curriculum_core::history::MasteryLevel;
use curriculum_core::mode::LearnerProfile;
use curriculum_core::model::{
    CurriculumGraph, LearnerId, Phase, PhaseId, SkillCatalog, SkillDefinition, SkillId,
};
use curriculum_core::synth::{SynthOptions, synthesize_history};
use services::{Clock, LogFormat, PlanRequest, PlanningService, init_logging};
use storage::repository::Storage;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidLevel { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidLevel { raw } => {
                write!(f, "invalid --level value: {raw} (weak, developing, strong)")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- plan   [options]   # compose a session plan (default)");
    eprintln!("  cargo run -p app -- mode   [options]   # only show the selected mode");
    eprintln!("  cargo run -p app -- config             # print the default engine config");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>     engine config (TOML)");
    eprintln!("  --learner <id>      learner id (default 1)");
    eprintln!("  --minutes <n>       session length (default 10)");
    eprintln!("  --level <level>     seeded demo mastery: weak | developing | strong");
    eprintln!("  --seed <n>          RNG seed for reproducible output");
    eprintln!("  --json-logs         structured JSON logs on stderr");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CURRICULUM_CONFIG, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Plan,
    Mode,
    Config,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "plan" => Some(Self::Plan),
            "mode" => Some(Self::Mode),
            "config" => Some(Self::Config),
            _ => None,
        }
    }
}

struct Args {
    config: Option<PathBuf>,
    learner: LearnerId,
    minutes: u32,
    level: MasteryLevel,
    seed: Option<u64>,
    log_format: LogFormat,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            config: std::env::var_os("CURRICULUM_CONFIG").map(PathBuf::from),
            learner: LearnerId::new(1),
            minutes: 10,
            level: MasteryLevel::Developing,
            seed: None,
            log_format: LogFormat::Pretty,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = Some(require_value(args, "--config")?.into()),
                "--learner" => {
                    let raw = require_value(args, "--learner")?;
                    parsed.learner = LearnerId::new(parse_number(raw, "--learner")?);
                }
                "--minutes" => {
                    parsed.minutes = parse_number(require_value(args, "--minutes")?, "--minutes")?;
                }
                "--seed" => {
                    parsed.seed = Some(parse_number(require_value(args, "--seed")?, "--seed")?);
                }
                "--level" => {
                    let raw = require_value(args, "--level")?;
                    parsed.level = match raw.as_str() {
                        "weak" => MasteryLevel::Weak,
                        "developing" => MasteryLevel::Developing,
                        "strong" => MasteryLevel::Strong,
                        _ => return Err(ArgsError::InvalidLevel { raw }),
                    };
                }
                "--json-logs" => parsed.log_format = LogFormat::Json,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }
}

fn sid(raw: &str) -> Result<SkillId, curriculum_core::Error> {
    Ok(SkillId::new(raw)?)
}

/// A small abacus curriculum: two basic skills, then complements.
fn demo_curriculum() -> Result<(SkillCatalog, CurriculumGraph), curriculum_core::Error> {
    let direct = sid("basic.directAddition")?;
    let heaven = sid("basic.heavenBead")?;
    let simple = sid("basic.simpleCombinations")?;
    let four = sid("fiveComplements.4=5-1")?;
    let three = sid("fiveComplements.3=5-2")?;

    let catalog = SkillCatalog::new(vec![
        SkillDefinition::new(direct.clone()),
        SkillDefinition::new(heaven.clone()).with_prerequisites([direct.clone()]),
        SkillDefinition::new(simple.clone()).with_prerequisites([heaven.clone()]),
        SkillDefinition::new(four.clone())
            .with_prerequisites([simple.clone()])
            .with_tutorial(true),
        SkillDefinition::new(three.clone())
            .with_prerequisites([four.clone()])
            .with_tutorial(true),
    ])?;
    let curriculum = CurriculumGraph::new(vec![
        Phase::new(PhaseId::new("L1.add.direct")?, direct).with_name("Direct addition"),
        Phase::new(PhaseId::new("L1.add.heaven")?, heaven).with_name("Heaven bead"),
        Phase::new(PhaseId::new("L1.add.simple")?, simple).with_name("Simple combinations"),
        Phase::new(PhaseId::new("L1.add.five.4")?, four).with_name("Five complement +4"),
        Phase::new(PhaseId::new("L1.add.five.3")?, three).with_name("Five complement +3"),
    ])?;
    Ok((catalog, curriculum))
}

/// Seed history for the first phases so the learner sits at `level`.
async fn seed_history(
    storage: &Storage,
    config: &EngineConfig,
    learner: LearnerId,
    skills: &[SkillId],
    level: MasteryLevel,
    clock: Clock,
    rng: &mut StdRng,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = SynthOptions::default();
    let mut start = clock.now() - Duration::days(1);
    for skill in skills {
        let synth = synthesize_history(
            skill,
            config.synth.band(level),
            &config.priors.params_for(skill),
            &options,
            start,
            rng,
        )?;
        info!(
            %skill,
            records = synth.records.len(),
            p_known = synth.p_known,
            band_hit = synth.band_hit,
            "seeded demo history"
        );
        if let Some(last) = synth.records.last() {
            start = last.answered_at() + Duration::minutes(options.spacing_minutes);
        }
        storage.history.append(learner, &synth.records).await?;
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Plan,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Plan,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    init_logging(parsed.log_format);

    let config = match &parsed.config {
        Some(path) => EngineConfig::load(path).map_err(curriculum_core::Error::from)?,
        None => EngineConfig::default(),
    };
    if cmd == Command::Config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let clock = Clock::System;
    let mut rng = match parsed.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    let (catalog, curriculum) = demo_curriculum()?;
    let practicing: Vec<SkillId> = curriculum
        .phases()
        .iter()
        .take(3)
        .map(|p| p.primary_skill_id.clone())
        .collect();
    let profile = LearnerProfile {
        current_phase: curriculum.phases().get(3).map(|p| p.id.clone()),
        ..LearnerProfile::practicing(practicing.iter().cloned())
    };

    let storage = Storage::in_memory();
    seed_history(
        &storage,
        &config,
        parsed.learner,
        &practicing,
        parsed.level,
        clock,
        &mut rng,
    )
    .await?;

    let service = PlanningService::new(clock, &storage, catalog, curriculum, config)?;
    match cmd {
        Command::Mode => {
            let mode = service.select_mode(parsed.learner, &profile).await?;
            println!("{}", serde_json::to_string_pretty(&mode)?);
        }
        Command::Plan | Command::Config => {
            let request = PlanRequest {
                duration_minutes: parsed.minutes,
                ..PlanRequest::default()
            };
            let plan = service
                .plan_session(parsed.learner, &profile, &request, &mut rng)
                .await?;
            info!(
                plan = %plan.id(),
                slots = plan.total_slots(),
                estimated_minutes = plan.estimated_minutes(),
                "plan ready"
            );
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
