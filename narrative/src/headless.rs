//! Headless mode for the narrative runner.
//!
//! A simple line-oriented protocol over stdin. Every line is a `#command`;
//! output lines are tagged (`[WORLD]`, `[CHOICES]`, `[ERROR]`, ...) so
//! scripts and agents can follow along.

use narrative_core::gm::{ChoiceContext, GameMaster, GameMasterConfig, GameMasterError, PlayerDecision};
use narrative_core::narrator::Narrator;
use narrative_core::world::WorldState;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Configuration for a headless run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadlessConfig {
    /// Seed for the game master's random number generators.
    pub seed: Option<u64>,
    /// Resume this save instead of generating a new world.
    pub load: Option<PathBuf>,
}

impl HeadlessConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_load(mut self, path: impl Into<PathBuf>) -> Self {
        self.load = Some(path.into());
        self
    }

    /// Game master configuration from the environment, with `--seed` on top.
    fn game_master_config(&self) -> GameMasterConfig {
        let config = GameMasterConfig::from_env();
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

/// Parse runner options from command line arguments.
pub fn parse_config_from_args(args: &[String]) -> Result<HeadlessConfig, String> {
    let mut config = HeadlessConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                let raw = args.get(i + 1).ok_or("--seed requires a value")?;
                let seed = raw
                    .parse()
                    .map_err(|_| format!("--seed expects an unsigned integer, got '{raw}'"))?;
                config = config.with_seed(seed);
                i += 1;
            }
            "--load" => {
                let path = args.get(i + 1).ok_or("--load requires a path")?;
                config = config.with_load(path);
                i += 1;
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
        i += 1;
    }

    Ok(config)
}

/// One line of headless input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Progress,
    Choices(String),
    Decide(PlayerDecision),
    Evolve,
    Set { path: String, value: Value },
    Get(String),
    Branch { trigger: String, timeline: String, probability: f64 },
    SurpriseState,
    Pause,
    Resume,
    Status,
    Save(PathBuf),
    Load(PathBuf),
    Help,
    Quit,
}

/// Parse a `#command` line. Errors are usage messages.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line
        .trim()
        .strip_prefix('#')
        .ok_or("Commands start with '#'. Type #help for help.")?;
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let command = match name {
        "progress" => Command::Progress,
        "choices" => {
            if rest.is_empty() {
                return Err("Usage: #choices <situation>".to_string());
            }
            Command::Choices(rest.to_string())
        }
        "decide" => {
            let decision = serde_json::from_str(rest)
                .map_err(|e| format!("Usage: #decide <json> ({e})"))?;
            Command::Decide(decision)
        }
        "evolve" => Command::Evolve,
        "set" => {
            let (path, raw) = rest
                .split_once(char::is_whitespace)
                .ok_or("Usage: #set <path> <json>")?;
            let value = serde_json::from_str(raw.trim())
                .map_err(|e| format!("Usage: #set <path> <json> ({e})"))?;
            Command::Set {
                path: path.to_string(),
                value,
            }
        }
        "get" => {
            if rest.is_empty() || rest.contains(char::is_whitespace) {
                return Err("Usage: #get <path>".to_string());
            }
            Command::Get(rest.to_string())
        }
        "branch" => parse_branch(rest)?,
        "surprise-state" => Command::SurpriseState,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "status" => Command::Status,
        "save" | "load" => {
            if rest.is_empty() {
                return Err(format!("Usage: #{name} <path>"));
            }
            let path = PathBuf::from(rest);
            if name == "save" {
                Command::Save(path)
            } else {
                Command::Load(path)
            }
        }
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err("Unknown command. Type #help for help.".to_string()),
    };
    Ok(command)
}

/// `<trigger> <timeline> <p>`; the trigger may contain spaces.
fn parse_branch(rest: &str) -> Result<Command, String> {
    const USAGE: &str = "Usage: #branch <trigger> <timeline> <probability>";

    let mut parts = rest.rsplitn(3, char::is_whitespace);
    let probability = parts.next().filter(|p| !p.is_empty()).ok_or(USAGE)?;
    let timeline = parts.next().ok_or(USAGE)?;
    let trigger = parts.next().map(str::trim).filter(|t| !t.is_empty()).ok_or(USAGE)?;

    let probability: f64 = probability
        .parse()
        .map_err(|_| format!("{USAGE} (probability must be a number)"))?;
    if !(0.0..=1.0).contains(&probability) {
        return Err(format!("{USAGE} (probability must be within [0, 1])"));
    }

    Ok(Command::Branch {
        trigger: trigger.to_string(),
        timeline: timeline.to_string(),
        probability,
    })
}

const HELP: &[(&str, &str)] = &[
    ("#progress", "Advance the main narrative one step"),
    ("#choices <situation>", "Offer choices ranked for this player"),
    ("#decide <json>", "Record a player decision"),
    ("#evolve", "Run one world evolution step"),
    ("#set <path> <json>", "Set a world property"),
    ("#get <path>", "Show a world property"),
    ("#branch <trigger> <timeline> <p>", "Add a possible timeline branch"),
    ("#surprise-state", "Show the surprise engine state"),
    ("#pause / #resume", "Pause or resume the game"),
    ("#status", "Show the game status"),
    ("#save <path>", "Save the session"),
    ("#load <path>", "Load a saved session"),
    ("#help", "Show this help"),
    ("#quit", "Exit"),
];

fn print_help() {
    println!("[HELP]");
    for (usage, what) in HELP {
        println!("  {usage:<36} - {what}");
    }
}

/// Open the session: load a save or generate a fresh world.
async fn open(
    config: &HeadlessConfig,
    narrator: Arc<dyn Narrator>,
) -> Result<GameMaster<WorldState>, GameMasterError> {
    let gm_config = config.game_master_config();
    match &config.load {
        Some(path) => {
            let game = GameMaster::<WorldState>::load(path, narrator, gm_config).await?;
            println!("[LOADED] Session loaded from {}", path.display());
            Ok(game)
        }
        None => {
            let mut game = GameMaster::with_config(WorldState::new(), narrator, gm_config);
            let outcome = game.initialize_world().await?;
            println!("[INIT] {outcome:?}");
            Ok(game)
        }
    }
}

/// Run the game in headless mode until `#quit` or end of input.
pub async fn run_headless(config: HeadlessConfig, narrator: Arc<dyn Narrator>) -> Result<(), GameMasterError> {
    let mut game = open(&config, Arc::clone(&narrator)).await?;

    println!("=== Narrative Headless Mode ===");
    print_status(&game);
    println!();
    println!("Enter commands (one per line, #help for help):");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("[ERROR] {usage}");
                continue;
            }
        };
        debug!(?command, "Headless command");

        if command == Command::Quit {
            println!("Goodbye!");
            break;
        }
        if let Command::Load(path) = &command {
            match GameMaster::<WorldState>::load(path, Arc::clone(&narrator), config.game_master_config()).await {
                Ok(loaded) => {
                    game = loaded;
                    println!("[LOADED] Session loaded from {}", path.display());
                    print_status(&game);
                }
                Err(e) => println!("[ERROR] Load failed: {e}"),
            }
            continue;
        }

        execute(&mut game, command).await;
        std::io::stdout().flush().ok();
    }

    info!(world = game.world().id(), "Headless session ended");
    Ok(())
}

async fn execute(game: &mut GameMaster<WorldState>, command: Command) {
    match command {
        Command::Progress => match game.progress_narrative().await {
            Ok(change) => println!("[WORLD] {} = {}", change.path, change.new_value),
            Err(e) => println!("[ERROR] {e} (status: {})", game.status()),
        },
        Command::Choices(situation) => {
            println!("[CHOICES]");
            let choices = game.generate_choices(&ChoiceContext::new(situation)).await;
            for (i, scored) in choices.iter().enumerate() {
                println!(
                    "  {}. {} (action: {}, risk: {:.2}, score: {:.2})",
                    i + 1,
                    scored.choice.text,
                    scored.choice.action,
                    scored.choice.risk_level,
                    scored.preference_score
                );
            }
        }
        Command::Decide(decision) => {
            let impact = game.record_player_decision(decision);
            let profile = game.analyzer().profile();
            println!(
                "[DECIDED] style: {:?}, risk tolerance: {:.2}, decision speed: {:.2}",
                profile.play_style, profile.risk_tolerance, profile.decision_speed
            );
            debug!(?impact, "Player impact");
        }
        Command::Evolve => match game.evolve_world().await {
            Ok(outcome) => {
                println!("[EVOLVED] reality_stability = {:.3}", outcome.reality_stability);
                if let Some(branch) = outcome.branch_taken {
                    println!("[TIMELINE] {} (triggered by: {})", branch.timeline, branch.trigger);
                }
            }
            Err(e) => println!("[ERROR] {e}"),
        },
        Command::Set { path, value } => match game.apply(&path, value).await {
            Ok(change) => println!("[WORLD] {} = {}", change.path, change.new_value),
            Err(e) => println!("[ERROR] {e}"),
        },
        Command::Get(path) => match game.world().get_property(&path) {
            Some(value) => println!("[WORLD] {path} = {value}"),
            None => println!("[WORLD] {path} is not set"),
        },
        Command::Branch {
            trigger,
            timeline,
            probability,
        } => {
            let branch = game.add_timeline_branch(trigger, timeline, probability);
            println!(
                "[BRANCH] {} -> {} (p = {:.2})",
                branch.trigger, branch.timeline, branch.probability
            );
        }
        Command::SurpriseState => {
            let surprise = game.surprise();
            println!(
                "[SURPRISE] state: {:?}, frequency: {:.3}, last: {}",
                game.surprise_state(),
                surprise.frequency(),
                surprise
                    .last_surprise_time()
                    .map_or_else(|| "never".to_string(), |t| t.to_string())
            );
        }
        Command::Pause => {
            if game.pause() {
                println!("[PAUSED]");
            } else {
                println!("[ERROR] Cannot pause while {}", game.status());
            }
        }
        Command::Resume => {
            if game.resume() {
                println!("[RESUMED]");
            } else {
                println!("[ERROR] Cannot resume while {}", game.status());
            }
        }
        Command::Status => print_status(game),
        Command::Save(path) => match game.save(&path).await {
            Ok(()) => println!("[SAVED] Session saved to {}", path.display()),
            Err(e) => println!("[ERROR] Save failed: {e}"),
        },
        Command::Help => print_help(),
        // Handled by the input loop.
        Command::Load(_) | Command::Quit => {}
    }
}

fn print_status(game: &GameMaster<WorldState>) {
    let world = game.world();
    let summary = game.performance().summary();
    println!("[STATUS]");
    println!("  World: {}", world.id());
    println!("  Status: {}", game.status());
    println!("  Timeline: {}", world.timeline());
    for name in ["reality_stability", "magic_level", "tech_level", "population"] {
        if let Some(value) = world.get_f64(&format!("properties.{name}")) {
            println!("  {name}: {value:.3}");
        }
    }
    println!("  Events remembered: {}", game.memory().len());
    println!("  Pending branches: {}", world.branches().len());
    println!(
        "  Agent calls: {} (avg {:.0} ms)",
        summary.agent_calls.values().sum::<u64>(),
        summary.avg_response_time_ms
    );
}
