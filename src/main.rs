use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use navguide::{
    Document, GuideConfig, GuidanceStep, HeuristicPlanner, PageModelExtractor, PlannerMode,
    SessionState, TargetResolver, accept_external_plan,
};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Offline tools over captured page snapshots.
#[derive(Parser)]
#[command(name = "navguide", version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the page model extracted from a snapshot
    Extract { snapshot: PathBuf },
    /// Plan the next step for a goal
    Plan {
        snapshot: PathBuf,
        #[arg(long)]
        goal: String,
        #[arg(long, default_value_t = 1)]
        step: u32,
        /// Planner response to validate before falling back to the heuristic
        #[arg(long)]
        external: Option<PathBuf>,
    },
    /// Locate a step's target in a snapshot
    Resolve {
        snapshot: PathBuf,
        /// GuidanceStep JSON
        #[arg(long)]
        step: PathBuf,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn read_snapshot(path: &Path) -> Result<Document> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    Document::from_json(&raw).with_context(|| format!("decoding snapshot {}", path.display()))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = GuideConfig::load(cli.config.as_deref()).context("loading config")?;
    config.apply_env()?;

    match cli.command {
        Command::Extract { snapshot } => {
            let doc = read_snapshot(&snapshot)?;
            let page = PageModelExtractor::new(&config)?.extract(&doc);
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Plan {
            snapshot,
            goal,
            step,
            external,
        } => {
            let doc = read_snapshot(&snapshot)?;
            let page = PageModelExtractor::new(&config)?.extract(&doc);
            let mut session = SessionState::started(&goal, PlannerMode::Heuristic);
            session.current_step_number = step.max(1);

            let from_external = match external {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    match accept_external_plan(&raw) {
                        Ok(step) => Some(step),
                        Err(e) => {
                            warn!(error = %e, "external plan rejected, using heuristic planner");
                            None
                        }
                    }
                }
                None => None,
            };

            let Some(step) = from_external.or_else(|| HeuristicPlanner::plan(&page, &session))
            else {
                bail!("no actionable step on {}", page.url);
            };
            println!("{}", serde_json::to_string_pretty(&step)?);
        }
        Command::Resolve { snapshot, step } => {
            let doc = read_snapshot(&snapshot)?;
            let raw = std::fs::read_to_string(&step)
                .with_context(|| format!("reading {}", step.display()))?;
            let step: GuidanceStep = serde_json::from_str(&raw).context("decoding step")?;
            let resolved = TargetResolver::new(&doc).resolve_or_lost(&step)?;
            let element = doc.element(resolved.node);
            println!(
                "{}",
                serde_json::json!({
                    "node": resolved.node,
                    "tag": element.map_or("?", |e| e.tag.as_str()),
                    "via": resolved.via.to_string(),
                    "text": doc.normalized_text(resolved.node),
                    "value": element.and_then(|e| e.value.as_deref()),
                })
            );
        }
    }
    Ok(())
}
