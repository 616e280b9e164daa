#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use translation_judge::catalog::InMemoryCatalog;
use translation_judge::config::EngineConfig;
use translation_judge::engine::{EvaluateRequest, EvaluationEngine};
use translation_judge::gateway::OpenRouterAdapter;
use translation_judge::hints::HintRequest;
use translation_judge::judge::{HeuristicJudge, JudgeGateway, LlmJudge};
use translation_judge::similarity::SimilarityMatcher;
use translation_judge::store::SqliteStore;
use translation_judge::weakness::WeaknessAggregator;

#[derive(Parser)]
#[command(name = "tjudge", version, about = "Translation judge CLI")]
struct Cli {
    /// TOML engine configuration; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database (defaults to $TRANSLATION_JUDGE_DB or a local dotfile)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one translation, optionally after taking hints
    Evaluate {
        /// Sentence catalog (JSON array)
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        sentence: i64,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long)]
        translation: String,
        /// Accepted answers; the catalog's are used when omitted
        #[arg(long = "expected")]
        expected: Vec<String>,
        /// Hints taken before answering, as WORD_INDEX:LEVEL (repeatable)
        #[arg(long = "hint", value_parser = parse_hint)]
        hints: Vec<(usize, u8)>,
        /// Grade locally without calling the LLM judge
        #[arg(long)]
        offline: bool,
    },
    /// Show the content of one hint
    Hint {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        sentence: i64,
        #[arg(long)]
        word: usize,
        #[arg(long, default_value_t = 1)]
        level: u8,
    },
    /// Export cached judgments to JSONL
    CacheExport {
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune cached judgments (by age and/or size)
    CachePrune {
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// List concepts due for review
    ReviewQueue {
        #[arg(long)]
        user: String,
    },
}

fn parse_hint(raw: &str) -> Result<(usize, u8), String> {
    let (word, level) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected WORD_INDEX:LEVEL, got {raw:?}"))?;
    let word = word.parse().map_err(|e| format!("bad word index {word:?}: {e}"))?;
    let level = level.parse().map_err(|e| format!("bad level {level:?}: {e}"))?;
    Ok((word, level))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => EngineConfig::from_toml_path(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn select_judge(config: &EngineConfig, offline: bool) -> Arc<dyn JudgeGateway> {
    let heuristic = || -> Arc<dyn JudgeGateway> {
        Arc::new(HeuristicJudge::new(SimilarityMatcher::new(config.similarity.clone())))
    };
    if offline {
        return heuristic();
    }
    match OpenRouterAdapter::from_env() {
        Ok(adapter) => Arc::new(LlmJudge::new(Arc::new(adapter), config.judge.model.clone())),
        Err(err) => {
            tracing::warn!(error = %err, "LLM judge unavailable, grading locally");
            heuristic()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let db_path = cli.db.clone().unwrap_or_else(SqliteStore::default_path);

    match cli.command {
        Commands::Evaluate {
            catalog,
            sentence,
            user,
            session,
            translation,
            expected,
            hints,
            offline,
        } => {
            let catalog = Arc::new(InMemoryCatalog::from_json_path(catalog)?);
            let store = Arc::new(SqliteStore::new(&db_path, &config.cache)?);
            let judge = select_judge(&config, offline);

            let aggregator = Arc::new(WeaknessAggregator::new(store.clone(), config.review.clone()));
            let (sink, worker) = aggregator.spawn();
            let engine =
                EvaluationEngine::new(config, store.clone(), store, judge, catalog)?
                    .with_weakness_sink(sink);

            for (word_index, level) in hints {
                let resp = engine
                    .request_hint(&HintRequest {
                        sentence_id: sentence,
                        user_id: user.clone(),
                        session_id: session.clone(),
                        word_index,
                        requested_level: level,
                    })
                    .await?;
                eprintln!(
                    "hint word {word_index} level {}: {} (cost {:.1})",
                    resp.level_reached, resp.hint_content, resp.cost_incurred
                );
            }

            let response = engine
                .evaluate(EvaluateRequest {
                    sentence_id: sentence,
                    user_id: user,
                    session_id: session,
                    raw_translation: translation,
                    expected_answers: expected,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);

            drop(engine);
            worker.join().await?;
        }
        Commands::Hint {
            catalog,
            sentence,
            word,
            level,
        } => {
            let catalog = Arc::new(InMemoryCatalog::from_json_path(catalog)?);
            let store = Arc::new(SqliteStore::new(&db_path, &config.cache)?);
            let judge = select_judge(&config, true);
            let engine = EvaluationEngine::new(config, store.clone(), store, judge, catalog)?;
            let mut last = None;
            for step in 1..=level.max(1) {
                last = Some(
                    engine
                        .request_hint(&HintRequest {
                            sentence_id: sentence,
                            user_id: "cli".into(),
                            session_id: "hint-preview".into(),
                            word_index: word,
                            requested_level: step,
                        })
                        .await?,
                );
            }
            if let Some(resp) = last {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            }
        }
        Commands::CacheExport { out } => {
            let store = SqliteStore::new(&db_path, &config.cache)?;
            store.export_jsonl(out).await?;
        }
        Commands::CachePrune {
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let store = SqliteStore::new(&db_path, &config.cache)?;
            let _lock = store.lock_exclusive()?;
            let stats = store.prune(max_age_days, max_rows).await?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
        Commands::ReviewQueue { user } => {
            let store = Arc::new(SqliteStore::new(&db_path, &config.cache)?);
            let aggregator = WeaknessAggregator::new(store, config.review.clone());
            let due = aggregator.review_queue(&user, Utc::now()).await?;
            if due.is_empty() {
                println!("nothing due for {user}");
            }
            for entry in due {
                println!(
                    "{}\tweakness {:.2}\t{}/{} hinted\tdue {}",
                    entry.concept,
                    entry.weakness_score,
                    entry.hint_requests,
                    entry.total_exposures,
                    entry.next_review_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}
