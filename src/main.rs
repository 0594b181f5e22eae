use docfuse::cli::{Cli, Commands, ConfigAction};
use docfuse::config::Config;
use docfuse::corpus::Corpus;
use docfuse::error::{DocfuseError, Result};
use docfuse::eval::{self, GoldenSet};
use docfuse::query::IntentKind;
use docfuse::retrieval::RetrievalEngine;
use docfuse::retriever::{DisabledRetriever, FastEmbedProvider, Retriever};
use docfuse::telemetry::{TelemetryEmitter, TracingSink};
use docfuse::types::{RetrievalRequest, RetrievalResult, ThreadHints};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Query {
            query,
            corpus,
            org,
            datasets,
            intent,
            prefer_doc,
            brand,
            last_endpoint,
            k,
            json,
            lexical_only,
            fallback,
        } => {
            let mut config = load_config(cli.config, cli.profile)?;
            if fallback {
                config.fallback.enabled = true;
            }
            let hints = ThreadHints {
                prefer_doc_id: prefer_doc,
                brand_lock: brand,
                last_endpoint,
            };
            let options = QueryOptions {
                org,
                datasets,
                intent,
                hints,
                k,
                json,
            };
            cmd_query(&config, &corpus, &query, options, lexical_only).await?;
        }
        Commands::Eval {
            corpus,
            cases,
            json,
            lexical_only,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let passed = cmd_eval(&config, &corpus, &cases, json, lexical_only).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "docfuse=debug" } else { "docfuse=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct QueryOptions {
    org: String,
    datasets: Vec<String>,
    intent: Option<String>,
    hints: ThreadHints,
    k: Option<usize>,
    json: bool,
}

async fn cmd_query(
    config: &Config,
    corpus_path: &Path,
    query: &str,
    options: QueryOptions,
    lexical_only: bool,
) -> Result<()> {
    let corpus = Corpus::load(corpus_path)?;
    let engine = build_engine(config, &corpus, lexical_only)?;

    let datasets = if options.datasets.is_empty() {
        corpus.datasets_for_org(&options.org)
    } else {
        options.datasets
    };

    let mut request =
        RetrievalRequest::new(query, options.org, datasets).with_hints(options.hints);
    if let Some(intent) = options.intent {
        request = request.with_intent(intent.parse::<IntentKind>()?);
    }
    if let Some(k) = options.k {
        request = request.with_k(k);
    }

    let result = engine.retrieve_and_fuse(&request).await;
    engine.shutdown().await;
    let result = result?;

    if options.json {
        let json = serde_json::to_string_pretty(&result).map_err(|e| DocfuseError::Json {
            source: e,
            context: "Failed to serialize result".to_string(),
        })?;
        println!("{}", json);
    } else {
        print_result(&result);
    }

    Ok(())
}

async fn cmd_eval(
    config: &Config,
    corpus_path: &Path,
    cases_path: &Path,
    json: bool,
    lexical_only: bool,
) -> Result<bool> {
    let corpus = Corpus::load(corpus_path)?;
    let mut set = GoldenSet::load(cases_path)?;
    set.resolve_datasets(|org| corpus.datasets_for_org(org));

    let engine = build_engine(config, &corpus, lexical_only)?;
    let report = eval::evaluate(&engine, &set).await;
    engine.shutdown().await;

    if json {
        let json = serde_json::to_string_pretty(&report).map_err(|e| DocfuseError::Json {
            source: e,
            context: "Failed to serialize report".to_string(),
        })?;
        println!("{}", json);
    } else {
        println!("{}", report);
    }

    Ok(report.failed == 0)
}

fn build_engine(config: &Config, corpus: &Corpus, lexical_only: bool) -> Result<RetrievalEngine> {
    let lexical: Arc<dyn Retriever> = Arc::new(corpus.lexical_retriever(config)?);

    let vector: Arc<dyn Retriever> = if lexical_only {
        Arc::new(DisabledRetriever::new("vector-disabled"))
    } else {
        match FastEmbedProvider::new(&config.embedding.model, config.embedding.batch_size) {
            Ok(provider) => Arc::new(corpus.vector_retriever(config, Arc::new(provider))?),
            Err(e) => {
                tracing::warn!(
                    "Embedding model unavailable, continuing with keyword retrieval only: {}",
                    e
                );
                Arc::new(DisabledRetriever::new("vector-disabled"))
            }
        }
    };

    let telemetry = if config.telemetry.enabled {
        TelemetryEmitter::spawn(Arc::new(TracingSink), config.telemetry.channel_capacity)
    } else {
        TelemetryEmitter::disabled()
    };

    RetrievalEngine::new(config, vector, lexical, telemetry)
}

fn print_result(result: &RetrievalResult) {
    let meta = &result.meta;
    let debug = &result.debug;

    println!("Branch: {}", meta.confidence_branch);
    println!(
        "  top1={:.5} second={:.5} gap={:.5} sections={}",
        meta.top1_score, meta.second_score, meta.score_gap, meta.unique_section_count
    );
    println!(
        "  intent={} vector={} ({}) lexical={} ({}) fused={} capped={} boosted={}",
        debug.intent,
        debug.vector.count,
        debug.vector.status,
        debug.lexical.count,
        debug.lexical.status,
        debug.fused_count,
        debug.filtered_count,
        debug.boosted_count,
    );
    println!(
        "  retrieval={}ms fusion={}ms",
        debug.retrieval_ms, debug.fusion_ms
    );
    if debug.fallback_attempts > 0 {
        let kept = debug
            .fallback_strategy
            .map(|s| s.to_string())
            .unwrap_or_else(|| "first pass".to_string());
        println!(
            "  fallback: {} retries, kept {}",
            debug.fallback_attempts, kept
        );
    }

    if result.contexts.is_empty() {
        println!("\nNo matching passages.");
        return;
    }

    println!();
    for (i, context) in result.contexts.iter().enumerate() {
        let chunk = &context.chunk;
        let location = match chunk.section() {
            Some(section) => format!("{} > {}", chunk.document_id, section),
            None => chunk.document_id.clone(),
        };
        println!(
            "{:>2}. [{:.5}] ({}) {}",
            i + 1,
            context.fused_score,
            context.source,
            location
        );
        println!("    {}", snippet(&chunk.content, 160));
    }
}

fn snippet(content: &str, max_chars: usize) -> String {
    let flat = docfuse::query::collapse_whitespace(content);
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match &profile {
                Some(profile) => Config::load_with_profile(&path, profile)?,
                None => Config::load(&path)?,
            };
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            if let Some(profile) = profile {
                println!("  Profile: {}", profile);
            }
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'docfuse config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        docfuse::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
