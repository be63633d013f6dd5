use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use loctable::{Glossary, Segment, SegmentContext};
use loctable_mt::{
    Generator, MockGenerator, MockMode, OpenAiGenerator, Pipeline, PipelineConfig, Store,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("loctable-mt")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run one source string through the loctable translation pipeline")
        .arg(
            Arg::new("message")
                .help("Source string to translate")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("target-locale")
                .help("Target locale (e.g., de-DE, fr-FR)")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::new("source-locale")
                .long("source")
                .short('s')
                .help("Source locale (default: en)")
                .default_value("en"),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .short('m')
                .help("Use the locale-tag mock generator instead of the OpenAI-compatible API")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("glossary")
                .long("glossary")
                .short('g')
                .help("Glossary JSON file"),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .help("SQLite database path (default: in-memory)"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .short('l')
                .help("Character limit for the translation")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Pipeline config JSON file"),
        )
        .arg(
            Arg::new("key")
                .long("key")
                .short('k')
                .help("String table key, passed to the generator as context"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Show pipeline states and debug logs")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let message = matches
        .get_one::<String>("message")
        .ok_or("missing message")?;
    let target_locale = matches
        .get_one::<String>("target-locale")
        .ok_or("missing target locale")?;
    let source_locale = matches
        .get_one::<String>("source-locale")
        .map(String::as_str)
        .unwrap_or("en");

    let config = match matches.get_one::<String>("config") {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    let glossary = match matches.get_one::<String>("glossary") {
        Some(path) => Glossary::from_json_str(&std::fs::read_to_string(path)?)?,
        None => Glossary::default(),
    };

    let store = match matches.get_one::<String>("db") {
        Some(path) => Store::open(path).await?,
        None => Store::open_in_memory().await?,
    };

    let generator: Arc<dyn Generator> = if matches.get_flag("mock") {
        Arc::new(MockGenerator::new(MockMode::LocaleTag))
    } else {
        if std::env::var("OPENAI_API_KEY").is_err() {
            eprintln!("❌ OPENAI_API_KEY environment variable not set");
            eprintln!("   Set it with: export OPENAI_API_KEY=your_api_key");
            eprintln!("   Or use --mock to use the mock generator");
            return Err("Missing API key".into());
        }
        Arc::new(OpenAiGenerator::from_env()?)
    };

    let key = matches.get_one::<String>("key").cloned();
    let mut segment = Segment::new(
        key.as_deref().unwrap_or("cli-message"),
        source_locale,
        message,
    )?
    .with_context(SegmentContext {
        key,
        filename: None,
        category: None,
    });
    if let Some(limit) = matches.get_one::<usize>("limit") {
        segment = segment.with_char_limit(*limit);
    }

    if verbose {
        println!("📝 Source: \"{}\"", segment.source_text);
        println!("🌍 {} → {}", source_locale, target_locale);
        println!("🤖 Generator: {}", generator.provider_name());
        println!();
    }

    let pipeline = Pipeline::new(Arc::new(store), generator, config).with_glossary(glossary);
    let report = match pipeline.run_segment(&segment, target_locale).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Translation failed, row left pending: {}", e);
            return Err(e.into());
        }
    };

    if verbose {
        let states: Vec<&str> = report.states.iter().map(|s| s.as_str()).collect();
        println!("🔁 States: {}", states.join(" → "));
        if let Some(origin) = report.origin {
            println!("📦 Origin: {}", origin);
        }
        if let Some(risk) = report.risk_score {
            println!("⚠️  Risk score: {}", risk);
        }
        println!();
    }

    if let Some(text) = &report.text {
        println!("{}", text);
    }
    for issue in &report.issues {
        eprintln!("[{}] {}: {}", issue.severity.as_str(), issue.kind.as_str(), issue.message);
    }

    Ok(())
}
