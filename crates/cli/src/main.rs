use clap::Parser;
use qbank_adapters::{create_language_model, AdapterError};
use qbank_core::{
    test_output_path, topic_label_from_path, ConfigError, ExemplarRepository, GenerationParams,
    GeneratorConfig, LoadError, LogBridge, LogLevel, LogRecord, LogSink, NodeSelection,
    PromptComposer, PromptError, PromptRegistry, QuestionGenerator, RunController, RunRequest,
    RunSummary, StdoutLogSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let min_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let sink = Arc::new(StdoutLogSink::with_min_level(min_level));
    let filter = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    LogBridge::new(sink.clone(), filter).install()?;

    let summary = generate(&cli, sink.as_ref())?;
    if !summary.is_clean() {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            "Run finished with skipped nodes or failed saves; re-run to fill the gaps",
        ));
    }
    Ok(())
}

fn generate(cli: &Cli, sink: &dyn LogSink) -> Result<RunSummary, CliError> {
    let config = GeneratorConfig::load_or_default(cli.config.as_deref())?;

    let mut profile = config
        .provider(&cli.provider)
        .cloned()
        .ok_or_else(|| CliError::UnknownProvider(cli.provider.clone()))?;
    if let Some(model) = &cli.model {
        profile.model_name = model.clone();
    }
    let params = GenerationParams {
        temperature: cli.temperature.unwrap_or(profile.temperature),
        max_output_tokens: cli.max_output_tokens.unwrap_or(profile.max_tokens),
    };

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Initializing provider `{}` (model {})",
            cli.provider, profile.model_name
        ),
    ));
    let model = create_language_model(&cli.provider, &profile)?;

    sink.log(LogRecord::new(LogLevel::Info, "Loading exemplar templates..."));
    let repository = ExemplarRepository::load(&cli.exemplar_file)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Loaded {} node templates", repository.len()),
    ));

    let output_path = if cli.test {
        test_output_path(&cli.output_file)
    } else {
        cli.output_file.clone()
    };
    let topic = cli
        .topic
        .clone()
        .unwrap_or_else(|| topic_label_from_path(&cli.output_file));

    let selection = if cli.test {
        NodeSelection::Trial(config.generation.trial_node_count)
    } else {
        NodeSelection::parse(&cli.nodes)
    };
    let count = cli.count.map_or(config.generation.count, |n| n as usize);
    let max_retries = cli
        .max_retries
        .map_or(config.generation.max_retries, |n| n as usize);

    let registry = PromptRegistry::from_prompt_config(&config.prompts)?;
    let composer = PromptComposer::new(registry, config.generation.audience.clone());
    let generator = QuestionGenerator::new(&composer, sink)
        .with_count(count)
        .with_max_retries(max_retries)
        .with_params(params);

    let controller = RunController::new(model.as_ref(), generator, sink);
    let request = RunRequest::new(selection, output_path, topic);
    Ok(controller.run(&request, &repository))
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("no provider profile named `{0}`")]
    UnknownProvider(String),
    #[error("provider setup failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("could not load exemplars: {0}")]
    Load(#[from] LoadError),
    #[error("could not load prompt templates: {0}")]
    Prompt(#[from] PromptError),
    #[error("could not install logger: {0}")]
    Logger(#[from] log::SetLoggerError),
}

/// Generate practice questions for every node of an exemplar file, resuming
/// from whatever the output file already holds.
#[derive(Parser)]
#[command(name = "qbankgen", version, about)]
struct Cli {
    /// Exemplar JSON file keyed by node id
    #[arg(value_name = "EXEMPLAR_FILE")]
    exemplar_file: PathBuf,

    /// Output YAML file (created or resumed)
    #[arg(value_name = "OUTPUT_FILE")]
    output_file: PathBuf,

    /// Node ids to generate (comma separated) or "all"
    #[arg(long, default_value = "all", value_name = "IDS")]
    nodes: String,

    /// Trial run: only the first nodes, written to `<output>-TEST.yaml`
    #[arg(long)]
    test: bool,

    /// Questions per node
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    count: Option<u32>,

    /// Attempts per node before giving up
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    max_retries: Option<u32>,

    /// Provider profile
    #[arg(long, default_value = "gemini", value_name = "NAME")]
    provider: String,

    /// Optional JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Label written into the output header
    #[arg(long, value_name = "TEXT")]
    topic: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long, value_name = "TOKENS")]
    max_output_tokens: Option<u32>,

    /// Override the profile's model name
    #[arg(long)]
    model: Option<String>,

    /// Also print prompts and raw responses
    #[arg(long, short)]
    verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_defaults_and_flags() {
        let cli = Cli::parse_from(["qbankgen", "ex.json", "out.yaml"]);
        assert_eq!(cli.nodes, "all");
        assert_eq!(cli.provider, "gemini");
        assert!(cli.count.is_none());
        assert!(!cli.test);

        let cli = Cli::parse_from([
            "qbankgen",
            "ex.json",
            "out.yaml",
            "--nodes",
            "a,b",
            "--count",
            "4",
            "--max-retries",
            "5",
            "--provider",
            "claude",
            "--test",
        ]);
        assert_eq!(cli.nodes, "a,b");
        assert_eq!(cli.count, Some(4));
        assert_eq!(cli.max_retries, Some(5));
        assert_eq!(cli.provider, "claude");
        assert!(cli.test);
    }

    #[test]
    fn rejects_zero_count() {
        assert!(Cli::try_parse_from(["qbankgen", "ex.json", "out.yaml", "--count", "0"]).is_err());
        assert!(
            Cli::try_parse_from(["qbankgen", "ex.json", "out.yaml", "--max-retries", "0"]).is_err()
        );
    }
}
