//! genai CLI entry point

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use genai::agent::{
    GenerateOptions, LlmClient, ProviderRegistry, Session, SessionSettings, TextGenerator,
    TokenCounter,
};
use genai::config::Config;
use genai::memory::{JsonlMessageHistory, MessageHistory};
use genai::prompt::{
    ChatMessage, FunctionTemplate, MessageTemplate, PromptInput, PromptTemplate, Substitutions,
    Template,
};
use genai::ui;

#[derive(Parser)]
#[command(name = "genai")]
#[command(about = "Prompt templates and LLM generation from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and the built-in prompt templates
    Init,

    /// Fill templates and generate a completion
    Generate {
        /// Message template: a file, a workspace prompt or a built-in name (repeatable)
        #[arg(short, long = "template", required = true)]
        templates: Vec<String>,

        /// Placeholder value as key=value (repeatable)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Function template the model must answer through
        #[arg(short, long)]
        function: Option<String>,

        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print the answer as it arrives
        #[arg(short, long)]
        stream: bool,
    },

    /// Chat with a persisted, token-budgeted history
    Chat {
        /// System prompt template
        #[arg(short, long, default_value = "parenting_system")]
        system: String,

        /// Placeholder value for the system prompt as key=value (repeatable)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// History name, stored under the workspace
        #[arg(long, default_value = "default")]
        history: String,

        /// Send one message and exit
        #[arg(short = 'M', long)]
        message: Option<String>,

        /// Start from an empty history
        #[arg(long)]
        reset: bool,
    },

    /// Classify every line of a JSON-lines file through a function call
    Classify {
        /// JSON-lines input; each object supplies placeholder values
        input: PathBuf,

        #[arg(short, long = "template", default_value = "eyfs_classifier")]
        template: String,

        #[arg(short, long, default_value = "eyfs_classifier_function")]
        function: String,

        /// Placeholder value shared by every line as key=value (repeatable)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Input key copied into each parsed result
        #[arg(long, default_value = "url")]
        id_key: String,

        /// Directory for parsed_json.jsonl and invalid_json.jsonl
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        #[arg(short, long)]
        concurrency: Option<usize>,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Count the tokens of a JSON-lines message file
    Tokens {
        file: PathBuf,

        #[arg(short, long)]
        model: Option<String>,

        /// Also show what survives trimming to this budget
        #[arg(short, long)]
        budget: Option<usize>,
    },

    /// Show configuration status
    Status,
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            ui::print_thinking("Writing configuration and prompt templates");
            let config = genai::config::init()?;
            ui::print_success(&format!("Config at {:?}", genai::config::config_path()));
            ui::print_step(&format!("Prompt templates in {:?}", config.prompts_dir()));
            ui::print_step("Set OPENAI_API_KEY or add \"api_key\" to the config, then run:");
            println!("    genai generate -t eli3 -v \"input=How do whales breathe?\"");
        }

        Commands::Generate {
            templates,
            vars,
            function,
            model,
            temperature,
            max_tokens,
            stream,
        } => {
            let config = genai::config::load_or_default()?;
            let messages = templates
                .iter()
                .map(|name| resolve_message(&config, name).map(PromptInput::from))
                .collect::<Result<Vec<_>>>()?;
            let values: Substitutions = vars.into_iter().collect();

            let mut options = GenerateOptions::new(model.unwrap_or_else(|| config.model.clone()))
                .with_temperature(temperature.unwrap_or(config.temperature));
            if let Some(max_tokens) = max_tokens {
                options = options.with_max_tokens(max_tokens);
            }
            if let Some(function) = &function {
                let function = resolve_function(&config, function)?;
                options = options
                    .force_function_call(function.name())
                    .with_function(function);
            }

            let generator = build_generator(&config)?;
            if stream {
                let mut fragments = generator.generate_stream(&messages, &values, &options).await?;
                let mut stdout = std::io::stdout();
                while let Some(fragment) = fragments.next().await {
                    print!("{}", fragment?);
                    stdout.flush()?;
                }
                println!();
            } else {
                let completion = generator.generate(&messages, &values, &options).await?;
                match completion.function_arguments() {
                    Some(arguments) => match genai::agent::parse_function_arguments(arguments) {
                        Some(parsed) => println!("{}", serde_json::to_string_pretty(&parsed)?),
                        None => ui::print_warning(&format!("Unparseable arguments: {arguments}")),
                    },
                    None => println!("{}", completion.content().unwrap_or_default()),
                }
            }
        }

        Commands::Chat {
            system,
            vars,
            history,
            message,
            reset,
        } => {
            let config = genai::config::load_or_default()?;
            let generator = build_generator(&config)?;
            let system = resolve_message(&config, &system)?;
            let values: Substitutions = vars.into_iter().collect();

            let path = config.history_dir().join(format!("{history}.jsonl"));
            let mut session = Session::new(
                JsonlMessageHistory::open(&path)?,
                SessionSettings::from_config(&config),
            );
            if reset {
                session.reset()?;
            }
            session.start(&system, &values)?;

            if let Some(message) = message {
                let reply = session.ask(&generator, &message).await?;
                println!("{}", reply);
            } else {
                ui::print_header(&config.model, &config.provider);
                run_chat_interactive(&mut session, &generator).await?;
            }
        }

        Commands::Classify {
            input,
            template,
            function,
            vars,
            id_key,
            output_dir,
            concurrency,
            model,
        } => {
            let config = genai::config::load_or_default()?;
            let message = resolve_message(&config, &template)?;
            let function = resolve_function(&config, &function)?;
            let shared: Substitutions = vars.into_iter().collect();

            let batch = read_batch(&input, &shared)?;
            let options = GenerateOptions::new(model.unwrap_or_else(|| config.model.clone()))
                .with_temperature(config.temperature)
                .force_function_call(function.name())
                .with_function(function);

            let generator = build_generator(&config)?;
            let concurrency = concurrency.unwrap_or(config.concurrency);
            run_classify(&generator, message, batch, &options, concurrency, &id_key, &output_dir).await?;
        }

        Commands::Tokens { file, model, budget } => {
            let config = genai::config::load_or_default()?;
            let model = model.unwrap_or(config.model);
            let messages: Vec<ChatMessage> = MessageTemplate::load_jsonl(&file)?
                .iter()
                .map(MessageTemplate::to_message)
                .collect();

            let counter = TokenCounter::new();
            let total = counter.count(&messages, &model)?;
            let window = counter.context_window(&model)?;
            println!("{} messages, {} tokens ({} context window)", messages.len(), total, window);

            if let Some(budget) = budget {
                let kept = counter.buffer(&messages, &model, budget, config.keep_system_message)?;
                println!(
                    "Budget {}: keeps {} messages, {} tokens",
                    budget,
                    kept.len(),
                    counter.count(&kept, &model)?
                );
            }
        }

        Commands::Status => {
            let config = genai::config::load_or_default()?;
            println!("{}\n", "genai status".cyan().bold());
            println!("Config: {:?}", genai::config::config_path());
            println!("Workspace: {:?}", config.workspace);
            println!("Provider: {} ({})", config.provider, config.base_url);
            println!("Model: {}", config.model);
            println!(
                "API key: {}",
                if config.resolved_api_key().is_ok() { "✓" } else { "not set" }
            );
            println!(
                "Retry: {} attempts, {}s..{}s back-off",
                config.retry.max_attempts, config.retry.initial_backoff_secs, config.retry.max_backoff_secs
            );
            println!("Batch concurrency: {}", config.concurrency);
        }
    }

    Ok(())
}

fn build_generator(config: &Config) -> Result<TextGenerator<Box<dyn LlmClient>>> {
    let client = ProviderRegistry::create(config)?;
    Ok(TextGenerator::new(client).with_retry_policy(config.retry_policy()))
}

/// A file path, then a workspace prompt, then a built-in template.
fn resolve_template(config: &Config, name: &str, function: bool) -> Result<Template> {
    let direct = Path::new(name);
    let workspace = config.prompts_dir().join(format!("{}.json", name.trim_end_matches(".json")));

    let found = [direct, workspace.as_path()]
        .into_iter()
        .find(|path| path.is_file());

    let template = match (found, function) {
        (Some(path), false) => Template::message(path)?,
        (Some(path), true) => Template::function(path)?,
        (None, _) => genai::templates::builtin(name)?,
    };
    Ok(template)
}

fn resolve_message(config: &Config, name: &str) -> Result<MessageTemplate> {
    resolve_template(config, name, false)?
        .as_message()
        .cloned()
        .ok_or_else(|| anyhow!("'{name}' is a function template, expected a message"))
}

fn resolve_function(config: &Config, name: &str) -> Result<FunctionTemplate> {
    resolve_template(config, name, true)?
        .as_function()
        .cloned()
        .ok_or_else(|| anyhow!("'{name}' is a message template, expected a function"))
}

/// Each line is a JSON object; its values (strings verbatim, others as JSON)
/// are layered over the shared values.
fn read_batch(path: &Path, shared: &Substitutions) -> Result<Vec<Substitutions>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {:?}", path))?;

    let mut batch = Vec::new();
    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let row: Map<String, Value> = serde_json::from_str(&line)
            .with_context(|| format!("{:?} line {}", path, number + 1))?;
        let mut values = shared.clone();
        values.extend(row.into_iter().map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        }));
        batch.push(values);
    }
    Ok(batch)
}

async fn run_classify<C: LlmClient>(
    generator: &TextGenerator<C>,
    message: MessageTemplate,
    batch: Vec<Substitutions>,
    options: &GenerateOptions,
    concurrency: usize,
    id_key: &str,
    output_dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let mut parsed_out = append_to(&output_dir.join("parsed_json.jsonl"))?;
    let mut invalid_out = append_to(&output_dir.join("invalid_json.jsonl"))?;

    let progress = ProgressBar::new(batch.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .map_err(|e| anyhow!("progress template: {e}"))?
            .progress_chars("=> "),
    );

    let messages = vec![PromptInput::from(message)];
    let mut items = Box::pin(generator.generate_batch(&messages, batch, options, concurrency));
    let (mut parsed, mut invalid) = (0, 0);

    while let Some(item) = items.next().await {
        match item.result {
            Ok(Some(Value::Object(mut result))) => {
                if let Some(id) = item.values.get(id_key) {
                    result.insert(id_key.to_string(), Value::String(id.clone()));
                }
                writeln!(parsed_out, "{}", Value::Object(result))?;
                parsed += 1;
            }
            outcome => {
                let mut record: HashMap<&str, Value> = HashMap::new();
                record.insert("index", item.index.into());
                record.insert("values", serde_json::to_value(&item.values)?);
                match outcome {
                    Err(e) => {
                        progress.println(format!("item {}: {}", item.index, e));
                        record.insert("error", e.to_string().into());
                    }
                    Ok(Some(other)) => {
                        record.insert("result", other);
                    }
                    Ok(None) => {}
                }
                writeln!(invalid_out, "{}", serde_json::to_string(&record)?)?;
                invalid += 1;
            }
        }
        progress.inc(1);
        progress.set_message(format!("{parsed} parsed, {invalid} invalid"));
    }

    progress.finish_and_clear();
    ui::print_success(&format!("{parsed} parsed, {invalid} invalid, written to {:?}", output_dir));
    Ok(())
}

fn append_to(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {:?}", path))
}

async fn run_chat_interactive<H, C>(session: &mut Session<H>, generator: &TextGenerator<C>) -> Result<()>
where
    H: MessageHistory,
    C: LlmClient,
{
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("{}: ", ui::speaker("You", true));
        stdout.flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/reset") {
            session.reset()?;
            ui::print_step("History cleared");
            continue;
        }
        if input.is_empty() {
            continue;
        }

        let mut fragments = match session.ask_stream(generator, input).await {
            Ok(fragments) => fragments,
            Err(e) => {
                ui::print_error(&e.to_string());
                continue;
            }
        };

        print!("\n{}: ", ui::speaker("Bot", false));
        let mut reply = String::new();
        let mut failed = false;
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    print!("{}", text);
                    stdout.flush()?;
                    reply.push_str(&text);
                }
                Err(e) => {
                    println!();
                    ui::print_error(&e.to_string());
                    failed = true;
                    break;
                }
            }
        }
        println!("\n");

        if !failed {
            session.record_reply(input, &reply)?;
        }
    }

    Ok(())
}
