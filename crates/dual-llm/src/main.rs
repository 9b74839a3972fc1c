// dual-llm/crates/dual-llm/src/main.rs

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use dual_llm::{
    channel_sink, metrics, render_markdown, telemetry, to_plain_text, Config, Dispatcher, DuplicateReconciler,
    GenerationResult, InferenceBackend, InferenceClient, InstanceMatcher, Side,
};
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "dual-llm", version, about = "Side-by-side completions from two local models")]
struct Cli {
    /// Print collected metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    /// More log output on stderr (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Send one prompt to both sides
    Generate {
        /// Model for the left side (defaults to LEFT_MODEL)
        #[arg(long)]
        left: Option<String>,
        /// Model for the right side (defaults to RIGHT_MODEL)
        #[arg(long)]
        right: Option<String>,
        /// Print the raw markdown instead of the formatted text
        #[arg(long)]
        raw: bool,
        /// Prompt text; read from stdin when omitted
        prompt: Option<String>,
    },
    /// List instances currently loaded on the server
    Models,
    /// Unload redundant instances of a model
    Reconcile {
        model: String,
        #[arg(long, default_value_t = 1)]
        keep: usize,
    },
    /// Show the configured model catalog
    Catalog,
}

#[cfg(feature = "cli")]
fn print_result(result: &GenerationResult, raw: bool) {
    println!("=== {} · {} ===", result.side, result.model_name);
    if raw || !result.succeeded {
        println!("{}", result.display_text);
    } else {
        print!("{}", to_plain_text(&render_markdown(&result.display_text)));
    }
    println!();
}

#[cfg(feature = "cli")]
async fn read_prompt(prompt: Option<String>) -> anyhow::Result<String> {
    use tokio::io::AsyncReadExt;

    match prompt {
        Some(text) => Ok(text),
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

#[cfg(feature = "cli")]
async fn generate(
    cfg: &Config,
    client: Arc<dyn InferenceBackend>,
    left: Option<String>,
    right: Option<String>,
    raw: bool,
    prompt: Option<String>,
) -> anyhow::Result<bool> {
    let dispatcher = Dispatcher::from_config(cfg, client);
    if let Some(model) = left {
        dispatcher.select_model(Side::Left, &model)?;
    }
    if let Some(model) = right {
        dispatcher.select_model(Side::Right, &model)?;
    }

    let prompt = read_prompt(prompt).await?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = dispatcher.run(&prompt, |_| channel_sink(tx.clone()))?;
    drop(tx);

    let mut all_succeeded = true;
    while let Some(result) = rx.recv().await {
        all_succeeded &= result.succeeded;
        print_result(&result, raw);
    }
    handle.join().await;

    Ok(all_succeeded)
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing(cli.verbose);
    metrics::init_metrics();

    let cfg = Config::from_env()?;
    cfg.print_config();

    let client: Arc<dyn InferenceBackend> = Arc::new(InferenceClient::from_config(&cfg));

    let succeeded = match cli.command {
        Command::Generate { left, right, raw, prompt } => {
            generate(&cfg, client, left, right, raw, prompt).await?
        }
        Command::Models => {
            let loaded = client.list_loaded().await;
            if loaded.is_empty() {
                println!("(no models loaded)");
            }
            for instance in loaded {
                println!("{}", instance.id);
            }
            true
        }
        Command::Reconcile { model, keep } => {
            let reconciler = DuplicateReconciler::new(
                client,
                InstanceMatcher::new(cfg.instance_separator.clone()),
                cfg.reconcile_interval(),
            );
            let unloaded = reconciler.reconcile(&model, keep).await;
            if unloaded.is_empty() {
                println!("No duplicate instances of {}", model);
            }
            for instance in unloaded {
                println!("unloaded {}", instance);
            }
            true
        }
        Command::Catalog => {
            for model in &cfg.available_models {
                let mut marks = Vec::new();
                if *model == cfg.left_model {
                    marks.push("left");
                }
                if *model == cfg.right_model {
                    marks.push("right");
                }
                if marks.is_empty() {
                    println!("{}", model);
                } else {
                    println!("{} ({})", model, marks.join(", "));
                }
            }
            true
        }
    };

    if cli.metrics {
        print!("{}", metrics::gather_metrics());
    }

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
