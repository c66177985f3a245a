use anyhow::Context;
use chaptersplit::Pipeline;
use chaptersplit::config::{OutputFormat, load_config};
use chaptersplit::services::renderer::default_output_path;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chaptersplit", version, about = "Re-segment a novel into evenly sized, uniformly titled chapters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one text file
    Split {
        /// UTF-8 input document
        input: PathBuf,
        /// Output path, defaults to <stem>_split.<ext> next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Configuration file layered over config/default.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Target characters per output chapter
        #[arg(long)]
        target_chars: Option<usize>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Print the effective settings and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the upload service
    Serve {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
        /// Directory rendered uploads are written to
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
        /// Minutes a rendered upload is kept; 0 keeps them forever
        #[arg(long, default_value_t = 1440)]
        retention_mins: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Split {
            input,
            output,
            config,
            target_chars,
            format,
            dry_run,
        } => {
            let mut config = load_config(config.as_deref())
                .context("failed to load configuration")?
                .with_target_chars(target_chars);
            if let Some(format) = format {
                config.output.format = format;
            }
            let output = output.unwrap_or_else(|| default_output_path(&input, config.output.format));

            let settings = json!({
                "input": input,
                "output": output,
                "target_chars": config.splitter.target_chars,
                "min_ratio": config.splitter.min_ratio,
                "max_ratio": config.splitter.max_ratio,
                "separator": config.splitter.separator,
                "format": config.output.format,
                "encoding": config.output.encoding,
                "fallback": config.fallback.no_chapter_detected,
                "llm_provider": config.llm.provider,
                "llm_fallback": config.llm.chapter_detection.enable_llm_fallback,
            });
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if dry_run {
                return Ok(());
            }

            let pipeline = Pipeline::from_config(config)?;
            let result = pipeline
                .process(&input, &output)
                .await
                .with_context(|| format!("failed to process {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Serve {
            config,
            addr,
            output_dir,
            retention_mins,
        } => {
            let config = load_config(config.as_deref()).context("failed to load configuration")?;
            let retention = (retention_mins > 0).then(|| Duration::from_secs(retention_mins.saturating_mul(60)));
            chaptersplit::server::serve(config, &addr, output_dir, retention).await?;
        }
    }

    Ok(())
}
