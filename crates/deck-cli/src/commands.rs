use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use deck_kernel::{ElementDraft, Kernel, KernelConfig, QueryOptions, SortDirection};
use serde_json::Value;
use tracing::info;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let kernel = Kernel::in_memory(config);
    kernel.bootstrap().await?;
    match cli.command {
        Command::Types => cmd_types(&kernel, cli.format).await,
        Command::Query(args) => cmd_query(&kernel, args, cli.format).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KernelConfig> {
    let Some(path) = path else {
        return Ok(KernelConfig::default());
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(KernelConfig::from_toml_str(&source)?)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("parsing {}", path.display()))
}

async fn cmd_types(kernel: &Kernel, format: OutputFormat) -> anyhow::Result<()> {
    let system = kernel.system();
    let types = kernel
        .query(
            &system,
            &serde_json::json!({
                "type": "object",
                "properties": {
                    "slug": { "type": "string" },
                    "version": { "type": "string" },
                    "name": { "type": "string" },
                    "type": { "const": "type@1.0.0" }
                },
                "required": ["type"]
            }),
            &QueryOptions::default().sorted_by(["slug"], SortDirection::Asc),
        )
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&types)?),
        OutputFormat::Text => {
            for card in &types {
                let slug = card["slug"].as_str().unwrap_or_default();
                let version = card["version"].as_str().unwrap_or_default();
                let name = card["name"].as_str().unwrap_or_default();
                println!("{}@{}  {}", slug.bold(), version.yellow(), name);
            }
        }
    }
    Ok(())
}

async fn cmd_query(kernel: &Kernel, args: QueryArgs, format: OutputFormat) -> anyhow::Result<()> {
    let system = kernel.system();
    if let Some(seed) = &args.seed {
        let Value::Array(cards) = read_json(seed)? else {
            anyhow::bail!("{} must contain a JSON array of cards", seed.display());
        };
        for (i, card) in cards.into_iter().enumerate() {
            let draft = ElementDraft::from_value(card)
                .with_context(|| format!("seed card #{i}"))?;
            kernel
                .insert_card(&system, draft)
                .await
                .with_context(|| format!("inserting seed card #{i}"))?;
        }
        info!(seed = %seed.display(), "seeded kernel");
    }

    let schema = read_json(&args.schema)?;
    let sort_dir = if args.desc {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    };
    let mut options = QueryOptions::default()
        .with_skip(args.skip)
        .sorted_by(args.sort_path(), sort_dir);
    options.limit = args.limit;

    let results = kernel.query(&system, &schema, &options).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            for result in &results {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
            let summary = format!("{} result(s)", results.len());
            println!("{} {}", "✓".green().bold(), summary.bold());
        }
    }
    Ok(())
}
