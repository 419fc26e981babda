//! Build automation tasks for Sluice
//!
//! - Generating the CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Sluice", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<sluice_cli::Cli>();

    let content = format!(
        r#"# Sluice CLI Reference

This documentation is generated from the CLI source code. Last updated: {}.

## Quick Start

```bash
# Look at what a pipeline would load, without touching the destination
sluice preview pipelines/orders.yaml

# Check that the destination is reachable
sluice test-connection pipelines/orders.yaml --side destination

# Run once, picking up rows changed since a watermark (epoch ms)
sluice run pipelines/orders.yaml --watermark 1709622489000

# Serve every active job, re-reading jobs.yaml every 30 seconds
sluice serve --jobs jobs.yaml --pipelines pipelines.yaml --watch 30
```

## Commands

{}

## Environment Variables

- `SLUICE_BATCH_SIZE` - Rows per load batch (default: `500`)
- `SLUICE_PREVIEW_LIMIT` - Rows kept per table in preview (default: `25`)
- `SLUICE_CONNECT_TIMEOUT_SECS` - Database connect timeout (default: `30`)
- `SLUICE_HTTP_TIMEOUT_SECS` - HTTP source request timeout (default: `30`)
- `SLUICE_DUPLICATE_POLICY` - `replace` or `reject` when a job is scheduled twice
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILTER` - Logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
