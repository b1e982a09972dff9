//! CLI for scenegen - place a person into a scene with Gemini.

use clap::{Args, Parser, Subcommand, ValueEnum};
use scenegen::batch::{self, FailurePolicy, DEFAULT_COUNT, MAX_COUNT, MIN_COUNT};
use scenegen::image::providers::{GeminiModel, GeminiProvider};
use scenegen::image::{ImageProvider, SourceImage};
use scenegen::scene::SceneTemplate;
use scenegen::session::Session;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scenegen")]
#[command(about = "Place the person from a photo into a scene template via Gemini image models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate images of the person placed in a scene
    Generate(GenerateArgs),

    /// List available scene templates
    Scenes,

    /// Show file name, dimensions, format and size of a photo
    Inspect {
        /// Photo to inspect (PNG, JPG or JPEG)
        input: PathBuf,
    },

    /// Verify the API key and model against the Gemini API
    Check {
        /// Gemini model variant
        #[arg(short, long, value_enum, default_value = "nano-banana-preview")]
        model: ModelArg,
    },

    /// Run as MCP server (for AI agent integration)
    Mcp,
}

#[derive(Args)]
struct GenerateArgs {
    /// Photo of the person (PNG, JPG or JPEG)
    #[arg(short, long)]
    input: PathBuf,

    /// Scene template key or label (see `scenegen scenes`)
    #[arg(short, long, default_value = "cafe")]
    scene: String,

    /// Optional extra instruction appended to the scene template
    #[arg(short, long, default_value = "")]
    prompt: String,

    /// Number of images to generate
    #[arg(
        short = 'n',
        long,
        default_value_t = DEFAULT_COUNT,
        value_parser = clap::value_parser!(u32).range(MIN_COUNT as i64..=MAX_COUNT as i64)
    )]
    count: u32,

    /// Directory for generated_image_<n>.png files
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Gemini model variant
    #[arg(short, long, value_enum, default_value = "nano-banana-preview")]
    model: ModelArg,

    /// Stop at the first failed request and discard the whole batch
    #[arg(long)]
    abort_on_error: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    #[value(name = "nano-banana-preview")]
    NanoBananaPreview,
    #[value(name = "nano-banana")]
    NanoBanana,
    #[value(name = "nano-banana-pro")]
    NanoBananaPro,
}

impl From<ModelArg> for GeminiModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::NanoBananaPreview => GeminiModel::NanoBananaPreview,
            ModelArg::NanoBanana => GeminiModel::NanoBanana,
            ModelArg::NanoBananaPro => GeminiModel::NanoBananaPro,
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scenegen=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => generate(args, cli.json).await?,
        Commands::Scenes => list_scenes(cli.json)?,
        Commands::Inspect { input } => inspect(input, cli.json)?,
        Commands::Check { model } => check(model.into(), cli.json).await?,
        Commands::Mcp => run_mcp_server().await?,
    }

    Ok(())
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let scene = SceneTemplate::lookup(&args.scene)?;
    let source = SourceImage::from_path(&args.input)?;

    let provider = GeminiProvider::builder()
        .model(args.model.into())
        .timeout(Duration::from_secs(args.timeout))
        .build()?;

    let policy = if args.abort_on_error {
        FailurePolicy::AbortBatch
    } else {
        FailurePolicy::KeepPartial
    };

    if !json_output {
        println!("Source:\n{}\n", source.summary());
        println!("Scene: {}", scene);
        println!("Generating {} image(s)...", args.count);
    }

    let report = batch::generate(
        &provider,
        scene.instruction,
        &source.data,
        &args.prompt,
        args.count,
        policy,
    )
    .await;

    let summary = report.summary();
    let mut session = Session::new();
    session.record(report);
    let saved = session.save_all(&args.out_dir)?;

    if json_output {
        let result = serde_json::json!({
            "success": !saved.is_empty(),
            "scene": scene.key,
            "model": provider.model().as_str(),
            "source": source.summary(),
            "summary": summary,
            "outputs": saved.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for error in &summary.errors {
            eprintln!("error: {}", error);
        }
        if summary.aborted {
            eprintln!("batch aborted; no images kept");
        }
        println!(
            "Generated {} of {} image(s) in {}ms",
            saved.len(),
            summary.requested,
            summary.duration_ms
        );
        for path in &saved {
            println!("  {}", path.display());
        }
    }

    if saved.is_empty() {
        anyhow::bail!("no images were generated");
    }

    Ok(())
}

fn list_scenes(json_output: bool) -> anyhow::Result<()> {
    let scenes = SceneTemplate::all();

    if json_output {
        println!("{}", serde_json::to_string_pretty(scenes)?);
    } else {
        println!("Available scenes:\n");
        for s in scenes {
            println!("  {:<12} {}", s.key, s.label);
            println!("    {}", s.instruction);
        }
    }

    Ok(())
}

fn inspect(input: PathBuf, json_output: bool) -> anyhow::Result<()> {
    let summary = SourceImage::from_path(&input)?.summary();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }

    Ok(())
}

async fn check(model: GeminiModel, json_output: bool) -> anyhow::Result<()> {
    let provider = GeminiProvider::builder().model(model).build()?;
    let result = provider.health_check().await;

    if json_output {
        let value = serde_json::json!({
            "provider": provider.name(),
            "model": model.as_str(),
            "ok": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if result.is_ok() {
        println!("{} ({}): ok", provider.name(), model);
    }

    result?;
    Ok(())
}

async fn run_mcp_server() -> anyhow::Result<()> {
    tracing::info!("starting MCP server on stdio");
    let mut server = scenegen::mcp::McpServer::new();
    server.run().await?;
    Ok(())
}
