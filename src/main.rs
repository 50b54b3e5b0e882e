//! gpt-fixtures CLI - generate and verify transformer golden-data fixtures

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gpt_fixtures::debug::{verify_fixtures, ValidationConfig};
use gpt_fixtures::{FixtureConfig, FixtureDriver, GptConfig, ModelType, WeightSource, VERSION};

/// gpt-fixtures - capture every intermediate of a gpt-nano forward pass
#[derive(Parser, Debug)]
#[command(name = "gpt-fixtures")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Defaults to `generate` with the reference settings
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the model and partials fixtures
    Generate {
        /// YAML fixture config (defaults to the gpt-nano sort run)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pretrained weights (.safetensors or a model fixture .json)
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Use seeded random weights instead of a checkpoint
        #[arg(long, conflicts_with = "weights")]
        random_init: bool,

        /// Number of input rows
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Directory for both output files
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Replay a model fixture and compare against a partials fixture
    Verify {
        /// Model fixture
        #[arg(long, default_value = "public/gpt-nano-sort-model.json")]
        model: PathBuf,

        /// Partials fixture
        #[arg(long, default_value = "public/gpt-nano-sort-t0-partials.json")]
        partials: PathBuf,

        /// Absolute tolerance
        #[arg(long, default_value = "1e-4")]
        atol: f32,

        /// Relative tolerance
        #[arg(long, default_value = "1e-3")]
        rtol: f32,
    },

    /// Show model configuration
    Info {
        /// Model type preset
        #[arg(short, long, default_value = "gpt-nano")]
        model_type: String,

        /// YAML model config to check and show instead of a preset
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn generate(
    config: Option<PathBuf>,
    weights: Option<PathBuf>,
    random_init: bool,
    batch_size: Option<usize>,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let mut fixture_config = match config {
        Some(path) => FixtureConfig::load(&path).context("Failed to load fixture config")?,
        None => FixtureConfig::default(),
    };
    if let Some(weights) = weights {
        fixture_config.weights = weights;
    }
    if let Some(batch_size) = batch_size {
        fixture_config.batch_size = batch_size;
    }
    if let Some(dir) = out_dir {
        for path in [&mut fixture_config.model_out, &mut fixture_config.partials_out] {
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .ok_or_else(|| anyhow::anyhow!("Output path {:?} has no file name", path))?;
            *path = dir.join(file_name);
        }
    }

    let mut driver = FixtureDriver::new(fixture_config);
    if random_init {
        driver = driver.with_source(WeightSource::RandomInit);
    }

    let pb = create_progress_bar("Loading weights...");
    let model = driver.load_model();
    pb.finish_and_clear();
    let summary = driver.run_model(&model?)?;

    info!("Model fixture: {:?}", summary.model_path);
    info!("Partials fixture: {:?} ({} tensors)", summary.partials_path, summary.num_captures);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("gpt-fixtures v{}", VERSION);

    let command = cli.command.unwrap_or(Commands::Generate {
        config: None,
        weights: None,
        random_init: false,
        batch_size: None,
        out_dir: None,
    });

    match command {
        Commands::Generate {
            config,
            weights,
            random_init,
            batch_size,
            out_dir,
        } => generate(config, weights, random_init, batch_size, out_dir),

        Commands::Verify {
            model,
            partials,
            atol,
            rtol,
        } => {
            let config = ValidationConfig {
                atol,
                rtol,
                verbose: cli.verbose,
                ..ValidationConfig::default()
            };
            let validator = verify_fixtures(&model, &partials, config)?;
            validator.print_summary();

            if !validator.all_passed() {
                anyhow::bail!("Fixture verification failed");
            }
            Ok(())
        }

        Commands::Info { model_type, config } => {
            let config = match config {
                Some(path) => GptConfig::load(&path).context("Failed to load model config")?,
                None => {
                    let defaults = GptConfig::gpt_nano_sort();
                    GptConfig::from_model_type(&model_type, defaults.vocab_size, defaults.block_size)?
                }
            };
            println!("{:#?}", config);

            println!("Known model types:");
            for preset in ModelType::ALL {
                let (n_layer, n_head, n_embd) = preset.dims();
                println!(
                    "  {:<12} n_layer={:<3} n_head={:<3} n_embd={}",
                    preset.tag(),
                    n_layer,
                    n_head,
                    n_embd
                );
            }
            Ok(())
        }
    }
}
