use clap::{Parser, Subcommand};
use rehydrate::config::{self, RunConfig};
use rehydrate::imaging::{ImageCodec, RustCodec};
use rehydrate::output;
use rehydrate::pipeline::{self, Workspace};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rehydrate")]
#[command(about = "Turn a web-archive crawl dump into a static site")]
#[command(long_about = "\
Turn a web-archive crawl dump into a static site

A crawl dump is a directory of whatever the crawler saved: timestamped folders,
resources with ?ver= suffixes in their names, and pages that still link to the
archive. Rehydrate copies it into a clean output tree and fixes it up:

  dump/                                  site/
  └── web/20210301/site.example/         ├── index.html
      ├── index.html                     ├── blog/index.html
      ├── blog/index.html          →     ├── assets/css/style.css
      ├── wp-content/style.css@ver=3     ├── assets/images/logo.png
      ├── old/style (1).css              ├── robots.txt
      └── logo.png                       └── sitemap.xml

Stages (run all with 'build', or one at a time):
  prepare      copy the dump, flatten the domain root into the output
  consolidate  gather assets into assets/{images,css,js,fonts}, drop duplicates
  rewrite      point every link at its file in the output, remove archive toolbars
  minify       strip comments from pages, stylesheets and scripts

Unresolvable links are left exactly as they were.

Run 'rehydrate gen-config' to generate a documented rehydrate.toml.")]
#[command(version)]
struct Cli {
    /// Crawl dump to read (default: the only candidate directory in the working directory)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "site", global = true)]
    output: PathBuf,

    /// Directory for intermediate files (resource table)
    #[arg(long, default_value = ".rehydrate-temp", global = true)]
    temp_dir: PathBuf,

    /// Config file (default: ./rehydrate.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Public domain of the site, overrides site.domain
    #[arg(long, global = true)]
    domain: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy the dump into the output and flatten its domain root
    Prepare,
    /// Gather assets into canonical directories and write the resource table
    Consolidate,
    /// Rewrite references in pages and stylesheets, scrub archive scaffolding
    Rewrite,
    /// Strip comments and blank lines from text assets
    Minify,
    /// Run the full pipeline: prepare → consolidate → images → prune → rewrite → minify → sitemap
    Build,
    /// Report what a build would find, without writing anything
    Check,
    /// Print a stock rehydrate.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Command::GenConfig => print!("{}", config::stock_config_toml()),
        stage => run_stage(stage, &cli)?,
    }

    Ok(())
}

fn run_stage(command: &Command, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let ws = Workspace::new(&cwd, &cli.output, &cli.temp_dir);
    let run_config = load_run_config(cli, &cwd)?;
    init_thread_pool(&run_config.processing);

    match command {
        Command::Prepare => {
            let source = ws.locate_source(cli.source.as_deref())?;
            println!("==> Preparing {} → {}", source.display(), ws.output.display());
            let report = pipeline::run_prepare(&source, &ws, &run_config)?;
            output::print_prepare(&report);
        }
        Command::Consolidate => {
            let report = pipeline::run_consolidate(&ws, &run_config)?;
            output::print_consolidate(&report);
        }
        Command::Rewrite => {
            let stats = pipeline::run_rewrite(&ws, &run_config)?;
            output::print_rewrite(&stats);
        }
        Command::Minify => {
            let stats = pipeline::run_minify(&ws, &run_config)?;
            output::print_minify(stats.as_ref());
        }
        Command::Build => {
            let source = ws.locate_source(cli.source.as_deref())?;
            println!("==> Building {} → {}", source.display(), ws.output.display());
            let codec = RustCodec::new(run_config.images.jpeg_quality);
            let today = chrono::Local::now().date_naive();
            let report = pipeline::build(
                &source,
                &ws,
                &run_config,
                Some(&codec as &dyn ImageCodec),
                today,
            )?;
            output::print_build(&report);
            println!("==> Build complete: {}", ws.output.display());
        }
        Command::Check => {
            let source = ws.locate_source(cli.source.as_deref())?;
            println!("==> Checking {}", source.display());
            let report = pipeline::check(&source)?;
            output::print_check(&report);
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }

    Ok(())
}

fn load_run_config(cli: &Cli, cwd: &std::path::Path) -> Result<RunConfig, config::ConfigError> {
    let mut run_config = config::load_config(cli.config.as_deref(), cwd)?;
    run_config.apply_domain(cli.domain.as_deref())?;
    Ok(run_config)
}

/// Log to stderr, `info` unless `RUST_LOG` says otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: users can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
