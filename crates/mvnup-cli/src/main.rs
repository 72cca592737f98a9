mod progress;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use mvnup_core::{
    Bootstrap, BootstrapError, Config, ConfigLoader, Fetcher, MavenVersion, Resolution, Resolved,
};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

/// JVM options used for the delegated build when `MAVEN_OPTS` is unset
const DEFAULT_MAVEN_OPTS: &str = "-Xss128m -Xmx4g -XX:ReservedCodeCacheSize=128m";

#[derive(Parser, Debug)]
#[command(name = "mvnup")]
#[command(about = "Install the Maven version a project declares, then run it")]
#[command(version)]
struct Args {
    /// Project directory containing pom.xml
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Use this Maven version instead of the one in pom.xml
    #[arg(long, value_name = "VERSION")]
    maven_version: Option<MavenVersion>,

    /// Directory receiving the Maven distribution [default: <project>/build]
    #[arg(long, value_name = "DIR")]
    install_root: Option<PathBuf>,

    /// Primary mirror base URL
    #[arg(long, value_name = "URL")]
    mirror: Option<String>,

    /// Fail if no checksum is published for the distribution
    #[arg(long)]
    require_checksum: bool,

    /// Ignore any Maven already on PATH
    #[arg(long)]
    force: bool,

    /// Print the resolved mvn path and exit
    #[arg(long)]
    print_path: bool,

    /// Disable the download progress bar
    #[arg(long)]
    no_progress: bool,

    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,

    /// Arguments passed to mvn
    #[arg(value_name = "MVN_ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    mvn_args: Vec<String>,
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        "off"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::new().filter_or("MVNUP_LOG", level))
        .format_timestamp(None)
        .init();
}

fn build_config(args: &Args) -> Result<Config> {
    let project_dir = if args.project_dir.is_absolute() {
        args.project_dir.clone()
    } else {
        std::env::current_dir()
            .context("Failed to determine the working directory")?
            .join(&args.project_dir)
    };

    let mut config = ConfigLoader::new(true)
        .build(&project_dir)
        .context("Failed to load configuration")?;

    if let Some(version) = args.maven_version {
        config = config.with_version(version);
    }
    if let Some(root) = &args.install_root {
        config = config.with_install_root(root);
    }
    if let Some(mirror) = &args.mirror {
        config = config.with_mirror(mirror);
    }
    if args.require_checksum {
        config = config.with_require_checksum(true);
    }
    if args.force {
        config = config.with_force(true);
    }

    Ok(config)
}

fn resolve(args: &Args, config: Config) -> Result<Resolved> {
    let pb = progress::download_bar(!args.quiet && !args.no_progress, "Maven");
    let fetcher = Fetcher::from_config(&config).with_progress(progress::tracker(pb.clone()));

    let result = Bootstrap::new(config).with_fetcher(fetcher).run();
    pb.finish_and_clear();

    let resolved = result.context("Failed to bootstrap Maven")?;

    if !args.quiet && !args.print_path {
        let source = match resolved.resolution {
            Resolution::Installed => "installed",
            Resolution::System => "from PATH",
            Resolution::Downloaded => "downloaded",
        };
        eprintln!(
            "{} Maven {} ({}) {}",
            style("mvnup").green().bold(),
            style(resolved.version).cyan(),
            source,
            style(resolved.path.display()).dim()
        );
    }

    Ok(resolved)
}

/// Run `mvn` in the project directory and return its exit code
fn delegate(mvn: &Path, project_dir: &Path, mvn_args: &[String]) -> Result<i32> {
    let mut command = Command::new(mvn);
    command.args(mvn_args).current_dir(project_dir);

    if std::env::var_os("MAVEN_OPTS").map_or(true, |v| v.is_empty()) {
        command.env("MAVEN_OPTS", DEFAULT_MAVEN_OPTS);
    }

    log::debug!("Running {} {:?} in {}", mvn.display(), mvn_args, project_dir.display());
    let status = command
        .status()
        .with_context(|| format!("Failed to run {}", mvn.display()))?;

    // Terminated by a signal
    Ok(status.code().unwrap_or(1))
}

fn run(args: Args) -> Result<i32> {
    init_logging(&args);

    let config = build_config(&args)?;
    let project_dir = config.project_dir.clone();
    let resolved = resolve(&args, config)?;

    if args.print_path {
        println!("{}", resolved.path.display());
        return Ok(0);
    }

    delegate(&resolved.path, &project_dir, &args.mvn_args)
}

fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<BootstrapError>())
        .map_or(1, |e| e.exit_code() as u8)
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
