mod cli;

use derivforge::config::{self, Config};
use derivforge::dispatch::TaskEnvelope;
use derivforge::service::{parse_targets, MediaService, ThumbnailRequest};
use derivforge::source::LocalLocator;
use derivforge::thumbnail::parse_preview_time;
use derivforge::SourceDescriptor;
use derivforge_av::ToolPaths;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, SourceArgs};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// How long the CLI waits for background uploads before exiting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3600);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "derivforge=debug,derivforge_av=debug,derivforge_common=debug".to_string()
        } else {
            "derivforge=info,derivforge_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Thumb {
            source,
            format,
            accept,
            width,
            time,
            times,
            count,
        } => {
            let (service, source) = open(config_path, &source)?;
            let mut request = ThumbnailRequest::new(source).format(format);
            request.accept = accept;
            request.width = width;
            request.time = parse_preview_time(time.as_deref());

            if times.is_some() || count.is_some() {
                let frames = service.thumbnail_strip(&request, times.as_deref(), count)?;
                print_json(&frames)?;
            } else {
                print_json(&service.thumbnail(&request)?)?;
            }
            drain(&service);
            Ok(())
        }
        Commands::Proxy { source } => {
            let (service, source) = open(config_path, &source)?;
            print_json(&service.fast_proxy(&source)?)?;
            drain(&service);
            Ok(())
        }
        Commands::Hd { source } => {
            let (service, source) = open(config_path, &source)?;
            print_json(&service.hd_proxy(&source)?)?;
            drain(&service);
            Ok(())
        }
        Commands::Hls { source } => {
            let (service, source) = open(config_path, &source)?;
            print_json(&service.hls(&source)?)?;
            drain(&service);
            Ok(())
        }
        Commands::Prepare { source, targets } => {
            let (service, source) = open(config_path, &source)?;
            let report = service.prepare(&source, &parse_targets(&targets))?;
            print_json(&report)?;
            // Local background work dies with the process.
            drain(&service);
            Ok(())
        }
        Commands::Sources { source } => {
            let (service, source) = open(config_path, &source)?;
            print_json(&service.sources(&source)?)
        }
        Commands::RunTask => run_task(config_path),
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate { file } => {
            let path = file.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("derivforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load(config_path: Option<&Path>) -> Result<Config> {
    config::load_config_or_default(config_path)
}

/// Build the service and resolve the source descriptor.
fn open(config_path: Option<&Path>, args: &SourceArgs) -> Result<(MediaService, SourceDescriptor)> {
    let config = load(config_path)?;

    let source = match (args.size, &config.origin.local_root) {
        (Some(size), _) => SourceDescriptor::new(
            args.share.as_str(),
            &args.path,
            size,
            args.modified.clone().unwrap_or_default(),
        )?,
        (None, Some(root)) => {
            let described = LocalLocator::new(root).describe(&args.share, &args.path)?;
            match &args.modified {
                Some(modified) => SourceDescriptor {
                    modified: modified.clone(),
                    ..described
                },
                None => described,
            }
        }
        (None, None) => anyhow::bail!("--size is required when [origin] local_root is not set"),
    };

    let service = MediaService::builder(config)
        .build()
        .context("Failed to initialize derivative service")?;
    Ok((service, source))
}

fn drain(service: &MediaService) {
    if !service.dispatcher().wait_idle(DRAIN_TIMEOUT) {
        tracing::warn!("background tasks still running at exit");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_task(config_path: Option<&Path>) -> Result<()> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read task envelope from stdin")?;
    let envelope: TaskEnvelope =
        serde_json::from_str(&raw).context("Failed to parse task envelope")?;

    let service = MediaService::builder(load(config_path)?)
        .build()
        .context("Failed to initialize derivative service")?;
    service
        .execute(&envelope)
        .with_context(|| format!("Task {} failed", envelope.id))?;
    drain(&service);
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let paths = ToolPaths::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );

    println!("Checking external tools...\n");

    let tools = derivforge_av::check_tools(&paths);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable derivative generation.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let ladder: Vec<String> = config::parse_renditions(&config.hls.renditions)
        .iter()
        .map(|r| r.name())
        .collect();
    println!("  Thumbnail cache: {}", config.cache.thumbnail_dir.display());
    println!("  Proxy cache: {}", config.cache.proxy_dir.display());
    println!("  HLS cache: {}", config.cache.hls_dir.display());
    println!("  HLS ladder: {}", ladder.join(", "));
    println!(
        "  Concurrency: thumbnails={} fast={} hd={} hls={}",
        config.thumbnails.max_concurrency,
        config.fast_proxy.max_concurrency,
        config.hd_proxy.max_concurrency,
        config.hls.max_concurrency
    );
    println!("  Offload: {}", if config.offload.is_active() { "active" } else { "off" });
    println!(
        "  Dispatch: {}",
        config.dispatch.queue_url.as_deref().unwrap_or("local threads")
    );

    Ok(())
}
