use anyhow::{bail, Context, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use clap::{Parser, Subcommand};
use goletter::config::Config;
use goletter::includes::parse_includes;
use goletter::network::{
    resolve_region, user_ip, Ip2RegionBuilder, Ip2RegionLocator, RequestContext,
};
use goletter::snowflake::{decompose, SnowflakeGenerator};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "goletter-cli")]
#[command(about = "Request helper diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the province and city of an IP address
    Region {
        /// IPv4 address to look up
        ip: String,
        /// Path to the ip2region xdb file (defaults to IP2REGION_DB_PATH)
        #[arg(long)]
        db: Option<String>,
    },
    /// Compile a `start_ip|end_ip|region` listing into an xdb file
    BuildDb {
        /// Source listing, one segment per line
        source: PathBuf,
        /// Destination xdb file
        output: PathBuf,
    },
    /// Expand an include parameter into every nested path
    Includes {
        /// Comma separated include paths, e.g. "author.comments,tags"
        raw: String,
    },
    /// Resolve the client IP the server would see for a request
    Ip {
        /// Request header as NAME:VALUE (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        /// Socket address of the peer, e.g. 10.0.0.1:5000
        #[arg(long)]
        remote: Option<SocketAddr>,
        /// Value printed when nothing identifies the client
        #[arg(long, default_value = "127.0.0.1")]
        default: String,
    },
    /// Generate or inspect snowflake IDs
    Snowflake {
        #[command(subcommand)]
        command: SnowflakeCommands,
    },
}

#[derive(Subcommand)]
enum SnowflakeCommands {
    /// Generate new IDs
    Next {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Split an ID into timestamp, data center, worker and sequence
    Decompose { id: u64 },
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            bail!("header '{}' must be formatted as NAME:VALUE", entry);
        };
        let name = HeaderName::try_from(name.trim())
            .with_context(|| format!("invalid header name in '{}'", entry))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in '{}'", entry))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Compile a source listing into an xdb file, returning the segment count
/// and the version of the written image
fn build_db(source: &Path, output: &Path) -> Result<(usize, u16)> {
    let listing = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let builder = Ip2RegionBuilder::from_source(&listing)
        .with_context(|| format!("Failed to parse {}", source.display()))?;
    let segments = builder.len();
    let image = builder.build()?;
    std::fs::write(output, &image)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let locator = Ip2RegionLocator::from_bytes(image)?;
    Ok((segments, locator.version()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Region { ip, db } => {
            let Some(path) = db.or(config.geo.ip2region_db_path) else {
                bail!("no database given; pass --db or set IP2REGION_DB_PATH");
            };
            let locator = Ip2RegionLocator::open(&path)
                .with_context(|| format!("Failed to open ip2region database at {}", path))?;
            let region = resolve_region(&locator, &ip)?;

            if region.is_empty() {
                println!("⚠ No province/city found for '{}'", ip);
            } else {
                println!("{:<10} {}", "Province", region.province);
                println!("{:<10} {}", "City", region.city);
            }
        }
        Commands::BuildDb { source, output } => {
            let (segments, version) = build_db(&source, &output)?;
            println!("✓ Wrote {} segments to {}", segments, output.display());
            println!("{:<10} {}", "Version", version);
        }
        Commands::Includes { raw } => {
            for path in parse_includes(Some(&raw)) {
                println!("{}", path);
            }
        }
        Commands::Ip {
            headers,
            remote,
            default,
        } => {
            let context = RequestContext::new(parse_headers(&headers)?, remote);
            println!("{}", user_ip(Some(&context), &default));
        }
        Commands::Snowflake { command } => match command {
            SnowflakeCommands::Next { count } => {
                let generator = SnowflakeGenerator::new(config.snowflake)?;
                for _ in 0..count {
                    println!("{}", generator.generate()?);
                }
            }
            SnowflakeCommands::Decompose { id } => {
                let meta = decompose(id, config.snowflake.begin_second);
                println!("{:<15} {}", "Timestamp (ms)", meta.timestamp_ms);
                println!("{:<15} {}", "Data center", meta.data_center_id);
                println!("{:<15} {}", "Worker", meta.worker_id);
                println!("{:<15} {}", "Sequence", meta.sequence);
            }
        },
    }

    Ok(())
}
