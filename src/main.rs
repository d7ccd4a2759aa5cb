use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uarchive::archive::Source;
use uarchive::codec::CompressionMethod;
use uarchive::crypto::BLOCK_SIZE;
use uarchive::profile::{ProfileRegistry, TitleProfile};
use uarchive::stream::{self, DEFAULT_BLOCK_SIZE};
use uarchive::summary::Package;

#[derive(Parser)]
#[command(name = "uarchive", about = "Inspect and preprocess engine asset packages")]
struct Cli {
    /// Log structural decode events
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProfileArgs {
    /// JSON profile registry
    #[arg(long)]
    profiles: Option<PathBuf>,
    /// Title to look up in the registry
    #[arg(long, default_value = "default")]
    title: String,
}

#[derive(Args)]
struct PackageArgs {
    input: PathBuf,
    /// Input is a chunk-compressed stream
    #[arg(short, long)]
    compressed: bool,
    #[command(flatten)]
    profile: ProfileArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompress a chunked stream to raw bytes
    Inflate { input: PathBuf, output: PathBuf },
    /// Write raw bytes as a chunked stream
    Deflate {
        input:  PathBuf,
        output: PathBuf,
        /// none, zlib, zstd, lz4, lzma, brotli
        #[arg(short, long, default_value = "zlib")]
        method: String,
        #[arg(short, long, default_value = "6")]
        level: i32,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,
    },
    /// Run the title's decryption over a region
    Decrypt {
        input:  PathBuf,
        output: PathBuf,
        #[command(flatten)]
        profile: ProfileArgs,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Bytes to decrypt (default: every whole block after the offset)
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print a package's name table
    Names(PackageArgs),
    /// Print a package's version stamps and custom versions
    Versions(PackageArgs),
    /// Decode a tagged property list and print it as JSON
    Props {
        #[command(flatten)]
        package: PackageArgs,
        #[arg(long)]
        offset: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        // ── Streams ──────────────────────────────────────────────────────────
        Commands::Inflate { input, output } => {
            let raw = stream::inflate(std::fs::read(&input)?)?;
            std::fs::write(&output, &raw)?;
            println!("Inflated {} bytes -> {}", raw.len(), output.display());
        }

        Commands::Deflate { input, output, method, level, block_size } => {
            let method = CompressionMethod::from_name(&method)
                .ok_or_else(|| format!("unknown compression method `{method}`"))?;
            let data = std::fs::read(&input)?;
            let packed = stream::encode_chunked(&data, block_size, method, level)?;
            std::fs::write(&output, &packed)?;
            println!("{} -> {} bytes ({})", data.len(), packed.len(), method.name());
        }

        // ── Crypto ───────────────────────────────────────────────────────────
        Commands::Decrypt { input, output, profile, offset, count } => {
            let profile = resolve_profile(&profile)?;
            let mut data = std::fs::read(&input)?;
            let count = count.unwrap_or_else(|| {
                let avail = data.len().saturating_sub(offset);
                avail - avail % BLOCK_SIZE
            });
            let mut ctx = profile.decryption_context(Some(input.as_path()))?;
            ctx.decrypt_located(&input.display().to_string(), &mut data, offset, count)?;
            std::fs::write(&output, &data)?;
            println!("Decrypted {count} bytes at {offset:#x} -> {}", output.display());
        }

        // ── Packages ─────────────────────────────────────────────────────────
        Commands::Names(args) => open_package(&args, Inspect::Names)?,
        Commands::Versions(args) => open_package(&args, Inspect::Versions)?,
        Commands::Props { package, offset } => open_package(&package, Inspect::Props { offset })?,
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

enum Inspect {
    Names,
    Versions,
    Props { offset: u64 },
}

fn resolve_profile(args: &ProfileArgs) -> CliResult<TitleProfile> {
    match &args.profiles {
        Some(path) => Ok(ProfileRegistry::load(path)?.get(&args.title)?.clone()),
        None => Ok(TitleProfile::default()),
    }
}

/// Open the package, through the stream proxy when compressed.
fn open_package(args: &PackageArgs, what: Inspect) -> CliResult {
    let profile = resolve_profile(&args.profile)?;
    let id = args.input.display().to_string();
    let bytes = std::fs::read(&args.input)?;
    if args.compressed {
        let pkg = Package::from_archive(stream::open_compressed(&id, bytes)?, &profile)?;
        inspect(&pkg, &profile, what)
    } else {
        let pkg = Package::open(&id, bytes, &profile)?;
        inspect(&pkg, &profile, what)
    }
}

fn inspect<S: Source>(pkg: &Package<S>, profile: &TitleProfile, what: Inspect) -> CliResult {
    match what {
        Inspect::Names => {
            for (i, name) in pkg.archive.names().iter().enumerate() {
                println!("{i:>6}  {name}");
            }
        }
        Inspect::Versions => {
            let info = pkg.archive.info();
            println!("Engine           {}", info.engine);
            println!("Legacy version   {}", pkg.summary.legacy_version);
            println!("File version     {}", info.file_version);
            println!("Licensee version {}", info.licensee_version);
            println!("Custom versions  {}", pkg.archive.versions().len());
            for v in pkg.archive.versions().iter() {
                println!("  {}  {:>4}  {}", v.guid, v.version, v.friendly_name.as_deref().unwrap_or(""));
            }
        }
        Inspect::Props { offset } => {
            let mut cursor = pkg.cursor_at(offset)?;
            let props = profile.decoder().read_properties(&mut cursor, "")?;
            println!("{}", serde_json::to_string_pretty(&props)?);
        }
    }
    Ok(())
}
