use clap::{Parser, Subcommand, ValueEnum};
use imgbundle::config::{self, BundleConfig};
use imgbundle::derive::Artifact;
use imgbundle::metadata::MetadataSource;
use imgbundle::object::{ImageObject, ImageOptions};
use imgbundle::output;
use imgbundle::package::{DEFAULT_TABLE, PackageLoader, SqliteTable};
use imgbundle::source::{Credentials, RemoteAccess};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imgbundle")]
#[command(about = "Lazily derived artifacts for imaging study objects")]
#[command(long_about = "\
Lazily derived artifacts for imaging study objects

A source is a file, a .zip archive of files, or a remote object
(s3://bucket/key). Its members are classified by name and content, and
derived artifacts are produced on demand by external converters in a
disposable workspace:

  <workspace>/
  ├── source/<name>     # fetched source
  ├── unpacked/         # archive members or a link to the source
  ├── logs/             # <tool>.stdout / <tool>.stderr
  ├── image.nii.gz      # nifti-1
  ├── image+orig.HEAD   # afni
  ├── image.nrrd        # nrrd
  ├── image.xcede       # xcede
  └── thumbnail.png     # thumbnail

The workspace is removed when the command finishes; use --out to keep an
artifact. Set RUST_LOG to control logging (default imgbundle=info).

Run 'imgbundle gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to stock settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Access key for remote sources
    #[arg(long, global = true, requires = "secret_key")]
    access_key: Option<String>,

    /// Secret key for remote sources
    #[arg(long, global = true, requires = "access_key")]
    secret_key: Option<String>,

    /// Fail early when a source does not exist
    #[arg(long, global = true)]
    check_existence: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArtifactArg {
    #[value(name = "nifti-1")]
    Nifti1,
    #[value(name = "nifti-1-gz")]
    Nifti1Gz,
    Afni,
    Nrrd,
    Xcede,
    Thumbnail,
}

impl From<ArtifactArg> for Artifact {
    fn from(arg: ArtifactArg) -> Self {
        match arg {
            ArtifactArg::Nifti1 => Artifact::CanonicalVolume,
            ArtifactArg::Nifti1Gz => Artifact::CompressedVolume,
            ArtifactArg::Afni => Artifact::AfniVolume,
            ArtifactArg::Nrrd => Artifact::NrrdVolume,
            ArtifactArg::Xcede => Artifact::Descriptor,
            ArtifactArg::Thumbnail => Artifact::Thumbnail,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Classify a source and list its members per format
    Files { source: String },
    /// Check whether a source exists without fetching it (exit status 1 if not)
    Exists { source: String },
    /// Derive one artifact and print its path
    Derive {
        source: String,
        artifact: ArtifactArg,
        /// Copy the artifact here before the workspace is removed
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Extract metadata by inspection and print it as JSON
    Metadata { source: String },
    /// Load a package directory or table and report its rows
    Package {
        /// Package directory containing image03.txt
        dir: Option<PathBuf>,
        /// Read rows from a SQLite database instead
        #[arg(long, conflicts_with = "dir")]
        sqlite: Option<PathBuf>,
        /// Table to read from the database
        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,
        /// Derive this artifact for every image
        #[arg(long)]
        derive: Option<ArtifactArg>,
        /// Worker threads (defaults to processing.max_processes or all cores)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let options = image_options(&cli)?;

    match cli.command {
        Command::Files { source } => {
            let image = ImageObject::new(&source, options)?;
            let files = image.files()?;
            output::print_files(image.locator(), &files);
        }
        Command::Exists { source } => {
            let image = ImageObject::new(&source, options)?;
            let exists = image.exists()?;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        Command::Derive {
            source,
            artifact,
            out,
        } => {
            let artifact = Artifact::from(artifact);
            let image = ImageObject::new(&source, options)?;
            let path = image.artifact(artifact)?;
            let copied = match out {
                Some(dir) => copy_out(artifact, &path, &dir)?,
                None => Vec::new(),
            };
            output::print_artifact(artifact, &path, &copied);
            image.release();
        }
        Command::Metadata { source } => {
            let options = ImageOptions {
                metadata: MetadataSource::Extract,
                ..options
            };
            let image = ImageObject::new(&source, options)?;
            let record = image.metadata()?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Package {
            dir,
            sqlite,
            table,
            derive,
            workers,
        } => {
            let mut loader = PackageLoader::new(options);
            if let Some(workers) = workers {
                loader = loader.with_workers(workers);
            }
            let package = match (dir, sqlite) {
                (_, Some(db)) => loader.load_table(&SqliteTable::new(&db, &table))?,
                (Some(dir), None) => loader.load_dir(&dir)?,
                (None, None) => return Err("package needs a directory or --sqlite".into()),
            };
            output::print_package(&package);
            if let Some(artifact) = derive {
                let artifact = Artifact::from(artifact);
                let results = package.derive_all(artifact);
                output::print_derive_all(&package, artifact, &results);
            }
            package.release_all();
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imgbundle=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn image_options(cli: &Cli) -> Result<ImageOptions, config::ConfigError> {
    let config: BundleConfig = match &cli.config {
        Some(path) => config::load_config_file(path)?,
        None => config::resolve_config(None)?,
    };
    let remote = match (&cli.access_key, &cli.secret_key) {
        (Some(access), Some(secret)) => RemoteAccess::Credentials(Credentials::new(access, secret)),
        _ => RemoteAccess::None,
    };
    Ok(ImageOptions {
        config: Arc::new(config),
        remote,
        check_existence: cli.check_existence,
        ..ImageOptions::default()
    })
}

/// Copy an artifact out of the workspace. AFNI datasets are copied as both
/// halves of the pair.
fn copy_out(artifact: Artifact, path: &Path, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let sources: Vec<PathBuf> = if artifact == Artifact::AfniVolume {
        [".HEAD", ".BRIK"]
            .iter()
            .map(|suffix| {
                let mut name = path.as_os_str().to_owned();
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    } else {
        vec![path.to_path_buf()]
    };

    let mut copied = Vec::new();
    for source in sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let dest = dir.join(name);
        std::fs::copy(&source, &dest)?;
        copied.push(dest);
    }
    Ok(copied)
}
