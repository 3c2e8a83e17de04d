use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dsprites::{config, ExportConfig, OutputFormat};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Split the dSprites image array into equally sized PyTorch tensor files.
///
/// Without a subcommand, exports `images0.pt` ... `images9.pt` from the
/// default archive into the working directory.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    export: ExportArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the fields of an archive and its pickled metadata
    Inspect {
        /// Archive to inspect
        #[arg(value_name = "ARCHIVE", default_value = config::DEFAULT_ARCHIVE)]
        archive: PathBuf,

        /// Memory-map the archive instead of reading it
        #[arg(long)]
        mmap: bool,
    },
    /// Read written chunk files back and compare them with the archive
    Verify(ExportArgs),
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Source `.npz` archive
    #[arg(long, value_name = "FILE", default_value = config::DEFAULT_ARCHIVE)]
    archive: PathBuf,

    /// Archive member to split
    #[arg(long, default_value = config::DEFAULT_FIELD)]
    field: String,

    /// Number of chunk files
    #[arg(long, value_name = "N", default_value_t = config::DEFAULT_CHUNKS)]
    chunks: usize,

    /// Directory the chunk files are written to
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// File name prefix, followed by the chunk index
    #[arg(long, default_value = config::DEFAULT_PREFIX)]
    prefix: String,

    /// Container format of the chunk files
    #[arg(long, value_enum, default_value_t = OutputFormat::Pt)]
    format: OutputFormat,

    /// Memory-map the archive instead of reading it
    #[arg(long)]
    mmap: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

impl From<ExportArgs> for ExportConfig {
    fn from(args: ExportArgs) -> Self {
        Self {
            archive: args.archive,
            field: args.field,
            chunks: args.chunks,
            output_dir: args.output_dir,
            prefix: args.prefix,
            format: args.format,
            mmap: args.mmap,
            progress: !args.no_progress,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        None => {
            let config = ExportConfig::from(cli.export);
            let report = dsprites::export(&config)
                .with_context(|| format!("failed to export {}", config.archive.display()))?;
            info!(
                chunks = report.files.len(),
                slice_size = report.plan.slice_size(),
                sample_shape = ?report.sample_shape,
                "done"
            );
        }
        Some(Command::Inspect { archive, mmap }) => {
            let summary = dsprites::inspect(&archive, mmap)
                .with_context(|| format!("failed to inspect {}", archive.display()))?;
            print!("{summary}");
        }
        Some(Command::Verify(args)) => {
            let config = ExportConfig::from(args);
            let checked = dsprites::verify(&config).with_context(|| {
                format!("chunks in {} do not match", config.output_dir.display())
            })?;
            println!(
                "{checked} chunks in {} match {}",
                config.output_dir.display(),
                config.archive.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_arguments_uses_defaults() {
        let cli = Cli::try_parse_from(["dsprites-export"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(ExportConfig::from(cli.export), ExportConfig::default());
    }

    #[test]
    fn test_flags_and_subcommands() {
        let cli = Cli::try_parse_from([
            "dsprites-export",
            "--chunks",
            "4",
            "--output-dir",
            "out",
            "--no-progress",
        ])
        .unwrap();
        let config = ExportConfig::from(cli.export);
        assert_eq!(config.chunks, 4);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(!config.progress);

        let cli = Cli::try_parse_from(["dsprites-export", "inspect", "a.npz"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Inspect { archive, mmap: false }) if archive == PathBuf::from("a.npz")
        ));

        let cli = Cli::try_parse_from(["dsprites-export", "verify", "--chunks", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Verify(ExportArgs { chunks: 3, .. }))
        ));
    }
}
