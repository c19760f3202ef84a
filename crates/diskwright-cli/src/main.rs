//! Diskwright CLI - Inspect, create and convert disk images.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use diskwright_core::{
    CreateOptions, DiskFormat, DiskRepresentation, Subformat, Toolbox, ToolboxOptions,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Detect, create and convert raw, ISO, QCOW2 and VMDK disk images.
#[derive(Parser)]
#[command(name = "diskwright")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Install missing helpers without asking.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Show debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never retry failing package manager calls through sudo.
    #[arg(long, global = true)]
    no_sudo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display information about a disk image.
    Info {
        /// Path to the image.
        file: PathBuf,
    },

    /// Convert a disk image to another format.
    Convert {
        /// Path to the source image.
        file: PathBuf,

        /// Target format.
        #[arg(short, long, value_enum)]
        format: FormatArg,

        /// Target subformat (e.g. streamOptimized, monolithicSparse, rockridge).
        #[arg(short, long)]
        subformat: Option<String>,

        /// Directory for the converted image. Defaults to the current directory.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Create a new disk image.
    Create {
        /// Path of the image to create.
        path: PathBuf,

        /// Image format. Defaults to the one implied by the file extension.
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// Image subformat.
        #[arg(short, long)]
        subformat: Option<String>,

        /// Capacity in megabytes.
        #[arg(short, long)]
        capacity: Option<u64>,

        /// Files to place in the image.
        files: Vec<PathBuf>,
    },

    /// List known helper programs and their status.
    Helpers {
        /// Install the named helper.
        #[arg(long, value_name = "NAME")]
        install: Option<String>,
    },
}

/// Disk format argument mapping.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    /// Plain raw image.
    Raw,
    /// ISO 9660 CD-ROM image.
    Iso,
    /// QEMU QCOW2 image.
    Qcow2,
    /// VMware VMDK image.
    Vmdk,
}

impl From<FormatArg> for DiskFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Raw => DiskFormat::Raw,
            FormatArg::Iso => DiskFormat::Iso,
            FormatArg::Qcow2 => DiskFormat::Qcow2,
            FormatArg::Vmdk => DiskFormat::Vmdk,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Hidden until a conversion starts; install prompts suspend it.
    let spinner = ProgressBar::hidden();

    let mut options = ToolboxOptions::default();
    if cli.yes {
        options = options.assume_yes();
    } else if std::io::stdin().is_terminal() {
        options = options.with_confirm(prompt_above(spinner.clone(), ask_user));
    }
    if cli.no_sudo {
        options = options.without_elevation();
    }
    let toolbox = Toolbox::new(options);

    match cli.command {
        Commands::Info { file } => show_info(&toolbox, &file)?,
        Commands::Convert {
            file,
            format,
            subformat,
            output_dir,
        } => run_convert(
            &toolbox,
            &spinner,
            &file,
            format.into(),
            subformat.as_deref(),
            &output_dir,
        )?,
        Commands::Create {
            path,
            format,
            subformat,
            capacity,
            files,
        } => run_create(&toolbox, &path, format, subformat.as_deref(), capacity, files)?,
        Commands::Helpers { install } => show_helpers(&toolbox, install.as_deref())?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn ask_user(prompt: &str) -> bool {
    eprint!("{} [y/N] ", prompt);
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Run `ask` with `spinner` cleared from the terminal.
fn prompt_above(
    spinner: ProgressBar,
    ask: impl Fn(&str) -> bool + 'static,
) -> impl Fn(&str) -> bool + 'static {
    move |prompt| spinner.suspend(|| ask(prompt))
}

fn parse_subformat(subformat: Option<&str>) -> Result<Option<Subformat>> {
    subformat
        .map(|s| s.parse::<Subformat>())
        .transpose()
        .context("invalid subformat")
}

fn show_info(toolbox: &Toolbox, file: &Path) -> Result<()> {
    let disk = DiskRepresentation::from_file(toolbox, file)?;

    println!("Disk Information");
    println!("================");
    println!();
    println!("Path:      {}", disk.path().display());
    println!("Format:    {}", disk.disk_format());
    if let Some(subformat) = disk.subformat() {
        println!("Subformat: {}", subformat);
    }
    println!("Drive:     {}", disk.predicted_drive_type());
    match disk.capacity(toolbox) {
        Ok(capacity) => println!("Capacity:  {}", format_bytes(capacity)),
        Err(err) => println!("Capacity:  unknown ({})", err),
    }

    match disk.files(toolbox) {
        Ok(Some(files)) if files.is_empty() => println!("Files:     None"),
        Ok(Some(files)) => {
            println!();
            println!("Files:");
            for (i, name) in files.iter().enumerate() {
                println!("  {}. {}", i + 1, name);
            }
        }
        Ok(None) => {}
        Err(err) => println!("Files:     unavailable ({})", err),
    }

    Ok(())
}

fn run_convert(
    toolbox: &Toolbox,
    spinner: &ProgressBar,
    file: &Path,
    format: DiskFormat,
    subformat: Option<&str>,
    output_dir: &Path,
) -> Result<()> {
    let subformat = parse_subformat(subformat)?;
    let disk = DiskRepresentation::from_file(toolbox, file)?;

    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Converting {} ({}) to {}", file.display(), disk.disk_format(), format));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = disk.convert(toolbox, format, subformat, output_dir);
    spinner.finish_and_clear();
    let converted = result?;

    if converted.path() == disk.path() {
        println!("{} is already {}; nothing to do.", file.display(), format);
    } else {
        println!("Converted: {}", converted.path().display());
        if let Ok(metadata) = std::fs::metadata(converted.path()) {
            println!("Size:      {}", format_bytes(metadata.len()));
        }
    }
    Ok(())
}

fn run_create(
    toolbox: &Toolbox,
    path: &Path,
    format: Option<FormatArg>,
    subformat: Option<&str>,
    capacity_mb: Option<u64>,
    files: Vec<PathBuf>,
) -> Result<()> {
    let format = match format {
        Some(format) => format.into(),
        None => format_from_extension(path)?,
    };
    let subformat = parse_subformat(subformat)?;
    let options = CreateOptions {
        capacity: capacity_mb.map(capacity_bytes).transpose()?,
        files,
    };

    let disk = DiskRepresentation::create_file(toolbox, path, format, subformat, &options)?;
    println!("Created:   {} ({})", disk.path().display(), disk.disk_format());
    Ok(())
}

fn capacity_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .with_context(|| format!("capacity of {} MB is too large", mb))
}

fn format_from_extension(path: &Path) -> Result<DiskFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "img" | "raw" => Ok(DiskFormat::Raw),
        "iso" => Ok(DiskFormat::Iso),
        "qcow2" => Ok(DiskFormat::Qcow2),
        "vmdk" => Ok(DiskFormat::Vmdk),
        _ => bail!(
            "cannot tell the format of '{}' from its extension; pass --format",
            path.display()
        ),
    }
}

fn show_helpers(toolbox: &Toolbox, install: Option<&str>) -> Result<()> {
    if let Some(name) = install {
        let Some(helper) = toolbox.get(name) else {
            bail!("unknown helper '{}'", name);
        };
        helper.install(toolbox)?;
        println!("'{}' is installed at {}", name, helper.path().unwrap_or_default().display());
        return Ok(());
    }

    println!("{:<14} {:<10} {:<12} {}", "HELPER", "VERSION", "INSTALLABLE", "PATH");
    for helper in toolbox.helpers() {
        let version = if helper.is_usable() {
            helper
                .version()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "?".to_string())
        } else {
            "-".to_string()
        };
        let path = helper
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string());
        let installable = if helper.is_installed() {
            "-"
        } else if helper.is_installable(toolbox) {
            "yes"
        } else {
            "no"
        };
        println!("{:<14} {:<10} {:<12} {}", helper.name(), version, installable, path);
    }
    Ok(())
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
