use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cffi_backend::{
    Backend, CType, Field, LayoutFile, PrimitiveKind, RuntimeConfig, TypeKind,
};

/// Layout rule override for the `layout` command.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RuleArg {
    GccX86,
    GccArm,
    Msvc,
}

#[derive(Parser)]
#[command(name = "cffi-backend")]
#[command(about = "Inspect C primitive types and struct layouts as the runtime computes them")]
struct Cli {
    /// Runtime configuration file (TOML)
    #[arg(short, long, global = true, env = "CFFI_BACKEND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every primitive type with its size, alignment and signedness
    Primitives,
    /// Lay out the structs and unions declared in a TOML file
    Layout {
        /// Path to the record declarations
        #[arg(short, long)]
        file: PathBuf,
        /// Override the configured bitfield rule
        #[arg(long)]
        rule: Option<RuleArg>,
    },
}

fn signedness(kind: PrimitiveKind) -> &'static str {
    if kind.is_float() {
        "float"
    } else if kind.is_integer_like() && kind.is_signed() {
        "signed"
    } else if kind.is_integer_like() {
        "unsigned"
    } else {
        "-"
    }
}

fn print_primitives() {
    println!("{:<20} {:>5} {:>6}  sign", "type", "size", "align");
    for kind in PrimitiveKind::ALL {
        println!(
            "{:<20} {:>5} {:>6}  {}",
            kind.name(),
            kind.size(),
            kind.alignment(),
            signedness(kind)
        );
    }
}

fn describe_field(field: &Field) -> String {
    let name = if field.name().is_empty() {
        "<anonymous>"
    } else {
        field.name()
    };
    let bits = if field.is_bitfield() {
        format!(" bits {}..{}", field.bitshift(), field.bitshift() + field.bitsize())
    } else {
        String::new()
    };
    format!(
        "  {:<16} {:<24} offset {:>4}{}",
        name,
        field.ctype().cname(),
        field.offset(),
        bits
    )
}

fn print_record(ct: &CType) -> anyhow::Result<()> {
    let kind = match ct.kind() {
        TypeKind::Union => "union",
        _ => "struct",
    };
    let layout = ct
        .record_layout()
        .ok_or_else(|| anyhow::anyhow!("{} '{}' was not completed", kind, ct.cname()))?;
    println!(
        "{}: size {}, alignment {}",
        ct.cname(),
        layout.size(),
        layout.alignment()
    );
    for field in layout.fields() {
        println!("{}", describe_field(field));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    tracing::debug!(config = ?config, "configuration loaded");

    match cli.command {
        Commands::Primitives => print_primitives(),
        Commands::Layout { file, rule } => {
            let mut profile = *Backend::with_config(&config).profile();
            if let Some(rule) = rule {
                profile.bitfields = match rule {
                    RuleArg::GccX86 => cffi_backend::BitfieldRule::GccX86,
                    RuleArg::GccArm => cffi_backend::BitfieldRule::GccArm,
                    RuleArg::Msvc => cffi_backend::BitfieldRule::Msvc,
                };
            }
            let records = LayoutFile::from_file(&file)?.build(&profile)?;
            tracing::info!(file = %file.display(), records = records.len(), "layout computed");
            for (i, ct) in records.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_record(ct)?;
            }
        }
    }

    Ok(())
}
