use clap::{Args, Parser, Subcommand, ValueEnum};
use pretvm_core::config::TargetOverrides;
use pretvm_core::PlatformType;
use std::path::PathBuf;

/// pretvm - static multi-core scheduler for reactor programs
#[derive(Parser, Debug)]
#[command(name = "pretvm", about = "Compile reactor programs into PRET-VM schedules")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Schedule a program description and emit the instruction streams
    Compile(CompileArgs),
    /// List the attributes a program may carry
    Attributes,
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Program description (YAML)
    pub program: PathBuf,

    /// Worker cores to schedule onto (0 = all available)
    #[arg(long)]
    pub cores: Option<u32>,

    /// Target platform (overrides the program's `platform` property)
    #[arg(long)]
    pub platform: Option<PlatformType>,

    /// Drop physical-time waits
    #[arg(long)]
    pub fast: bool,

    /// TOML file with target property overrides
    #[arg(long, env = "PRETVM_TARGET_CONFIG")]
    pub target_config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Write Graphviz files for every domain into this directory
    #[arg(long)]
    pub dot: Option<PathBuf>,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Listing,
}

impl CompileArgs {
    /// Target properties set on the command line; these win over every
    /// other source.
    pub fn overrides(&self) -> TargetOverrides {
        TargetOverrides {
            cores: self.cores,
            platform: self.platform,
            fast: self.fast.then_some(true),
            ..TargetOverrides::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compile_flags() {
        let args = CliArgs::parse_from([
            "pretvm", "compile", "prog.yaml", "--cores", "2", "--platform", "flexpret", "--format", "listing",
        ]);
        let Command::Compile(compile) = args.command else {
            panic!("expected compile");
        };
        assert_eq!(compile.program, PathBuf::from("prog.yaml"));
        assert_eq!(compile.format, OutputFormat::Listing);
        let overrides = compile.overrides();
        assert_eq!(overrides.cores, Some(2));
        assert_eq!(overrides.platform, Some(PlatformType::FlexPret));
        assert_eq!(overrides.fast, None);
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let err = CliArgs::try_parse_from(["pretvm", "compile", "prog.yaml", "--platform", "amiga"]);
        assert!(err.is_err());
    }
}
