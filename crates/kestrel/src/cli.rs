//! Clap derive structures for the `kestrel` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// kestrel -- Kea DHCP and BIND 9 fleet manager
#[derive(Debug, Parser)]
#[command(
    name = "kestrel",
    version,
    about = "Monitor Kea DHCP and BIND 9 servers through their agents",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log as JSON lines
    #[arg(long, env = "KESTREL_LOG_JSON", global = true)]
    pub log_json: bool,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pullers against the configured inventory
    Serve(ServeArgs),

    /// Inspect BIND 9 configuration files
    #[command(alias = "named")]
    Bind9(Bind9Args),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Server configuration file
    #[arg(long, short = 'c', env = "KESTREL_CONFIG")]
    pub config: Option<PathBuf>,
}

// ── BIND 9 ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct Bind9Args {
    #[command(subcommand)]
    pub command: Bind9Command,
}

#[derive(Debug, Subcommand)]
pub enum Bind9Command {
    /// Print a configuration in canonical form
    #[command(alias = "fmt")]
    Format(FormatArgs),

    /// Resolve zone transfer address and key
    Axfr(AxfrArgs),

    /// Resolve rndc and statistics channel access
    Rndc(SourceArgs),
}

/// A named.conf and the chroot its includes resolve under.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Path to named.conf
    pub file: PathBuf,

    /// Directory named is chrooted into
    #[arg(long)]
    pub chroot: Option<PathBuf>,

    /// Do not expand include statements
    #[arg(long)]
    pub no_includes: bool,
}

#[derive(Debug, Args)]
pub struct FormatArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Comma separated node kinds to print: config, view, zone, no-parse
    #[arg(long, short = 'f', value_parser = parse_filter)]
    pub filter: Option<kestrel_core::bind9::Filter>,

    /// Indent with N spaces instead of a tab
    #[arg(long)]
    pub indent: Option<usize>,
}

#[derive(Debug, Args)]
pub struct AxfrArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Zone name
    #[arg(long, short = 'z')]
    pub zone: String,

    /// View holding the zone; top-level zones live in `_default`
    #[arg(long, default_value = kestrel_core::bind9::DEFAULT_VIEW)]
    pub view: String,
}

fn parse_filter(value: &str) -> Result<kestrel_core::bind9::Filter, String> {
    kestrel_core::bind9::Filter::parse(value)
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
