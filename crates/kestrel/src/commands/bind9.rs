//! `kestrel bind9` handlers: format, zone transfer and rndc lookups.

use std::io::{self, BufWriter, Write};

use kestrel_core::bind9::{AxfrCredentials, Bind9Config, FormatOptions, RndcAccess};
use tracing::{debug, warn};

use crate::cli::{AxfrArgs, Bind9Args, Bind9Command, FormatArgs, SourceArgs};
use crate::error::CliError;

pub fn handle(args: Bind9Args) -> Result<(), CliError> {
    match args.command {
        Bind9Command::Format(args) => format(&args),
        Bind9Command::Axfr(args) => axfr(&args),
        Bind9Command::Rndc(args) => rndc(&args),
    }
}

/// Parse the file and, unless disabled, splice in its includes.
fn load(source: &SourceArgs) -> Result<Bind9Config, CliError> {
    let mut config = Bind9Config::parse_file(&source.file)?;
    if !source.no_includes {
        let skipped = config.expand_includes(source.chroot.as_deref())?;
        for path in skipped {
            warn!(path = %path.display(), "include cycle, statement left in place");
        }
    }
    debug!(statements = config.statements.len(), file = %source.file.display(), "parsed");
    Ok(config)
}

fn format(args: &FormatArgs) -> Result<(), CliError> {
    let config = load(&args.source)?;
    let mut opts = FormatOptions {
        filter: args.filter.clone(),
        ..FormatOptions::default()
    };
    if let Some(width) = args.indent {
        opts.indent = " ".repeat(width);
    }

    let mut out = BufWriter::new(io::stdout().lock());
    for line in config.format_lines(&opts) {
        let line = line?;
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

fn axfr(args: &AxfrArgs) -> Result<(), CliError> {
    let config = load(&args.source)?;
    let creds = config.get_axfr_credentials(&args.view, &args.zone)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", render_axfr(&creds))?;
    Ok(())
}

fn rndc(args: &SourceArgs) -> Result<(), CliError> {
    let config = load(args)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", render_rndc(&config.rndc_access()))?;
    match config.statistics_channel() {
        Some(channel) => writeln!(out, "statistics: {}", channel.address())?,
        None => writeln!(out, "statistics: none")?,
    }
    Ok(())
}

fn render_axfr(creds: &AxfrCredentials) -> String {
    let mut text = format!("address: {}", creds.address());
    match &creds.key {
        Some(key) => {
            text.push_str(&format!(
                "\nkey: {}\nalgorithm: {}\nsecret: {}",
                key.name, key.algorithm, key.secret
            ));
        }
        None => text.push_str("\nkey: none"),
    }
    text
}

fn render_rndc(access: &RndcAccess) -> String {
    match access {
        RndcAccess::Disabled => "rndc: disabled".to_owned(),
        RndcAccess::Default { .. } => {
            format!("rndc: {} (default)", access.address().unwrap_or_default())
        }
        RndcAccess::Enabled { key, .. } => {
            let address = access.address().unwrap_or_default();
            match key {
                Some(key) => format!(
                    "rndc: {address}\nkey: {}\nalgorithm: {}",
                    key.name,
                    key.algorithm.as_deref().unwrap_or("unknown")
                ),
                None => format!("rndc: {address}"),
            }
        }
    }
}
