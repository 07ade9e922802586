// ── BIND9 configuration ──
//
// Parser, formatter and queries over named.conf. Queries never mutate the
// tree, so a parsed configuration can be shared behind an `Arc`.

pub mod acl;
pub mod ast;
pub mod axfr;
pub mod controls;
pub mod format;
pub mod include;
pub mod lexer;
pub mod parser;

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub use acl::{FlatElement, FlatKind, MAX_ACL_DEPTH};
pub use ast::*;
pub use axfr::{AxfrCredentials, ZoneKey};
pub use controls::{RndcAccess, RndcKey, StatisticsChannel};
pub use format::{Filter, FormatOptions, MAX_LINE_LEN};

#[derive(Debug, thiserror::Error)]
pub enum Bind9Error {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("output line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("include cycle through {}", path.display())]
    IncludeCycle { path: PathBuf },

    #[error("cannot include {}: {reason}", path.display())]
    IncludeMissing { path: PathBuf, reason: String },

    #[error("ACL nesting too deep while expanding {name}")]
    RecursionLimit { name: String },

    #[error("zone transfer disabled for zone {zone} in view {view}")]
    AllowTransferDisabled { view: String, zone: String },

    #[error("allow-transfer port {port} does not match any listen-on setting")]
    ListenerMismatch { port: u16 },

    #[error("key {name} is not defined")]
    KeyNotFound { name: String },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Bind9Config {
    pub fn parse_str(input: &str) -> Result<Self, Bind9Error> {
        Ok(Self {
            source: None,
            statements: parser::parse(input)?,
        })
    }

    pub fn parse_file(path: &Path) -> Result<Self, Bind9Error> {
        let text = fs::read_to_string(path).map_err(|source| Bind9Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse_str(&text)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyStatement> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Key(k) => Some(k),
            _ => None,
        })
    }

    /// Every zone with the view holding it; top-level zones report
    /// `DEFAULT_VIEW`.
    pub fn zones(&self) -> impl Iterator<Item = (&str, &Zone)> {
        let top = self.top_level_zones().map(|z| (DEFAULT_VIEW, z));
        let views = self
            .views()
            .flat_map(|v| v.zones().map(move |z| (v.name.as_str(), z)));
        top.chain(views)
    }

    /// Hex sha256 of the canonical rendering, used to detect changes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for line in self.format_lines(&FormatOptions::default()) {
            match line {
                Ok(line) => hasher.update(line.as_bytes()),
                Err(_) => break,
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
