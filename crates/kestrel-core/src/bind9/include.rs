// ── Include expansion ──
//
// Replaces top-level `include` statements with the statements of the
// referenced files. Absolute paths are rooted at the chroot when one is
// set; relative paths resolve against the including file's directory.
// A cycle leaves the offending include in place.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Bind9Error;
use super::ast::{Bind9Config, Statement};
use super::parser::parse;

impl Bind9Config {
    /// Expand includes in place.
    ///
    /// Returns the paths whose inclusion was skipped because of a cycle.
    /// On error the tree is left untouched.
    pub fn expand_includes(&mut self, chroot: Option<&Path>) -> Result<Vec<PathBuf>, Bind9Error> {
        let base = self
            .source
            .as_deref()
            .and_then(Path::parent)
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut stack: Vec<PathBuf> = self
            .source
            .as_deref()
            .and_then(|src| fs::canonicalize(src).ok())
            .into_iter()
            .collect();
        let mut skipped = Vec::new();
        let expanded = expand(&self.statements, &base, chroot, &mut stack, &mut skipped)?;
        self.statements = expanded;
        Ok(skipped)
    }
}

fn expand(
    statements: &[Statement],
    base_dir: &Path,
    chroot: Option<&Path>,
    stack: &mut Vec<PathBuf>,
    skipped: &mut Vec<PathBuf>,
) -> Result<Vec<Statement>, Bind9Error> {
    let mut out = Vec::with_capacity(statements.len());
    for statement in statements {
        let Statement::Include(include) = statement else {
            out.push(statement.clone());
            continue;
        };

        let path = resolve(&include.path, base_dir, chroot);
        let canonical = fs::canonicalize(&path).map_err(|e| Bind9Error::IncludeMissing {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if stack.contains(&canonical) {
            let cycle = Bind9Error::IncludeCycle {
                path: canonical.clone(),
            };
            warn!(error = %cycle, "leaving include unexpanded");
            skipped.push(canonical);
            out.push(statement.clone());
            continue;
        }

        let text = fs::read_to_string(&canonical).map_err(|e| Bind9Error::IncludeMissing {
            path: canonical.clone(),
            reason: e.to_string(),
        })?;
        let nested = parse(&text)?;
        debug!(path = %canonical.display(), statements = nested.len(), "expanding include");

        let dir = canonical
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        stack.push(canonical);
        let children = expand(&nested, &dir, chroot, stack, skipped);
        stack.pop();
        out.extend(children?);
    }
    Ok(out)
}

fn resolve(path: &str, base_dir: &Path, chroot: Option<&Path>) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        match chroot {
            Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
            None => path.to_path_buf(),
        }
    } else {
        base_dir.join(path)
    }
}
