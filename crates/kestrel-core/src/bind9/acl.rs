// ── ACL expansion ──
//
// Flattens an address match list by expanding ACL references and nested
// lists depth first. A negated reference flips every element it expands
// to. Expansion deeper than the bound fails instead of recursing forever.

use tracing::warn;

use super::Bind9Error;
use super::ast::{Acl, AddressMatchList, AmlKeyword, AmlKind, Bind9Config, Statement};

/// Maximum number of nested ACL references.
pub const MAX_ACL_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatKind {
    Address(String),
    Keyword(AmlKeyword),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatElement {
    pub negated: bool,
    pub kind: FlatKind,
}

impl Bind9Config {
    pub fn acl(&self, name: &str) -> Option<&Acl> {
        self.statements.iter().find_map(|s| match s {
            Statement::Acl(acl) if acl.name == name => Some(acl),
            _ => None,
        })
    }

    pub fn expand_aml(&self, aml: &AddressMatchList) -> Result<Vec<FlatElement>, Bind9Error> {
        self.expand_aml_bounded(aml, MAX_ACL_DEPTH)
    }

    pub fn expand_aml_bounded(
        &self,
        aml: &AddressMatchList,
        limit: usize,
    ) -> Result<Vec<FlatElement>, Bind9Error> {
        let mut out = Vec::new();
        self.walk(aml, false, 0, limit, &mut out)?;
        Ok(out)
    }

    fn walk(
        &self,
        aml: &AddressMatchList,
        negated: bool,
        depth: usize,
        limit: usize,
        out: &mut Vec<FlatElement>,
    ) -> Result<(), Bind9Error> {
        for element in &aml.elements {
            let negated = element.negated ^ negated;
            let kind = match &element.kind {
                AmlKind::Address(a) => FlatKind::Address(a.clone()),
                AmlKind::Keyword(k) => FlatKind::Keyword(*k),
                AmlKind::Key(k) => FlatKind::Key(k.clone()),
                AmlKind::Nested(list) => {
                    self.walk(list, negated, depth, limit, out)?;
                    continue;
                }
                AmlKind::AclRef(name) => {
                    if depth >= limit {
                        return Err(Bind9Error::RecursionLimit { name: name.clone() });
                    }
                    match self.acl(name) {
                        Some(acl) => self.walk(&acl.aml, negated, depth + 1, limit, out)?,
                        None => warn!(acl = %name, "reference to undefined ACL"),
                    }
                    continue;
                }
            };
            out.push(FlatElement { negated, kind });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fmt::Write;

    fn config(text: &str) -> Bind9Config {
        Bind9Config::parse_str(text).unwrap()
    }

    fn acl_list(cfg: &Bind9Config, name: &str) -> AddressMatchList {
        cfg.acl(name).unwrap().aml.clone()
    }

    #[test]
    fn negated_reference_flips_elements() {
        let cfg = config("acl a { !b; 10.0.0.1; }; acl b { 192.0.2.1; !192.0.2.2; key k; };");
        let flat = cfg.expand_aml(&acl_list(&cfg, "a")).unwrap();
        assert_eq!(
            flat,
            vec![
                FlatElement {
                    negated: true,
                    kind: FlatKind::Address("192.0.2.1".into())
                },
                FlatElement {
                    negated: false,
                    kind: FlatKind::Address("192.0.2.2".into())
                },
                FlatElement {
                    negated: true,
                    kind: FlatKind::Key("k".into())
                },
                FlatElement {
                    negated: false,
                    kind: FlatKind::Address("10.0.0.1".into())
                },
            ]
        );
    }

    #[test]
    fn cycle_hits_recursion_limit() {
        let cfg = config("acl acl1 { acl2; }; acl acl2 { acl3; }; acl acl3 { acl1; };");
        let err = cfg.expand_aml(&acl_list(&cfg, "acl1")).unwrap_err();
        assert!(matches!(err, Bind9Error::RecursionLimit { .. }));
        // Repeated calls behave the same.
        assert!(cfg.expand_aml(&acl_list(&cfg, "acl1")).is_err());
    }

    #[test]
    fn chain_at_the_bound_expands() {
        let mut text = String::new();
        for i in 0..MAX_ACL_DEPTH {
            write!(text, "acl a{i} {{ a{}; }}; ", i + 1).unwrap();
        }
        write!(text, "acl a{MAX_ACL_DEPTH} {{ 192.0.2.1; }};").unwrap();
        let cfg = config(&text);
        // a1..a32 is 32 hops, a0..a32 is one too many.
        let top = config("acl top { a1; };");
        let refs = top.acl("top").unwrap().aml.clone();
        assert_eq!(cfg.expand_aml(&refs).unwrap().len(), 1);

        let refs = config("acl top { a0; };").acl("top").unwrap().aml.clone();
        assert!(cfg.expand_aml(&refs).is_err());
    }

    #[test]
    fn undefined_reference_is_skipped() {
        let cfg = config("acl a { missing; any; };");
        let flat = cfg.expand_aml(&acl_list(&cfg, "a")).unwrap();
        assert_eq!(flat.len(), 1);
    }
}
