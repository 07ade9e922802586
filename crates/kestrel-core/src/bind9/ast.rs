// ── named.conf tree ──
//
// One variant per statement kind. Statements the core never queries are
// kept as generic clauses so they survive formatting unchanged.

use std::path::PathBuf;

use super::lexer::NoParseKind;

/// Sentinel name of the implicit view holding top-level zones.
pub const DEFAULT_VIEW: &str = "_default";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bind9Config {
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Key(KeyStatement),
    Acl(Acl),
    Controls(Controls),
    StatisticsChannels(StatisticsChannels),
    Options(Options),
    View(View),
    Zone(Zone),
    Include(Include),
    Option(GenericClause),
    NoParse(NoParse),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatement {
    pub name: String,
    pub algorithm: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub name: String,
    pub aml: AddressMatchList,
}

// ── Address match lists ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressMatchList {
    pub elements: Vec<AmlElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmlElement {
    pub negated: bool,
    pub kind: AmlKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmlKeyword {
    Any,
    None,
    Localhost,
    Localnets,
}

impl AmlKeyword {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "any" => Some(Self::Any),
            "none" => Some(Self::None),
            "localhost" => Some(Self::Localhost),
            "localnets" => Some(Self::Localnets),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::None => "none",
            Self::Localhost => "localhost",
            Self::Localnets => "localnets",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmlKind {
    /// IP literal or CIDR prefix.
    Address(String),
    Keyword(AmlKeyword),
    AclRef(String),
    Key(String),
    Nested(AddressMatchList),
}

impl AddressMatchList {
    pub fn new(elements: Vec<AmlElement>) -> Self {
        Self { elements }
    }

    /// A non-negated occurrence of the keyword.
    pub fn has_keyword(&self, keyword: AmlKeyword) -> bool {
        self.elements
            .iter()
            .any(|e| !e.negated && e.kind == AmlKind::Keyword(keyword))
    }

    /// A non-negated occurrence of the literal address.
    pub fn has_address(&self, address: &str) -> bool {
        self.elements
            .iter()
            .any(|e| !e.negated && matches!(&e.kind, AmlKind::Address(a) if a == address))
    }

    /// Non-negated address literals in order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match &e.kind {
            AmlKind::Address(a) if !e.negated => Some(a.as_str()),
            _ => None,
        })
    }
}

// ── Controls and statistics channels ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InetClause {
    /// Address literal or `*`.
    pub address: String,
    /// Port number or `*`.
    pub port: Option<String>,
    pub allow: Option<AddressMatchList>,
    pub keys: Vec<String>,
    pub read_only: Option<String>,
}

impl InetClause {
    pub fn port_number(&self) -> Option<u16> {
        self.port.as_deref().and_then(|p| p.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnixClause {
    pub path: String,
    /// Permissions kept literally (`0600`).
    pub perm: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub keys: Vec<String>,
    pub read_only: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlClause {
    Inet(InetClause),
    Unix(UnixClause),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Controls {
    pub clauses: Vec<ControlClause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatisticsChannels {
    pub clauses: Vec<InetClause>,
}

// ── Options, views and zones ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllowTransfer {
    pub port: Option<u16>,
    pub transport: Option<String>,
    pub aml: AddressMatchList,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListenOn {
    pub port: Option<u16>,
    /// `proxy`, `tls` and `http` parameters in source order.
    pub extras: Vec<(String, String)>,
    pub aml: AddressMatchList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsClause {
    AllowTransfer(AllowTransfer),
    ListenOn(ListenOn),
    ListenOnV6(ListenOn),
    Generic(GenericClause),
    NoParse(NoParse),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Options {
    pub clauses: Vec<OptionsClause>,
}

impl Options {
    pub fn allow_transfer(&self) -> Option<&AllowTransfer> {
        self.clauses.iter().find_map(|c| match c {
            OptionsClause::AllowTransfer(at) => Some(at),
            _ => None,
        })
    }

    /// `listen-on` and `listen-on-v6` clauses in order, tagged by family.
    pub fn listeners(&self) -> impl Iterator<Item = (bool, &ListenOn)> {
        self.clauses.iter().filter_map(|c| match c {
            OptionsClause::ListenOn(l) => Some((false, l)),
            OptionsClause::ListenOnV6(l) => Some((true, l)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewClause {
    MatchClients(AddressMatchList),
    AllowTransfer(AllowTransfer),
    Zone(Zone),
    Generic(GenericClause),
    NoParse(NoParse),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub name: String,
    pub class: Option<String>,
    pub clauses: Vec<ViewClause>,
}

impl View {
    pub fn match_clients(&self) -> Option<&AddressMatchList> {
        self.clauses.iter().find_map(|c| match c {
            ViewClause::MatchClients(aml) => Some(aml),
            _ => None,
        })
    }

    pub fn allow_transfer(&self) -> Option<&AllowTransfer> {
        self.clauses.iter().find_map(|c| match c {
            ViewClause::AllowTransfer(at) => Some(at),
            _ => None,
        })
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.clauses.iter().filter_map(|c| match c {
            ViewClause::Zone(z) => Some(z),
            _ => None,
        })
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones().find(|z| zone_names_match(&z.name, name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneClause {
    AllowTransfer(AllowTransfer),
    Generic(GenericClause),
    NoParse(NoParse),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub class: Option<String>,
    pub clauses: Vec<ZoneClause>,
}

impl Zone {
    pub fn allow_transfer(&self) -> Option<&AllowTransfer> {
        self.clauses.iter().find_map(|c| match c {
            ZoneClause::AllowTransfer(at) => Some(at),
            _ => None,
        })
    }
}

/// Zone names compare case-insensitively and ignore the trailing dot.
pub fn zone_names_match(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub path: String,
}

// ── Generic clauses ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClausePart {
    Word { text: String, quoted: bool },
    Block(Vec<GenericClause>),
}

/// Any clause the parser does not model: words and nested blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericClause {
    pub parts: Vec<ClausePart>,
}

impl GenericClause {
    /// First word of the clause.
    pub fn name(&self) -> Option<&str> {
        match self.parts.first() {
            Some(ClausePart::Word { text, .. }) => Some(text),
            _ => None,
        }
    }

    /// A single bare word, rendered inline inside blocks.
    pub fn is_simple(&self) -> bool {
        matches!(self.parts.as_slice(), [ClausePart::Word { .. }])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoParse {
    pub payload: String,
    pub kind: NoParseKind,
}

// ── Filtering ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterTag {
    Config,
    View,
    Zone,
    NoParse,
}

impl FilterTag {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "config" => Some(Self::Config),
            "view" => Some(Self::View),
            "zone" => Some(Self::Zone),
            "no-parse" => Some(Self::NoParse),
            _ => None,
        }
    }
}

impl Statement {
    pub fn tag(&self) -> FilterTag {
        match self {
            Self::Key(_)
            | Self::Acl(_)
            | Self::Controls(_)
            | Self::StatisticsChannels(_)
            | Self::Options(_)
            | Self::Include(_)
            | Self::Option(_) => FilterTag::Config,
            Self::View(_) => FilterTag::View,
            Self::Zone(_) => FilterTag::Zone,
            Self::NoParse(_) => FilterTag::NoParse,
        }
    }
}

impl OptionsClause {
    pub fn tag(&self) -> FilterTag {
        match self {
            Self::NoParse(_) => FilterTag::NoParse,
            _ => FilterTag::Config,
        }
    }
}

impl ViewClause {
    pub fn tag(&self) -> FilterTag {
        match self {
            Self::Zone(_) => FilterTag::Zone,
            Self::NoParse(_) => FilterTag::NoParse,
            _ => FilterTag::View,
        }
    }
}

impl ZoneClause {
    pub fn tag(&self) -> FilterTag {
        match self {
            Self::NoParse(_) => FilterTag::NoParse,
            _ => FilterTag::Zone,
        }
    }
}
