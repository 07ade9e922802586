// ── named.conf formatter ──
//
// Renders the tree back to text. Statements are separated by a blank line.
// A block whose items are all single words stays on one line; any other
// block puts its clauses on their own indented lines. Output is read back
// line by line so a runaway no-parse payload fails with `LineTooLong`
// after the lines before it have been delivered.

use std::collections::BTreeSet;

use super::Bind9Error;
use super::ast::{
    AddressMatchList, AllowTransfer, AmlElement, AmlKind, Bind9Config, ClausePart, ControlClause,
    FilterTag, GenericClause, InetClause, ListenOn, NoParse, OptionsClause, Statement, UnixClause,
    ViewClause, Zone, ZoneClause,
};
use super::lexer::{NO_PARSE_END, NO_PARSE_GLOBAL, NO_PARSE_SCOPE, NoParseKind};

/// Longest line the formatter will emit.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Set of tags selecting which nodes are emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    tags: BTreeSet<FilterTag>,
}

impl Filter {
    pub fn new(tags: impl IntoIterator<Item = FilterTag>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
        }
    }

    /// Parse a comma separated list such as `config,zone`.
    pub fn parse(list: &str) -> Result<Self, String> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| FilterTag::parse(s).ok_or_else(|| format!("unknown filter '{}'", s.trim())))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(|tags| Self { tags })
    }

    pub fn includes(&self, tag: FilterTag) -> bool {
        self.tags.contains(&tag)
    }
}

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub indent: String,
    /// `None` emits everything.
    pub filter: Option<Filter>,
    pub max_line_len: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            indent: "\t".into(),
            filter: None,
            max_line_len: MAX_LINE_LEN,
        }
    }
}

impl FormatOptions {
    fn emits(&self, tag: FilterTag) -> bool {
        self.filter.as_ref().is_none_or(|f| f.includes(tag))
    }

    /// A block is emitted for its own tag or for any emitted child, in
    /// which case only the matching children are printed inside it.
    fn emits_statement(&self, statement: &Statement) -> bool {
        match statement {
            Statement::Options(options) => {
                self.emits(FilterTag::Config) || options.clauses.iter().any(|c| self.emits(c.tag()))
            }
            Statement::View(view) => {
                self.emits(FilterTag::View)
                    || view.clauses.iter().any(|c| self.emits_view_clause(c))
            }
            Statement::Zone(zone) => self.emits_zone(zone),
            other => self.emits(other.tag()),
        }
    }

    fn emits_view_clause(&self, clause: &ViewClause) -> bool {
        match clause {
            ViewClause::Zone(zone) => self.emits_zone(zone),
            other => self.emits(other.tag()),
        }
    }

    fn emits_zone(&self, zone: &Zone) -> bool {
        self.emits(FilterTag::Zone) || zone.clauses.iter().any(|c| self.emits(c.tag()))
    }
}

/// Lines of formatted output. Stops after the first `LineTooLong`.
pub struct FormattedLines {
    text: String,
    pos: usize,
    max: usize,
    failed: bool,
}

impl Iterator for FormattedLines {
    type Item = Result<String, Bind9Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.text.len() {
            return None;
        }
        let rest = self.text.get(self.pos..)?;
        let (line, advance) = match rest.find('\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        if line.len() > self.max {
            self.failed = true;
            return Some(Err(Bind9Error::LineTooLong { limit: self.max }));
        }
        let line = line.to_owned();
        self.pos += advance;
        Some(Ok(line))
    }
}

impl Bind9Config {
    pub fn format_lines(&self, opts: &FormatOptions) -> FormattedLines {
        FormattedLines {
            text: render(self, opts),
            pos: 0,
            max: opts.max_line_len,
            failed: false,
        }
    }

    /// Formatted text, or the first `LineTooLong` error.
    pub fn to_text(&self, opts: &FormatOptions) -> Result<String, Bind9Error> {
        let text = render(self, opts);
        if text.split('\n').any(|line| line.len() > opts.max_line_len) {
            return Err(Bind9Error::LineTooLong {
                limit: opts.max_line_len,
            });
        }
        Ok(text)
    }
}

fn render(config: &Bind9Config, opts: &FormatOptions) -> String {
    let mut w = Writer {
        out: String::new(),
        opts,
    };
    let mut first = true;
    for statement in &config.statements {
        if !opts.emits_statement(statement) {
            continue;
        }
        if !first {
            w.out.push('\n');
        }
        first = false;
        w.statement(statement);
    }
    w.out
}

struct Writer<'a> {
    out: String,
    opts: &'a FormatOptions,
}

impl Writer<'_> {
    fn line(&mut self, level: usize, text: &str) {
        for _ in 0..level {
            self.out.push_str(&self.opts.indent);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn no_parse(&mut self, level: usize, np: &NoParse) {
        for _ in 0..level {
            self.out.push_str(&self.opts.indent);
        }
        match np.kind {
            NoParseKind::Scope => {
                self.out.push_str(NO_PARSE_SCOPE);
                self.out.push_str(&np.payload);
                self.out.push_str(NO_PARSE_END);
                self.out.push('\n');
            }
            NoParseKind::Global => {
                self.out.push_str(NO_PARSE_GLOBAL);
                self.out.push_str(&np.payload);
            }
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Key(key) => {
                self.line(0, &format!("key {} {{", quote(&key.name)));
                if let Some(alg) = &key.algorithm {
                    self.line(1, &format!("algorithm {};", word(alg)));
                }
                if let Some(secret) = &key.secret {
                    self.line(1, &format!("secret {};", quote(secret)));
                }
                self.line(0, "};");
            }
            Statement::Acl(acl) => {
                self.line(0, &format!("acl {} {};", quote(&acl.name), aml(&acl.aml)));
            }
            Statement::Controls(controls) => {
                if controls.clauses.is_empty() {
                    self.line(0, "controls { };");
                    return;
                }
                self.line(0, "controls {");
                for clause in &controls.clauses {
                    let text = match clause {
                        ControlClause::Inet(inet) => inet_clause(inet),
                        ControlClause::Unix(unix) => unix_clause(unix),
                    };
                    self.line(1, &text);
                }
                self.line(0, "};");
            }
            Statement::StatisticsChannels(stats) => {
                if stats.clauses.is_empty() {
                    self.line(0, "statistics-channels { };");
                    return;
                }
                self.line(0, "statistics-channels {");
                for inet in &stats.clauses {
                    self.line(1, &inet_clause(inet));
                }
                self.line(0, "};");
            }
            Statement::Options(options) => {
                self.line(0, "options {");
                for clause in &options.clauses {
                    if !self.opts.emits(clause.tag()) {
                        continue;
                    }
                    match clause {
                        OptionsClause::AllowTransfer(at) => self.line(1, &allow_transfer(at)),
                        OptionsClause::ListenOn(l) => self.line(1, &listen_on("listen-on", l)),
                        OptionsClause::ListenOnV6(l) => {
                            self.line(1, &listen_on("listen-on-v6", l));
                        }
                        OptionsClause::Generic(g) => self.generic(1, g),
                        OptionsClause::NoParse(np) => self.no_parse(1, np),
                    }
                }
                self.line(0, "};");
            }
            Statement::View(view) => {
                let class = view
                    .class
                    .as_ref()
                    .map(|c| format!(" {}", word(c)))
                    .unwrap_or_default();
                self.line(0, &format!("view {}{class} {{", quote(&view.name)));
                for clause in &view.clauses {
                    if !self.opts.emits_view_clause(clause) {
                        continue;
                    }
                    match clause {
                        ViewClause::MatchClients(list) => {
                            self.line(1, &format!("match-clients {};", aml(list)));
                        }
                        ViewClause::AllowTransfer(at) => self.line(1, &allow_transfer(at)),
                        ViewClause::Zone(zone) => self.zone(1, zone),
                        ViewClause::Generic(g) => self.generic(1, g),
                        ViewClause::NoParse(np) => self.no_parse(1, np),
                    }
                }
                self.line(0, "};");
            }
            Statement::Zone(zone) => self.zone(0, zone),
            Statement::Include(include) => {
                self.line(0, &format!("include {};", quote(&include.path)));
            }
            Statement::Option(g) => self.generic(0, g),
            Statement::NoParse(np) => self.no_parse(0, np),
        }
    }

    fn zone(&mut self, level: usize, zone: &Zone) {
        let class = zone
            .class
            .as_ref()
            .map(|c| format!(" {}", word(c)))
            .unwrap_or_default();
        self.line(level, &format!("zone {}{class} {{", quote(&zone.name)));
        for clause in &zone.clauses {
            if !self.opts.emits(clause.tag()) {
                continue;
            }
            match clause {
                ZoneClause::AllowTransfer(at) => self.line(level + 1, &allow_transfer(at)),
                ZoneClause::Generic(g) => self.generic(level + 1, g),
                ZoneClause::NoParse(np) => self.no_parse(level + 1, np),
            }
        }
        self.line(level, "};");
    }

    fn generic(&mut self, level: usize, clause: &GenericClause) {
        let mut current = String::new();
        for part in &clause.parts {
            match part {
                ClausePart::Word { text, quoted } => {
                    push_sep(&mut current);
                    current.push_str(&if *quoted { quote(text) } else { text.clone() });
                }
                ClausePart::Block(items) if items.iter().all(GenericClause::is_simple) => {
                    push_sep(&mut current);
                    current.push_str(&inline_block(items));
                }
                ClausePart::Block(items) => {
                    push_sep(&mut current);
                    current.push('{');
                    self.line(level, &current);
                    for item in items {
                        self.generic(level + 1, item);
                    }
                    current = "}".into();
                }
            }
        }
        current.push(';');
        self.line(level, &current);
    }
}

fn push_sep(s: &mut String) {
    if !s.is_empty() {
        s.push(' ');
    }
}

fn inline_block(items: &[GenericClause]) -> String {
    if items.is_empty() {
        return "{ }".into();
    }
    let body: Vec<String> = items
        .iter()
        .filter_map(|item| match item.parts.first() {
            Some(ClausePart::Word { text, quoted }) => {
                Some(format!("{};", if *quoted { quote(text) } else { text.clone() }))
            }
            _ => None,
        })
        .collect();
    format!("{{ {} }}", body.join(" "))
}

/// Always-quoted string with escapes.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Bare word when it lexes back unchanged, quoted otherwise.
fn word(s: &str) -> String {
    let bare = !s.is_empty()
        && !s.contains("//")
        && !s.contains("/*")
        && s.chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '{' | '}' | ';' | '"' | '!' | '#'));
    if bare { s.to_owned() } else { quote(s) }
}

fn aml_element(e: &AmlElement) -> String {
    let body = match &e.kind {
        AmlKind::Address(a) => a.clone(),
        AmlKind::Keyword(k) => k.as_str().to_owned(),
        AmlKind::AclRef(name) => word(name),
        AmlKind::Key(name) => format!("key {}", word(name)),
        AmlKind::Nested(list) => aml(list),
    };
    if e.negated { format!("!{body}") } else { body }
}

fn aml(list: &AddressMatchList) -> String {
    if list.elements.is_empty() {
        return "{ }".into();
    }
    let body: Vec<String> = list
        .elements
        .iter()
        .map(|e| format!("{};", aml_element(e)))
        .collect();
    format!("{{ {} }}", body.join(" "))
}

fn string_list(items: &[String]) -> String {
    if items.is_empty() {
        return "{ }".into();
    }
    let body: Vec<String> = items.iter().map(|i| format!("{};", quote(i))).collect();
    format!("{{ {} }}", body.join(" "))
}

fn inet_clause(inet: &InetClause) -> String {
    let mut s = format!("inet {}", word(&inet.address));
    if let Some(port) = &inet.port {
        s.push_str(&format!(" port {}", word(port)));
    }
    if let Some(allow) = &inet.allow {
        s.push_str(&format!(" allow {}", aml(allow)));
    }
    if !inet.keys.is_empty() {
        s.push_str(&format!(" keys {}", string_list(&inet.keys)));
    }
    if let Some(ro) = &inet.read_only {
        s.push_str(&format!(" read-only {}", word(ro)));
    }
    s.push(';');
    s
}

fn unix_clause(unix: &UnixClause) -> String {
    let mut s = format!("unix {}", quote(&unix.path));
    for (name, value) in [
        ("perm", &unix.perm),
        ("owner", &unix.owner),
        ("group", &unix.group),
    ] {
        if let Some(v) = value {
            s.push_str(&format!(" {name} {}", word(v)));
        }
    }
    if !unix.keys.is_empty() {
        s.push_str(&format!(" keys {}", string_list(&unix.keys)));
    }
    if let Some(ro) = &unix.read_only {
        s.push_str(&format!(" read-only {}", word(ro)));
    }
    s.push(';');
    s
}

fn allow_transfer(at: &AllowTransfer) -> String {
    let mut s = String::from("allow-transfer");
    if let Some(port) = at.port {
        s.push_str(&format!(" port {port}"));
    }
    if let Some(transport) = &at.transport {
        s.push_str(&format!(" transport {}", word(transport)));
    }
    s.push_str(&format!(" {};", aml(&at.aml)));
    s
}

fn listen_on(keyword: &str, l: &ListenOn) -> String {
    let mut s = keyword.to_owned();
    if let Some(port) = l.port {
        s.push_str(&format!(" port {port}"));
    }
    for (param, value) in &l.extras {
        s.push_str(&format!(" {param} {}", word(value)));
    }
    s.push_str(&format!(" {};", aml(&l.aml)));
    s
}
