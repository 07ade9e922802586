// ── named.conf parser ──
//
// Hand-written recursive descent over the lexer's tokens. Semicolons are
// optional before a closing brace. Global no-parse directives are only
// accepted between top-level statements.

use std::net::IpAddr;

use super::Bind9Error;
use super::ast::{
    Acl, AddressMatchList, AllowTransfer, AmlElement, AmlKeyword, AmlKind, ClausePart,
    ControlClause, Controls, GenericClause, InetClause, Include, KeyStatement, ListenOn, NoParse,
    Options, OptionsClause, Statement, StatisticsChannels, UnixClause, View, ViewClause, Zone,
    ZoneClause,
};
use super::lexer::{NoParseKind, Token, TokenKind, tokenize};

pub fn parse(input: &str) -> Result<Vec<Statement>, Bind9Error> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let mut statements = Vec::new();
    while let Some(kind) = parser.peek() {
        if *kind == TokenKind::Semicolon {
            parser.pos += 1;
            continue;
        }
        statements.push(parser.statement()?);
    }
    Ok(statements)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // ── Token helpers ───────────────────────────────────────────────

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(TokenKind::Word(w)) => Some(w),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos)?.kind.clone();
        self.pos += 1;
        Some(token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn unexpected(&self, expected: &str) -> Bind9Error {
        let found = self
            .peek()
            .map_or_else(|| "end of input".to_owned(), TokenKind::describe);
        Bind9Error::Parse {
            line: self.line(),
            message: format!("unexpected {found}, expected {expected}"),
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<(), Bind9Error> {
        if self.peek() == Some(kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn keyword(&mut self, word: &str) -> Result<(), Bind9Error> {
        if self.peek_word() == Some(word) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    /// A word or quoted string.
    fn name(&mut self) -> Result<String, Bind9Error> {
        match self.peek() {
            Some(TokenKind::Word(_) | TokenKind::Str(_)) => match self.next() {
                Some(TokenKind::Word(w) | TokenKind::Str(w)) => Ok(w),
                _ => Err(self.unexpected("a name")),
            },
            _ => Err(self.unexpected("a name")),
        }
    }

    fn number(&mut self) -> Result<u16, Bind9Error> {
        let line = self.line();
        let text = self.name()?;
        text.parse().map_err(|_| Bind9Error::Parse {
            line,
            message: format!("invalid port number '{text}'"),
        })
    }

    fn end_clause(&mut self) -> Result<(), Bind9Error> {
        match self.peek() {
            Some(TokenKind::Semicolon) => {
                self.pos += 1;
                Ok(())
            }
            Some(TokenKind::RBrace) | None => Ok(()),
            _ => Err(self.unexpected("';'")),
        }
    }

    fn at_block_end(&self) -> Result<bool, Bind9Error> {
        match self.peek() {
            Some(TokenKind::RBrace) => Ok(true),
            None => Err(self.unexpected("'}'")),
            _ => Ok(false),
        }
    }

    fn skip_semicolon(&mut self) -> bool {
        if self.peek() == Some(&TokenKind::Semicolon) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn scoped_no_parse(&mut self) -> Result<NoParse, Bind9Error> {
        match self.next() {
            Some(TokenKind::NoParse {
                payload,
                kind: NoParseKind::Scope,
            }) => Ok(NoParse {
                payload,
                kind: NoParseKind::Scope,
            }),
            _ => {
                self.pos -= 1;
                Err(Bind9Error::Parse {
                    line: self.line(),
                    message: "global no-parse directive is only allowed at the top level".into(),
                })
            }
        }
    }

    // ── Statements ──────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Statement, Bind9Error> {
        if let Some(TokenKind::NoParse { .. }) = self.peek() {
            return match self.next() {
                Some(TokenKind::NoParse { payload, kind }) => {
                    Ok(Statement::NoParse(NoParse { payload, kind }))
                }
                _ => Err(self.unexpected("a statement")),
            };
        }
        let statement = match self.peek_word() {
            Some("key") => Statement::Key(self.key()?),
            Some("acl") => Statement::Acl(self.acl()?),
            Some("controls") => Statement::Controls(self.controls()?),
            Some("statistics-channels") => Statement::StatisticsChannels(self.statistics()?),
            Some("options") => Statement::Options(self.options()?),
            Some("view") => Statement::View(self.view()?),
            Some("zone") => Statement::Zone(self.zone()?),
            Some("include") => {
                self.pos += 1;
                let path = self.name()?;
                self.end_clause()?;
                Statement::Include(Include { path })
            }
            _ => Statement::Option(self.generic_clause()?),
        };
        Ok(statement)
    }

    fn key(&mut self) -> Result<KeyStatement, Bind9Error> {
        self.keyword("key")?;
        let name = self.name()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut key = KeyStatement {
            name,
            algorithm: None,
            secret: None,
        };
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            match self.peek_word() {
                Some("algorithm") => {
                    self.pos += 1;
                    key.algorithm = Some(self.name()?);
                }
                Some("secret") => {
                    self.pos += 1;
                    key.secret = Some(self.name()?);
                }
                _ => return Err(self.unexpected("'algorithm' or 'secret'")),
            }
            self.end_clause()?;
        }
        self.pos += 1;
        self.end_clause()?;
        Ok(key)
    }

    fn acl(&mut self) -> Result<Acl, Bind9Error> {
        self.keyword("acl")?;
        let name = self.name()?;
        let aml = self.aml()?;
        self.end_clause()?;
        Ok(Acl { name, aml })
    }

    fn aml(&mut self) -> Result<AddressMatchList, Bind9Error> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut elements = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            let negated = if self.peek() == Some(&TokenKind::Bang) {
                self.pos += 1;
                true
            } else {
                false
            };
            let kind = match self.peek() {
                Some(TokenKind::LBrace) => AmlKind::Nested(self.aml()?),
                Some(TokenKind::Word(w)) if w == "key" => {
                    self.pos += 1;
                    AmlKind::Key(self.name()?)
                }
                Some(TokenKind::Word(_) | TokenKind::Str(_)) => classify(self.name()?),
                _ => return Err(self.unexpected("an address match element")),
            };
            elements.push(AmlElement { negated, kind });
        }
        self.pos += 1;
        Ok(AddressMatchList { elements })
    }

    fn string_list(&mut self) -> Result<Vec<String>, Bind9Error> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut items = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            items.push(self.name()?);
        }
        self.pos += 1;
        Ok(items)
    }

    // ── controls / statistics-channels ──────────────────────────────

    fn controls(&mut self) -> Result<Controls, Bind9Error> {
        self.keyword("controls")?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut clauses = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            match self.peek_word() {
                Some("inet") => clauses.push(ControlClause::Inet(self.inet()?)),
                Some("unix") => clauses.push(ControlClause::Unix(self.unix()?)),
                _ => return Err(self.unexpected("'inet' or 'unix'")),
            }
        }
        self.pos += 1;
        self.end_clause()?;
        Ok(Controls { clauses })
    }

    fn statistics(&mut self) -> Result<StatisticsChannels, Bind9Error> {
        self.keyword("statistics-channels")?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut clauses = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            clauses.push(self.inet()?);
        }
        self.pos += 1;
        self.end_clause()?;
        Ok(StatisticsChannels { clauses })
    }

    fn inet(&mut self) -> Result<InetClause, Bind9Error> {
        self.keyword("inet")?;
        let mut clause = InetClause {
            address: self.name()?,
            ..InetClause::default()
        };
        loop {
            match self.peek() {
                Some(TokenKind::Semicolon) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::RBrace) => break,
                Some(TokenKind::Word(w)) => match w.as_str() {
                    "port" => {
                        self.pos += 1;
                        clause.port = Some(self.name()?);
                    }
                    "allow" => {
                        self.pos += 1;
                        clause.allow = Some(self.aml()?);
                    }
                    "keys" => {
                        self.pos += 1;
                        clause.keys = self.string_list()?;
                    }
                    "read-only" => {
                        self.pos += 1;
                        clause.read_only = Some(self.name()?);
                    }
                    _ => return Err(self.unexpected("'port', 'allow', 'keys' or 'read-only'")),
                },
                _ => return Err(self.unexpected("';'")),
            }
        }
        Ok(clause)
    }

    fn unix(&mut self) -> Result<UnixClause, Bind9Error> {
        self.keyword("unix")?;
        let mut clause = UnixClause {
            path: self.name()?,
            ..UnixClause::default()
        };
        loop {
            match self.peek() {
                Some(TokenKind::Semicolon) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::RBrace) => break,
                Some(TokenKind::Word(w)) => match w.as_str() {
                    "perm" => {
                        self.pos += 1;
                        clause.perm = Some(self.name()?);
                    }
                    "owner" => {
                        self.pos += 1;
                        clause.owner = Some(self.name()?);
                    }
                    "group" => {
                        self.pos += 1;
                        clause.group = Some(self.name()?);
                    }
                    "keys" => {
                        self.pos += 1;
                        clause.keys = self.string_list()?;
                    }
                    "read-only" => {
                        self.pos += 1;
                        clause.read_only = Some(self.name()?);
                    }
                    _ => {
                        return Err(
                            self.unexpected("'perm', 'owner', 'group', 'keys' or 'read-only'")
                        );
                    }
                },
                _ => return Err(self.unexpected("';'")),
            }
        }
        Ok(clause)
    }

    // ── options / view / zone ───────────────────────────────────────

    fn options(&mut self) -> Result<Options, Bind9Error> {
        self.keyword("options")?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut clauses = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            let clause = match self.peek() {
                Some(TokenKind::NoParse { .. }) => OptionsClause::NoParse(self.scoped_no_parse()?),
                Some(TokenKind::Word(w)) if w == "allow-transfer" => {
                    OptionsClause::AllowTransfer(self.allow_transfer()?)
                }
                Some(TokenKind::Word(w)) if w == "listen-on" => {
                    OptionsClause::ListenOn(self.listen_on()?)
                }
                Some(TokenKind::Word(w)) if w == "listen-on-v6" => {
                    OptionsClause::ListenOnV6(self.listen_on()?)
                }
                _ => OptionsClause::Generic(self.generic_clause()?),
            };
            clauses.push(clause);
        }
        self.pos += 1;
        self.end_clause()?;
        Ok(Options { clauses })
    }

    fn allow_transfer(&mut self) -> Result<AllowTransfer, Bind9Error> {
        self.keyword("allow-transfer")?;
        let mut at = AllowTransfer::default();
        loop {
            match self.peek() {
                Some(TokenKind::LBrace) => {
                    at.aml = self.aml()?;
                    break;
                }
                Some(TokenKind::Word(w)) if w == "port" => {
                    self.pos += 1;
                    at.port = Some(self.number()?);
                }
                Some(TokenKind::Word(w)) if w == "transport" => {
                    self.pos += 1;
                    at.transport = Some(self.name()?);
                }
                _ => return Err(self.unexpected("'port', 'transport' or '{'")),
            }
        }
        self.end_clause()?;
        Ok(at)
    }

    fn listen_on(&mut self) -> Result<ListenOn, Bind9Error> {
        // `listen-on` or `listen-on-v6`
        self.pos += 1;
        let mut listen = ListenOn::default();
        loop {
            match self.peek() {
                Some(TokenKind::LBrace) => {
                    listen.aml = self.aml()?;
                    break;
                }
                Some(TokenKind::Word(w)) if w == "port" => {
                    self.pos += 1;
                    listen.port = Some(self.number()?);
                }
                Some(TokenKind::Word(_)) => {
                    let param = self.name()?;
                    let value = self.name()?;
                    listen.extras.push((param, value));
                }
                _ => return Err(self.unexpected("'port' or '{'")),
            }
        }
        self.end_clause()?;
        Ok(listen)
    }

    fn class(&mut self) -> Result<Option<String>, Bind9Error> {
        match self.peek() {
            Some(TokenKind::Word(_) | TokenKind::Str(_)) => Ok(Some(self.name()?)),
            _ => Ok(None),
        }
    }

    fn view(&mut self) -> Result<View, Bind9Error> {
        self.keyword("view")?;
        let name = self.name()?;
        let class = self.class()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut clauses = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            let clause = match self.peek() {
                Some(TokenKind::NoParse { .. }) => ViewClause::NoParse(self.scoped_no_parse()?),
                Some(TokenKind::Word(w)) if w == "match-clients" => {
                    self.pos += 1;
                    let aml = self.aml()?;
                    self.end_clause()?;
                    ViewClause::MatchClients(aml)
                }
                Some(TokenKind::Word(w)) if w == "allow-transfer" => {
                    ViewClause::AllowTransfer(self.allow_transfer()?)
                }
                Some(TokenKind::Word(w)) if w == "zone" => ViewClause::Zone(self.zone()?),
                _ => ViewClause::Generic(self.generic_clause()?),
            };
            clauses.push(clause);
        }
        self.pos += 1;
        self.end_clause()?;
        Ok(View {
            name,
            class,
            clauses,
        })
    }

    fn zone(&mut self) -> Result<Zone, Bind9Error> {
        self.keyword("zone")?;
        let name = self.name()?;
        let class = self.class()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut clauses = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            let clause = match self.peek() {
                Some(TokenKind::NoParse { .. }) => ZoneClause::NoParse(self.scoped_no_parse()?),
                Some(TokenKind::Word(w)) if w == "allow-transfer" => {
                    ZoneClause::AllowTransfer(self.allow_transfer()?)
                }
                _ => ZoneClause::Generic(self.generic_clause()?),
            };
            clauses.push(clause);
        }
        self.pos += 1;
        self.end_clause()?;
        Ok(Zone {
            name,
            class,
            clauses,
        })
    }

    // ── Generic clauses ─────────────────────────────────────────────

    fn generic_clause(&mut self) -> Result<GenericClause, Bind9Error> {
        let mut parts = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::Semicolon) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::RBrace) | None if !parts.is_empty() => break,
                Some(TokenKind::Word(_) | TokenKind::Str(_)) => match self.next() {
                    Some(TokenKind::Word(text)) => parts.push(ClausePart::Word {
                        text,
                        quoted: false,
                    }),
                    Some(TokenKind::Str(text)) => parts.push(ClausePart::Word { text, quoted: true }),
                    _ => return Err(self.unexpected("a clause")),
                },
                Some(TokenKind::Bang) => {
                    self.pos += 1;
                    parts.push(ClausePart::Word {
                        text: "!".into(),
                        quoted: false,
                    });
                }
                Some(TokenKind::LBrace) => parts.push(ClausePart::Block(self.generic_block()?)),
                _ => return Err(self.unexpected("a clause")),
            }
        }
        Ok(GenericClause { parts })
    }

    fn generic_block(&mut self) -> Result<Vec<GenericClause>, Bind9Error> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut items = Vec::new();
        while !self.at_block_end()? {
            if self.skip_semicolon() {
                continue;
            }
            items.push(self.generic_clause()?);
        }
        self.pos += 1;
        Ok(items)
    }
}

/// Classify a bare address-match-list word.
fn classify(word: String) -> AmlKind {
    if let Some(keyword) = AmlKeyword::parse(&word) {
        return AmlKind::Keyword(keyword);
    }
    if is_address(&word) {
        return AmlKind::Address(word);
    }
    AmlKind::AclRef(word)
}

fn is_address(word: &str) -> bool {
    if word.parse::<IpAddr>().is_ok() {
        return true;
    }
    match word.split_once('/') {
        Some((addr, len)) => {
            len.parse::<u8>().is_ok()
                && (addr.parse::<IpAddr>().is_ok()
                    || (!addr.is_empty() && addr.chars().all(|c| c.is_ascii_digit() || c == '.')))
        }
        None => false,
    }
}
