// ── named.conf lexer ──
//
// Three states: Root tokenises normally, NoParseScope captures text up to
// the end marker, NoParseGlobal captures the rest of the input. Captured
// payloads are returned verbatim as a single token.

use super::Bind9Error;

pub const NO_PARSE_SCOPE: &str = "//@stork:no-parse:scope";
pub const NO_PARSE_GLOBAL: &str = "//@stork:no-parse:global";
pub const NO_PARSE_END: &str = "//@stork:no-parse:end";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoParseKind {
    Scope,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    Str(String),
    LBrace,
    RBrace,
    Semicolon,
    Bang,
    NoParse { payload: String, kind: NoParseKind },
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{w}'"),
            Self::Str(s) => format!("\"{s}\""),
            Self::LBrace => "'{'".into(),
            Self::RBrace => "'}'".into(),
            Self::Semicolon => "';'".into(),
            Self::Bang => "'!'".into(),
            Self::NoParse { .. } => "no-parse directive".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, Bind9Error> {
    Lexer {
        input,
        pos: 0,
        line: 1,
    }
    .run()
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
}

impl Lexer<'_> {
    fn rest(&self) -> &str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn advance(&mut self, bytes: usize) {
        let end = (self.pos + bytes).min(self.input.len());
        let skipped = self.input.get(self.pos..end).unwrap_or_default();
        self.line += skipped.matches('\n').count();
        self.pos = end;
    }

    fn run(mut self) -> Result<Vec<Token>, Bind9Error> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let line = self.line;
            let Some(c) = self.peek() else { break };

            let kind = match c {
                '{' => {
                    self.bump();
                    TokenKind::LBrace
                }
                '}' => {
                    self.bump();
                    TokenKind::RBrace
                }
                ';' => {
                    self.bump();
                    TokenKind::Semicolon
                }
                '!' => {
                    self.bump();
                    TokenKind::Bang
                }
                '"' => TokenKind::Str(self.string()?),
                '#' => {
                    self.skip_line();
                    continue;
                }
                '/' if self.rest().starts_with("//") => match self.line_comment() {
                    Some(kind) => kind,
                    None => continue,
                },
                '/' if self.rest().starts_with("/*") => {
                    self.block_comment()?;
                    continue;
                }
                _ => TokenKind::Word(self.word()),
            };
            tokens.push(Token { kind, line });
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    /// Handle a `//` comment, switching state on no-parse markers.
    fn line_comment(&mut self) -> Option<TokenKind> {
        if self.rest().starts_with(NO_PARSE_GLOBAL) {
            self.advance(NO_PARSE_GLOBAL.len());
            let payload = self.rest().to_owned();
            self.advance(payload.len());
            return Some(TokenKind::NoParse {
                payload,
                kind: NoParseKind::Global,
            });
        }
        if self.rest().starts_with(NO_PARSE_SCOPE) {
            self.advance(NO_PARSE_SCOPE.len());
            let rest = self.rest();
            let (payload, consumed) = match rest.find(NO_PARSE_END) {
                Some(end) => (rest[..end].to_owned(), end + NO_PARSE_END.len()),
                None => (rest.to_owned(), rest.len()),
            };
            self.advance(consumed);
            return Some(TokenKind::NoParse {
                payload,
                kind: NoParseKind::Scope,
            });
        }
        // Ordinary comments and stray end markers.
        self.skip_line();
        None
    }

    fn block_comment(&mut self) -> Result<(), Bind9Error> {
        let start = self.line;
        self.advance(2);
        match self.rest().find("*/") {
            Some(end) => {
                self.advance(end + 2);
                Ok(())
            }
            None => Err(Bind9Error::Parse {
                line: start,
                message: "unterminated comment".into(),
            }),
        }
    }

    fn string(&mut self) -> Result<String, Bind9Error> {
        let start = self.line;
        self.bump();
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '"' => return Ok(out),
                '\\' => match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => break,
                },
                _ => out.push(c),
            }
        }
        Err(Bind9Error::Parse {
            line: start,
            message: "unterminated string".into(),
        })
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '{' | '}' | ';' | '"' | '!' | '#') {
                break;
            }
            if c == '/' && (self.rest().starts_with("//") || self.rest().starts_with("/*")) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }
}
