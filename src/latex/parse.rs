//! LaTeX source → expression tree.
//!
//! A small recursive-descent parser over the math subset the synthesiser
//! emits, plus the common hand-typed spellings of the same constructs
//! (`x^2`, `\dfrac`, `\left(`, `\le`, unbraced operator bodies). It backs the
//! round-trip guarantee and the `replace-latex` correction edit.
//!
//! Parsed nodes carry confidence 1.0 (the user typed them) and are numbered
//! in pre-order from 1; callers grafting a parse into a larger tree renumber
//! it with [`crate::tree::ExpressionTree::assign_fresh_ids`].

use crate::symbols::{BigOperatorKind, Symbol};
use crate::tree::{ExpressionNode, MatrixDelimiter, NodeId};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Failure to read a LaTeX string, with the byte offset of the problem.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("LaTeX parse error at byte {position}: {message}")]
pub struct LatexParseError {
    pub position: usize,
    pub message: String,
}

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\[A-Za-z]+|\\\\|\\[^A-Za-z\\]|\\$|\s+|.").unwrap()
});

// ── Tokens ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok<'a> {
    /// `\name`
    Word(&'a str),
    /// `\{`, `\,` and friends: the character after the backslash.
    ControlSymbol(char),
    RowBreak,
    Open,
    Close,
    Sup,
    Sub,
    Amp,
    Char(char),
}

#[derive(Debug, Clone)]
struct Token<'a> {
    tok: Tok<'a>,
    pos: usize,
}

fn tokenize(src: &str) -> Result<Vec<Token<'_>>, LatexParseError> {
    let mut tokens = Vec::new();
    for m in RE_TOKEN.find_iter(src) {
        let text = m.as_str();
        let pos = m.start();
        let tok = if text == "\\\\" {
            Tok::RowBreak
        } else if let Some(rest) = text.strip_prefix('\\') {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (None, _) => {
                    return Err(LatexParseError {
                        position: pos,
                        message: "dangling backslash".into(),
                    })
                }
                (Some(c), None) if !c.is_ascii_alphabetic() => Tok::ControlSymbol(c),
                _ => Tok::Word(rest),
            }
        } else if text.trim().is_empty() {
            continue;
        } else {
            match text.chars().next() {
                Some('{') => Tok::Open,
                Some('}') => Tok::Close,
                Some('^') => Tok::Sup,
                Some('_') => Tok::Sub,
                Some('&') => Tok::Amp,
                Some(c) => Tok::Char(c),
                None => continue,
            }
        };
        tokens.push(Token { tok, pos });
    }
    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────────────

/// Where a run of items stops (besides the end of input).
#[derive(Debug, Clone, Copy, Default)]
struct Stops {
    close_brace: bool,
    close_bracket: bool,
    cell: bool,
    relation: bool,
}

const SPACING_WORDS: &[&str] = &["quad", "qquad", "displaystyle", "textstyle", "limits", "nolimits"];
const TRANSPARENT_WORDS: &[&str] = &["mathrm", "mathit", "mathbf", "mathsf", "mathnormal", "boldsymbol"];

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

/// Parse one formula.
pub fn parse(src: &str) -> Result<ExpressionNode, LatexParseError> {
    let mut parser = Parser {
        src,
        tokens: tokenize(src)?,
        pos: 0,
    };
    let items = parser.parse_items(Stops::default())?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error_at(tok.pos, format!("unexpected {}", describe(&tok.tok))));
    }
    let mut root = ExpressionNode::group(items);
    let mut next = 1u32;
    root.visit_mut(&mut |n| {
        n.id = NodeId(next);
        next += 1;
    });
    Ok(root)
}

fn describe(tok: &Tok<'_>) -> String {
    match tok {
        Tok::Word(w) => format!("'\\{w}'"),
        Tok::ControlSymbol(c) => format!("'\\{c}'"),
        Tok::RowBreak => "'\\\\'".into(),
        Tok::Open => "'{'".into(),
        Tok::Close => "'}'".into(),
        Tok::Sup => "'^'".into(),
        Tok::Sub => "'_'".into(),
        Tok::Amp => "'&'".into(),
        Tok::Char(c) => format!("'{c}'"),
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn end_pos(&self) -> usize {
        self.src.len()
    }

    fn current_pos(&self) -> usize {
        self.peek().map(|t| t.pos).unwrap_or_else(|| self.end_pos())
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> LatexParseError {
        LatexParseError {
            position,
            message: message.into(),
        }
    }

    fn expect(&mut self, want: Tok<'static>) -> Result<(), LatexParseError> {
        match self.next() {
            Some(t) if t.tok == want => Ok(()),
            Some(t) => Err(self.error_at(
                t.pos,
                format!("expected {}, found {}", describe(&want), describe(&t.tok)),
            )),
            None => Err(self.error_at(
                self.end_pos(),
                format!("expected {}, found end of input", describe(&want)),
            )),
        }
    }

    fn at_stop(&self, stops: Stops) -> bool {
        let Some(t) = self.peek() else {
            return true;
        };
        match &t.tok {
            Tok::Close => stops.close_brace,
            Tok::Char(']') => stops.close_bracket,
            Tok::Amp | Tok::RowBreak => stops.cell,
            Tok::Word("end") => stops.cell,
            Tok::Char(c) if stops.relation => {
                Symbol::from_char(*c).is_some_and(|s| s.is_relation())
            }
            Tok::Word(w) if stops.relation => {
                Symbol::from_latex(&format!("\\{w}")).is_some_and(|s| s.is_relation())
            }
            _ => false,
        }
    }

    /// Items up to a stop token, with postfix scripts attached.
    fn parse_items(&mut self, stops: Stops) -> Result<Vec<ExpressionNode>, LatexParseError> {
        let mut items: Vec<ExpressionNode> = Vec::new();
        while !self.at_stop(stops) {
            let Some(tok) = self.peek().cloned() else {
                break;
            };
            match tok.tok {
                Tok::Sup | Tok::Sub => {
                    self.pos += 1;
                    let base = items.pop().unwrap_or_else(ExpressionNode::empty);
                    let script = self.parse_argument()?;
                    items.push(if tok.tok == Tok::Sup {
                        ExpressionNode::power(base, script)
                    } else {
                        ExpressionNode::subscript(base, script)
                    });
                }
                Tok::Close => {
                    return Err(self.error_at(tok.pos, "unbalanced '}'"));
                }
                Tok::Amp | Tok::RowBreak => {
                    return Err(self.error_at(
                        tok.pos,
                        format!("{} outside a matrix", describe(&tok.tok)),
                    ));
                }
                _ => {
                    if let Some(node) = self.parse_item(stops)? {
                        items.push(node);
                    }
                }
            }
        }
        Ok(items)
    }

    /// `{...}` group; the closing brace is consumed.
    fn parse_group(&mut self) -> Result<ExpressionNode, LatexParseError> {
        self.expect(Tok::Open)?;
        let items = self.parse_items(Stops {
            close_brace: true,
            ..Stops::default()
        })?;
        self.expect(Tok::Close)?;
        Ok(ExpressionNode::group(items))
    }

    /// A macro or script argument: a braced group or a single token.
    fn parse_argument(&mut self) -> Result<ExpressionNode, LatexParseError> {
        match self.peek().map(|t| t.tok.clone()) {
            Some(Tok::Open) => self.parse_group(),
            Some(_) => {
                let pos = self.current_pos();
                self.parse_item(Stops::default())?
                    .ok_or_else(|| self.error_at(pos, "missing argument"))
            }
            None => Err(self.error_at(self.end_pos(), "missing argument")),
        }
    }

    /// One item without postfix scripts. `None` for tokens that produce no
    /// node (spacing, `\left`).
    fn parse_item(&mut self, stops: Stops) -> Result<Option<ExpressionNode>, LatexParseError> {
        let Some(tok) = self.next() else {
            return Ok(None);
        };
        match tok.tok {
            Tok::Open => {
                self.pos -= 1;
                self.parse_group().map(Some)
            }
            Tok::Char(c) => match Symbol::from_char(c) {
                Some(symbol) => Ok(Some(ExpressionNode::leaf(symbol, 1.0))),
                None => Err(self.error_at(tok.pos, format!("unknown symbol '{c}'"))),
            },
            Tok::ControlSymbol(c) => match c {
                ',' | ';' | ':' | '!' | ' ' => Ok(None),
                _ => match Symbol::from_latex(&format!("\\{c}")) {
                    Some(symbol) => Ok(Some(ExpressionNode::leaf(symbol, 1.0))),
                    None => Err(self.error_at(tok.pos, format!("unknown symbol '\\{c}'"))),
                },
            },
            Tok::Word(word) => self.parse_command(word, tok.pos, stops),
            other => Err(self.error_at(tok.pos, format!("unexpected {}", describe(&other)))),
        }
    }

    fn parse_command(
        &mut self,
        word: &'a str,
        pos: usize,
        stops: Stops,
    ) -> Result<Option<ExpressionNode>, LatexParseError> {
        match word {
            "frac" | "dfrac" | "tfrac" => {
                let num = self.parse_argument()?;
                let den = self.parse_argument()?;
                Ok(Some(ExpressionNode::fraction(num, den)))
            }
            "sqrt" => {
                let index = if matches!(self.peek(), Some(t) if t.tok == Tok::Char('[')) {
                    self.pos += 1;
                    let items = self.parse_items(Stops {
                        close_bracket: true,
                        ..Stops::default()
                    })?;
                    self.expect(Tok::Char(']'))?;
                    Some(ExpressionNode::group(items))
                } else {
                    None
                };
                let radicand = self.parse_argument()?;
                Ok(Some(ExpressionNode::radical(index, radicand)))
            }
            "begin" => self.parse_matrix(pos).map(Some),
            "end" => Err(self.error_at(pos, "'\\end' without matching '\\begin'")),
            "left" | "right" | "bigl" | "bigr" | "Bigl" | "Bigr" => {
                // `\left.` is an invisible delimiter.
                if matches!(self.peek(), Some(t) if t.tok == Tok::Char('.')) {
                    self.pos += 1;
                }
                Ok(None)
            }
            "text" => self.parse_text(pos).map(Some),
            w if SPACING_WORDS.iter().any(|s| *s == w) => Ok(None),
            w if TRANSPARENT_WORDS.iter().any(|s| *s == w) => self.parse_argument().map(Some),
            _ => {
                let latex = format!("\\{word}");
                let Some(symbol) = Symbol::from_latex(&latex) else {
                    return Err(self.error_at(pos, format!("unknown command '{latex}'")));
                };
                match symbol.big_operator() {
                    Some(kind) => self.parse_big_operator(kind, stops).map(Some),
                    None if symbol.is_marker() => {
                        Err(self.error_at(pos, format!("'{latex}' cannot stand alone")))
                    }
                    None => Ok(Some(ExpressionNode::leaf(symbol, 1.0))),
                }
            }
        }
    }

    fn parse_big_operator(
        &mut self,
        kind: BigOperatorKind,
        stops: Stops,
    ) -> Result<ExpressionNode, LatexParseError> {
        let mut lower = None;
        let mut upper = None;
        loop {
            match self.peek().map(|t| (t.tok.clone(), t.pos)) {
                Some((Tok::Sub, p)) => {
                    if lower.is_some() {
                        return Err(self.error_at(p, "duplicate lower limit"));
                    }
                    self.pos += 1;
                    lower = Some(self.parse_argument()?);
                }
                Some((Tok::Sup, p)) => {
                    if upper.is_some() {
                        return Err(self.error_at(p, "duplicate upper limit"));
                    }
                    self.pos += 1;
                    upper = Some(self.parse_argument()?);
                }
                Some((Tok::Word("limits" | "nolimits"), _)) => self.pos += 1,
                _ => break,
            }
        }
        let body = if matches!(self.peek(), Some(t) if t.tok == Tok::Open) {
            self.parse_group()?
        } else {
            // Hand-typed bodies run to the next relation symbol.
            let items = self.parse_items(Stops {
                relation: true,
                ..stops
            })?;
            ExpressionNode::group(items)
        };
        Ok(ExpressionNode::big_operator(kind, lower, upper, body))
    }

    /// Letters between braces, e.g. the environment name of `\begin{...}`.
    fn parse_name(&mut self) -> Result<String, LatexParseError> {
        self.expect(Tok::Open)?;
        let mut name = String::new();
        loop {
            match self.next() {
                Some(Token { tok: Tok::Close, .. }) => return Ok(name),
                Some(Token {
                    tok: Tok::Char(c), ..
                }) => name.push(c),
                Some(t) => {
                    return Err(self.error_at(t.pos, format!("unexpected {}", describe(&t.tok))))
                }
                None => return Err(self.error_at(self.end_pos(), "unterminated name")),
            }
        }
    }

    fn parse_matrix(&mut self, pos: usize) -> Result<ExpressionNode, LatexParseError> {
        let env = self.parse_name()?;
        let delimiter = MatrixDelimiter::from_environment(&env)
            .ok_or_else(|| self.error_at(pos, format!("unsupported environment '{env}'")))?;
        let cell_stops = Stops {
            cell: true,
            ..Stops::default()
        };
        let mut rows: Vec<Vec<ExpressionNode>> = Vec::new();
        let mut row: Vec<ExpressionNode> = Vec::new();
        loop {
            let items = self.parse_items(cell_stops)?;
            row.push(ExpressionNode::group(items));
            match self.next() {
                Some(Token { tok: Tok::Amp, .. }) => {}
                Some(Token {
                    tok: Tok::RowBreak, ..
                }) => rows.push(std::mem::take(&mut row)),
                Some(Token {
                    tok: Tok::Word("end"),
                    pos: end_pos,
                }) => {
                    rows.push(std::mem::take(&mut row));
                    let closing = self.parse_name()?;
                    if closing != env {
                        return Err(self.error_at(
                            end_pos,
                            format!("'\\end{{{closing}}}' does not close '\\begin{{{env}}}'"),
                        ));
                    }
                    break;
                }
                _ => {
                    return Err(self.error_at(pos, format!("unterminated '\\begin{{{env}}}'")));
                }
            }
        }
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(self.error_at(pos, "matrix rows have different lengths"));
        }
        Ok(ExpressionNode::matrix(delimiter, rows))
    }

    /// Only `\text{[unresolved]}` is meaningful inside math here.
    fn parse_text(&mut self, pos: usize) -> Result<ExpressionNode, LatexParseError> {
        self.expect(Tok::Open)?;
        let start = self.current_pos();
        let mut depth = 0usize;
        let end = loop {
            match self.next() {
                Some(Token { tok: Tok::Open, .. }) => depth += 1,
                Some(Token {
                    tok: Tok::Close,
                    pos: p,
                }) => {
                    if depth == 0 {
                        break p;
                    }
                    depth -= 1;
                }
                Some(_) => {}
                None => return Err(self.error_at(self.end_pos(), "unterminated '\\text'")),
            }
        };
        let content = self.src[start..end].trim();
        if content == "[unresolved]" {
            Ok(ExpressionNode::unresolved(0))
        } else {
            Err(self.error_at(pos, format!("unsupported text '{content}'")))
        }
    }
}
