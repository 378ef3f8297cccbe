//! The fixed symbol alphabet shared by recognition, composition and LaTeX.
//!
//! Every glyph the recogniser can emit, every leaf the composer can build and
//! every token the LaTeX parser accepts maps to exactly one [`Symbol`]. The
//! alphabet is a static table; a `Symbol` is a cheap `Copy` index into it, so
//! trees can carry symbols without allocating and comparisons are integer
//! comparisons.
//!
//! Table order doubles as the tie-breaking order when two hypotheses for the
//! same glyph score identically.

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Coarse category of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolClass {
    Digit,
    Latin,
    Greek,
    Operator,
    Relation,
    Delimiter,
    Punctuation,
    /// Glyphs that only ever appear as structure (radical sign, ∫, ∑, ∏).
    Marker,
}

#[derive(Debug)]
struct SymbolInfo {
    name: &'static str,
    latex: &'static str,
    class: SymbolClass,
}

const fn info(name: &'static str, latex: &'static str, class: SymbolClass) -> SymbolInfo {
    SymbolInfo { name, latex, class }
}

// The first entries have fixed indices referenced by the associated consts on
// `Symbol`; `fixed_indices_match_names` guards the correspondence.
const FIXED: &[SymbolInfo] = &[
    info("plus", "+", SymbolClass::Operator),
    info("minus", "-", SymbolClass::Operator),
    info("eq", "=", SymbolClass::Relation),
    info("sqrt", "\\sqrt", SymbolClass::Marker),
    info("int", "\\int", SymbolClass::Marker),
    info("oint", "\\oint", SymbolClass::Marker),
    info("sum", "\\sum", SymbolClass::Marker),
    info("prod", "\\prod", SymbolClass::Marker),
    info("lparen", "(", SymbolClass::Delimiter),
    info("rparen", ")", SymbolClass::Delimiter),
    info("lbracket", "[", SymbolClass::Delimiter),
    info("rbracket", "]", SymbolClass::Delimiter),
    info("vbar", "|", SymbolClass::Delimiter),
    info("lbrace", "\\{", SymbolClass::Delimiter),
    info("rbrace", "\\}", SymbolClass::Delimiter),
    info("times", "\\times", SymbolClass::Operator),
    info("cdot", "\\cdot", SymbolClass::Operator),
    info("div", "\\div", SymbolClass::Operator),
    info("pm", "\\pm", SymbolClass::Operator),
    info("lt", "<", SymbolClass::Relation),
    info("gt", ">", SymbolClass::Relation),
    info("leq", "\\leq", SymbolClass::Relation),
    info("geq", "\\geq", SymbolClass::Relation),
    info("neq", "\\neq", SymbolClass::Relation),
    info("approx", "\\approx", SymbolClass::Relation),
    info("comma", ",", SymbolClass::Punctuation),
    info("period", ".", SymbolClass::Punctuation),
    info("exclaim", "!", SymbolClass::Punctuation),
    info("prime", "'", SymbolClass::Punctuation),
    info("infty", "\\infty", SymbolClass::Operator),
    info("partial", "\\partial", SymbolClass::Operator),
];

const SIMPLE_CHARS: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const GREEK: &[(&str, &str)] = &[
    ("alpha", "\\alpha"),
    ("beta", "\\beta"),
    ("gamma", "\\gamma"),
    ("delta", "\\delta"),
    ("epsilon", "\\epsilon"),
    ("zeta", "\\zeta"),
    ("eta", "\\eta"),
    ("theta", "\\theta"),
    ("iota", "\\iota"),
    ("kappa", "\\kappa"),
    ("lambda", "\\lambda"),
    ("mu", "\\mu"),
    ("nu", "\\nu"),
    ("xi", "\\xi"),
    ("pi", "\\pi"),
    ("rho", "\\rho"),
    ("sigma", "\\sigma"),
    ("tau", "\\tau"),
    ("upsilon", "\\upsilon"),
    ("phi", "\\phi"),
    ("chi", "\\chi"),
    ("psi", "\\psi"),
    ("omega", "\\omega"),
    ("Gamma", "\\Gamma"),
    ("Delta", "\\Delta"),
    ("Theta", "\\Theta"),
    ("Lambda", "\\Lambda"),
    ("Xi", "\\Xi"),
    ("Pi", "\\Pi"),
    ("Sigma", "\\Sigma"),
    ("Upsilon", "\\Upsilon"),
    ("Phi", "\\Phi"),
    ("Psi", "\\Psi"),
    ("Omega", "\\Omega"),
];

static ALPHABET: Lazy<Vec<SymbolInfo>> = Lazy::new(|| {
    let mut table: Vec<SymbolInfo> = FIXED
        .iter()
        .map(|s| info(s.name, s.latex, s.class))
        .collect();
    for i in 0..SIMPLE_CHARS.len() {
        let s = &SIMPLE_CHARS[i..i + 1];
        let class = if i < 10 {
            SymbolClass::Digit
        } else {
            SymbolClass::Latin
        };
        table.push(info(s, s, class));
    }
    for (name, latex) in GREEK {
        table.push(info(name, latex, SymbolClass::Greek));
    }
    table
});

static BY_NAME: Lazy<HashMap<&'static str, Symbol>> = Lazy::new(|| {
    ALPHABET
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name, Symbol(i as u16)))
        .collect()
});

static BY_LATEX: Lazy<HashMap<&'static str, Symbol>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Symbol> = ALPHABET
        .iter()
        .enumerate()
        .map(|(i, s)| (s.latex, Symbol(i as u16)))
        .collect();
    // Common spellings that denote the same glyph.
    for (alias, target) in [
        ("\\le", "\\leq"),
        ("\\ge", "\\geq"),
        ("\\ne", "\\neq"),
        ("\\lbrace", "\\{"),
        ("\\rbrace", "\\}"),
        ("\\vert", "|"),
        ("\\varepsilon", "\\epsilon"),
        ("\\varphi", "\\phi"),
        ("\\ast", "\\times"),
    ] {
        if let Some(sym) = map.get(target).copied() {
            map.insert(alias, sym);
        }
    }
    map
});

/// One entry of the alphabet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u16);

impl Symbol {
    pub const PLUS: Symbol = Symbol(0);
    pub const MINUS: Symbol = Symbol(1);
    pub const EQUALS: Symbol = Symbol(2);
    pub const RADICAL: Symbol = Symbol(3);
    pub const INTEGRAL: Symbol = Symbol(4);
    pub const CONTOUR_INTEGRAL: Symbol = Symbol(5);
    pub const SUM: Symbol = Symbol(6);
    pub const PRODUCT: Symbol = Symbol(7);
    pub const LPAREN: Symbol = Symbol(8);
    pub const RPAREN: Symbol = Symbol(9);
    pub const LBRACKET: Symbol = Symbol(10);
    pub const RBRACKET: Symbol = Symbol(11);
    pub const VBAR: Symbol = Symbol(12);

    /// Look up by canonical name (`"alpha"`, `"minus"`, `"x"`).
    pub fn from_name(name: &str) -> Option<Symbol> {
        BY_NAME.get(name).copied()
    }

    /// Look up by LaTeX spelling (`"\\alpha"`, `"-"`, `"x"`), aliases included.
    pub fn from_latex(latex: &str) -> Option<Symbol> {
        BY_LATEX.get(latex).copied()
    }

    /// Accept either a canonical name or a LaTeX spelling.
    pub fn parse(s: &str) -> Option<Symbol> {
        Self::from_name(s).or_else(|| Self::from_latex(s))
    }

    /// Look up a single printable character (`'7'`, `'+'`, `'('`).
    pub fn from_char(c: char) -> Option<Symbol> {
        let mut buf = [0u8; 4];
        Self::from_latex(c.encode_utf8(&mut buf))
    }

    pub fn all() -> impl Iterator<Item = Symbol> {
        (0..ALPHABET.len()).map(|i| Symbol(i as u16))
    }

    fn info(&self) -> &'static SymbolInfo {
        &ALPHABET[self.0 as usize]
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }

    pub fn latex(&self) -> &'static str {
        self.info().latex
    }

    pub fn class(&self) -> SymbolClass {
        self.info().class
    }

    pub fn is_marker(&self) -> bool {
        self.class() == SymbolClass::Marker
    }

    pub fn is_relation(&self) -> bool {
        self.class() == SymbolClass::Relation
    }

    /// The big operator this marker introduces, if any.
    pub fn big_operator(&self) -> Option<BigOperatorKind> {
        match *self {
            Symbol::SUM => Some(BigOperatorKind::Sum),
            Symbol::PRODUCT => Some(BigOperatorKind::Product),
            Symbol::INTEGRAL => Some(BigOperatorKind::Integral),
            Symbol::CONTOUR_INTEGRAL => Some(BigOperatorKind::ContourIntegral),
            _ => None,
        }
    }

    /// For an opening delimiter, the symbol that closes it.
    pub fn closing_delimiter(&self) -> Option<Symbol> {
        match *self {
            Symbol::LPAREN => Some(Symbol::RPAREN),
            Symbol::LBRACKET => Some(Symbol::RBRACKET),
            Symbol::VBAR => Some(Symbol::VBAR),
            _ => None,
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.latex())
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Symbol::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown symbol '{s}'")))
    }
}

/// Large operators that take optional limits and a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BigOperatorKind {
    Sum,
    Product,
    Integral,
    ContourIntegral,
}

impl BigOperatorKind {
    pub fn latex(&self) -> &'static str {
        self.marker().latex()
    }

    pub fn marker(&self) -> Symbol {
        match self {
            BigOperatorKind::Sum => Symbol::SUM,
            BigOperatorKind::Product => Symbol::PRODUCT,
            BigOperatorKind::Integral => Symbol::INTEGRAL,
            BigOperatorKind::ContourIntegral => Symbol::CONTOUR_INTEGRAL,
        }
    }

    /// Integrals conventionally carry their limits to the right of the sign.
    pub fn limits_beside(&self) -> bool {
        matches!(
            self,
            BigOperatorKind::Integral | BigOperatorKind::ContourIntegral
        )
    }
}
