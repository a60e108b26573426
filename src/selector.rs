//! CSS and XPath locators evaluated against a [`Document`].
//!
//! Only the subset that selector synthesis emits, plus what hand-written
//! or model-written steps commonly use, is supported. Anything else is a
//! syntax error, which resolution treats as a non-match.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::dom::{Document, Element, NodeId};
use crate::error::{GuideError, Result};

/// A parsed CSS selector list.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    list: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq)]
struct Complex {
    parts: Vec<Compound>,
    /// `combinators[i]` joins `parts[i]` and `parts[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    NextSibling,
    SubsequentSibling,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    simple: Vec<Simple>,
}

#[derive(Debug, Clone, PartialEq)]
enum Simple {
    Id(String),
    Class(String),
    Attr {
        name: String,
        test: Option<(AttrOp, String)>,
    },
    NthChild(Nth),
    NthOfType(Nth),
    LastChild,
    LastOfType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

/// `an+b`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nth {
    a: i64,
    b: i64,
}

impl Nth {
    fn matches(&self, pos: usize) -> bool {
        // Widened so extreme coefficients cannot overflow.
        let (a, b) = (i128::from(self.a), i128::from(self.b));
        let pos = pos as i128;
        if a == 0 {
            return pos == b;
        }
        let diff = pos - b;
        diff % a == 0 && diff / a >= 0
    }

    fn parse(raw: &str) -> Option<Nth> {
        let s: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match s.as_str() {
            "odd" => return Some(Nth { a: 2, b: 1 }),
            "even" => return Some(Nth { a: 2, b: 0 }),
            _ => {}
        }
        match s.find('n') {
            Some(pos) => {
                let a = match &s[..pos] {
                    "" | "+" => 1,
                    "-" => -1,
                    other => other.parse().ok()?,
                };
                let rest = &s[pos + 1..];
                let b = if rest.is_empty() { 0 } else { rest.parse().ok()? };
                Some(Nth { a, b })
            }
            None => Some(Nth {
                a: 0,
                b: s.parse().ok()?,
            }),
        }
    }
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let list = CssParser::new(source).parse_list()?;
        Ok(Self {
            source: source.to_string(),
            list,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        doc.element(id).is_some() && self.list.iter().any(|c| c.matches(doc, id))
    }

    /// Matching elements in document order.
    pub fn query_all(&self, doc: &Document) -> Vec<NodeId> {
        doc.elements().filter(|&id| self.matches(doc, id)).collect()
    }

    /// Matching elements strictly inside `scope`, in document order.
    pub fn query_within(&self, doc: &Document, scope: NodeId) -> Vec<NodeId> {
        doc.descendants(scope)
            .filter(|&id| self.matches(doc, id))
            .collect()
    }

    pub fn query_first(&self, doc: &Document) -> Option<NodeId> {
        doc.elements().find(|&id| self.matches(doc, id))
    }
}

impl FromStr for Selector {
    type Err = GuideError;

    fn from_str(s: &str) -> Result<Self> {
        Selector::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Complex {
    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        self.matches_from(doc, id, self.parts.len() - 1)
    }

    fn matches_from(&self, doc: &Document, id: NodeId, i: usize) -> bool {
        let Some(el) = doc.element(id) else {
            return false;
        };
        if !self.parts[i].matches(doc, id, el) {
            return false;
        }
        if i == 0 {
            return true;
        }
        match self.combinators[i - 1] {
            Combinator::Child => doc
                .parent(id)
                .is_some_and(|p| self.matches_from(doc, p, i - 1)),
            Combinator::Descendant => doc.ancestors(id).any(|a| self.matches_from(doc, a, i - 1)),
            Combinator::NextSibling => doc
                .previous_element_sibling(id)
                .is_some_and(|s| self.matches_from(doc, s, i - 1)),
            Combinator::SubsequentSibling => {
                let Some(parent) = doc.parent(id) else {
                    return false;
                };
                doc.element_children(parent)
                    .take_while(|&s| s != id)
                    .any(|s| self.matches_from(doc, s, i - 1))
            }
        }
    }
}

impl Compound {
    fn matches(&self, doc: &Document, id: NodeId, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if el.tag != *tag {
                return false;
            }
        }
        self.simple.iter().all(|s| s.matches(doc, id, el))
    }
}

impl Simple {
    fn matches(&self, doc: &Document, id: NodeId, el: &Element) -> bool {
        match self {
            Simple::Id(v) => el.attr("id") == Some(v.as_str()),
            Simple::Class(c) => el.has_class(c),
            Simple::Attr { name, test } => {
                let Some(actual) = el.attr(name) else {
                    return false;
                };
                let Some((op, expected)) = test else {
                    return true;
                };
                let expected = expected.as_str();
                match op {
                    AttrOp::Equals => actual == expected,
                    AttrOp::Includes => {
                        !expected.is_empty()
                            && actual.split_ascii_whitespace().any(|w| w == expected)
                    }
                    AttrOp::DashMatch => {
                        actual == expected
                            || actual
                                .strip_prefix(expected)
                                .is_some_and(|rest| rest.starts_with('-'))
                    }
                    AttrOp::Prefix => !expected.is_empty() && actual.starts_with(expected),
                    AttrOp::Suffix => !expected.is_empty() && actual.ends_with(expected),
                    AttrOp::Substring => !expected.is_empty() && actual.contains(expected),
                }
            }
            Simple::NthChild(nth) => {
                let Some(parent) = doc.parent(id) else {
                    return nth.matches(1);
                };
                let pos = doc.element_children(parent).take_while(|&c| c != id).count() + 1;
                nth.matches(pos)
            }
            Simple::NthOfType(nth) => nth.matches(doc.type_position(id).0),
            Simple::LastChild => doc.next_element_sibling(id).is_none(),
            Simple::LastOfType => {
                let (index, total) = doc.type_position(id);
                index == total
            }
        }
    }
}

struct CssParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> CssParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn err(&self, reason: impl Into<String>) -> GuideError {
        GuideError::css(self.source, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err(format!("expected `{c}` at {}", self.pos)))
        }
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self) -> Result<Vec<Complex>> {
        let mut list = Vec::new();
        loop {
            self.skip_ws();
            list.push(self.parse_complex()?);
            self.skip_ws();
            if self.peek().is_none() {
                return Ok(list);
            }
            self.expect(',')?;
        }
    }

    fn parse_complex(&mut self) -> Result<Complex> {
        let mut parts = vec![self.parse_compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            let comb = match self.peek() {
                None | Some(',') => break,
                Some('>') => Combinator::Child,
                Some('+') => Combinator::NextSibling,
                Some('~') => Combinator::SubsequentSibling,
                Some(_) if had_ws => Combinator::Descendant,
                Some(c) => return Err(self.err(format!("unexpected `{c}`"))),
            };
            if comb != Combinator::Descendant {
                self.pos += 1;
                self.skip_ws();
            }
            combinators.push(comb);
            parts.push(self.parse_compound()?);
        }
        Ok(Complex { parts, combinators })
    }

    fn parse_compound(&mut self) -> Result<Compound> {
        let mut compound = Compound::default();
        let mut any = false;
        if self.eat('*') {
            any = true;
        } else if self.peek().is_some_and(is_ident_start) {
            compound.tag = Some(self.ident()?.to_ascii_lowercase());
            any = true;
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    let name = self.ident()?;
                    compound.simple.push(Simple::Id(name));
                }
                Some('.') => {
                    self.pos += 1;
                    let name = self.ident()?;
                    compound.simple.push(Simple::Class(name));
                }
                Some('[') => {
                    self.pos += 1;
                    compound.simple.push(self.attribute()?);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.simple.push(self.pseudo()?);
                }
                _ => break,
            }
            any = true;
        }
        if any {
            Ok(compound)
        } else {
            Err(self.err(format!("expected a selector at {}", self.pos)))
        }
    }

    fn attribute(&mut self) -> Result<Simple> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();
        if self.eat(']') {
            return Ok(Simple::Attr { name, test: None });
        }
        let op = match self.bump() {
            Some('=') => AttrOp::Equals,
            Some(c @ ('~' | '|' | '^' | '$' | '*')) => {
                self.expect('=')?;
                match c {
                    '~' => AttrOp::Includes,
                    '|' => AttrOp::DashMatch,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    _ => AttrOp::Substring,
                }
            }
            _ => return Err(self.err("bad attribute operator")),
        };
        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                self.string(q)?
            }
            _ => self.ident()?,
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(Simple::Attr {
            name,
            test: Some((op, value)),
        })
    }

    fn pseudo(&mut self) -> Result<Simple> {
        let name = self.ident()?.to_ascii_lowercase();
        let arg = if self.eat('(') {
            let start = self.pos;
            while self.peek().is_some_and(|c| c != ')') {
                self.pos += 1;
            }
            let arg: String = self.chars[start..self.pos].iter().collect();
            self.expect(')')?;
            Some(arg)
        } else {
            None
        };
        let nth = |arg: Option<String>| {
            arg.as_deref()
                .and_then(Nth::parse)
                .ok_or_else(|| self.err(format!("bad argument to :{name}")))
        };
        match name.as_str() {
            "nth-child" => Ok(Simple::NthChild(nth(arg)?)),
            "nth-of-type" => Ok(Simple::NthOfType(nth(arg)?)),
            "first-child" => Ok(Simple::NthChild(Nth { a: 0, b: 1 })),
            "first-of-type" => Ok(Simple::NthOfType(Nth { a: 0, b: 1 })),
            "last-child" => Ok(Simple::LastChild),
            "last-of-type" => Ok(Simple::LastOfType),
            other => Err(self.err(format!("unsupported pseudo-class :{other}"))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.pos += 1;
                out.push(self.escape()?);
            } else if is_ident_char(c) {
                self.pos += 1;
                out.push(c);
            } else {
                break;
            }
        }
        if out.is_empty() {
            Err(self.err(format!("expected an identifier at {}", self.pos)))
        } else {
            Ok(out)
        }
    }

    fn string(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some(c) => out.push(c),
            }
        }
    }

    /// Called just after a backslash.
    fn escape(&mut self) -> Result<char> {
        let mut hex = String::new();
        while hex.len() < 6 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            hex.extend(self.bump());
        }
        if hex.is_empty() {
            return self.bump().ok_or_else(|| self.err("dangling escape"));
        }
        if self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        let code = u32::from_str_radix(&hex, 16).unwrap_or(0xFFFD);
        Ok(char::from_u32(code)
            .filter(|&c| c != '\0')
            .unwrap_or('\u{FFFD}'))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || c == '\\' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Serialize `value` as a CSS identifier, like `CSS.escape`.
pub fn css_escape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if (1..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{code:x} "));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if !c.is_ascii() || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// A parsed XPath location path.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    steps: Vec<XStep>,
}

#[derive(Debug, Clone, PartialEq)]
struct XStep {
    descendant: bool,
    name: Option<String>,
    predicates: Vec<XPredicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum XPredicate {
    Position(usize),
    HasAttr(String),
    AttrEq(String, String),
}

#[derive(Debug, Clone, Copy)]
enum Context {
    Document,
    Node(NodeId),
}

impl XPath {
    pub fn parse(source: &str) -> Result<Self> {
        let err = |reason: &str| GuideError::xpath(source, reason);
        let chars: Vec<char> = source.trim().chars().collect();
        let mut pos = 0;
        let mut steps = Vec::new();
        let ws = |pos: &mut usize| {
            while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
                *pos += 1;
            }
        };

        while pos < chars.len() {
            if chars[pos] != '/' {
                return Err(err("expected `/`"));
            }
            pos += 1;
            let descendant = chars.get(pos) == Some(&'/');
            if descendant {
                pos += 1;
            }

            let name = if chars.get(pos) == Some(&'*') {
                pos += 1;
                None
            } else {
                let start = pos;
                while chars
                    .get(pos)
                    .is_some_and(|&c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
                {
                    pos += 1;
                }
                if start == pos {
                    return Err(err("expected a name test"));
                }
                Some(chars[start..pos].iter().collect::<String>().to_ascii_lowercase())
            };

            let mut predicates = Vec::new();
            while chars.get(pos) == Some(&'[') {
                pos += 1;
                ws(&mut pos);
                let pred = match chars.get(pos) {
                    Some(c) if c.is_ascii_digit() => {
                        let start = pos;
                        while chars.get(pos).is_some_and(|c| c.is_ascii_digit()) {
                            pos += 1;
                        }
                        let n: usize = chars[start..pos]
                            .iter()
                            .collect::<String>()
                            .parse()
                            .map_err(|_| err("bad position"))?;
                        if n == 0 {
                            return Err(err("positions are 1-based"));
                        }
                        XPredicate::Position(n)
                    }
                    Some('@') => {
                        pos += 1;
                        let start = pos;
                        while chars
                            .get(pos)
                            .is_some_and(|&c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':'))
                        {
                            pos += 1;
                        }
                        if start == pos {
                            return Err(err("expected an attribute name"));
                        }
                        let attr = chars[start..pos].iter().collect::<String>().to_ascii_lowercase();
                        ws(&mut pos);
                        if chars.get(pos) == Some(&'=') {
                            pos += 1;
                            ws(&mut pos);
                            let quote = match chars.get(pos) {
                                Some(&q @ ('"' | '\'')) => q,
                                _ => return Err(err("expected a string literal")),
                            };
                            pos += 1;
                            let start = pos;
                            while chars.get(pos).is_some_and(|&c| c != quote) {
                                pos += 1;
                            }
                            if pos >= chars.len() {
                                return Err(err("unterminated string"));
                            }
                            let value: String = chars[start..pos].iter().collect();
                            pos += 1;
                            XPredicate::AttrEq(attr, value)
                        } else {
                            XPredicate::HasAttr(attr)
                        }
                    }
                    _ => return Err(err("unsupported predicate")),
                };
                ws(&mut pos);
                if chars.get(pos) != Some(&']') {
                    return Err(err("expected `]`"));
                }
                pos += 1;
                predicates.push(pred);
            }

            steps.push(XStep {
                descendant,
                name,
                predicates,
            });
        }

        if steps.is_empty() {
            return Err(err("empty path"));
        }
        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// All matching elements in document order.
    pub fn evaluate(&self, doc: &Document) -> Vec<NodeId> {
        let mut ctx = vec![Context::Document];
        let mut result = Vec::new();
        for step in &self.steps {
            result = step.apply(doc, &ctx);
            ctx = result.iter().copied().map(Context::Node).collect();
        }
        result
    }

    /// `FIRST_ORDERED_NODE_TYPE`
    pub fn first(&self, doc: &Document) -> Option<NodeId> {
        self.evaluate(doc).into_iter().next()
    }
}

impl XStep {
    fn apply(&self, doc: &Document, ctx: &[Context]) -> Vec<NodeId> {
        let mut parents: Vec<Context> = Vec::new();
        for &c in ctx {
            parents.push(c);
            if self.descendant {
                let inner: Box<dyn Iterator<Item = NodeId> + '_> = match c {
                    Context::Document => Box::new(doc.elements()),
                    Context::Node(id) => Box::new(
                        doc.descendants(id).filter(|&d| doc.element(d).is_some()),
                    ),
                };
                parents.extend(inner.map(Context::Node));
            }
        }

        let mut out = BTreeSet::new();
        for p in parents {
            let kids: Vec<NodeId> = match p {
                Context::Document => vec![doc.root()],
                Context::Node(id) => doc.element_children(id).collect(),
            };
            let mut kids: Vec<NodeId> = kids
                .into_iter()
                .filter(|&k| match &self.name {
                    None => true,
                    Some(name) => doc.element(k).is_some_and(|e| e.tag == *name),
                })
                .collect();
            for pred in &self.predicates {
                kids = match pred {
                    XPredicate::Position(n) => kids.get(n - 1).copied().into_iter().collect(),
                    XPredicate::HasAttr(a) => kids
                        .into_iter()
                        .filter(|&k| doc.element(k).is_some_and(|e| e.attr(a).is_some()))
                        .collect(),
                    XPredicate::AttrEq(a, v) => kids
                        .into_iter()
                        .filter(|&k| {
                            doc.element(k)
                                .is_some_and(|e| e.attr(a) == Some(v.as_str()))
                        })
                        .collect(),
                };
            }
            out.extend(kids);
        }
        out.into_iter().collect()
    }
}

/// Quote `value` as an XPath 1.0 string literal, if it can be.
pub fn xpath_literal(value: &str) -> Option<String> {
    if !value.contains('"') {
        Some(format!("\"{value}\""))
    } else if !value.contains('\'') {
        Some(format!("'{value}'"))
    } else {
        None
    }
}
