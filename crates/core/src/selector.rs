//! Selector engine for structural lookups
//!
//! Supports the subset of CSS selector syntax the feed lookups need:
//! - type (`ytd-video-renderer`) and universal (`*`) selectors
//! - `#id`, `.class`
//! - attribute selectors `[attr]`, `[attr=v]`, `[attr^=v]`, `[attr*=v]`, `[attr$=v]`
//! - descendant (whitespace) and child (`>`) combinators
//! - comma-separated selector lists
//!
//! Matching lives on [`NodeTree`](crate::tree::NodeTree); this module only
//! parses and holds the compiled form.

use crate::error::SelectorError;
use crate::tree::{NodeId, NodeTree};
use globset::{GlobBuilder, GlobMatcher};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Compiled selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: SmallVec<[Complex; 1]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    /// Compounds left to right
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    /// Set by `*`; a universal compound with no qualifiers matches any node
    universal: bool,
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatcher {
    name: String,
    op: AttributeOp,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOp {
    Exists,
    Equals,
    Prefix,
    Contains,
    Suffix,
}

impl Selector {
    /// Parse a selector list
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let mut parser = Parser {
            source,
            chars: source.char_indices().peekable(),
        };
        let alternatives = parser.parse_list()?;
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// Original selector text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether `node` matches any alternative
    pub(crate) fn matches(&self, tree: &NodeTree, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| complex.matches_at(tree, node, complex.compounds.len() - 1))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Complex {
    fn matches_at(&self, tree: &NodeTree, node: NodeId, idx: usize) -> bool {
        if !self.compounds[idx].matches(tree, node) {
            return false;
        }
        if idx == 0 {
            return true;
        }

        match self.combinators[idx - 1] {
            Combinator::Child => tree
                .parent(node)
                .is_some_and(|parent| self.matches_at(tree, parent, idx - 1)),
            Combinator::Descendant => tree
                .ancestors(node)
                .any(|ancestor| self.matches_at(tree, ancestor, idx - 1)),
        }
    }
}

impl Compound {
    fn matches(&self, tree: &NodeTree, node: NodeId) -> bool {
        if let Some(tag) = &self.tag {
            if tree.tag(node) != Some(tag.as_str()) {
                return false;
            }
        }

        if let Some(id) = &self.id {
            if tree.attribute(node, "id") != Some(id.as_str()) {
                return false;
            }
        }

        if !self.classes.iter().all(|class| tree.has_class(node, class)) {
            return false;
        }

        self.attributes.iter().all(|matcher| {
            let Some(actual) = tree.attribute(node, &matcher.name) else {
                return false;
            };
            match matcher.op {
                AttributeOp::Exists => true,
                AttributeOp::Equals => actual == matcher.value,
                AttributeOp::Prefix => !matcher.value.is_empty() && actual.starts_with(&matcher.value),
                AttributeOp::Contains => !matcher.value.is_empty() && actual.contains(&matcher.value),
                AttributeOp::Suffix => !matcher.value.is_empty() && actual.ends_with(&matcher.value),
            }
        })
    }

    fn is_empty(&self) -> bool {
        !self.universal && self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attributes.is_empty()
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Parser<'_> {
    fn parse_list(&mut self) -> Result<SmallVec<[Complex; 1]>, SelectorError> {
        let mut alternatives = SmallVec::new();
        loop {
            self.skip_whitespace();
            alternatives.push(self.parse_complex()?);
            match self.chars.next() {
                None => break,
                Some((_, ',')) => continue,
                Some((offset, found)) => return Err(self.unexpected(offset, found)),
            }
        }
        Ok(alternatives)
    }

    /// Parse up to (not including) a `,` or the end of input
    fn parse_complex(&mut self) -> Result<Complex, SelectorError> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();

        loop {
            let compound = self.parse_compound()?;
            if compound.is_empty() {
                return match self.chars.peek().copied() {
                    None if compounds.is_empty() => Err(SelectorError::Empty),
                    Some((offset, found)) if compounds.is_empty() => Err(self.unexpected(offset, found)),
                    _ => Err(SelectorError::DanglingCombinator(self.source.to_string())),
                };
            }
            compounds.push(compound);

            let had_space = self.skip_whitespace();
            match self.chars.peek().copied() {
                None | Some((_, ',')) => break,
                Some((_, '>')) => {
                    self.chars.next();
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_space => combinators.push(Combinator::Descendant),
                Some((offset, found)) => return Err(self.unexpected(offset, found)),
            }
        }

        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();

        match self.chars.peek().copied() {
            Some((_, '*')) => {
                self.chars.next();
                compound.universal = true;
            }
            Some((_, c)) if is_ident_char(c) => {
                compound.tag = Some(self.parse_ident());
            }
            _ => {}
        }

        loop {
            match self.chars.peek().copied() {
                Some((_, '#')) => {
                    self.chars.next();
                    compound.id = Some(self.expect_ident()?);
                }
                Some((_, '.')) => {
                    self.chars.next();
                    compound.classes.push(self.expect_ident()?);
                }
                Some((_, '[')) => {
                    self.chars.next();
                    compound.attributes.push(self.parse_attribute()?);
                }
                _ => break,
            }
        }

        Ok(compound)
    }

    fn parse_attribute(&mut self) -> Result<AttributeMatcher, SelectorError> {
        self.skip_whitespace();
        let name = self.expect_ident()?;
        self.skip_whitespace();

        let op = match self.chars.next() {
            Some((_, ']')) => {
                return Ok(AttributeMatcher {
                    name,
                    op: AttributeOp::Exists,
                    value: String::new(),
                });
            }
            Some((_, '=')) => AttributeOp::Equals,
            Some((offset, prefix @ ('^' | '*' | '$'))) => match self.chars.next() {
                Some((_, '=')) => match prefix {
                    '^' => AttributeOp::Prefix,
                    '*' => AttributeOp::Contains,
                    _ => AttributeOp::Suffix,
                },
                Some((offset, found)) => return Err(self.unexpected(offset, found)),
                None => return Err(self.unexpected(offset, prefix)),
            },
            Some((offset, found)) => return Err(self.unexpected(offset, found)),
            None => return Err(self.unterminated("attribute selector")),
        };

        self.skip_whitespace();
        let value = match self.chars.peek().copied() {
            Some((_, quote @ ('"' | '\''))) => {
                self.chars.next();
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => value.push(c),
                        None => return Err(self.unterminated("quoted string")),
                    }
                }
                value
            }
            _ => self.expect_ident()?,
        };

        self.skip_whitespace();
        match self.chars.next() {
            Some((_, ']')) => Ok(AttributeMatcher { name, op, value }),
            Some((offset, found)) => Err(self.unexpected(offset, found)),
            None => Err(self.unterminated("attribute selector")),
        }
    }

    fn parse_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if !is_ident_char(c) {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        ident
    }

    fn expect_ident(&mut self) -> Result<String, SelectorError> {
        let ident = self.parse_ident();
        if !ident.is_empty() {
            return Ok(ident);
        }
        match self.chars.peek().copied() {
            Some((offset, found)) => Err(self.unexpected(offset, found)),
            None => Err(self.unterminated("identifier")),
        }
    }

    /// Returns true if any whitespace was consumed
    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            skipped = true;
            self.chars.next();
        }
        skipped
    }

    fn unexpected(&self, offset: usize, found: char) -> SelectorError {
        SelectorError::Unexpected {
            selector: self.source.to_string(),
            offset,
            found,
        }
    }

    fn unterminated(&self, what: &'static str) -> SelectorError {
        SelectorError::Unterminated {
            selector: self.source.to_string(),
            what,
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// Glob pattern over cache keys (selector strings)
///
/// `*` matches any run of characters; everything else is literal, including
/// the brackets and braces that selector keys are full of. Used to
/// invalidate groups of tree-wide query results without knowing their
/// exact keys.
#[derive(Debug, Clone)]
pub struct SelectorPattern {
    source: String,
    matcher: GlobMatcher,
}

impl SelectorPattern {
    /// Compile a glob pattern
    pub fn new(pattern: impl Into<String>) -> Result<Self, SelectorError> {
        let source = pattern.into();
        let glob = GlobBuilder::new(&glob_text(&source))
            .backslash_escape(true)
            .build()
            .map_err(|e| SelectorError::InvalidPattern {
                pattern: source.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            matcher: glob.compile_matcher(),
            source,
        })
    }

    /// Pattern text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check if `key` matches the whole pattern
    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }
}

impl PartialEq for SelectorPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for SelectorPattern {}

impl FromStr for SelectorPattern {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Escape every glob metacharacter except `*`, and collapse `*` runs
fn glob_text(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' if out.ends_with('*') => {}
            '?' | '[' | ']' | '{' | '}' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
