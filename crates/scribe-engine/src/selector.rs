//! CSS selector subset used to validate generated locators.
//!
//! Supported: type selectors, `*`, `#id`, `.class`, `:nth-of-type(n)`, and the
//! child (`>`) and descendant (whitespace) combinators. Identifiers accept CSS
//! escapes. Anything else is rejected as invalid.

use crate::dom::{Document, NodeId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Invalid selector {selector:?}: {reason}")]
    Invalid { selector: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Combinator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    universal: bool,
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    nth_of_type: Option<usize>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.nth_of_type.is_none()
    }

    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some(node) = doc.get(id) else {
            return false;
        };
        if let Some(tag) = &self.tag
            && !tag.eq_ignore_ascii_case(node.tag())
        {
            return false;
        }
        if let Some(want) = &self.id
            && node.id() != Some(want.as_str())
        {
            return false;
        }
        if !self
            .classes
            .iter()
            .all(|c| node.classes().any(|have| have == c.as_str()))
        {
            return false;
        }
        if let Some(n) = self.nth_of_type
            && doc.position_of_type(id).map(|(i, _)| i) != Some(n)
        {
            return false;
        }
        true
    }
}

/// A parsed complex selector, stored right-to-left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// `parts[0]` is the subject; `parts[i]` is joined to `parts[i - 1]` by `combinators[i - 1]`.
    parts: Vec<Compound>,
    combinators: Vec<Combinator>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        self.matches_from(doc, id, 0)
    }

    fn matches_from(&self, doc: &Document, id: NodeId, index: usize) -> bool {
        if !self.parts[index].matches(doc, id) {
            return false;
        }
        if index + 1 == self.parts.len() {
            return true;
        }
        let parent = doc.get(id).and_then(|n| n.parent());
        match self.combinators[index] {
            Combinator::Child => parent.is_some_and(|p| self.matches_from(doc, p, index + 1)),
            Combinator::Descendant => {
                let mut cursor = parent;
                while let Some(p) = cursor {
                    if self.matches_from(doc, p, index + 1) {
                        return true;
                    }
                    cursor = doc.get(p).and_then(|n| n.parent());
                }
                false
            }
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::Invalid {
            selector: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        let mut parts = Vec::new();
        let mut combinators = Vec::new();

        self.skip_whitespace();
        loop {
            let compound = self.compound()?;
            if compound.is_empty() {
                return Err(self.error(format!("expected selector at offset {}", self.pos)));
            }
            parts.push(compound);

            let had_space = self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_space => combinators.push(Combinator::Descendant),
                Some(c) => return Err(self.error(format!("unexpected {:?}", c))),
            }
        }

        parts.reverse();
        combinators.reverse();
        Ok(Selector { parts, combinators })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();

        match self.peek() {
            Some('*') => {
                self.pos += 1;
                compound.universal = true;
            }
            Some(c) if is_name_start(c) => compound.tag = Some(self.ident()?),
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    let name = self.name(true)?;
                    if compound.id.replace(name).is_some() {
                        return Err(self.error("more than one id"));
                    }
                }
                Some('.') => {
                    self.pos += 1;
                    let name = self.ident()?;
                    compound.classes.push(name);
                }
                Some(':') => {
                    self.pos += 1;
                    let pseudo = self.ident()?;
                    if !pseudo.eq_ignore_ascii_case("nth-of-type") {
                        return Err(self.error(format!("unsupported pseudo-class :{}", pseudo)));
                    }
                    compound.nth_of_type = Some(self.nth_argument()?);
                }
                _ => break,
            }
        }
        Ok(compound)
    }

    fn nth_argument(&mut self) -> Result<usize, SelectorError> {
        if self.peek() != Some('(') {
            return Err(self.error("expected '(' after :nth-of-type"));
        }
        self.pos += 1;
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        self.skip_whitespace();
        if self.peek() != Some(')') {
            return Err(self.error("expected ')'"));
        }
        self.pos += 1;
        match digits.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(self.error(format!("bad :nth-of-type argument {:?}", digits))),
        }
    }

    /// Identifier that must not start with a digit.
    fn ident(&mut self) -> Result<String, SelectorError> {
        self.name(false)
    }

    fn name(&mut self, allow_digit_start: bool) -> Result<String, SelectorError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    out.push(self.escape()?);
                }
                Some(c) if out.is_empty() && !allow_digit_start && !is_name_start(c) => {
                    // `-` may lead an identifier as long as a name char follows.
                    let next = self.chars.get(self.pos + 1).copied();
                    if c == '-' && next.is_some_and(|n| is_name_char(n) || n == '\\') {
                        out.push(c);
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Some(c) if is_name_char(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(self.error(format!("expected identifier at offset {}", self.pos)));
        }
        Ok(out)
    }

    fn escape(&mut self) -> Result<char, SelectorError> {
        let Some(first) = self.peek() else {
            return Err(self.error("dangling escape"));
        };
        if !first.is_ascii_hexdigit() {
            if first == '\n' {
                return Err(self.error("escaped newline"));
            }
            self.pos += 1;
            return Ok(first);
        }

        let start = self.pos;
        while self.pos - start < 6 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let hex: String = self.chars[start..self.pos].iter().collect();
        if self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        let code = u32::from_str_radix(&hex, 16).map_err(|e| self.error(e.to_string()))?;
        Ok(match char::from_u32(code) {
            Some(c) if code != 0 => c,
            _ => char::REPLACEMENT_CHARACTER,
        })
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-'
}

/// Serialize `value` as a CSS identifier (the `CSS.escape` algorithm).
pub fn css_escape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if code == 0 {
            out.push(char::REPLACEMENT_CHARACTER);
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{:x} ", code));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new("https://x/", "X");
        let main = doc.append_child(doc.body(), "main");
        let a = doc.append_child(main, "button");
        doc.set_attr(a, "class", "btn primary");
        let b = doc.append_child(main, "button");
        doc.set_attr(b, "class", "btn");
        doc.set_attr(b, "id", "1st:choice");
        let c = doc.append_child(doc.body(), "button");
        (doc, a, b, c)
    }

    #[test]
    fn matches_class_compound() {
        let (doc, a, b, _) = fixture();
        assert_eq!(doc.query_selector_all("button.btn").unwrap(), vec![a, b]);
        assert_eq!(doc.query_selector_all("button.btn.primary").unwrap(), vec![a]);
    }

    #[test]
    fn matches_escaped_id() {
        let (doc, _, b, _) = fixture();
        let sel = format!("#{}", css_escape("1st:choice"));
        assert_eq!(sel, "#\\31 st\\:choice");
        assert_eq!(doc.query_selector_all(&sel).unwrap(), vec![b]);
    }

    #[test]
    fn child_and_descendant_combinators() {
        let (doc, a, b, c) = fixture();
        assert_eq!(
            doc.query_selector_all("html > body > main > button:nth-of-type(2)")
                .unwrap(),
            vec![b]
        );
        assert_eq!(doc.query_selector_all("body > button").unwrap(), vec![c]);
        assert_eq!(doc.query_selector_all("html button").unwrap(), vec![a, b, c]);
    }

    #[test]
    fn rejects_unsupported_syntax() {
        assert!(Selector::parse("a[href]").is_err());
        assert!(Selector::parse("div:hover").is_err());
        assert!(Selector::parse(".1abc").is_err());
        assert!(Selector::parse("div >").is_err());
        assert!(Selector::parse("").is_err());
    }

    #[test]
    fn escape_handles_leading_digits_and_dashes() {
        assert_eq!(css_escape("-"), "\\-");
        assert_eq!(css_escape("-1"), "-\\31 ");
        assert_eq!(css_escape("a b"), "a\\ b");
        assert_eq!(css_escape("héllo"), "héllo");
    }
}
