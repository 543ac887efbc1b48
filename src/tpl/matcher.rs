//! Positioned, backtracking matching over template text.
//!
//! Primitives either consume input and return what they matched, or fail and
//! leave the cursor where it was. The rightmost failure position and the
//! descriptions expected there are collected for diagnostics.

use std::collections::{BTreeSet, HashMap};

use crate::error::Result;

/// Outcome of a grammar rule: `Ok(None)` is an ordinary (backtrackable)
/// failure, `Err` is fatal and aborts the parse.
pub(crate) type Step<T> = Result<Option<T>>;

/// Unwraps a successful match or makes the enclosing rule fail.
macro_rules! req {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}
pub(crate) use req;

#[derive(Debug, Clone, Copy)]
enum ClassKind {
    AnyOf(&'static str),
    NoneOf(&'static str),
    Where(fn(char) -> bool),
}

/// A single-character class: an inclusion set, a negation set or a predicate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CharClass {
    desc: &'static str,
    kind: ClassKind,
}

impl CharClass {
    pub(crate) const fn any_of(desc: &'static str, chars: &'static str) -> Self {
        Self {
            desc,
            kind: ClassKind::AnyOf(chars),
        }
    }

    pub(crate) const fn none_of(desc: &'static str, chars: &'static str) -> Self {
        Self {
            desc,
            kind: ClassKind::NoneOf(chars),
        }
    }

    pub(crate) const fn where_(desc: &'static str, test: fn(char) -> bool) -> Self {
        Self {
            desc,
            kind: ClassKind::Where(test),
        }
    }

    pub(crate) fn matches(&self, c: char) -> bool {
        match self.kind {
            ClassKind::AnyOf(chars) => chars.contains(c),
            ClassKind::NoneOf(chars) => !chars.contains(c),
            ClassKind::Where(test) => test(c),
        }
    }
}

pub(crate) const ANY_CHAR: CharClass = CharClass::none_of("any character", "");

pub(crate) struct Matcher<'a> {
    input: &'a str,
    pos: usize,
    furthest: usize,
    expected: BTreeSet<String>,
    memo: HashMap<(&'static str, usize), Option<usize>>,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            furthest: 0,
            expected: BTreeSet::new(),
            memo: HashMap::new(),
        }
    }

    pub(crate) fn input(&self) -> &'a str {
        self.input
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn reset(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub(crate) fn at_line_start(&self) -> bool {
        self.pos == 0 || self.input.as_bytes()[self.pos - 1] == b'\n'
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Matches `lit` exactly.
    pub(crate) fn literal(&mut self, lit: &'static str) -> Option<&'a str> {
        if self.rest().starts_with(lit) {
            let start = self.pos;
            self.pos += lit.len();
            Some(&self.input[start..self.pos])
        } else {
            self.expect(format!("{:?}", lit));
            None
        }
    }

    /// Matches one character of `class`.
    pub(crate) fn class(&mut self, class: &CharClass) -> Option<char> {
        match self.rest().chars().next() {
            Some(c) if class.matches(c) => {
                self.pos += c.len_utf8();
                Some(c)
            }
            _ => {
                self.expect(class.desc);
                None
            }
        }
    }

    /// Zero or more characters of `class`; always succeeds.
    pub(crate) fn span_of(&mut self, class: &CharClass) -> &'a str {
        let start = self.pos;
        while self.class(class).is_some() {}
        &self.input[start..self.pos]
    }

    /// One or more characters of `class`.
    pub(crate) fn span_of1(&mut self, class: &CharClass) -> Option<&'a str> {
        let span = self.span_of(class);
        if span.is_empty() { None } else { Some(span) }
    }

    /// Zero or more characters up to (not including) `terminator`, or to end
    /// of input when the terminator never appears.
    pub(crate) fn until(&mut self, terminator: &'static str) -> &'a str {
        let start = self.pos;
        let len = self.rest().find(terminator).unwrap_or(self.rest().len());
        self.pos += len;
        &self.input[start..self.pos]
    }

    /// Runs a pure span rule at most once per position.
    ///
    /// `rule` must depend on nothing but the input and the cursor; its
    /// outcome at a given position is cached for the rest of the parse.
    pub(crate) fn memo_span(
        &mut self,
        rule: &'static str,
        f: impl FnOnce(&mut Self) -> Option<&'a str>,
    ) -> Option<&'a str> {
        let start = self.pos;
        if let Some(&cached) = self.memo.get(&(rule, start)) {
            return cached.map(|end| {
                self.pos = end;
                &self.input[start..end]
            });
        }
        let out = f(self);
        if out.is_none() {
            self.pos = start;
        }
        self.memo
            .insert((rule, start), out.map(|_| self.pos));
        out
    }

    /// Records that `desc` was expected at the cursor.
    pub(crate) fn expect(&mut self, desc: impl Into<String>) {
        self.expect_at(self.pos, desc);
    }

    pub(crate) fn expect_at(&mut self, pos: usize, desc: impl Into<String>) {
        if pos > self.furthest {
            self.furthest = pos;
            self.expected.clear();
        }
        if pos == self.furthest {
            self.expected.insert(desc.into());
        }
    }

    /// Forgets collected diagnostics, scoping them to what comes next.
    pub(crate) fn clear_failures(&mut self) {
        self.furthest = self.pos;
        self.expected.clear();
    }

    /// Rightmost failure position and what was expected there.
    pub(crate) fn failure(&self) -> (usize, Vec<String>) {
        (self.furthest, self.expected.iter().cloned().collect())
    }
}

/// Anything that owns a [`Matcher`] cursor and can run grammar rules.
pub(crate) trait Scanner<'a> {
    fn matcher(&mut self) -> &mut Matcher<'a>;
}

impl<'a> Scanner<'a> for Matcher<'a> {
    fn matcher(&mut self) -> &mut Matcher<'a> {
        self
    }
}

/// Runs `rule` as a sequence: if it fails, the cursor is restored.
pub(crate) fn attempt<'a, S, T>(s: &mut S, rule: impl FnOnce(&mut S) -> Step<T>) -> Step<T>
where
    S: Scanner<'a>,
{
    let start = s.matcher().pos();
    let out = rule(s)?;
    if out.is_none() {
        s.matcher().reset(start);
    }
    Ok(out)
}

/// Ordered choice: the first alternative that succeeds wins.
pub(crate) fn choice<'a, S, T>(s: &mut S, alternatives: &[fn(&mut S) -> Step<T>]) -> Step<T>
where
    S: Scanner<'a>,
{
    for alternative in alternatives {
        if let Some(v) = attempt(s, alternative)? {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

/// Zero or one: never fails.
pub(crate) fn optional<'a, S, T>(
    s: &mut S,
    rule: impl FnOnce(&mut S) -> Step<T>,
) -> Result<Option<T>>
where
    S: Scanner<'a>,
{
    attempt(s, rule)
}

/// Zero or more; stops at the first failure or at a match that consumed nothing.
pub(crate) fn many<'a, S, T>(s: &mut S, mut rule: impl FnMut(&mut S) -> Step<T>) -> Result<Vec<T>>
where
    S: Scanner<'a>,
{
    let mut items = Vec::new();
    loop {
        let before = s.matcher().pos();
        match attempt(s, &mut rule)? {
            Some(item) => {
                items.push(item);
                if s.matcher().pos() == before {
                    break;
                }
            }
            None => break,
        }
    }
    Ok(items)
}
