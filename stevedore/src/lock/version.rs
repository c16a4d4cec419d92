//! Release versions with PEP 440 ordering.
//!
//! Supported form: `[v]N(.N)*[{a|b|rc}N][.postN][.devN]`, with the usual
//! spelling variants (`alpha`, `beta`, `c`, `pre`, `preview`, `rev`, `r`,
//! `-N` implicit post, `-`/`_`/`.` separators). Epochs and local labels are
//! rejected.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use stevedore_shared::{StevedoreError, StevedoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreKind {
    Alpha,
    Beta,
    Rc,
}

impl PreKind {
    fn label(self) -> &'static str {
        match self {
            PreKind::Alpha => "a",
            PreKind::Beta => "b",
            PreKind::Rc => "rc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Version {
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl Version {
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Final release with the given segments, no pre/post/dev parts.
    pub fn from_release(release: Vec<u64>) -> Self {
        Self {
            release,
            pre: None,
            post: None,
            dev: None,
        }
    }

    /// The same version with trailing zero release segments dropped, so that
    /// `1.0` and `1.0.0` print alike.
    pub(crate) fn trimmed(&self) -> Self {
        let mut trimmed = self.clone();
        while trimmed.release.len() > 1 && trimmed.release.last() == Some(&0) {
            trimmed.release.pop();
        }
        trimmed
    }

    /// Release segment `i`, with missing trailing segments read as zero.
    pub(crate) fn segment(&self, i: usize) -> u64 {
        self.release.get(i).copied().unwrap_or(0)
    }

    fn pre_key(&self) -> (i8, u64) {
        match (self.pre, self.post, self.dev) {
            (Some((kind, n)), _, _) => (kind as i8, n),
            // 1.0.dev1 sorts before 1.0a1
            (None, None, Some(_)) => (-1, 0),
            (None, _, _) => (i8::MAX, 0),
        }
    }

    fn post_key(&self) -> (i8, u64) {
        self.post.map_or((-1, 0), |n| (0, n))
    }

    fn dev_key(&self) -> (i8, u64) {
        self.dev.map_or((1, 0), |n| (0, n))
    }

    pub(crate) fn compare_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_release(other)
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post_key().cmp(&other.post_key()))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{}", kind.label(), n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = StevedoreError;

    fn from_str(input: &str) -> StevedoreResult<Self> {
        let invalid = |why: &str| StevedoreError::Config(format!("invalid version '{}': {}", input, why));

        let lowered = input.trim().to_ascii_lowercase();
        let text = lowered.strip_prefix('v').unwrap_or(&lowered);
        if text.contains('!') {
            return Err(invalid("epochs are not supported"));
        }
        if text.contains('+') {
            return Err(invalid("local version labels are not supported"));
        }

        let mut cursor = Cursor { text, pos: 0 };

        let mut release = vec![cursor.number().ok_or_else(|| invalid("expected a release number"))?];
        while cursor.peek_is(".") && cursor.digit_at(1) {
            cursor.pos += 1;
            release.push(cursor.number().ok_or_else(|| invalid("bad release segment"))?);
        }

        let mut version = Version::from_release(release);

        let mark = cursor.pos;
        cursor.separator();
        if let Some(kind) = cursor.pre_label() {
            cursor.separator();
            version.pre = Some((kind, cursor.number().unwrap_or(0)));
        } else {
            cursor.pos = mark;
        }

        let mark = cursor.pos;
        if cursor.peek_is("-") && cursor.digit_at(1) {
            cursor.pos += 1;
            version.post = cursor.number();
        } else {
            cursor.separator();
            if cursor.eat_any(&["post", "rev", "r"]) {
                cursor.separator();
                version.post = Some(cursor.number().unwrap_or(0));
            } else {
                cursor.pos = mark;
            }
        }

        let mark = cursor.pos;
        cursor.separator();
        if cursor.eat_any(&["dev"]) {
            version.dev = Some(cursor.number().unwrap_or(0));
        } else {
            cursor.pos = mark;
        }

        if !cursor.done() {
            return Err(invalid("unexpected trailing characters"));
        }
        Ok(version)
    }
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl Cursor<'_> {
    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn done(&self) -> bool {
        self.pos == self.text.len()
    }

    fn peek_is(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn digit_at(&self, offset: usize) -> bool {
        self.rest()
            .as_bytes()
            .get(offset)
            .is_some_and(u8::is_ascii_digit)
    }

    fn number(&mut self) -> Option<u64> {
        let digits = self.rest().bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value = self.rest()[..digits].parse().ok()?;
        self.pos += digits;
        Some(value)
    }

    fn separator(&mut self) {
        if matches!(self.rest().as_bytes().first(), Some(b'.' | b'-' | b'_')) {
            self.pos += 1;
        }
    }

    fn eat_any(&mut self, words: &[&str]) -> bool {
        for word in words {
            if self.peek_is(word) {
                self.pos += word.len();
                return true;
            }
        }
        false
    }

    fn pre_label(&mut self) -> Option<PreKind> {
        const LABELS: &[(&str, PreKind)] = &[
            ("alpha", PreKind::Alpha),
            ("a", PreKind::Alpha),
            ("beta", PreKind::Beta),
            ("b", PreKind::Beta),
            ("preview", PreKind::Rc),
            ("pre", PreKind::Rc),
            ("rc", PreKind::Rc),
            ("c", PreKind::Rc),
        ];
        let (word, kind) = LABELS.iter().find(|(word, _)| self.peek_is(word))?;
        self.pos += word.len();
        Some(*kind)
    }
}
