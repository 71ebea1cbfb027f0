//! Locale vocabularies for chat-presence status text.
//!
//! Each vocabulary is a reviewable table: the keywords that mean "active right
//! now", the prefixes that introduce a last-seen phrase, and an ordered list of
//! literal substitutions that rewrite the phrase into the canonical English
//! vocabulary understood by [`crate::phrase`].

/// Status vocabulary of one UI locale.
#[derive(Debug, PartialEq, Eq)]
pub struct Vocabulary {
    pub locale: &'static str,
    /// Substrings meaning the subject is online or composing a message.
    pub active_keywords: &'static [&'static str],
    /// Substrings introducing a last-seen phrase. Everything after the first
    /// occurrence is the phrase.
    pub last_seen_prefixes: &'static [&'static str],
    /// Literal replacements. The text is scanned once, left to right; at each
    /// position the first entry that matches wins and the scan resumes after
    /// the matched text. Replaced output is never rescanned, so longer words
    /// must precede the shorter words they contain.
    pub substitutions: &'static [(&'static str, &'static str)],
}

pub const ROMANIAN: Vocabulary = Vocabulary {
    locale: "ro",
    active_keywords: &["online", "conectat", "scrie"],
    last_seen_prefixes: &["ultima accesare"],
    substitutions: &[
        // months ("martie" before the weekday "marti")
        ("ianuarie", "january"),
        ("februarie", "february"),
        ("martie", "march"),
        ("aprilie", "april"),
        ("iunie", "june"),
        ("iulie", "july"),
        ("septembrie", "september"),
        ("octombrie", "october"),
        ("noiembrie", "november"),
        ("decembrie", "december"),
        ("mai", "may"),
        // weekdays
        ("luni", "monday"),
        ("marți", "tuesday"),
        ("marţi", "tuesday"),
        ("marti", "tuesday"),
        ("miercuri", "wednesday"),
        ("joi", "thursday"),
        ("vineri", "friday"),
        ("sâmbătă", "saturday"),
        ("sambata", "saturday"),
        ("duminică", "sunday"),
        ("duminica", "sunday"),
        // relative markers
        ("astăzi", "today"),
        ("astazi", "today"),
        ("azi", "today"),
        ("ieri", "yesterday"),
        ("acum", "now"),
        ("la", "at"),
        ("pe", "on"),
        // meridiem
        (" p.m.", "pm"),
        (" a.m.", "am"),
        ("p.m.", "pm"),
        ("a.m.", "am"),
    ],
};

pub const ENGLISH: Vocabulary = Vocabulary {
    locale: "en",
    active_keywords: &["online", "typing"],
    last_seen_prefixes: &["last seen"],
    substitutions: &[
        (" p.m.", "pm"),
        (" a.m.", "am"),
        ("p.m.", "pm"),
        ("a.m.", "am"),
    ],
};

/// Every built-in vocabulary, reference locale first.
pub const ALL: [&Vocabulary; 2] = [&ROMANIAN, &ENGLISH];

/// Look up a built-in vocabulary by locale code (`"ro"`, `"en"`).
pub fn by_locale(code: &str) -> Option<&'static Vocabulary> {
    ALL.into_iter()
        .find(|v| v.locale.eq_ignore_ascii_case(code.trim()))
}

impl Vocabulary {
    /// Apply the substitution table to an already lower-cased phrase.
    pub fn translate(&self, phrase: &str) -> String {
        let mut out = String::with_capacity(phrase.len());
        let mut rest = phrase;

        'scan: while let Some(ch) = rest.chars().next() {
            for (from, to) in self.substitutions {
                if let Some(tail) = rest.strip_prefix(from) {
                    out.push_str(to);
                    rest = tail;
                    continue 'scan;
                }
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }

        out
    }

    pub fn is_active(&self, normalized: &str) -> bool {
        self.active_keywords.iter().any(|k| normalized.contains(k))
    }

    /// The phrase following the first matching last-seen prefix, stripped of
    /// separator punctuation.
    pub fn last_seen_phrase<'a>(&self, normalized: &'a str) -> Option<&'a str> {
        self.last_seen_prefixes.iter().find_map(|prefix| {
            normalized.find(prefix).map(|pos| {
                normalized[pos + prefix.len()..]
                    .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
                    .trim_end()
            })
        })
    }
}
