use crate::models::{Language, Languages, QuestionOption};

pub const MAX_OPTIONS: usize = 10;

/// Positional identifier for an option: `A`..`Z`, then `AA`, `AB`, ... like spreadsheet columns.
pub fn canonical_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub fn letter_index(letter: &str) -> Option<usize> {
    let letter = letter.trim();
    if letter.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for c in letter.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

pub fn reletter(options: &mut [QuestionOption]) -> usize {
    let mut changed = 0;
    for (i, option) in options.iter_mut().enumerate() {
        let expected = canonical_letter(i);
        if option.option_id != expected {
            option.option_id = expected;
            changed += 1;
        }
    }
    changed
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub padded: Vec<(Language, usize)>,
    pub truncated: Vec<(Language, usize)>,
    pub relettered: Vec<(Language, usize)>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.padded.is_empty() && self.truncated.is_empty() && self.relettered.is_empty()
    }
}

/// Resizes and re-letters every present non-English option list to `target_count`.
///
/// English is left untouched; callers decide the count (and reject
/// removals below two options) before calling this.
pub fn synchronize(languages: &mut Languages, target_count: usize) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    for (language, content) in languages.secondary_mut() {
        let current = content.options.len();
        if current < target_count {
            content
                .options
                .extend((current..target_count).map(QuestionOption::empty));
            outcome.padded.push((language, target_count - current));
        } else if current > target_count {
            content.options.truncate(target_count);
            outcome.truncated.push((language, current - target_count));
        }
        let changed = reletter(&mut content.options);
        if changed > 0 {
            outcome.relettered.push((language, changed));
        }
    }
    outcome
}
