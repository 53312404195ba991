use crate::options::canonical_letter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Hi,
    Gu,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Hi, Language::Gu];
    pub const SECONDARY: [Language; 2] = [Language::Hi, Language::Gu];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Gu => "gu",
        }
    }

    pub fn header_prefix(self) -> &'static str {
        match self {
            Language::En => "eng",
            Language::Hi => "hn",
            Language::Gu => "guj",
        }
    }

    pub fn header_aliases(self) -> &'static [&'static str] {
        match self {
            Language::En => &["eng", "en", "english"],
            Language::Hi => &["hn", "hi", "hin", "hindi"],
            Language::Gu => &["guj", "gu", "gujarati"],
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Language::ALL.into_iter().find(|l| l.code() == code)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub option_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl QuestionOption {
    pub fn empty(index: usize) -> Self {
        Self {
            option_id: canonical_letter(index),
            text: String::new(),
            image_ref: None,
        }
    }

    pub fn with_text(index: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::empty(index)
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LanguageContent {
    pub direction: String,
    pub direction_rich: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction_image: Option<String>,
    pub question_text: String,
    pub question_rich: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_image: Option<String>,
    pub conclusion: String,
    pub conclusion_rich: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion_image: Option<String>,
    pub options: Vec<QuestionOption>,
    pub explanation_text: String,
    pub explanation_rich: String,
    pub explanation_images: Vec<String>,
}

impl LanguageContent {
    pub fn with_blank_options(count: usize) -> Self {
        Self {
            options: (0..count).map(QuestionOption::empty).collect(),
            ..Self::default()
        }
    }

    pub fn derive_plain_text(&mut self) {
        let pairs = [
            (&mut self.direction, &self.direction_rich),
            (&mut self.question_text, &self.question_rich),
            (&mut self.conclusion, &self.conclusion_rich),
            (&mut self.explanation_text, &self.explanation_rich),
        ];
        for (plain, rich) in pairs {
            if !rich.trim().is_empty() {
                *plain = plain_from_rich(rich);
            }
        }
    }

    pub fn filled_option_count(&self) -> usize {
        self.options.iter().filter(|o| !o.is_blank()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Languages {
    pub en: LanguageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hi: Option<LanguageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gu: Option<LanguageContent>,
}

impl Languages {
    pub fn new(en: LanguageContent) -> Self {
        Self { en, hi: None, gu: None }
    }

    pub fn get(&self, language: Language) -> Option<&LanguageContent> {
        match language {
            Language::En => Some(&self.en),
            Language::Hi => self.hi.as_ref(),
            Language::Gu => self.gu.as_ref(),
        }
    }

    pub fn get_mut(&mut self, language: Language) -> Option<&mut LanguageContent> {
        match language {
            Language::En => Some(&mut self.en),
            Language::Hi => self.hi.as_mut(),
            Language::Gu => self.gu.as_mut(),
        }
    }

    fn slot(&mut self, language: Language) -> Option<&mut Option<LanguageContent>> {
        match language {
            Language::En => None,
            Language::Hi => Some(&mut self.hi),
            Language::Gu => Some(&mut self.gu),
        }
    }

    pub fn insert(&mut self, language: Language, content: LanguageContent) -> bool {
        match self.slot(language) {
            Some(slot) => {
                *slot = Some(content);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, language: Language) -> Option<LanguageContent> {
        self.slot(language).and_then(Option::take)
    }

    pub fn present(&self) -> impl Iterator<Item = (Language, &LanguageContent)> {
        Language::ALL
            .into_iter()
            .filter_map(move |l| self.get(l).map(|c| (l, c)))
    }

    pub fn secondary_mut(&mut self) -> impl Iterator<Item = (Language, &mut LanguageContent)> {
        [(Language::Hi, self.hi.as_mut()), (Language::Gu, self.gu.as_mut())]
            .into_iter()
            .filter_map(|(l, c)| c.map(|c| (l, c)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub languages: Languages,
    #[serde(default)]
    pub correct_option_id: String,
    #[serde(default = "default_marks")]
    pub marks: u32,
    #[serde(default)]
    pub average_time_seconds: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub question_order: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_marks() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl Default for QuestionDraft {
    fn default() -> Self {
        Self {
            section_id: None,
            languages: Languages::default(),
            correct_option_id: String::new(),
            marks: default_marks(),
            average_time_seconds: 0,
            tags: Vec::new(),
            question_order: 0,
            is_active: true,
        }
    }
}

impl QuestionDraft {
    pub fn english_option_ids(&self) -> Vec<&str> {
        self.languages
            .en
            .options
            .iter()
            .map(|o| o.option_id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRow {
    pub row_number: usize,
    pub draft: QuestionDraft,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidatedRow {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    #[serde(rename = "preview")]
    pub rows: Vec<ValidatedRow>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub selected: BTreeSet<usize>,
}

impl ImportBatch {
    pub fn from_rows(rows: Vec<ValidatedRow>) -> Self {
        let valid_rows = rows.iter().filter(|r| r.is_valid()).count();
        let selected = rows
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| r.row_number)
            .collect();
        Self {
            total_rows: rows.len(),
            invalid_rows: rows.len() - valid_rows,
            valid_rows,
            rows,
            selected,
        }
    }

    pub fn row(&self, row_number: usize) -> Option<&ValidatedRow> {
        self.rows.iter().find(|r| r.row_number == row_number)
    }

    pub fn is_selected(&self, row_number: usize) -> bool {
        self.selected.contains(&row_number)
    }

    pub fn toggle(&mut self, row_number: usize) -> Option<bool> {
        self.row(row_number)?;
        if self.selected.remove(&row_number) {
            Some(false)
        } else {
            self.selected.insert(row_number);
            Some(true)
        }
    }

    pub fn toggle_all_valid(&mut self) -> bool {
        let valid: Vec<usize> = self
            .rows
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| r.row_number)
            .collect();
        let all_selected = !valid.is_empty() && valid.iter().all(|n| self.selected.contains(n));
        if all_selected {
            for n in &valid {
                self.selected.remove(n);
            }
            false
        } else {
            self.selected.extend(valid);
            true
        }
    }

    pub fn committable(&self) -> impl Iterator<Item = &ValidatedRow> {
        self.rows
            .iter()
            .filter(|r| r.is_valid() && self.selected.contains(&r.row_number))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("missing question order")]
    MissingQuestionOrder,
    #[error("question order '{0}' is not a number")]
    QuestionOrderNotNumeric(String),
    #[error("question order must be at least 1")]
    QuestionOrderBelowOne,
    #[error("missing english question text")]
    MissingQuestionText,
    #[error("fewer than 2 options")]
    TooFewOptions,
    #[error("english option {0} has no text")]
    EmptyEnglishOption(String),
    #[error("{language} has {found} options but english has {expected}")]
    OptionCountMismatch {
        language: Language,
        expected: usize,
        found: usize,
    },
    #[error("{language} option at position {position} is labelled '{found}', expected '{expected}'")]
    OptionIdMismatch {
        language: Language,
        position: usize,
        found: String,
        expected: String,
    },
    #[error("missing correct option")]
    MissingCorrectOption,
    #[error("correct option '{given}' is not one of {valid}")]
    UnknownCorrectOption { given: String, valid: String },
    #[error("marks must be at least 1")]
    MarksBelowOne,
}

impl DraftError {
    pub fn field(&self) -> String {
        match self {
            DraftError::MissingQuestionOrder
            | DraftError::QuestionOrderNotNumeric(_)
            | DraftError::QuestionOrderBelowOne => "questionOrder".into(),
            DraftError::MissingQuestionText => "languages.en.questionText".into(),
            DraftError::TooFewOptions | DraftError::EmptyEnglishOption(_) => {
                "languages.en.options".into()
            }
            DraftError::OptionCountMismatch { language, .. }
            | DraftError::OptionIdMismatch { language, .. } => {
                format!("languages.{language}.options")
            }
            DraftError::MissingCorrectOption | DraftError::UnknownCorrectOption { .. } => {
                "correctOptionId".into()
            }
            DraftError::MarksBelowOne => "marks".into(),
        }
    }
}

/// Option-set checks shared by the bulk importer and the manual editor.
///
/// Answer checks are skipped while English has fewer than two filled options,
/// so a short option list reports exactly one problem.
pub fn check_option_set(draft: &QuestionDraft) -> Vec<DraftError> {
    let mut errors = Vec::new();
    let en = &draft.languages.en;
    if en.filled_option_count() < 2 {
        errors.push(DraftError::TooFewOptions);
        return errors;
    }

    for option in &en.options {
        if option.is_blank() {
            errors.push(DraftError::EmptyEnglishOption(option.option_id.clone()));
        }
    }

    for (language, content) in draft.languages.present() {
        if content.options.len() != en.options.len() {
            errors.push(DraftError::OptionCountMismatch {
                language,
                expected: en.options.len(),
                found: content.options.len(),
            });
            continue;
        }
        for (position, option) in content.options.iter().enumerate() {
            let expected = canonical_letter(position);
            if option.option_id != expected {
                errors.push(DraftError::OptionIdMismatch {
                    language,
                    position,
                    found: option.option_id.clone(),
                    expected,
                });
            }
        }
    }

    let correct = draft.correct_option_id.trim();
    if correct.is_empty() {
        errors.push(DraftError::MissingCorrectOption);
    } else if !en.options.iter().any(|o| o.option_id == correct) {
        errors.push(DraftError::UnknownCorrectOption {
            given: correct.to_string(),
            valid: draft.english_option_ids().join(", "),
        });
    }
    errors
}

pub fn check_draft(draft: &QuestionDraft) -> Vec<DraftError> {
    let mut errors = Vec::new();
    if draft.question_order < 1 {
        errors.push(DraftError::QuestionOrderBelowOne);
    }
    if draft.languages.en.question_text.trim().is_empty() {
        errors.push(DraftError::MissingQuestionText);
    }
    errors.extend(check_option_set(draft));
    if draft.marks < 1 {
        errors.push(DraftError::MarksBelowOne);
    }
    errors
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static BLOCK_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|ul|ol|tr|td|th|table|blockquote|h[1-6])\b[^>]*>").expect("static regex")
});
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

pub fn contains_markup(value: &str) -> bool {
    TAG_RE.is_match(value)
}

// Block and break tags separate words; inline tags (b, sub, span, ...) do not.
pub fn plain_from_rich(rich: &str) -> String {
    let blocks = BLOCK_TAG_RE.replace_all(rich, " ");
    let stripped = TAG_RE.replace_all(&blocks, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    SPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft() -> QuestionDraft {
        let mut en = LanguageContent::default();
        en.question_text = "2+2=?".into();
        en.options = vec![
            QuestionOption::with_text(0, "3"),
            QuestionOption::with_text(1, "4"),
        ];
        let mut hi = LanguageContent::default();
        hi.question_text = "2+2=?".into();
        hi.options = vec![
            QuestionOption::with_text(0, "तीन"),
            QuestionOption::with_text(1, "चार"),
        ];
        let mut languages = Languages::new(en);
        languages.insert(Language::Hi, hi);
        QuestionDraft {
            languages,
            correct_option_id: "B".into(),
            question_order: 1,
            ..QuestionDraft::default()
        }
    }

    #[test]
    fn valid_draft_has_no_errors() {
        assert!(check_draft(&sample_draft()).is_empty());
    }

    #[test]
    fn short_option_list_reports_only_that() {
        let mut draft = sample_draft();
        draft.languages.en.options.truncate(1);
        draft.correct_option_id = "B".into();
        assert_eq!(check_option_set(&draft), vec![DraftError::TooFewOptions]);
        assert_eq!(DraftError::TooFewOptions.to_string(), "fewer than 2 options");
    }

    #[test]
    fn correct_option_must_be_an_english_id() {
        let mut draft = sample_draft();
        draft.correct_option_id = "E".into();
        let errors = check_draft(&draft);
        assert_eq!(
            errors,
            vec![DraftError::UnknownCorrectOption {
                given: "E".into(),
                valid: "A, B".into()
            }]
        );
        assert_eq!(errors[0].field(), "correctOptionId");
    }

    #[test]
    fn secondary_shape_is_checked() {
        let mut draft = sample_draft();
        if let Some(hi) = draft.languages.hi.as_mut() {
            hi.options[1].option_id = "Z".into();
        }
        let errors = check_draft(&draft);
        assert!(matches!(
            &errors[0],
            DraftError::OptionIdMismatch { language: Language::Hi, position: 1, .. }
        ));

        let mut draft = sample_draft();
        if let Some(hi) = draft.languages.hi.as_mut() {
            hi.options.pop();
        }
        assert_eq!(
            check_draft(&draft),
            vec![DraftError::OptionCountMismatch {
                language: Language::Hi,
                expected: 2,
                found: 1
            }]
        );
    }

    #[test]
    fn order_and_marks_bounds() {
        let mut draft = sample_draft();
        draft.question_order = 0;
        draft.marks = 0;
        let errors = check_draft(&draft);
        assert!(errors.contains(&DraftError::QuestionOrderBelowOne));
        assert!(errors.contains(&DraftError::MarksBelowOne));
    }

    #[test]
    fn batch_selection_rules() {
        let valid = |n: usize| ValidatedRow {
            row_number: n,
            draft: sample_draft(),
            errors: vec![],
            warnings: vec![],
        };
        let mut invalid = valid(3);
        invalid.errors.push("fewer than 2 options".into());

        let mut batch = ImportBatch::from_rows(vec![valid(1), valid(2), invalid]);
        assert_eq!((batch.total_rows, batch.valid_rows, batch.invalid_rows), (3, 2, 1));
        assert_eq!(batch.selected.iter().copied().collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(batch.toggle(2), Some(false));
        assert_eq!(batch.toggle(3), Some(true));
        assert_eq!(batch.toggle(9), None);
        let committed: Vec<usize> = batch.committable().map(|r| r.row_number).collect();
        assert_eq!(committed, vec![1]);

        assert!(batch.toggle_all_valid());
        assert!(batch.is_selected(1) && batch.is_selected(2));
        assert!(!batch.toggle_all_valid());
        assert!(!batch.is_selected(1) && !batch.is_selected(2));
        assert!(batch.is_selected(3));
    }

    #[test]
    fn rich_text_becomes_plain() {
        assert_eq!(
            plain_from_rich("<p>Find <b>x</b>&nbsp;if x &lt; 3</p>"),
            "Find x if x < 3"
        );
        assert_eq!(
            plain_from_rich("H<sub>2</sub>O is <b>water</b>."),
            "H2O is water."
        );
        assert_eq!(plain_from_rich("line one<br/>line two<div>three</div>"), "line one line two three");
        assert!(contains_markup("<i>a</i>"));
        assert!(!contains_markup("a < b"));

        let mut content = LanguageContent::default();
        content.question_text = "stale".into();
        content.question_rich = "<p>fresh</p>".into();
        content.derive_plain_text();
        assert_eq!(content.question_text, "fresh");
    }

    #[test]
    fn draft_json_shape() {
        let raw = serde_json::to_value(sample_draft()).unwrap();
        assert_eq!(raw["correctOptionId"], "B");
        assert_eq!(raw["languages"]["en"]["options"][1]["optionId"], "B");
        assert!(raw["languages"].get("gu").is_none());
    }
}
