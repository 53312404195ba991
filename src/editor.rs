use crate::models::{check_draft, DraftError, Language, LanguageContent, QuestionDraft, QuestionOption};
use crate::options::{canonical_letter, letter_index, reletter, synchronize, MAX_OPTIONS};
use thiserror::Error;

pub const STARTER_OPTIONS: usize = 4;
const MIN_OPTIONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    #[error("a question needs at least 2 options")]
    TooFewOptions,
    #[error("a question can have at most 10 options")]
    TooManyOptions,
    #[error("option {0} does not exist")]
    NoSuchOption(usize),
    #[error("'{0}' is not one of the english options")]
    UnknownOption(String),
    #[error("{0} content is not enabled for this question")]
    LanguageDisabled(Language),
    #[error("english content cannot be disabled")]
    EnglishRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Direction,
    Question,
    Conclusion,
    Explanation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraftEditor {
    draft: QuestionDraft,
}

impl Default for QuestionDraftEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionDraftEditor {
    pub fn new() -> Self {
        let mut draft = QuestionDraft::default();
        draft.languages.en = LanguageContent::with_blank_options(STARTER_OPTIONS);
        Self { draft }
    }

    pub fn from_draft(mut draft: QuestionDraft) -> Self {
        reletter(&mut draft.languages.en.options);
        let count = draft.languages.en.options.len();
        synchronize(&mut draft.languages, count);
        draft.correct_option_id = draft.correct_option_id.trim().to_uppercase();
        Self { draft }
    }

    pub fn draft(&self) -> &QuestionDraft {
        &self.draft
    }

    pub fn option_count(&self) -> usize {
        self.draft.languages.en.options.len()
    }

    fn sync(&mut self) {
        let count = self.option_count();
        synchronize(&mut self.draft.languages, count);
        let valid = self
            .draft
            .english_option_ids()
            .contains(&self.draft.correct_option_id.as_str());
        if !valid {
            self.draft.correct_option_id.clear();
        }
    }

    pub fn add_option(&mut self) -> Result<String, EditorError> {
        let count = self.option_count();
        if count >= MAX_OPTIONS {
            return Err(EditorError::TooManyOptions);
        }
        let option = QuestionOption::empty(count);
        let id = option.option_id.clone();
        self.draft.languages.en.options.push(option);
        self.sync();
        Ok(id)
    }

    pub fn remove_option(&mut self, index: usize) -> Result<(), EditorError> {
        let count = self.option_count();
        if index >= count {
            return Err(EditorError::NoSuchOption(index));
        }
        if count <= MIN_OPTIONS {
            return Err(EditorError::TooFewOptions);
        }
        // Secondary languages drop the same position rather than their tail.
        for (_, content) in self.draft.languages.secondary_mut() {
            if index < content.options.len() {
                content.options.remove(index);
            }
        }
        let removed = self.draft.languages.en.options.remove(index);
        let correct = self.draft.correct_option_id.clone();
        reletter(&mut self.draft.languages.en.options);
        if correct == removed.option_id {
            self.draft.correct_option_id.clear();
        } else if let Some(old) = letter_index(&correct) {
            if old > index {
                self.draft.correct_option_id = canonical_letter(old - 1);
            }
        }
        self.sync();
        Ok(())
    }

    pub fn set_correct_option(&mut self, letter: &str) -> Result<(), EditorError> {
        let letter = letter.trim().to_uppercase();
        if !self.draft.english_option_ids().contains(&letter.as_str()) {
            return Err(EditorError::UnknownOption(letter));
        }
        self.draft.correct_option_id = letter;
        Ok(())
    }

    pub fn enable_language(&mut self, language: Language) -> Result<(), EditorError> {
        if language == Language::En {
            return Ok(());
        }
        if self.draft.languages.get(language).is_none() {
            let content = LanguageContent::with_blank_options(self.option_count());
            self.draft.languages.insert(language, content);
        }
        Ok(())
    }

    pub fn disable_language(&mut self, language: Language) -> Result<(), EditorError> {
        if language == Language::En {
            return Err(EditorError::EnglishRequired);
        }
        self.draft.languages.remove(language);
        Ok(())
    }

    fn content_mut(&mut self, language: Language) -> Result<&mut LanguageContent, EditorError> {
        self.draft
            .languages
            .get_mut(language)
            .ok_or(EditorError::LanguageDisabled(language))
    }

    pub fn set_text(&mut self, language: Language, field: TextField, text: impl Into<String>) -> Result<(), EditorError> {
        let content = self.content_mut(language)?;
        let slot = match field {
            TextField::Direction => &mut content.direction,
            TextField::Question => &mut content.question_text,
            TextField::Conclusion => &mut content.conclusion,
            TextField::Explanation => &mut content.explanation_text,
        };
        *slot = text.into();
        Ok(())
    }

    pub fn set_rich_text(&mut self, language: Language, field: TextField, rich: impl Into<String>) -> Result<(), EditorError> {
        let content = self.content_mut(language)?;
        let slot = match field {
            TextField::Direction => &mut content.direction_rich,
            TextField::Question => &mut content.question_rich,
            TextField::Conclusion => &mut content.conclusion_rich,
            TextField::Explanation => &mut content.explanation_rich,
        };
        *slot = rich.into();
        Ok(())
    }

    pub fn set_option_text(&mut self, language: Language, index: usize, text: impl Into<String>) -> Result<(), EditorError> {
        let option = self
            .content_mut(language)?
            .options
            .get_mut(index)
            .ok_or(EditorError::NoSuchOption(index))?;
        option.text = text.into();
        Ok(())
    }

    pub fn set_marks(&mut self, marks: u32) {
        self.draft.marks = marks;
    }

    pub fn set_average_time(&mut self, seconds: u32) {
        self.draft.average_time_seconds = seconds;
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.draft.tags = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }

    pub fn set_section(&mut self, section: Option<String>) {
        self.draft.section_id = section.filter(|s| !s.trim().is_empty());
    }

    pub fn set_question_order(&mut self, order: u32) {
        self.draft.question_order = order;
    }

    pub fn set_active(&mut self, active: bool) {
        self.draft.is_active = active;
    }

    pub fn submit(&self) -> Result<QuestionDraft, Vec<DraftError>> {
        let mut draft = self.draft.clone();
        for language in Language::ALL {
            if let Some(content) = draft.languages.get_mut(language) {
                content.derive_plain_text();
                for option in &mut content.options {
                    option.text = option.text.trim().to_string();
                }
            }
        }
        let errors = check_draft(&draft);
        if errors.is_empty() {
            Ok(draft)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> QuestionDraftEditor {
        let mut editor = QuestionDraftEditor::new();
        editor.set_question_order(1);
        editor.set_text(Language::En, TextField::Question, "2+2=?").unwrap();
        for (i, t) in ["3", "4", "5", "6"].iter().enumerate() {
            editor.set_option_text(Language::En, i, *t).unwrap();
        }
        editor
    }

    fn ids(content: &LanguageContent) -> Vec<&str> {
        content.options.iter().map(|o| o.option_id.as_str()).collect()
    }

    #[test]
    fn new_editor_starts_with_four_options() {
        let editor = QuestionDraftEditor::new();
        assert_eq!(ids(&editor.draft().languages.en), ["A", "B", "C", "D"]);
        assert_eq!(editor.draft().marks, 1);
    }

    #[test]
    fn option_edits_are_mirrored_into_other_languages() {
        let mut editor = filled();
        editor.enable_language(Language::Hi).unwrap();
        editor.set_option_text(Language::Hi, 2, "पाँच").unwrap();
        editor.add_option().unwrap();
        assert_eq!(ids(editor.draft().languages.hi.as_ref().unwrap()), ["A", "B", "C", "D", "E"]);

        editor.remove_option(1).unwrap();
        let hi = editor.draft().languages.hi.as_ref().unwrap();
        assert_eq!(ids(hi), ["A", "B", "C", "D"]);
        assert_eq!(hi.options[1].text, "पाँच");
        assert_eq!(editor.draft().languages.en.options[1].text, "5");
    }

    #[test]
    fn cannot_drop_below_two_options() {
        let mut editor = filled();
        editor.remove_option(3).unwrap();
        editor.remove_option(2).unwrap();
        assert_eq!(editor.remove_option(0), Err(EditorError::TooFewOptions));
        assert_eq!(editor.option_count(), 2);
        assert_eq!(editor.remove_option(5), Err(EditorError::NoSuchOption(5)));
    }

    #[test]
    fn correct_option_follows_removals() {
        let mut editor = filled();
        assert!(matches!(editor.set_correct_option("Q"), Err(EditorError::UnknownOption(_))));
        editor.set_correct_option("c").unwrap();
        editor.remove_option(0).unwrap();
        assert_eq!(editor.draft().correct_option_id, "B");
        editor.remove_option(1).unwrap();
        assert_eq!(editor.draft().correct_option_id, "");
    }

    #[test]
    fn option_count_is_capped() {
        let mut editor = QuestionDraftEditor::new();
        while editor.option_count() < MAX_OPTIONS {
            editor.add_option().unwrap();
        }
        assert_eq!(editor.add_option(), Err(EditorError::TooManyOptions));
    }

    #[test]
    fn submit_uses_the_row_checks() {
        let mut editor = filled();
        assert_eq!(editor.submit().unwrap_err(), vec![DraftError::MissingCorrectOption]);
        editor.set_correct_option("B").unwrap();
        editor.set_marks(0);
        assert_eq!(editor.submit().unwrap_err(), vec![DraftError::MarksBelowOne]);
        editor.set_marks(2);
        let draft = editor.submit().unwrap();
        assert_eq!(draft.correct_option_id, "B");
    }

    #[test]
    fn submit_derives_plain_text_from_rich() {
        let mut editor = filled();
        editor.set_correct_option("A").unwrap();
        editor
            .set_rich_text(Language::En, TextField::Question, "<p>What is <b>2+2</b></p>")
            .unwrap();
        let draft = editor.submit().unwrap();
        assert_eq!(draft.languages.en.question_text, "What is 2+2");
    }

    #[test]
    fn from_draft_reshapes_secondary_languages() {
        let mut draft = filled().draft().clone();
        let mut gu = LanguageContent::with_blank_options(7);
        gu.options[0].option_id = "Z".into();
        draft.languages.gu = Some(gu);
        draft.correct_option_id = " d ".into();
        let editor = QuestionDraftEditor::from_draft(draft);
        assert_eq!(ids(editor.draft().languages.gu.as_ref().unwrap()), ["A", "B", "C", "D"]);
        assert_eq!(editor.draft().correct_option_id, "D");
    }

    #[test]
    fn english_cannot_be_disabled() {
        let mut editor = QuestionDraftEditor::new();
        assert_eq!(editor.disable_language(Language::En), Err(EditorError::EnglishRequired));
        assert_eq!(
            editor.set_option_text(Language::Gu, 0, "x"),
            Err(EditorError::LanguageDisabled(Language::Gu))
        );
    }
}
