use crate::mapping::{CanonicalFieldKey, FieldMapping};
use crate::models::{
    check_option_set, contains_markup, plain_from_rich, DraftError, Language, LanguageContent,
    Languages, QuestionDraft, QuestionOption, ValidatedRow,
};
use crate::options::{canonical_letter, synchronize, MAX_OPTIONS};
use crate::tabular::RawRow;

const TAG_SEPARATORS: [char; 3] = [',', ';', '|'];

struct RowReader<'a> {
    raw: &'a RawRow,
    mapping: &'a FieldMapping,
}

impl RowReader<'_> {
    fn text(&self, key: CanonicalFieldKey) -> String {
        self.mapping
            .get(key)
            .and_then(|header| self.raw.get(header))
            .map(|cell| cell.as_text())
            .unwrap_or_default()
    }

    fn rich_pair(&self, key: CanonicalFieldKey) -> (String, String) {
        let value = self.text(key);
        if contains_markup(&value) {
            (plain_from_rich(&value), value)
        } else {
            (value, String::new())
        }
    }
}

fn read_language(
    reader: &RowReader<'_>,
    language: Language,
    warnings: &mut Vec<String>,
) -> (LanguageContent, usize) {
    use CanonicalFieldKey::*;
    let mut content = LanguageContent::default();
    (content.direction, content.direction_rich) = reader.rich_pair(Direction(language));
    (content.question_text, content.question_rich) = reader.rich_pair(Question(language));
    (content.conclusion, content.conclusion_rich) = reader.rich_pair(Conclusion(language));
    (content.explanation_text, content.explanation_rich) =
        reader.rich_pair(SolutionText(language));

    let mut gap: Option<usize> = None;
    for i in 0..MAX_OPTIONS {
        let text = reader.text(OptionText(language, i));
        match gap {
            None if text.is_empty() => gap = Some(i),
            None => content.options.push(QuestionOption::with_text(i, text)),
            Some(first_empty) if !text.is_empty() => {
                warnings.push(format!(
                    "{language} option {} ignored because option {} is empty",
                    canonical_letter(i),
                    canonical_letter(first_empty)
                ));
            }
            Some(_) => {}
        }
    }
    let supplied = content.options.len();
    (content, supplied)
}

fn parse_whole(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15).then_some(f as i64)
}

pub fn parse_tags(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Vec::new());
    }
    if raw.starts_with('[') || raw.starts_with('{') {
        let tags: Vec<String> = serde_json::from_str(raw).ok()?;
        return Some(
            tags.into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        );
    }
    Some(
        raw.split(TAG_SEPARATORS)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    )
}

pub fn validate_row(row_number: usize, raw: &RawRow, mapping: &FieldMapping) -> ValidatedRow {
    use CanonicalFieldKey::*;
    let reader = RowReader { raw, mapping };
    let mut errors: Vec<DraftError> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let (en, _) = read_language(&reader, Language::En, &mut warnings);
    let mut languages = Languages::new(en);
    let mut supplied = Vec::new();
    for language in Language::SECONDARY {
        if reader.text(Question(language)).is_empty() {
            continue;
        }
        let (content, count) = read_language(&reader, language, &mut warnings);
        languages.insert(language, content);
        supplied.push((language, count));
    }

    let en_count = languages.en.options.len();
    synchronize(&mut languages, en_count);
    for (language, count) in supplied {
        if count < en_count {
            warnings.push(format!(
                "{language} supplies {count} of {en_count} option texts; the rest are empty"
            ));
        } else if count > en_count {
            warnings.push(format!(
                "{language} supplies {count} option texts but english has {en_count}; extras dropped"
            ));
        }
    }

    let order_raw = reader.text(QuestionOrder);
    let question_order = if order_raw.is_empty() {
        errors.push(DraftError::MissingQuestionOrder);
        0
    } else {
        match parse_whole(&order_raw) {
            None => {
                errors.push(DraftError::QuestionOrderNotNumeric(order_raw.clone()));
                0
            }
            Some(n) if n < 1 => {
                errors.push(DraftError::QuestionOrderBelowOne);
                0
            }
            Some(n) => match u32::try_from(n) {
                Ok(order) => order,
                Err(_) => {
                    errors.push(DraftError::QuestionOrderNotNumeric(order_raw.clone()));
                    0
                }
            },
        }
    };

    if languages.en.question_text.is_empty() {
        errors.push(DraftError::MissingQuestionText);
    }

    let marks_raw = reader.text(Marks);
    let marks = match parse_whole(&marks_raw).and_then(|n| u32::try_from(n).ok()) {
        Some(n) if n >= 1 => n,
        _ if marks_raw.is_empty() => {
            warnings.push("marks missing; defaulted to 1".into());
            1
        }
        _ => {
            warnings.push(format!("marks '{marks_raw}' is not a positive number; defaulted to 1"));
            1
        }
    };

    let time_raw = reader.text(AverageTime);
    let average_time_seconds = if time_raw.is_empty() {
        0
    } else {
        match parse_whole(&time_raw).and_then(|n| u32::try_from(n).ok()) {
            Some(n) => n,
            _ => {
                warnings.push(format!(
                    "average time '{time_raw}' is not a number of seconds; defaulted to 0"
                ));
                0
            }
        }
    };

    let tags_raw = reader.text(Tags);
    let tags = parse_tags(&tags_raw).unwrap_or_else(|| {
        warnings.push(format!("tags '{tags_raw}' are in an unrecognized format; ignored"));
        Vec::new()
    });

    let section = reader.text(Section);
    let draft = QuestionDraft {
        section_id: (!section.is_empty()).then_some(section),
        languages,
        correct_option_id: reader.text(CorrectOption).to_uppercase(),
        marks,
        average_time_seconds,
        tags,
        question_order,
        is_active: true,
    };
    errors.extend(check_option_set(&draft));

    ValidatedRow {
        row_number,
        draft,
        errors: errors.iter().map(ToString::to_string).collect(),
        warnings,
    }
}
