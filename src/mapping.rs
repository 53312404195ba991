use crate::models::Language;
use crate::options::{canonical_letter, letter_index, MAX_OPTIONS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const DOCUMENTED_OPTION_COLUMNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CanonicalFieldKey {
    Section,
    QuestionOrder,
    CorrectOption,
    Marks,
    AverageTime,
    Tags,
    Direction(Language),
    Question(Language),
    OptionText(Language, usize),
    Conclusion(Language),
    SolutionText(Language),
}

impl CanonicalFieldKey {
    pub fn all() -> Vec<CanonicalFieldKey> {
        use CanonicalFieldKey::*;
        let mut keys = vec![Section, QuestionOrder, CorrectOption, Marks, AverageTime, Tags];
        for language in Language::ALL {
            keys.push(Direction(language));
            keys.push(Question(language));
            keys.extend((0..MAX_OPTIONS).map(|i| OptionText(language, i)));
            keys.push(Conclusion(language));
            keys.push(SolutionText(language));
        }
        keys
    }

    pub fn required() -> [CanonicalFieldKey; 5] {
        use CanonicalFieldKey::*;
        [
            QuestionOrder,
            CorrectOption,
            Question(Language::En),
            OptionText(Language::En, 0),
            OptionText(Language::En, 1),
        ]
    }

    pub fn is_required(&self) -> bool {
        Self::required().contains(self)
    }

    pub fn language(&self) -> Option<Language> {
        use CanonicalFieldKey::*;
        match *self {
            Direction(l) | Question(l) | OptionText(l, _) | Conclusion(l) | SolutionText(l) => {
                Some(l)
            }
            _ => None,
        }
    }

    pub fn default_header(&self) -> Option<String> {
        use CanonicalFieldKey::*;
        let header = match *self {
            Section => "section".to_string(),
            QuestionOrder => "QSNo".to_string(),
            CorrectOption => "correctOption".to_string(),
            Marks => "marks".to_string(),
            AverageTime => "avg answer time".to_string(),
            Tags => "tags".to_string(),
            Direction(l) => format!("{}-direction", l.header_prefix()),
            Question(l) => format!("{}-question", l.header_prefix()),
            OptionText(l, i) if i < DOCUMENTED_OPTION_COLUMNS => {
                format!("{}-{}", l.header_prefix(), canonical_letter(i))
            }
            OptionText(..) => return None,
            Conclusion(l) => format!("{}-conclusion", l.header_prefix()),
            SolutionText(l) => format!("{}-solutionText", l.header_prefix()),
        };
        Some(header)
    }
}

impl fmt::Display for CanonicalFieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CanonicalFieldKey::*;
        match self {
            Section => f.write_str("section"),
            QuestionOrder => f.write_str("questionOrder"),
            CorrectOption => f.write_str("correctOption"),
            Marks => f.write_str("marks"),
            AverageTime => f.write_str("averageTime"),
            Tags => f.write_str("tags"),
            Direction(l) => write!(f, "{l}-direction"),
            Question(l) => write!(f, "{l}-question"),
            OptionText(l, i) => write!(f, "{l}-{}", canonical_letter(*i)),
            Conclusion(l) => write!(f, "{l}-conclusion"),
            SolutionText(l) => write!(f, "{l}-solutionText"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field key '{0}'")]
pub struct UnknownFieldKey(pub String);

impl FromStr for CanonicalFieldKey {
    type Err = UnknownFieldKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use CanonicalFieldKey::*;
        let unknown = || UnknownFieldKey(s.to_string());
        match s {
            "section" => return Ok(Section),
            "questionOrder" => return Ok(QuestionOrder),
            "correctOption" => return Ok(CorrectOption),
            "marks" => return Ok(Marks),
            "averageTime" => return Ok(AverageTime),
            "tags" => return Ok(Tags),
            _ => {}
        }
        let (code, field) = s.split_once('-').ok_or_else(unknown)?;
        let language = Language::from_code(code).ok_or_else(unknown)?;
        match field {
            "direction" => Ok(Direction(language)),
            "question" => Ok(Question(language)),
            "conclusion" => Ok(Conclusion(language)),
            "solutionText" => Ok(SolutionText(language)),
            letter if letter.len() == 1 && letter.chars().all(|c| c.is_ascii_uppercase()) => {
                match letter_index(letter) {
                    Some(i) if i < MAX_OPTIONS => Ok(OptionText(language, i)),
                    _ => Err(unknown()),
                }
            }
            _ => Err(unknown()),
        }
    }
}

impl From<CanonicalFieldKey> for String {
    fn from(key: CanonicalFieldKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for CanonicalFieldKey {
    type Error = UnknownFieldKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<CanonicalFieldKey, String>",
    into = "BTreeMap<CanonicalFieldKey, String>"
)]
pub struct FieldMapping {
    bindings: BTreeMap<CanonicalFieldKey, String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CanonicalFieldKey) -> Option<&str> {
        self.bindings.get(&key).map(String::as_str)
    }

    pub fn bind(&mut self, key: CanonicalFieldKey, header: impl Into<String>) {
        let header = header.into();
        if header.trim().is_empty() {
            self.bindings.remove(&key);
        } else {
            self.bindings.insert(key, header);
        }
    }

    pub fn unbind(&mut self, key: CanonicalFieldKey) -> Option<String> {
        self.bindings.remove(&key)
    }

    pub fn is_mapped(&self, key: CanonicalFieldKey) -> bool {
        self.bindings.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalFieldKey, &str)> {
        self.bindings.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn unmapped(&self) -> Vec<CanonicalFieldKey> {
        CanonicalFieldKey::all()
            .into_iter()
            .filter(|k| !self.is_mapped(*k))
            .collect()
    }

    pub fn missing_required(&self) -> Vec<CanonicalFieldKey> {
        CanonicalFieldKey::required()
            .into_iter()
            .filter(|k| !self.is_mapped(*k))
            .collect()
    }
}

impl From<BTreeMap<CanonicalFieldKey, String>> for FieldMapping {
    fn from(raw: BTreeMap<CanonicalFieldKey, String>) -> Self {
        let mut mapping = FieldMapping::new();
        for (key, header) in raw {
            mapping.bind(key, header);
        }
        mapping
    }
}

impl From<FieldMapping> for BTreeMap<CanonicalFieldKey, String> {
    fn from(mapping: FieldMapping) -> Self {
        mapping.bindings
    }
}

pub fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tokens(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}

const SEPARATORS: [&str; 3] = ["-", " ", "_"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMatcher {
    Token(String),
    Contains(String),
    Prefixed {
        prefixes: Vec<String>,
        names: Vec<String>,
    },
    AllOf(Vec<HeaderMatcher>),
    AnyOf(Vec<HeaderMatcher>),
}

impl HeaderMatcher {
    pub fn token(t: &str) -> Self {
        HeaderMatcher::Token(t.to_lowercase())
    }

    pub fn contains(t: &str) -> Self {
        HeaderMatcher::Contains(t.to_lowercase())
    }

    pub fn any_token(ts: &[&str]) -> Self {
        HeaderMatcher::AnyOf(ts.iter().map(|t| Self::token(t)).collect())
    }

    pub fn prefixed(language: Language, names: &[&str]) -> Self {
        HeaderMatcher::Prefixed {
            prefixes: language.header_aliases().iter().map(|p| p.to_string()).collect(),
            names: names.iter().map(|n| n.to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, normalized: &str) -> bool {
        match self {
            HeaderMatcher::Token(t) => tokens(normalized).any(|tok| tok == t),
            HeaderMatcher::Contains(t) => normalized.contains(t.as_str()),
            HeaderMatcher::Prefixed { prefixes, names } => prefixes.iter().any(|prefix| {
                normalized
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| {
                        SEPARATORS
                            .iter()
                            .find_map(|sep| rest.strip_prefix(*sep))
                    })
                    .map(|name| names.iter().any(|n| n == name))
                    .unwrap_or(false)
            }),
            HeaderMatcher::AllOf(all) => all.iter().all(|m| m.matches(normalized)),
            HeaderMatcher::AnyOf(any) => any.iter().any(|m| m.matches(normalized)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub field: CanonicalFieldKey,
    pub default_header: Option<String>,
    pub matcher: Option<HeaderMatcher>,
}

impl FieldRule {
    pub fn new(field: CanonicalFieldKey, matcher: HeaderMatcher) -> Self {
        Self {
            field,
            default_header: field.default_header(),
            matcher: Some(matcher),
        }
    }
}

fn language_rules(language: Language) -> Vec<FieldRule> {
    use CanonicalFieldKey::*;
    let mut rules = vec![
        FieldRule::new(
            Direction(language),
            HeaderMatcher::prefixed(language, &["direction", "directions", "instruction", "instructions"]),
        ),
        FieldRule::new(
            Question(language),
            HeaderMatcher::prefixed(language, &["question", "question text", "questiontext"]),
        ),
    ];
    for i in 0..MAX_OPTIONS {
        let letter = canonical_letter(i).to_lowercase();
        let names = [
            letter.clone(),
            format!("option {letter}"),
            format!("option{letter}"),
            format!("option_{letter}"),
            format!("opt {letter}"),
        ];
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        rules.push(FieldRule::new(
            OptionText(language, i),
            HeaderMatcher::prefixed(language, &names),
        ));
    }
    rules.push(FieldRule::new(
        Conclusion(language),
        HeaderMatcher::prefixed(language, &["conclusion"]),
    ));
    rules.push(FieldRule::new(
        SolutionText(language),
        HeaderMatcher::prefixed(
            language,
            &["solutiontext", "solution text", "solution_text", "solution", "explanation"],
        ),
    ));
    rules
}

fn standard_rules() -> Vec<FieldRule> {
    use CanonicalFieldKey::*;
    use HeaderMatcher as M;
    let mut rules = vec![
        FieldRule::new(Section, M::any_token(&["section", "subject"])),
        FieldRule::new(
            QuestionOrder,
            M::AnyOf(vec![
                M::any_token(&["qsno", "qno", "sno", "srno", "order"]),
                M::AllOf(vec![
                    M::any_token(&["q", "qs", "question"]),
                    M::any_token(&["no", "number", "num"]),
                ]),
                M::AllOf(vec![M::any_token(&["s", "sr"]), M::token("no")]),
            ]),
        ),
        FieldRule::new(
            CorrectOption,
            M::AllOf(vec![
                M::contains("correct"),
                M::AnyOf(vec![M::contains("option"), M::contains("answer")]),
            ]),
        ),
        FieldRule::new(Marks, M::any_token(&["marks", "mark", "score", "points"])),
        FieldRule::new(
            AverageTime,
            M::AnyOf(vec![
                M::AllOf(vec![M::contains("time"), M::any_token(&["avg", "average"])]),
                M::token("duration"),
                M::AllOf(vec![M::token("time"), M::any_token(&["sec", "secs", "seconds"])]),
            ]),
        ),
        FieldRule::new(Tags, M::any_token(&["tags", "tag", "keywords"])),
    ];
    for language in Language::ALL {
        rules.extend(language_rules(language));
    }
    rules
}

#[derive(Debug, Clone)]
pub struct ColumnMapper {
    rules: Vec<FieldRule>,
}

impl Default for ColumnMapper {
    fn default() -> Self {
        Self {
            rules: standard_rules(),
        }
    }
}

impl ColumnMapper {
    pub fn with_rules(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn push_rule(&mut self, rule: FieldRule) {
        self.rules.retain(|r| r.field != rule.field);
        self.rules.push(rule);
    }

    /// Pass 1 binds fields whose default header appears verbatim (after
    /// normalization); those headers are then claimed. Pass 2 runs each
    /// still-unbound field's matcher over the unclaimed headers in sheet
    /// order and takes the first hit.
    pub fn auto_map(&self, headers: &[String]) -> FieldMapping {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut mapping = FieldMapping::new();
        let mut claimed: HashSet<usize> = HashSet::new();

        for rule in &self.rules {
            let Some(default) = rule.default_header.as_deref() else {
                continue;
            };
            let wanted = normalize_header(default);
            if let Some(idx) = normalized.iter().position(|h| *h == wanted) {
                mapping.bind(rule.field, headers[idx].clone());
                claimed.insert(idx);
            }
        }

        for rule in &self.rules {
            if mapping.is_mapped(rule.field) {
                continue;
            }
            let Some(matcher) = rule.matcher.as_ref() else {
                continue;
            };
            let hit = normalized
                .iter()
                .enumerate()
                .filter(|(idx, h)| !claimed.contains(idx) && !h.is_empty())
                .find(|(_, h)| matcher.matches(h));
            if let Some((idx, _)) = hit {
                mapping.bind(rule.field, headers[idx].clone());
            }
        }

        debug!(
            headers = headers.len(),
            bound = mapping.len(),
            "auto-mapped spreadsheet columns"
        );
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CanonicalFieldKey::*;

    fn headers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn template_headers_map_exactly() {
        let mapper = ColumnMapper::default();
        let mapping = mapper.auto_map(&headers(&[
            "QSNo",
            "section",
            "eng-question",
            "eng-A",
            "eng-B",
            "correctOption",
            "marks",
        ]));

        assert_eq!(mapping.get(QuestionOrder), Some("QSNo"));
        assert_eq!(mapping.get(Section), Some("section"));
        assert_eq!(mapping.get(Question(Language::En)), Some("eng-question"));
        assert_eq!(mapping.get(OptionText(Language::En, 0)), Some("eng-A"));
        assert_eq!(mapping.get(OptionText(Language::En, 1)), Some("eng-B"));
        assert_eq!(mapping.get(CorrectOption), Some("correctOption"));
        assert_eq!(mapping.get(Marks), Some("marks"));
        assert_eq!(mapping.len(), 7);
        assert!(mapping.iter().all(|(k, _)| k.language().unwrap_or(Language::En) == Language::En));
        assert!(!mapping.is_mapped(AverageTime));
        assert!(mapping.missing_required().is_empty());
    }

    #[test]
    fn auto_map_is_idempotent() {
        let mapper = ColumnMapper::default();
        let hs = headers(&["Q No", "Correct Answer", "English Question", "eng_a", "ENG B", "Avg Time"]);
        assert_eq!(mapper.auto_map(&hs), mapper.auto_map(&hs));
    }

    #[test]
    fn heuristics_bind_loose_headers() {
        let mapper = ColumnMapper::default();
        let mapping = mapper.auto_map(&headers(&[
            " Question No ",
            "Correct Answer",
            "English Question",
            "eng_a",
            "ENG B",
            "Hindi-Question",
            "hn option a",
            "Average Time (sec)",
            "Tag",
        ]));
        assert_eq!(mapping.get(QuestionOrder), Some(" Question No "));
        assert_eq!(mapping.get(CorrectOption), Some("Correct Answer"));
        assert_eq!(mapping.get(Question(Language::En)), Some("English Question"));
        assert_eq!(mapping.get(OptionText(Language::En, 0)), Some("eng_a"));
        assert_eq!(mapping.get(OptionText(Language::En, 1)), Some("ENG B"));
        assert_eq!(mapping.get(Question(Language::Hi)), Some("Hindi-Question"));
        assert_eq!(mapping.get(OptionText(Language::Hi, 0)), Some("hn option a"));
        assert_eq!(mapping.get(AverageTime), Some("Average Time (sec)"));
        assert_eq!(mapping.get(Tags), Some("Tag"));
    }

    #[test]
    fn option_letter_does_not_collide_with_direction() {
        let mapper = ColumnMapper::default();
        let mapping = mapper.auto_map(&headers(&["eng direction", "eng d"]));
        assert_eq!(mapping.get(Direction(Language::En)), Some("eng direction"));
        assert_eq!(mapping.get(OptionText(Language::En, 3)), Some("eng d"));
    }

    #[test]
    fn first_matching_header_wins() {
        let mapper = ColumnMapper::default();
        let mapping = mapper.auto_map(&headers(&["Score", "Marks Obtained"]));
        assert_eq!(mapping.get(Marks), Some("Score"));
    }

    #[test]
    fn unknown_headers_leave_everything_unmapped() {
        let mapper = ColumnMapper::default();
        let mapping = mapper.auto_map(&headers(&["foo", "bar", ""]));
        assert!(mapping.is_empty());
        assert_eq!(mapping.unmapped().len(), CanonicalFieldKey::all().len());
        assert_eq!(mapping.missing_required().len(), 5);
    }

    #[test]
    fn field_keys_round_trip_through_text() {
        for key in CanonicalFieldKey::all() {
            assert_eq!(key.to_string().parse::<CanonicalFieldKey>(), Ok(key));
        }
        assert!("en-K".parse::<CanonicalFieldKey>().is_err());
        assert!("fr-question".parse::<CanonicalFieldKey>().is_err());
    }

    #[test]
    fn mapping_json_is_a_flat_object() {
        let raw = serde_json::json!({
            "questionOrder": "Q",
            "en-question": "Text",
            "hi-B": "",
        });
        let mapping: FieldMapping = serde_json::from_value(raw).unwrap();
        assert_eq!(mapping.get(QuestionOrder), Some("Q"));
        assert!(!mapping.is_mapped(OptionText(Language::Hi, 1)));
        let back = serde_json::to_value(&mapping).unwrap();
        assert_eq!(back["en-question"], "Text");
    }

    #[test]
    fn custom_rule_extends_table() {
        let mut mapper = ColumnMapper::default();
        mapper.push_rule(FieldRule {
            field: Section,
            default_header: Some("Topic".into()),
            matcher: None,
        });
        let mapping = mapper.auto_map(&headers(&["topic"]));
        assert_eq!(mapping.get(Section), Some("topic"));
    }
}
