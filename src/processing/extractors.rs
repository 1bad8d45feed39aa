// Heuristic field extraction from raw OCR text of identity documents
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::models::IdData;

/// Labels introducing a first name.
pub const FIRST_NAME_LABELS: &[&str] = &["PRENUME", "FIRST NAME", "GIVEN NAME"];

/// Labels introducing a last name. "NUME" is also a substring of "PRENUME".
pub const LAST_NAME_LABELS: &[&str] = &["NUME", "LAST NAME", "SURNAME", "FAMILY NAME"];

lazy_static! {
    // 13 digits, optionally grouped 4+4+5. ASCII word boundaries, so OCR
    // noise like a stray diacritic glued to the digits does not hide them.
    static ref ID_NUMBER_PATTERN: Regex =
        Regex::new(r"(?-u:\b)([0-9]{13}|[0-9]{4}\s?[0-9]{4}\s?[0-9]{5})(?-u:\b)").unwrap();

    // DD.MM.YYYY, DD/MM/YYYY or YYYY-MM-DD
    static ref BIRTH_DATE_PATTERN: Regex = Regex::new(
        r"(?-u:\b)([0-9]{2}[./][0-9]{2}[./][0-9]{4}|[0-9]{4}-[0-9]{2}-[0-9]{2})(?-u:\b)"
    )
    .unwrap();

    // Whole words only: "IONELă" is mixed case and yields nothing
    static ref UPPERCASE_WORD_PATTERN: Regex = Regex::new(r"\b\p{Lu}{2,}\b").unwrap();

    // Printed document keywords that are never names. Compared in uppercase.
    static ref DOCUMENT_KEYWORDS: HashSet<&'static str> = [
        "IDENTITY", "CARD", "PASSPORT", "REPUBLIC", "ISSUED", "DATE", "BIRTH",
        "SEX", "NATIONALITY", "VALID", "UNTIL", "EXPIRY", "AUTHORITY", "NAME",
        "SURNAME", "GIVEN", "FIRST", "LAST", "FAMILY", "PLACE", "DOCUMENT",
        "MOLDOVA", "ROMANIA", "ROMANA", "MDA", "ROU",
        "REPUBLICA", "BULETINUL", "BULETIN", "ACTE", "IDENTITATE", "CARTE",
        "NUME", "PRENUME", "DATA", "NASTERII", "SEXUL", "CETATENIA", "VALABIL",
        "ELIBERAT", "ELIBERARII", "DOMICILIU", "SERIA",
    ]
    .into_iter()
    .collect();
}

/// Minimum length (exclusive) of a fallback name token.
const MIN_NAME_LEN: usize = 2;

pub struct FieldParser;

impl FieldParser {
    /// Parse raw OCR text into an [`IdData`] stamped with the current time.
    pub fn parse(raw_text: &str) -> IdData {
        Self::parse_at(raw_text, Utc::now())
    }

    /// Parse raw OCR text with an explicit extraction timestamp.
    ///
    /// Never fails: fields the heuristics cannot find stay empty. Apart from
    /// `timestamp`, the output depends only on `raw_text`.
    pub fn parse_at(raw_text: &str, timestamp: DateTime<Utc>) -> IdData {
        let mut data = IdData::empty(raw_text, timestamp);

        let lines: Vec<&str> = raw_text.lines().collect();
        let text = lines.join(" ");

        if let Some(id_number) = Self::extract_id_number(&text) {
            data.id_number = id_number;
        }
        if let Some(birth_date) = Self::extract_birth_date(&text) {
            data.birth_date = birth_date;
        }

        let (first_name, last_name) = Self::extract_labeled_names(&lines);
        data.first_name = first_name.unwrap_or_default();
        data.last_name = last_name.unwrap_or_default();

        if data.first_name.is_empty() || data.last_name.is_empty() {
            let candidates = Self::name_candidates(&text);
            if candidates.len() >= 2 {
                if data.last_name.is_empty() {
                    data.last_name = candidates[0].to_string();
                }
                if data.first_name.is_empty() {
                    data.first_name = candidates[1].to_string();
                }
            }
        }

        data
    }

    /// First 13-digit national ID number in the text, with grouping spaces removed.
    pub fn extract_id_number(text: &str) -> Option<String> {
        ID_NUMBER_PATTERN
            .find(text)
            .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect())
    }

    /// First date in one of the supported layouts, returned as printed.
    pub fn extract_birth_date(text: &str) -> Option<String> {
        BIRTH_DATE_PATTERN.find(text).map(|m| m.as_str().to_string())
    }

    /// Scan lines for `LABEL: value` pairs. Returns `(first_name, last_name)`.
    ///
    /// Each label group is tested on every line and only the first matching
    /// line per field counts. Since "NUME" is inside "PRENUME", a `PRENUME:`
    /// line also fills the last name when no last-name line came before it.
    pub fn extract_labeled_names(lines: &[&str]) -> (Option<String>, Option<String>) {
        let mut first_name: Option<String> = None;
        let mut last_name: Option<String> = None;

        for line in lines {
            let line = line.trim();
            let upper = line.to_uppercase();

            if Self::has_label(&upper, FIRST_NAME_LABELS) && Self::is_unset(&first_name) {
                first_name = Self::value_after_colon(line);
            }
            if Self::has_label(&upper, LAST_NAME_LABELS) && Self::is_unset(&last_name) {
                last_name = Self::value_after_colon(line);
            }
        }

        (
            first_name.filter(|v| !v.is_empty()),
            last_name.filter(|v| !v.is_empty()),
        )
    }

    /// Uppercase words that could be names, in text order, keywords removed.
    pub fn name_candidates(text: &str) -> Vec<&str> {
        UPPERCASE_WORD_PATTERN
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|word| word.chars().count() > MIN_NAME_LEN)
            .filter(|word| !Self::is_document_keyword(word))
            .collect()
    }

    /// Case-insensitive stoplist lookup.
    pub fn is_document_keyword(word: &str) -> bool {
        DOCUMENT_KEYWORDS.contains(word.to_uppercase().as_str())
    }

    fn has_label(upper_line: &str, labels: &[&str]) -> bool {
        labels.iter().any(|label| upper_line.contains(label))
    }

    fn is_unset(field: &Option<String>) -> bool {
        field.as_deref().map_or(true, str::is_empty)
    }

    fn value_after_colon(line: &str) -> Option<String> {
        line.split_once(':').map(|(_, value)| value.trim().to_string())
    }
}
