//! Text search analysis
//!
//! Pipeline: UAX#29 word boundaries → strip possessives → keep alphanumerics
//!           → lowercase (unless case sensitive) → drop stop words → stem
//!
//! Stemming is a light English suffix stripper: plural, `-ing`, `-ed` and
//! `-ly` endings. It is deliberately conservative so that the same word
//! always maps to the same stem in documents and queries.

use unicode_segmentation::UnicodeSegmentation;

use crate::errors::{AggError, AggResult};
use crate::value::Value;

/// English stop words
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Analysis language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextLanguage {
    /// Stop words and stemming
    English,
    /// Tokenization only
    None,
}

impl TextLanguage {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "english" | "en" => Some(TextLanguage::English),
            "none" => Some(TextLanguage::None),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextLanguage::English => "english",
            TextLanguage::None => "none",
        }
    }
}

fn strip_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("\u{2019}s"))
        .unwrap_or(word)
}

/// Tokenize `text` into index terms
pub fn tokenize(text: &str, language: TextLanguage, case_sensitive: bool) -> Vec<String> {
    text.unicode_words()
        .map(strip_possessive)
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .map(|w| if case_sensitive { w } else { w.to_lowercase() })
        .filter(|w| match language {
            TextLanguage::English => !STOPWORDS.contains(&w.to_lowercase().as_str()),
            TextLanguage::None => true,
        })
        .map(|w| match language {
            TextLanguage::English => stem(&w),
            TextLanguage::None => w,
        })
        .collect()
}

/// Light English stemmer
pub fn stem(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    let len = chars.len();
    let ends = |suffix: &str| word.ends_with(suffix);
    let cut = |n: usize| chars[..len - n].iter().collect::<String>();

    if len > 4 && ends("sses") {
        return cut(2);
    }
    if len > 4 && ends("ies") {
        return cut(3) + "y";
    }
    if len > 5 && ends("ing") {
        return undouble(cut(3));
    }
    if len > 4 && ends("ed") && !ends("eed") {
        return undouble(cut(2));
    }
    if len > 4 && ends("ly") {
        return cut(2);
    }
    if len > 3 && ends("s") && !ends("ss") && !ends("us") && !ends("is") {
        return cut(1);
    }
    word.to_string()
}

// "running" -> "runn" -> "run"
fn undouble(stem: String) -> String {
    let chars: Vec<char> = stem.chars().collect();
    let n = chars.len();
    if n >= 2 && chars[n - 1] == chars[n - 2] && !matches!(chars[n - 1], 'l' | 's' | 'z') {
        chars[..n - 1].iter().collect()
    } else {
        stem
    }
}

/// A parsed `$text` operator
#[derive(Debug, Clone, PartialEq)]
pub struct TextQuery {
    pub search: String,
    pub language: Option<TextLanguage>,
    pub case_sensitive: bool,
}

impl TextQuery {
    /// Parse `{$search, $language, $caseSensitive, $diacriticSensitive}`
    pub fn parse(value: &Value) -> AggResult<Self> {
        let doc = value
            .as_document()
            .ok_or_else(|| AggError::invalid_stage("$text expects an object"))?;
        let mut search = None;
        let mut language = None;
        let mut case_sensitive = false;
        for (key, v) in doc.iter() {
            match key.as_str() {
                "$search" => {
                    search = Some(
                        v.as_str()
                            .ok_or_else(|| AggError::invalid_stage("$search must be a string"))?
                            .to_string(),
                    )
                }
                "$language" => {
                    let name = v
                        .as_str()
                        .ok_or_else(|| AggError::invalid_stage("$language must be a string"))?;
                    language = Some(TextLanguage::parse(name).ok_or_else(|| {
                        AggError::invalid_stage(format!("unsupported $language '{}'", name))
                    })?);
                }
                "$caseSensitive" => {
                    case_sensitive = v
                        .as_bool()
                        .ok_or_else(|| AggError::invalid_stage("$caseSensitive must be a bool"))?
                }
                "$diacriticSensitive" => {
                    v.as_bool().ok_or_else(|| {
                        AggError::invalid_stage("$diacriticSensitive must be a bool")
                    })?;
                }
                other => {
                    return Err(AggError::invalid_stage(format!(
                        "unknown $text parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(Self {
            search: search.ok_or_else(|| AggError::invalid_stage("$text requires $search"))?,
            language,
            case_sensitive,
        })
    }
}

/// Search string split into terms, exact phrases and negated terms
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSearch {
    /// Positive terms, including the terms of every phrase
    pub terms: Vec<String>,
    /// Raw phrases that must appear verbatim
    pub phrases: Vec<String>,
    /// Terms that exclude a document
    pub negated: Vec<String>,
}

impl ParsedSearch {
    pub fn parse(search: &str, language: TextLanguage, case_sensitive: bool) -> Self {
        let mut parsed = ParsedSearch::default();
        let mut loose = String::new();

        let mut inside = false;
        for part in search.split('"') {
            if inside {
                let phrase = part.trim();
                if !phrase.is_empty() {
                    parsed.phrases.push(phrase.to_string());
                    parsed.terms.extend(tokenize(phrase, language, case_sensitive));
                }
            } else {
                loose.push(' ');
                loose.push_str(part);
            }
            inside = !inside;
        }

        for word in loose.split_whitespace() {
            match word.strip_prefix('-') {
                Some(rest) if !rest.is_empty() => parsed
                    .negated
                    .extend(tokenize(rest, language, case_sensitive)),
                _ => parsed
                    .terms
                    .extend(tokenize(word, language, case_sensitive)),
            }
        }

        parsed.terms.sort();
        parsed.terms.dedup();
        parsed.negated.sort();
        parsed.negated.dedup();
        parsed
    }
}
