//! Cleanup of model output
//!
//! Small models wrap math in LaTeX and wrap JSON in prose or code
//! fences; these helpers normalize both before anything reaches a
//! student or the database.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};

static FRAC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\d?frac\{([^{}]+)\}\{([^{}]+)\}").expect("frac regex"));
static DELIMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\(|\\\)|\\\[|\\\]|\\left|\\right|\$+").expect("delims regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("ws regex"));

/// Rewrite common LaTeX constructs into plain text
pub fn clean_latex(text: &str) -> String {
    let out = FRAC.replace_all(text, "$1/$2");
    let out = DELIMS.replace_all(&out, "");
    let out = out
        .replace(r"\times", "x")
        .replace(r"\div", "÷")
        .replace(r"\cdot", "*")
        .replace(r"\,", " ");
    WHITESPACE.replace_all(&out, " ").trim().to_string()
}

/// Slice out the first top-level JSON object in the response, dropping
/// any surrounding prose or code fences
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Drop the backslash from escapes JSON does not define (`\x` for any
/// `x` outside `"\/bfnrtu`), which small models emit when they mix
/// LaTeX into string values
fn repair_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if "\"\\/bfnrtu".contains(next) => {
                    out.push(c);
                }
                Some(_) => {
                    // swallow the stray backslash
                }
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a model response into `T`, tolerating prose around the object
/// and invalid string escapes inside it
pub fn parse_json_lenient<T: serde::de::DeserializeOwned>(response: &str) -> Result<T> {
    let object = extract_json_object(response)
        .ok_or_else(|| Error::Generator(format!("no JSON object in response: {response:.120}")))?;
    match serde_json::from_str(object) {
        Ok(value) => Ok(value),
        Err(first_err) => serde_json::from_str(&repair_escapes(object))
            .map_err(|_| Error::Generator(format!("unparseable response: {first_err}"))),
    }
}

/// Accept an answer as a JSON string or number, normalizing to text
pub fn answer_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let s = clean_latex(&s);
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
