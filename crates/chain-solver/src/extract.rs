//! Question and submission-endpoint extraction from page text.
//!
//! Pages may hide their real content behind an `atob(`...`)` call whose
//! backtick-quoted argument is base64. When present, the decoded text is what
//! gets searched.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

use crate::config::{ConfigError, ExtractorConfig};
use crate::types::{ExtractedTask, PageSnapshot};

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Characters trimmed off the end of an endpoint URL found in prose.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', ')', ']', '}'];

fn hidden_payload_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"atob\(\s*`([^`]+)`\s*\)").expect("valid regex"))
}

fn submit_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s"'<>]+/submit[^\s"'<>]*"#).expect("valid regex")
    })
}

/// Decode the first hidden payload in `text`, if any.
///
/// Payloads that are not valid base64 or not UTF-8 are ignored.
pub fn decode_hidden_payload(text: &str) -> Option<String> {
    let caps = hidden_payload_re().captures(text)?;
    let encoded: String = caps[1].chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = match LENIENT_BASE64.decode(encoded.as_bytes()) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("hidden payload is not valid base64: {e}");
            return None;
        }
    };

    match String::from_utf8(bytes) {
        Ok(decoded) => Some(decoded),
        Err(_) => {
            tracing::warn!("hidden payload did not decode to UTF-8 text");
            None
        }
    }
}

/// Wrap `plaintext` in the hidden-payload marker.
pub fn encode_hidden_payload(plaintext: &str) -> String {
    format!("atob(`{}`)", LENIENT_BASE64.encode(plaintext.as_bytes()))
}

/// First absolute URL containing a `/submit` path segment.
pub fn find_submit_url(text: &str) -> Option<String> {
    submit_url_re()
        .find(text)
        .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string())
}

/// Derives an [`ExtractedTask`] from a page.
#[derive(Debug, Clone)]
pub struct Extractor {
    question_re: Regex,
    default_question: String,
}

impl Extractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ConfigError> {
        let (min, max) = (config.min_question_len, config.max_question_len);
        if min < 2 || max < min {
            return Err(ConfigError::InvalidQuestionBounds { min, max });
        }

        // Capital letter, then no '.' or '?', then '?'; length counted in chars.
        let pattern = format!(r"[A-Z][^?.]{{{},{}}}\?", min - 2, max - 2);
        let question_re = RegexBuilder::new(&pattern)
            .size_limit(64 << 20)
            .build()
            .map_err(|e| ConfigError::Pattern(e.to_string()))?;

        Ok(Self {
            question_re,
            default_question: config.default_question.clone(),
        })
    }

    /// The first question-shaped substring, or the default question.
    pub fn question(&self, text: &str) -> String {
        self.question_re
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| self.default_question.clone())
    }

    /// Extract the task from a snapshot. `None` means the page has no
    /// submission endpoint.
    pub fn extract(&self, snapshot: &PageSnapshot) -> Option<ExtractedTask> {
        let text = snapshot.effective_text();
        let submit_url = find_submit_url(text)?;
        Some(ExtractedTask {
            question: self.question(text),
            submit_url,
        })
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(&ExtractorConfig::default()).expect("default bounds are valid")
    }
}
