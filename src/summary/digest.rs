//! Transcript building and digest extraction for summaries.

use serde_json::Value;

use super::types::StructuredDigest;
use crate::session::{Message, Role, Turn};
use crate::utils::string::{head, tail};

/// Instructions for the summarization model.
pub const SUMMARIZER_PROMPT: &str = "بازنویسی مختصر و رسمی مکالمهٔ پزشکی فارسی. سپس استخراج ساختاریافته:\n\
- history: سابقه و شرح حال\n\
- symptoms: علائم\n\
- medications: داروها/دوز\n\
- recommendations: توصیه‌ها\n\
خروجی دقیق و کوتاه باشد.";

const HISTORY_KEYWORDS: &[&str] = &["سابقه", "تاریخچه", "شرح حال"];
const MEDICATION_KEYWORDS: &[&str] = &["دارو", "mg", "میلی‌گرم", "قرص", "دوز"];
const SYMPTOM_KEYWORDS: &[&str] = &["درد", "تب", "سرفه", "تنگی نفس", "تهوع", "خستگی"];
const RECOMMENDATION_KEYWORDS: &[&str] = &["پیشنهاد", "توصیه", "پیگیری", "درمان"];

/// Flatten turns to `[YYYY-MM-DD HH:MM] USER: ...` / `BOT : ...` lines.
///
/// Turns without text (image-only) are skipped.
pub fn serialize_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .filter_map(|turn| {
            let text = turn.content.text();
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            let speaker = match turn.role {
                Role::User => "USER",
                _ => "BOT ",
            };
            Some(format!(
                "[{}] {}: {}",
                turn.created_at.format("%Y-%m-%d %H:%M"),
                speaker,
                text
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the most recent `max_chars` characters of a transcript.
pub fn clip_transcript(transcript: &str, max_chars: usize) -> String {
    tail(transcript, max_chars).to_string()
}

/// Clip model output to `max_chars`, keeping the beginning.
pub fn clip_digest(text: &str, max_chars: usize) -> String {
    head(text.trim(), max_chars).to_string()
}

/// Prompt sent to the summarization model.
pub fn summarizer_messages(transcript: &str) -> Vec<Message> {
    vec![
        Message::system(SUMMARIZER_PROMPT),
        Message::user(format!("متن مکالمات:\n{}", transcript)),
    ]
}

/// Bucket lines by medical keywords. A line may land in several buckets.
pub fn keyword_buckets(text: &str) -> StructuredDigest {
    let mut history = Vec::new();
    let mut symptoms = Vec::new();
    let mut medications = Vec::new();
    let mut recommendations = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let has = |keywords: &[&str]| keywords.iter().any(|k| line.contains(k));
        if has(HISTORY_KEYWORDS) {
            history.push(line);
        }
        if has(MEDICATION_KEYWORDS) {
            medications.push(line);
        }
        if has(SYMPTOM_KEYWORDS) {
            symptoms.push(line);
        }
        if has(RECOMMENDATION_KEYWORDS) {
            recommendations.push(line);
        }
    }

    StructuredDigest {
        history: history.join("\n"),
        symptoms: symptoms.join("\n"),
        medications: medications.join("\n"),
        recommendations: recommendations.join("\n"),
    }
}

/// Read a JSON object with the four digest keys out of model output.
///
/// Accepts a bare object or one inside a fenced code block; values may be
/// strings or arrays of strings. Returns `None` when no key is present.
pub fn parse_structured(text: &str) -> Option<StructuredDigest> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let obj = value.as_object()?;

    let field = |key: &str| -> Option<String> {
        match obj.get(key)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => None,
        }
    };

    let digest = StructuredDigest {
        history: field("history").unwrap_or_default(),
        symptoms: field("symptoms").unwrap_or_default(),
        medications: field("medications").unwrap_or_default(),
        recommendations: field("recommendations").unwrap_or_default(),
    };
    (!digest.is_empty()).then_some(digest)
}

/// Structured digest of model output: parsed JSON when present, else keyword buckets.
pub fn extract_structured(text: &str) -> StructuredDigest {
    parse_structured(text).unwrap_or_else(|| keyword_buckets(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Content;
    use chrono::{TimeZone, Utc};

    fn turn(id: u64, role: Role, text: &str) -> Turn {
        Turn {
            id,
            conversation_id: 1,
            user_id: 1,
            role,
            content: Content::from(text),
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap(),
        }
    }

    #[test]
    fn test_transcript_format() {
        let transcript = serialize_transcript(&[
            turn(1, Role::User, "تب دارم"),
            turn(2, Role::Assistant, "چند روز است؟"),
            turn(3, Role::User, "   "),
        ]);
        assert_eq!(
            transcript,
            "[2024-03-05 14:07] USER: تب دارم\n[2024-03-05 14:07] BOT : چند روز است؟"
        );
    }

    #[test]
    fn test_clip_keeps_latest() {
        assert_eq!(clip_transcript("قدیمی جدید", 4), "جدید");
        assert_eq!(clip_digest("  ابتدا انتها", 5), "ابتدا");
    }

    #[test]
    fn test_keyword_buckets() {
        let digest = keyword_buckets(
            "سابقه آسم دارد\nتب و سرفه از دیروز\nقرص استامینوفن 500 mg\nتوصیه به استراحت و پیگیری",
        );
        assert_eq!(digest.history, "سابقه آسم دارد");
        assert_eq!(digest.symptoms, "تب و سرفه از دیروز");
        assert_eq!(digest.medications, "قرص استامینوفن 500 mg");
        assert_eq!(digest.recommendations, "توصیه به استراحت و پیگیری");
    }

    #[test]
    fn test_line_in_several_buckets() {
        let digest = keyword_buckets("درمان با قرص سرماخوردگی برای تب");
        assert!(!digest.symptoms.is_empty());
        assert!(!digest.medications.is_empty());
        assert!(!digest.recommendations.is_empty());
        assert!(digest.history.is_empty());
    }

    #[test]
    fn test_parse_structured_json_in_fence() {
        let text = "خلاصه:\n```json\n{\"history\": \"دیابت\", \"symptoms\": [\"تب\", \"سرفه\"]}\n```";
        let digest = parse_structured(text).unwrap();
        assert_eq!(digest.history, "دیابت");
        assert_eq!(digest.symptoms, "تب\nسرفه");
        assert!(digest.medications.is_empty());
    }

    #[test]
    fn test_extract_structured_falls_back() {
        assert!(parse_structured("بدون ساختار {نامعتبر}").is_none());
        let digest = extract_structured("بیمار تب دارد");
        assert_eq!(digest.symptoms, "بیمار تب دارد");
    }

    #[test]
    fn test_summarizer_messages() {
        let messages = summarizer_messages("[x] USER: سلام");
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content.text(), "متن مکالمات:\n[x] USER: سلام");
    }
}
