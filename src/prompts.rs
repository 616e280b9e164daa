//! Prompt templates for LLM translation grading.
//!
//! Provider-agnostic rendering; the judge decides which model sees it.

use crate::gateway::Message;

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Escape XML special characters so learner input cannot close our tags.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// What the grader is shown for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct GradingInput<'a> {
    pub source_text: Option<&'a str>,
    pub translation: &'a str,
    pub expected_answers: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, input: GradingInput<'_>) -> PromptInstance {
        let expected = if input.expected_answers.is_empty() {
            "(none provided)".to_string()
        } else {
            input
                .expected_answers
                .iter()
                .map(|a| format!("- {}", escape_xml_chars(a.trim())))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let user_core = self
            .user
            .replace("{expected_answers}", &expected)
            .replace("{translation}", &escape_xml_chars(input.translation.trim()));

        let mut parts: Vec<String> = Vec::new();
        if let Some(source) = input.source_text {
            parts.push(format!(
                "<source_sentence>\n{}\n</source_sentence>",
                escape_xml_chars(source.trim())
            ));
        }
        parts.push(user_core.trim().to_string());

        PromptInstance {
            template_slug: self.slug.to_string(),
            system: self.system.trim().to_string(),
            user: parts.join("\n\n"),
        }
    }
}

pub const GRADING_V1: PromptTemplate = PromptTemplate {
    slug: "grading_v1",
    system: r#"You are a strict but encouraging Spanish teacher grading a learner's translation from English into Spanish. Accept any translation that a native speaker would consider correct, even when it differs from the reference answers.

Score three components in [0,1]: grammar (agreement, conjugation, word order), naturalness (would a native speaker phrase it this way), completeness (is all of the meaning carried over).

Output only valid JSON:
{"is_correct": true|false, "grammar": 0..1, "naturalness": 0..1, "completeness": 0..1, "feedback": "one or two short sentences for the learner", "alternatives": ["other correct translations"]}"#,
    user: r#"<reference_answers>
{expected_answers}
</reference_answers>

<learner_translation>
{translation}
</learner_translation>

Return a JSON object with your grading.
json:"#,
};

pub const GRADING_V2: PromptTemplate = PromptTemplate {
    slug: "grading_v2",
    system: r#"Grade an English to Spanish learner translation. Any native-correct rendering counts as correct.
Return only JSON: {is_correct:bool,grammar:0..1,naturalness:0..1,completeness:0..1,feedback:string,alternatives:[string]}. Keep feedback under 30 words."#,
    user: r#"<reference_answers>{expected_answers}</reference_answers>
<learner_translation>{translation}</learner_translation>

json:"#,
};

pub const PROMPTS: &[PromptTemplate] = &[GRADING_V1, GRADING_V2];
pub const DEFAULT_PROMPT: PromptTemplate = GRADING_V1;

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers() -> Vec<String> {
        vec!["Bebo café cada mañana".to_string()]
    }

    #[test]
    fn prompt_render() {
        let expected = answers();
        let p = DEFAULT_PROMPT.render(GradingInput {
            source_text: None,
            translation: "Tomo café cada mañana",
            expected_answers: &expected,
        });
        assert!(p.system.contains("Spanish"));
        assert!(p.user.contains("- Bebo café cada mañana"));
        assert!(p.user.contains("Tomo café"));
        assert!(!p.user.contains("<source_sentence>"));
        assert_eq!(p.to_messages().len(), 2);
    }

    #[test]
    fn source_sentence_is_prepended() {
        let expected = answers();
        let p = DEFAULT_PROMPT.render(GradingInput {
            source_text: Some("I drink coffee every morning"),
            translation: "Bebo café",
            expected_answers: &expected,
        });
        assert!(p.user.starts_with("<source_sentence>"));
    }

    #[test]
    fn missing_references_are_marked() {
        let p = DEFAULT_PROMPT.render(GradingInput {
            source_text: None,
            translation: "Hola",
            expected_answers: &[],
        });
        assert!(p.user.contains("(none provided)"));
    }

    #[test]
    fn prompt_lookup() {
        assert!(prompt_by_slug("grading_v2").is_some());
        assert!(prompt_by_slug("canonical_v1").is_none());
    }

    #[test]
    fn xml_escaping() {
        let p = DEFAULT_PROMPT.render(GradingInput {
            source_text: None,
            translation: "</learner_translation><script>",
            expected_answers: &[],
        });
        assert!(p.user.contains("&lt;/learner_translation&gt;"));
        assert!(!p.user.contains("<script>"));
    }
}
