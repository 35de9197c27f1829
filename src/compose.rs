//! Reply composition — subject, text, and HTML for one submission.
//!
//! Attempts LLM generation and falls back to a deterministic template, so
//! the caller always receives a usable reply. The only side effect is the
//! best-effort event trail.

use std::sync::Arc;

use serde::Serialize;

use crate::error::GenerateError;
use crate::events::EventLog;
use crate::llm::{GenerateRequest, ReplyGenerator};
use crate::queue::Job;
use crate::rules;
use crate::settings::Settings;

/// A fully composed reply, ready to hand to the mailer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub to_email: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Name of the matched section, if any.
    pub matched_section: Option<String>,
}

/// Builds replies from a settings snapshot and a job.
#[derive(Clone)]
pub struct ReplyComposer {
    generator: Arc<dyn ReplyGenerator>,
    events: EventLog,
}

impl ReplyComposer {
    pub fn new(generator: Arc<dyn ReplyGenerator>, events: EventLog) -> Self {
        Self { generator, events }
    }

    /// Compose the reply for a job. Never fails: generator errors and
    /// absence both fall back to the template.
    pub async fn build(&self, settings: &Settings, job: &Job) -> Reply {
        let name = match job.field("name") {
            "" => job.field("fullName"),
            name => name,
        };
        let to_email = job.field("email").to_string();
        let user_subject = job.field("subject");

        let subject = if settings.business_name.is_empty() {
            settings.subject.clone()
        } else {
            format!("{} - {}", settings.subject, settings.business_name)
        };

        let matched = rules::best_match(&settings.sections, user_subject, job.field("message"));
        if let Some(m) = matched {
            self.events
                .emit(
                    "section.matched",
                    serde_json::json!({ "name": m.section.name.as_str(), "score": m.score }),
                )
                .await;
        }

        let generated = self.try_generate(settings, job, name, matched.map(|m| m.section)).await;

        let mut body = match generated {
            Some(text) => clamp_sentences(&text, settings.max_sentences),
            None => {
                let intro = match settings.system_instructions.lines().next() {
                    Some(line) if !line.is_empty() => line,
                    _ => "We received your message and will get back to you shortly.",
                };
                let mut lines = vec![greeting(name), intro.to_string()];
                if !user_subject.is_empty() {
                    lines.push(format!("Re: {user_subject}"));
                }
                lines.join("\n")
            }
        };

        if !settings.signature.is_empty() {
            body.push_str("\n\n");
            body.push_str(&settings.signature);
        }

        Reply {
            to_email,
            subject,
            html: render_html(&body),
            text: body,
            matched_section: matched.map(|m| m.section.name.clone()),
        }
    }

    async fn try_generate(
        &self,
        settings: &Settings,
        job: &Job,
        name: &str,
        matched: Option<&crate::settings::Section>,
    ) -> Option<String> {
        let request = GenerateRequest {
            name: name.to_string(),
            email: job.field("email").to_string(),
            subject: job.field("subject").to_string(),
            message: job.field("message").to_string(),
            form_name: non_empty(job.field("formName")),
            page_url: non_empty(job.field("pageUrl")),
            tone: settings.tone.clone(),
            max_sentences: settings.max_sentences,
            business_instructions: settings.system_instructions.clone(),
            section_instructions: matched.map(|s| s.instructions.clone()),
        };

        self.events
            .emit(
                "ai.generate.request",
                serde_json::json!({
                    "model": self.generator.model_name(),
                    "section": matched.map(|s| s.name.as_str()),
                }),
            )
            .await;

        match self.generator.generate(&request).await {
            Ok(text) => {
                self.events
                    .emit(
                        "ai.generate.result",
                        serde_json::json!({
                            "usedAi": true,
                            "section": matched.map(|s| s.name.as_str()),
                        }),
                    )
                    .await;
                Some(text)
            }
            Err(GenerateError::Unconfigured) => {
                tracing::debug!("No generator configured, using template reply");
                None
            }
            Err(e) => {
                self.events
                    .emit("ai.generate.error", serde_json::json!({ "error": e.to_string() }))
                    .await;
                tracing::warn!(error = %e, "Reply generation failed, using template reply");
                None
            }
        }
    }
}

fn greeting(name: &str) -> String {
    if name.is_empty() {
        "Hi,".to_string()
    } else {
        format!("Hi {name},")
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Keep the first `max` sentences. Sentences end at `.`, `!` or `?`
/// followed by whitespace; `max == 0` disables clamping.
pub fn clamp_sentences(text: &str, max: usize) -> String {
    if max == 0 {
        return text.to_string();
    }
    let mut kept = 0;
    let mut end = text.len();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let next_is_space = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            // Runs like "?!" count once, at the last terminator
            let next_is_terminator = chars.peek().is_some_and(|(_, next)| matches!(next, '.' | '!' | '?'));
            if next_is_space && !next_is_terminator {
                kept += 1;
                if kept == max {
                    end = i + c.len_utf8();
                    break;
                }
            }
        }
    }
    text[..end].to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}

/// Minimal styled container around the escaped text body.
fn render_html(body: &str) -> String {
    let escaped = escape_html(body).replace('\n', "<br>\n");
    format!(
        "<div style=\"font-family:system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial, sans-serif; line-height:1.5; color:#eaeef2\">\n<p>{escaped}</p>\n</div>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerateError;
    use crate::llm::UnconfiguredGenerator;
    use crate::settings::Section;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct FixedGenerator {
        reply: String,
    }

    #[async_trait]
    impl ReplyGenerator for FixedGenerator {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _request: &GenerateRequest) -> Result<String, GenerateError> {
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ReplyGenerator for FailingGenerator {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn generate(&self, _request: &GenerateRequest) -> Result<String, GenerateError> {
            Err(GenerateError::RequestFailed {
                provider: "test".into(),
                reason: "boom".into(),
            })
        }
    }

    fn events() -> EventLog {
        EventLog::new(std::sync::Arc::new(MemoryStore::new()), "test:logs", 100)
    }

    fn job(form: serde_json::Value) -> Job {
        Job::new(form)
    }

    #[tokio::test]
    async fn fallback_is_deterministic_and_non_empty() {
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events());
        let settings = Settings::default();
        let job = job(serde_json::json!({
            "name": "Ada",
            "email": "ada@example.com",
            "subject": "Pricing",
            "message": "How much?",
        }));

        let first = composer.build(&settings, &job).await;
        let second = composer.build(&settings, &job).await;

        assert_eq!(first.text, second.text);
        assert_eq!(first.subject, "Thank you for reaching out");
        assert!(first.text.starts_with("Hi Ada,"));
        assert!(first.text.contains("We received your message"));
        assert!(first.text.contains("Re: Pricing"));
        assert_eq!(first.to_email, "ada@example.com");
    }

    #[tokio::test]
    async fn fallback_uses_first_instruction_line() {
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events());
        let mut settings = Settings::default();
        settings.system_instructions = "We answer within one business day.\nInternal note".into();
        let job = job(serde_json::json!({"email": "a@b.c", "message": "hi"}));

        let reply = composer.build(&settings, &job).await;
        assert!(reply.text.contains("We answer within one business day."));
        assert!(!reply.text.contains("Internal note"));
    }

    #[tokio::test]
    async fn generator_failure_falls_back_silently() {
        let composer = ReplyComposer::new(Arc::new(FailingGenerator), events());
        let settings = Settings::default();
        let job = job(serde_json::json!({"email": "a@b.c", "message": "hello"}));

        let reply = composer.build(&settings, &job).await;
        assert!(reply.text.contains("We received your message"));
    }

    #[tokio::test]
    async fn generated_text_is_clamped_and_signed() {
        let composer = ReplyComposer::new(
            Arc::new(FixedGenerator {
                reply: "One. Two. Three. Four.".into(),
            }),
            events(),
        );
        let mut settings = Settings::default();
        settings.max_sentences = 2;
        settings.signature = "The Shop".into();
        let job = job(serde_json::json!({"email": "a@b.c", "message": "hello"}));

        let reply = composer.build(&settings, &job).await;
        assert_eq!(reply.text, "One. Two.\n\nThe Shop");
    }

    #[tokio::test]
    async fn subject_gets_business_suffix() {
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events());
        let mut settings = Settings::default();
        settings.business_name = "Acme".into();
        let job = job(serde_json::json!({"email": "a@b.c"}));

        let reply = composer.build(&settings, &job).await;
        assert_eq!(reply.subject, "Thank you for reaching out - Acme");
    }

    #[tokio::test]
    async fn matched_section_instructions_reach_the_reply_metadata() {
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events());
        let mut settings = Settings::default();
        settings.sections = vec![Section {
            name: "Repairs".into(),
            keywords: vec!["repair".into()],
            instructions: "Point at the intake form".into(),
            priority: 0,
            enabled: true,
            delay_seconds: None,
        }];
        let job = job(serde_json::json!({"email": "a@b.c", "message": "repair my stuff"}));

        let reply = composer.build(&settings, &job).await;
        assert_eq!(reply.matched_section.as_deref(), Some("Repairs"));
    }

    #[tokio::test]
    async fn html_is_escaped_text_body() {
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events());
        let settings = Settings::default();
        let job = job(serde_json::json!({
            "email": "a@b.c",
            "name": "<script>",
            "subject": "a & b",
        }));

        let reply = composer.build(&settings, &job).await;
        assert!(reply.html.contains("&lt;script&gt;"));
        assert!(reply.html.contains("a &amp; b"));
        assert!(!reply.html.contains("<script>"));
    }

    #[tokio::test]
    async fn missing_name_uses_full_name_then_bare_greeting() {
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events());
        let settings = Settings::default();

        let with_full = composer
            .build(&settings, &job(serde_json::json!({"email": "a@b.c", "fullName": "Grace"})))
            .await;
        assert!(with_full.text.starts_with("Hi Grace,"));

        let without = composer
            .build(&settings, &job(serde_json::json!({"email": "a@b.c"})))
            .await;
        assert!(without.text.starts_with("Hi,"));
    }

    #[test]
    fn clamp_keeps_first_n_sentences() {
        assert_eq!(clamp_sentences("One. Two. Three.", 2), "One. Two.");
        assert_eq!(clamp_sentences("Only one here", 2), "Only one here");
        assert_eq!(clamp_sentences("A! B? C.", 1), "A!");
    }

    #[test]
    fn clamp_zero_disables() {
        assert_eq!(clamp_sentences("One. Two. Three.", 0), "One. Two. Three.");
    }

    #[test]
    fn clamp_handles_terminator_runs() {
        assert_eq!(clamp_sentences("Really?! Yes. No.", 1), "Really?!");
        assert_eq!(clamp_sentences("Wow... that works. Next.", 1), "Wow...");
    }

    #[test]
    fn clamp_trailing_terminator_counts() {
        assert_eq!(clamp_sentences("Done.", 1), "Done.");
    }
}
