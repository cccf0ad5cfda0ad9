use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{info, warn};

use super::{LlmProvider, LlmRequest};
use crate::error::{DraftError, LlmApiError};

/// Descriptions are cut to this many characters before going into the prompt.
const MAX_DESCRIPTION_CHARS: usize = 500;

pub const DEFAULT_SKILLS: &[&str] = &[
    "Python",
    "Flask",
    "Django",
    "Web Scraping",
    "Selenium",
    "Automation",
    "API Development",
    "Backend",
];

const QUICK_INTROS: &[&str] = &[
    "Hi! I'm a Python developer specializing in automation and web scraping.",
    "Hello! Python automation expert here, ready to solve your problem.",
    "Hi there! I build robust Python solutions for automation and data extraction.",
];

/// Turns a posting into a proposal draft. Best-effort: callers must cope with errors.
#[async_trait::async_trait]
pub trait ProposalDrafter: Send + Sync {
    async fn draft(&self, title: &str, description: &str) -> Result<String, DraftError>;
}

/// Drafter backed by any [`LlmProvider`].
pub struct LlmDrafter {
    provider: Arc<dyn LlmProvider>,
    skills: Vec<String>,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
}

impl LlmDrafter {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            skills: DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        if !skills.is_empty() {
            self.skills = skills;
        }
        self
    }

    pub fn with_generation(mut self, max_tokens: Option<usize>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl ProposalDrafter for LlmDrafter {
    async fn draft(&self, title: &str, description: &str) -> Result<String, DraftError> {
        let prompt = build_prompt(title, description, &self.skills);
        info!("Generating proposal for: {}", truncate_chars(title, 50));

        let response = self
            .provider
            .generate(LlmRequest {
                prompt,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                timeout_seconds: None,
            })
            .await
            .map_err(draft_error)?;

        let proposal = response.content.trim().to_string();
        if proposal.is_empty() {
            warn!(model = %response.model, "LLM returned an empty proposal");
            return Err(DraftError::Empty);
        }
        info!(
            model = %response.model,
            tokens = response.usage.total_tokens,
            "Proposal generated"
        );
        Ok(proposal)
    }
}

/// Rate limits and exhausted quotas get their own variant so the alert says so plainly.
fn draft_error(err: anyhow::Error) -> DraftError {
    match err.downcast_ref::<LlmApiError>() {
        Some(api) if api.is_quota() => DraftError::Quota(api.body.clone()),
        _ => DraftError::Api(err),
    }
}

pub fn build_prompt(title: &str, description: &str, skills: &[String]) -> String {
    let clean_description = truncate_chars(description, MAX_DESCRIPTION_CHARS);
    format!(
        r#"Act as a senior freelancer with 5+ years of experience.

Write a short, punchy, and professional proposal for this job:

JOB TITLE: {title}

JOB DESCRIPTION: {clean_description}

GUIDELINES:
- Start with understanding their problem
- Mention relevant skills: {skills}
- Keep it under 150 words
- Be confident but not arrogant
- End with a clear call to action
- Don't use generic templates
- Focus on solving THEIR specific problem

Write the proposal now:
"#,
        skills = skills.join(", "),
    )
}

/// Text placed in the alert when drafting failed and the fallback is a note.
pub fn failure_note(err: &DraftError) -> String {
    format!(
        "[AI Generation Failed: {}]\n\nPlease draft proposal manually for this job.\nSuggested opener: {}",
        err,
        quick_intro()
    )
}

pub fn quick_intro() -> &'static str {
    QUICK_INTROS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(QUICK_INTROS[0])
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
