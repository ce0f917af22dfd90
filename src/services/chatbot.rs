//! EcoSphere Assistant: prompt building, generation and the keyword
//! fallback used when no generator is configured or the provider fails.

use serde::Serialize;
use tokio::time::Instant;

use super::gemini::{GenerateOptions, TextGenerator};
use crate::models::{ChatbotConfig, UserRole};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the EcoSphere Assistant, an AI climate helper for the EcoSphere platform.
Your role is to help users understand climate change, reduce their carbon footprint, and navigate the platform.

Key capabilities:
- Answer questions about climate change and environmental science
- Provide personalized carbon reduction tips
- Guide users through the carbon calculator
- Explain EcoSphere features and challenges
- Share climate news and updates

Guidelines:
- Be encouraging and positive about environmental action
- Provide practical, actionable advice
- Use simple language that's accessible to everyone
- Always be accurate and cite sources when possible
- Focus on solutions rather than just problems";

/// Checked in order; the first keyword contained in the message wins.
const FALLBACK_RESPONSES: &[(&str, &str)] = &[
    (
        "carbon",
        "I can help you understand carbon footprints! Try using our carbon calculator to track your emissions across different categories like transportation and energy use.",
    ),
    (
        "calculator",
        "The carbon calculator helps you track emissions from electricity, water, gas, waste, and transportation. You can find it in the main navigation.",
    ),
    (
        "challenge",
        "Check out our challenges section to join community initiatives and earn points for sustainable actions!",
    ),
    (
        "news",
        "Visit our news section for the latest climate science and environmental updates, curated and summarized for easy reading.",
    ),
    (
        "help",
        "I'm here to help with climate questions, carbon reduction tips, and navigating EcoSphere. What would you like to know?",
    ),
];

const DEFAULT_RESPONSE: &str = "I'm the EcoSphere Assistant! I can help you with climate information, carbon reduction tips, and guide you through our platform features. How can I assist you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Gemini,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub tokens_used: i64,
    pub response_time: f64,
    pub source: ReplySource,
}

/// What the prompt may say about the caller.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub monthly_carbon_kg: f64,
    pub location: String,
    pub role: UserRole,
}

pub fn count_tokens(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

pub fn fallback_reply(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    FALLBACK_RESPONSES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, response)| *response)
        .unwrap_or(DEFAULT_RESPONSE)
}

/// System prompt from the active config (or the built-in one), with the
/// caller's context appended as the config allows.
pub fn build_system_prompt(config: Option<&ChatbotConfig>, ctx: &UserContext) -> String {
    let mut prompt = config
        .map(|c| c.system_prompt.clone())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let include_carbon = config.is_none_or(|c| c.include_carbon_data);
    let include_location = config.is_none_or(|c| c.include_location);

    if include_carbon && ctx.monthly_carbon_kg > 0.0 {
        prompt.push_str(&format!(
            "\n\nUser's current carbon footprint: {:.1} kg CO2",
            ctx.monthly_carbon_kg
        ));
    }
    if include_location && !ctx.location.is_empty() {
        prompt.push_str(&format!("\n\nUser's location: {}", ctx.location));
    }
    prompt.push_str(&format!("\n\nUser role: {}", ctx.role));
    prompt
}

/// Produce the assistant's reply. Never fails: provider errors are logged
/// and answered from the keyword table.
pub async fn generate_reply(
    generator: Option<&dyn TextGenerator>,
    config: Option<&ChatbotConfig>,
    ctx: &UserContext,
    message: &str,
) -> ChatReply {
    let started = Instant::now();
    if let Some(generator) = generator {
        let prompt = format!("{}\n\nUser: {}", build_system_prompt(config, ctx), message);
        let options = GenerateOptions {
            max_tokens: config.map(|c| c.max_tokens),
            temperature: config.map(|c| c.temperature),
        };
        match generator.generate(&prompt, options).await {
            Ok(content) => {
                return ChatReply {
                    tokens_used: count_tokens(&content),
                    content,
                    response_time: started.elapsed().as_secs_f64(),
                    source: ReplySource::Gemini,
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "chatbot generation failed, using fallback");
            }
        }
    }
    let content = fallback_reply(message).to_string();
    ChatReply {
        tokens_used: count_tokens(&content),
        content,
        response_time: started.elapsed().as_secs_f64(),
        source: ReplySource::Fallback,
    }
}

/// Session title: the first 50 characters of the opening message.
pub fn session_title(message: &str) -> String {
    message.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str, _options: GenerateOptions) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(&self, _prompt: &str, _options: GenerateOptions) -> Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<(String, GenerateOptions)>>);

    #[async_trait]
    impl TextGenerator for Recording {
        async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
            self.0.lock().unwrap().push((prompt.to_string(), options));
            Ok("ok".into())
        }
    }

    fn ctx() -> UserContext {
        UserContext {
            monthly_carbon_kg: 123.45,
            location: "Berlin, DE".into(),
            role: UserRole::Individual,
        }
    }

    #[test]
    fn test_fallback_keyword_order() {
        assert!(fallback_reply("How is my CARBON?").starts_with("I can help you understand"));
        // "carbon" outranks "calculator" when both appear.
        assert!(fallback_reply("carbon calculator").starts_with("I can help you understand"));
        assert!(fallback_reply("where is the calculator").starts_with("The carbon calculator"));
        assert!(fallback_reply("any news?").starts_with("Visit our news section"));
        assert_eq!(fallback_reply("hello there"), DEFAULT_RESPONSE);
    }

    #[test]
    fn test_token_count_is_word_count() {
        assert_eq!(count_tokens("one two  three\nfour"), 4);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_system_prompt_includes_context() {
        let prompt = build_system_prompt(None, &ctx());
        assert!(prompt.starts_with("You are the EcoSphere Assistant"));
        assert!(prompt.contains("123.5 kg CO2"));
        assert!(prompt.contains("User's location: Berlin, DE"));
        assert!(prompt.contains("User role: INDIVIDUAL"));
    }

    #[test]
    fn test_system_prompt_respects_config_flags() {
        let config = ChatbotConfig {
            id: 1,
            name: "default".into(),
            system_prompt: "Be brief.".into(),
            max_tokens: 200,
            temperature: 0.2,
            include_carbon_data: false,
            include_location: false,
            include_news: true,
            is_active: true,
        };
        let prompt = build_system_prompt(Some(&config), &ctx());
        assert!(prompt.starts_with("Be brief."));
        assert!(!prompt.contains("kg CO2"));
        assert!(!prompt.contains("Berlin"));
    }

    #[tokio::test]
    async fn test_generate_reply_sources() {
        let reply = generate_reply(None, None, &ctx(), "help me").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.tokens_used, count_tokens(&reply.content));

        let canned = Canned("Take the train.");
        let reply = generate_reply(Some(&canned), None, &ctx(), "travel?").await;
        assert_eq!(reply.source, ReplySource::Gemini);
        assert_eq!(reply.content, "Take the train.");
        assert_eq!(reply.tokens_used, 3);

        let reply = generate_reply(Some(&Failing), None, &ctx(), "news please").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert!(reply.content.starts_with("Visit our news section"));
    }

    #[tokio::test]
    async fn test_generate_reply_passes_prompt_and_options() {
        let recording = Recording::default();
        let config = ChatbotConfig {
            id: 1,
            name: "default".into(),
            system_prompt: "SYS".into(),
            max_tokens: 300,
            temperature: 0.4,
            include_carbon_data: true,
            include_location: true,
            include_news: true,
            is_active: true,
        };
        generate_reply(Some(&recording), Some(&config), &ctx(), "hi").await;
        let calls = recording.0.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.starts_with("SYS"));
        assert!(calls[0].0.ends_with("User: hi"));
        assert_eq!(calls[0].1.max_tokens, Some(300));
        assert_eq!(calls[0].1.temperature, Some(0.4));
    }

    #[test]
    fn test_session_title_truncates_by_chars() {
        let long = "é".repeat(80);
        assert_eq!(session_title(&long).chars().count(), 50);
        assert_eq!(session_title("short"), "short");
    }
}
