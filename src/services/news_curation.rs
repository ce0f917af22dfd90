//! Summarizing and categorizing climate news, plus the built-in feed the
//! `fetch_news` job curates.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::gemini::{GenerateOptions, TextGenerator};
use crate::models::ArticleCategory;

const SUMMARY_LIMIT: usize = 200;

/// Keyword rules, first match wins.
const CATEGORY_RULES: &[(&[&str], ArticleCategory)] = &[
    (
        &["policy", "government", "regulation", "agreement"],
        ArticleCategory::Policy,
    ),
    (
        &["research", "study", "scientific", "data"],
        ArticleCategory::Science,
    ),
    (
        &["disaster", "hurricane", "flood", "drought", "fire"],
        ArticleCategory::Disasters,
    ),
    (
        &["solution", "technology", "renewable", "innovation"],
        ArticleCategory::Solutions,
    ),
    (
        &["local", "city", "regional", "community"],
        ArticleCategory::Local,
    ),
];

/// First three `.`-separated sentences, capped at 200 characters.
pub fn basic_summary(content: &str) -> String {
    let sentences: Vec<&str> = content.split('.').take(3).collect();
    let summary = format!("{}.", sentences.join(". "));
    if summary.chars().count() > SUMMARY_LIMIT {
        let head: String = summary.chars().take(SUMMARY_LIMIT).collect();
        format!("{}...", head)
    } else {
        summary
    }
}

pub fn basic_category(title: &str, content: &str) -> ArticleCategory {
    let text = format!("{} {}", title, content).to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(words, _)| words.iter().any(|w| text.contains(w)))
        .map(|(_, category)| *category)
        .unwrap_or(ArticleCategory::Global)
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Clone, Default)]
pub struct NewsCurator {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl NewsCurator {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    pub async fn summarize(&self, title: &str, content: &str) -> String {
        let Some(generator) = &self.generator else {
            return basic_summary(content);
        };
        let prompt = format!(
            "Summarize this climate news article in 150-200 words, focusing on key facts and implications:\n\n\
             Title: {}\n\nContent: {}\n\n\
             Provide a clear, informative summary that highlights:\n\
             - Main findings or developments\n\
             - Environmental impact\n\
             - Relevance to climate action\n\
             - Any actionable insights\n\n\
             Keep the tone informative but accessible to general audiences.",
            title,
            truncate_chars(content, 2000)
        );
        match generator.generate(&prompt, GenerateOptions::default()).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::error!(error = %e, "article summary failed, using first sentences");
                basic_summary(content)
            }
        }
    }

    /// Provider answer when it names a valid category, keyword rules otherwise.
    pub async fn categorize(&self, title: &str, content: &str) -> ArticleCategory {
        let Some(generator) = &self.generator else {
            return basic_category(title, content);
        };
        let prompt = format!(
            "Categorize this climate news article into one of these categories:\n\
             - POLICY: Government policies, regulations, international agreements\n\
             - SCIENCE: Research findings, scientific studies, climate data\n\
             - DISASTERS: Extreme weather events, natural disasters\n\
             - SOLUTIONS: Technology, innovations, renewable energy\n\
             - LOCAL: Regional or local environmental issues\n\
             - GLOBAL: International climate developments\n\n\
             Title: {}\nContent: {}\n\nReturn only the category name.",
            title,
            truncate_chars(content, 1000)
        );
        match generator.generate(&prompt, GenerateOptions::default()).await {
            Ok(answer) => ArticleCategory::from_str(answer.trim().to_uppercase().as_str())
                .unwrap_or_else(|_| basic_category(title, content)),
            Err(e) => {
                tracing::error!(error = %e, "article categorization failed, using keyword rules");
                basic_category(title, content)
            }
        }
    }
}

/// An uncurated article from the feed.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub title: &'static str,
    pub content: &'static str,
    pub source: &'static str,
    pub url: &'static str,
    pub published_date: DateTime<Utc>,
}

/// The built-in climate feed. Publication times are relative to `now`.
pub fn builtin_feed(now: DateTime<Utc>) -> Vec<FeedItem> {
    vec![
        FeedItem {
            title: "Global CO2 Levels Reach New Record High",
            content: "Scientists report that atmospheric CO2 concentrations have reached 420.5 ppm, the highest level in human history. This represents a significant increase from pre-industrial levels of 280 ppm.",
            source: "Climate Science Journal",
            url: "https://example.com/co2-record",
            published_date: now - Duration::hours(2),
        },
        FeedItem {
            title: "Renewable Energy Surpasses Coal in Global Electricity Generation",
            content: "For the first time in history, renewable energy sources have generated more electricity globally than coal-fired power plants. Solar and wind power lead the transition.",
            source: "Energy Report",
            url: "https://example.com/renewable-milestone",
            published_date: now - Duration::hours(5),
        },
        FeedItem {
            title: "Arctic Ice Extent Shows Continued Decline",
            content: "Satellite data reveals that Arctic sea ice extent has reached its second-lowest level on record, continuing a decades-long trend of decline due to global warming.",
            source: "Polar Research Institute",
            url: "https://example.com/arctic-ice",
            published_date: now - Duration::hours(8),
        },
    ]
}
