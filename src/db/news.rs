use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::errors::EcoError;
use crate::models::*;

const ARTICLE_COLUMNS: &str = "n.id, n.title, n.content, n.summary, n.url, n.source, n.author, \
     n.category, n.published_date, n.image_url, n.view_count, n.bookmark_count, n.is_featured, \
     n.is_trending, n.created_at";

/// Reads an article starting at column `base`.
fn article_at(row: &Row<'_>, base: usize) -> rusqlite::Result<NewsArticle> {
    Ok(NewsArticle {
        id: row.get(base)?,
        title: row.get(base + 1)?,
        content: row.get(base + 2)?,
        summary: row.get(base + 3)?,
        url: row.get(base + 4)?,
        source: row.get(base + 5)?,
        author: row.get(base + 6)?,
        category: parse_enum(base + 7, row.get(base + 7)?)?,
        published_date: row.get(base + 8)?,
        image_url: row.get(base + 9)?,
        view_count: row.get(base + 10)?,
        bookmark_count: row.get(base + 11)?,
        is_featured: row.get(base + 12)?,
        is_trending: row.get(base + 13)?,
        created_at: row.get(base + 14)?,
        is_bookmarked: None,
    })
}

fn row_to_topic(row: &Row<'_>) -> rusqlite::Result<TrendingTopic> {
    Ok(TrendingTopic {
        id: row.get(0)?,
        topic: row.get(1)?,
        search_count: row.get(2)?,
        trend_score: row.get(3)?,
        date: row.get(4)?,
    })
}

impl EcoDb {
    // ── Articles ──────────────────────────────────────────────────────

    pub fn create_article(&self, article: &NewArticle) -> Result<NewsArticle> {
        self.conn
            .execute(
                "INSERT INTO news_articles
                    (title, content, summary, url, source, author, category, published_date,
                     image_url, is_featured)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    article.title,
                    article.content,
                    article.summary,
                    article.url,
                    article.source,
                    article.author,
                    article.category.as_str(),
                    article.published_date,
                    article.image_url,
                    article.is_featured,
                ],
            )
            .context("Failed to insert article")?;
        let id = self.conn.last_insert_rowid();
        self.get_article(id, None)?
            .context("Article not found after insert")
    }

    pub fn article_url_exists(&self, url: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM news_articles WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .context("Failed to check article url")?;
        Ok(count > 0)
    }

    /// Fetch an article. With a viewer, `is_bookmarked` is filled in.
    pub fn get_article(&self, id: i64, viewer: Option<i64>) -> Result<Option<NewsArticle>> {
        let article = self
            .conn
            .query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM news_articles n WHERE n.id = ?1"),
                params![id],
                |row| article_at(row, 0),
            )
            .optional()
            .context("Failed to query article")?;
        match (article, viewer) {
            (Some(mut article), Some(user_id)) => {
                article.is_bookmarked = Some(self.is_bookmarked(user_id, id)?);
                Ok(Some(article))
            }
            (article, _) => Ok(article),
        }
    }

    /// Count a view and return the refreshed article.
    pub fn view_article(&self, id: i64, viewer: i64) -> Result<Option<NewsArticle>> {
        self.conn
            .execute(
                "UPDATE news_articles SET view_count = view_count + 1 WHERE id = ?1",
                params![id],
            )
            .context("Failed to count article view")?;
        self.get_article(id, Some(viewer))
    }

    pub fn list_articles(
        &self,
        category: Option<ArticleCategory>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NewsArticle>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM news_articles n
                 WHERE ?1 IS NULL OR n.category = ?1
                 ORDER BY n.published_date DESC, n.id DESC
                 LIMIT ?2 OFFSET ?3"
            ))
            .context("Failed to prepare list_articles")?;
        let rows = stmt
            .query_map(params![category.map(|c| c.as_str()), limit, offset], |row| {
                article_at(row, 0)
            })
            .context("Failed to query articles")?;
        collect(rows, "article")
    }

    /// Up to ten articles published on or after `since`, newest first.
    pub fn news_digest(&self, since: &str) -> Result<Vec<NewsArticle>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM news_articles n
                 WHERE n.published_date >= ?1
                 ORDER BY n.published_date DESC, n.id DESC LIMIT 10"
            ))
            .context("Failed to prepare news_digest")?;
        let rows = stmt
            .query_map(params![since], |row| article_at(row, 0))
            .context("Failed to query digest")?;
        collect(rows, "article")
    }

    /// Case-insensitive match on title, content or summary.
    pub fn search_articles(&self, query: &str, limit: i64) -> Result<Vec<NewsArticle>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM news_articles n
                 WHERE instr(LOWER(n.title), LOWER(?1)) > 0
                    OR instr(LOWER(n.content), LOWER(?1)) > 0
                    OR instr(LOWER(n.summary), LOWER(?1)) > 0
                 ORDER BY n.published_date DESC, n.id DESC LIMIT ?2"
            ))
            .context("Failed to prepare search_articles")?;
        let rows = stmt
            .query_map(params![query, limit], |row| article_at(row, 0))
            .context("Failed to search articles")?;
        collect(rows, "article")
    }

    // ── Bookmarks ─────────────────────────────────────────────────────

    fn is_bookmarked(&self, user_id: i64, article_id: i64) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM article_bookmarks WHERE user_id = ?1 AND article_id = ?2",
                params![user_id, article_id],
                |row| row.get(0),
            )
            .context("Failed to check bookmark")?;
        Ok(count > 0)
    }

    /// Add the bookmark if absent, remove it if present. The article's
    /// bookmark_count follows in the same transaction.
    pub fn toggle_bookmark(&self, user_id: i64, article_id: i64) -> Result<BookmarkToggle> {
        if self.get_article(article_id, None)?.is_none() {
            return Err(EcoError::not_found("Article", article_id).into());
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin bookmark transaction")?;
        let removed = tx
            .execute(
                "DELETE FROM article_bookmarks WHERE user_id = ?1 AND article_id = ?2",
                params![user_id, article_id],
            )
            .context("Failed to remove bookmark")?;
        let outcome = if removed > 0 {
            tx.execute(
                "UPDATE news_articles SET bookmark_count = MAX(0, bookmark_count - 1) WHERE id = ?1",
                params![article_id],
            )
            .context("Failed to decrement bookmark count")?;
            BookmarkToggle::Removed
        } else {
            tx.execute(
                "INSERT INTO article_bookmarks (user_id, article_id) VALUES (?1, ?2)",
                params![user_id, article_id],
            )
            .context("Failed to insert bookmark")?;
            tx.execute(
                "UPDATE news_articles SET bookmark_count = bookmark_count + 1 WHERE id = ?1",
                params![article_id],
            )
            .context("Failed to increment bookmark count")?;
            BookmarkToggle::Added
        };
        tx.commit().context("Failed to commit bookmark toggle")?;
        Ok(outcome)
    }

    pub fn list_bookmarks(&self, user_id: i64) -> Result<Vec<ArticleBookmark>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT b.id, b.user_id, b.created_at, {ARTICLE_COLUMNS}
                 FROM article_bookmarks b JOIN news_articles n ON n.id = b.article_id
                 WHERE b.user_id = ?1 ORDER BY b.created_at DESC, b.id DESC"
            ))
            .context("Failed to prepare list_bookmarks")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let mut article = article_at(row, 3)?;
                article.is_bookmarked = Some(true);
                Ok(ArticleBookmark {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    created_at: row.get(2)?,
                    article,
                })
            })
            .context("Failed to query bookmarks")?;
        collect(rows, "bookmark")
    }

    // ── Trending topics ───────────────────────────────────────────────

    pub fn trending_topics(&self, limit: i64) -> Result<Vec<TrendingTopic>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, topic, search_count, trend_score, date FROM trending_topics
                 ORDER BY trend_score DESC, date DESC, id DESC LIMIT ?1",
            )
            .context("Failed to prepare trending_topics")?;
        let rows = stmt
            .query_map(params![limit], row_to_topic)
            .context("Failed to query trending topics")?;
        collect(rows, "trending topic")
    }

    /// Count one search for `topic` on `date`; the score tracks the count.
    pub fn record_search(&self, topic: &str, date: &str) -> Result<TrendingTopic> {
        self.conn
            .execute(
                "INSERT INTO trending_topics (topic, search_count, trend_score, date)
                 VALUES (?1, 1, 1.0, ?2)
                 ON CONFLICT(topic, date) DO UPDATE SET
                    search_count = search_count + 1,
                    trend_score = search_count + 1",
                params![topic, date],
            )
            .context("Failed to record search")?;
        self.conn
            .query_row(
                "SELECT id, topic, search_count, trend_score, date FROM trending_topics
                 WHERE topic = ?1 AND date = ?2",
                params![topic, date],
                row_to_topic,
            )
            .context("Trending topic not found after upsert")
    }
}
