use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::models::*;

const SESSION_COLUMNS: &str = "id, user_id, session_id, title, message_count, total_tokens, \
     is_active, created_at, last_activity";

const MESSAGE_COLUMNS: &str = "id, user_id, session_id, role, content, tokens_used, \
     response_time, created_at";

const CONFIG_COLUMNS: &str = "id, name, system_prompt, max_tokens, temperature, \
     include_carbon_data, include_location, include_news, is_active";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        title: row.get(3)?,
        message_count: row.get(4)?,
        total_tokens: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        last_activity: row.get(8)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        role: parse_enum(3, row.get(3)?)?,
        content: row.get(4)?,
        tokens_used: row.get(5)?,
        response_time: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<ChatbotConfig> {
    Ok(ChatbotConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        system_prompt: row.get(2)?,
        max_tokens: row.get(3)?,
        temperature: row.get(4)?,
        include_carbon_data: row.get(5)?,
        include_location: row.get(6)?,
        include_news: row.get(7)?,
        is_active: row.get(8)?,
    })
}

/// One user turn and the assistant's reply, ready to persist.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub user_content: String,
    pub user_tokens: i64,
    pub reply: String,
    pub reply_tokens: i64,
    pub response_time: f64,
}

impl EcoDb {
    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_chat_session(&self, user_id: i64, session_id: &str, title: &str) -> Result<ChatSession> {
        self.conn
            .execute(
                "INSERT INTO chat_sessions (user_id, session_id, title) VALUES (?1, ?2, ?3)",
                params![user_id, session_id, title],
            )
            .context("Failed to insert chat session")?;
        self.get_chat_session(user_id, session_id)?
            .context("Chat session not found after insert")
    }

    /// Look up a session by its public identifier, scoped to the owner.
    pub fn get_chat_session(&self, user_id: i64, session_id: &str) -> Result<Option<ChatSession>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE session_id = ?1 AND user_id = ?2"
                ),
                params![session_id, user_id],
                row_to_session,
            )
            .optional()
            .context("Failed to query chat session")
    }

    pub fn get_chat_session_by_id(&self, user_id: i64, id: i64) -> Result<Option<ChatSession>> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                row_to_session,
            )
            .optional()
            .context("Failed to query chat session")
    }

    pub fn list_chat_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE user_id = ?1
                 ORDER BY last_activity DESC, id DESC"
            ))
            .context("Failed to prepare list_chat_sessions")?;
        let rows = stmt
            .query_map(params![user_id], row_to_session)
            .context("Failed to query chat sessions")?;
        collect(rows, "chat session")
    }

    pub fn delete_chat_session(&self, user_id: i64, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete chat session")?;
        Ok(changed > 0)
    }

    // ── Messages ──────────────────────────────────────────────────────

    fn insert_chat_message(
        &self,
        user_id: i64,
        session_id: &str,
        role: ChatRole,
        content: &str,
        tokens_used: i64,
        response_time: Option<f64>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO chat_messages
                    (user_id, session_id, role, content, tokens_used, response_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![user_id, session_id, role.as_str(), content, tokens_used, response_time],
            )
            .context("Failed to insert chat message")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_chat_message(&self, id: i64) -> Result<ChatMessage> {
        self.conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .context("Chat message not found")
    }

    /// Store both sides of a turn and bump the session counters atomically.
    pub fn record_chat_exchange(
        &self,
        user_id: i64,
        session_id: &str,
        exchange: &ChatExchange,
    ) -> Result<(ChatMessage, ChatMessage)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin chat transaction")?;
        let (user_msg, reply_msg) = self.insert_exchange(user_id, session_id, exchange)?;
        tx.commit().context("Failed to commit chat exchange")?;
        Ok((self.get_chat_message(user_msg)?, self.get_chat_message(reply_msg)?))
    }

    /// Create a session together with its first turn. Nothing is stored
    /// unless both succeed.
    pub fn start_chat_session(
        &self,
        user_id: i64,
        session_id: &str,
        title: &str,
        exchange: &ChatExchange,
    ) -> Result<(ChatMessage, ChatMessage)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin chat transaction")?;
        self.create_chat_session(user_id, session_id, title)?;
        let (user_msg, reply_msg) = self.insert_exchange(user_id, session_id, exchange)?;
        tx.commit().context("Failed to commit chat exchange")?;
        Ok((self.get_chat_message(user_msg)?, self.get_chat_message(reply_msg)?))
    }

    fn insert_exchange(
        &self,
        user_id: i64,
        session_id: &str,
        exchange: &ChatExchange,
    ) -> Result<(i64, i64)> {
        let user_msg = self.insert_chat_message(
            user_id,
            session_id,
            ChatRole::User,
            &exchange.user_content,
            exchange.user_tokens,
            None,
        )?;
        let reply_msg = self.insert_chat_message(
            user_id,
            session_id,
            ChatRole::Assistant,
            &exchange.reply,
            exchange.reply_tokens,
            Some(exchange.response_time),
        )?;
        self.conn
            .execute(
                "UPDATE chat_sessions SET
                    message_count = message_count + 2,
                    total_tokens = total_tokens + ?2,
                    last_activity = datetime('now')
                 WHERE session_id = ?1",
                params![session_id, exchange.reply_tokens],
            )
            .context("Failed to update chat session counters")?;
        Ok((user_msg, reply_msg))
    }

    /// Messages oldest first, for one session or across all of the user's.
    pub fn list_chat_messages(&self, user_id: i64, session_id: Option<&str>) -> Result<Vec<ChatMessage>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                 WHERE user_id = ?1 AND (?2 IS NULL OR session_id = ?2)
                 ORDER BY created_at, id"
            ))
            .context("Failed to prepare list_chat_messages")?;
        let rows = stmt
            .query_map(params![user_id, session_id], row_to_message)
            .context("Failed to query chat messages")?;
        collect(rows, "chat message")
    }

    // ── Configuration ─────────────────────────────────────────────────

    pub fn upsert_chatbot_config(
        &self,
        name: &str,
        system_prompt: &str,
        max_tokens: i64,
        temperature: f64,
    ) -> Result<ChatbotConfig> {
        self.conn
            .execute(
                "INSERT INTO chatbot_configs (name, system_prompt, max_tokens, temperature)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    system_prompt = excluded.system_prompt,
                    max_tokens = excluded.max_tokens,
                    temperature = excluded.temperature",
                params![name, system_prompt, max_tokens, temperature],
            )
            .context("Failed to upsert chatbot config")?;
        self.conn
            .query_row(
                &format!("SELECT {CONFIG_COLUMNS} FROM chatbot_configs WHERE name = ?1"),
                params![name],
                row_to_config,
            )
            .context("Chatbot config not found after upsert")
    }

    pub fn list_chatbot_configs(&self) -> Result<Vec<ChatbotConfig>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CONFIG_COLUMNS} FROM chatbot_configs WHERE is_active = 1 ORDER BY id"
            ))
            .context("Failed to prepare list_chatbot_configs")?;
        let rows = stmt
            .query_map([], row_to_config)
            .context("Failed to query chatbot configs")?;
        collect(rows, "chatbot config")
    }

    pub fn active_chatbot_config(&self) -> Result<Option<ChatbotConfig>> {
        Ok(self.list_chatbot_configs()?.into_iter().next())
    }
}
