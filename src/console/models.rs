use std::path::Path;

use serde::{Deserialize, Serialize};

/// URL prefix under which the capture directory is mounted.
pub const CAPTURES_URL_PREFIX: &str = "/poker_captures";

/// Stored account row. Never serialized to clients; see [`PublicUser`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

impl User {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Identity fields safe to hand to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// One logged poker decision, as stored.
#[derive(Debug, Clone)]
pub struct GameHistoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub screenshot_path: String,
    pub game_state: String,
    pub player_cards: Option<String>,
    pub board_cards: Option<String>,
    pub position: Option<String>,
    pub pot_size: Option<f64>,
    pub action_taken: Option<String>,
    pub action_amount: Option<f64>,
    pub ai_decision: Option<String>,
    pub timestamp: String,
}

/// A single record as returned by `GET /api/game-history/{id}`: the stored
/// path becomes its public URL and the JSON columns are parsed back.
#[derive(Debug, Clone, Serialize)]
pub struct GameRecordDetail {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub screenshot_url: String,
    pub game_state: serde_json::Value,
    pub player_cards: Option<String>,
    pub board_cards: Option<String>,
    pub position: Option<String>,
    pub pot_size: Option<f64>,
    pub action_taken: Option<String>,
    pub action_amount: Option<f64>,
    pub ai_decision: Option<serde_json::Value>,
    pub timestamp: String,
}

impl From<GameHistoryRecord> for GameRecordDetail {
    fn from(record: GameHistoryRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            session_id: record.session_id,
            screenshot_url: screenshot_url(&record.screenshot_path),
            game_state: parse_stored_json(record.game_state),
            player_cards: record.player_cards,
            board_cards: record.board_cards,
            position: record.position,
            pot_size: record.pot_size,
            action_taken: record.action_taken,
            action_amount: record.action_amount,
            ai_decision: record.ai_decision.map(parse_stored_json),
            timestamp: record.timestamp,
        }
    }
}

/// Stored JSON text back to a value; text that is not JSON stays a string.
fn parse_stored_json(text: String) -> serde_json::Value {
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

/// Insert payload for `POST /api/game-decision`.
///
/// `game_state` is arbitrary JSON and is serialized before storage; so is
/// `ai_decision` unless it is already a string.
#[derive(Debug, Clone, Deserialize)]
pub struct NewGameDecision {
    pub user_id: i64,
    pub session_id: String,
    pub screenshot_path: String,
    #[serde(default)]
    pub game_state: serde_json::Value,
    pub player_cards: Option<String>,
    pub board_cards: Option<String>,
    pub position: Option<String>,
    pub pot_size: Option<f64>,
    pub action_taken: Option<String>,
    pub action_amount: Option<f64>,
    #[serde(default)]
    pub ai_decision: Option<serde_json::Value>,
}

impl NewGameDecision {
    pub fn game_state_text(&self) -> String {
        self.game_state.to_string()
    }

    pub fn ai_decision_text(&self) -> Option<String> {
        match &self.ai_decision {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// History row as returned by `GET /api/game-history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub username: String,
    pub screenshot_url: String,
    pub player_cards: Option<String>,
    pub board_cards: Option<String>,
    pub position: Option<String>,
    pub pot_size: Option<f64>,
    pub action_taken: Option<String>,
    pub action_amount: Option<f64>,
    pub formatted_time: String,
}

/// A day that has at least one history row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameDate {
    pub date: String,
    pub formatted_date: String,
}

impl GameDate {
    /// Build from a `YYYY-MM-DD` string; the display form is `YYYY年MM月DD日`.
    pub fn from_iso(date: &str) -> Self {
        let formatted_date = match chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(d) => d.format("%Y年%m月%d日").to_string(),
            Err(_) => date.to_string(),
        };
        Self {
            date: date.to_string(),
            formatted_date,
        }
    }
}

/// Last path segment, accepting both `/` and `\` separators.
pub fn file_basename(path: &str) -> &str {
    let trimmed = path.trim();
    let by_std = Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(trimmed);
    by_std.rsplit('\\').next().unwrap_or(by_std)
}

/// Public URL for a stored screenshot reference.
pub fn screenshot_url(screenshot_path: &str) -> String {
    format!("{}/{}", CAPTURES_URL_PREFIX, file_basename(screenshot_path))
}
