//! Conversation history
//!
//! The shared history is append-only. Stages commit whole turns; nothing is
//! edited or removed once pushed, so every snapshot is a prefix of every
//! later snapshot.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One committed turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation history shared by the aggregator pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a system instruction
    pub fn with_system(instruction: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(instruction)],
        }
    }

    /// Append a turn.
    ///
    /// An assistant turn may not be the first non-system entry: the bot
    /// cannot have answered a user who never spoke. Aggregators surface
    /// this as a wiring bug rather than recording a nonsense history.
    pub fn push(&mut self, turn: Turn) -> Result<()> {
        if turn.role == TurnRole::Assistant
            && !self.turns.iter().any(|t| t.role == TurnRole::User)
        {
            return Err(Error::ContractViolation(
                "assistant turn committed before any user turn".to_string(),
            ));
        }
        self.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Point-in-time copy of the history
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            turns: self.turns.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Immutable copy of the history at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn with the given role
    pub fn last_of(&self, role: TurnRole) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_order_preserved() {
        let mut ctx = ConversationContext::with_system("be brief");
        ctx.push(Turn::user("hello")).unwrap();
        ctx.push(Turn::assistant("hi")).unwrap();
        ctx.push(Turn::user("bye")).unwrap();

        let roles: Vec<_> = ctx.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                TurnRole::System,
                TurnRole::User,
                TurnRole::Assistant,
                TurnRole::User
            ]
        );
    }

    #[test]
    fn test_assistant_first_rejected() {
        let mut ctx = ConversationContext::with_system("be brief");
        let err = ctx.push(Turn::assistant("hi")).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut ctx = ConversationContext::new();
        ctx.push(Turn::user("one")).unwrap();
        let snap = ctx.snapshot();
        ctx.push(Turn::assistant("two")).unwrap();

        assert_eq!(snap.len(), 1);
        assert_eq!(ctx.len(), 2);
        assert_eq!(snap.last_of(TurnRole::User).unwrap().content, "one");
    }
}
