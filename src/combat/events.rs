//! Combat lifecycle events
//!
//! Append-only records emitted by the engine for audit and
//! downstream narration. The engine only knows the `EventSink`
//! seam; storage lives with the session layer.

use serde::{Deserialize, Serialize};

use super::state::{Combatant, CombatantKind};
use crate::session::StoreError;

/// Combatant identity captured at combat start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CombatantKind,
    pub initiative: i32,
}

impl From<&Combatant> for ParticipantSnapshot {
    fn from(c: &Combatant) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            kind: c.kind,
            initiative: c.initiative,
        }
    }
}

/// A combat lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CombatEvent {
    CombatStart {
        participants: Vec<ParticipantSnapshot>,
    },
    TurnStart {
        combatant_id: String,
        combatant_name: String,
        round: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_round: Option<bool>,
    },
    TurnEnd {
        combatant_id: String,
        combatant_name: String,
        round: u32,
    },
    CombatEnd {
        outcome: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        final_round: u32,
    },
}

impl CombatEvent {
    /// Stable type tag for storage and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CombatEvent::CombatStart { .. } => "combat_start",
            CombatEvent::TurnStart { .. } => "turn_start",
            CombatEvent::TurnEnd { .. } => "turn_end",
            CombatEvent::CombatEnd { .. } => "combat_end",
        }
    }
}

/// Append-only sink for combat events
pub trait EventSink: Send + Sync {
    fn append(
        &self,
        session_id: &str,
        event: &CombatEvent,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

impl<T: EventSink> EventSink for std::sync::Arc<T> {
    fn append(
        &self,
        session_id: &str,
        event: &CombatEvent,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send {
        (**self).append(session_id, event)
    }
}
