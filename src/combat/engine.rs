//! Combat turn engine
//!
//! The state machine driving encounters: initiative, turn and round
//! progression, damage and healing, conditions and timed effects.
//! Every mutating operation reads the session, computes the next
//! state as a value, emits lifecycle events, and writes back through
//! the version-guarded store. Conflicts are surfaced, never retried
//! here; retry policy belongs to the caller.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

use super::events::{CombatEvent, EventSink, ParticipantSnapshot};
use super::state::{
    ActiveEffect, Combatant, CombatState, Condition, InitiativeEntry, Participant,
};
use crate::dice::{self, RollOptions};
use crate::session::{Session, SessionStore, StoreError};

/// Combat operation errors
#[derive(Debug, Error)]
pub enum CombatError {
    #[error("no active combat")]
    NoActiveCombat,

    #[error("combat already active")]
    CombatAlreadyActive,

    #[error("combat needs at least one participant")]
    NoParticipants,

    #[error("combatant not found: {0}")]
    CombatantNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Strategy invoked when a new round begins, before the round's first
/// turn_start event. Reserved for lair and legendary actions.
pub trait RoundHook: Send + Sync {
    fn on_round_start(&self, state: &mut CombatState);
}

/// Default hook: rounds begin with no extra actions
pub struct NoopRoundHook;

impl RoundHook for NoopRoundHook {
    fn on_round_start(&self, _state: &mut CombatState) {}
}

/// The combat turn engine over a session store and event sink
pub struct CombatEngine<S, E> {
    store: S,
    events: E,
    round_hook: Arc<dyn RoundHook>,
}

impl<S: SessionStore, E: EventSink> CombatEngine<S, E> {
    pub fn new(store: S, events: E) -> Self {
        Self {
            store,
            events,
            round_hook: Arc::new(NoopRoundHook),
        }
    }

    pub fn with_round_hook(mut self, hook: Arc<dyn RoundHook>) -> Self {
        self.round_hook = hook;
        self
    }

    /// Pull the active combat out of a session, or fail
    fn active_combat(session: Session) -> Result<(CombatState, i64), CombatError> {
        let version = session.version;
        match session.combat {
            Some(state) if state.active && !state.initiative_order.is_empty() => {
                Ok((state, version))
            }
            _ => Err(CombatError::NoActiveCombat),
        }
    }

    /// Begin an encounter: roll initiative for every participant,
    /// sort descending (ties keep submission order), and hand the
    /// first turn to the top of the order.
    pub async fn start_combat(
        &self,
        session_id: &str,
        participants: &[Participant],
        rng: &mut impl Rng,
    ) -> Result<CombatState, CombatError> {
        if participants.is_empty() {
            return Err(CombatError::NoParticipants);
        }

        let session = self.store.get(session_id).await?;
        if session.combat.as_ref().is_some_and(|c| c.active) {
            return Err(CombatError::CombatAlreadyActive);
        }

        let mut combatants: Vec<Combatant> = participants
            .iter()
            .map(|p| {
                let roll =
                    dice::roll_initiative_with(rng, p.initiative_modifier, RollOptions::default());
                debug!(participant = %p.name, total = roll.total, "initiative rolled");
                Combatant::from_participant(p, roll.total)
            })
            .collect();

        // Stable sort: tied scores stay in submission order
        combatants.sort_by(|a, b| b.initiative.cmp(&a.initiative));

        let initiative_order: Vec<InitiativeEntry> = combatants
            .iter()
            .map(|c| InitiativeEntry {
                id: c.id.clone(),
                kind: c.kind,
                name: c.name.clone(),
                initiative: c.initiative,
            })
            .collect();
        let state = CombatState::new(initiative_order, combatants);

        let snapshots: Vec<ParticipantSnapshot> =
            state.combatants.iter().map(ParticipantSnapshot::from).collect();
        self.events
            .append(
                session_id,
                &CombatEvent::CombatStart {
                    participants: snapshots,
                },
            )
            .await?;

        if let Some(first) = state.current_entry().cloned() {
            self.events
                .append(
                    session_id,
                    &CombatEvent::TurnStart {
                        combatant_id: first.id,
                        combatant_name: first.name,
                        round: state.round,
                        new_round: None,
                    },
                )
                .await?;
        }

        self.store
            .update_combat(session_id, Some(&state), session.version)
            .await?;

        info!(
            session = session_id,
            combatants = state.combatants.len(),
            "combat started"
        );
        Ok(state)
    }

    /// Roll a newcomer into an encounter already underway
    pub async fn add_combatant(
        &self,
        session_id: &str,
        participant: &Participant,
        rng: &mut impl Rng,
    ) -> Result<CombatState, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let roll = dice::roll_initiative_with(
            rng,
            participant.initiative_modifier,
            RollOptions::default(),
        );
        let combatant = Combatant::from_participant(participant, roll.total);
        let entry = InitiativeEntry {
            id: combatant.id.clone(),
            kind: combatant.kind,
            name: combatant.name.clone(),
            initiative: combatant.initiative,
        };

        let state = state.with_combatant_added(entry, combatant);
        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;

        debug!(
            session = session_id,
            combatant = %participant.name,
            initiative = roll.total,
            "combatant joined"
        );
        Ok(state)
    }

    /// End the current turn and hand off to the next active combatant
    pub async fn next_turn(&self, session_id: &str) -> Result<CombatState, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let (mut state, advance) = state.advance_turn();

        self.events
            .append(
                session_id,
                &CombatEvent::TurnEnd {
                    combatant_id: advance.departing_id.clone(),
                    combatant_name: advance.departing_name.clone(),
                    round: advance.departing_round,
                },
            )
            .await?;

        if advance.new_round {
            self.round_hook.on_round_start(&mut state);
        }

        if let Some(entry) = state.current_entry().cloned() {
            self.events
                .append(
                    session_id,
                    &CombatEvent::TurnStart {
                        combatant_id: entry.id,
                        combatant_name: entry.name,
                        round: state.round,
                        new_round: advance.new_round.then_some(true),
                    },
                )
                .await?;
        }

        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;
        Ok(state)
    }

    /// Damage a combatant; returns its updated record
    pub async fn apply_damage(
        &self,
        session_id: &str,
        target_id: &str,
        amount: i32,
        damage_type: Option<&str>,
    ) -> Result<Combatant, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let Some((state, updated)) = state.with_damage(target_id, amount) else {
            return Err(CombatError::CombatantNotFound(target_id.to_string()));
        };

        debug!(
            session = session_id,
            target = target_id,
            amount,
            damage_type = damage_type.unwrap_or("untyped"),
            hp = updated.current_hp,
            "damage applied"
        );

        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;
        Ok(updated)
    }

    /// Heal a combatant; returns its updated record
    pub async fn apply_healing(
        &self,
        session_id: &str,
        target_id: &str,
        amount: i32,
    ) -> Result<Combatant, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let Some((state, updated)) = state.with_healing(target_id, amount) else {
            return Err(CombatError::CombatantNotFound(target_id.to_string()));
        };

        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;
        Ok(updated)
    }

    /// Add a condition to a combatant (idempotent by name)
    pub async fn add_condition(
        &self,
        session_id: &str,
        target_id: &str,
        condition: Condition,
    ) -> Result<Combatant, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let Some((state, updated)) = state.with_condition_added(target_id, condition) else {
            return Err(CombatError::CombatantNotFound(target_id.to_string()));
        };

        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;
        Ok(updated)
    }

    /// Remove a condition by exact name; absent names are a no-op
    pub async fn remove_condition(
        &self,
        session_id: &str,
        target_id: &str,
        name: &str,
    ) -> Result<Combatant, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let Some((state, updated)) = state.with_condition_removed(target_id, name) else {
            return Err(CombatError::CombatantNotFound(target_id.to_string()));
        };

        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;
        Ok(updated)
    }

    /// Append a timed effect; duplicates tick independently
    pub async fn add_effect(
        &self,
        session_id: &str,
        target_id: &str,
        effect: ActiveEffect,
    ) -> Result<Combatant, CombatError> {
        let session = self.store.get(session_id).await?;
        let (state, version) = Self::active_combat(session)?;

        let Some((state, updated)) = state.with_effect_added(target_id, effect) else {
            return Err(CombatError::CombatantNotFound(target_id.to_string()));
        };

        self.store
            .update_combat(session_id, Some(&state), version)
            .await?;
        Ok(updated)
    }

    /// Close out the encounter and clear the session's combat.
    ///
    /// Ending an already-ended combat is tolerated; only a missing
    /// session fails.
    pub async fn end_combat(
        &self,
        session_id: &str,
        outcome: &str,
        summary: Option<&str>,
    ) -> Result<(), CombatError> {
        let session = self.store.get(session_id).await?;
        let final_round = session.combat.as_ref().map(|c| c.round).unwrap_or(0);

        self.events
            .append(
                session_id,
                &CombatEvent::CombatEnd {
                    outcome: outcome.to_string(),
                    summary: summary.map(String::from),
                    final_round,
                },
            )
            .await?;

        self.store
            .update_combat(session_id, None, session.version)
            .await?;

        info!(session = session_id, outcome, "combat ended");
        Ok(())
    }
}
