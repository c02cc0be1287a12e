//! Combat state tracking
//!
//! The combat snapshot owned by a session: initiative order, round
//! and turn position, combatant health, conditions, and timed
//! effects. Every transition consumes the current state and returns a
//! new value; an in-flight write never aliases state another reader
//! holds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition added to players that drop to 0 HP
pub const UNCONSCIOUS: &str = "unconscious";

/// What kind of combatant an entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatantKind {
    Player,
    Npc,
    Monster,
}

/// A named status on a combatant; `duration` of `None` is indefinite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

impl Condition {
    pub fn indefinite(name: &str) -> Self {
        Self {
            name: name.to_string(),
            duration: None,
        }
    }

    pub fn lasting(name: &str, turns: u32) -> Self {
        Self {
            name: name.to_string(),
            duration: Some(turns),
        }
    }
}

/// A timed modifier, removed when its duration reaches zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub name: String,
    pub duration: u32,
}

/// Participant input to combat creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CombatantKind,
    #[serde(default)]
    pub initiative_modifier: i32,
    pub max_hp: i32,
    pub armor_class: i32,
}

/// A combatant's mutable battle record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CombatantKind,
    pub name: String,
    pub initiative: i32,
    pub current_hp: i32,
    pub max_hp: i32,
    pub armor_class: i32,
    pub conditions: Vec<Condition>,
    pub effects: Vec<ActiveEffect>,
    pub is_active: bool,
}

impl Combatant {
    /// Build a fresh combatant from a participant and its rolled initiative
    pub fn from_participant(p: &Participant, initiative: i32) -> Self {
        Self {
            id: p.id.clone(),
            kind: p.kind,
            name: p.name.clone(),
            initiative,
            current_hp: p.max_hp,
            max_hp: p.max_hp,
            armor_class: p.armor_class,
            conditions: Vec::new(),
            effects: Vec::new(),
            is_active: true,
        }
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.iter().any(|c| c.name == name)
    }

    fn add_condition(&mut self, condition: Condition) {
        if !self.has_condition(&condition.name) {
            self.conditions.push(condition);
        }
    }

    fn remove_condition(&mut self, name: &str) {
        self.conditions.retain(|c| c.name != name);
    }

    /// End-of-turn decay: durationed conditions and all effects tick
    /// down by one; entries reaching zero are removed. Indefinite
    /// conditions are untouched.
    fn decay_durations(&mut self) {
        for condition in &mut self.conditions {
            if let Some(turns) = condition.duration.as_mut() {
                *turns = turns.saturating_sub(1);
            }
        }
        self.conditions.retain(|c| c.duration != Some(0));

        for effect in &mut self.effects {
            effect.duration = effect.duration.saturating_sub(1);
        }
        self.effects.retain(|e| e.duration > 0);
    }
}

/// An initiative slot. Kept separate from the combatant record so
/// turn order survives combatant edits and removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CombatantKind,
    pub name: String,
    pub initiative: i32,
}

/// How a combat resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatOutcome {
    Victory,
    Defeat,
    Ongoing,
}

impl fmt::Display for CombatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CombatOutcome::Victory => "victory",
            CombatOutcome::Defeat => "defeat",
            CombatOutcome::Ongoing => "ongoing",
        };
        write!(f, "{}", s)
    }
}

/// What a turn advance did, for event emission
#[derive(Debug, Clone)]
pub struct TurnAdvance {
    pub departing_id: String,
    pub departing_name: String,
    /// Round number the departing combatant acted in
    pub departing_round: u32,
    pub new_round: bool,
}

/// Snapshot of an encounter in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatState {
    pub active: bool,
    pub round: u32,
    pub turn_index: usize,
    pub initiative_order: Vec<InitiativeEntry>,
    pub combatants: Vec<Combatant>,
}

impl CombatState {
    /// Create an active combat from pre-sorted entries and combatants
    pub fn new(initiative_order: Vec<InitiativeEntry>, combatants: Vec<Combatant>) -> Self {
        Self {
            active: true,
            round: 1,
            turn_index: 0,
            initiative_order,
            combatants,
        }
    }

    pub fn combatant(&self, id: &str) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    fn combatant_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.combatants.iter_mut().find(|c| c.id == id)
    }

    /// The initiative entry whose turn it is
    pub fn current_entry(&self) -> Option<&InitiativeEntry> {
        self.initiative_order.get(self.turn_index)
    }

    /// The combatant whose turn it is
    pub fn current_combatant(&self) -> Option<&Combatant> {
        self.current_entry().and_then(|e| self.combatant(&e.id))
    }

    pub fn is_player_turn(&self) -> bool {
        self.current_combatant()
            .is_some_and(|c| c.kind == CombatantKind::Player)
    }

    /// Insert a newcomer into the order: before the first strictly
    /// lower score, ties after. Bumps `turn_index` when inserting at
    /// or before it so the combatant currently acting keeps acting.
    pub fn with_combatant_added(mut self, entry: InitiativeEntry, combatant: Combatant) -> Self {
        let position = self
            .initiative_order
            .iter()
            .position(|e| e.initiative < entry.initiative)
            .unwrap_or(self.initiative_order.len());

        self.initiative_order.insert(position, entry);
        if position <= self.turn_index {
            self.turn_index += 1;
        }
        self.combatants.push(combatant);
        self
    }

    /// Advance to the next active combatant's turn.
    ///
    /// Decays the departing combatant's timed conditions and effects,
    /// then steps `turn_index` modulo the order length, skipping
    /// inactive combatants for at most one full cycle. Wrapping past
    /// the top of the order increments the round.
    pub fn advance_turn(mut self) -> (Self, TurnAdvance) {
        let departing = self.initiative_order[self.turn_index].clone();
        let departing_round = self.round;

        if let Some(combatant) = self.combatant_mut(&departing.id) {
            combatant.decay_durations();
        }

        let len = self.initiative_order.len();
        let mut index = self.turn_index;
        let mut new_round = false;
        for _ in 0..len {
            index = (index + 1) % len;
            if index == 0 {
                new_round = true;
            }
            let id = &self.initiative_order[index].id;
            if self.combatant(id).is_some_and(|c| c.is_active) {
                break;
            }
        }

        if new_round {
            self.round += 1;
        }
        self.turn_index = index;

        let advance = TurnAdvance {
            departing_id: departing.id,
            departing_name: departing.name,
            departing_round,
            new_round,
        };
        (self, advance)
    }

    /// Apply damage, flooring HP at zero. Reaching zero downs the
    /// combatant; players additionally gain the unconscious condition.
    pub fn with_damage(mut self, target_id: &str, amount: i32) -> Option<(Self, Combatant)> {
        let target = self.combatant_mut(target_id)?;
        target.current_hp = (target.current_hp - amount.max(0)).max(0);
        if target.current_hp == 0 {
            target.is_active = false;
            if target.kind == CombatantKind::Player {
                target.add_condition(Condition::indefinite(UNCONSCIOUS));
            }
        }
        let updated = target.clone();
        Some((self, updated))
    }

    /// Apply healing, capped at max HP. Healing up from zero revives:
    /// the combatant becomes active again and loses unconsciousness.
    pub fn with_healing(mut self, target_id: &str, amount: i32) -> Option<(Self, Combatant)> {
        let target = self.combatant_mut(target_id)?;
        let was_down = target.current_hp == 0;
        target.current_hp = (target.current_hp + amount.max(0)).min(target.max_hp);
        if was_down && target.current_hp > 0 {
            target.is_active = true;
            target.remove_condition(UNCONSCIOUS);
        }
        let updated = target.clone();
        Some((self, updated))
    }

    /// Add a condition; duplicates by name are ignored
    pub fn with_condition_added(
        mut self,
        target_id: &str,
        condition: Condition,
    ) -> Option<(Self, Combatant)> {
        let target = self.combatant_mut(target_id)?;
        target.add_condition(condition);
        let updated = target.clone();
        Some((self, updated))
    }

    /// Remove a condition by exact name; no-op when absent
    pub fn with_condition_removed(
        mut self,
        target_id: &str,
        name: &str,
    ) -> Option<(Self, Combatant)> {
        let target = self.combatant_mut(target_id)?;
        target.remove_condition(name);
        let updated = target.clone();
        Some((self, updated))
    }

    /// Append an effect; duplicates of the same label each tick
    /// independently
    pub fn with_effect_added(
        mut self,
        target_id: &str,
        effect: ActiveEffect,
    ) -> Option<(Self, Combatant)> {
        let target = self.combatant_mut(target_id)?;
        target.effects.push(effect);
        let updated = target.clone();
        Some((self, updated))
    }
}

/// Check whether combat should resolve: victory once no active
/// monsters remain while a player still stands, defeat once no
/// active players remain.
pub fn should_combat_end(state: &CombatState) -> CombatOutcome {
    let active = |kind: CombatantKind| {
        state
            .combatants
            .iter()
            .filter(|c| c.kind == kind && c.is_active)
            .count()
    };

    let players = active(CombatantKind::Player);
    let monsters = active(CombatantKind::Monster);

    if players == 0 {
        CombatOutcome::Defeat
    } else if monsters == 0 {
        CombatOutcome::Victory
    } else {
        CombatOutcome::Ongoing
    }
}
