//! Combat subsystem - turn engine, state machine, lifecycle events

mod engine;
mod events;
mod state;

pub use engine::{CombatEngine, CombatError, NoopRoundHook, RoundHook};
pub use events::{CombatEvent, EventSink, ParticipantSnapshot};
pub use state::{
    should_combat_end, ActiveEffect, CombatOutcome, CombatState, Combatant, CombatantKind,
    Condition, InitiativeEntry, Participant, TurnAdvance, UNCONSCIOUS,
};
