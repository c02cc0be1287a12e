//! Dice rolling subsystem
//!
//! Pure, stateless randomness: expression parsing ("2d6+1d4+3"),
//! advantage/disadvantage, ability-score generation, attack and
//! damage resolution, saving throws and skill checks. Every rolling
//! function has a `_with` variant taking an explicit generator so
//! callers and tests can supply a seeded one.

mod checks;
mod expr;

pub use checks::{
    roll_ability_scores, roll_ability_scores_with, roll_attack, roll_attack_with, roll_damage,
    roll_damage_with, roll_initiative, roll_initiative_with, roll_saving_throw,
    roll_saving_throw_with, roll_skill_check, roll_skill_check_with, AbilityScoreRoll,
    AttackOptions, AttackResult, CheckResult, DamageResult, RollRecord,
};
pub use expr::{
    roll, roll_dice, roll_die, roll_percentile, roll_percentile_with, roll_with,
    roll_with_advantage, roll_with_disadvantage, DiceError, DiceExpression, DiceTerm, Keep,
    RollOptions, RollResult,
};
