//! Rule-level rolls built on dice expressions
//!
//! Attack resolution with critical ranges, damage with crit doubling,
//! saving throws and skill checks against a DC, ability-score
//! generation, and the persisted roll record adapter.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::expr::{roll_die, DiceError, DiceExpression, RollOptions, RollResult};

/// Options for an attack roll
#[derive(Debug, Clone, Copy)]
pub struct AttackOptions {
    pub advantage: bool,
    pub disadvantage: bool,
    /// Lowest natural d20 that counts as a critical hit
    pub critical_range: u32,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            advantage: false,
            disadvantage: false,
            critical_range: 20,
        }
    }
}

impl AttackOptions {
    fn roll_options(&self) -> RollOptions {
        RollOptions {
            advantage: self.advantage,
            disadvantage: self.disadvantage,
        }
    }
}

/// Result of an attack roll against an armor class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackResult {
    #[serde(flatten)]
    pub roll: RollResult,
    pub target_ac: i32,
    pub hit: bool,
    pub critical: bool,
    pub critical_miss: bool,
}

/// Result of a damage roll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageResult {
    #[serde(flatten)]
    pub roll: RollResult,
    pub damage_type: String,
    pub critical: bool,
}

/// Result of a saving throw or skill check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(flatten)]
    pub roll: RollResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dc: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// One ability score: 4d6, drop the lowest die
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityScoreRoll {
    pub rolls: [u32; 4],
    pub dropped: u32,
    pub total: u32,
}

/// A dice result annotated with roller identity for the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollRecord {
    pub roller_id: String,
    pub roller_name: String,
    pub reason: String,
    #[serde(flatten)]
    pub result: RollResult,
}

impl RollResult {
    /// Attach roller identity and reason for persistence. Pure
    /// mapping, no side effects.
    pub fn into_record(self, roller_id: &str, roller_name: &str, reason: &str) -> RollRecord {
        RollRecord {
            roller_id: roller_id.to_string(),
            roller_name: roller_name.to_string(),
            reason: reason.to_string(),
            result: self,
        }
    }
}

/// Roll initiative: 1d20 + modifier, advantage honored
pub fn roll_initiative_with(rng: &mut impl Rng, modifier: i32, opts: RollOptions) -> RollResult {
    DiceExpression::single(1, 20, modifier).roll_with_options(opts, rng)
}

/// Roll initiative with the thread-local generator
pub fn roll_initiative(modifier: i32, opts: RollOptions) -> RollResult {
    roll_initiative_with(&mut rand::rng(), modifier, opts)
}

/// Roll an attack: d20 + modifier against a target AC.
///
/// A natural roll in the critical range always hits; a natural 1
/// always misses.
pub fn roll_attack_with(
    rng: &mut impl Rng,
    modifier: i32,
    target_ac: i32,
    opts: AttackOptions,
) -> AttackResult {
    let roll = DiceExpression::single(1, 20, modifier).roll_with_options(opts.roll_options(), rng);
    let natural = roll.natural.unwrap_or(0);

    let critical = natural >= opts.critical_range;
    let critical_miss = natural == 1;
    let hit = critical || (!critical_miss && roll.total >= target_ac);

    AttackResult {
        roll,
        target_ac,
        hit,
        critical,
        critical_miss,
    }
}

/// Roll an attack with the thread-local generator
pub fn roll_attack(modifier: i32, target_ac: i32, opts: AttackOptions) -> AttackResult {
    roll_attack_with(&mut rand::rng(), modifier, target_ac, opts)
}

/// Roll damage from an expression.
///
/// On a critical hit the dice portion is rolled a second time and
/// both sets are kept; the flat modifier is added exactly once.
pub fn roll_damage_with(
    rng: &mut impl Rng,
    expression: &str,
    damage_type: &str,
    critical: bool,
) -> Result<DamageResult, DiceError> {
    let expr = DiceExpression::parse(expression)?;

    let (mut rolls, mut dice_total) = expr.roll_terms(rng);
    if critical {
        let (extra, extra_total) = expr.roll_terms(rng);
        rolls.extend(extra);
        dice_total += extra_total;
    }

    let total = dice_total + expr.modifier();
    let roll = RollResult::from_parts(expr.to_string(), rolls, expr.modifier(), total);

    Ok(DamageResult {
        roll,
        damage_type: damage_type.to_string(),
        critical,
    })
}

/// Roll damage with the thread-local generator
pub fn roll_damage(
    expression: &str,
    damage_type: &str,
    critical: bool,
) -> Result<DamageResult, DiceError> {
    roll_damage_with(&mut rand::rng(), expression, damage_type, critical)
}

/// Roll a saving throw against a DC
pub fn roll_saving_throw_with(
    rng: &mut impl Rng,
    modifier: i32,
    dc: i32,
    opts: RollOptions,
) -> CheckResult {
    let roll = DiceExpression::single(1, 20, modifier).roll_with_options(opts, rng);
    let success = roll.total >= dc;
    CheckResult {
        roll,
        dc: Some(dc),
        success: Some(success),
    }
}

/// Roll a saving throw with the thread-local generator
pub fn roll_saving_throw(modifier: i32, dc: i32, opts: RollOptions) -> CheckResult {
    roll_saving_throw_with(&mut rand::rng(), modifier, dc, opts)
}

/// Roll a skill check, optionally against a DC
pub fn roll_skill_check_with(
    rng: &mut impl Rng,
    modifier: i32,
    dc: Option<i32>,
    opts: RollOptions,
) -> CheckResult {
    let roll = DiceExpression::single(1, 20, modifier).roll_with_options(opts, rng);
    let success = dc.map(|dc| roll.total >= dc);
    CheckResult { roll, dc, success }
}

/// Roll a skill check with the thread-local generator
pub fn roll_skill_check(modifier: i32, dc: Option<i32>, opts: RollOptions) -> CheckResult {
    roll_skill_check_with(&mut rand::rng(), modifier, dc, opts)
}

/// Roll one ability score: 4d6, drop the lowest
fn roll_ability_score(rng: &mut impl Rng) -> AbilityScoreRoll {
    let rolls = [
        roll_die(rng, 6),
        roll_die(rng, 6),
        roll_die(rng, 6),
        roll_die(rng, 6),
    ];
    let dropped = *rolls.iter().min().unwrap_or(&1);
    let total = rolls.iter().sum::<u32>() - dropped;
    AbilityScoreRoll {
        rolls,
        dropped,
        total,
    }
}

/// Roll six ability scores
pub fn roll_ability_scores_with(rng: &mut impl Rng) -> [AbilityScoreRoll; 6] {
    std::array::from_fn(|_| roll_ability_score(rng))
}

/// Roll six ability scores with the thread-local generator
pub fn roll_ability_scores() -> [AbilityScoreRoll; 6] {
    roll_ability_scores_with(&mut rand::rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_attack_crit_and_fumble() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut saw_crit = false;
        let mut saw_fumble = false;

        for _ in 0..500 {
            let result = roll_attack_with(&mut rng, 5, 15, AttackOptions::default());
            let natural = result.roll.natural.unwrap();
            match natural {
                20 => {
                    assert!(result.hit);
                    assert!(result.critical);
                    saw_crit = true;
                }
                1 => {
                    assert!(!result.hit);
                    assert!(result.critical_miss);
                    saw_fumble = true;
                }
                _ => {
                    assert_eq!(result.hit, result.roll.total >= 15);
                    assert!(!result.critical);
                    assert!(!result.critical_miss);
                }
            }
            assert_eq!(result.target_ac, 15);
        }

        assert!(saw_crit);
        assert!(saw_fumble);
    }

    #[test]
    fn test_attack_expanded_crit_range() {
        let mut rng = StdRng::seed_from_u64(22);
        let opts = AttackOptions {
            critical_range: 19,
            ..Default::default()
        };

        for _ in 0..500 {
            let result = roll_attack_with(&mut rng, 0, 30, opts);
            if result.roll.natural.unwrap() >= 19 {
                assert!(result.critical);
                assert!(result.hit);
            }
        }
    }

    #[test]
    fn test_damage_doubles_dice_not_modifier() {
        let mut rng = StdRng::seed_from_u64(23);

        for _ in 0..200 {
            let result = roll_damage_with(&mut rng, "2d6+3", "slashing", true).unwrap();
            assert_eq!(result.roll.rolls.len(), 4);
            let dice: u32 = result.roll.rolls.iter().sum();
            assert_eq!(result.roll.total, dice as i32 + 3);
            assert!((7..=27).contains(&result.roll.total));
            assert!(result.critical);
            assert_eq!(result.damage_type, "slashing");
        }
    }

    #[test]
    fn test_damage_normal() {
        let mut rng = StdRng::seed_from_u64(24);
        let result = roll_damage_with(&mut rng, "1d8+2", "piercing", false).unwrap();
        assert_eq!(result.roll.rolls.len(), 1);
        assert!((3..=10).contains(&result.roll.total));
        assert!(!result.critical);
    }

    #[test]
    fn test_damage_invalid_expression() {
        let mut rng = StdRng::seed_from_u64(25);
        assert!(roll_damage_with(&mut rng, "nope", "fire", false).is_err());
    }

    #[test]
    fn test_saving_throw() {
        let mut rng = StdRng::seed_from_u64(26);
        for _ in 0..100 {
            let result = roll_saving_throw_with(&mut rng, 2, 14, RollOptions::default());
            assert_eq!(result.dc, Some(14));
            assert_eq!(result.success, Some(result.roll.total >= 14));
        }
    }

    #[test]
    fn test_skill_check_without_dc() {
        let mut rng = StdRng::seed_from_u64(27);
        let result = roll_skill_check_with(&mut rng, 4, None, RollOptions::default());
        assert!(result.dc.is_none());
        assert!(result.success.is_none());
    }

    #[test]
    fn test_ability_scores() {
        let mut rng = StdRng::seed_from_u64(28);
        let scores = roll_ability_scores_with(&mut rng);
        assert_eq!(scores.len(), 6);

        for score in &scores {
            assert!((3..=18).contains(&score.total));
            assert_eq!(score.dropped, *score.rolls.iter().min().unwrap());
            let mut sorted = score.rolls;
            sorted.sort_unstable();
            let top3: u32 = sorted[1..].iter().sum();
            assert_eq!(score.total, top3);
        }
    }

    #[test]
    fn test_initiative_adds_modifier() {
        let mut rng = StdRng::seed_from_u64(29);
        let result = roll_initiative_with(&mut rng, 3, RollOptions::default());
        assert_eq!(result.total, result.rolls[0] as i32 + 3);
        assert!(result.natural.is_some());
    }

    #[test]
    fn test_into_record() {
        let mut rng = StdRng::seed_from_u64(30);
        let roll = roll_initiative_with(&mut rng, 1, RollOptions::default());
        let total = roll.total;
        let record = roll.into_record("pc-1", "Thalia", "initiative");
        assert_eq!(record.roller_id, "pc-1");
        assert_eq!(record.roller_name, "Thalia");
        assert_eq!(record.reason, "initiative");
        assert_eq!(record.result.total, total);
    }
}
