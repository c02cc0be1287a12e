//! Dice expression parsing and rolling
//!
//! Parses standard notation like "2d6+3", "1d20-1", "2d6+1d4+3" and
//! the keep-highest/lowest suffixes "4d6kh3" / "2d20kl1".

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Dice parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("invalid dice expression: {0}")]
    InvalidExpression(String),

    #[error("dice count must be at least 1 in '{0}'")]
    InvalidCount(String),

    #[error("die sides must be at least 1 in '{0}'")]
    InvalidSides(String),

    #[error("cannot keep {keep} of {count} dice in '{term}'")]
    InvalidKeep { keep: u32, count: u32, term: String },
}

/// Keep-highest/lowest suffix on a die term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    Highest(u32),
    Lowest(u32),
}

/// A single die term of an expression (e.g. the "2d6" in "2d6+3")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceTerm {
    pub count: u32,
    pub sides: u32,
    pub keep: Option<Keep>,
}

/// A parsed dice expression: one or more die terms plus a net constant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceExpression {
    terms: Vec<DiceTerm>,
    modifier: i32,
    original: String,
}

/// Advantage/disadvantage flags for a roll
#[derive(Debug, Clone, Copy, Default)]
pub struct RollOptions {
    pub advantage: bool,
    pub disadvantage: bool,
}

impl RollOptions {
    pub fn advantage() -> Self {
        Self {
            advantage: true,
            disadvantage: false,
        }
    }

    pub fn disadvantage() -> Self {
        Self {
            advantage: false,
            disadvantage: true,
        }
    }
}

/// Roll a single die, uniform in 1..=sides
pub fn roll_die(rng: &mut impl Rng, sides: u32) -> u32 {
    rng.random_range(1..=sides)
}

/// Roll `count` independent dice, in order
pub fn roll_dice(rng: &mut impl Rng, count: u32, sides: u32) -> Vec<u32> {
    (0..count).map(|_| roll_die(rng, sides)).collect()
}

impl DiceExpression {
    /// Parse a dice notation string
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let original = notation.trim().to_lowercase();
        if original.is_empty() {
            return Err(DiceError::InvalidExpression(notation.to_string()));
        }

        let mut terms = Vec::new();
        let mut modifier: i32 = 0;
        let mut current = String::new();
        let mut sign: i32 = 1;

        for ch in original.chars() {
            match ch {
                '+' | '-' => {
                    if current.is_empty() {
                        return Err(DiceError::InvalidExpression(original.clone()));
                    }
                    Self::parse_term(&current, sign, &mut terms, &mut modifier)?;
                    current.clear();
                    sign = if ch == '+' { 1 } else { -1 };
                }
                ' ' => continue,
                _ => current.push(ch),
            }
        }

        if current.is_empty() {
            return Err(DiceError::InvalidExpression(original));
        }
        Self::parse_term(&current, sign, &mut terms, &mut modifier)?;

        if terms.is_empty() {
            return Err(DiceError::InvalidExpression(original));
        }

        Ok(Self {
            terms,
            modifier,
            original,
        })
    }

    fn parse_term(
        s: &str,
        sign: i32,
        terms: &mut Vec<DiceTerm>,
        modifier: &mut i32,
    ) -> Result<(), DiceError> {
        let Some(d_pos) = s.find('d') else {
            let value: i32 = s
                .parse()
                .map_err(|_| DiceError::InvalidExpression(s.to_string()))?;
            *modifier += sign * value;
            return Ok(());
        };

        // Die terms are additive only
        if sign < 0 {
            return Err(DiceError::InvalidExpression(s.to_string()));
        }

        let count_str = &s[..d_pos];
        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse()
                .map_err(|_| DiceError::InvalidExpression(s.to_string()))?
        };
        if count == 0 {
            return Err(DiceError::InvalidCount(s.to_string()));
        }

        let rest = &s[d_pos + 1..];
        let (sides_str, keep) = if let Some(kh_pos) = rest.find("kh") {
            let keep: u32 = rest[kh_pos + 2..]
                .parse()
                .map_err(|_| DiceError::InvalidExpression(s.to_string()))?;
            (&rest[..kh_pos], Some(Keep::Highest(keep)))
        } else if let Some(kl_pos) = rest.find("kl") {
            let keep: u32 = rest[kl_pos + 2..]
                .parse()
                .map_err(|_| DiceError::InvalidExpression(s.to_string()))?;
            (&rest[..kl_pos], Some(Keep::Lowest(keep)))
        } else {
            (rest, None)
        };

        let sides: u32 = sides_str
            .parse()
            .map_err(|_| DiceError::InvalidExpression(s.to_string()))?;
        if sides == 0 {
            return Err(DiceError::InvalidSides(s.to_string()));
        }

        if let Some(Keep::Highest(k) | Keep::Lowest(k)) = keep {
            if k == 0 || k > count {
                return Err(DiceError::InvalidKeep {
                    keep: k,
                    count,
                    term: s.to_string(),
                });
            }
        }

        terms.push(DiceTerm { count, sides, keep });
        Ok(())
    }

    /// Build a single-term expression without going through the parser
    pub(crate) fn single(count: u32, sides: u32, modifier: i32) -> Self {
        let original = if modifier != 0 {
            format!("{}d{}{:+}", count, sides, modifier)
        } else {
            format!("{}d{}", count, sides)
        };
        Self {
            terms: vec![DiceTerm {
                count,
                sides,
                keep: None,
            }],
            modifier,
            original,
        }
    }

    /// The net constant modifier
    pub fn modifier(&self) -> i32 {
        self.modifier
    }

    /// The die terms in source order
    pub fn terms(&self) -> &[DiceTerm] {
        &self.terms
    }

    /// Minimum possible total
    pub fn min(&self) -> i32 {
        let dice: u32 = self
            .terms
            .iter()
            .map(|t| match t.keep {
                Some(Keep::Highest(k) | Keep::Lowest(k)) => k,
                None => t.count,
            })
            .sum();
        dice as i32 + self.modifier
    }

    /// Maximum possible total
    pub fn max(&self) -> i32 {
        let dice: u32 = self
            .terms
            .iter()
            .map(|t| match t.keep {
                Some(Keep::Highest(k) | Keep::Lowest(k)) => k * t.sides,
                None => t.count * t.sides,
            })
            .sum();
        dice as i32 + self.modifier
    }

    /// Whether this is exactly one d20 die (constants allowed)
    pub fn is_single_d20(&self) -> bool {
        self.terms.len() == 1
            && self.terms[0].count == 1
            && self.terms[0].sides == 20
            && self.terms[0].keep.is_none()
    }

    /// Roll every die term once; returns the raw rolls in source order
    /// and the sum of the kept dice.
    pub(crate) fn roll_terms(&self, rng: &mut impl Rng) -> (Vec<u32>, i32) {
        let mut all = Vec::new();
        let mut kept_sum: i32 = 0;

        for term in &self.terms {
            let rolls = roll_dice(rng, term.count, term.sides);
            kept_sum += match term.keep {
                Some(Keep::Highest(k)) => {
                    let mut sorted = rolls.clone();
                    sorted.sort_unstable_by(|a, b| b.cmp(a));
                    sorted[..k as usize].iter().sum::<u32>() as i32
                }
                Some(Keep::Lowest(k)) => {
                    let mut sorted = rolls.clone();
                    sorted.sort_unstable();
                    sorted[..k as usize].iter().sum::<u32>() as i32
                }
                None => rolls.iter().sum::<u32>() as i32,
            };
            all.extend(rolls);
        }

        (all, kept_sum)
    }

    /// Roll the expression with the given generator
    pub fn roll_with(&self, rng: &mut impl Rng) -> RollResult {
        let (rolls, kept_sum) = self.roll_terms(rng);
        let natural = if self.is_single_d20() {
            rolls.first().copied()
        } else {
            None
        };

        RollResult {
            id: Uuid::new_v4(),
            expression: self.original.clone(),
            total: kept_sum + self.modifier,
            rolls,
            modifier: self.modifier,
            natural,
            advantage: false,
            disadvantage: false,
            discarded: None,
            rolled_at: Utc::now(),
        }
    }

    /// Roll honoring advantage/disadvantage.
    ///
    /// Advantage and disadvantage only apply to single-d20
    /// expressions; anywhere else the flags are ignored and this is a
    /// plain roll.
    pub fn roll_with_options(&self, opts: RollOptions, rng: &mut impl Rng) -> RollResult {
        let wants_reroll = opts.advantage != opts.disadvantage;
        if !wants_reroll || !self.is_single_d20() {
            return self.roll_with(rng);
        }

        let first = roll_die(rng, 20);
        let second = roll_die(rng, 20);
        let (kept, discarded) = if opts.advantage {
            (first.max(second), first.min(second))
        } else {
            (first.min(second), first.max(second))
        };

        RollResult {
            id: Uuid::new_v4(),
            expression: self.original.clone(),
            rolls: vec![kept],
            modifier: self.modifier,
            total: kept as i32 + self.modifier,
            natural: Some(kept),
            advantage: opts.advantage,
            disadvantage: opts.disadvantage,
            discarded: Some(discarded),
            rolled_at: Utc::now(),
        }
    }

    /// Roll using the thread-local generator
    pub fn roll(&self) -> RollResult {
        self.roll_with(&mut rand::rng())
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

fn is_false(v: &bool) -> bool {
    !v
}

/// Outcome of a dice roll. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub id: Uuid,
    pub expression: String,
    /// Individual die values in source order. Under advantage or
    /// disadvantage this holds only the kept d20.
    pub rolls: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    /// Raw d20 value when the expression is a single d20 term
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub advantage: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disadvantage: bool,
    /// The unused d20 under advantage/disadvantage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<u32>,
    pub rolled_at: DateTime<Utc>,
}

impl RollResult {
    /// Assemble a result from already-rolled dice
    pub(crate) fn from_parts(expression: String, rolls: Vec<u32>, modifier: i32, total: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            expression,
            rolls,
            modifier,
            total,
            natural: None,
            advantage: false,
            disadvantage: false,
            discarded: None,
            rolled_at: Utc::now(),
        }
    }

    /// Check if the roll meets or exceeds a DC
    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }

    /// Natural 20 on a d20 roll
    pub fn is_natural_20(&self) -> bool {
        self.natural == Some(20)
    }

    /// Natural 1 on a d20 roll
    pub fn is_natural_1(&self) -> bool {
        self.natural == Some(1)
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dice = self
            .rolls
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} [{}] = {}", self.expression, dice, self.total)
    }
}

/// Roll a notation string with the given generator
pub fn roll_with(
    notation: &str,
    opts: RollOptions,
    rng: &mut impl Rng,
) -> Result<RollResult, DiceError> {
    let expr = DiceExpression::parse(notation)?;
    Ok(expr.roll_with_options(opts, rng))
}

/// Roll a notation string with the thread-local generator
pub fn roll(notation: &str, opts: RollOptions) -> Result<RollResult, DiceError> {
    roll_with(notation, opts, &mut rand::rng())
}

/// Roll a single-d20 notation with advantage
pub fn roll_with_advantage(notation: &str) -> Result<RollResult, DiceError> {
    roll(notation, RollOptions::advantage())
}

/// Roll a single-d20 notation with disadvantage
pub fn roll_with_disadvantage(notation: &str) -> Result<RollResult, DiceError> {
    roll(notation, RollOptions::disadvantage())
}

/// Roll percentile dice (1d100)
pub fn roll_percentile_with(rng: &mut impl Rng) -> RollResult {
    DiceExpression::single(1, 100, 0).roll_with(rng)
}

/// Roll percentile dice with the thread-local generator
pub fn roll_percentile() -> RollResult {
    roll_percentile_with(&mut rand::rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_basic() {
        let expr = DiceExpression::parse("2d6").unwrap();
        assert_eq!(expr.terms().len(), 1);
        assert_eq!(expr.terms()[0].count, 2);
        assert_eq!(expr.terms()[0].sides, 6);
        assert_eq!(expr.modifier(), 0);
    }

    #[test]
    fn test_parse_with_modifier() {
        let expr = DiceExpression::parse("1d20+5").unwrap();
        assert_eq!(expr.modifier(), 5);

        let expr = DiceExpression::parse("3d8-2").unwrap();
        assert_eq!(expr.modifier(), -2);
    }

    #[test]
    fn test_parse_multiple_terms() {
        let expr = DiceExpression::parse("2d6+1d4+3").unwrap();
        assert_eq!(expr.terms().len(), 2);
        assert_eq!(expr.terms()[1].sides, 4);
        assert_eq!(expr.modifier(), 3);
    }

    #[test]
    fn test_parse_implicit_one() {
        let expr = DiceExpression::parse("d6").unwrap();
        assert_eq!(expr.terms()[0].count, 1);
    }

    #[test]
    fn test_parse_whitespace_and_case() {
        let expr = DiceExpression::parse("  2D10+3  ").unwrap();
        assert_eq!(expr.terms()[0].sides, 10);
        assert_eq!(expr.modifier(), 3);
    }

    #[test]
    fn test_parse_keep() {
        let expr = DiceExpression::parse("4d6kh3").unwrap();
        assert_eq!(expr.terms()[0].keep, Some(Keep::Highest(3)));

        let expr = DiceExpression::parse("2d20kl1").unwrap();
        assert_eq!(expr.terms()[0].keep, Some(Keep::Lowest(1)));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(DiceExpression::parse("abc").is_err());
        assert!(DiceExpression::parse("2d").is_err());
        assert!(DiceExpression::parse("d").is_err());
        assert!(DiceExpression::parse("").is_err());
        assert!(DiceExpression::parse("2d6+").is_err());
        assert!(DiceExpression::parse("1d20-1d4").is_err());
        assert_eq!(
            DiceExpression::parse("0d6"),
            Err(DiceError::InvalidCount("0d6".to_string()))
        );
        assert_eq!(
            DiceExpression::parse("2d0"),
            Err(DiceError::InvalidSides("2d0".to_string()))
        );
        assert!(matches!(
            DiceExpression::parse("4d6kh5"),
            Err(DiceError::InvalidKeep { keep: 5, count: 4, .. })
        ));
    }

    #[test]
    fn test_roll_bounds_and_total() {
        let mut rng = StdRng::seed_from_u64(7);
        let expr = DiceExpression::parse("3d6+2").unwrap();

        for _ in 0..200 {
            let result = expr.roll_with(&mut rng);
            assert_eq!(result.rolls.len(), 3);
            for die in &result.rolls {
                assert!((1..=6).contains(die));
            }
            let sum: u32 = result.rolls.iter().sum();
            assert_eq!(result.total, sum as i32 + 2);
            assert!(result.natural.is_none());
        }
    }

    #[test]
    fn test_single_d20_natural() {
        let mut rng = StdRng::seed_from_u64(11);
        let result = DiceExpression::parse("1d20+3")
            .unwrap()
            .roll_with(&mut rng);
        assert_eq!(result.natural, Some(result.rolls[0]));

        let result = DiceExpression::parse("2d20").unwrap().roll_with(&mut rng);
        assert!(result.natural.is_none());
    }

    #[test]
    fn test_advantage_keeps_max() {
        let mut rng = StdRng::seed_from_u64(3);
        let expr = DiceExpression::parse("1d20").unwrap();

        for _ in 0..200 {
            let result = expr.roll_with_options(RollOptions::advantage(), &mut rng);
            let kept = result.rolls[0];
            let discarded = result.discarded.unwrap();
            assert!(kept >= discarded);
            assert!(result.advantage);
            assert!(!result.disadvantage);
            assert_eq!(result.natural, Some(kept));
        }
    }

    #[test]
    fn test_disadvantage_keeps_min() {
        let mut rng = StdRng::seed_from_u64(4);
        let expr = DiceExpression::parse("1d20+2").unwrap();

        for _ in 0..200 {
            let result = expr.roll_with_options(RollOptions::disadvantage(), &mut rng);
            let kept = result.rolls[0];
            assert!(kept <= result.discarded.unwrap());
            assert_eq!(result.total, kept as i32 + 2);
            assert!(result.disadvantage);
        }
    }

    #[test]
    fn test_advantage_ignored_for_non_d20() {
        let mut rng = StdRng::seed_from_u64(5);
        let expr = DiceExpression::parse("2d6").unwrap();
        let result = expr.roll_with_options(RollOptions::advantage(), &mut rng);
        assert!(!result.advantage);
        assert!(result.discarded.is_none());
        assert_eq!(result.rolls.len(), 2);
    }

    #[test]
    fn test_keep_highest_total() {
        let mut rng = StdRng::seed_from_u64(9);
        let expr = DiceExpression::parse("4d6kh3").unwrap();

        for _ in 0..100 {
            let result = expr.roll_with(&mut rng);
            assert_eq!(result.rolls.len(), 4);
            let mut sorted = result.rolls.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            let expected: u32 = sorted[..3].iter().sum();
            assert_eq!(result.total, expected as i32);
        }
    }

    #[test]
    fn test_min_max() {
        let expr = DiceExpression::parse("2d6+3").unwrap();
        assert_eq!(expr.min(), 5);
        assert_eq!(expr.max(), 15);

        let expr = DiceExpression::parse("4d6kh3").unwrap();
        assert_eq!(expr.min(), 3);
        assert_eq!(expr.max(), 18);
    }

    #[test]
    fn test_percentile() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let result = roll_percentile_with(&mut rng);
            assert!((1..=100).contains(&result.total));
        }
    }

    #[test]
    fn test_display() {
        let expr = DiceExpression::parse("2d6+1").unwrap();
        assert_eq!(expr.to_string(), "2d6+1");
        assert_eq!(DiceExpression::single(1, 20, -2).to_string(), "1d20-2");
    }

    #[test]
    fn test_roll_result_json_omits_absent_fields() {
        let mut rng = StdRng::seed_from_u64(17);
        let result = DiceExpression::parse("2d6").unwrap().roll_with(&mut rng);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("natural").is_none());
        assert!(json.get("advantage").is_none());
        assert!(json.get("discarded").is_none());
    }
}
