//! Tier ranking rules for lease ordering.
//!
//! A [`TierRanking`] is an ordered list of `(predicate, rank)` rules. The first
//! matching rule wins; tiers matching no rule get the fallback rank. Lower
//! ranks are leased first. The same rules render to a SQL `CASE` expression so
//! the database orders candidates exactly as [`TierRanking::rank_of`] would.

use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{ColumnTrait, Condition};

use crate::models::{TIER_PRO, api_key};

/// Condition a key's tier must satisfy for a rule to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierPredicate {
    Equals(String),
    OneOf(Vec<String>),
}

impl TierPredicate {
    pub fn matches(&self, tier: &str) -> bool {
        match self {
            TierPredicate::Equals(expected) => expected == tier,
            TierPredicate::OneOf(options) => options.iter().any(|option| option == tier),
        }
    }

    fn condition(&self) -> Condition {
        match self {
            TierPredicate::Equals(expected) => {
                Condition::all().add(api_key::Column::Tier.eq(expected.as_str()))
            }
            TierPredicate::OneOf(options) => {
                Condition::all().add(api_key::Column::Tier.is_in(options.iter().map(String::as_str)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRule {
    pub predicate: TierPredicate,
    pub rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRanking {
    rules: Vec<TierRule>,
    fallback: i32,
}

impl TierRanking {
    pub fn new(rules: Vec<TierRule>, fallback: i32) -> Self {
        Self { rules, fallback }
    }

    /// One rule per listed tier, ranked by position; unlisted tiers rank last.
    pub fn from_order<S: AsRef<str>>(order: &[S]) -> Self {
        let rules = order
            .iter()
            .enumerate()
            .map(|(position, tier)| TierRule {
                predicate: TierPredicate::Equals(tier.as_ref().to_string()),
                rank: position as i32,
            })
            .collect::<Vec<_>>();
        let fallback = rules.len() as i32;
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[TierRule] {
        &self.rules
    }

    pub fn fallback(&self) -> i32 {
        self.fallback
    }

    pub fn rank_of(&self, tier: &str) -> i32 {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(tier))
            .map(|rule| rule.rank)
            .unwrap_or(self.fallback)
    }

    /// Render the rules as `CASE WHEN tier = .. THEN rank .. ELSE fallback END`.
    pub fn order_expr(&self) -> SimpleExpr {
        let mut rules = self.rules.iter();
        let Some(first) = rules.next() else {
            return Expr::val(self.fallback).into();
        };

        let case = rules.fold(
            Expr::case(first.predicate.condition(), first.rank),
            |case, rule| case.case(rule.predicate.condition(), rule.rank),
        );

        case.finally(self.fallback).into()
    }
}

impl Default for TierRanking {
    /// `pro` first, everything else after.
    fn default() -> Self {
        Self::from_order(&[TIER_PRO])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::{PostgresQueryBuilder, Query};

    #[test]
    fn default_ranks_pro_above_everything_else() {
        let ranking = TierRanking::default();
        assert_eq!(ranking.rank_of("pro"), 0);
        assert_eq!(ranking.rank_of("free"), 1);
        assert_eq!(ranking.rank_of("anything"), 1);
    }

    #[test]
    fn first_matching_rule_wins() {
        let ranking = TierRanking::new(
            vec![
                TierRule {
                    predicate: TierPredicate::OneOf(vec!["enterprise".into(), "pro".into()]),
                    rank: 0,
                },
                TierRule {
                    predicate: TierPredicate::Equals("pro".into()),
                    rank: 5,
                },
            ],
            9,
        );

        assert_eq!(ranking.rank_of("pro"), 0);
        assert_eq!(ranking.rank_of("enterprise"), 0);
        assert_eq!(ranking.rank_of("free"), 9);
    }

    #[test]
    fn from_order_uses_position() {
        let ranking = TierRanking::from_order(&["enterprise", "pro", "free"]);
        assert_eq!(ranking.rank_of("enterprise"), 0);
        assert_eq!(ranking.rank_of("pro"), 1);
        assert_eq!(ranking.rank_of("free"), 2);
        assert_eq!(ranking.rank_of("trial"), 3);
        assert_eq!(ranking.fallback(), 3);
    }

    #[test]
    fn order_expr_renders_case() {
        let ranking = TierRanking::from_order(&["pro", "team"]);
        let sql = Query::select()
            .expr(ranking.order_expr())
            .from(api_key::Entity)
            .to_string(PostgresQueryBuilder);

        assert!(sql.contains("CASE"), "{sql}");
        assert!(sql.contains("'pro'"), "{sql}");
        assert!(sql.contains("'team'"), "{sql}");
        assert!(sql.contains("ELSE 2"), "{sql}");
        assert!(sql.contains("\"tier\""), "{sql}");
    }

    #[test]
    fn empty_ranking_renders_constant() {
        let ranking = TierRanking::new(Vec::new(), 0);
        let sql = Query::select()
            .expr(ranking.order_expr())
            .to_string(PostgresQueryBuilder);
        assert_eq!(sql, "SELECT 0");
    }
}
