//! Ordered predicate/effect rule tables.
//!
//! One abstraction serves both the archetype classifier (first match wins,
//! catch-all last) and the per-turn coaching cascade (all matches fire).
//! Rule order is a contract: when two predicates can both match, the earlier
//! rule's priority must be asserted by test.

/// A single rule: when `applies` holds for the input, `effect` produces the
/// output.
pub struct Rule<I, O> {
    pub name: &'static str,
    pub applies: fn(&I) -> bool,
    pub effect: fn(&I) -> O,
}

/// An ordered list of rules evaluated top to bottom.
pub struct RuleTable<I, O> {
    rules: Vec<Rule<I, O>>,
}

impl<I, O> RuleTable<I, O> {
    pub fn new(rules: Vec<Rule<I, O>>) -> Self {
        Self { rules }
    }

    /// First matching rule's output, with the rule name for logging.
    pub fn first_match(&self, input: &I) -> Option<(&'static str, O)> {
        self.rules
            .iter()
            .find(|r| (r.applies)(input))
            .map(|r| (r.name, (r.effect)(input)))
    }

    /// Outputs of every matching rule, in table order.
    pub fn all_matches(&self, input: &I) -> Vec<O> {
        self.rules
            .iter()
            .filter(|r| (r.applies)(input))
            .map(|r| (r.effect)(input))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RuleTable<i32, &'static str> {
        RuleTable::new(vec![
            Rule {
                name: "negative",
                applies: |n| *n < 0,
                effect: |_| "negative",
            },
            Rule {
                name: "small",
                applies: |n| *n < 10,
                effect: |_| "small",
            },
            Rule {
                name: "any",
                applies: |_| true,
                effect: |_| "any",
            },
        ])
    }

    #[test]
    fn first_match_respects_table_order() {
        // -5 matches both "negative" and "small"; the earlier rule wins.
        let (name, out) = table().first_match(&-5).unwrap();
        assert_eq!(name, "negative");
        assert_eq!(out, "negative");
    }

    #[test]
    fn catch_all_makes_the_table_total() {
        assert_eq!(table().first_match(&99).unwrap().1, "any");
    }

    #[test]
    fn all_matches_returns_every_hit_in_order() {
        assert_eq!(table().all_matches(&-5), vec!["negative", "small", "any"]);
    }
}
