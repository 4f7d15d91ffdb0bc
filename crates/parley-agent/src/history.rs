//! Rolling conversation history with a configurable budget.
//!
//! The budget is counted in whole turns or in estimated tokens. When it
//! is exceeded, oldest turns are dropped first, but the most recent user
//! turn and the most recent agent turn are always retained so the model
//! never loses the immediate exchange.

use parley_core::{ConversationTurn, HistoryUnit, TurnRole};

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    budget: usize,
    unit: HistoryUnit,
}

impl ConversationHistory {
    pub fn new(budget: usize, unit: HistoryUnit) -> Self {
        Self {
            turns: Vec::new(),
            budget,
            unit,
        }
    }

    /// Append a turn and enforce the budget.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.enforce_budget();
    }

    /// All retained turns, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Remove and return the final turn if it is an agent turn.
    ///
    /// Used on barge-in: a reply the user cut off was never fully
    /// delivered, so it should not shape the next generation.
    pub fn pop_interrupted_reply(&mut self) -> Option<ConversationTurn> {
        match self.turns.last() {
            Some(turn) if turn.role == TurnRole::Agent => self.turns.pop(),
            _ => None,
        }
    }

    fn usage(&self) -> usize {
        match self.unit {
            HistoryUnit::Turns => self.turns.len(),
            HistoryUnit::Tokens => self.turns.iter().map(|t| t.estimated_tokens()).sum(),
        }
    }

    fn enforce_budget(&mut self) {
        while self.usage() > self.budget {
            let last_user = self
                .turns
                .iter()
                .rposition(|t| t.role == TurnRole::User);
            let last_agent = self
                .turns
                .iter()
                .rposition(|t| t.role == TurnRole::Agent);
            let victim =
                (0..self.turns.len()).find(|i| Some(*i) != last_user && Some(*i) != last_agent);
            match victim {
                Some(i) => {
                    let dropped = self.turns.remove(i);
                    tracing::debug!(role = %dropped.role, "History budget exceeded, dropping oldest turn");
                }
                // Only the protected pair remains.
                None => break,
            }
        }
    }
}

// ====== Tests ======

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> ConversationTurn {
        ConversationTurn::user(text)
    }

    fn agent(text: &str) -> ConversationTurn {
        ConversationTurn::agent(text)
    }

    #[test]
    fn turn_budget_drops_oldest_first() {
        let mut history = ConversationHistory::new(4, HistoryUnit::Turns);
        history.push(user("one"));
        history.push(agent("two"));
        history.push(user("three"));
        history.push(agent("four"));
        history.push(user("five"));

        assert_eq!(history.len(), 4);
        assert_eq!(history.turns()[0].text, "two");
        assert_eq!(history.turns().last().unwrap().text, "five");
    }

    #[test]
    fn latest_exchange_is_never_dropped() {
        let mut history = ConversationHistory::new(1, HistoryUnit::Turns);
        history.push(user("question"));
        history.push(agent("answer"));

        // Budget of one turn cannot evict the protected pair.
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].text, "question");
        assert_eq!(history.turns()[1].text, "answer");
    }

    #[test]
    fn token_budget_counts_text_length() {
        // ~25 chars per message is ~7 estimated tokens each.
        let mut history = ConversationHistory::new(20, HistoryUnit::Tokens);
        for i in 0..6 {
            history.push(user(&format!("message number {i} with padding")));
        }
        assert!(history.len() < 6);
        assert!(history.turns().iter().map(|t| t.estimated_tokens()).sum::<usize>() <= 20 + 8);
    }

    #[test]
    fn pop_interrupted_reply_removes_trailing_agent_turn() {
        let mut history = ConversationHistory::new(10, HistoryUnit::Turns);
        history.push(user("hello"));
        history.push(agent("I was saying"));

        let popped = history.pop_interrupted_reply().unwrap();
        assert_eq!(popped.text, "I was saying");
        assert_eq!(history.len(), 1);
        // Nothing to pop when the last turn is the user's.
        assert!(history.pop_interrupted_reply().is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn empty_history_is_well_behaved() {
        let mut history = ConversationHistory::new(4, HistoryUnit::Turns);
        assert!(history.is_empty());
        assert!(history.pop_interrupted_reply().is_none());
    }
}
