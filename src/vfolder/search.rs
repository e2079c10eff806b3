//! The search-expression evaluator boundary. The expression grammar itself
//! is left opaque; this defines the trait seam plus one concrete evaluator
//! good enough to drive the engine's reconciliation logic and tests. A real
//! deployment would substitute a richer evaluator without touching
//! `vfolder::engine`.

use crate::db::sql_match;
use crate::model::MessageInfoRecord;

/// Token that, when present in an expression, means a rebuild must
/// consider the whole subfolder rather than just the touched uids.
pub const MATCH_THREADS_TOKEN: &str = "match-threads";

pub trait ExpressionEvaluator: Send + Sync {
    fn matches(&self, expression: &str, record: &MessageInfoRecord) -> bool;

    fn mentions_match_threads(&self, expression: &str) -> bool {
        expression.contains(MATCH_THREADS_TOKEN)
    }
}

/// Whitespace-separated terms, ASCII-case-insensitive whole-word
/// containment against subject/from/to/cc/mailing-list, all terms
/// required (simple AND). The `match-threads` token is a control marker,
/// not itself a search term.
pub struct SimpleEvaluator;

impl ExpressionEvaluator for SimpleEvaluator {
    fn matches(&self, expression: &str, record: &MessageInfoRecord) -> bool {
        let fields = [
            record.subject.as_deref().unwrap_or(""),
            record.mail_from.as_deref().unwrap_or(""),
            record.mail_to.as_deref().unwrap_or(""),
            record.mail_cc.as_deref().unwrap_or(""),
            record.mlist.as_deref().unwrap_or(""),
        ];
        expression
            .split_whitespace()
            .filter(|tok| *tok != MATCH_THREADS_TOKEN)
            .all(|term| fields.iter().any(|f| sql_match(term, f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_configured_field() {
        let mut rec = MessageInfoRecord::new("1");
        rec.subject = Some("Quarterly Report".into());
        let eval = SimpleEvaluator;
        assert!(eval.matches("quarterly", &rec));
        assert!(!eval.matches("invoice", &rec));
    }

    #[test]
    fn match_threads_token_is_not_a_search_term() {
        let mut rec = MessageInfoRecord::new("1");
        rec.subject = Some("Quarterly Report".into());
        let eval = SimpleEvaluator;
        assert!(eval.matches("match-threads quarterly", &rec));
        assert!(eval.mentions_match_threads("match-threads quarterly"));
    }
}
