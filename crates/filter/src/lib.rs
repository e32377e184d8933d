//! Scry filter engine: parse `field=value` / `field!=value` predicates and
//! evaluate them against typed records.
//!
//! Predicates are ANDed in listed order and short-circuit on the first miss.
//! A field the record does not carry (unknown name, or known but unset) never
//! matches, for either operator.

#![forbid(unsafe_code)]

use scry_core::{FilterOp, Filters, Predicate, Record, StateError, StateResult};
use smallvec::SmallVec;

/// Parse one predicate. Splits on the first `!=`, else the first `=`.
/// Field and value are trimmed. The field must be non-empty; the value may
/// be empty or contain `=`.
pub fn parse_predicate(s: &str) -> StateResult<Predicate> {
    let (field, op, value) = if let Some(i) = s.find("!=") {
        (&s[..i], FilterOp::Ne, &s[i + 2..])
    } else if let Some(i) = s.find('=') {
        (&s[..i], FilterOp::Eq, &s[i + 1..])
    } else {
        return Err(StateError::InvalidFilter(format!("expected field=value or field!=value, got {:?}", s)));
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(StateError::InvalidFilter(format!("missing field name in {:?}", s)));
    }
    Ok(Predicate { field: field.to_string(), op, value: value.trim().to_string() })
}

/// Parse a list of predicates, preserving order. The first bad entry fails the whole list.
pub fn parse_filters<S: AsRef<str>>(items: &[S]) -> StateResult<Filters> {
    let mut out: Filters = SmallVec::new();
    for it in items {
        out.push(parse_predicate(it.as_ref())?);
    }
    Ok(out)
}

/// Evaluate a single predicate.
pub fn eval(record: &Record, p: &Predicate) -> bool {
    match record.field(&p.field) {
        None => false,
        Some(v) => match p.op {
            FilterOp::Eq => v == p.value,
            FilterOp::Ne => v != p.value,
        },
    }
}

/// All predicates hold. An empty filter list matches everything.
pub fn matches(record: &Record, filters: &[Predicate]) -> bool {
    filters.iter().all(|p| eval(record, p))
}

/// Keep only matching records, preserving their relative order.
/// Returns how many were dropped.
pub fn retain_matching(records: &mut Vec<Record>, filters: &[Predicate]) -> usize {
    if filters.is_empty() {
        return 0;
    }
    let before = records.len();
    records.retain(|r| matches(r, filters));
    let dropped = before - records.len();
    metrics::counter!("filter_dropped_total", dropped as u64);
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use scry_core::record::{Actor, ActorState};

    fn actor(id: &str, class: &str, state: ActorState, pid: Option<u32>) -> Record {
        Record::Actor(Actor {
            actor_id: id.into(),
            class_name: class.into(),
            name: None,
            job_id: Some("01000000".into()),
            state,
            node_id: Some("n1".into()),
            worker_id: None,
            pid,
            details: None,
        })
    }

    #[test]
    fn parse_splits_on_first_operator() {
        let p = parse_predicate("state=ALIVE").unwrap();
        assert_eq!((p.field.as_str(), p.op, p.value.as_str()), ("state", FilterOp::Eq, "ALIVE"));
        let p = parse_predicate(" state != DEAD").unwrap();
        assert_eq!((p.field.as_str(), p.op, p.value.as_str()), ("state", FilterOp::Ne, "DEAD"));
        let p = parse_predicate("entrypoint=python x.py --a=b").unwrap();
        assert_eq!(p.value, "python x.py --a=b");
        let p = parse_predicate("name=").unwrap();
        assert_eq!(p.value, "");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(parse_predicate("state"), Err(StateError::InvalidFilter(_))));
        assert!(matches!(parse_predicate("=ALIVE"), Err(StateError::InvalidFilter(_))));
        assert!(matches!(parse_predicate("  !=x"), Err(StateError::InvalidFilter(_))));
        assert!(parse_filters(&["state=ALIVE", "oops"]).is_err());
    }

    #[test]
    fn unknown_and_unset_fields_never_match() {
        let r = actor("a1", "Counter", ActorState::PendingCreation, None);
        assert!(!matches(&r, &[Predicate::eq("color", "red")]));
        assert!(!matches(&r, &[Predicate::ne("color", "red")]));
        assert!(!matches(&r, &[Predicate::eq("pid", "1")]));
        assert!(!matches(&r, &[Predicate::ne("pid", "1")]));
    }

    #[test]
    fn spaced_operator_compares_trimmed_value() {
        let dead = actor("a1", "Counter", ActorState::Dead, None);
        let alive = actor("a2", "Counter", ActorState::Alive, None);
        let fs = parse_filters(&["state != DEAD"]).unwrap();
        assert!(!matches(&dead, &fs));
        assert!(matches(&alive, &fs));
        assert!(matches(&alive, &parse_filters(&["class_name = Counter "]).unwrap()));
    }

    #[test]
    fn coerces_numbers_and_states() {
        let r = actor("a1", "Counter", ActorState::Alive, Some(77));
        assert!(matches(&r, &[Predicate::eq("pid", "77"), Predicate::eq("state", "ALIVE")]));
        assert!(matches(&r, &[Predicate::ne("class_name", "Other")]));
        assert!(!matches(&r, &[Predicate::eq("state", "alive")]));
        assert!(matches(&r, &[]));
    }
}
