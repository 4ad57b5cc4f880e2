use crate::errors::Result;
use crate::template::{Node, ParamStore};
use chrono::{DateTime, Local};
use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

/// Source of wall-clock time for the `date` generator.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Walks classified payload trees and produces concrete JSON values.
pub struct Evaluator<R, C> {
    rng: R,
    clock: C,
}

impl<R: Rng, C: Clock> Evaluator<R, C> {
    pub fn new(rng: R, clock: C) -> Self {
        Self { rng, clock }
    }

    /// Evaluate `node`. Parameter bags are mutated in place inside `params`,
    /// never copied, so state carries over to the next call.
    pub fn evaluate(&mut self, key: &str, node: &Node, params: &mut ParamStore) -> Result<Value> {
        match node {
            Node::Scalar(value) => Ok(value.clone()),
            Node::Seq(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.evaluate(&i.to_string(), item, params))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Node::Map(children) => {
                let mut out = Map::with_capacity(children.len());
                for (child_key, child) in children {
                    out.insert(child_key.clone(), self.evaluate(child_key, child, params)?);
                }
                Ok(Value::Object(out))
            }
            Node::Call(call) => {
                let bag = params.get_mut(call.param);
                debug!("{}: {} with {}", key, call.function.name(), bag);
                let value = call.function.call(bag, &mut self.rng, self.clock.now())?;
                debug!("{}: {} -> {}", key, call.function.name(), value);
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MessageSet;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    pub struct FixedClock(pub DateTime<Local>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            self.0
        }
    }

    fn evaluator() -> Evaluator<StdRng, FixedClock> {
        let at = Local.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();
        Evaluator::new(StdRng::seed_from_u64(11), FixedClock(at))
    }

    fn load(payload: Value) -> MessageSet {
        let messages = json!({"m": {"topic": "t", "payload": payload}});
        MessageSet::load(messages.as_object().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_scalars_pass_through() {
        let mut set = load(json!("plain"));
        let mut eval = evaluator();
        let node = set.messages[0].payload.clone();

        assert_eq!(eval.evaluate("m", &node, &mut set.params).unwrap(), json!("plain"));
    }

    #[test]
    fn test_structure_is_preserved_and_calls_replaced() {
        let mut set = load(json!({
            "id": "dev-1",
            "at": {"func": "date", "param": {"fmt": "%H:%M"}},
            "readings": [
                {"func": "linear", "param": {"cur": 0, "delta": 5}},
                true,
                null
            ]
        }));
        let mut eval = evaluator();
        let node = set.messages[0].payload.clone();

        let value = eval.evaluate("m", &node, &mut set.params).unwrap();
        assert_eq!(
            value,
            json!({"id": "dev-1", "at": "08:00", "readings": [5, true, null]})
        );
        // Key order follows the definition
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["id", "at", "readings"]);
    }

    #[test]
    fn test_state_persists_between_evaluations() {
        let mut set = load(json!({"n": {"func": "linear", "param": {"cur": 10, "delta": -1}}}));
        let mut eval = evaluator();
        let node = set.messages[0].payload.clone();

        for expected in [9, 8, 7] {
            let value = eval.evaluate("m", &node, &mut set.params).unwrap();
            assert_eq!(value, json!({"n": expected}));
        }
    }

    #[test]
    fn test_comment_keys_absent_at_every_depth() {
        let mut set = load(json!({
            "#top": 1,
            "a": {"#mid": 2, "b": [{"#low": 3, "c": 4}]}
        }));
        let mut eval = evaluator();
        let node = set.messages[0].payload.clone();

        let value = eval.evaluate("m", &node, &mut set.params).unwrap();
        assert_eq!(value, json!({"a": {"b": [{"c": 4}]}}));
    }

    #[test]
    fn test_invocation_siblings_do_not_leak_into_output() {
        let mut set = load(json!({
            "v": {"func": "constant", "param": {"cur": "ok"}, "set:dev/v/set": "cur"}
        }));
        let mut eval = evaluator();
        let node = set.messages[0].payload.clone();

        assert_eq!(eval.evaluate("m", &node, &mut set.params).unwrap(), json!({"v": "ok"}));
    }

    #[test]
    fn test_generator_failure_propagates() {
        let mut set = load(json!({"v": {"func": "linear", "param": {"cur": 1, "delta": 1}}}));
        let mut eval = evaluator();
        let node = set.messages[0].payload.clone();

        // A bag rewritten after load, as a SET would
        let Node::Map(children) = &node else {
            panic!("expected a map");
        };
        let Node::Call(call) = &children[0].1 else {
            panic!("expected an invocation");
        };
        set.params.get_mut(call.param)["delta"] = json!("fast");

        let err = eval.evaluate("m", &node, &mut set.params).unwrap_err();
        assert!(!err.is_fatal());
    }
}
