//! Message definitions classified into a tagged tree.
//!
//! The raw `messages` object of the configuration is walked once at load
//! time. Maps carrying both `func` and `param` become [`Node::Call`]; their
//! parameter bags move into a [`ParamStore`] and the tree keeps a [`ParamId`]
//! handle, so the evaluator and the command router address the same cell.

use crate::errors::{Error, Result};
use crate::functions::Function;
use serde_json::{Map, Value};
use tracing::debug;

pub const COMMENT_MARKER: char = '#';
pub const FUNC_KEY: &str = "func";
pub const PARAM_KEY: &str = "param";
pub const GET_KEY: &str = "get";
pub const SET_PREFIX: &str = "set:";

const TOPIC_KEY: &str = "topic";
const PAYLOAD_KEY: &str = "payload";
const SYNC_KEY: &str = "sync";
const ONCE_KEY: &str = "once";
const RETAIN_KEY: &str = "retain";

pub fn is_comment(key: &str) -> bool {
    key.starts_with(COMMENT_MARKER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(usize);

/// Arena owning every parameter bag of the loaded configuration.
#[derive(Debug, Default)]
pub struct ParamStore {
    bags: Vec<Value>,
}

impl ParamStore {
    fn insert(&mut self, bag: Value) -> ParamId {
        self.bags.push(bag);
        ParamId(self.bags.len() - 1)
    }

    pub fn get(&self, id: ParamId) -> &Value {
        &self.bags[id.0]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Value {
        &mut self.bags[id.0]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Value),
    Seq(Vec<Node>),
    Map(Vec<(String, Node)>),
    Call(Invocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub function: Function,
    pub param: ParamId,
    /// Keys next to `func`/`param` (`get`, `set:<topic>`, ...), kept raw for
    /// command discovery. They never reach the generated payload.
    pub siblings: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    pub key: String,
    pub topic: String,
    pub payload: Node,
    pub sync: bool,
    pub once: bool,
    pub retain: bool,
    /// Message level keys other than the known ones, scanned for commands.
    pub extra: Vec<(String, Value)>,
}

/// Ordered message definitions and the parameter bags they point into.
#[derive(Debug, Default)]
pub struct MessageSet {
    pub messages: Vec<MessageDef>,
    pub params: ParamStore,
}

impl MessageSet {
    /// Classify the `messages` section. Comment entries are dropped.
    pub fn load(messages: Map<String, Value>) -> Result<Self> {
        let mut set = MessageSet::default();

        for (key, value) in messages {
            if is_comment(&key) {
                debug!("Skipping comment entry {}", key);
                continue;
            }
            let message = classify_message(key, value, &mut set.params)?;
            set.messages.push(message);
        }

        if set.messages.is_empty() {
            return Err(Error::Config("no message defined, nothing to do".to_string()));
        }

        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

fn classify_message(key: String, value: Value, params: &mut ParamStore) -> Result<MessageDef> {
    let Value::Object(fields) = value else {
        return Err(Error::Config(format!("message \"{}\" must be an object", key)));
    };

    let mut topic = None;
    let mut payload = None;
    let mut sync = true;
    let mut once = false;
    let mut retain = false;
    let mut extra = Vec::new();

    for (name, value) in fields {
        match name.as_str() {
            TOPIC_KEY => match value {
                Value::String(t) => topic = Some(t),
                other => {
                    return Err(Error::Config(format!(
                        "topic of message \"{}\" must be a string, got {}",
                        key, other
                    )))
                }
            },
            PAYLOAD_KEY => payload = Some(classify(&key, value, params)?),
            SYNC_KEY => sync = flag(&key, &name, &value)?,
            ONCE_KEY => once = flag(&key, &name, &value)?,
            RETAIN_KEY => retain = flag(&key, &name, &value)?,
            _ if is_comment(&name) => {}
            _ => extra.push((name, value)),
        }
    }

    let topic = topic.ok_or_else(|| Error::MissingKey {
        message: key.clone(),
        key: TOPIC_KEY.to_string(),
    })?;
    let payload = payload.ok_or_else(|| Error::MissingKey {
        message: key.clone(),
        key: PAYLOAD_KEY.to_string(),
    })?;

    debug!("Loaded message {} on topic {}", key, topic);

    Ok(MessageDef {
        key,
        topic,
        payload,
        sync,
        once,
        retain,
        extra,
    })
}

fn flag(message: &str, name: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        Error::Config(format!(
            "\"{}\" of message \"{}\" must be a boolean, got {}",
            name, message, value
        ))
    })
}

/// Turn a raw payload value into a [`Node`]; `message` is only used for
/// error reporting.
pub fn classify(message: &str, value: Value, params: &mut ParamStore) -> Result<Node> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| classify(message, item, params))
            .collect::<Result<Vec<_>>>()
            .map(Node::Seq),
        Value::Object(map) if map.contains_key(FUNC_KEY) && map.contains_key(PARAM_KEY) => {
            classify_call(message, map, params)
        }
        Value::Object(map) => {
            let mut children = Vec::with_capacity(map.len());
            for (key, child) in map {
                if is_comment(&key) {
                    continue;
                }
                children.push((key, classify(message, child, params)?));
            }
            Ok(Node::Map(children))
        }
        scalar => Ok(Node::Scalar(scalar)),
    }
}

fn classify_call(message: &str, map: Map<String, Value>, params: &mut ParamStore) -> Result<Node> {
    let mut function = None;
    let mut param = None;
    let mut siblings = Vec::new();

    for (key, value) in map {
        match key.as_str() {
            FUNC_KEY => {
                match value.as_str().and_then(|name| name.parse::<Function>().ok()) {
                    Some(parsed) => function = Some(parsed),
                    None => {
                        return Err(Error::UnknownFunction {
                            message: message.to_string(),
                            name: value.as_str().map_or_else(|| value.to_string(), str::to_string),
                        })
                    }
                }
            }
            PARAM_KEY => {
                if !(value.is_object() || value.is_array()) {
                    return Err(Error::Config(format!(
                        "\"param\" in message \"{}\" must be an object or an array, got {}",
                        message, value
                    )));
                }
                param = Some(value);
            }
            _ if is_comment(&key) => {}
            _ => siblings.push((key, value)),
        }
    }

    // Both keys are present, the caller checked
    match (function, param) {
        (Some(function), Some(param)) => {
            function
                .validate(&param)
                .map_err(|source| Error::InvalidInvocation {
                    message: message.to_string(),
                    source: Box::new(source),
                })?;
            Ok(Node::Call(Invocation {
                function,
                param: params.insert(param),
                siblings,
            }))
        }
        _ => Err(Error::Config(format!(
            "incomplete function invocation in message \"{}\"",
            message
        ))),
    }
}
