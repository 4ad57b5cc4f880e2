//! GET/SET command discovery and dispatch.
//!
//! Discovery runs once on the classified message set and returns a
//! [`Router`]: a table from subscribed topic to the command it triggers. SET
//! bindings hold the [`ParamId`] of the bag they overwrite, the same handle
//! the evaluator reads through.

use crate::errors::{Error, Result};
use crate::template::{MessageSet, Node, ParamId, ParamStore, GET_KEY, SET_PREFIX};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Evaluate and publish the message at this index.
    Get { message: usize },
    /// Overwrite `field` of the bag `param`.
    Set { param: ParamId, field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// No binding for the topic.
    Ignored,
    Updated { field: String, value: Value },
    Publish { message: usize },
}

/// Every topic the configuration uses, publish and subscribe alike.
#[derive(Debug, Default)]
struct TopicRegistry {
    topics: HashSet<String>,
}

impl TopicRegistry {
    fn claim(&mut self, topic: &str) -> Result<()> {
        if !self.topics.insert(topic.to_string()) {
            return Err(Error::DuplicateTopic(topic.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Router {
    bindings: HashMap<String, Command>,
    /// Subscription order, as discovered.
    topics: Vec<String>,
}

impl Router {
    /// Scan `set` for `get` and `set:<topic>` keys.
    pub fn discover(set: &MessageSet) -> Result<Self> {
        let mut registry = TopicRegistry::default();
        for message in &set.messages {
            registry.claim(&message.topic)?;
        }

        let mut router = Router::default();
        for (index, message) in set.messages.iter().enumerate() {
            let mut scan = Scan {
                message: index,
                key: &message.key,
                params: &set.params,
                registry: &mut registry,
                router: &mut router,
            };
            for (key, value) in &message.extra {
                scan.entry(key, value, None)?;
            }
            scan.node(&message.payload)?;
        }

        Ok(router)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn command(&self, topic: &str) -> Option<&Command> {
        self.bindings.get(topic)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Handle one inbound broker message. SET commands are applied to
    /// `params` right away; GET commands are handed back to the caller.
    pub fn dispatch(&self, topic: &str, payload: &[u8], params: &mut ParamStore) -> Result<Dispatch> {
        match self.command(topic) {
            None => Ok(Dispatch::Ignored),
            Some(Command::Get { message }) => Ok(Dispatch::Publish { message: *message }),
            Some(Command::Set { param, field }) => {
                let value: Value =
                    serde_json::from_slice(payload).map_err(|source| Error::CommandPayload {
                        topic: topic.to_string(),
                        source,
                    })?;

                // Discovery only binds object bags
                if let Some(bag) = params.get_mut(*param).as_object_mut() {
                    bag.insert(field.clone(), value.clone());
                }

                Ok(Dispatch::Updated {
                    field: field.clone(),
                    value,
                })
            }
        }
    }

    fn bind(&mut self, registry: &mut TopicRegistry, topic: &str, command: Command) -> Result<()> {
        registry.claim(topic)?;
        debug!("Binding {} to {:?}", topic, command);
        self.topics.push(topic.to_string());
        self.bindings.insert(topic.to_string(), command);
        Ok(())
    }
}

/// Discovery state for one message definition.
struct Scan<'a> {
    message: usize,
    key: &'a str,
    params: &'a ParamStore,
    registry: &'a mut TopicRegistry,
    router: &'a mut Router,
}

impl Scan<'_> {
    fn node(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Scalar(_) => Ok(()),
            Node::Seq(items) => items.iter().try_for_each(|item| self.node(item)),
            Node::Map(children) => {
                for (key, child) in children {
                    if key == GET_KEY {
                        if let Node::Scalar(value) = child {
                            self.entry(key, value, None)?;
                            continue;
                        }
                    } else if key.starts_with(SET_PREFIX) {
                        return Err(self.missing_target(key, child));
                    }
                    self.node(child)?;
                }
                Ok(())
            }
            Node::Call(call) => {
                for (key, value) in &call.siblings {
                    self.entry(key, value, Some(call.param))?;
                }
                let params = self.params;
                self.bag_value(params.get(call.param))
            }
        }
    }

    /// Raw JSON inside a parameter bag. Only `get` keys bind there; a `set:`
    /// key has no sibling bag to target.
    fn bag_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Array(items) => items.iter().try_for_each(|item| self.bag_value(item)),
            Value::Object(map) => {
                for (key, child) in map {
                    if key == GET_KEY && child.is_string() {
                        self.entry(key, child, None)?;
                    } else if key.starts_with(SET_PREFIX) {
                        return Err(self.missing_target(key, &Node::Scalar(child.clone())));
                    } else {
                        self.bag_value(child)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// A raw key/value pair that may be a command directive. `param` is the
    /// sibling parameter bag, if any.
    fn entry(&mut self, key: &str, value: &Value, param: Option<ParamId>) -> Result<()> {
        if key == GET_KEY {
            let topic = self.topic_value(key, value)?;
            let command = Command::Get {
                message: self.message,
            };
            return self.router.bind(self.registry, topic, command);
        }

        let Some(topic) = key.strip_prefix(SET_PREFIX) else {
            debug!("Ignoring key {} in message {}", key, self.key);
            return Ok(());
        };
        let field = value.as_str().ok_or_else(|| self.missing_target_value(value))?;
        let param = param
            .filter(|id| {
                self.params
                    .get(*id)
                    .as_object()
                    .is_some_and(|bag| bag.contains_key(field))
            })
            .ok_or_else(|| Error::MissingSetTarget {
                message: self.key.to_string(),
                field: field.to_string(),
            })?;

        let command = Command::Set {
            param,
            field: field.to_string(),
        };
        self.router.bind(self.registry, topic, command)
    }

    fn topic_value<'v>(&self, key: &str, value: &'v Value) -> Result<&'v str> {
        match value.as_str() {
            Some(topic) if !topic.is_empty() => Ok(topic),
            _ => Err(Error::Config(format!(
                "\"{}\" in message \"{}\" must be a non-empty topic string, got {}",
                key, self.key, value
            ))),
        }
    }

    fn missing_target(&self, key: &str, child: &Node) -> Error {
        let field = match child {
            Node::Scalar(Value::String(field)) => field.clone(),
            _ => key.to_string(),
        };
        Error::MissingSetTarget {
            message: self.key.to_string(),
            field,
        }
    }

    fn missing_target_value(&self, value: &Value) -> Error {
        Error::MissingSetTarget {
            message: self.key.to_string(),
            field: value.to_string(),
        }
    }
}
