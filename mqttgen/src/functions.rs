//! Catalog of the stateful value generators a payload template can invoke.
//!
//! Every generator receives the parameter bag of its invocation node by
//! mutable reference. The bag is the only memory a generator has, so any
//! state carried between two calls (current value, direction, cursor) lives
//! in it and is visible to SET commands.

use crate::errors::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use rand::Rng;
use serde_json::{Map, Value};
use std::f64::consts::PI;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Date,
    NextChoice,
    RandChoice,
    RandWalk,
    TriangleWave,
    RandUniform,
    RandGauss,
    Constant,
    Linear,
}

impl FromStr for Function {
    type Err = ();

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "date" => Ok(Function::Date),
            "nextChoice" => Ok(Function::NextChoice),
            "randChoice" => Ok(Function::RandChoice),
            "randWalk" => Ok(Function::RandWalk),
            "triangleWave" => Ok(Function::TriangleWave),
            "randUniform" => Ok(Function::RandUniform),
            "randGauss" => Ok(Function::RandGauss),
            "constant" => Ok(Function::Constant),
            "linear" => Ok(Function::Linear),
            _ => Err(()),
        }
    }
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Date => "date",
            Function::NextChoice => "nextChoice",
            Function::RandChoice => "randChoice",
            Function::RandWalk => "randWalk",
            Function::TriangleWave => "triangleWave",
            Function::RandUniform => "randUniform",
            Function::RandGauss => "randGauss",
            Function::Constant => "constant",
            Function::Linear => "linear",
        }
    }

    /// Check that `param` carries every field this function needs. Run once
    /// at load time; the same checks repeat on each call since SET commands
    /// may rewrite the bag afterwards.
    pub fn validate(self, param: &Value) -> Result<()> {
        if self == Function::RandChoice {
            return choices(param).map(|_| ());
        }

        let bag = param
            .as_object()
            .ok_or_else(|| Error::malformed(self.name(), "param", "expected an object"))?;

        match self {
            Function::Date => date_format(bag).map(|_| ()),
            Function::NextChoice => list_len(bag).map(|_| ()),
            Function::Constant => constant(bag).map(|_| ()),
            _ => {
                for field in self.numeric_fields() {
                    number(bag, self.name(), field)?;
                }
                if self == Function::RandWalk {
                    optional_number(bag, self.name(), "min")?;
                    optional_number(bag, self.name(), "max")?;
                }
                Ok(())
            }
        }
    }

    fn numeric_fields(self) -> &'static [&'static str] {
        match self {
            Function::RandWalk => &["cur", "rand"],
            Function::TriangleWave => &["cur", "delta", "min", "max"],
            Function::RandUniform => &["min", "max"],
            Function::RandGauss => &["mean", "sigma"],
            Function::Linear => &["cur", "delta"],
            _ => &[],
        }
    }

    /// Produce the next value, updating `param` in place.
    pub fn call(self, param: &mut Value, rng: &mut impl Rng, now: DateTime<Local>) -> Result<Value> {
        match self {
            Function::Date => date(object(self, param)?, now),
            Function::NextChoice => next_choice(object(self, param)?),
            Function::RandChoice => rand_choice(param, rng),
            Function::RandWalk => rand_walk(object(self, param)?, rng),
            Function::TriangleWave => triangle_wave(object(self, param)?),
            Function::RandUniform => rand_uniform(object(self, param)?, rng),
            Function::RandGauss => rand_gauss(object(self, param)?, rng),
            Function::Constant => constant(object(self, param)?),
            Function::Linear => linear(object(self, param)?),
        }
    }
}

fn object(function: Function, param: &mut Value) -> Result<&mut Map<String, Value>> {
    param
        .as_object_mut()
        .ok_or_else(|| Error::malformed(function.name(), "param", "expected an object"))
}

fn date(bag: &Map<String, Value>, now: DateTime<Local>) -> Result<Value> {
    let items = date_format(bag)?;
    Ok(Value::String(now.format_with_items(items.iter()).to_string()))
}

fn date_format(bag: &Map<String, Value>) -> Result<Vec<Item<'_>>> {
    let fmt = bag
        .get("fmt")
        .ok_or_else(|| Error::malformed("date", "fmt", "missing"))?
        .as_str()
        .ok_or_else(|| Error::malformed("date", "fmt", "expected a string"))?;

    let items: Vec<Item> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(Error::malformed("date", "fmt", format!("invalid format {:?}", fmt)));
    }
    Ok(items)
}

fn list_len(bag: &Map<String, Value>) -> Result<usize> {
    match bag.get("list") {
        Some(Value::Array(list)) if !list.is_empty() => Ok(list.len()),
        Some(Value::Array(_)) => Err(Error::malformed("nextChoice", "list", "empty list")),
        Some(_) => Err(Error::malformed("nextChoice", "list", "expected an array")),
        None => Err(Error::malformed("nextChoice", "list", "missing")),
    }
}

fn next_choice(bag: &mut Map<String, Value>) -> Result<Value> {
    let len = list_len(bag)?;

    // An out of range "last" (list shortened by a SET) restarts the cycle
    let next = match bag.get("last").and_then(Value::as_u64) {
        Some(last) if (last as usize) + 1 < len => last as usize + 1,
        _ => 0,
    };
    bag.insert("last".to_string(), Value::from(next));

    Ok(bag["list"][next].clone())
}

fn choices(param: &Value) -> Result<Vec<&Value>> {
    let choices: Vec<&Value> = match param {
        Value::Array(list) => list.iter().collect(),
        Value::Object(bag) => bag.values().collect(),
        _ => return Err(Error::malformed("randChoice", "param", "expected an array or object")),
    };
    if choices.is_empty() {
        return Err(Error::malformed("randChoice", "param", "nothing to choose from"));
    }
    Ok(choices)
}

fn rand_choice(param: &Value, rng: &mut impl Rng) -> Result<Value> {
    let choices = choices(param)?;
    Ok(choices[rng.gen_range(0..choices.len())].clone())
}

fn rand_walk(bag: &mut Map<String, Value>, rng: &mut impl Rng) -> Result<Value> {
    let spread = number(bag, "randWalk", "rand")?.as_f64();
    let mut cur = number(bag, "randWalk", "cur")?.as_f64() + uniform(rng, -spread, spread);

    if let Some(max) = optional_number(bag, "randWalk", "max")? {
        if cur > max.as_f64() {
            cur = max.as_f64();
        }
    }
    if let Some(min) = optional_number(bag, "randWalk", "min")? {
        if cur < min.as_f64() {
            cur = min.as_f64();
        }
    }

    bag.insert("cur".to_string(), Value::from(cur));
    Ok(Number::Float(cur).rounded(6))
}

fn triangle_wave(bag: &mut Map<String, Value>) -> Result<Value> {
    let delta = number(bag, "triangleWave", "delta")?;
    let min = number(bag, "triangleWave", "min")?;
    let max = number(bag, "triangleWave", "max")?;
    let mut cur = number(bag, "triangleWave", "cur")?.add(delta);

    if cur.as_f64() > max.as_f64() {
        cur = max;
        bag.insert("delta".to_string(), delta.negate().into_value());
    } else if cur.as_f64() < min.as_f64() {
        cur = min;
        bag.insert("delta".to_string(), delta.negate().into_value());
    }

    bag.insert("cur".to_string(), cur.into_value());
    Ok(cur.rounded(6))
}

fn rand_uniform(bag: &Map<String, Value>, rng: &mut impl Rng) -> Result<Value> {
    let min = number(bag, "randUniform", "min")?.as_f64();
    let max = number(bag, "randUniform", "max")?.as_f64();
    Ok(Number::Float(uniform(rng, min, max)).rounded(2))
}

fn rand_gauss(bag: &Map<String, Value>, rng: &mut impl Rng) -> Result<Value> {
    let mean = number(bag, "randGauss", "mean")?.as_f64();
    let sigma = number(bag, "randGauss", "sigma")?.as_f64();

    // Box-Muller; x is drawn from (0, 1] so ln(x) stays finite
    let x = 1.0 - rng.gen::<f64>();
    let y = rng.gen::<f64>();
    let z = (-2.0 * x.ln()).sqrt() * (2.0 * PI * y).cos();

    Ok(Number::Float(z * sigma + mean).rounded(2))
}

fn constant(bag: &Map<String, Value>) -> Result<Value> {
    bag.get("cur")
        .cloned()
        .ok_or_else(|| Error::malformed("constant", "cur", "missing"))
}

fn linear(bag: &mut Map<String, Value>) -> Result<Value> {
    let delta = number(bag, "linear", "delta")?;
    let cur = number(bag, "linear", "cur")?.add(delta).into_value();
    bag.insert("cur".to_string(), cur.clone());
    Ok(cur)
}

fn uniform(rng: &mut impl Rng, min: f64, max: f64) -> f64 {
    min + rng.gen::<f64>() * (max - min)
}

/// Numeric bag field. Integers stay integers until mixed with a float.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match a.checked_add(b) {
                Some(sum) => Number::Int(sum),
                None => Number::Float(a as f64 + b as f64),
            },
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn negate(self) -> Number {
        match self {
            Number::Int(i) => i.checked_neg().map_or(Number::Float(-(i as f64)), Number::Int),
            Number::Float(f) => Number::Float(-f),
        }
    }

    fn rounded(self, decimals: i32) -> Value {
        match self {
            Number::Int(i) => Value::from(i),
            Number::Float(f) => {
                let scale = 10f64.powi(decimals);
                Value::from((f * scale).round() / scale)
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::from(i),
            Number::Float(f) => Value::from(f),
        }
    }
}

fn optional_number(
    bag: &Map<String, Value>,
    function: &'static str,
    field: &str,
) -> Result<Option<Number>> {
    match bag.get(field) {
        None => Ok(None),
        Some(value) => {
            if let Some(i) = value.as_i64() {
                Ok(Some(Number::Int(i)))
            } else if let Some(f) = value.as_f64().filter(|f| f.is_finite()) {
                Ok(Some(Number::Float(f)))
            } else {
                Err(Error::malformed(function, field, format!("expected a number, got {}", value)))
            }
        }
    }
}

fn number(bag: &Map<String, Value>, function: &'static str, field: &str) -> Result<Number> {
    optional_number(bag, function, field)?.ok_or_else(|| Error::malformed(function, field, "missing"))
}
