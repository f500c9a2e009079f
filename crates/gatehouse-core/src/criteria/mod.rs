//! Measure filter expressions of the form `metric OPERATOR value`, joined
//! with `and`, e.g. `ncloc > 10 and coverage <= 80`.

use std::fmt;

use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "criteria/grammar.pest"]
struct CriteriaParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CriteriaError {
    #[error("Invalid criterion '{0}'")]
    InvalidCriterion(String),
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Lte,
    Gt,
    Eq,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Result<Self, CriteriaError> {
        match symbol {
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            "=" => Ok(Operator::Eq),
            other => Err(CriteriaError::UnknownOperator(other.to_string())),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Eq => "=",
        }
    }

    pub fn matches(&self, actual: f64, expected: f64) -> bool {
        match self {
            Operator::Lte => actual <= expected,
            Operator::Gt => actual > expected,
            Operator::Eq => actual == expected,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricCriterion {
    pub metric_key: String,
    pub operator: Operator,
    pub value: f64,
}

pub fn parse_criteria(input: &str) -> Result<Vec<MetricCriterion>, CriteriaError> {
    split_conjunction(input)
        .iter()
        .map(|criterion| parse_criterion(criterion))
        .collect()
}

fn split_conjunction(input: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in input.split_whitespace() {
        if word.eq_ignore_ascii_case("and") {
            criteria.push(current.join(" "));
            current.clear();
        } else {
            current.push(word);
        }
    }
    if !current.is_empty() || !criteria.is_empty() {
        criteria.push(current.join(" "));
    }

    criteria
}

fn parse_criterion(text: &str) -> Result<MetricCriterion, CriteriaError> {
    let invalid = || CriteriaError::InvalidCriterion(text.to_string());

    let pair = CriteriaParser::parse(Rule::criterion, text)
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)?;

    let mut metric_key = None;
    let mut operator = None;
    let mut value = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::metric => metric_key = Some(inner.as_str().to_lowercase()),
            Rule::operator => operator = Some(Operator::from_symbol(inner.as_str())?),
            Rule::value => value = Some(inner.as_str().parse::<f64>().map_err(|_| invalid())?),
            _ => {}
        }
    }

    Ok(MetricCriterion {
        metric_key: metric_key.ok_or_else(invalid)?,
        operator: operator.ok_or_else(invalid)?,
        value: value.ok_or_else(invalid)?,
    })
}
