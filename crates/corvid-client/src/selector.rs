use serde_json::Value;
use std::fmt;

/// Field holding a pod's node assignment
pub const POD_HOST_FIELD: &str = "spec.nodeName";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    field: String,
    op: Operator,
    value: String,
}

/// Field selector restricting a list or watch to matching objects
///
/// Missing and null fields compare as the empty string, so
/// `spec.nodeName=` selects pods that have not been assigned yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<Requirement>,
}

impl FieldSelector {
    /// Selector that matches every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require `field == value`
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::everything().and_equals(field, value)
    }

    /// Require `field != value`
    pub fn not_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::everything().and_not_equals(field, value)
    }

    pub fn and_equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            field: field.into(),
            op: Operator::Equals,
            value: value.into(),
        });
        self
    }

    pub fn and_not_equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            field: field.into(),
            op: Operator::NotEquals,
            value: value.into(),
        });
        self
    }

    /// Pods whose assignment field is empty
    pub fn unassigned_pods() -> Self {
        Self::equals(POD_HOST_FIELD, "")
    }

    /// Pods whose assignment field is set
    pub fn assigned_pods() -> Self {
        Self::not_equals(POD_HOST_FIELD, "")
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Evaluate the selector against a serialized object
    pub fn matches(&self, object: &Value) -> bool {
        self.requirements.iter().all(|req| {
            let actual = lookup(object, &req.field);
            match req.op {
                Operator::Equals => actual == req.value,
                Operator::NotEquals => actual != req.value,
            }
        })
    }
}

/// Render the selector in query-string form (e.g. `spec.nodeName!=`)
impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            let op = match req.op {
                Operator::Equals => "=",
                Operator::NotEquals => "!=",
            };
            write!(f, "{}{}{}", req.field, op, req.value)?;
        }
        Ok(())
    }
}

fn lookup(object: &Value, field: &str) -> String {
    let mut current = object;
    for segment in field.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }

    match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
