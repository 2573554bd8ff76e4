use getset::{CopyGetters, Getters};
use portico_api::conditions::ConditionStatus;
use serde_json::{Value, json};

/// One `metav1.Condition`, minus `lastTransitionTime` which is derived while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct StatusCondition {
    #[getset(get = "pub")]
    type_: String,

    #[getset(get_copy = "pub")]
    status: ConditionStatus,

    #[getset(get = "pub")]
    reason: String,

    #[getset(get = "pub")]
    message: String,

    #[getset(get_copy = "pub")]
    observed_generation: Option<i64>,
}

impl StatusCondition {
    pub fn new<T, R, M>(
        type_: T,
        status: bool,
        reason: R,
        message: M,
        observed_generation: Option<i64>,
    ) -> Self
    where
        T: Into<&'static str>,
        R: Into<&'static str>,
        M: Into<String>,
    {
        Self {
            type_: type_.into().to_string(),
            status: ConditionStatus::from(status),
            reason: reason.into().to_string(),
            message: message.into(),
            observed_generation,
        }
    }

    /// Whether `existing` carries the same content, ignoring `lastTransitionTime`.
    pub fn matches(&self, existing: &Value) -> bool {
        let status: &'static str = self.status.into();
        str_field(existing, "type") == Some(self.type_.as_str())
            && str_field(existing, "status") == Some(status)
            && str_field(existing, "reason") == Some(self.reason.as_str())
            && str_field(existing, "message").unwrap_or_default() == self.message
            && existing.get("observedGeneration").and_then(Value::as_i64) == self.observed_generation
    }

    /// Renders the condition, keeping the previous transition time when the status held.
    pub fn render(&self, previous: Option<&Value>, now: &str) -> Value {
        let status: &'static str = self.status.into();
        let last_transition_time = previous
            .filter(|previous| str_field(previous, "status") == Some(status))
            .and_then(|previous| str_field(previous, "lastTransitionTime"))
            .unwrap_or(now);

        let mut condition = json!({
            "type": self.type_,
            "status": status,
            "reason": self.reason,
            "message": self.message,
            "lastTransitionTime": last_transition_time,
        });
        if let Some(observed_generation) = self.observed_generation {
            condition["observedGeneration"] = json!(observed_generation);
        }
        condition
    }
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

/// The `conditions` array of a status object, or nothing.
pub fn conditions_of(status: &Value) -> &[Value] {
    status
        .get("conditions")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// Same set of conditions, regardless of order and transition times.
pub fn conditions_match(desired: &[StatusCondition], existing: &[Value]) -> bool {
    desired.len() == existing.len()
        && desired
            .iter()
            .all(|condition| existing.iter().any(|current| condition.matches(current)))
}

pub fn render_conditions(desired: &[StatusCondition], existing: &[Value], now: &str) -> Vec<Value> {
    desired
        .iter()
        .map(|condition| {
            let previous = existing
                .iter()
                .find(|current| str_field(current, "type") == Some(condition.type_.as_str()));
            condition.render(previous, now)
        })
        .collect()
}
