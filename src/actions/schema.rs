//! 动作参数 Schema 与校验
//!
//! ArgSchema 描述每个参数的类型与是否必填，外加跨字段规则（如退房日期必须晚于入住日期）；
//! 类型、必填、未知参数与日期格式由 jsonschema 按 to_json_schema 的输出校验（编译一次后缓存），
//! 跨字段规则在其后检查。校验失败给出具体的参数名与原因，供推理适配器下一轮修正。
//! proposal_schema_json 用 schemars 生成「合法提案」的 JSON Schema，拼入 system prompt。

use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use jsonschema::error::ValidationErrorKind;
use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
    /// YYYY-MM-DD
    Date,
    Object,
}

#[derive(Clone, Debug, Serialize)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    pub description: String,
}

/// 跨字段规则
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ArgRule {
    /// later 必须严格晚于 earlier（两者都存在时检查）
    DateOrder { earlier: String, later: String },
    /// 至少提供其中一个参数
    AtLeastOne { names: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid argument '{argument}': {reason}")]
pub struct ValidationError {
    pub argument: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            argument: argument.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ArgSchema {
    fields: Vec<ArgSpec>,
    rules: Vec<ArgRule>,
    #[serde(skip)]
    compiled: Arc<OnceLock<Result<jsonschema::Validator, String>>>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ArgKind, description: &str) -> Self {
        self.field(name, kind, true, description)
    }

    pub fn optional(self, name: &str, kind: ArgKind, description: &str) -> Self {
        self.field(name, kind, false, description)
    }

    pub fn date_order(mut self, earlier: &str, later: &str) -> Self {
        self.compiled = Arc::default();
        self.rules.push(ArgRule::DateOrder {
            earlier: earlier.to_string(),
            later: later.to_string(),
        });
        self
    }

    pub fn at_least_one(mut self, names: &[&str]) -> Self {
        self.compiled = Arc::default();
        self.rules.push(ArgRule::AtLeastOne {
            names: names.iter().map(|n| n.to_string()).collect(),
        });
        self
    }

    fn field(mut self, name: &str, kind: ArgKind, required: bool, description: &str) -> Self {
        self.compiled = Arc::default();
        self.fields.push(ArgSpec {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        });
        self
    }

    pub fn fields(&self) -> &[ArgSpec] {
        &self.fields
    }

    /// 校验参数；null 参数视为空对象，值为 null 的键视为未提供
    pub fn validate(&self, args: &Value) -> Result<(), ValidationError> {
        let args = without_nulls(args);
        if let Some(error) = self.validator()?.iter_errors(&args).next() {
            return Err(from_schema_error(&error));
        }
        let Some(obj) = args.as_object() else {
            return Ok(());
        };

        for rule in &self.rules {
            match rule {
                ArgRule::DateOrder { earlier, later } => {
                    let start = obj.get(earlier).and_then(Value::as_str).and_then(parse_date);
                    let end = obj.get(later).and_then(Value::as_str).and_then(parse_date);
                    if let (Some(start), Some(end)) = (start, end) {
                        if end <= start {
                            return Err(ValidationError::new(
                                later,
                                format!("must be after {earlier} ({start}), got {end}"),
                            ));
                        }
                    }
                }
                ArgRule::AtLeastOne { names } => {
                    if !names.iter().any(|n| obj.contains_key(n)) {
                        return Err(ValidationError::new(
                            names.join("|"),
                            format!("at least one of {} must be provided", names.join(", ")),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validator(&self) -> Result<&jsonschema::Validator, ValidationError> {
        self.compiled
            .get_or_init(|| {
                jsonschema::options()
                    .should_validate_formats(true)
                    .build(&self.to_json_schema())
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| ValidationError::new("args", format!("argument schema is invalid: {e}")))
    }

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.fields {
            let mut prop = match spec.kind {
                ArgKind::String => json!({"type": "string", "pattern": "\\S"}),
                ArgKind::Integer => json!({"type": "integer"}),
                ArgKind::Number => json!({"type": "number"}),
                ArgKind::Boolean => json!({"type": "boolean"}),
                ArgKind::Date => json!({"type": "string", "format": "date"}),
                ArgKind::Object => json!({"type": "object"}),
            };
            if !spec.description.is_empty() {
                prop["description"] = Value::String(spec.description.clone());
            }
            properties.insert(spec.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

fn without_nulls(args: &Value) -> Value {
    match args {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// 把 jsonschema 的错误映射为参数名 + 原因；根对象上的错误记为 "args"
fn from_schema_error(error: &jsonschema::ValidationError<'_>) -> ValidationError {
    match &error.kind {
        ValidationErrorKind::Required { property } => {
            ValidationError::new(property.as_str().unwrap_or("args"), "is required")
        }
        ValidationErrorKind::AdditionalProperties { unexpected } => ValidationError::new(
            unexpected.first().map(String::as_str).unwrap_or("args"),
            "is not a recognised argument for this action",
        ),
        _ => {
            let path = error.instance_path.to_string();
            let argument = path
                .trim_start_matches('/')
                .split('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("args");
            ValidationError::new(argument, error.to_string())
        }
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// 将 patch 合并进 base（顶层键覆盖，patch 中的 null 删除该键）；patch 必须是 JSON 对象
pub fn merge_args(base: &Value, patch: &Value) -> Result<Value, ValidationError> {
    let Some(patch) = patch.as_object() else {
        return Err(ValidationError::new(
            "args",
            format!("expected a JSON object with the arguments to change, got {patch}"),
        ));
    };
    let mut merged = base.as_object().cloned().unwrap_or_default();
    for (k, v) in patch {
        if v.is_null() {
            merged.remove(k);
        } else {
            merged.insert(k.clone(), v.clone());
        }
    }
    Ok(Value::Object(merged))
}

/// 提案格式：与推理适配器解析的 `{"action": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ProposalFormat {
    /// 动作名，必须来自当前作用域的可用动作列表
    pub action: String,
    /// 动作参数，依动作不同而不同
    pub args: serde_json::Value,
}

/// 返回提案的 JSON Schema 字符串，可拼入 system prompt
pub fn proposal_schema_json() -> String {
    let schema = schema_for!(ProposalFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_schema() -> ArgSchema {
        ArgSchema::new()
            .required("hotel_id", ArgKind::Integer, "hotel to book")
            .required("checkin_date", ArgKind::Date, "")
            .required("checkout_date", ArgKind::Date, "")
            .date_order("checkin_date", "checkout_date")
    }

    #[test]
    fn test_valid_booking_passes() {
        let args = json!({"hotel_id": 1, "checkin_date": "2025-03-03", "checkout_date": "2025-03-05"});
        assert!(booking_schema().validate(&args).is_ok());
    }

    #[test]
    fn test_checkout_before_checkin_names_argument() {
        let args = json!({"hotel_id": 1, "checkin_date": "2025-03-05", "checkout_date": "2025-03-03"});
        let err = booking_schema().validate(&args).unwrap_err();
        assert_eq!(err.argument, "checkout_date");
        assert!(err.reason.contains("must be after checkin_date"));
    }

    #[test]
    fn test_missing_required_and_wrong_type() {
        let err = booking_schema()
            .validate(&json!({"checkin_date": "2025-03-03", "checkout_date": "2025-03-05"}))
            .unwrap_err();
        assert_eq!(err, ValidationError::new("hotel_id", "is required"));

        let err = booking_schema()
            .validate(&json!({"hotel_id": "one", "checkin_date": "2025-03-03", "checkout_date": "2025-03-05"}))
            .unwrap_err();
        assert_eq!(err.argument, "hotel_id");
    }

    #[test]
    fn test_bad_date_and_unknown_argument() {
        let err = booking_schema()
            .validate(&json!({"hotel_id": 1, "checkin_date": "March 3", "checkout_date": "2025-03-05"}))
            .unwrap_err();
        assert_eq!(err.argument, "checkin_date");

        let err = ArgSchema::new().validate(&json!({"surprise": true})).unwrap_err();
        assert_eq!(err.argument, "surprise");
    }

    #[test]
    fn test_non_object_and_blank_values() {
        let err = booking_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.argument, "args");

        let schema = ArgSchema::new()
            .required("location", ArgKind::String, "")
            .optional("price_tier", ArgKind::String, "");
        let err = schema.validate(&json!({"location": "   "})).unwrap_err();
        assert_eq!(err.argument, "location");
        assert!(schema.validate(&json!({"location": "Basel", "price_tier": null})).is_ok());
        let err = schema.validate(&json!({"location": null})).unwrap_err();
        assert_eq!(err, ValidationError::new("location", "is required"));
    }

    #[test]
    fn test_clone_reuses_compiled_validator() {
        let schema = booking_schema();
        let args = json!({"hotel_id": 1, "checkin_date": "2025-03-03", "checkout_date": "2025-03-05"});
        assert!(schema.validate(&args).is_ok());
        let copy = schema.clone();
        assert!(Arc::ptr_eq(&schema.compiled, &copy.compiled));
        assert!(copy.compiled.get().is_some());
        // 继续追加字段会重新编译
        let extended = copy.optional("note", ArgKind::String, "");
        assert!(extended.compiled.get().is_none());
    }

    #[test]
    fn test_at_least_one() {
        let schema = ArgSchema::new()
            .required("rental_id", ArgKind::Integer, "")
            .optional("start_date", ArgKind::Date, "")
            .optional("end_date", ArgKind::Date, "")
            .at_least_one(&["start_date", "end_date"]);
        assert!(schema.validate(&json!({"rental_id": 2})).is_err());
        assert!(schema.validate(&json!({"rental_id": 2, "end_date": "2025-01-02"})).is_ok());
    }

    #[test]
    fn test_merge_args_overrides_and_removes() {
        let merged = merge_args(
            &json!({"hotel_id": 1, "checkin_date": "2025-03-03", "note": "x"}),
            &json!({"checkin_date": "2025-03-04", "note": null}),
        )
        .unwrap();
        assert_eq!(merged, json!({"hotel_id": 1, "checkin_date": "2025-03-04"}));

        for patch in [json!("garbage"), json!([1, 2]), Value::Null] {
            let err = merge_args(&json!({"hotel_id": 1}), &patch).unwrap_err();
            assert_eq!(err.argument, "args");
        }
    }

    #[test]
    fn test_json_schema_lists_required() {
        let schema = booking_schema().to_json_schema();
        assert_eq!(schema["properties"]["checkin_date"]["format"], "date");
        assert_eq!(schema["required"].as_array().map(|a| a.len()), Some(3));
        assert_eq!(schema["additionalProperties"], false);
        assert!(proposal_schema_json().contains("action"));
    }
}
