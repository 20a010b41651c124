//! Declarative description of a stage's tunable parameters.
//!
//! A [`StageConfiguration`] is built once at startup and validated then; request
//! paths only read it.

use crate::error::{PipelineError, SchemaError};
use crate::models::{normalize_file_type, AppliedConfig, ConfigMap, HASH_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_GROUP: &str = "basic";

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

impl FieldOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Toggle,
    Select {
        options: Vec<FieldOption>,
    },
    MultiSelect {
        options: Vec<FieldOption>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
    },
    Range {
        min: f64,
        max: f64,
        step: Option<f64>,
    },
    Text {
        placeholder: Option<String>,
    },
    TextArea {
        placeholder: Option<String>,
        rows: Option<u32>,
    },
}

/// Show a field only while another field holds one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDependency {
    pub field: String,
    pub values: Vec<Value>,
}

impl FieldDependency {
    pub fn is_satisfied_by(&self, config: &ConfigMap) -> bool {
        match config.get(&self.field) {
            Some(Value::Array(items)) => items.iter().any(|item| self.values.contains(item)),
            Some(value) => self.values.contains(value),
            None => false,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub default: Value,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_group")]
    pub group: String,
    pub dependency: Option<FieldDependency>,
}

impl FieldSchema {
    fn with_kind(name: &str, label: &str, kind: FieldKind, default: Value) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            description: None,
            kind,
            default,
            required: false,
            group: default_group(),
            dependency: None,
        }
    }

    pub fn toggle(name: &str, label: &str, default: bool) -> Self {
        Self::with_kind(name, label, FieldKind::Toggle, Value::Bool(default))
    }

    pub fn select(name: &str, label: &str, options: Vec<FieldOption>, default: &str) -> Self {
        Self::with_kind(
            name,
            label,
            FieldKind::Select { options },
            Value::String(default.to_string()),
        )
    }

    pub fn multi_select(
        name: &str,
        label: &str,
        options: Vec<FieldOption>,
        default: &[&str],
    ) -> Self {
        let default = default
            .iter()
            .map(|value| Value::String((*value).to_string()))
            .collect();
        Self::with_kind(
            name,
            label,
            FieldKind::MultiSelect { options },
            Value::Array(default),
        )
    }

    pub fn number(name: &str, label: &str, default: impl Into<Value>) -> Self {
        Self::with_kind(
            name,
            label,
            FieldKind::Number {
                min: None,
                max: None,
                step: None,
            },
            default.into(),
        )
    }

    pub fn range(name: &str, label: &str, min: f64, max: f64, default: f64) -> Self {
        Self::with_kind(
            name,
            label,
            FieldKind::Range {
                min,
                max,
                step: None,
            },
            Value::from(default),
        )
    }

    pub fn text(name: &str, label: &str, default: &str) -> Self {
        Self::with_kind(
            name,
            label,
            FieldKind::Text { placeholder: None },
            Value::String(default.to_string()),
        )
    }

    pub fn text_area(name: &str, label: &str, default: &str, rows: u32) -> Self {
        Self::with_kind(
            name,
            label,
            FieldKind::TextArea {
                placeholder: None,
                rows: Some(rows),
            },
            Value::String(default.to_string()),
        )
    }

    /// Sets numeric bounds. Has no effect on non-numeric kinds.
    pub fn bounded(mut self, lower: f64, upper: f64, increment: f64) -> Self {
        match &mut self.kind {
            FieldKind::Number { min, max, step } => {
                *min = Some(lower);
                *max = Some(upper);
                *step = Some(increment);
            }
            FieldKind::Range { min, max, step } => {
                *min = lower;
                *max = upper;
                *step = Some(increment);
            }
            _ => {}
        }
        self
    }

    pub fn with_placeholder(mut self, text: &str) -> Self {
        if let FieldKind::Text { placeholder } | FieldKind::TextArea { placeholder, .. } =
            &mut self.kind
        {
            *placeholder = Some(text.to_string());
        }
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn depends_on<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.dependency = Some(FieldDependency {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn options(&self) -> &[FieldOption] {
        match &self.kind {
            FieldKind::Select { options } | FieldKind::MultiSelect { options } => options,
            _ => &[],
        }
    }

    pub fn is_visible(&self, config: &ConfigMap) -> bool {
        self.dependency
            .as_ref()
            .map_or(true, |dependency| dependency.is_satisfied_by(config))
    }

    /// Checks a value against this field's kind. The error is a human-readable reason.
    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Err(if self.required {
                "a value is required".to_string()
            } else {
                "null is not a value, omit the key to keep the default".to_string()
            });
        }

        match &self.kind {
            FieldKind::Toggle => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| format!("expected a boolean, got {value}")),
            FieldKind::Select { options } => {
                let chosen = value
                    .as_str()
                    .ok_or_else(|| format!("expected a string, got {value}"))?;
                check_option(options, chosen)
            }
            FieldKind::MultiSelect { options } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected a list, got {value}"))?;
                for item in items {
                    let chosen = item
                        .as_str()
                        .ok_or_else(|| format!("expected a string, got {item}"))?;
                    check_option(options, chosen)?;
                }
                Ok(())
            }
            FieldKind::Number { min, max, step } => {
                let number = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {value}"))?;
                check_bounds(number, *min, *max)?;
                check_step(number, min.unwrap_or(0.0), *step)
            }
            FieldKind::Range { min, max, step } => {
                let number = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {value}"))?;
                check_bounds(number, Some(*min), Some(*max))?;
                check_step(number, *min, *step)
            }
            FieldKind::Text { .. } | FieldKind::TextArea { .. } => {
                let text = value
                    .as_str()
                    .ok_or_else(|| format!("expected a string, got {value}"))?;
                if self.required && text.trim().is_empty() {
                    return Err("a value is required".to_string());
                }
                Ok(())
            }
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidField {
            field: self.name.clone(),
            reason,
        };

        if self.label.trim().is_empty() {
            return Err(SchemaError::EmptyFieldLabel(self.name.clone()));
        }
        if self.group.trim().is_empty() {
            return Err(invalid("empty group".to_string()));
        }

        match &self.kind {
            FieldKind::Select { options } | FieldKind::MultiSelect { options } => {
                if options.is_empty() {
                    return Err(invalid("select without options".to_string()));
                }
                let mut seen = HashSet::new();
                for option in options {
                    if !seen.insert(option.value.as_str()) {
                        return Err(invalid(format!("duplicate option '{}'", option.value)));
                    }
                }
            }
            FieldKind::Number {
                min: Some(min),
                max: Some(max),
                ..
            }
            | FieldKind::Range { min, max, .. }
                if min > max =>
            {
                return Err(invalid(format!("min {min} is above max {max}")));
            }
            _ => {}
        }

        if let FieldKind::Number {
            step: Some(step), ..
        }
        | FieldKind::Range {
            step: Some(step), ..
        } = &self.kind
        {
            if *step <= 0.0 {
                return Err(invalid(format!("step {step} must be positive")));
            }
        }

        self.check_value(&self.default)
            .map_err(|reason| invalid(format!("default: {reason}")))
    }
}

fn check_option(options: &[FieldOption], chosen: &str) -> Result<(), String> {
    if options.iter().any(|option| option.value == chosen) {
        Ok(())
    } else {
        let known = options
            .iter()
            .map(|option| option.value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(format!("'{chosen}' is not one of [{known}]"))
    }
}

fn check_bounds(number: f64, min: Option<f64>, max: Option<f64>) -> Result<(), String> {
    if let Some(min) = min {
        if number < min {
            return Err(format!("{number} is below minimum {min}"));
        }
    }
    if let Some(max) = max {
        if number > max {
            return Err(format!("{number} is above maximum {max}"));
        }
    }
    Ok(())
}

/// Values sit on the grid `origin + n * step`.
fn check_step(number: f64, origin: f64, step: Option<f64>) -> Result<(), String> {
    let Some(step) = step else {
        return Ok(());
    };
    let units = (number - origin) / step;
    if (units - units.round()).abs() > 1e-6 {
        return Err(format!("{number} is not a multiple of {step} from {origin}"));
    }
    Ok(())
}

/// A field's current value, as shown in one group of a configuration form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReading {
    pub group: String,
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageConfiguration {
    name: String,
    description: String,
    fields: Vec<FieldSchema>,
    default_config: ConfigMap,
    group_order: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    allowed_extensions: Vec<String>,
}

impl StageConfiguration {
    pub fn new(
        name: &str,
        description: &str,
        fields: Vec<FieldSchema>,
    ) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::NoFields(name.to_string()));
        }

        let mut seen = HashSet::new();
        for (position, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(SchemaError::EmptyFieldName(position));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            field.validate()?;
        }
        check_dependencies(&fields)?;

        let default_config = fields
            .iter()
            .map(|field| (field.name.clone(), field.default.clone()))
            .collect::<ConfigMap>();
        if default_config.is_empty() {
            return Err(SchemaError::EmptyDefaults(name.to_string()));
        }

        let mut group_order: Vec<String> = Vec::new();
        for field in &fields {
            if !group_order.contains(&field.group) {
                group_order.push(field.group.clone());
            }
        }

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            fields,
            default_config,
            group_order,
            allowed_extensions: Vec::new(),
        })
    }

    /// Replaces the display order of groups. Groups left out are hidden from
    /// [`StageConfiguration::filtered_read`].
    pub fn with_group_order(mut self, order: &[&str]) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for group in order {
            if !seen.insert(*group) {
                return Err(SchemaError::InvalidGroupOrder {
                    config: self.name.clone(),
                    reason: format!("group '{group}' listed twice"),
                });
            }
            if !self.fields.iter().any(|field| field.group == *group) {
                return Err(SchemaError::InvalidGroupOrder {
                    config: self.name.clone(),
                    reason: format!("no field belongs to group '{group}'"),
                });
            }
        }
        self.group_order = order.iter().map(|group| (*group).to_string()).collect();
        Ok(self)
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Result<Self, SchemaError> {
        let extensions = extensions
            .iter()
            .map(|extension| normalize_file_type(extension))
            .filter(|extension| !extension.is_empty())
            .collect::<Vec<_>>();
        if extensions.is_empty() {
            return Err(SchemaError::NoExtensions(self.name.clone()));
        }
        self.allowed_extensions = extensions;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn default_config(&self) -> &ConfigMap {
        &self.default_config
    }

    pub fn group_order(&self) -> &[String] {
        &self.group_order
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn accepts_file_type(&self, file_type: &str) -> bool {
        let file_type = normalize_file_type(file_type);
        self.allowed_extensions.iter().any(|allowed| *allowed == file_type)
    }

    /// The stage defaults, hashed.
    pub fn default_applied(&self) -> AppliedConfig {
        AppliedConfig::new(self.default_config.clone())
    }

    pub fn filtered_read(&self, applied: &ConfigMap) -> Vec<FieldReading> {
        self.filtered_read_with(applied, &self.group_order)
    }

    /// Values of the fields that belong to `group_order`, group by group. Keys
    /// missing from the applied map read as their default.
    pub fn filtered_read_with(&self, applied: &ConfigMap, group_order: &[String]) -> Vec<FieldReading> {
        let mut readings = Vec::new();
        for group in group_order {
            for field in self.fields.iter().filter(|field| field.group == *group) {
                let Some(default) = self.default_config.get(&field.name) else {
                    continue;
                };
                readings.push(FieldReading {
                    group: group.clone(),
                    name: field.name.clone(),
                    value: applied.get(&field.name).unwrap_or(default).clone(),
                });
            }
        }
        readings
    }

    /// Merges `requested` over the defaults and checks every value against its field.
    pub fn resolve(&self, requested: &ConfigMap) -> Result<AppliedConfig, PipelineError> {
        let mut values = self.default_config.clone();
        for (key, value) in requested {
            if key == HASH_KEY {
                continue;
            }
            let field = self.field(key).ok_or_else(|| {
                PipelineError::validation(format!(
                    "unknown field '{key}' for configuration '{}'",
                    self.name
                ))
            })?;
            field
                .check_value(value)
                .map_err(|reason| PipelineError::validation(format!("{key}: {reason}")))?;
            values.insert(key.clone(), value.clone());
        }

        for field in self.fields.iter().filter(|field| field.required) {
            let value = values.get(&field.name).unwrap_or(&Value::Null);
            field
                .check_value(value)
                .map_err(|reason| PipelineError::validation(format!("{}: {reason}", field.name)))?;
        }

        Ok(AppliedConfig::new(values))
    }

    pub fn visible_fields(&self, config: &ConfigMap) -> Vec<&FieldSchema> {
        self.fields
            .iter()
            .filter(|field| field.is_visible(config))
            .collect()
    }
}

fn check_dependencies(fields: &[FieldSchema]) -> Result<(), SchemaError> {
    let parents = fields
        .iter()
        .filter_map(|field| {
            field
                .dependency
                .as_ref()
                .map(|dependency| (field.name.as_str(), dependency.field.as_str()))
        })
        .collect::<HashMap<_, _>>();

    for (field, depends_on) in &parents {
        if field == depends_on {
            return Err(SchemaError::CyclicDependency((*field).to_string()));
        }
        if !fields.iter().any(|candidate| candidate.name == *depends_on) {
            return Err(SchemaError::UnknownDependency {
                field: (*field).to_string(),
                depends_on: (*depends_on).to_string(),
            });
        }
    }

    // Each field has at most one parent, so a cycle shows up as a revisit
    // while walking up the chain.
    for start in parents.keys() {
        let mut visited = HashSet::new();
        let mut current = *start;
        while let Some(parent) = parents.get(current) {
            if !visited.insert(current) {
                return Err(SchemaError::CyclicDependency(current.to_string()));
            }
            current = *parent;
        }
    }
    Ok(())
}
