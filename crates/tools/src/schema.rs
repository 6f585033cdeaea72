//! Schema derivation and argument normalization.
//!
//! Everything here is a pure function of its inputs: the same declared
//! parameters always produce the same schema bytes, and coercion never
//! touches anything but the value it is given.

use std::collections::HashMap;

use serde_json::{Map, Number, Value, json};
use wardline_core::error::ToolError;
use wardline_core::provider::ToolDefinition;
use wardline_core::tool::{ParamType, Tool, ToolArgs, ToolParam};

/// Build `{type: "object", properties, required}` from declared parameters.
/// Property order follows declaration order.
pub fn parameters_schema(params: &[ToolParam]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for p in params {
        let mut prop = Map::new();
        prop.insert("type".into(), Value::from(p.param_type.as_str()));
        if !p.description.is_empty() {
            prop.insert("description".into(), Value::from(p.description.clone()));
        }
        if let Some(default) = &p.default {
            prop.insert("default".into(), default.clone());
        }
        if !p.enum_values.is_empty() {
            prop.insert("enum".into(), Value::Array(p.enum_values.clone()));
        }
        properties.insert(p.name.clone(), Value::Object(prop));
        if p.required {
            required.push(Value::from(p.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The definition sent to the model for one tool. A raw schema wins over
/// declared parameters.
pub fn derive_definition(tool: &dyn Tool) -> ToolDefinition {
    let parameters = tool
        .raw_schema()
        .unwrap_or_else(|| parameters_schema(&tool.parameters()));
    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters,
    }
}

/// Coerce one argument value to its declared type.
///
/// Models routinely send `"3"` for an integer or `"true"` for a boolean;
/// those are accepted. Anything that would lose information is rejected.
pub fn coerce_value(value: &Value, ty: ParamType) -> Result<Value, String> {
    let mismatch = || format!("expected {ty}, got {value}");

    match (ty, value) {
        (_, Value::Null) => Err(format!("expected {ty}, got null")),

        (ParamType::String, Value::String(_)) => Ok(value.clone()),
        (ParamType::String, Value::Number(n)) => Ok(Value::from(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Ok(Value::from(b.to_string())),

        (ParamType::Integer, Value::Number(n)) => integer_from_number(n).ok_or_else(mismatch),
        (ParamType::Integer, Value::String(s)) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .and_then(|n| integer_from_number(&n))
                .ok_or_else(mismatch)
        }

        (ParamType::Number, Value::Number(_)) => Ok(value.clone()),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(mismatch),

        (ParamType::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        (ParamType::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(mismatch()),
        },

        (ParamType::Array, Value::Array(_)) => Ok(value.clone()),
        (ParamType::Object, Value::Object(_)) => Ok(value.clone()),
        (ParamType::Array | ParamType::Object, Value::String(s)) => {
            match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) if ty == ParamType::Array => Ok(parsed),
                Ok(parsed @ Value::Object(_)) if ty == ParamType::Object => Ok(parsed),
                _ => Err(mismatch()),
            }
        }

        _ => Err(mismatch()),
    }
}

fn integer_from_number(n: &Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return Some(Value::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Value::from(u));
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

/// Fill defaults, check required parameters, coerce types and enforce enums.
///
/// Unknown arguments are rejected when the tool declares parameters; a tool
/// with no declared parameters receives its arguments untouched.
pub fn validate_args(
    tool_name: &str,
    params: &[ToolParam],
    args: ToolArgs,
) -> Result<ToolArgs, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool_name: tool_name.to_string(),
        reason,
    };

    if params.is_empty() {
        return Ok(args);
    }

    if let Some(unknown) = args
        .keys()
        .find(|k| !params.iter().any(|p| &p.name == *k))
    {
        return Err(invalid(format!("unknown argument '{unknown}'")));
    }

    let mut out = ToolArgs::new();
    for p in params {
        let value = match args.get(&p.name) {
            Some(v) => v,
            None => match &p.default {
                Some(default) => {
                    out.insert(p.name.clone(), default.clone());
                    continue;
                }
                None if p.required => {
                    return Err(invalid(format!("missing required argument '{}'", p.name)));
                }
                None => continue,
            },
        };

        let coerced = coerce_value(value, p.param_type)
            .map_err(|e| invalid(format!("argument '{}': {e}", p.name)))?;

        if !p.enum_values.is_empty() && !p.enum_values.contains(&coerced) {
            return Err(invalid(format!(
                "argument '{}' must be one of {}, got {coerced}",
                p.name,
                Value::Array(p.enum_values.clone())
            )));
        }

        out.insert(p.name.clone(), coerced);
    }

    Ok(out)
}

/// First non-empty line of a doc string.
pub fn summary_line(doc: &str) -> Option<&str> {
    doc.lines().map(str::trim).find(|l| !l.is_empty())
}

/// Per-parameter descriptions from the `Args:` section of a Google-style
/// doc string. Accepts `name: text` and `name (type): text`; deeper
/// indented lines continue the previous entry; a line indented no deeper
/// than `Args:` ends the section.
pub fn parse_args_section(doc: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut args_indent: Option<usize> = None;
    let mut entry_indent: Option<usize> = None;
    let mut current: Option<(String, Vec<String>)> = None;

    for line in doc.lines() {
        let stripped = line.trim();
        let indent = line.len() - line.trim_start().len();

        let Some(section_indent) = args_indent else {
            if stripped.eq_ignore_ascii_case("args:") {
                args_indent = Some(indent);
            }
            continue;
        };

        if stripped.is_empty() {
            continue;
        }
        if indent <= section_indent {
            break;
        }

        let base = *entry_indent.get_or_insert(indent);
        match stripped.split_once(':') {
            Some((name_part, desc)) if indent <= base => {
                if let Some((name, parts)) = current.take() {
                    out.insert(name, parts.join(" "));
                }
                let name = name_part.split('(').next().unwrap_or("").trim().to_string();
                current = Some((name, vec![desc.trim().to_string()]));
            }
            _ => {
                if let Some((_, parts)) = current.as_mut() {
                    parts.push(stripped.to_string());
                }
            }
        }
    }

    if let Some((name, parts)) = current {
        out.insert(name, parts.join(" "));
    }
    out.retain(|name, _| !name.is_empty());
    out
}
