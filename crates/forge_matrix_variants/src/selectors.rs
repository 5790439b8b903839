//! Line selectors in variant and migration files.
//!
//! Pinning files and migrations use conda-build style line selectors:
//!
//! ```yaml
//! python:
//!   - 3.8.* *_cpython
//!   - 3.7.* *_cpython    # [not (osx and arm64)]
//! ```
//!
//! A line whose selector evaluates to false is dropped before the document is
//! parsed. Only `os.environ.get(...)` is supported as a function call.

use std::collections::BTreeMap;

use minijinja::{Environment, Value};
use rattler_conda_types::Platform;

use crate::error::VariantParseError;

/// The platforms selectors are evaluated against.
#[derive(Clone, Debug)]
pub struct SelectorConfig {
    /// The platform the configs are rendered for
    pub target_platform: Platform,
    /// The platform the build runs on
    pub build_platform: Platform,
    /// Extra variables available to selectors
    pub variant: BTreeMap<String, String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

impl SelectorConfig {
    /// A config that builds natively for `target_platform`.
    pub fn new(target_platform: Platform) -> Self {
        Self {
            target_platform,
            build_platform: target_platform,
            variant: BTreeMap::new(),
        }
    }

    /// The variables a selector can refer to.
    pub fn into_context(self) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::<String, Value>::new();

        context.insert(
            "target_platform".to_string(),
            Value::from_safe_string(self.target_platform.to_string()),
        );
        context.insert(
            "build_platform".to_string(),
            Value::from_safe_string(self.build_platform.to_string()),
        );
        context.insert(
            "unix".to_string(),
            Value::from(self.target_platform.is_unix()),
        );
        context.insert(
            "win".to_string(),
            Value::from(self.target_platform.is_windows()),
        );
        context.insert(
            "osx".to_string(),
            Value::from(self.target_platform.is_osx()),
        );
        context.insert(
            "linux".to_string(),
            Value::from(self.target_platform.is_linux()),
        );

        if let Some(arch) = self.target_platform.arch() {
            context.insert(arch.to_string(), Value::from(true));
        }

        // `linux64`, `osxarm64`, `win64`, ...
        context.insert(
            self.target_platform.to_string().replace('-', ""),
            Value::from(true),
        );

        for (key, v) in self.variant {
            context.insert(key, Value::from_safe_string(v));
        }

        context
    }
}

#[derive(Debug, PartialEq)]
struct ParsedLine<'a> {
    content: &'a str,
    condition: Option<&'a str>,
}

fn parse_line(line: &str) -> ParsedLine<'_> {
    let (content, comment) = match line.split_once('#') {
        Some((content, comment)) => (content, Some(comment)),
        None => (line, None),
    };
    let condition = comment
        .map(str::trim)
        .and_then(|c| c.strip_prefix('[')?.strip_suffix(']'))
        .map(str::trim);

    ParsedLine {
        content: content.trim_end(),
        condition,
    }
}

fn evaluate_condition(
    condition: &str,
    env: &Environment,
    context: &BTreeMap<String, Value>,
) -> Result<bool, VariantParseError> {
    if condition.is_empty() {
        return Ok(true);
    }
    let template = format!("{{% if {condition} %}}true{{% else %}}false{{% endif %}}");
    let rendered =
        env.render_str(&template, context)
            .map_err(|source| VariantParseError::Selector {
                selector: condition.to_string(),
                source,
            })?;
    Ok(rendered == "true")
}

fn split_leading_whitespace(s: &str) -> (&str, &str) {
    let rest = s.trim_start();
    (&s[..s.len() - rest.len()], rest)
}

/// Quote a plain scalar that YAML would read as a number.
fn quote_numeric_scalar(scalar: &str) -> String {
    let is_number = !scalar.starts_with(['&', '*', '!', '|', '>'])
        && matches!(
            serde_yaml::from_str::<serde_yaml::Value>(scalar),
            Ok(serde_yaml::Value::Number(_))
        );
    if is_number {
        format!("\"{scalar}\"")
    } else {
        scalar.to_string()
    }
}

/// Quote the numeric scalars of one YAML node: block items, mapping values
/// and single-line flow lists. Everything else is kept as written.
fn quote_numeric_node(node: &str) -> String {
    if let Some(item) = node.strip_prefix('-').filter(|rest| rest.starts_with(' ')) {
        let (space, item) = split_leading_whitespace(item);
        return format!("-{space}{}", quote_numeric_node(item));
    }
    if let Some(items) = node.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
        if items.contains(['[', '{', '"', '\'']) {
            return node.to_string();
        }
        let items = items
            .split(',')
            .map(|item| {
                let (space, item) = split_leading_whitespace(item);
                let scalar = item.trim_end();
                format!(
                    "{space}{}{}",
                    quote_numeric_scalar(scalar),
                    &item[scalar.len()..]
                )
            })
            .collect::<Vec<_>>();
        return format!("[{}]", items.join(","));
    }
    if let Some(index) = node.find(": ") {
        let (key, value) = node.split_at(index + 1);
        let (space, value) = split_leading_whitespace(value);
        return format!("{key}{space}{}", quote_numeric_node(value));
    }
    quote_numeric_scalar(node)
}

/// Quote the numeric scalars of a line without comment, so that `1.10` stays
/// `1.10` instead of becoming the float `1.1`.
fn quote_numeric_line(line: &str) -> String {
    let (indent, node) = split_leading_whitespace(line);
    format!("{indent}{}", quote_numeric_node(node))
}

/// Quote every unquoted numeric scalar of a YAML document.
///
/// Ordinary variant values are strings exactly as written, but YAML reads
/// `1.10` as the number `1.1`. Comments are kept. A line with a `#` that is
/// not clearly a comment is left alone.
pub fn quote_numeric_scalars(yaml: &str) -> String {
    yaml.lines()
        .map(|line| {
            let (content, comment) = match line.find('#') {
                None => (line, ""),
                Some(index)
                    if !line.contains(['"', '\''])
                        && (index == 0 || line[..index].ends_with([' ', '\t'])) =>
                {
                    line.split_at(index)
                }
                Some(_) => return line.to_string(),
            };
            let body = content.trim_end();
            format!(
                "{}{}{comment}",
                quote_numeric_line(body),
                &content[body.len()..]
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn selector_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_function("environ_get", |name: String, default: Option<String>| {
        Value::from(std::env::var(name).unwrap_or_else(|_| default.unwrap_or_default()))
    });
    env
}

/// Evaluate the line selectors of a variant document and drop the lines that
/// are not selected.
pub fn select_lines(
    input: &str,
    selector_config: &SelectorConfig,
) -> Result<String, VariantParseError> {
    let env = selector_environment();
    let context = selector_config.clone().into_context();

    // `os.environ.get` is not valid jinja
    let input = input.replace("os.environ.get", "environ_get");

    let mut lines = Vec::new();
    for line in input.lines() {
        let parsed = parse_line(line);
        if let Some(condition) = parsed.condition {
            if !evaluate_condition(condition, &env, &context)? {
                continue;
            }
        }
        lines.push(quote_numeric_line(parsed.content));
    }

    Ok(lines.join("\n"))
}
