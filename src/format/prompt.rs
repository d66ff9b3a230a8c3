// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Tool prompt injection for backends without native tool calling.
//
// The client's declared tools are removed from the backend payload and
// described in a system prompt that asks the model to answer with
// `<tool_name><param>value</param></tool_name>`. Conversation history is
// rewritten so the model only ever sees that XML convention.

use serde_json::{json, Value};

use crate::config::{ReinjectionConfig, ReinjectionKind};
use crate::message::ToolCall;

/// One declared tool, as far as prompting needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<ParamSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
    pub required: bool,
}

/// Declared tools from a request body (`tools[].function`, both formats).
pub fn tool_specs(body: &Value) -> Vec<ToolSpec> {
    let Some(tools) = body.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            let name = function.get("name")?.as_str()?.to_string();
            let description = function
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            let schema = function.get("parameters");
            let required: Vec<&str> = schema
                .and_then(|s| s.get("required"))
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let parameters = schema
                .and_then(|s| s.get("properties"))
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(pname, prop)| ParamSpec {
                            name: pname.clone(),
                            kind: prop
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("any")
                                .to_string(),
                            description: prop
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            required: required.contains(&pname.as_str()),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(ToolSpec {
                name,
                description,
                parameters,
            })
        })
        .collect()
}

/// Ordered known tool names for a request.
pub fn tool_names(body: &Value) -> Vec<String> {
    tool_specs(body).into_iter().map(|t| t.name).collect()
}

// ---------------------------------------------------------------------------
// Prompt text
// ---------------------------------------------------------------------------

fn example_value(param: &ParamSpec) -> &'static str {
    match param.kind.as_str() {
        "number" | "integer" => "42",
        "boolean" => "true",
        _ if param.name.contains("query") => "What is the capital of France?",
        _ if param.name.contains("url") => "https://example.com",
        _ if param.name.contains("path") => "/path/to/file.txt",
        _ => "example value",
    }
}

fn example_call(tool: &ToolSpec) -> String {
    let mut out = format!("<{}>\n", tool.name);
    for param in &tool.parameters {
        out.push_str(&format!(
            "  <{0}>{1}</{0}>\n",
            param.name,
            example_value(param)
        ));
    }
    out.push_str(&format!("</{}>", tool.name));
    out
}

/// Full tool-usage instructions for the system prompt.
pub fn tool_instructions(tools: &[ToolSpec]) -> String {
    let mut out = String::from("# Tools\n\nYou can call the following tools:\n");
    for tool in tools {
        out.push_str(&format!(
            "\n## {}\n{}\nParameters:\n",
            tool.name,
            tool.description.as_deref().unwrap_or("No description provided.")
        ));
        if tool.parameters.is_empty() {
            out.push_str("- none\n");
        }
        for param in &tool.parameters {
            out.push_str(&format!(
                "- {} ({}){}: {}\n",
                param.name,
                param.kind,
                if param.required { ", required" } else { "" },
                param.description.as_deref().unwrap_or("No description.")
            ));
        }
        out.push_str(&format!("Example:\n{}\n", example_call(tool)));
    }
    out.push_str(
        "\n# How to call a tool\n\
         Reply with the raw XML of exactly one tool call and nothing else: no code fences, \
         no explanation.\n\
         - The root element is the exact tool name listed above.\n\
         - Each parameter is a child element: <param>value</param>.\n\
         - Booleans are written true or false.\n\
         - HTML or code inside a parameter is written as raw tags, never as entities.\n\
         - Every opening tag has a matching closing tag.\n\
         Only the tools listed above exist. When no tool is needed, answer normally.",
    );
    out
}

/// Short reminder naming the available tools.
pub fn tool_reminder(tools: &[ToolSpec]) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    format!(
        "Reminder: the available tools are {}. Call one by replying with its raw XML only, \
         using the exact tool name.",
        names.join(", ")
    )
}

/// Closing nudge appended after the conversation.
const RAW_XML_NUDGE: &str =
    "When calling a tool, output the raw XML only: no code fences, no backticks, no commentary.";

// ---------------------------------------------------------------------------
// Reinjection
// ---------------------------------------------------------------------------

fn estimate_tokens(message: &Value) -> usize {
    message
        .get("content")
        .and_then(Value::as_str)
        .map(|c| c.len().div_ceil(4))
        .unwrap_or(0)
}

/// True when enough conversation has passed since the last system message
/// that the tool instructions should be repeated.
pub fn needs_reinjection(messages: &[Value], config: &ReinjectionConfig) -> bool {
    if !config.enabled || messages.is_empty() {
        return false;
    }
    let mut count = 0usize;
    let mut tokens = 0usize;
    for message in messages.iter().rev() {
        if message.get("role").and_then(Value::as_str) == Some("system") {
            return count >= config.message_count || tokens >= config.token_count;
        }
        count += 1;
        tokens += estimate_tokens(message);
    }
    true
}

// ---------------------------------------------------------------------------
// Payload rewriting
// ---------------------------------------------------------------------------

/// Rewrite a backend payload so a model without native tool support can
/// still call `tools`. No-op when the request declares no tools.
pub fn inject_tool_prompt(body: &mut Value, tools: &[ToolSpec], reinjection: &ReinjectionConfig) {
    if tools.is_empty() {
        return;
    }
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    obj.remove("tools");
    obj.remove("tool_choice");

    let instructions = tool_instructions(tools);

    if !obj.get("messages").is_some_and(Value::is_array) {
        // Generate-style payload: instructions ride in `system`.
        let system = match obj.get("system").and_then(Value::as_str) {
            Some(existing) if !existing.is_empty() => format!("{existing}\n\n{instructions}"),
            _ => instructions,
        };
        obj.insert("system".into(), Value::String(system));
        return;
    }
    let Some(messages) = obj.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };

    for message in messages.iter_mut() {
        rewrite_tool_history(message);
    }

    let system_idx = messages
        .iter()
        .position(|m| m.get("role").and_then(Value::as_str) == Some("system"));
    let reinject = system_idx.is_some() && needs_reinjection(messages, reinjection);
    match system_idx {
        Some(idx) => {
            let existing = messages[idx]
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            messages[idx]["content"] = Value::String(format!("{existing}\n\n{instructions}"));
        }
        None => {
            messages.insert(0, json!({"role": "system", "content": instructions.clone()}));
        }
    }
    if reinject {
        let content = match reinjection.kind {
            ReinjectionKind::Full => instructions,
            ReinjectionKind::Reminder => tool_reminder(tools),
        };
        tracing::debug!(kind = ?reinjection.kind, "reinjecting tool instructions");
        messages.push(json!({"role": "system", "content": content}));
    }
    messages.push(json!({"role": "system", "content": RAW_XML_NUDGE}));
}

/// Turn tool results into user turns and structured assistant tool calls
/// into their XML text.
fn rewrite_tool_history(message: &mut Value) {
    let role = message.get("role").and_then(Value::as_str).unwrap_or("");
    match role {
        "tool" => {
            let content = message
                .get("content")
                .map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let label = match message.get("tool_call_id").and_then(Value::as_str) {
                Some(id) => format!("Tool result for call {id}"),
                None => "Tool result".to_string(),
            };
            *message = json!({"role": "user", "content": format!("{label}: {content}")});
        }
        "assistant" => {
            let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
                return;
            };
            let rendered: Vec<String> = calls
                .iter()
                .filter_map(|tc| {
                    let function = tc.get("function")?;
                    let name = function.get("name")?.as_str()?;
                    let arguments = match function.get("arguments") {
                        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::Null),
                        Some(other) => other.clone(),
                        None => Value::Null,
                    };
                    Some(ToolCall::from_json_arguments(name, &arguments).to_xml())
                })
                .collect();
            let mut text = message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            for xml in rendered {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&xml);
            }
            if let Some(obj) = message.as_object_mut() {
                obj.remove("tool_calls");
                obj.insert("content".into(), Value::String(text));
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
