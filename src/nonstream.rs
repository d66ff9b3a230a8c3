// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Non-streaming response handling
//
// Responsibilities:
// - Find the assistant text in a complete backend response
// - Recover an XML tool call from it and rewrite the body so the call is
//   structured, in the backend's own format
// - Convert the result to the client's format
// - Leave anything that is not JSON untouched

use bytes::Bytes;
use serde_json::{json, Value};

use crate::format::convert::{convert_response_for, ollama_tool_call, openai_tool_call};
use crate::format::{OllamaShape, WireFormat};
use crate::message::ToolCall;
use crate::toolcall::extract_tool_call;

/// Rewrite a complete backend response for the client.
///
/// `shape` selects the Ollama body layout when the client speaks Ollama
/// and the backend does not.
pub fn complete_response(
    body: &[u8],
    client: WireFormat,
    backend: WireFormat,
    known_tools: &[String],
    shape: OllamaShape,
) -> Bytes {
    let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
        tracing::debug!(bytes = body.len(), "backend response is not JSON, passing through");
        return Bytes::copy_from_slice(body);
    };

    if !known_tools.is_empty() && !has_structured_tool_calls(&value, backend) {
        let call = assistant_text(&value, backend).and_then(|text| extract_tool_call(text, known_tools));
        if let Some(call) = call {
            tracing::info!(tool = %call.name, "tool call recovered from response text");
            attach_tool_call(&mut value, backend, &call);
        }
    }

    let converted = convert_response_for(backend, client, &value, false, shape);
    match serde_json::to_vec(&converted) {
        Ok(out) => Bytes::from(out),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize converted response");
            Bytes::copy_from_slice(body)
        }
    }
}

/// Assistant text of a complete response.
fn assistant_text(body: &Value, format: WireFormat) -> Option<&str> {
    match format {
        WireFormat::OpenAi => body.pointer("/choices/0/message/content").and_then(Value::as_str),
        WireFormat::Ollama => body
            .pointer("/message/content")
            .and_then(Value::as_str)
            .or_else(|| body.get("response").and_then(Value::as_str)),
    }
}

fn has_structured_tool_calls(body: &Value, format: WireFormat) -> bool {
    let non_empty = |v: Option<&Value>| v.and_then(Value::as_array).is_some_and(|a| !a.is_empty());
    match format {
        WireFormat::OpenAi => non_empty(body.pointer("/choices/0/message/tool_calls")),
        WireFormat::Ollama => {
            non_empty(body.pointer("/message/tool_calls")) || non_empty(body.get("tool_calls"))
        }
    }
}

/// Put `call` on the body as a structured tool call and clear the text.
fn attach_tool_call(body: &mut Value, format: WireFormat, call: &ToolCall) {
    match format {
        WireFormat::OpenAi => {
            let Some(choice) = body.pointer_mut("/choices/0").and_then(Value::as_object_mut) else {
                return;
            };
            choice.insert("finish_reason".into(), json!("tool_calls"));
            if let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) {
                let mut entry = openai_tool_call(call, 0);
                if let Some(entry) = entry.as_object_mut() {
                    entry.remove("index");
                }
                message.insert("content".into(), Value::Null);
                message.insert("tool_calls".into(), json!([entry]));
            }
        }
        WireFormat::Ollama => {
            let calls = json!([ollama_tool_call(call)]);
            if let Some(message) = body.get_mut("message").and_then(Value::as_object_mut) {
                message.insert("content".into(), json!(""));
                message.insert("tool_calls".into(), calls);
            } else if let Some(obj) = body.as_object_mut() {
                obj.insert("response".into(), json!(""));
                obj.insert("tool_calls".into(), calls);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<String> {
        vec!["search".to_string(), "read_file".to_string()]
    }

    fn parse(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    fn openai_body(content: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-test",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn openai_text_with_tool_call_becomes_structured() {
        let body = openai_body("<search><query>rust async</query></search>");
        let out = parse(&complete_response(
            &body,
            WireFormat::OpenAi,
            WireFormat::OpenAi,
            &tools(),
            OllamaShape::Generate,
        ));
        let choice = &out["choices"][0];
        assert_eq!(choice["finish_reason"], "tool_calls");
        assert!(choice["message"]["content"].is_null());
        let call = &choice["message"]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        assert!(call["id"].as_str().unwrap().starts_with("call_"));
        assert_eq!(call["function"]["name"], "search");
        let args: Value = serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"query": "rust async"}));
        assert_eq!(out["id"], "chatcmpl-1");
    }

    #[test]
    fn plain_text_left_alone() {
        let body = openai_body("The answer is 42.");
        let out = parse(&complete_response(
            &body,
            WireFormat::OpenAi,
            WireFormat::OpenAi,
            &tools(),
            OllamaShape::Generate,
        ));
        assert_eq!(out["choices"][0]["message"]["content"], "The answer is 42.");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn unknown_tool_not_extracted() {
        let body = openai_body("<delete_everything><path>/</path></delete_everything>");
        let out = parse(&complete_response(
            &body,
            WireFormat::OpenAi,
            WireFormat::OpenAi,
            &tools(),
            OllamaShape::Generate,
        ));
        assert!(out["choices"][0]["message"].get("tool_calls").is_none());
    }

    #[test]
    fn existing_tool_calls_untouched() {
        let body = serde_json::to_vec(&json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "<search><query>x</query></search>",
                    "tool_calls": [{"id": "call_native", "type": "function",
                        "function": {"name": "read_file", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let out = parse(&complete_response(
            &body,
            WireFormat::OpenAi,
            WireFormat::OpenAi,
            &tools(),
            OllamaShape::Generate,
        ));
        let calls = out["choices"][0]["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "call_native");
    }

    #[test]
    fn ollama_chat_tool_call_same_format() {
        let body = serde_json::to_vec(&json!({
            "model": "llama3",
            "created_at": "2024-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "<read_file><path>/tmp/a</path></read_file>"},
            "done": true
        }))
        .unwrap();
        let out = parse(&complete_response(
            &body,
            WireFormat::Ollama,
            WireFormat::Ollama,
            &tools(),
            OllamaShape::Chat,
        ));
        assert_eq!(out["message"]["content"], "");
        let call = &out["message"]["tool_calls"][0]["function"];
        assert_eq!(call["name"], "read_file");
        assert_eq!(call["arguments"], json!({"path": "/tmp/a"}));
    }

    #[test]
    fn ollama_generate_tool_call_goes_top_level() {
        let body = serde_json::to_vec(&json!({
            "model": "llama3",
            "response": "Let me look.\n<search><query>weather</query></search>",
            "done": true
        }))
        .unwrap();
        let out = parse(&complete_response(
            &body,
            WireFormat::Ollama,
            WireFormat::Ollama,
            &tools(),
            OllamaShape::Generate,
        ));
        assert_eq!(out["response"], "");
        assert_eq!(out["tool_calls"][0]["function"]["name"], "search");
    }

    #[test]
    fn ollama_backend_openai_client() {
        let body = serde_json::to_vec(&json!({
            "model": "llama3",
            "response": "<search><query>news</query></search>",
            "done": true
        }))
        .unwrap();
        let out = parse(&complete_response(
            &body,
            WireFormat::OpenAi,
            WireFormat::Ollama,
            &tools(),
            OllamaShape::Generate,
        ));
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        let call = &out["choices"][0]["message"]["tool_calls"][0]["function"];
        assert_eq!(call["name"], "search");
        let args: Value = serde_json::from_str(call["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"query": "news"}));
    }

    #[test]
    fn openai_backend_ollama_chat_client() {
        let body = openai_body("<search><query>q</query></search>");
        let out = parse(&complete_response(
            &body,
            WireFormat::Ollama,
            WireFormat::OpenAi,
            &tools(),
            OllamaShape::Chat,
        ));
        assert_eq!(out["done"], true);
        assert_eq!(out["model"], "gpt-test");
        assert_eq!(out["message"]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(out["message"]["tool_calls"][0]["function"]["arguments"], json!({"query": "q"}));
    }

    #[test]
    fn no_known_tools_means_no_extraction() {
        let body = openai_body("<search><query>q</query></search>");
        let out = parse(&complete_response(
            &body,
            WireFormat::OpenAi,
            WireFormat::OpenAi,
            &[],
            OllamaShape::Generate,
        ));
        assert_eq!(out["choices"][0]["message"]["content"], "<search><query>q</query></search>");
    }

    #[test]
    fn non_json_passes_through() {
        let out = complete_response(
            b"upstream exploded",
            WireFormat::OpenAi,
            WireFormat::Ollama,
            &tools(),
            OllamaShape::Generate,
        );
        assert_eq!(&out[..], b"upstream exploded");
    }
}
