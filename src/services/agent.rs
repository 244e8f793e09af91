//! Tool-calling conversational agent over OpenAI chat completions.
//!
//! The agent loads (or creates) the user's wallet, then lets the model call
//! tools from a [`Toolkit`] for at most `max_tool_steps` rounds before it
//! must answer in plain text.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::OpenAiConfig;
use crate::error::AgentError;
use crate::services::{CapabilitySet, ConversationalAgent, WalletRecord, WalletService};

pub const SOLANA_SYSTEM_PROMPT: &str = "You are a helpful assistant for the Solana blockchain. \
You can look up the user's wallet address and SOL balance, and, when the tools are available, \
create NFT collections, mint NFTs into a collection, launch SPL tokens and transfer tokens \
using the user's custodial wallet. Only use the tools you are given and never invent transaction signatures. \
You cannot generate images. If the user asks for an image, tell them to use /gen <prompt>.";

/// A function the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Blockchain actions exposed to the agent.
#[async_trait]
pub trait Toolkit: Send + Sync {
    fn capabilities(&self) -> CapabilitySet;

    fn tools(&self) -> Vec<ToolSpec>;

    async fn call(&self, wallet: &WalletRecord, name: &str, args: Value)
    -> Result<Value, AgentError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    /// Absent or `null` when the model answers in text.
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl ToolCall {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": { "name": self.function.name, "arguments": self.function.arguments },
        })
    }
}

pub struct OpenAiToolAgent {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tool_steps: usize,
    toolkit: Arc<dyn Toolkit>,
    wallets: Arc<dyn WalletService>,
}

impl OpenAiToolAgent {
    pub fn new(
        config: &OpenAiConfig,
        toolkit: Arc<dyn Toolkit>,
        wallets: Arc<dyn WalletService>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tool_steps: config.max_tool_steps,
            toolkit,
            wallets,
        }
    }

    fn tool_definitions(&self) -> Vec<Value> {
        self.toolkit
            .tools()
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    },
                })
            })
            .collect()
    }

    fn request_body(&self, messages: &[Value], tools: &[Value], allow_tools: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = json!(if allow_tools { "auto" } else { "none" });
        }
        body
    }

    async fn complete(&self, body: &Value) -> Result<AssistantMessage, AgentError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RequestFailed {
                reason: format!(
                    "HTTP {status}: {}",
                    body.chars().take(300).collect::<String>()
                ),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| AgentError::InvalidResponse {
                reason: "no choices returned".to_string(),
            })
    }

    async fn run_tool(&self, wallet: &WalletRecord, call: &ToolCall) -> String {
        let args = if call.function.arguments.trim().is_empty() {
            Ok(json!({}))
        } else {
            serde_json::from_str::<Value>(&call.function.arguments)
        };

        let result = match args {
            Ok(args) => self.toolkit.call(wallet, &call.function.name, args).await,
            Err(e) => Err(AgentError::ToolFailed {
                name: call.function.name.clone(),
                reason: format!("invalid arguments: {e}"),
            }),
        };

        match result {
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(tool = %call.function.name, "Tool call failed: {}", e);
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }
}

fn final_text(message: AssistantMessage) -> Result<String, AgentError> {
    message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AgentError::InvalidResponse {
            reason: "model returned no text".to_string(),
        })
}

#[async_trait]
impl ConversationalAgent for OpenAiToolAgent {
    fn capabilities(&self) -> CapabilitySet {
        self.toolkit.capabilities()
    }

    async fn respond(&self, user_id: &str, message: &str) -> Result<String, AgentError> {
        let wallet = self.wallets.get_or_create_wallet(user_id).await?;
        let tools = self.tool_definitions();

        let mut messages = vec![
            json!({
                "role": "system",
                "content": format!(
                    "{}\n\nThe user's wallet address is {}.",
                    SOLANA_SYSTEM_PROMPT, wallet.address
                ),
            }),
            json!({ "role": "user", "content": message }),
        ];

        for step in 0..self.max_tool_steps {
            let mut reply = self
                .complete(&self.request_body(&messages, &tools, true))
                .await?;

            let calls = reply.tool_calls.take().unwrap_or_default();
            if calls.is_empty() {
                return final_text(reply);
            }

            tracing::debug!(
                step,
                tools = ?calls.iter().map(|c| c.function.name.as_str()).collect::<Vec<_>>(),
                "Agent requested tools"
            );

            messages.push(json!({
                "role": "assistant",
                "content": reply.content,
                "tool_calls": calls.iter().map(ToolCall::to_json).collect::<Vec<_>>(),
            }));
            for call in &calls {
                let output = self.run_tool(&wallet, call).await;
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output,
                }));
            }
        }

        // Out of tool steps: ask for a plain answer.
        let reply = self
            .complete(&self.request_body(&messages, &tools, false))
            .await?;
        final_text(reply)
    }
}
