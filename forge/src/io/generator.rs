//! Generation backend abstraction.
//!
//! The [`Generator`] trait decouples the pipeline from the actual text
//! generation service. Backends classify their own failures: anything the
//! provider may recover from is returned as a [`TransientProviderError`] so
//! the retry wrapper can find it in the cause chain.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::TransientProviderError;
use crate::io::config::{BackendConfig, BackendKind};
use crate::io::process::run_command_with_timeout;

const COMMAND_OUTPUT_LIMIT_BYTES: usize = 4_000_000;

/// One prompt-in, text-out request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Abstraction over text generation backends.
pub trait Generator {
    /// Generate a completion for `request`. The whole answer is returned at once.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request)
    }
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request)
    }
}

/// Build the backend described by `cfg`.
pub fn generator_from_config(cfg: &BackendConfig) -> Result<Box<dyn Generator>> {
    match cfg.kind {
        BackendKind::Http => Ok(Box::new(HttpGenerator::from_config(cfg)?)),
        BackendKind::Command => Ok(Box::new(CommandGenerator::from_config(cfg))),
    }
}

/// OpenAI-compatible chat completions client.
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl HttpGenerator {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build http client")?;
        let api_key = std::env::var(&cfg.api_key_env).ok();
        if api_key.is_none() {
            warn!(env = %cfg.api_key_env, "api key environment variable not set");
        }
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

impl Generator for HttpGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        };

        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = match call.send() {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return Err(TransientProviderError::new(format!("request failed: {err}")).into());
            }
            Err(err) => return Err(err).context("send generation request"),
        };

        let status = response.status();
        let text = match response.text() {
            Ok(text) => text,
            Err(err) if err.is_timeout() => {
                return Err(
                    TransientProviderError::new(format!("reading response failed: {err}")).into(),
                );
            }
            Err(err) => return Err(err).context("read generation response"),
        };
        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            if is_transient_status(status) {
                return Err(TransientProviderError::new(format!(
                    "HTTP {}: {message}",
                    status.as_u16()
                ))
                .into());
            }
            return Err(anyhow!("generation backend error ({}): {message}", status.as_u16()));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("parse generation response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("generation response had no content"))?;
        debug!(response_bytes = content.len(), "generation complete");
        Ok(content)
    }
}

/// 429 and 5xx are worth retrying; every other status is the caller's fault.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Runs a local CLI with the prompt on stdin and reads the answer from stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    transient_markers: Vec<String>,
}

impl CommandGenerator {
    pub fn from_config(cfg: &BackendConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            transient_markers: cfg
                .transient_markers
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_transient_stderr(&self, stderr: &str) -> bool {
        let stderr = stderr.to_ascii_lowercase();
        self.transient_markers
            .iter()
            .any(|marker| stderr.contains(marker.as_str()))
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .context("backend command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            COMMAND_OUTPUT_LIMIT_BYTES,
        )
        .with_context(|| format!("run generation command {program}"))?;

        if output.timed_out {
            return Err(TransientProviderError::new(format!(
                "{program} timed out after {:?}",
                self.timeout
            ))
            .into());
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            let message = format!(
                "{program} exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
            if self.is_transient_stderr(&stderr) {
                return Err(TransientProviderError::new(message).into());
            }
            return Err(anyhow!(message));
        }
        Ok(output.stdout_text())
    }
}
