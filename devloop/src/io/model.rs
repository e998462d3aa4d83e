//! Model collaborator: turns the conversation so far into the next reply.
//!
//! The loop only needs fully assembled text, so streaming is handled here.

use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::types::Message;
use crate::io::config::ModelConfig;

pub trait ModelClient {
    fn complete(&self, history: &[Message]) -> Result<String>;
}

/// Chat client for an Ollama server (`/api/chat`, streamed NDJSON).
pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
    temperature: f64,
    context_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    num_ctx: u32,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: format!("{}/api/chat", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            context_tokens: config.context_tokens,
        })
    }
}

impl ModelClient for OllamaClient {
    #[instrument(skip_all, fields(model = %self.model, messages = history.len()))]
    fn complete(&self, history: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: history,
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
                num_ctx: self.context_tokens,
            },
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .with_context(|| format!("POST {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "model server returned {status}: {}",
                body.chars().take(300).collect::<String>()
            ));
        }
        let text = read_chat_stream(std::io::BufReader::new(response))?;
        info!(chars = text.len(), "model reply received");
        Ok(text)
    }
}

/// Concatenate `message.content` from NDJSON chunks until `done: true`.
///
/// Lines that are not valid JSON are skipped. A chunk carrying `error` aborts.
pub fn read_chat_stream<R: BufRead>(reader: R) -> Result<String> {
    let mut text = String::new();
    for line in reader.lines() {
        let line = line.context("read model stream")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let chunk: Value = match serde_json::from_str(trimmed) {
            Ok(chunk) => chunk,
            Err(err) => {
                debug!(%err, "skipping undecodable stream line");
                continue;
            }
        };
        if let Some(error) = chunk.get("error").and_then(Value::as_str) {
            return Err(anyhow!("model server error: {error}"));
        }
        if let Some(content) = chunk["message"]["content"].as_str() {
            text.push_str(content);
        }
        if chunk["done"].as_bool() == Some(true) {
            break;
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn assembles_streamed_chunks() {
        let stream = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "not json at all\n",
            "\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"ignored\"},\"done\":false}\n",
        );
        let text = read_chat_stream(Cursor::new(stream)).expect("read");
        assert_eq!(text, "Hello");
    }

    #[test]
    fn error_chunk_aborts() {
        let err = read_chat_stream(Cursor::new("{\"error\":\"model not found\"}\n")).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn posts_history_and_options_to_chat_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let endpoint = format!("http://{}/", listener.local_addr().expect("addr"));
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = stream.read(&mut buf).expect("read");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || text.ends_with("}}") {
                    break;
                }
            }
            let body = "{\"message\":{\"content\":\"ok\"},\"done\":true}\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write");
            String::from_utf8_lossy(&request).to_string()
        });

        let client = OllamaClient::new(&ModelConfig {
            endpoint,
            context_tokens: 2048,
            ..ModelConfig::default()
        })
        .expect("client");
        let reply = client
            .complete(&[Message::system("sys"), Message::user("task")])
            .expect("complete");
        assert_eq!(reply, "ok");

        let request = server.join().expect("server");
        assert!(request.starts_with("POST /api/chat "));
        assert!(request.contains("\"stream\":true"));
        assert!(request.contains("\"num_ctx\":2048"));
        assert!(request.contains("\"role\":\"user\""));
    }
}
