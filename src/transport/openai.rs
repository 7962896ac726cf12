//! OpenAI-compatible chat-completions client.

use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{ChatPayload, ChatResult, Transport, TransportError, TransportFailure};
use crate::config::AppConfig;

const MAX_ERROR_BODY_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let api_key = std::env::var(config.api_key_env())
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = config.api_key_env(),
                "api key environment variable is not set; requests are sent unauthenticated"
            );
        }

        Self {
            endpoint: config.endpoint().to_string(),
            model: config.model().to_string(),
            api_key,
            system_prompt: config.system_prompt().map(str::to_string),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
            timeout: config.request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Keeps the running conversation so follow-up questions carry context.
/// A turn is only recorded once the assistant has answered it.
pub struct OpenAiTransport {
    settings: OpenAiSettings,
    http: reqwest::blocking::Client,
    history: Mutex<Vec<ChatMessage>>,
}

impl OpenAiTransport {
    pub fn new(settings: OpenAiSettings) -> Result<Self, TransportError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(TransportError::Client)?;
        let history = settings
            .system_prompt
            .as_ref()
            .map(|prompt| ChatMessage {
                role: "system",
                content: MessageContent::Text(prompt.clone()),
            })
            .into_iter()
            .collect();

        Ok(Self {
            settings,
            http,
            history: Mutex::new(history),
        })
    }

    fn history_snapshot(&self) -> Vec<ChatMessage> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_turn(&self, user: ChatMessage, reply: &str) {
        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(user);
        history.push(ChatMessage {
            role: "assistant",
            content: MessageContent::Text(reply.to_string()),
        });
    }

    fn failure_from_reqwest(&self, err: &reqwest::Error) -> TransportFailure {
        if err.is_timeout() {
            return TransportFailure::new(
                None,
                format!(
                    "request timed out after {}s",
                    self.settings.timeout.as_secs()
                ),
            );
        }
        TransportFailure::new(err.status().map(|status| status.as_u16()), err.to_string())
    }
}

impl Transport for OpenAiTransport {
    fn post_chat(&self, payload: ChatPayload) -> ChatResult {
        let image_count = payload.images.len();
        let user = build_user_message(&payload)?;
        let mut messages = self.history_snapshot();
        messages.push(user.clone());

        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: &messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tracing::debug!(
            endpoint = %self.settings.endpoint,
            model = %self.settings.model,
            images = image_count,
            history = messages.len() - 1,
            "posting chat completion"
        );

        let mut request = self.http.post(&self.settings.endpoint).json(&body);
        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .map_err(|err| self.failure_from_reqwest(&err))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| self.failure_from_reqwest(&err))?;

        if !status.is_success() {
            let reason = api_error_message(&text)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| truncate_chars(&text, MAX_ERROR_BODY_CHARS));
            tracing::warn!(status = status.as_u16(), %reason, "chat completion rejected");
            return Err(TransportFailure::new(Some(status.as_u16()), reason));
        }

        let reply = parse_reply(&text)?;
        self.record_turn(user, &reply);
        Ok(reply)
    }
}

fn build_user_message(payload: &ChatPayload) -> Result<ChatMessage, TransportFailure> {
    let mut parts = Vec::with_capacity(payload.images.len() + 1);
    let text = payload.text.trim();
    if !text.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
    }
    for image in &payload.images {
        let png = image.encode_png().map_err(|err| {
            TransportFailure::new(None, format!("failed to encode {}: {err}", image.id()))
        })?;
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: png_data_url(&png),
            },
        });
    }

    Ok(ChatMessage {
        role: "user",
        content: MessageContent::Parts(parts),
    })
}

fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

fn parse_reply(body: &str) -> ChatResult {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|err| {
        TransportFailure::new(None, format!("malformed chat completion response: {err}"))
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| TransportFailure::new(None, "response contained no message content"))
}

fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.trim().is_empty())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedImage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMPLETIONS_PATH: &str = "/v1/chat/completions";

    fn settings_for(endpoint: String) -> OpenAiSettings {
        OpenAiSettings {
            endpoint,
            model: "test-model".to_string(),
            api_key: Some("sk-test".to_string()),
            system_prompt: Some("be brief".to_string()),
            temperature: 0.0,
            max_tokens: 600,
            timeout: Duration::from_secs(5),
        }
    }

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn text_payload(text: &str) -> ChatPayload {
        ChatPayload {
            text: text.to_string(),
            images: Vec::new(),
        }
    }

    fn reply_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    /// The blocking client owns its own runtime, so it is built, used and
    /// dropped on a blocking thread.
    async fn run_conversation(endpoint: String, turns: &[&str]) -> Vec<ChatResult> {
        let turns: Vec<String> = turns.iter().map(|turn| turn.to_string()).collect();
        tokio::task::spawn_blocking(move || {
            let transport =
                OpenAiTransport::new(settings_for(endpoint)).expect("client should build");
            turns
                .iter()
                .map(|turn| transport.post_chat(text_payload(turn)))
                .collect::<Vec<_>>()
        })
        .await
        .expect("blocking client task")
    }

    async fn request_bodies(server: &MockServer) -> Vec<serde_json::Value> {
        server
            .received_requests()
            .await
            .expect("request recording is enabled")
            .iter()
            .map(|request| {
                request
                    .body_json::<serde_json::Value>()
                    .expect("request body is json")
            })
            .collect()
    }

    #[test]
    fn user_message_carries_text_then_png_data_urls_in_order() {
        let first = CapturedImage::new(image::RgbaImage::new(2, 2));
        let second = CapturedImage::new(image::RgbaImage::new(3, 1));
        let message = build_user_message(&ChatPayload {
            text: "  what is this?  ".to_string(),
            images: vec![first, second],
        })
        .expect("message should build");

        let json = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(json["role"], "user");
        let parts = json["content"].as_array().expect("content parts");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], serde_json::json!({"type": "text", "text": "what is this?"}));
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .expect("url string")
            .starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn image_only_message_has_no_text_part() {
        let message = build_user_message(&ChatPayload {
            text: String::new(),
            images: vec![CapturedImage::new(image::RgbaImage::new(1, 1))],
        })
        .expect("message should build");
        let json = serde_json::to_value(&message).expect("message should serialize");
        let parts = json["content"].as_array().expect("content parts");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["type"], "image_url");
    }

    #[test]
    fn parse_reply_rejects_missing_content() {
        assert_eq!(
            parse_reply(&reply_body("It is a screenshot.").to_string()),
            Ok("It is a screenshot.".to_string())
        );
        assert!(parse_reply(r#"{"choices":[]}"#).is_err());
        assert!(parse_reply("<html>").is_err());
    }

    #[test]
    fn api_error_message_reads_openai_error_envelope() {
        assert_eq!(
            api_error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            Some("Invalid API key".to_string())
        );
        assert_eq!(api_error_message("upstream exploded"), None);
        assert_eq!(truncate_chars("abcdefgh", 6), "abc...");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_chat_returns_reply_and_keeps_history_for_follow_ups() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("first answer")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("second answer")))
            .mount(&server)
            .await;

        let replies = run_conversation(
            format!("{}{COMPLETIONS_PATH}", server.uri()),
            &["hello", "and then?"],
        )
        .await;
        assert_eq!(
            replies,
            vec![Ok("first answer".to_string()), Ok("second answer".to_string())]
        );

        let bodies = request_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        let first = &bodies[0];
        assert_eq!(first["model"], "test-model");
        assert_eq!(first["max_tokens"], 600);
        assert_eq!(first["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(first["messages"][0]["role"], "system");

        let roles: Vec<_> = bodies[1]["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .map(|message| message["role"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(bodies[1]["messages"][2]["content"], "first answer");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_chat_maps_error_status_and_does_not_record_the_turn() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": {"message": "model overloaded"}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("recovered")))
            .mount(&server)
            .await;

        let replies = run_conversation(
            format!("{}{COMPLETIONS_PATH}", server.uri()),
            &["hello", "retry"],
        )
        .await;
        assert_eq!(
            replies,
            vec![
                Err(TransportFailure::new(Some(500), "model overloaded")),
                Ok("recovered".to_string()),
            ]
        );

        let bodies = request_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1]["messages"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_chat_falls_back_to_status_reason_for_non_json_errors() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let replies =
            run_conversation(format!("{}{COMPLETIONS_PATH}", server.uri()), &["hello"]).await;
        assert_eq!(
            replies,
            vec![Err(TransportFailure::new(Some(502), "Bad Gateway"))]
        );
    }

    #[test]
    fn post_chat_reports_connection_failure_without_status() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("address");
        drop(listener);

        let transport = OpenAiTransport::new(settings_for(format!("http://{address}/v1")))
            .expect("client should build");
        let failure = transport
            .post_chat(text_payload("hello"))
            .expect_err("closed port should fail");
        assert_eq!(failure.status, None);
    }
}
