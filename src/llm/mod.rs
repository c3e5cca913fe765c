//! LLM 모듈 - 답변 생성용 완성(completion) capability
//!
//! OpenAI 호환 chat completions API를 사용합니다.
//! 이 capability의 실패는 synthesizer의 fallback 경로가 전량 흡수하므로
//! 쿼리 결과에는 절대 노출되지 않습니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

// ============================================================================
// LlmClient Trait
// ============================================================================

/// LLM 완성 capability 트레이트
///
/// 실패는 `LlmError` 세 종류(Auth/RateLimit/Network)로 분류됩니다.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// system + user 프롬프트로 텍스트 완성
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;

    /// 모델 이름
    fn model(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible Chat Client
// ============================================================================

/// 기본 API 베이스 URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// 기본 모델
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI 호환 chat completions 클라이언트
///
/// base URL만 바꾸면 OpenAI, OpenRouter, Groq, Ollama 등
/// 동일 API를 구현한 모든 서버와 동작합니다.
pub struct OpenAiChat {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    /// API 키로 생성 (기본 모델/URL)
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_options(api_key, DEFAULT_BASE_URL.to_string(), DEFAULT_MODEL.to_string())
    }

    /// base URL과 모델을 지정하여 생성
    pub fn with_options(
        api_key: String,
        base_url: String,
        model: String,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }

    /// 환경변수 OPENAI_API_KEY에서 생성
    ///
    /// OPENAI_BASE_URL / OPENAI_MODEL 환경변수로 재정의할 수 있습니다.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::Auth("OPENAI_API_KEY not set".to_string()))?;

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Self::with_options(api_key, base_url, model)
    }

    /// 환경변수에 API 키가 설정되어 있는지 확인
    pub fn has_api_key() -> bool {
        std::env::var("OPENAI_API_KEY")
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    }
}

/// chat completions 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// chat completions 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiChat {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(format!("failed to send completion request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(format!("failed to read response body: {}", e)))?;

        // 상태 코드별 에러 분류
        match status.as_u16() {
            401 | 403 => {
                return Err(LlmError::Auth(format!("API returned {}: {}", status, body)))
            }
            429 => {
                return Err(LlmError::RateLimit(format!(
                    "API returned 429: {}",
                    body
                )))
            }
            s if !status.is_success() => {
                return Err(LlmError::Network(format!("API returned {}: {}", s, body)))
            }
            _ => {}
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::Network(format!("failed to parse completion response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::Network("empty completion content".to_string()));
        }

        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OpenAiChat::with_options(
            "fake_key".to_string(),
            "http://localhost:11434/".to_string(),
            "llama3".to_string(),
        )
        .unwrap();

        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "llama3");
    }

    #[test]
    fn test_chat_request_serializes_both_roles() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "you are helpful".to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: "hello".to_string(),
                },
            ],
            max_tokens: 500,
            temperature: 0.7,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 500);
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"the answer"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("the answer")
        );
    }
}
