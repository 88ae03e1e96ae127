use crate::config::{CredentialStore, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::error::{PreviewError, Result};
use crate::http_client::HttpClient;
use crate::providers::{Notifier, ToastVariant};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

const GENERATION_FAILED: &str = "Failed to generate code";

/// One prompt submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub extracted_source: String,
    pub raw_response: Value,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Runs one generation and reports why it failed.
    async fn try_generate_code(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// Notification side channel used by [`CodeGenerator::generate_code`].
    fn notifier(&self) -> &dyn Notifier;

    /// Runs one generation; failures are logged, surfaced as a notification
    /// and turned into `None`.
    async fn generate_code(&self, request: &GenerationRequest) -> Option<GenerationResult> {
        match self.try_generate_code(request).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Error generating code: {}", e);
                self.notifier()
                    .notify(e.notification_title(), &e.to_string(), ToastVariant::Destructive);
                None
            }
        }
    }
}

/// Pulls the component source out of a free-text model response.
///
/// Takes the first fenced block (optionally tagged js/jsx/ts/tsx/react) and
/// trims it; without a fence the whole response is used, trimmed.
pub fn extract_code(text: &str) -> String {
    static CODE_BLOCK: OnceLock<Regex> = OnceLock::new();
    let re = CODE_BLOCK.get_or_init(|| {
        Regex::new(r"```(?:jsx?|tsx?|react)?\s*([\s\S]*?)```").unwrap()
    });

    match re.captures(text).and_then(|caps| caps.get(1)) {
        Some(block) => block.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Instruction sent to the model for a user description.
pub fn build_prompt(description: &str) -> String {
    format!(
        "Create a React component based on this description: {}.
Use Tailwind CSS for styling.
Return only the complete React code without any explanations.
Include every import the code needs and make the component fully functional.
The code should be ready to use in a React+Tailwind project.",
        description
    )
}

/// Gemini `generateContent` client.
pub struct GeminiGenerator {
    http: Arc<dyn HttpClient>,
    credentials: Arc<CredentialStore>,
    notifier: Arc<dyn Notifier>,
    api_base: String,
}

impl GeminiGenerator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        credentials: Arc<CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            http,
            credentials,
            notifier,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, model)
    }

    fn request_body(prompt: &str) -> Value {
        json!({
            "contents": [
                {
                    "parts": [
                        { "text": build_prompt(prompt) }
                    ]
                }
            ],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 8192
            }
        })
    }

    fn service_error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERATION_FAILED.to_string())
    }
}

#[async_trait]
impl CodeGenerator for GeminiGenerator {
    async fn try_generate_code(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let api_key = self.credentials.get();
        if api_key.is_empty() {
            return Err(PreviewError::CredentialMissing);
        }

        info!("Generating code with {} for: {}", request.model, request.prompt);

        let response = self
            .http
            .post_json(
                &self.endpoint(&request.model),
                &[("Content-Type", "application/json"), ("x-goog-api-key", api_key.as_str())],
                &Self::request_body(&request.prompt),
            )
            .await?;

        if !response.is_success() {
            warn!("Gemini API error ({}): {}", response.status, response.body);
            return Err(PreviewError::Service(Self::service_error_message(&response.body)));
        }

        let data: Value = serde_json::from_str(&response.body)?;
        debug!("Gemini API response: {}", data);

        let text = data
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or(PreviewError::EmptyGeneration)?;

        let extracted_source = extract_code(text);
        info!("Extracted {} bytes of component source", extracted_source.len());

        Ok(GenerationResult {
            extracted_source,
            raw_response: data,
        })
    }

    fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}

/// Offline generator returning canned responses (`PAGECRAFT_USE_MOCK=1`).
pub struct MockGenerator {
    notifier: Arc<dyn Notifier>,
}

impl MockGenerator {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Model-style reply for a prompt, fenced like the real service answers.
    pub fn canned_response(prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        let code = if lower.contains("button") {
            "function Btn() {\n  return <button className=\"px-4 py-2 rounded bg-indigo-600 text-white\">Hi</button>\n}\nexport default Btn"
        } else if lower.contains("counter") {
            "import React, { useState } from 'react';\n\nfunction Counter() {\n  const [count, setCount] = useState(0);\n  return (\n    <div className=\"p-8 text-center\">\n      <p className=\"text-4xl font-bold\">{count}</p>\n      <button className=\"mt-4 px-4 py-2 rounded bg-indigo-600 text-white\" onClick={() => setCount(count + 1)}>Increment</button>\n    </div>\n  );\n}\n\nexport default Counter;"
        } else if lower.contains("broken") {
            "const notAComponent = 42;"
        } else {
            "import React from 'react';\n\nexport const LandingPage = () => (\n  <main className=\"min-h-screen flex items-center justify-center bg-gray-50\">\n    <h1 className=\"text-5xl font-bold text-gray-900\">Hello from pagecraft</h1>\n  </main>\n);"
        };
        format!("Here is your component:\n\n```jsx\n{}\n```\n", code)
    }
}

#[async_trait]
impl CodeGenerator for MockGenerator {
    async fn try_generate_code(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        info!("Using mock generator (PAGECRAFT_USE_MOCK=1)");
        let text = Self::canned_response(&request.prompt);
        Ok(GenerationResult {
            extracted_source: extract_code(&text),
            raw_response: json!({
                "candidates": [{ "content": { "parts": [{ "text": text }] } }]
            }),
        })
    }

    fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryCredentialBackend;
    use crate::http_client::HttpResponse;
    use crate::providers::MemoryNotifier;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordedRequest {
        url: String,
        headers: Vec<(String, String)>,
        body: Value,
    }

    /// Mock HTTP client that records every request it receives.
    struct RecordingHttpClient {
        response: HttpResponse,
        calls: AtomicUsize,
        last: Mutex<RecordedRequest>,
    }

    impl RecordingHttpClient {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: HttpResponse {
                    status,
                    body: body.to_string(),
                },
                calls: AtomicUsize::new(0),
                last: Mutex::new(RecordedRequest::default()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for RecordingHttpClient {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &Value,
        ) -> anyhow::Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = RecordedRequest {
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.clone(),
            };
            Ok(self.response.clone())
        }
    }

    fn gemini_reply(text: &str) -> String {
        json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
        .to_string()
    }

    fn generator(
        http: Arc<RecordingHttpClient>,
        key: Option<&str>,
    ) -> (GeminiGenerator, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new(10));
        let credentials = Arc::new(CredentialStore::new(
            key.map(str::to_string),
            Box::new(MemoryCredentialBackend::default()),
            None,
        ));
        (
            GeminiGenerator::new(http, credentials, notifier.clone()),
            notifier,
        )
    }

    #[test]
    fn test_extract_code_single_fenced_block() {
        let text = "Sure!\n```jsx\nfunction Btn(){return <button>Hi</button>}\nexport default Btn\n```\nEnjoy.";
        assert_eq!(
            extract_code(text),
            "function Btn(){return <button>Hi</button>}\nexport default Btn"
        );
    }

    #[test]
    fn test_extract_code_untagged_fence() {
        assert_eq!(extract_code("```\n  const A = 1;  \n```"), "const A = 1;");
    }

    #[test]
    fn test_extract_code_tsx_fence() {
        assert_eq!(
            extract_code("```tsx\nexport const App = () => null;\n```"),
            "export const App = () => null;"
        );
    }

    #[test]
    fn test_extract_code_without_fence_uses_whole_text() {
        assert_eq!(
            extract_code("\n  function App() { return null }\n"),
            "function App() { return null }"
        );
    }

    #[test]
    fn test_extract_code_takes_first_block_only() {
        let text = "```jsx\nfirst\n```\n\n```jsx\nsecond\n```";
        assert_eq!(extract_code(text), "first");
    }

    #[test]
    fn test_build_prompt_embeds_description() {
        let prompt = build_prompt("a pricing table");
        assert!(prompt.contains("description: a pricing table."));
        assert!(prompt.contains("Tailwind CSS"));
        assert!(prompt.contains("without any explanations"));
    }

    #[tokio::test]
    async fn test_button_scenario_extracts_source() {
        let http = RecordingHttpClient::new(
            200,
            &gemini_reply(
                "```jsx\nfunction Btn(){return <button>Hi</button>}\nexport default Btn\n```",
            ),
        );
        let (generator, _) = generator(http.clone(), Some("key-123"));

        let result = generator
            .generate_code(&GenerationRequest::new("Create a button component"))
            .await
            .unwrap();

        assert_eq!(
            result.extracted_source,
            "function Btn(){return <button>Hi</button>}\nexport default Btn"
        );
        assert!(result.raw_response.get("candidates").is_some());
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_request_shape() {
        let http = RecordingHttpClient::new(200, &gemini_reply("ok"));
        let (generator, _) = generator(http.clone(), Some("key-123"));
        let generator = generator.with_api_base("http://localhost:9999/");

        generator
            .generate_code(&GenerationRequest::new("a navbar").with_model("gemini-1.5-flash"))
            .await
            .unwrap();

        let last = http.last.lock().unwrap();
        assert_eq!(
            last.url,
            "http://localhost:9999/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert!(last
            .headers
            .contains(&("x-goog-api-key".to_string(), "key-123".to_string())));
        assert_eq!(last.body["generationConfig"]["topK"], 40);
        assert_eq!(last.body["generationConfig"]["maxOutputTokens"], 8192);
        let text = last.body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("a navbar"));
    }

    #[tokio::test]
    async fn test_missing_credential_skips_network() {
        let http = RecordingHttpClient::new(200, &gemini_reply("unused"));
        let (generator, notifier) = generator(http.clone(), None);

        let result = generator
            .generate_code(&GenerationRequest::new("Create a button component"))
            .await;

        assert!(result.is_none());
        assert_eq!(http.calls(), 0);
        let toasts = notifier.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].title, "API Key Missing");
    }

    #[tokio::test]
    async fn test_missing_credential_error_kind() {
        let http = RecordingHttpClient::new(200, &gemini_reply("unused"));
        let (generator, _) = generator(http, None);

        let err = generator
            .try_generate_code(&GenerationRequest::new("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::CredentialMissing));
    }

    #[tokio::test]
    async fn test_service_error_message_is_surfaced() {
        let http = RecordingHttpClient::new(429, r#"{"error":{"message":"quota exceeded"}}"#);
        let (generator, notifier) = generator(http, Some("key"));

        let err = generator
            .try_generate_code(&GenerationRequest::new("anything"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");

        assert!(generator.generate_code(&GenerationRequest::new("anything")).await.is_none());
        let toasts = notifier.toasts();
        assert_eq!(toasts[0].title, "Generation Failed");
        assert_eq!(toasts[0].description, "quota exceeded");
    }

    #[tokio::test]
    async fn test_service_error_without_message_is_generic() {
        let http = RecordingHttpClient::new(500, "<html>oops</html>");
        let (generator, _) = generator(http, Some("key"));

        let err = generator
            .try_generate_code(&GenerationRequest::new("anything"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to generate code");
    }

    #[tokio::test]
    async fn test_missing_text_is_empty_generation() {
        let http = RecordingHttpClient::new(200, r#"{"candidates":[]}"#);
        let (generator, _) = generator(http, Some("key"));

        let err = generator
            .try_generate_code(&GenerationRequest::new("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::EmptyGeneration));
        assert_eq!(err.to_string(), "No code was generated");
    }

    #[tokio::test]
    async fn test_mock_generator_button() {
        let generator = MockGenerator::new(Arc::new(MemoryNotifier::new(1)));
        let result = generator
            .generate_code(&GenerationRequest::new("Create a button component"))
            .await
            .unwrap();
        assert!(result.extracted_source.starts_with("function Btn()"));
        assert!(result.extracted_source.ends_with("export default Btn"));
    }
}
