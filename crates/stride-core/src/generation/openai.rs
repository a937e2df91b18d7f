use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{FragmentStream, PlanPrompt, PlanSource};

/// Connection settings for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

impl OpenAiConfig {
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_owned(),
            model: Self::DEFAULT_MODEL.to_owned(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

/// Text carried by one `data:` payload; `None` for the `[DONE]` terminator.
fn chunk_text(data: &str) -> Result<Option<String>> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }
    let chunk: CompletionChunk =
        serde_json::from_str(data).with_context(|| format!("malformed completion chunk: {data}"))?;
    let text = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect::<String>();
    Ok(Some(text))
}

/// Streaming chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiSource {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiSource {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PlanSource for OpenAiSource {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open(&self, prompt: &PlanPrompt) -> Result<FragmentStream> {
        let body = json!({
            "model": self.config.model,
            "stream": true,
            "messages": prompt.messages(),
        });

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach completion service")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("completion service returned {status}: {detail}");
        }
        debug!(model = %self.config.model, "completion stream opened");

        Ok(completion_fragments(response.bytes_stream().eventsource()))
    }
}

/// Turn server-sent completion events into plan fragments.
///
/// The stream must end with `[DONE]`; a body that closes before it is an
/// error so a cut-off generation is never persisted as a whole plan.
fn completion_fragments<S, E>(events: S) -> FragmentStream
where
    S: Stream<Item = Result<Event, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut events = Box::pin(events);
        let mut finished = false;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    finished = true;
                    yield Err(anyhow!("completion stream broke: {e}"));
                    break;
                }
            };
            match chunk_text(&event.data) {
                Ok(Some(text)) if text.is_empty() => {}
                Ok(Some(text)) => {
                    yield Ok(text);
                }
                Ok(None) => {
                    finished = true;
                    break;
                }
                Err(e) => {
                    finished = true;
                    yield Err(e);
                    break;
                }
            }
        }
        if !finished {
            yield Err(anyhow!("completion stream ended before [DONE]"));
        }
    };
    Box::pin(stream)
}
