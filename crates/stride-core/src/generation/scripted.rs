use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{FragmentStream, PlanPrompt, PlanSource};

/// Replays a fixed list of fragments.
///
/// Used by tests and by `stride replay` to drive the pipeline without a
/// network service. Can be told to fail on open or at a given fragment.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    fragments: Vec<String>,
    fail_on_open: Option<String>,
    fail_at: Option<(usize, String)>,
}

impl ScriptedSource {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Split `text` into fragments of `size` characters.
    pub fn chunked(text: &str, size: usize) -> Self {
        let size = size.max(1);
        let chars: Vec<char> = text.chars().collect();
        Self::new(chars.chunks(size).map(|c| c.iter().collect::<String>()))
    }

    /// Reject the request before any fragment is produced.
    pub fn failing_on_open(mut self, message: impl Into<String>) -> Self {
        self.fail_on_open = Some(message.into());
        self
    }

    /// Yield an error in place of fragment `index` and stop there.
    pub fn failing_at(mut self, index: usize, message: impl Into<String>) -> Self {
        self.fail_at = Some((index, message.into()));
        self
    }

    /// Full text this source produces when nothing fails.
    pub fn text(&self) -> String {
        self.fragments.concat()
    }
}

#[async_trait]
impl PlanSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, _prompt: &PlanPrompt) -> Result<FragmentStream> {
        if let Some(message) = &self.fail_on_open {
            return Err(anyhow!("{message}"));
        }

        let fragments = self.fragments.clone();
        let fail_at = self.fail_at.clone();
        let stream = async_stream::stream! {
            for (index, fragment) in fragments.into_iter().enumerate() {
                if let Some((at, message)) = &fail_at {
                    if *at == index {
                        yield Err(anyhow!("{message}"));
                        break;
                    }
                }
                tokio::task::yield_now().await;
                yield Ok(fragment);
            }
        };
        Ok(Box::pin(stream))
    }
}
