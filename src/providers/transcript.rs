//! Prompt/response transcripts written next to the logs.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::provider::{ChatMessage, ChatOptions, Provider, Result};

/// Provider decorator that dumps every exchange as a pair of text files:
/// `<timestamp>-<engine>[-<tag>]-prompt.txt` and `...-response.txt`.
pub struct TranscriptProvider {
    inner: Arc<dyn Provider>,
    dir: PathBuf,
}

impl TranscriptProvider {
    pub fn new(inner: Arc<dyn Provider>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    fn write(&self, tag: Option<&str>, messages: &[ChatMessage], response: Option<&ChatMessage>) {
        if let Err(e) = write_transcript(&self.dir, self.inner.name(), tag, messages, response) {
            tracing::warn!("Failed to write LLM transcript: {}", e);
        }
    }
}

fn write_transcript(
    dir: &Path,
    engine: &str,
    tag: Option<&str>,
    messages: &[ChatMessage],
    response: Option<&ChatMessage>,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S%.3f");
    let suffix = tag.map(|t| format!("-{}", t)).unwrap_or_default();

    let mut prompt = String::new();
    for m in messages {
        prompt.push_str(&format!("[{}]: {}\n\n", m.role, m.content));
        prompt.push_str("------------------------------------------------\n\n");
    }
    std::fs::write(
        dir.join(format!("{}-{}{}-prompt.txt", stamp, engine, suffix)),
        prompt,
    )?;

    if let Some(response) = response {
        std::fs::write(
            dir.join(format!("{}-{}{}-response.txt", stamp, engine, suffix)),
            &response.content,
        )?;
    }
    Ok(())
}

#[async_trait]
impl Provider for TranscriptProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatMessage> {
        let result = self.inner.chat(messages, options).await;
        self.write(options.tag.as_deref(), messages, result.as_ref().ok());
        result
    }

    fn default_model(&self) -> Option<&str> {
        self.inner.default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_prompt_and_response() {
        let dir = TempDir::new().unwrap();
        let scripted = Arc::new(ScriptedProvider::new());
        scripted.push_reply("{\"actions\": []}");

        let provider = TranscriptProvider::new(scripted, dir.path());
        provider
            .chat(
                &[ChatMessage::system("be nice"), ChatMessage::user("hi")],
                &ChatOptions::tagged("watcher"),
            )
            .await
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("-scripted-watcher-prompt.txt"));
        assert!(names[1].ends_with("-scripted-watcher-response.txt"));

        let prompt = std::fs::read_to_string(dir.path().join(&names[0])).unwrap();
        assert!(prompt.starts_with("[system]: be nice"));
        assert!(prompt.contains("[user]: hi"));
    }
}
