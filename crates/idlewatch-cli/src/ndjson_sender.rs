use async_trait::async_trait;
use idlewatch_runtime::{DigestSender, DispatchError};
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Emits each digest as one `{"group_id","text"}` JSON line.
pub(crate) struct NdjsonSender<W> {
    writer: Mutex<W>,
}

impl<W> NdjsonSender<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

pub(crate) fn render_send_line(group_id: &str, text: &str) -> String {
    let mut line = json!({ "group_id": group_id, "text": text }).to_string();
    line.push('\n');
    line
}

#[async_trait]
impl<W> DigestSender for NdjsonSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_message(&self, group_id: &str, text: &str) -> Result<(), DispatchError> {
        let line = render_send_line(group_id, text);
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|error| DispatchError::Transport(error.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|error| DispatchError::Transport(error.to_string()))
    }
}
