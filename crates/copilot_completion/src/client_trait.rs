use async_trait::async_trait;

/// A completion model a host editor can list and query.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Returns the suggested continuation of `prompt`, or `""` on any failure.
    async fn complete(&self, prompt: &str) -> String;
}
