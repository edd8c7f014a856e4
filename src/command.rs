use futures::{
    FutureExt, StreamExt,
    stream::{self, BoxStream},
};

/// A one-off asynchronous operation that produces messages.
///
/// Commands are how writes are surfaced to message-driven consumers: a
/// mutation becomes a command that yields its result once. Reads are
/// [`Subscription`](crate::subscription::Subscription)s instead, because they
/// keep producing values as the cache changes.
///
/// A command does nothing until its stream is polled.
///
/// # Examples
///
/// ```
/// use storekeep::command::Command;
///
/// enum Message {
///     GotResult(i32),
/// }
///
/// let cmd = Command::perform(async { 42 }, Message::GotResult);
/// ```
pub struct Command<Msg: Send + 'static> {
    stream: Option<BoxStream<'static, Msg>>,
}

impl<Msg: Send + 'static> Command<Msg> {
    /// Create a command that does nothing.
    ///
    /// ```
    /// use storekeep::command::Command;
    ///
    /// let cmd: Command<i32> = Command::none();
    /// assert!(cmd.is_none());
    /// ```
    #[must_use]
    pub fn none() -> Self {
        Self { stream: None }
    }

    /// Perform an asynchronous operation and convert its result to a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use storekeep::command::Command;
    ///
    /// async fn cancel_order() -> Result<u64, String> {
    ///     Ok(5)
    /// }
    ///
    /// enum Message {
    ///     Cancelled(Result<u64, String>),
    /// }
    ///
    /// let cmd = Command::perform(cancel_order(), Message::Cancelled);
    /// ```
    pub fn perform<A>(
        future: impl Future<Output = A> + Send + 'static,
        f: impl FnOnce(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::future(future.map(f))
    }

    /// Create a command from a future that produces a message.
    pub fn future(future: impl Future<Output = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(future.into_stream().boxed()),
        }
    }

    /// Convert the messages of this command.
    ///
    /// ```
    /// use storekeep::command::Command;
    ///
    /// let cmd = Command::future(async { 21 }).map(|n| n * 2);
    /// ```
    #[must_use]
    pub fn map<U: Send + 'static>(self, f: impl Fn(Msg) -> U + Send + 'static) -> Command<U> {
        Command {
            stream: self.stream.map(|stream| stream.map(f).boxed()),
        }
    }

    /// Returns `true` for a command that produces nothing.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.stream.is_none()
    }

    /// The messages of this command. Empty for `Command::none()`.
    pub fn into_stream(self) -> BoxStream<'static, Msg> {
        self.stream.unwrap_or_else(|| stream::empty().boxed())
    }
}

impl<Msg: Send + 'static> std::fmt::Debug for Command<Msg> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("is_none", &self.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect<T: Send + 'static>(cmd: Command<T>) -> Vec<T> {
        cmd.into_stream().collect().await
    }

    #[tokio::test]
    async fn test_perform() {
        let cmd = Command::perform(async { "order" }, str::len);
        assert_eq!(collect(cmd).await, vec![5]);
    }

    #[tokio::test]
    async fn test_none_yields_nothing() {
        let cmd: Command<i32> = Command::none();
        assert!(cmd.is_none());
        assert!(collect(cmd).await.is_empty());
    }

    #[tokio::test]
    async fn test_map() {
        let cmd = Command::future(async { 5 }).map(|n| format!("order {n}"));
        assert!(!cmd.is_none());
        assert_eq!(collect(cmd).await, vec!["order 5".to_string()]);

        let none: Command<String> = Command::<i32>::none().map(|n| n.to_string());
        assert!(none.is_none());
        assert!(collect(none).await.is_empty());
    }
}
