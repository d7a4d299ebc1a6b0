pub mod telegram;

/// A text message received from the messaging platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform-specific chat id the reply goes back to
    pub chat_id: i64,
    /// Sender's user id, absent for anonymous channel posts
    pub user_id: Option<u64>,
    /// Display name of the sender
    pub user_name: String,
    /// The message text
    pub text: String,
}
