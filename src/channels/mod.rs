//! Mail transports: where raw messages come from and where digests go.

pub mod imap_source;
pub mod smtp_notifier;

pub use imap_source::ImapSource;
pub use smtp_notifier::{DisabledNotifier, SmtpNotifier};
