//! # Mailcast SMTP
//! Outbound transport (lettre over STARTTLS) and resolvers for embedded
//! template assets.

pub mod mailer;
pub mod resolver;

pub use mailer::{SmtpMailer, SmtpTransportFactory};
pub use resolver::{DirResolver, HttpResolver};
