//! # Mailcast Core
//! Shared foundation for the Mailcast campaign engine: error taxonomy,
//! configuration, campaign data model, and the collaborator traits
//! (transport, resource resolver, recipient source, durable store)
//! implemented by the outer crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MailcastConfig;
pub use error::{MailcastError, Result};
pub use types::{
    Campaign, CampaignStatus, InlineResource, Recipient, RenderedEmail, RunOutcome, Schedule,
    VariableBinding,
};
