//! Domain types shared across the Leadflow crates.

pub mod event;
pub mod identifiers;
pub mod job;
pub mod lead;
pub mod message;
pub mod number;
pub mod provider;

pub use event::{
    CrmLeadEventPayload, DeliveryReceiptEvent, InboundEvent, InboundEventKind, InboundMessageEvent,
};
pub use identifiers::{JobId, LeadId, MessageId, PhoneNumber, TenantId};
pub use job::{Job, JobKind, JobStatus, SendMessagePayload};
pub use lead::{ConversationMessage, Lead, MessageDirection};
pub use message::{DeliveryStatus, OutboundMessage};
pub use number::{SendingNumber, WarmupState};
pub use provider::ProviderType;
