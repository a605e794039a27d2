//! Omnichat: message dispatch and stream normalization for a multi-model
//! chat front-end.
//!
//! A user turn flows through the [`enrichment`] pipeline, is fanned out to
//! every target model by the [`dispatch`] orchestrator, streamed through
//! the provider adapters in [`llm`] over the retrying [`transport`], and
//! written incrementally to a [`sink`]. [`session::ChatSession`] ties the
//! steps together for one conversation.

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod enrichment;
pub mod error;
pub mod llm;
pub mod logging;
pub mod session;
pub mod sink;
pub mod transport;

pub use config::{ConnectorSettings, DispatchConfig};
pub use credentials::{ApiKeys, CredentialResolver};
pub use dispatch::{ModelOutcome, ModelStatus, Orchestrator, SystemContext, TurnReport, TurnRequest};
pub use enrichment::{Enricher, Enrichment};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_tracing};
pub use session::{ChatSession, SessionTurn};
pub use sink::{
    ConversationMode, DurableSink, EphemeralSink, InMemoryMessageStore, Message, MessageSink,
    MessageStore, MessageUpdate,
};
pub use transport::{ResilientTransport, RetryConfig};
