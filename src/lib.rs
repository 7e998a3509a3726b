//! Client library for a JDK Flight Recorder management server.
//!
//! [`api::ApiClient`] speaks the REST API, [`channel::CommandChannel`] the
//! WebSocket command channel. Both share a [`target::TargetContext`] for the
//! selected JVM and its JMX credentials, and report user-facing outcomes
//! through [`notify::Notifications`]. The [`views`] module builds polled,
//! selectable lists on top of them.

pub mod api;
pub mod batch;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod error;
pub mod model;
pub mod notify;
pub mod poller;
pub mod target;
pub mod templates;
pub mod validation;
pub mod views;

pub use error::{ChannelError, ClientError};
