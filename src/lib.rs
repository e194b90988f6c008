//! Client SDK for Nyx, a federated data exchange.
//!
//! Connect with a [`NyxConfig`], then search ([`DataFilter`]), subscribe to,
//! publish and read datasets ([`Data`]) through a [`NyxClient`].

pub mod circles;
pub mod client;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod http;
pub mod products;
pub mod property;
pub mod query;
pub mod subscriptions;

pub use circles::{Circle, RemoteHost};
pub use client::{NyxClient, Session};
pub use config::NyxConfig;
pub use connection::Connection;
pub use data::{Content, Data, Visibility};
pub use error::{ErrorKind, NyxError, Result};
pub use products::{DataUpdate, FilePayload, NewData};
pub use property::{Property, PropertyValue};
pub use query::{DataFilter, Scope, SparqlResultType, SubscriptionState};
