//! Marketstall storefront client core.
//!
//! The non-visual half of the storefront: auth state, cart and favorites
//! stores, the login hand-over between them, the card payment form lifecycle
//! and the REST transport they share. A UI shell builds one
//! [`Storefront`](state::Storefront) at start-up and passes it to its views.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod favorites;
pub mod guard;
pub mod payment;
pub mod reconcile;
pub mod state;
pub mod storage;

pub use state::{Backend, Storefront};
