//! coin_shop: PayPal-backed coin store for a game-server control panel.
//!
//! A player picks a package from the [`catalog`], pays through PayPal, and
//! the [`reconciler`] captures the order, checks the captured amount against
//! the catalog and credits the account exactly once through the
//! [`repository`]. The [`api`] module exposes all of it over HTTP.

pub mod api;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod history;
pub mod provider;
pub mod reconciler;
pub mod repository;
