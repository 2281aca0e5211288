//! Reading companion for the robotics book: a retrying client for the RAG
//! backend, the per-reader conversation state, and a small actix-web host
//! that serves the chat widget.

pub mod auth;
pub mod client;
pub mod config;
pub mod session;
pub mod web;
pub mod widget;
