//! Building portal: REST API for a residential building.
//!
//! Admins manage buildings, flats, monthly contributions and gas cylinder logs;
//! residents sign in with their flat number and phone to see their own
//! contributions. Storage is sled with JSON documents, sessions are HS256
//! tokens carried in an httpOnly cookie.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
// Admin and flat gates, generic over the principal kind
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod resources;
// Axum router and session handlers
pub mod rest;
pub mod storage;

#[cfg(test)]
mod test_support;
