//! # Turnstile Server
//!
//! A standalone admission service putting turnstile policies behind HTTP.
//!
//! ## Purpose
//!
//! Services that cannot link the `turnstile` library, or that prefer to keep
//! their limits in one place, ask this server before doing protected work.
//! Every instance shares its buckets through Redis, so any number of
//! instances can run behind a load balancer and enforce the same limits.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! turnstile --help
//!
//! # Login protection (5/min, burst 5) against a local Redis
//! turnstile
//!
//! # Custom policies on an in-memory store
//! turnstile --store memory --policy auth:login=5/5 --policy search=60/10
//!
//! # List all available environment variables
//! turnstile --list-env-vars
//! ```
//!
//! ### Key Configuration Options
//!
//! - **Policies**: `--policy PURPOSE=LIMIT[/BURST]` (repeatable) or `--policy-file`
//! - **Store Type**: `--store redis|memory`, `--redis-url`, `--store-timeout-ms`
//! - **HTTP**: `--http-host 0.0.0.0 --http-port 8080`
//! - **Log Level**: `--log-level error|warn|info|debug|trace`, `--log-json`
//!
//! ## How It Works
//!
//! Each purpose has a token bucket per caller identity, keyed
//! `rl:<purpose>:<identity>`:
//! - Buckets hold up to `burst` tokens
//! - Tokens refill at `limit_per_minute / 60` per second
//! - Each admission consumes `requested` tokens (default: 1)
//! - Empty buckets answer `429 Too Many Requests`
//!
//! When Redis is unreachable or slow, requests are admitted and the response
//! carries `"failed_open": true`.
//!
//! ### Client Example
//!
//! ```bash
//! curl -X POST http://localhost:8080/admit/auth:login \
//!   -H "Content-Type: application/json" \
//!   -d '{"principal": "alice"}'
//! ```

pub mod admission;
pub mod config;
pub mod metrics;
pub mod store;
pub mod transport;
pub mod types;
