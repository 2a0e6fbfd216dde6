//! Hard caps on inputs and table sizes.

use std::time::Duration;

use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CLIENT_NAME_LEN: usize = 64;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// Longest inbound line accepted before the connection answers with a
/// validation error and skips to the next newline.
pub const MAX_LINE_LEN: usize = 4096;

/// Outbound messages queued per client before broadcasts to it are dropped.
pub const CLIENT_QUEUE_DEPTH: usize = 256;

/// How long a new connection has to send its `Name <client>` line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_LOCK_WINDOW_MS: Ms = 5 * 60 * 1000;
