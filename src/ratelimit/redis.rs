//! Redis-backed token bucket.
//!
//! # Responsibilities
//! - Execute the token-bucket refill as a single atomic server-side script
//! - Co-locate the two bucket keys with a hash tag so the script works on
//!   sharded clusters
//! - Allow traffic when the store is unreachable
//!
//! # Design Decisions
//! - The connection is established lazily and reused; a failed connect is
//!   retried on the next check rather than failing requests

use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tokio::sync::OnceCell;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::ratelimit::{epoch_seconds, RateLimitPolicy, RateLimitResponse, RateLimiter};

/// Atomic token-bucket refill-and-take. Returns `[allowed, tokens_left]`.
/// The script runs atomically; nothing interleaves between the reads and
/// the writes.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local timestamp_key = KEYS[2]

local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])

local fill_time = capacity / rate
local ttl = math.floor(fill_time * 2)

local last_tokens = tonumber(redis.call('get', tokens_key))
if last_tokens == nil then
  last_tokens = capacity
end

local last_refreshed = tonumber(redis.call('get', timestamp_key))
if last_refreshed == nil then
  last_refreshed = 0
end

local delta = math.max(0, now - last_refreshed)
local filled_tokens = math.min(capacity, last_tokens + (delta * rate))
local allowed = filled_tokens >= requested
local new_tokens = filled_tokens
local allowed_num = 0
if allowed then
  new_tokens = filled_tokens - requested
  allowed_num = 1
end

if ttl > 0 then
  redis.call('setex', tokens_key, ttl, new_tokens)
  redis.call('setex', timestamp_key, ttl, now)
end

return { allowed_num, new_tokens }
"#;

/// Bucket keys for `key`. The braces form a hash tag so both keys land on
/// the same cluster shard and the script may mutate them together.
fn bucket_keys(key: &str) -> (String, String) {
    let prefix = format!("request_rate_limiter.{{{key}}}");
    (format!("{prefix}.tokens"), format!("{prefix}.timestamp"))
}

pub struct RedisRateLimiter {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
    policy: RateLimitPolicy,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str, policy: RateLimitPolicy) -> Result<Self, GatewayError> {
        let client = redis::Client::open(redis_url).map_err(|error| {
            GatewayError::configuration(format!("invalid redis url '{redis_url}': {error}"))
        })?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            script: Script::new(TOKEN_BUCKET_SCRIPT),
            policy,
        })
    }

    async fn invoke(&self, tokens_key: &str, timestamp_key: &str, rate: u64, burst: u64)
        -> Result<Vec<i64>, RedisError>
    {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        let mut connection = manager.clone();
        self.script
            .key(tokens_key)
            .key(timestamp_key)
            .arg(rate)
            .arg(burst)
            .arg(epoch_seconds())
            .arg(1)
            .invoke_async(&mut connection)
            .await
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_allowed(&self, route_id: &str, key: &str) -> RateLimitResponse {
        let config = self.policy.config_for(route_id).clone();
        let (tokens_key, timestamp_key) = bucket_keys(key);

        let (allowed, tokens_left) = match self
            .invoke(&tokens_key, &timestamp_key, config.replenish_rate, config.burst_capacity)
            .await
        {
            Ok(values) if values.len() == 2 => (values[0] == 1, values[1]),
            Ok(values) => {
                tracing::error!(?values, "unexpected rate limiter script result, allowing request");
                (true, -1)
            }
            // Rate limiting must not become a hard dependency on the store.
            Err(error) => {
                tracing::error!(%error, "rate limiter store unreachable, allowing request");
                (true, -1)
            }
        };

        RateLimitResponse {
            allowed,
            tokens_left,
            headers: self.policy.headers(&config, tokens_left),
        }
    }
}
