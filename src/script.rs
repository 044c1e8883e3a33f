use deadpool_redis::redis::{self, Script, aio::ConnectionLike};

use crate::error::ImqError;

/// Atomically promotes every due member of the delayed sorted set onto the
/// ready list. `KEYS = [zset, list]`, `ARGV = [now_ms]`; returns the number
/// of promoted envelopes.
const MOVE_DELAYED_LUA: &str = r#"
local ready = redis.call('ZRANGEBYSCORE', KEYS[1], 0, ARGV[1])
for i = 1, #ready do
    redis.call('LPUSH', KEYS[2], ready[i])
end
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1])
return #ready
"#;

/// Named server-side scripts, invoked by content hash. The driver handles
/// the EVALSHA / SCRIPT LOAD round-trip per invocation; [`Self::load_all`]
/// uploads everything eagerly when a process takes the watcher role.
pub(crate) struct ScriptRegistry {
    move_delayed: Script,
}

impl ScriptRegistry {
    pub(crate) fn new() -> Self {
        Self {
            move_delayed: Script::new(MOVE_DELAYED_LUA),
        }
    }

    pub(crate) fn move_delayed(&self) -> &Script {
        &self.move_delayed
    }

    pub(crate) async fn load_all<C>(&self, conn: &mut C) -> Result<(), ImqError>
    where
        C: ConnectionLike + Send,
    {
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(MOVE_DELAYED_LUA)
            .query_async(conn)
            .await?;
        tracing::debug!(script = "move_delayed", sha, "script cached");
        Ok(())
    }
}
