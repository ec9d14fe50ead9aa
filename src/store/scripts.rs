//! Lua script for the atomic multi-limit check-and-increment (spec §4.4).
//!
//! KEYS\[1..N\]  = the counter keys, in priority order (GLOBAL < MONTHLY < WINDOW).
//! ARGV\[1..N\]   = the ceiling for each corresponding key.
//! ARGV\[N+1..2N\] = the TTL (seconds) to set on that key's first increment.
//!
//! Phase 1 is read-only: the first key whose current count already meets or
//! exceeds its ceiling aborts the whole operation and no key is touched.
//! Phase 2 only runs if every key passed phase 1, and increments all of
//! them; a counter's TTL is set only on the transition from 0 to 1 so later
//! increments inside the same bucket never reset it.
//!
//! Returns either `{0, failed_index, current_count, ceiling, residual_ttl}`
//! (denied) or `{1, max_ttl, {count_1, ..., count_N}}` (admitted).
pub const MULTI_LIMIT_EVAL: &str = r"
local n = #KEYS
for i = 1, n do
    local limit = tonumber(ARGV[i])
    local current = tonumber(redis.call('GET', KEYS[i]) or '0')
    if current >= limit then
        local ttl = redis.call('PTTL', KEYS[i])
        if ttl < 0 then ttl = 0 end
        return {0, i - 1, current, limit, math.ceil(ttl / 1000)}
    end
end

local max_ttl = 0
local counts = {}
for i = 1, n do
    local new = redis.call('INCR', KEYS[i])
    counts[i] = new
    local this_ttl
    if new == 1 then
        this_ttl = tonumber(ARGV[n + i])
        redis.call('EXPIRE', KEYS[i], this_ttl)
    else
        this_ttl = redis.call('TTL', KEYS[i])
    end
    if this_ttl and this_ttl > max_ttl then
        max_ttl = this_ttl
    end
end

return {1, max_ttl, counts}
";
