//! Lua scripts for the compare-then-act lock primitives.
//!
//! Both run server-side so the comparison and the action are indivisible.

/// Delete the key only when it still holds the caller's token.
///
/// KEYS[1] = lock key, ARGV[1] = token. Returns 1 when deleted, 0 otherwise.
pub(super) const COMPARE_AND_DELETE: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#;

/// Reset the key's expiry only when it still holds the caller's token.
///
/// KEYS[1] = lock key, ARGV[1] = token, ARGV[2] = ttl in milliseconds.
/// Returns 1 when extended, 0 otherwise.
pub(super) const COMPARE_AND_EXTEND: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
end
return 0
"#;
