//! The admission procedure.
//!
//! KEYS: `[stock, orderSet, begin, end, stream]`
//! ARGV: `[voucherId, userId, orderId, nowMillis]`
//!
//! Reply: `0` admitted, `1` out of stock, `2` duplicate order, `3` not
//! started, `4` ended, `5` unknown voucher (no stock key). A missing window
//! bound leaves that side of the window open.

use bazaar_store::procedure::{arg_at, key_at};
use bazaar_store::{MemoryState, Procedure, ScriptValue, StoreError, StoreResult};

use crate::order::{FIELD_ORDER_ID, FIELD_USER_ID, FIELD_VOUCHER_ID};

pub const STATUS_ADMITTED: i64 = 0;
pub const STATUS_OUT_OF_STOCK: i64 = 1;
pub const STATUS_DUPLICATE: i64 = 2;
pub const STATUS_NOT_STARTED: i64 = 3;
pub const STATUS_ENDED: i64 = 4;
pub const STATUS_UNKNOWN_VOUCHER: i64 = 5;

pub const ADMISSION: Procedure = Procedure::new(
    "seckill_admit",
    r#"
local stock = redis.call('get', KEYS[1])
if not stock then
    return 5
end
local now = tonumber(ARGV[4])
local begin_at = redis.call('get', KEYS[3])
if begin_at and now < tonumber(begin_at) then
    return 3
end
local end_at = redis.call('get', KEYS[4])
if end_at and now > tonumber(end_at) then
    return 4
end
if tonumber(stock) <= 0 then
    return 1
end
if redis.call('sismember', KEYS[2], ARGV[2]) == 1 then
    return 2
end
redis.call('incrby', KEYS[1], -1)
redis.call('sadd', KEYS[2], ARGV[2])
redis.call('xadd', KEYS[5], '*', 'userId', ARGV[2], 'voucherId', ARGV[1], 'id', ARGV[3])
return 0
"#,
    admit_native,
);

fn admit_native(
    state: &mut MemoryState,
    keys: &[String],
    args: &[String],
) -> StoreResult<ScriptValue> {
    let name = ADMISSION.name();
    let stock_key = key_at(name, keys, 0)?;
    let order_set = key_at(name, keys, 1)?;
    let begin_key = key_at(name, keys, 2)?;
    let end_key = key_at(name, keys, 3)?;
    let stream = key_at(name, keys, 4)?;
    let voucher_id = arg_at(name, args, 0)?;
    let user_id = arg_at(name, args, 1)?;
    let order_id = arg_at(name, args, 2)?;
    let now: i64 = arg_at(name, args, 3)?
        .parse()
        .map_err(|_| StoreError::script(name, "ARGV[4] must be epoch milliseconds"))?;

    let Some(stock) = state.get_int(stock_key)? else {
        return Ok(ScriptValue::Int(STATUS_UNKNOWN_VOUCHER));
    };
    if state.get_int(begin_key)?.is_some_and(|begin| now < begin) {
        return Ok(ScriptValue::Int(STATUS_NOT_STARTED));
    }
    if state.get_int(end_key)?.is_some_and(|end| now > end) {
        return Ok(ScriptValue::Int(STATUS_ENDED));
    }
    if stock <= 0 {
        return Ok(ScriptValue::Int(STATUS_OUT_OF_STOCK));
    }
    if state.sismember(order_set, user_id)? {
        return Ok(ScriptValue::Int(STATUS_DUPLICATE));
    }

    state.incr_by(stock_key, -1)?;
    state.sadd(order_set, user_id)?;
    state.xadd(
        stream,
        vec![
            (FIELD_USER_ID.to_string(), user_id.to_string()),
            (FIELD_VOUCHER_ID.to_string(), voucher_id.to_string()),
            (FIELD_ORDER_ID.to_string(), order_id.to_string()),
        ],
    );
    Ok(ScriptValue::Int(STATUS_ADMITTED))
}
