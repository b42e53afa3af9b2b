//! Namespaced standard library (`math/`, `str/`, `array/`, ...)
//!
//! Everything here is pure except `async/*`, which schedules deferred work.

mod array;
mod deferred;
mod format;
mod math;
mod object;
mod string;
mod time;
mod validate;

use crate::eval::OperatorTable;

pub(crate) fn register(table: &mut OperatorTable) {
    math::register(table);
    string::register(table);
    array::register(table);
    object::register(table);
    validate::register(table);
    time::register(table);
    format::register(table);
    deferred::register(table);
}
