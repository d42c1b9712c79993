use std::time::{SystemTime, UNIX_EPOCH};

use crate::objects::object::NativeObject;
use crate::value::{make_number_value, Value};

/// Seconds since the Unix epoch, as a number.
pub struct ClockTime;

impl NativeObject for ClockTime {
    fn run(&self, _args: &[Value]) -> Result<Value, String> {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|error| error.to_string())?;
        Ok(make_number_value(duration.as_secs_f64()))
    }
}

impl ClockTime {
    pub fn new() -> ClockTime {
        ClockTime
    }
}

impl Default for ClockTime {
    fn default() -> Self {
        ClockTime::new()
    }
}
