//! JSON output. Entries use the same shape `json` archives read, so an
//! export can be imported again.

use serde::Serialize;

use crate::error::Result;

pub fn render<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
