pub(crate) mod assign;
pub(crate) mod check;
pub(crate) mod import;
pub(crate) mod init;

use serde_json::Value;

use crate::session::Session;

/// Parse a `--overrides` argument.
pub(crate) fn parse_overrides(session: &Session, raw: Option<&str>) -> Option<Value> {
    raw.map(|s| match serde_json::from_str(s) {
        Ok(v) => v,
        Err(e) => session.fail(&format!("invalid --overrides JSON: {}", e)),
    })
}
