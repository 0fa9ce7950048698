use serde_json::Value;
use uuid::Uuid;

use medtrip_gateway::{Gateway, GatewayResultExt};
use medtrip_types::Select;

use crate::error::Result;

/// Display name for a user or clinic id: the profile's full name, else the
/// clinic's name. `None` when neither exists or the name is blank.
pub async fn display_name(gateway: &dyn Gateway, id: Uuid) -> Result<Option<String>> {
    let profile = gateway
        .single(Select::from("profiles").eq("id", id))
        .await
        .optional()?;
    if let Some(name) = profile.as_ref().and_then(|p| text(p.get("full_name"))) {
        return Ok(Some(name));
    }

    let clinic = gateway
        .single(Select::from("clinics").eq("id", id))
        .await
        .optional()?;
    Ok(clinic.as_ref().and_then(|c| text(c.get("name"))))
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
