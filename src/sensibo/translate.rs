//! Inbound message → Sensibo command patch

use serde_json::Value;

use crate::models::{Message, Patch};

/// Passthrough fields: inbound name → acState attribute
const PASSTHROUGH: &[(&str, &str)] = &[
    ("swing", "swing"),
    ("mode", "mode"),
    ("fanlevel", "fanLevel"),
    ("targetTemperature", "targetTemperature"),
];

/// Build a patch from the recognised fields of `msg`.
///
/// Absent fields are left out of the patch entirely so the merge keeps the
/// device's current value. `on` becomes `true` only for the string `"true"`;
/// any other present value, a JSON `true` included, switches the unit off.
pub fn translate_command(msg: &Message) -> Patch {
    let mut patch = Patch::new();

    if let Some(on) = msg.get("on") {
        let on = matches!(on, Value::String(s) if s == "true");
        patch.set("on", Value::Bool(on));
    }

    for (inbound, attribute) in PASSTHROUGH {
        if let Some(value) = msg.get(*inbound) {
            patch.set(attribute, value.clone());
        }
    }

    patch
}
