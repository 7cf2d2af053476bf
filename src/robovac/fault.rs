use serde_json::Value;

pub const NO_ERROR: &str = "no error";

const FAULTS: &[(&str, &str)] = &[
    ("0", NO_ERROR),
    ("1", "front bumper stuck"),
    ("2", "wheel stuck"),
    ("3", "side brush"),
    ("4", "rolling brush bar stuck"),
    ("5", "device trapped"),
    ("6", "device trapped"),
    ("7", "wheel suspended"),
    ("8", "low battery"),
    ("9", "magnetic boundary"),
    ("12", "right wall sensor"),
    ("13", "device tilted"),
    ("14", "insert dust collector"),
    ("17", "restricted area detected"),
    ("18", "laser cover stuck"),
    ("19", "laser sensor stuck"),
    ("20", "laser sensor blocked"),
    ("21", "base blocked"),
    ("S1", "battery"),
    ("S2", "wheel module"),
    ("S3", "side brush"),
    ("S4", "suction fan"),
    ("S5", "rolling brush"),
    ("S8", "path tracking sensor"),
    ("Wheel_stuck", "wheel stuck"),
    ("R_brush_stuck", "rolling brush stuck"),
    ("Crash_bar_stuck", "front bumper stuck"),
    ("sensor_dirty", "sensor dirty"),
    ("N_enough_pow", "low battery"),
    ("Stuck_5_min", "device trapped"),
    ("Fan_stuck", "fan stuck"),
    ("S_brush_stuck", "side brush stuck"),
];

pub fn lookup(code: &str) -> Option<&'static str> {
    FAULTS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, description)| *description)
}

/// Describe a raw error register value. Unknown codes are passed through as text.
pub fn describe(raw: &Value) -> String {
    let code = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    lookup(&code).map(String::from).unwrap_or(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_codes() {
        assert_eq!(describe(&json!(0)), "no error");
        assert_eq!(describe(&json!(2)), "wheel stuck");
        assert_eq!(describe(&json!("2")), "wheel stuck");
        assert_eq!(describe(&json!("S4")), "suction fan");
        assert_eq!(describe(&json!("Stuck_5_min")), "device trapped");
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(lookup("10"), None);
        assert_eq!(describe(&json!(10)), "10");
        assert_eq!(describe(&json!("Brush_on_fire")), "Brush_on_fire");
    }
}
