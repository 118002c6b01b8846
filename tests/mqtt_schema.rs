// Schema validation tests for the bridge's MQTT messages
//
// Instances are built as plain JSON and checked against schemas/mqtt/.

use serde_json::json;

fn load_schema(name: &str) -> serde_json::Value {
    let path = format!(
        "{}/schemas/mqtt/{name}",
        env!("CARGO_MANIFEST_DIR")
    );
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read schema {path}: {e}"));
    serde_json::from_str(&text)
        .unwrap_or_else(|e| panic!("Failed to parse schema {path}: {e}"))
}

fn build_validator(schema_name: &str) -> jsonschema::Validator {
    let schema = load_schema(schema_name);
    jsonschema::options()
        .with_retriever(LocalRetriever)
        .build(&schema)
        .unwrap_or_else(|e| panic!("Failed to compile schema {schema_name}: {e}"))
}

fn validate(schema_name: &str, instance: &serde_json::Value) {
    let validator = build_validator(schema_name);
    let errors: Vec<_> = validator.iter_errors(instance).collect();
    if !errors.is_empty() {
        let msgs: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        panic!(
            "Schema validation failed for {schema_name}:\n{}\nInstance: {}",
            msgs.join("\n"),
            serde_json::to_string_pretty(instance).unwrap()
        );
    }
}

fn validate_fails(schema_name: &str, instance: &serde_json::Value) {
    let validator = build_validator(schema_name);
    assert!(
        !validator.is_valid(instance),
        "Expected schema validation to fail for {schema_name}, but it passed.\nInstance: {}",
        serde_json::to_string_pretty(instance).unwrap()
    );
}

// Retriever that loads $ref schemas from the local filesystem
struct LocalRetriever;

impl jsonschema::Retrieve for LocalRetriever {
    fn retrieve(
        &self,
        uri: &jsonschema::Uri<&str>,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
        let uri_str = uri.as_str();
        let schema_dir = format!("{}/schemas/mqtt/", env!("CARGO_MANIFEST_DIR"));

        // Extract the schema filename from various URI forms:
        // - "json-schema:///properties.schema.json"
        // - "file:///path/to/properties.schema.json"
        // - "properties.schema.json"
        let filename = if let Some(rest) = uri_str.strip_prefix("json-schema:///") {
            rest
        } else if let Some(path) = uri_str.strip_prefix("file://") {
            // For file:// URIs, use the path directly
            let text = std::fs::read_to_string(path)?;
            return Ok(serde_json::from_str(&text)?);
        } else {
            uri_str
        };

        let path = format!("{schema_dir}{filename}");
        if std::path::Path::new(&path).exists() {
            let text = std::fs::read_to_string(&path)?;
            return Ok(serde_json::from_str(&text)?);
        }
        Err(format!("Cannot retrieve schema: {uri_str}").into())
    }
}

// =========================================================================
// DEVICE_UPDATE
// =========================================================================

#[test]
fn device_update_valid() {
    validate(
        "device_update.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "device": "lumi.158d0001a2b3c4",
            "update": {"temperature": 21.5},
            "properties": {
                "temperature": 21.5,
                "humidity": 40.2,
                "pressure": 101.3,
                "battery_voltage": 3.005
            }
        }),
    );
}

#[test]
fn device_update_motion_object() {
    validate(
        "device_update.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "device": "lumi.158d0002",
            "update": {"motion": {"active": true, "at": 1760780000000_u64}},
            "properties": {
                "motion": {"active": true, "at": 1760780000000_u64},
                "battery_voltage": null
            }
        }),
    );
}

#[test]
fn device_update_gateway_alarm() {
    validate(
        "device_update.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "device": "gateway",
            "update": {"alarm": true},
            "properties": {"alarm": true}
        }),
    );
}

#[test]
fn device_update_empty_update_rejected() {
    validate_fails(
        "device_update.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "device": "gateway",
            "update": {},
            "properties": {"alarm": false}
        }),
    );
}

#[test]
fn device_update_missing_device_rejected() {
    validate_fails(
        "device_update.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "update": {"open": true},
            "properties": {"open": true}
        }),
    );
}

#[test]
fn device_update_array_value_rejected() {
    validate_fails(
        "device_update.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "device": "humidifier",
            "update": {"power": ["on"]},
            "properties": {"power": ["on"]}
        }),
    );
}

// =========================================================================
// DISCOVER_RESPONSE
// =========================================================================

#[test]
fn discover_response_valid() {
    validate(
        "discover_response.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DISCOVER_RESPONSE",
            "device": "humidifier",
            "model": "zhimi.humidifier.ca1",
            "properties": {
                "power": true,
                "humidity": 45,
                "temperature": 22.1,
                "mode": "auto",
                "depth": 60
            }
        }),
    );
}

#[test]
fn discover_response_child_before_first_report() {
    validate(
        "discover_response.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DISCOVER_RESPONSE",
            "device": "lumi.158d0003",
            "model": "lumi.sensor_magnet.aq2",
            "properties": {"open": false, "battery_voltage": null}
        }),
    );
}

#[test]
fn discover_response_missing_model_rejected() {
    validate_fails(
        "discover_response.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DISCOVER_RESPONSE",
            "device": "gateway",
            "properties": {}
        }),
    );
}

#[test]
fn discover_response_wrong_op_rejected() {
    validate_fails(
        "discover_response.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "DEVICE_UPDATE",
            "device": "gateway",
            "model": "lumi.gateway.mgl03",
            "properties": {}
        }),
    );
}

// =========================================================================
// CMD_ACK
// =========================================================================

#[test]
fn cmd_ack_call_result() {
    validate(
        "cmd_ack.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "CMD_ACK",
            "success": true,
            "src": {"op": "DEVICE_CALL", "device": "humidifier", "method": "enable", "params": {}},
            "data": {"code": 0, "data": {"properties": {"power": true}}}
        }),
    );
}

#[test]
fn cmd_ack_timeout_result() {
    validate(
        "cmd_ack.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "CMD_ACK",
            "success": false,
            "src": {"op": "DEVICE_CALL", "device": "gateway", "method": "miio.call",
                    "params": {"method": "get_device_prop", "params": []}},
            "data": {"code": -1, "data": {"error": "Timeout"}}
        }),
    );
}

#[test]
fn cmd_ack_minimal() {
    validate(
        "cmd_ack.schema.json",
        &json!({"now": 1760780000000_u64, "op": "CMD_ACK", "success": true}),
    );
}

#[test]
fn cmd_ack_status() {
    validate(
        "cmd_ack.schema.json",
        &json!({
            "now": 1760780000000_u64,
            "op": "CMD_ACK",
            "success": true,
            "src": {"op": "STATUS"},
            "data": {"uptime_secs": 3600, "memory_bytes": 18874368, "devices": 7}
        }),
    );
}

#[test]
fn cmd_ack_missing_success_rejected() {
    validate_fails(
        "cmd_ack.schema.json",
        &json!({"now": 1760780000000_u64, "op": "CMD_ACK"}),
    );
}

#[test]
fn cmd_ack_unknown_field_rejected() {
    validate_fails(
        "cmd_ack.schema.json",
        &json!({"now": 1760780000000_u64, "op": "CMD_ACK", "success": true, "error": "x"}),
    );
}

// =========================================================================
// Commands
// =========================================================================

#[test]
fn command_device_call_valid() {
    validate(
        "command.schema.json",
        &json!({
            "op": "DEVICE_CALL",
            "device": "gateway",
            "method": "triggerAlarm",
            "params": {"enable": true, "duration": 10}
        }),
    );
}

#[test]
fn command_simple_ops_valid() {
    for op in ["DISCOVER", "STATUS", "PING"] {
        validate("command.schema.json", &json!({"op": op}));
    }
}

#[test]
fn command_device_call_without_method_rejected() {
    validate_fails(
        "command.schema.json",
        &json!({"op": "DEVICE_CALL", "device": "gateway"}),
    );
}

#[test]
fn command_unknown_op_rejected() {
    validate_fails("command.schema.json", &json!({"op": "ARM"}));
}
