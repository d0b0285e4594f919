use api_contract::{
    ApiResponse, ConnectorRunStatus, ConnectorSummary, SetupConnectorRequest,
    SetupConnectorResponse, StopConnectorResponse,
};
use serde_json::Value;

#[test]
fn setup_request_accepts_snake_case() {
    let payload = r#"{
        "equipment_id": "PUMP-001",
        "connector_type": "registers",
        "config": {"polling_interval_seconds": 2},
        "connection_params": {"host": "10.0.0.5"}
    }"#;
    let req: SetupConnectorRequest = serde_json::from_str(payload).expect("parse");
    assert_eq!(req.equipment_id, "PUMP-001");
    assert_eq!(req.connector_type, "registers");
    assert_eq!(req.config["polling_interval_seconds"], 2);
    assert_eq!(req.connection_params["host"], "10.0.0.5");
}

#[test]
fn setup_request_accepts_camel_case_and_missing_maps() {
    let payload = r#"{"equipmentId":"HVAC-7","connectorType":"file"}"#;
    let req: SetupConnectorRequest = serde_json::from_str(payload).expect("parse");
    assert_eq!(req.equipment_id, "HVAC-7");
    assert!(req.config.is_empty());
    assert!(req.connection_params.is_empty());
}

#[test]
fn status_serializes_lowercase() {
    let response = SetupConnectorResponse {
        equipment_id: "PUMP-001".to_string(),
        connector_type: "rest".to_string(),
        status: ConnectorRunStatus::Running,
    };
    let value = serde_json::to_value(response).expect("serialize");
    assert_eq!(value["status"], "running");
    assert_eq!(value["connector_type"], "rest");

    let stop = StopConnectorResponse {
        equipment_id: "PUMP-001".to_string(),
        status: ConnectorRunStatus::Stopped,
    };
    let value = serde_json::to_value(stop).expect("serialize");
    assert_eq!(value["status"], "stopped");
}

#[test]
fn error_response_has_no_data() {
    let response: ApiResponse<Vec<ConnectorSummary>> =
        ApiResponse::error("NOT_FOUND", "no connector for PUMP-9");
    let value = serde_json::to_value(response).expect("serialize");
    assert_eq!(value["success"], Value::Bool(false));
    assert!(value["data"].is_null());
    assert_eq!(value["error"]["code"], "NOT_FOUND");
}
