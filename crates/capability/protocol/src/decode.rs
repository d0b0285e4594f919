//! 原始值解码
//!
//! 纯函数：把协议层的原始值（寄存器字、线圈位、节点 JSON、CSV 单元格）
//! 转换为 `ReadingValue`。

use crate::error::DecodeError;
use crate::types::RegisterDataType;
use domain::ReadingValue;
use serde_json::Value;

/// 解码保持/输入寄存器，并乘以缩放系数（布尔不缩放）。
///
/// - float32：`(w0 << 16) | w1` 按 IEEE-754 位模式还原
/// - int32：`(w0 << 16) + w1`
/// - int16：`w0`
/// - bool：`w0 != 0`
pub fn decode_registers(
    words: &[u16],
    data_type: RegisterDataType,
    scaling: f64,
) -> Result<ReadingValue, DecodeError> {
    if words.is_empty() {
        return Err(DecodeError::Empty);
    }
    if words.len() < data_type.width() {
        return Err(DecodeError::InsufficientWidth {
            data_type: data_type.as_str(),
            required: data_type.width(),
            actual: words.len(),
        });
    }

    let raw = match data_type {
        RegisterDataType::Float32 => f64::from(f32::from_bits(join_words(words[0], words[1]))),
        RegisterDataType::Int32 => f64::from(join_words(words[0], words[1])),
        RegisterDataType::Int16 => f64::from(words[0]),
        RegisterDataType::Bool => return Ok(ReadingValue::Bool(words[0] != 0)),
    };
    Ok(ReadingValue::Number(raw * scaling))
}

fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// 线圈/离散输入取第一位。
pub fn decode_bits(bits: &[bool]) -> Result<ReadingValue, DecodeError> {
    bits.first()
        .copied()
        .map(ReadingValue::Bool)
        .ok_or(DecodeError::Empty)
}

/// 解码节点当前值。
///
/// 接受标量，或 `{ "value": .., "status": .. }` 形式的数据值；
/// status 非 Good 视为失败。
pub fn decode_node_value(value: &Value) -> Result<ReadingValue, DecodeError> {
    match value {
        Value::Bool(v) => Ok(ReadingValue::Bool(*v)),
        Value::Number(n) => n
            .as_f64()
            .map(ReadingValue::Number)
            .ok_or_else(|| DecodeError::Unsupported(n.to_string())),
        Value::String(s) => Ok(decode_text(s)),
        Value::Object(object) => {
            if let Some(status) = object.get("status").and_then(Value::as_str) {
                if !status.to_ascii_lowercase().starts_with("good") {
                    return Err(DecodeError::BadStatus(status.to_string()));
                }
            }
            match object.get("value") {
                Some(inner) if !inner.is_object() => decode_node_value(inner),
                Some(inner) => Err(DecodeError::Unsupported(inner.to_string())),
                None => Err(DecodeError::Empty),
            }
        }
        Value::Null => Err(DecodeError::Empty),
        Value::Array(_) => Err(DecodeError::Unsupported("array".to_string())),
    }
}

/// 解码 CSV 单元格；空单元格视为缺失。
pub fn decode_cell(raw: &str) -> Option<ReadingValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Some(decode_text(raw))
}

fn decode_text(raw: &str) -> ReadingValue {
    let trimmed = raw.trim();
    // "nan" / "inf" 无法在线格式中表示，按文本保留
    if let Some(number) = trimmed.parse::<f64>().ok().filter(|n| n.is_finite()) {
        return ReadingValue::Number(number);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => ReadingValue::Bool(true),
        "false" => ReadingValue::Bool(false),
        _ => ReadingValue::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn float32_from_two_words() {
        let value = decode_registers(&[0x447A, 0x0000], RegisterDataType::Float32, 1.0).unwrap();
        assert_eq!(value, ReadingValue::Number(1000.0));
    }

    #[test]
    fn int32_and_int16_use_high_word_first() {
        let value = decode_registers(&[0x0001, 0x0002], RegisterDataType::Int32, 1.0).unwrap();
        assert_eq!(value, ReadingValue::Number(65_538.0));

        let value = decode_registers(&[250], RegisterDataType::Int16, 0.1).unwrap();
        assert_eq!(value.as_f64().map(|v| (v * 10.0).round()), Some(250.0));
    }

    #[test]
    fn short_register_read_is_decode_error() {
        let err = decode_registers(&[0x447A], RegisterDataType::Float32, 1.0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InsufficientWidth {
                data_type: "float32",
                required: 2,
                actual: 1
            }
        );
        assert_eq!(
            decode_registers(&[], RegisterDataType::Int16, 1.0).unwrap_err(),
            DecodeError::Empty
        );
    }

    #[test]
    fn bool_register_ignores_scaling() {
        let value = decode_registers(&[7], RegisterDataType::Bool, 10.0).unwrap();
        assert_eq!(value, ReadingValue::Bool(true));
        assert_eq!(decode_bits(&[false, true]).unwrap(), ReadingValue::Bool(false));
    }

    #[test]
    fn node_values() {
        assert_eq!(
            decode_node_value(&json!(42.5)).unwrap(),
            ReadingValue::Number(42.5)
        );
        assert_eq!(
            decode_node_value(&json!({"value": "12", "status": "Good"})).unwrap(),
            ReadingValue::Number(12.0)
        );
        assert!(matches!(
            decode_node_value(&json!({"value": 1, "status": "BadNodeIdUnknown"})),
            Err(DecodeError::BadStatus(_))
        ));
        assert!(decode_node_value(&json!(null)).is_err());
    }

    #[test]
    fn csv_cells() {
        assert_eq!(decode_cell(" 3.5 "), Some(ReadingValue::Number(3.5)));
        assert_eq!(decode_cell("TRUE"), Some(ReadingValue::Bool(true)));
        assert_eq!(decode_cell("running"), Some(ReadingValue::Text("running".into())));
        assert_eq!(decode_cell("  "), None);
    }

    #[test]
    fn non_finite_text_stays_text() {
        assert_eq!(decode_cell("NaN"), Some(ReadingValue::Text("NaN".into())));
        assert_eq!(decode_cell("inf"), Some(ReadingValue::Text("inf".into())));
        assert_eq!(
            decode_node_value(&json!("-infinity")).unwrap(),
            ReadingValue::Text("-infinity".into())
        );
    }
}
